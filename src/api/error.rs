// ==========================================
// 制造撮合平台 - 履约核心 - API 层错误类型
// ==========================================
// 职责: 对外错误分类, 把仓储/引擎错误转换为调用方可处理的类别
// 分类: Validation / Conflict / InvalidStateTransition / CapacityExhausted /
//       ExternalService / PermissionDenied / NotFound / Database / Internal
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API 层错误类型, 所有错误信息必须包含显式原因
#[derive(Error, Debug)]
pub enum ApiError {
    /// 输入不合法, 未做任何变更
    #[error("数据验证失败: {0}")]
    Validation(String),

    /// 乐观并发冲突 (已按上限重试后仍失败)
    #[error("并发冲突: {0}")]
    Conflict(String),

    /// 当前状态不允许该操作 (不自动重试)
    #[error("无效的状态转换: {entity} from={from} to={to} ({reason})")]
    InvalidStateTransition {
        entity: String,
        from: String,
        to: String,
        reason: String,
    },

    /// 没有供应商满足数量/日期要求
    #[error("产能不足: {0}")]
    CapacityExhausted(String),

    /// 外部服务失败 (只记录, 不阻塞权威流程)
    #[error("外部服务错误: {0}")]
    ExternalService(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 只有并发冲突值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }

    pub fn state(entity: &str, from: impl ToString, to: impl ToString, reason: impl Into<String>) -> Self {
        ApiError::InvalidStateTransition {
            entity: entity.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => ApiError::Conflict(format!(
                "{}({}) 已被其他操作修改 (期望 revision={}, 实际 revision={})",
                entity, id, expected, actual
            )),
            RepositoryError::Busy(msg) => ApiError::Conflict(format!("数据库繁忙: {}", msg)),
            RepositoryError::InsufficientCapacity {
                supplier_id,
                date,
                requested,
                available,
            } => ApiError::CapacityExhausted(format!(
                "供应商 {} 在 {} 可用 {}, 需求 {}",
                supplier_id, date, available, requested
            )),

            // 数据库
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={}) 不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg)
            | RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::Database(msg),
            RepositoryError::LockError(msg) => ApiError::Database(format!("数据库锁获取失败: {}", msg)),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Validation(format!("记录已存在: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::Validation(format!("引用的记录不存在: {}", msg))
            }
            RepositoryError::CheckConstraintViolation(msg) => {
                ApiError::Validation(format!("数据约束违反: {}", msg))
            }

            // 数据质量
            RepositoryError::ValidationError(msg) => ApiError::Validation(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::Validation(format!("字段 {} 错误: {}", field, message))
            }

            // 通用
            RepositoryError::InternalError(msg) => ApiError::Internal(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => ApiError::Validation(msg),
            EngineError::InvalidTransition {
                entity,
                from,
                to,
                reason,
            } => ApiError::InvalidStateTransition {
                entity: entity.to_string(),
                from,
                to,
                reason,
            },
            EngineError::PermissionDenied { actor, action } => {
                ApiError::PermissionDenied(format!("{} 无权执行 {}", actor, action))
            }
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

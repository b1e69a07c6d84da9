// ==========================================
// 制造撮合平台 - 履约核心 - 引擎层错误类型
// ==========================================
// 职责: 纯规则违反 (校验/非法转换/越权), 不含 I/O 错误
// ==========================================

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("无效的状态转换: {entity} from={from} to={to} ({reason})")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
        reason: String,
    },

    #[error("权限不足: actor={actor}, action={action}")]
    PermissionDenied { actor: String, action: String },
}

impl EngineError {
    pub fn transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

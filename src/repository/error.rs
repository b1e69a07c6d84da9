// ==========================================
// 制造撮合平台 - 履约核心 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 并发控制错误 =====
    #[error("乐观锁冲突: {entity}({id}), expected_revision={expected}, actual_revision={actual}")]
    OptimisticLockFailure {
        entity: String,
        id: String,
        expected: i64,
        actual: i64,
    },

    #[error("数据库繁忙: {0}")]
    Busy(String),

    #[error("产能不足: supplier={supplier_id}, date={date}, requested={requested}, available={available}")]
    InsufficientCapacity {
        supplier_id: String,
        date: String,
        requested: i64,
        available: i64,
    },

    // ===== 数据库错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("检查约束违反: {0}")]
    CheckConstraintViolation(String),

    // ===== 数据质量错误 =====
    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        RepositoryError::NotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        RepositoryError::FieldValueError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg) => {
                let text = msg.unwrap_or_else(|| code.to_string());
                match code.code {
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        RepositoryError::Busy(text)
                    }
                    _ if text.contains("UNIQUE") => RepositoryError::UniqueConstraintViolation(text),
                    _ if text.contains("FOREIGN KEY") => RepositoryError::ForeignKeyViolation(text),
                    _ if text.contains("CHECK") => RepositoryError::CheckConstraintViolation(text),
                    _ => RepositoryError::DatabaseQueryError(text),
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

// ==========================================
// 行映射辅助
// ==========================================
// 文本列 → 领域类型, 解析失败转为 rusqlite 的 FromSqlConversionFailure

pub(crate) fn parse_column<T, F>(idx: usize, raw: &str, parse: F) -> rusqlite::Result<T>
where
    F: FnOnce(&str) -> Option<T>,
{
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("无法解析列值: {}", raw).into(),
        )
    })
}

pub(crate) fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<chrono::NaiveDate> {
    parse_column(idx, raw, |s| {
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
    })
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    parse_column(idx, raw, |s| {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    })
}

pub(crate) fn parse_opt_ts(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<chrono::DateTime<chrono::Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

pub(crate) fn parse_decimal(idx: usize, raw: &str) -> rusqlite::Result<rust_decimal::Decimal> {
    parse_column(idx, raw, |s| s.parse::<rust_decimal::Decimal>().ok())
}

pub(crate) fn parse_opt_decimal(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<rust_decimal::Decimal>> {
    raw.map(|s| parse_decimal(idx, &s)).transpose()
}

pub(crate) fn fmt_date(d: chrono::NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn fmt_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format_roundtrip_preserves_ordering() {
        let a = chrono::Utc::now();
        let b = a + chrono::Duration::milliseconds(5);
        assert!(fmt_ts(a) < fmt_ts(b));
        assert_eq!(parse_ts(0, &fmt_ts(a)).unwrap().timestamp_micros(), a.timestamp_micros());
    }

    #[test]
    fn test_bad_column_value_is_conversion_failure() {
        let err = parse_date(3, "not-a-date").unwrap_err();
        assert!(matches!(err, rusqlite::Error::FromSqlConversionFailure(3, _, _)));
    }
}

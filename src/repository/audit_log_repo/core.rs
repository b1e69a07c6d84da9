use crate::domain::audit_log::AuditRecord;
use crate::repository::error::{fmt_ts, RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// AuditLogRepository - 审计日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑, 只做数据映射
pub struct AuditLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 追加审计记录
    ///
    /// # 返回
    /// - `Ok(audit_id)`: 成功插入
    /// - `Err(UniqueConstraintViolation)`: 同一实体的 event_id 已存在 (重复投递)
    pub fn insert(&self, record: &AuditRecord) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, record)
    }

    pub fn insert_in(conn: &Connection, record: &AuditRecord) -> RepositoryResult<String> {
        conn.execute(
            r#"
            INSERT INTO audit_log (
                audit_id, entity_type, entity_id, previous_state, new_state,
                actor, event_id, recorded_at, payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.audit_id,
                record.entity_type.to_db_str(),
                record.entity_id,
                record.previous_state,
                record.new_state,
                record.actor,
                record.event_id,
                fmt_ts(record.recorded_at),
                record.payload_json.as_ref().map(|v| v.to_string()),
            ],
        )?;

        Ok(record.audit_id.clone())
    }
}

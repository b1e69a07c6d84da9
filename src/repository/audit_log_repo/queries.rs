use super::core::AuditLogRepository;
use crate::domain::audit_log::{AuditEntityType, AuditRecord};
use crate::repository::error::{parse_column, parse_ts, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SELECT_COLUMNS: &str = r#"
    SELECT audit_id, entity_type, entity_id, previous_state, new_state,
           actor, event_id, recorded_at, payload_json
    FROM audit_log
"#;

impl AuditLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 查询某实体的全部审计记录 (时间正序)
    pub fn find_by_entity(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
    ) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY recorded_at, rowid",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![entity_type.to_db_str(), entity_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn find_by_event_id(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
        event_id: &str,
    ) -> RepositoryResult<Option<AuditRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_event_id_in(&conn, entity_type, entity_id, event_id)
    }

    /// 按触发事件 ID 查找 (幂等识别)
    pub fn find_by_event_id_in(
        conn: &Connection,
        entity_type: AuditEntityType,
        entity_id: &str,
        event_id: &str,
    ) -> RepositoryResult<Option<AuditRecord>> {
        let sql = format!(
            "{} WHERE entity_type = ?1 AND entity_id = ?2 AND event_id = ?3",
            SELECT_COLUMNS
        );
        let record = conn
            .query_row(
                &sql,
                params![entity_type.to_db_str(), entity_id, event_id],
                Self::map_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count_by_entity(&self, entity_type: AuditEntityType, entity_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE entity_type = ?1 AND entity_id = ?2",
            params![entity_type.to_db_str(), entity_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub(super) fn map_row(row: &Row) -> rusqlite::Result<AuditRecord> {
        let payload_raw: Option<String> = row.get(8)?;
        let payload_json = payload_raw
            .map(|s| {
                serde_json::from_str(&s).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        8,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
            })
            .transpose()?;

        Ok(AuditRecord {
            audit_id: row.get(0)?,
            entity_type: parse_column(1, &row.get::<_, String>(1)?, AuditEntityType::from_db_str)?,
            entity_id: row.get(2)?,
            previous_state: row.get(3)?,
            new_state: row.get(4)?,
            actor: row.get(5)?,
            event_id: row.get(6)?,
            recorded_at: parse_ts(7, &row.get::<_, String>(7)?)?,
            payload_json,
        })
    }
}

// ==========================================
// 制造撮合平台 - 履约核心 - 生产阶段仓储
// ==========================================
// 红线: 阶段一次性实例化, 之后只原地更新, 不删除
// ==========================================

use crate::domain::production::ProductionStage;
use crate::domain::types::StageStatus;
use crate::repository::error::{
    fmt_date, fmt_ts, parse_column, parse_date, parse_opt_ts, RepositoryError, RepositoryResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct ProductionStageRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT supplier_order_id, stage_number, stage_name, completion_percentage,
           status, started_at, completed_at, target_date, notes, photos_json, revision
    FROM production_stages
"#;

impl ProductionStageRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量插入阶段 (实例化)
    pub fn insert_all_in(conn: &Connection, stages: &[ProductionStage]) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO production_stages (
                supplier_order_id, stage_number, stage_name, completion_percentage,
                status, started_at, completed_at, target_date, notes, photos_json, revision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )?;

        for stage in stages {
            stmt.execute(params![
                stage.supplier_order_id,
                stage.stage_number,
                stage.stage_name,
                stage.completion_percentage,
                stage.status.to_db_str(),
                stage.started_at.map(fmt_ts),
                stage.completed_at.map(fmt_ts),
                fmt_date(stage.target_date),
                stage.notes,
                Self::photos_json(&stage.photos)?,
                stage.revision,
            ])?;
        }
        Ok(stages.len())
    }

    /// 更新单个阶段 (带乐观锁检查), 返回新 revision
    pub fn update_in(conn: &Connection, stage: &ProductionStage) -> RepositoryResult<i64> {
        let rows_affected = conn.execute(
            r#"
            UPDATE production_stages
               SET completion_percentage = ?1, status = ?2, started_at = ?3,
                   completed_at = ?4, notes = ?5, photos_json = ?6,
                   revision = revision + 1
             WHERE supplier_order_id = ?7 AND stage_number = ?8 AND revision = ?9
            "#,
            params![
                stage.completion_percentage,
                stage.status.to_db_str(),
                stage.started_at.map(fmt_ts),
                stage.completed_at.map(fmt_ts),
                stage.notes,
                Self::photos_json(&stage.photos)?,
                stage.supplier_order_id,
                stage.stage_number,
                stage.revision,
            ],
        )?;

        if rows_affected == 0 {
            let id = format!("{}#{}", stage.supplier_order_id, stage.stage_number);
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM production_stages WHERE supplier_order_id = ?1 AND stage_number = ?2",
                    params![stage.supplier_order_id, stage.stage_number],
                    |row| row.get(0),
                )
                .optional()?;

            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "ProductionStage".to_string(),
                    id,
                    expected: stage.revision,
                    actual,
                }),
                None => Err(RepositoryError::not_found("ProductionStage", id)),
            };
        }

        Ok(stage.revision + 1)
    }

    pub fn find_by_supplier_order(
        &self,
        supplier_order_id: &str,
    ) -> RepositoryResult<Vec<ProductionStage>> {
        let conn = self.get_conn()?;
        Self::find_by_supplier_order_in(&conn, supplier_order_id)
    }

    /// 按 stage_number 升序返回
    pub fn find_by_supplier_order_in(
        conn: &Connection,
        supplier_order_id: &str,
    ) -> RepositoryResult<Vec<ProductionStage>> {
        let sql = format!(
            "{} WHERE supplier_order_id = ?1 ORDER BY stage_number",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let stages = stmt
            .query_map(params![supplier_order_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stages)
    }

    fn photos_json(photos: &[String]) -> RepositoryResult<String> {
        serde_json::to_string(photos).map_err(|e| RepositoryError::InternalError(e.to_string()))
    }

    fn map_row(row: &Row) -> rusqlite::Result<ProductionStage> {
        let photos_raw: String = row.get(9)?;
        let photos: Vec<String> = serde_json::from_str(&photos_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(ProductionStage {
            supplier_order_id: row.get(0)?,
            stage_number: row.get(1)?,
            stage_name: row.get(2)?,
            completion_percentage: row.get(3)?,
            status: parse_column(4, &row.get::<_, String>(4)?, StageStatus::from_db_str)?,
            started_at: parse_opt_ts(5, row.get(5)?)?,
            completed_at: parse_opt_ts(6, row.get(6)?)?,
            target_date: parse_date(7, &row.get::<_, String>(7)?)?,
            notes: row.get(8)?,
            photos,
            revision: row.get(10)?,
        })
    }
}

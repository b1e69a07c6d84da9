// ==========================================
// 制造撮合平台 - 履约核心 - 供应商档案仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::capacity::Supplier;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// SupplierRepository - 供应商仓储
// ==========================================
pub struct SupplierRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT supplier_id, name, verified, active, performance_score,
           specializations_json, lead_time_days
    FROM suppliers
"#;

impl SupplierRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入或更新供应商档案
    pub fn upsert(&self, supplier: &Supplier) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let specs = serde_json::to_string(&supplier.specializations)
            .map_err(|e| RepositoryError::InternalError(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO suppliers (
                supplier_id, name, verified, active, performance_score,
                specializations_json, lead_time_days
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(supplier_id) DO UPDATE SET
                name = excluded.name,
                verified = excluded.verified,
                active = excluded.active,
                performance_score = excluded.performance_score,
                specializations_json = excluded.specializations_json,
                lead_time_days = excluded.lead_time_days
            "#,
            params![
                supplier.supplier_id,
                supplier.name,
                supplier.verified,
                supplier.active,
                supplier.performance_score,
                specs,
                supplier.lead_time_days,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, supplier_id: &str) -> RepositoryResult<Option<Supplier>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, supplier_id)
    }

    pub fn find_by_id_in(conn: &Connection, supplier_id: &str) -> RepositoryResult<Option<Supplier>> {
        let sql = format!("{} WHERE supplier_id = ?1", SELECT_COLUMNS);
        let supplier = conn
            .query_row(&sql, params![supplier_id], Self::map_row)
            .optional()?;
        Ok(supplier)
    }

    /// 已认证且启用的供应商
    pub fn list_eligible(&self) -> RepositoryResult<Vec<Supplier>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE verified = 1 AND active = 1 ORDER BY supplier_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let suppliers = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(suppliers)
    }

    fn map_row(row: &Row) -> rusqlite::Result<Supplier> {
        let specs_raw: String = row.get(5)?;
        let specializations: Vec<String> = serde_json::from_str(&specs_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Supplier {
            supplier_id: row.get(0)?,
            name: row.get(1)?,
            verified: row.get(2)?,
            active: row.get(3)?,
            performance_score: row.get(4)?,
            specializations,
            lead_time_days: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> SupplierRepository {
        let shared = crate::db::open_in_memory_shared().unwrap();
        SupplierRepository::new(shared)
    }

    fn supplier(id: &str, verified: bool, active: bool) -> Supplier {
        Supplier {
            supplier_id: id.to_string(),
            name: format!("Factory {}", id),
            verified,
            active,
            performance_score: 80.0,
            specializations: vec!["knit_tops".to_string()],
            lead_time_days: 10,
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let repo = setup();
        repo.upsert(&supplier("S1", true, true)).unwrap();

        let found = repo.find_by_id("S1").unwrap().unwrap();
        assert_eq!(found.specializations, vec!["knit_tops".to_string()]);
        assert!(repo.find_by_id("S404").unwrap().is_none());
    }

    #[test]
    fn test_list_eligible_filters_unverified_and_inactive() {
        let repo = setup();
        repo.upsert(&supplier("S1", true, true)).unwrap();
        repo.upsert(&supplier("S2", false, true)).unwrap();
        repo.upsert(&supplier("S3", true, false)).unwrap();

        let eligible = repo.list_eligible().unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].supplier_id, "S1");
    }
}

// ==========================================
// 制造撮合平台 - 履约核心 - 供应商订单仓储
// ==========================================
// 红线: Repository 不含业务逻辑, 只做数据映射
// 红线: 更新一律带 revision 检查 (乐观锁)
// ==========================================

use crate::domain::supplier_order::{SupplierOrder, SupplierOrderOwner};
use crate::domain::types::{AcceptanceStatus, SupplierOrderStatus};
use crate::repository::error::{
    fmt_date, fmt_ts, parse_column, parse_date, parse_opt_decimal, parse_ts, RepositoryError,
    RepositoryResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// SupplierOrderRepository - 供应商订单仓储
// ==========================================
pub struct SupplierOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT supplier_order_id, owner_kind, owner_id, supplier_id, product_type,
           quantity, target_date, acceptance_status, status, supplier_price,
           counter_offer_price, counter_offer_note, rejection_reason,
           created_at, updated_at, revision
    FROM supplier_orders
"#;

impl SupplierOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_in(conn: &Connection, so: &SupplierOrder) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO supplier_orders (
                supplier_order_id, owner_kind, owner_id, supplier_id, product_type,
                quantity, target_date, acceptance_status, status, supplier_price,
                counter_offer_price, counter_offer_note, rejection_reason,
                created_at, updated_at, revision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                so.supplier_order_id,
                so.owner.kind_str(),
                so.owner.id(),
                so.supplier_id,
                so.product_type,
                so.quantity,
                fmt_date(so.target_date),
                so.acceptance_status.to_db_str(),
                so.status.to_db_str(),
                so.supplier_price.map(|p| p.to_string()),
                so.counter_offer_price.map(|p| p.to_string()),
                so.counter_offer_note,
                so.rejection_reason,
                fmt_ts(so.created_at),
                fmt_ts(so.updated_at),
                so.revision,
            ],
        )?;
        Ok(())
    }

    /// 更新状态与价格字段 (带乐观锁检查), 返回新 revision
    pub fn update_in(conn: &Connection, so: &SupplierOrder) -> RepositoryResult<i64> {
        let rows_affected = conn.execute(
            r#"
            UPDATE supplier_orders
               SET acceptance_status = ?1, status = ?2, supplier_price = ?3,
                   counter_offer_price = ?4, counter_offer_note = ?5,
                   rejection_reason = ?6, updated_at = ?7, revision = revision + 1
             WHERE supplier_order_id = ?8 AND revision = ?9
            "#,
            params![
                so.acceptance_status.to_db_str(),
                so.status.to_db_str(),
                so.supplier_price.map(|p| p.to_string()),
                so.counter_offer_price.map(|p| p.to_string()),
                so.counter_offer_note,
                so.rejection_reason,
                fmt_ts(so.updated_at),
                so.supplier_order_id,
                so.revision,
            ],
        )?;

        if rows_affected == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM supplier_orders WHERE supplier_order_id = ?1",
                    params![so.supplier_order_id],
                    |row| row.get(0),
                )
                .optional()?;

            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "SupplierOrder".to_string(),
                    id: so.supplier_order_id.clone(),
                    expected: so.revision,
                    actual,
                }),
                None => Err(RepositoryError::not_found("SupplierOrder", &so.supplier_order_id)),
            };
        }

        Ok(so.revision + 1)
    }

    pub fn find_by_id(&self, supplier_order_id: &str) -> RepositoryResult<Option<SupplierOrder>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, supplier_order_id)
    }

    pub fn find_by_id_in(
        conn: &Connection,
        supplier_order_id: &str,
    ) -> RepositoryResult<Option<SupplierOrder>> {
        let sql = format!("{} WHERE supplier_order_id = ?1", SELECT_COLUMNS);
        let so = conn
            .query_row(&sql, params![supplier_order_id], Self::map_row)
            .optional()?;
        Ok(so)
    }

    pub fn get_in(conn: &Connection, supplier_order_id: &str) -> RepositoryResult<SupplierOrder> {
        Self::find_by_id_in(conn, supplier_order_id)?
            .ok_or_else(|| RepositoryError::not_found("SupplierOrder", supplier_order_id))
    }

    /// 查询归属于某订单/批次的全部供应商订单
    pub fn find_by_owner(&self, owner: &SupplierOrderOwner) -> RepositoryResult<Vec<SupplierOrder>> {
        let conn = self.get_conn()?;
        Self::find_by_owner_in(&conn, owner)
    }

    pub fn find_by_owner_in(
        conn: &Connection,
        owner: &SupplierOrderOwner,
    ) -> RepositoryResult<Vec<SupplierOrder>> {
        let sql = format!(
            "{} WHERE owner_kind = ?1 AND owner_id = ?2 ORDER BY created_at, supplier_order_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map(params![owner.kind_str(), owner.id()], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    pub fn list_by_supplier(&self, supplier_id: &str) -> RepositoryResult<Vec<SupplierOrder>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE supplier_id = ?1 ORDER BY created_at",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let list = stmt
            .query_map(params![supplier_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(list)
    }

    fn map_row(row: &Row) -> rusqlite::Result<SupplierOrder> {
        let owner_kind: String = row.get(1)?;
        let owner_id: String = row.get(2)?;
        let owner = parse_column(1, &owner_kind, |k| {
            SupplierOrderOwner::from_parts(k, owner_id.clone())
        })?;

        Ok(SupplierOrder {
            supplier_order_id: row.get(0)?,
            owner,
            supplier_id: row.get(3)?,
            product_type: row.get(4)?,
            quantity: row.get(5)?,
            target_date: parse_date(6, &row.get::<_, String>(6)?)?,
            acceptance_status: parse_column(
                7,
                &row.get::<_, String>(7)?,
                AcceptanceStatus::from_db_str,
            )?,
            status: parse_column(8, &row.get::<_, String>(8)?, SupplierOrderStatus::from_db_str)?,
            supplier_price: parse_opt_decimal(9, row.get(9)?)?,
            counter_offer_price: parse_opt_decimal(10, row.get(10)?)?,
            counter_offer_note: row.get(11)?,
            rejection_reason: row.get(12)?,
            created_at: parse_ts(13, &row.get::<_, String>(13)?)?,
            updated_at: parse_ts(14, &row.get::<_, String>(14)?)?,
            revision: row.get(15)?,
        })
    }
}

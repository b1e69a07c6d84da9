// ==========================================
// 制造撮合平台 - 履约核心 - 买家订单仓储
// ==========================================
// 红线: Repository 不含业务逻辑, 只做数据映射
// 红线: 更新一律带 revision 检查 (乐观锁)
// ==========================================

use crate::domain::order::Order;
use crate::domain::types::{PaymentStatus, WorkflowStatus};
use crate::repository::error::{
    fmt_date, fmt_ts, parse_column, parse_date, parse_opt_decimal, parse_ts, RepositoryError,
    RepositoryResult,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// OrderRepository - 买家订单仓储
// ==========================================
pub struct OrderRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT order_id, buyer_id, product_type, quantity, target_date,
           workflow_status, hold_from_status, buyer_price, payment_status,
           created_at, updated_at, revision
    FROM orders
"#;

impl OrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    pub fn insert(&self, order: &Order) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, order)
    }

    pub fn insert_in(conn: &Connection, order: &Order) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO orders (
                order_id, buyer_id, product_type, quantity, target_date,
                workflow_status, hold_from_status, buyer_price, payment_status,
                created_at, updated_at, revision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                order.order_id,
                order.buyer_id,
                order.product_type,
                order.quantity,
                fmt_date(order.target_date),
                order.workflow_status.to_db_str(),
                order.hold_from_status.map(|s| s.to_db_str()),
                order.buyer_price.map(|p| p.to_string()),
                order.payment_status.to_db_str(),
                fmt_ts(order.created_at),
                fmt_ts(order.updated_at),
                order.revision,
            ],
        )?;
        Ok(())
    }

    /// 更新订单可变字段 (带乐观锁检查)
    ///
    /// `order.revision` 为读取时的版本; 成功后返回新版本号
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配 (已被并发修改)
    /// - `RepositoryError::NotFound`: order_id 不存在
    pub fn update_in(conn: &Connection, order: &Order) -> RepositoryResult<i64> {
        let rows_affected = conn.execute(
            r#"
            UPDATE orders
               SET workflow_status = ?1, hold_from_status = ?2, buyer_price = ?3,
                   payment_status = ?4, updated_at = ?5, revision = revision + 1
             WHERE order_id = ?6 AND revision = ?7
            "#,
            params![
                order.workflow_status.to_db_str(),
                order.hold_from_status.map(|s| s.to_db_str()),
                order.buyer_price.map(|p| p.to_string()),
                order.payment_status.to_db_str(),
                fmt_ts(order.updated_at),
                order.order_id,
                order.revision,
            ],
        )?;

        if rows_affected == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM orders WHERE order_id = ?1",
                    params![order.order_id],
                    |row| row.get(0),
                )
                .optional()?;

            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "Order".to_string(),
                    id: order.order_id.clone(),
                    expected: order.revision,
                    actual,
                }),
                None => Err(RepositoryError::not_found("Order", &order.order_id)),
            };
        }

        Ok(order.revision + 1)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, order_id: &str) -> RepositoryResult<Option<Order>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, order_id)
    }

    pub fn find_by_id_in(conn: &Connection, order_id: &str) -> RepositoryResult<Option<Order>> {
        let sql = format!("{} WHERE order_id = ?1", SELECT_COLUMNS);
        let order = conn
            .query_row(&sql, params![order_id], Self::map_row)
            .optional()?;
        Ok(order)
    }

    /// 读取订单, 不存在时返回 NotFound
    pub fn get_in(conn: &Connection, order_id: &str) -> RepositoryResult<Order> {
        Self::find_by_id_in(conn, order_id)?
            .ok_or_else(|| RepositoryError::not_found("Order", order_id))
    }

    pub fn list_by_status(&self, status: WorkflowStatus) -> RepositoryResult<Vec<Order>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE workflow_status = ?1 ORDER BY created_at",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map(params![status.to_db_str()], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orders)
    }

    fn map_row(row: &Row) -> rusqlite::Result<Order> {
        let hold_raw: Option<String> = row.get(6)?;
        let hold_from_status = hold_raw
            .map(|s| parse_column(6, &s, WorkflowStatus::from_db_str))
            .transpose()?;

        Ok(Order {
            order_id: row.get(0)?,
            buyer_id: row.get(1)?,
            product_type: row.get(2)?,
            quantity: row.get(3)?,
            target_date: parse_date(4, &row.get::<_, String>(4)?)?,
            workflow_status: parse_column(5, &row.get::<_, String>(5)?, WorkflowStatus::from_db_str)?,
            hold_from_status,
            buyer_price: parse_opt_decimal(7, row.get(7)?)?,
            payment_status: parse_column(8, &row.get::<_, String>(8)?, PaymentStatus::from_db_str)?,
            created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
            updated_at: parse_ts(10, &row.get::<_, String>(10)?)?,
            revision: row.get(11)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn sample(id: &str) -> Order {
        let mut order = Order::new(
            id.to_string(),
            "B1".to_string(),
            "t-shirt".to_string(),
            200,
            NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
        );
        order.buyer_price = Some(Decimal::new(1260, 2));
        order
    }

    #[test]
    fn test_insert_and_find_roundtrip() {
        let repo = OrderRepository::new(crate::db::open_in_memory_shared().unwrap());
        let order = sample("O1");
        repo.insert(&order).unwrap();

        let found = repo.find_by_id("O1").unwrap().unwrap();
        assert_eq!(found.workflow_status, WorkflowStatus::QuoteRequested);
        assert_eq!(found.buyer_price, Some(Decimal::new(1260, 2)));
        assert_eq!(found.revision, 0);
    }

    #[test]
    fn test_update_with_stale_revision_fails() {
        let shared = crate::db::open_in_memory_shared().unwrap();
        let repo = OrderRepository::new(shared.clone());
        repo.insert(&sample("O1")).unwrap();

        let conn = shared.lock().unwrap();
        let mut first = OrderRepository::get_in(&conn, "O1").unwrap();
        let stale = first.clone();

        first.workflow_status = WorkflowStatus::QuoteSent;
        assert_eq!(OrderRepository::update_in(&conn, &first).unwrap(), 1);

        let err = OrderRepository::update_in(&conn, &stale).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::OptimisticLockFailure { expected: 0, actual: 1, .. }
        ));
    }

    #[test]
    fn test_update_missing_order_is_not_found() {
        let shared = crate::db::open_in_memory_shared().unwrap();
        let conn = shared.lock().unwrap();
        let err = OrderRepository::update_in(&conn, &sample("ghost")).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}

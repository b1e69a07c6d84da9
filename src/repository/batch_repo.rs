// ==========================================
// 制造撮合平台 - 履约核心 - 批次仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: 批次计数更新一律带 revision 检查, 同一批次的并发加入串行化
// ==========================================

use crate::domain::batch::{Batch, BatchMember};
use crate::domain::types::BatchStatus;
use crate::repository::error::{
    fmt_ts, parse_column, parse_decimal, parse_opt_decimal, parse_opt_ts, parse_ts,
    RepositoryError, RepositoryResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// BatchRepository - 批次仓储
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT batch_id, product_category, target_quantity, current_quantity,
           max_styles, current_style_count, base_price, window_closes_at,
           status, locked_at, created_at, revision
    FROM batches
"#;

impl BatchRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 批次
    // ==========================================

    pub fn insert_in(conn: &Connection, batch: &Batch) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO batches (
                batch_id, product_category, target_quantity, current_quantity,
                max_styles, current_style_count, base_price, window_closes_at,
                status, locked_at, created_at, revision
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                batch.batch_id,
                batch.product_category,
                batch.target_quantity,
                batch.current_quantity,
                batch.max_styles,
                batch.current_style_count,
                batch.base_price.to_string(),
                fmt_ts(batch.window_closes_at),
                batch.status.to_db_str(),
                batch.locked_at.map(fmt_ts),
                fmt_ts(batch.created_at),
                batch.revision,
            ],
        )?;
        Ok(())
    }

    /// 更新计数与状态 (带乐观锁检查), 返回新 revision
    pub fn update_in(conn: &Connection, batch: &Batch) -> RepositoryResult<i64> {
        let rows_affected = conn.execute(
            r#"
            UPDATE batches
               SET current_quantity = ?1, current_style_count = ?2, status = ?3,
                   locked_at = ?4, revision = revision + 1
             WHERE batch_id = ?5 AND revision = ?6
            "#,
            params![
                batch.current_quantity,
                batch.current_style_count,
                batch.status.to_db_str(),
                batch.locked_at.map(fmt_ts),
                batch.batch_id,
                batch.revision,
            ],
        )?;

        if rows_affected == 0 {
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM batches WHERE batch_id = ?1",
                    params![batch.batch_id],
                    |row| row.get(0),
                )
                .optional()?;

            return match actual {
                Some(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "Batch".to_string(),
                    id: batch.batch_id.clone(),
                    expected: batch.revision,
                    actual,
                }),
                None => Err(RepositoryError::not_found("Batch", &batch.batch_id)),
            };
        }

        Ok(batch.revision + 1)
    }

    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in(&conn, batch_id)
    }

    pub fn find_by_id_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Option<Batch>> {
        let sql = format!("{} WHERE batch_id = ?1", SELECT_COLUMNS);
        let batch = conn
            .query_row(&sql, params![batch_id], Self::map_row)
            .optional()?;
        Ok(batch)
    }

    pub fn get_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Batch> {
        Self::find_by_id_in(conn, batch_id)?.ok_or_else(|| RepositoryError::not_found("Batch", batch_id))
    }

    /// 某品类下的开放批次 (按创建时间先后)
    pub fn find_open_by_category(&self, product_category: &str) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        Self::find_open_by_category_in(&conn, product_category)
    }

    pub fn find_open_by_category_in(
        conn: &Connection,
        product_category: &str,
    ) -> RepositoryResult<Vec<Batch>> {
        let sql = format!(
            "{} WHERE product_category = ?1 AND status = 'open' ORDER BY created_at, batch_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![product_category], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    /// 窗口已关闭但仍开放的批次
    pub fn find_expired_open(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE status = 'open' AND window_closes_at <= ?1 ORDER BY window_closes_at",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![fmt_ts(now)], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(batches)
    }

    // ==========================================
    // 批次成员
    // ==========================================

    pub fn insert_member_in(conn: &Connection, member: &BatchMember) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO batch_members (
                batch_id, order_id, style_key, quantity, joined_at, locked_unit_price
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                member.batch_id,
                member.order_id,
                member.style_key,
                member.quantity,
                fmt_ts(member.joined_at),
                member.locked_unit_price.map(|p| p.to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn find_members(&self, batch_id: &str) -> RepositoryResult<Vec<BatchMember>> {
        let conn = self.get_conn()?;
        Self::find_members_in(&conn, batch_id)
    }

    pub fn find_members_in(conn: &Connection, batch_id: &str) -> RepositoryResult<Vec<BatchMember>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT batch_id, order_id, style_key, quantity, joined_at, locked_unit_price
            FROM batch_members
            WHERE batch_id = ?1
            ORDER BY joined_at, order_id
            "#,
        )?;
        let members = stmt
            .query_map(params![batch_id], |row| {
                Ok(BatchMember {
                    batch_id: row.get(0)?,
                    order_id: row.get(1)?,
                    style_key: row.get(2)?,
                    quantity: row.get(3)?,
                    joined_at: parse_ts(4, &row.get::<_, String>(4)?)?,
                    locked_unit_price: parse_opt_decimal(5, row.get(5)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    /// 订单所在的批次 (一张订单至多加入一个批次)
    pub fn batch_id_for_order_in(conn: &Connection, order_id: &str) -> RepositoryResult<Option<String>> {
        let found: Option<String> = conn
            .query_row(
                "SELECT batch_id FROM batch_members WHERE order_id = ?1 LIMIT 1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found)
    }

    /// 款式是否已在批次中
    pub fn has_style_in(conn: &Connection, batch_id: &str, style_key: &str) -> RepositoryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM batch_members WHERE batch_id = ?1 AND style_key = ?2 LIMIT 1",
                params![batch_id, style_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// 冻结成员单价 (批次锁定时)
    pub fn set_member_price_in(
        conn: &Connection,
        batch_id: &str,
        order_id: &str,
        unit_price: Decimal,
    ) -> RepositoryResult<()> {
        conn.execute(
            "UPDATE batch_members SET locked_unit_price = ?1 WHERE batch_id = ?2 AND order_id = ?3",
            params![unit_price.to_string(), batch_id, order_id],
        )?;
        Ok(())
    }

    fn map_row(row: &Row) -> rusqlite::Result<Batch> {
        Ok(Batch {
            batch_id: row.get(0)?,
            product_category: row.get(1)?,
            target_quantity: row.get(2)?,
            current_quantity: row.get(3)?,
            max_styles: row.get(4)?,
            current_style_count: row.get(5)?,
            base_price: parse_decimal(6, &row.get::<_, String>(6)?)?,
            window_closes_at: parse_ts(7, &row.get::<_, String>(7)?)?,
            status: parse_column(8, &row.get::<_, String>(8)?, BatchStatus::from_db_str)?,
            locked_at: parse_opt_ts(9, row.get(9)?)?,
            created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
            revision: row.get(11)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::Order;
    use crate::repository::OrderRepository;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn batch(id: &str, created_offset_min: i64) -> Batch {
        let created = t0() + Duration::minutes(created_offset_min);
        Batch {
            batch_id: id.to_string(),
            product_category: "knit_tops".to_string(),
            target_quantity: 500,
            current_quantity: 0,
            max_styles: 5,
            current_style_count: 0,
            base_price: Decimal::new(800, 2),
            window_closes_at: created + Duration::days(7),
            status: BatchStatus::Open,
            locked_at: None,
            created_at: created,
            revision: 0,
        }
    }

    fn order(conn: &Connection, id: &str) {
        OrderRepository::insert_in(
            conn,
            &Order::new(
                id.to_string(),
                "B1".to_string(),
                "t-shirt".to_string(),
                100,
                NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            ),
        )
        .unwrap();
    }

    fn member(batch_id: &str, order_id: &str, style: &str) -> BatchMember {
        BatchMember {
            batch_id: batch_id.to_string(),
            order_id: order_id.to_string(),
            style_key: style.to_string(),
            quantity: 100,
            joined_at: t0(),
            locked_unit_price: None,
        }
    }

    #[test]
    fn test_open_batches_ordered_by_creation() {
        let shared = crate::db::open_in_memory_shared().unwrap();
        let conn = shared.lock().unwrap();
        BatchRepository::insert_in(&conn, &batch("late", 30)).unwrap();
        BatchRepository::insert_in(&conn, &batch("early", 0)).unwrap();
        let mut locked = batch("locked", -10);
        locked.status = BatchStatus::Locked;
        BatchRepository::insert_in(&conn, &locked).unwrap();

        let open = BatchRepository::find_open_by_category_in(&conn, "knit_tops").unwrap();
        let ids: Vec<_> = open.iter().map(|b| b.batch_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert!(BatchRepository::find_open_by_category_in(&conn, "bottoms").unwrap().is_empty());
    }

    #[test]
    fn test_stale_revision_is_rejected() {
        let shared = crate::db::open_in_memory_shared().unwrap();
        let conn = shared.lock().unwrap();
        BatchRepository::insert_in(&conn, &batch("B1", 0)).unwrap();

        let mut first = BatchRepository::get_in(&conn, "B1").unwrap();
        let stale = first.clone();
        first.current_quantity = 120;
        assert_eq!(BatchRepository::update_in(&conn, &first).unwrap(), 1);

        let err = BatchRepository::update_in(&conn, &stale).unwrap_err();
        assert!(matches!(err, RepositoryError::OptimisticLockFailure { expected: 0, actual: 1, .. }));
    }

    #[test]
    fn test_members_styles_and_frozen_price() {
        let shared = crate::db::open_in_memory_shared().unwrap();
        let conn = shared.lock().unwrap();
        BatchRepository::insert_in(&conn, &batch("B1", 0)).unwrap();
        order(&conn, "O1");
        order(&conn, "O2");

        BatchRepository::insert_member_in(&conn, &member("B1", "O1", "crew-black")).unwrap();
        BatchRepository::insert_member_in(&conn, &member("B1", "O2", "crew-white")).unwrap();

        assert!(BatchRepository::has_style_in(&conn, "B1", "crew-black").unwrap());
        assert!(!BatchRepository::has_style_in(&conn, "B1", "v-neck").unwrap());
        assert_eq!(
            BatchRepository::batch_id_for_order_in(&conn, "O2").unwrap().as_deref(),
            Some("B1")
        );
        assert!(BatchRepository::batch_id_for_order_in(&conn, "O3").unwrap().is_none());

        BatchRepository::set_member_price_in(&conn, "B1", "O1", Decimal::new(1012, 2)).unwrap();
        let members = BatchRepository::find_members_in(&conn, "B1").unwrap();
        assert_eq!(members.len(), 2);
        let o1 = members.iter().find(|m| m.order_id == "O1").unwrap();
        assert_eq!(o1.locked_unit_price, Some(Decimal::new(1012, 2)));
    }

    #[test]
    fn test_find_expired_open() {
        let shared = crate::db::open_in_memory_shared().unwrap();
        {
            let conn = shared.lock().unwrap();
            BatchRepository::insert_in(&conn, &batch("B1", 0)).unwrap();
        }
        let repo = BatchRepository::new(shared);
        assert!(repo.find_expired_open(t0() + Duration::days(6)).unwrap().is_empty());
        assert_eq!(repo.find_expired_open(t0() + Duration::days(7)).unwrap().len(), 1);
    }
}

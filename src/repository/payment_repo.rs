// ==========================================
// 制造撮合平台 - 履约核心 - 发票与付款事件仓储
// ==========================================
// 红线: payment_events 以 (payment_ref, outcome) 去重
// ==========================================

use crate::domain::payment::{Invoice, PaymentEvent};
use crate::domain::types::{PaymentOutcome, PaymentType};
use crate::repository::error::{fmt_ts, parse_column, parse_ts, RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct PaymentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PaymentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_invoice(&self, invoice: &Invoice) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO invoices (payment_ref, order_id, payment_type, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                invoice.payment_ref,
                invoice.order_id,
                invoice.payment_type.to_db_str(),
                fmt_ts(invoice.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_invoice_in(conn: &Connection, payment_ref: &str) -> RepositoryResult<Option<Invoice>> {
        let invoice = conn
            .query_row(
                r#"
                SELECT payment_ref, order_id, payment_type, created_at
                FROM invoices WHERE payment_ref = ?1
                "#,
                params![payment_ref],
                |row| {
                    Ok(Invoice {
                        payment_ref: row.get(0)?,
                        order_id: row.get(1)?,
                        payment_type: parse_column(
                            2,
                            &row.get::<_, String>(2)?,
                            PaymentType::from_db_str,
                        )?,
                        created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(invoice)
    }

    pub fn find_invoice(&self, payment_ref: &str) -> RepositoryResult<Option<Invoice>> {
        let conn = self.get_conn()?;
        Self::find_invoice_in(&conn, payment_ref)
    }

    /// 记录付款事件
    ///
    /// # 返回
    /// - Ok(true): 首次记录
    /// - Ok(false): 重复投递 (已存在, 未写入)
    pub fn insert_event_in(conn: &Connection, event: &PaymentEvent) -> RepositoryResult<bool> {
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO payment_events (payment_ref, outcome, received_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![
                event.payment_ref,
                event.outcome.to_db_str(),
                fmt_ts(event.received_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn count_events(&self, payment_ref: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM payment_events WHERE payment_ref = ?1",
            params![payment_ref],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 某付款引用是否已有成功事件
    pub fn has_outcome_in(
        conn: &Connection,
        payment_ref: &str,
        outcome: PaymentOutcome,
    ) -> RepositoryResult<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM payment_events WHERE payment_ref = ?1 AND outcome = ?2",
                params![payment_ref, outcome.to_db_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

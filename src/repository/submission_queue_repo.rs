// ==========================================
// 制造撮合平台 - 履约核心 - 离线提交队列仓储
// ==========================================
// 职责: 持久化待重放的提交 (状态/重试次数/下次尝试时间)
// 状态: pending → done | dead
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::repository::error::{fmt_ts, parse_column, parse_ts, RepositoryError, RepositoryResult};

/// 队列项状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Done,
    Dead,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Done => "done",
            QueueItemStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueItemStatus::Pending),
            "done" => Some(QueueItemStatus::Done),
            "dead" => Some(QueueItemStatus::Dead),
            _ => None,
        }
    }
}

/// 一条待提交记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionQueueItem {
    pub item_id: String,
    /// 提交类型 (如 "stage_update"), 由处理函数分派
    pub kind: String,
    pub payload: JsonValue,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionQueueItem {
    pub fn new(kind: impl Into<String>, payload: JsonValue, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            item_id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            max_retries,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT item_id, kind, payload_json, status, retry_count, max_retries,
           next_attempt_at, last_error, created_at, updated_at
    FROM submission_queue
"#;

pub struct SubmissionQueueRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SubmissionQueueRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, item: &SubmissionQueueItem) -> RepositoryResult<()> {
        let payload = serde_json::to_string(&item.payload)
            .map_err(|e| RepositoryError::field("payload_json", e.to_string()))?;
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO submission_queue (
                item_id, kind, payload_json, status, retry_count, max_retries,
                next_attempt_at, last_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                item.item_id,
                item.kind,
                payload,
                item.status.as_str(),
                item.retry_count,
                item.max_retries,
                fmt_ts(item.next_attempt_at),
                item.last_error,
                fmt_ts(item.created_at),
                fmt_ts(item.updated_at),
            ],
        )?;
        Ok(())
    }

    /// 到期的 pending 项, 按下次尝试时间/创建时间排序
    pub fn list_due(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<SubmissionQueueItem>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE status = 'pending' AND next_attempt_at <= ?1 ORDER BY next_attempt_at ASC, created_at ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![fmt_ts(now)], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn find_by_id(&self, item_id: &str) -> RepositoryResult<SubmissionQueueItem> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE item_id = ?1", SELECT_COLUMNS);
        conn.query_row(&sql, params![item_id], Self::map_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    RepositoryError::not_found("SubmissionQueueItem", item_id)
                }
                other => other.into(),
            })
    }

    pub fn mark_done(&self, item_id: &str, now: DateTime<Utc>) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE submission_queue SET status = 'done', last_error = NULL, updated_at = ?1 WHERE item_id = ?2",
            params![fmt_ts(now), item_id],
        )?;
        Self::expect_row(rows, item_id)
    }

    /// 失败后重排: 记录错误并设置下次尝试时间
    pub fn reschedule(
        &self,
        item_id: &str,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE submission_queue
            SET retry_count = ?1, next_attempt_at = ?2, last_error = ?3, updated_at = ?4
            WHERE item_id = ?5 AND status = 'pending'
            "#,
            params![retry_count, fmt_ts(next_attempt_at), error, fmt_ts(now), item_id],
        )?;
        Self::expect_row(rows, item_id)
    }

    pub fn mark_dead(
        &self,
        item_id: &str,
        retry_count: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE submission_queue
            SET status = 'dead', retry_count = ?1, last_error = ?2, updated_at = ?3
            WHERE item_id = ?4
            "#,
            params![retry_count, error, fmt_ts(now), item_id],
        )?;
        Self::expect_row(rows, item_id)
    }

    pub fn count_by_status(&self, status: QueueItemStatus) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM submission_queue WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// 清空队列, 返回删除条数
    pub fn clear(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute("DELETE FROM submission_queue", [])?;
        Ok(rows)
    }

    fn expect_row(rows: usize, item_id: &str) -> RepositoryResult<()> {
        if rows == 0 {
            return Err(RepositoryError::not_found("SubmissionQueueItem", item_id));
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<SubmissionQueueItem> {
        let payload_raw: String = row.get(2)?;
        Ok(SubmissionQueueItem {
            item_id: row.get(0)?,
            kind: row.get(1)?,
            payload: parse_column(2, &payload_raw, |s| serde_json::from_str(s).ok())?,
            status: parse_column(3, &row.get::<_, String>(3)?, QueueItemStatus::parse)?,
            retry_count: row.get(4)?,
            max_retries: row.get(5)?,
            next_attempt_at: parse_ts(6, &row.get::<_, String>(6)?)?,
            last_error: row.get(7)?,
            created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
            updated_at: parse_ts(9, &row.get::<_, String>(9)?)?,
        })
    }
}

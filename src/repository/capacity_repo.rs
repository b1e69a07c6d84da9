// ==========================================
// 制造撮合平台 - 履约核心 - 产能台账仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: current_utilization 只能经由 commit_in / release_in 变更 (CAS)
// ==========================================

use crate::domain::capacity::{CapacityConstraint, CapacityRecord};
use crate::repository::error::{fmt_date, parse_date, RepositoryError, RepositoryResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// CapacityRepository - 产能台账仓储
// ==========================================

/// 产能台账仓储
/// 职责: 管理 capacity_records 表的读写与原子扣减/释放
pub struct CapacityRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT supplier_id, capacity_date, total_capacity, current_utilization,
           machines, workers, shifts, revision
    FROM capacity_records
"#;

impl CapacityRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按供应商和日期查询单条产能记录
    ///
    /// # 返回
    /// - Ok(Some(CapacityRecord)): 找到记录
    /// - Ok(None): 未找到
    pub fn find(
        &self,
        supplier_id: &str,
        capacity_date: NaiveDate,
    ) -> RepositoryResult<Option<CapacityRecord>> {
        let conn = self.get_conn()?;
        Self::find_in(&conn, supplier_id, capacity_date)
    }

    pub fn find_in(
        conn: &Connection,
        supplier_id: &str,
        capacity_date: NaiveDate,
    ) -> RepositoryResult<Option<CapacityRecord>> {
        let sql = format!("{} WHERE supplier_id = ?1 AND capacity_date = ?2", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, params![supplier_id, fmt_date(capacity_date)], Self::map_row)
            .optional()?;
        Ok(record)
    }

    /// 查询某日期所有供应商的产能记录 (匹配排名用, 不加锁)
    pub fn list_for_date(&self, capacity_date: NaiveDate) -> RepositoryResult<Vec<CapacityRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE capacity_date = ?1 ORDER BY supplier_id", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![fmt_date(capacity_date)], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// 设置总产能与资源元数据 (保留 current_utilization)
    ///
    /// # 错误
    /// - FieldValueError: 新总产能低于已承诺产能
    pub fn upsert_in(conn: &Connection, record: &CapacityRecord) -> RepositoryResult<CapacityRecord> {
        if let Some(existing) = Self::find_in(conn, &record.supplier_id, record.capacity_date)? {
            if record.total_capacity < existing.current_utilization {
                return Err(RepositoryError::field(
                    "total_capacity",
                    format!(
                        "总产能 {} 低于已承诺产能 {}",
                        record.total_capacity, existing.current_utilization
                    ),
                ));
            }
        }

        conn.execute(
            r#"
            INSERT INTO capacity_records (
                supplier_id, capacity_date, total_capacity, current_utilization,
                machines, workers, shifts, revision
            ) VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, 0)
            ON CONFLICT(supplier_id, capacity_date) DO UPDATE SET
                total_capacity = excluded.total_capacity,
                machines = excluded.machines,
                workers = excluded.workers,
                shifts = excluded.shifts,
                revision = capacity_records.revision + 1
            "#,
            params![
                record.supplier_id,
                fmt_date(record.capacity_date),
                record.total_capacity,
                record.machines,
                record.workers,
                record.shifts,
            ],
        )?;

        Self::find_in(conn, &record.supplier_id, record.capacity_date)?
            .ok_or_else(|| RepositoryError::not_found("CapacityRecord", &record.supplier_id))
    }

    pub fn upsert(&self, record: &CapacityRecord) -> RepositoryResult<CapacityRecord> {
        let conn = self.get_conn()?;
        Self::upsert_in(&conn, record)
    }

    /// 原子扣减产能 (CAS on revision + 剩余量守卫)
    ///
    /// # 错误
    /// - OptimisticLockFailure: revision 已变化 (可重试)
    /// - InsufficientCapacity: revision 未变但剩余不足
    /// - NotFound: 记录不存在
    pub fn commit_in(
        conn: &Connection,
        supplier_id: &str,
        capacity_date: NaiveDate,
        quantity: i64,
        expected_revision: i64,
    ) -> RepositoryResult<()> {
        let date_str = fmt_date(capacity_date);
        let rows_affected = conn.execute(
            r#"
            UPDATE capacity_records
               SET current_utilization = current_utilization + ?3,
                   revision = revision + 1
             WHERE supplier_id = ?1 AND capacity_date = ?2
               AND revision = ?4
               AND total_capacity - current_utilization >= ?3
            "#,
            params![supplier_id, date_str, quantity, expected_revision],
        )?;

        if rows_affected == 1 {
            return Ok(());
        }

        // 判断是记录不存在、revision 冲突还是余量不足
        match Self::find_in(conn, supplier_id, capacity_date)? {
            None => Err(RepositoryError::not_found(
                "CapacityRecord",
                format!("{}@{}", supplier_id, date_str),
            )),
            Some(actual) if actual.revision != expected_revision => {
                Err(RepositoryError::OptimisticLockFailure {
                    entity: "CapacityRecord".to_string(),
                    id: format!("{}@{}", supplier_id, date_str),
                    expected: expected_revision,
                    actual: actual.revision,
                })
            }
            Some(actual) => Err(RepositoryError::InsufficientCapacity {
                supplier_id: supplier_id.to_string(),
                date: date_str,
                requested: quantity,
                available: actual.available_capacity(),
            }),
        }
    }

    /// 释放产能 (供应商订单拒绝/取消)
    ///
    /// 与扣减在同一事务内调用, 释放量不得超过已承诺量
    pub fn release_in(
        conn: &Connection,
        supplier_id: &str,
        capacity_date: NaiveDate,
        quantity: i64,
    ) -> RepositoryResult<()> {
        let date_str = fmt_date(capacity_date);
        let rows_affected = conn.execute(
            r#"
            UPDATE capacity_records
               SET current_utilization = current_utilization - ?3,
                   revision = revision + 1
             WHERE supplier_id = ?1 AND capacity_date = ?2
               AND current_utilization >= ?3
            "#,
            params![supplier_id, date_str, quantity],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::field(
                "current_utilization",
                format!(
                    "释放量 {} 超过 {}@{} 的已承诺产能或记录不存在",
                    quantity, supplier_id, date_str
                ),
            ));
        }
        Ok(())
    }

    fn map_row(row: &Row) -> rusqlite::Result<CapacityRecord> {
        Ok(CapacityRecord {
            supplier_id: row.get(0)?,
            capacity_date: parse_date(1, &row.get::<_, String>(1)?)?,
            total_capacity: row.get(2)?,
            current_utilization: row.get(3)?,
            machines: row.get(4)?,
            workers: row.get(5)?,
            shifts: row.get(6)?,
            revision: row.get(7)?,
        })
    }
}

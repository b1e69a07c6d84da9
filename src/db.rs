// ==========================================
// 制造撮合平台 - 履约核心 - SQLite 连接与建库
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout, 减少并发写入时的偶发 busy 错误
// - 幂等建表, 所有可变行带 revision (乐观锁)
// - 事务助手: 多个仓储在同一事务内写入, 全有或全无
// ==========================================

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::repository::error::RepositoryError;

/// 共享连接 (与仓储层一致)
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 默认 busy_timeout (毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明:
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared(db_path: &str) -> Result<SharedConnection, RepositoryError> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 内存库 (测试/演示)
pub fn open_in_memory_shared() -> Result<SharedConnection, RepositoryError> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 读取 schema_version (若表不存在则返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 建库
// ==========================================

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS suppliers (
    supplier_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1,
    performance_score REAL NOT NULL DEFAULT 0
        CHECK (performance_score >= 0 AND performance_score <= 100),
    specializations_json TEXT NOT NULL DEFAULT '[]',
    lead_time_days INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS capacity_records (
    supplier_id TEXT NOT NULL REFERENCES suppliers(supplier_id),
    capacity_date TEXT NOT NULL,
    total_capacity INTEGER NOT NULL CHECK (total_capacity >= 0),
    current_utilization INTEGER NOT NULL DEFAULT 0
        CHECK (current_utilization >= 0 AND current_utilization <= total_capacity),
    machines INTEGER,
    workers INTEGER,
    shifts INTEGER,
    revision INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (supplier_id, capacity_date)
);

CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    buyer_id TEXT NOT NULL,
    product_type TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    target_date TEXT NOT NULL,
    workflow_status TEXT NOT NULL,
    hold_from_status TEXT,
    buyer_price TEXT,
    payment_status TEXT NOT NULL DEFAULT 'unpaid',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS batches (
    batch_id TEXT PRIMARY KEY,
    product_category TEXT NOT NULL,
    target_quantity INTEGER NOT NULL CHECK (target_quantity > 0),
    current_quantity INTEGER NOT NULL DEFAULT 0 CHECK (current_quantity >= 0),
    max_styles INTEGER NOT NULL CHECK (max_styles > 0),
    current_style_count INTEGER NOT NULL DEFAULT 0
        CHECK (current_style_count <= max_styles),
    base_price TEXT NOT NULL,
    window_closes_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    locked_at TEXT,
    created_at TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_batches_category_status
    ON batches (product_category, status);

CREATE TABLE IF NOT EXISTS batch_members (
    batch_id TEXT NOT NULL REFERENCES batches(batch_id),
    order_id TEXT NOT NULL REFERENCES orders(order_id),
    style_key TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    joined_at TEXT NOT NULL,
    locked_unit_price TEXT,
    PRIMARY KEY (batch_id, order_id)
);

CREATE TABLE IF NOT EXISTS supplier_orders (
    supplier_order_id TEXT PRIMARY KEY,
    owner_kind TEXT NOT NULL CHECK (owner_kind IN ('order', 'batch')),
    owner_id TEXT NOT NULL,
    supplier_id TEXT NOT NULL REFERENCES suppliers(supplier_id),
    product_type TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    target_date TEXT NOT NULL,
    acceptance_status TEXT NOT NULL DEFAULT 'pending',
    status TEXT NOT NULL DEFAULT 'pending',
    supplier_price TEXT,
    counter_offer_price TEXT,
    counter_offer_note TEXT,
    rejection_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_supplier_orders_owner
    ON supplier_orders (owner_kind, owner_id);

CREATE TABLE IF NOT EXISTS production_stages (
    supplier_order_id TEXT NOT NULL REFERENCES supplier_orders(supplier_order_id),
    stage_number INTEGER NOT NULL CHECK (stage_number >= 1),
    stage_name TEXT NOT NULL,
    completion_percentage INTEGER NOT NULL DEFAULT 0
        CHECK (completion_percentage >= 0 AND completion_percentage <= 100),
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status <> 'completed' OR completion_percentage = 100),
    started_at TEXT,
    completed_at TEXT,
    target_date TEXT NOT NULL,
    notes TEXT,
    photos_json TEXT NOT NULL DEFAULT '[]',
    revision INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (supplier_order_id, stage_number)
);

CREATE TABLE IF NOT EXISTS stage_templates (
    product_category TEXT NOT NULL,
    step_order INTEGER NOT NULL,
    stage_name TEXT NOT NULL,
    estimated_days INTEGER NOT NULL CHECK (estimated_days >= 0),
    PRIMARY KEY (product_category, step_order)
);

CREATE TABLE IF NOT EXISTS audit_log (
    audit_id TEXT PRIMARY KEY,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    previous_state TEXT,
    new_state TEXT NOT NULL,
    actor TEXT NOT NULL,
    event_id TEXT,
    recorded_at TEXT NOT NULL,
    payload_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_log_entity
    ON audit_log (entity_type, entity_id);

CREATE UNIQUE INDEX IF NOT EXISTS uq_audit_log_event
    ON audit_log (entity_type, entity_id, event_id)
    WHERE event_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS invoices (
    payment_ref TEXT PRIMARY KEY,
    order_id TEXT NOT NULL REFERENCES orders(order_id),
    payment_type TEXT NOT NULL CHECK (payment_type IN ('deposit', 'balance', 'full')),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payment_events (
    payment_ref TEXT NOT NULL REFERENCES invoices(payment_ref),
    outcome TEXT NOT NULL CHECK (outcome IN ('succeeded', 'failed')),
    received_at TEXT NOT NULL,
    PRIMARY KEY (payment_ref, outcome)
);

CREATE TABLE IF NOT EXISTS submission_queue (
    item_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    next_attempt_at TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_submission_queue_due
    ON submission_queue (status, next_attempt_at);
"#;

/// 幂等建表并登记 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

// ==========================================
// 事务助手
// ==========================================

/// 在 IMMEDIATE 事务内执行闭包, 成功提交, 失败回滚
///
/// 红线: 闭包内只能调用仓储的 `*_in(&Connection, ..)` 函数,
/// 不能再走仓储实例方法 (Mutex 不可重入, 会死锁)
pub fn run_in_transaction<T, E, F>(conn: &SharedConnection, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    E: From<RepositoryError>,
{
    let mut guard = conn
        .lock()
        .map_err(|e| RepositoryError::LockError(e.to_string()))?;
    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

    // 闭包失败时 tx 被 drop, 自动回滚
    let value = f(&tx)?;

    tx.commit()
        .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let shared = open_in_memory_shared().unwrap();

        let result: Result<(), RepositoryError> = run_in_transaction(&shared, |tx| {
            tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', 'k', 'v')",
                [],
            )?;
            Err(RepositoryError::ValidationError("abort".to_string()))
        });
        assert!(result.is_err());

        let conn = shared.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM config_kv", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_stage_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        init_schema(&conn).unwrap();

        let err = conn.execute(
            "INSERT INTO production_stages
                (supplier_order_id, stage_number, stage_name, completion_percentage, status, target_date)
             VALUES ('so1', 1, 'cutting', 50, 'completed', '2026-01-01')",
            [],
        );
        assert!(err.is_err());
    }
}

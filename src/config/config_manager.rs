// ==========================================
// 制造撮合平台 - 履约核心 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope), 当前只使用 global
// 约定: 缺失键取默认值; 非法值记 warn 后取默认值
// ==========================================

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::open_shared;
use crate::engine::batch_aggregator::BatchPolicy;
use crate::engine::capacity_matcher::MatchWeights;
use crate::engine::pricing::PricingRules;
use crate::engine::retry::RetryPolicy;

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 打开数据库文件并确保表结构
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = open_shared(db_path).with_context(|| format!("打开配置库失败: {}", db_path))?;
        Ok(Self { conn })
    }

    /// 从已有连接创建
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("锁获取失败: {}", e))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("读取配置失败: {}", key))?;
        Ok(value)
    }

    /// 写入 (覆盖) global scope 的配置值
    pub fn set_value(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            params![GLOBAL_SCOPE, key, value],
        )
        .with_context(|| format!("写入配置失败: {}", key))?;
        tracing::info!(config_key = key, value, "配置已更新");
        Ok(())
    }

    /// 解析配置值; 缺失或非法时返回默认值
    fn get_parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr + std::fmt::Display,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, default = %default, "配置格式错误, 使用默认值");
                Ok(default)
            }
        }
    }

    /// 所有 global 配置的 JSON 快照 (键有序)
    pub fn get_config_snapshot(&self) -> Result<String> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 从快照恢复配置, 返回写入条数
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> Result<usize> {
        let config_map: BTreeMap<String, String> =
            serde_json::from_str(snapshot_json).context("配置快照不是合法的 JSON 对象")?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for (key, value) in config_map.iter() {
            count += tx.execute(
                r#"
                INSERT INTO config_kv (scope_id, key, value, updated_at)
                VALUES (?1, ?2, ?3, datetime('now'))
                ON CONFLICT(scope_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
                params![GLOBAL_SCOPE, key, value],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }

    // ===== 类型化加载 =====

    pub fn pricing_rules(&self) -> Result<PricingRules> {
        let d = PricingRules::default();
        Ok(PricingRules {
            complexity_step: self.get_parsed::<Decimal>(config_keys::COMPLEXITY_STEP, d.complexity_step)?,
            low_fill_threshold: self.get_parsed::<Decimal>(config_keys::LOW_FILL_THRESHOLD, d.low_fill_threshold)?,
            high_fill_threshold: self.get_parsed::<Decimal>(config_keys::HIGH_FILL_THRESHOLD, d.high_fill_threshold)?,
            markup_low_fill: self.get_parsed::<Decimal>(config_keys::MARKUP_LOW_FILL, d.markup_low_fill)?,
            markup_mid_fill: self.get_parsed::<Decimal>(config_keys::MARKUP_MID_FILL, d.markup_mid_fill)?,
            markup_high_fill: self.get_parsed::<Decimal>(config_keys::MARKUP_HIGH_FILL, d.markup_high_fill)?,
            solo_multiplier: self.get_parsed::<Decimal>(config_keys::SOLO_MULTIPLIER, d.solo_multiplier)?,
        })
    }

    pub fn match_weights(&self) -> Result<MatchWeights> {
        let d = MatchWeights::default();
        Ok(MatchWeights {
            performance: self.get_parsed(config_keys::WEIGHT_PERFORMANCE, d.performance)?,
            specialization: self.get_parsed(config_keys::WEIGHT_SPECIALIZATION, d.specialization)?,
            leadtime: self.get_parsed(config_keys::WEIGHT_LEADTIME, d.leadtime)?,
            headroom: self.get_parsed(config_keys::WEIGHT_HEADROOM, d.headroom)?,
        })
    }

    pub fn batch_policy(&self) -> Result<BatchPolicy> {
        let d = BatchPolicy::default();
        Ok(BatchPolicy {
            default_target_quantity: self.get_parsed(config_keys::BATCH_TARGET_QUANTITY, d.default_target_quantity)?,
            default_max_styles: self.get_parsed(config_keys::BATCH_MAX_STYLES, d.default_max_styles)?,
            window_days: self.get_parsed(config_keys::BATCH_WINDOW_DAYS, d.window_days)?,
            overflow_tolerance_pct: self.get_parsed(config_keys::BATCH_OVERFLOW_TOLERANCE_PCT, d.overflow_tolerance_pct)?,
        })
    }

    pub fn commit_retry_policy(&self) -> Result<RetryPolicy> {
        let d = RetryPolicy::for_commit();
        let attempts = self.get_parsed(config_keys::MAX_COMMIT_ATTEMPTS, d.max_attempts)?;
        let min_ms = self.get_parsed(config_keys::RETRY_MIN_DELAY_MS, d.min_delay.as_millis() as u64)?;
        let max_ms = self.get_parsed(config_keys::RETRY_MAX_DELAY_MS, d.max_delay.as_millis() as u64)?;
        Ok(RetryPolicy {
            max_attempts: attempts.max(1),
            min_delay: Duration::from_millis(min_ms),
            max_delay: Duration::from_millis(max_ms.max(min_ms)),
            jitter: d.jitter,
        })
    }

    pub fn queue_retry_policy(&self) -> Result<RetryPolicy> {
        let max_retries: u32 = self.get_parsed(config_keys::QUEUE_MAX_RETRIES, 5)?;
        let d = RetryPolicy::for_queue(max_retries);
        let min_ms = self.get_parsed(config_keys::QUEUE_BACKOFF_MIN_MS, d.min_delay.as_millis() as u64)?;
        let max_ms = self.get_parsed(config_keys::QUEUE_BACKOFF_MAX_MS, d.max_delay.as_millis() as u64)?;
        Ok(RetryPolicy {
            min_delay: Duration::from_millis(min_ms),
            max_delay: Duration::from_millis(max_ms.max(min_ms)),
            ..d
        })
    }
}

// ==========================================
// FulfillmentConfig - 一次性加载的业务常量
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentConfig {
    pub pricing: PricingRules,
    pub match_weights: MatchWeights,
    pub batch: BatchPolicy,
    #[serde(skip)]
    pub commit_retry: RetryPolicy,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            pricing: PricingRules::default(),
            match_weights: MatchWeights::default(),
            batch: BatchPolicy::default(),
            commit_retry: RetryPolicy::for_commit(),
        }
    }
}

impl FulfillmentConfig {
    pub fn load(config: &ConfigManager) -> Result<Self> {
        Ok(Self {
            pricing: config.pricing_rules()?,
            match_weights: config.match_weights()?,
            batch: config.batch_policy()?,
            commit_retry: config.commit_retry_policy()?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 定价
    pub const COMPLEXITY_STEP: &str = "pricing/complexity_step";
    pub const LOW_FILL_THRESHOLD: &str = "pricing/low_fill_threshold";
    pub const HIGH_FILL_THRESHOLD: &str = "pricing/high_fill_threshold";
    pub const MARKUP_LOW_FILL: &str = "pricing/markup_low_fill";
    pub const MARKUP_MID_FILL: &str = "pricing/markup_mid_fill";
    pub const MARKUP_HIGH_FILL: &str = "pricing/markup_high_fill";
    pub const SOLO_MULTIPLIER: &str = "pricing/solo_multiplier";

    // 匹配权重
    pub const WEIGHT_PERFORMANCE: &str = "matching/weight_performance";
    pub const WEIGHT_SPECIALIZATION: &str = "matching/weight_specialization";
    pub const WEIGHT_LEADTIME: &str = "matching/weight_leadtime";
    pub const WEIGHT_HEADROOM: &str = "matching/weight_headroom";

    // 批次
    pub const BATCH_TARGET_QUANTITY: &str = "batch/default_target_quantity";
    pub const BATCH_MAX_STYLES: &str = "batch/default_max_styles";
    pub const BATCH_WINDOW_DAYS: &str = "batch/window_days";
    pub const BATCH_OVERFLOW_TOLERANCE_PCT: &str = "batch/overflow_tolerance_pct";

    // 并发
    pub const MAX_COMMIT_ATTEMPTS: &str = "concurrency/max_commit_attempts";
    pub const RETRY_MIN_DELAY_MS: &str = "concurrency/retry_min_delay_ms";
    pub const RETRY_MAX_DELAY_MS: &str = "concurrency/retry_max_delay_ms";

    // 离线队列
    pub const QUEUE_MAX_RETRIES: &str = "queue/max_retries";
    pub const QUEUE_BACKOFF_MIN_MS: &str = "queue/backoff_min_ms";
    pub const QUEUE_BACKOFF_MAX_MS: &str = "queue/backoff_max_ms";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        ConfigManager::from_connection(crate::db::open_in_memory_shared().unwrap())
    }

    #[test]
    fn test_defaults_when_table_empty() {
        let cfg = FulfillmentConfig::load(&manager()).unwrap();
        assert_eq!(cfg, FulfillmentConfig::default());
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let m = manager();
        m.set_value(config_keys::MARKUP_MID_FILL, "0.22").unwrap();
        m.set_value(config_keys::WEIGHT_HEADROOM, "not-a-number").unwrap();
        m.set_value(config_keys::BATCH_TARGET_QUANTITY, "800").unwrap();

        assert_eq!(m.pricing_rules().unwrap().markup_mid_fill, Decimal::new(22, 2));
        assert_eq!(m.match_weights().unwrap().headroom, 0.1);
        assert_eq!(m.batch_policy().unwrap().default_target_quantity, 800);
    }

    #[test]
    fn test_queue_policy_from_config() {
        let m = manager();
        m.set_value(config_keys::QUEUE_MAX_RETRIES, "2").unwrap();
        m.set_value(config_keys::QUEUE_BACKOFF_MIN_MS, "10").unwrap();
        let p = m.queue_retry_policy().unwrap();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.min_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_snapshot_and_restore() {
        let m = manager();
        m.set_value("b", "2").unwrap();
        m.set_value("a", "1").unwrap();
        let snapshot = m.get_config_snapshot().unwrap();
        assert_eq!(snapshot, r#"{"a":"1","b":"2"}"#);

        m.set_value("a", "9").unwrap();
        assert_eq!(m.restore_config_from_snapshot(&snapshot).unwrap(), 2);
        assert_eq!(m.get_global_config_value("a").unwrap().as_deref(), Some("1"));
    }
}

// ==========================================
// 制造撮合平台 - 履约核心 - 应用状态
// ==========================================
// 职责: 打开数据库, 加载配置, 创建共享的事件总线与各 API 实例
// ==========================================

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::api::{AssignmentApi, BatchApi, OrderApi, ProductionApi, SupplierOrderApi};
use crate::config::{ConfigManager, FulfillmentConfig};
use crate::db::{open_shared, SharedConnection};
use crate::engine::events::{DomainEventPublisher, EventBus};
use crate::services::advisory::AdvisoryService;
use crate::services::submission_queue::SubmissionQueue;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "MFG_FULFILLMENT_DB_PATH";

/// 应用状态
///
/// 所有 API 共享同一个连接和同一个事件总线
pub struct AppState {
    pub db_path: String,
    pub config: FulfillmentConfig,
    pub events: Arc<EventBus>,

    pub order_api: Arc<OrderApi>,
    pub assignment_api: Arc<AssignmentApi>,
    pub supplier_order_api: Arc<SupplierOrderApi>,
    pub production_api: Arc<ProductionApi>,
    pub batch_api: Arc<BatchApi>,

    /// 外部提交重试队列
    pub submission_queue: Arc<SubmissionQueue>,
    pub config_manager: Arc<ConfigManager>,
}

impl AppState {
    /// 打开 (必要时创建) 数据库并装配全部 API
    pub fn new(db_path: String) -> Result<Self> {
        tracing::info!(db_path = %db_path, "初始化 AppState");
        let conn = open_shared(&db_path).with_context(|| format!("无法打开数据库: {}", db_path))?;
        Self::from_connection(db_path, conn)
    }

    pub fn from_connection(db_path: String, conn: SharedConnection) -> Result<Self> {
        Self::with_advisory(db_path, conn, Arc::new(AdvisoryService::none()))
    }

    /// 同 from_connection, 并注入外部供应商建议服务 (只影响 rank_with_advice)
    pub fn with_advisory(db_path: String, conn: SharedConnection, advisory: Arc<AdvisoryService>) -> Result<Self> {
        let config_manager = Arc::new(ConfigManager::from_connection(conn.clone()));
        let config = FulfillmentConfig::load(&config_manager).context("加载履约配置失败")?;
        let queue_policy = config_manager.queue_retry_policy()?;
        let events = Arc::new(EventBus::new());

        let assignment_api = AssignmentApi::from_config(conn.clone(), &config, events.clone())?.with_advisory(advisory);
        let batch_api = BatchApi::from_config(conn.clone(), &config, events.clone())?;

        tracing::info!(
            weights = ?config.match_weights,
            batch = ?config.batch,
            "AppState 初始化完成"
        );

        Ok(Self {
            db_path,
            order_api: Arc::new(OrderApi::new(conn.clone(), events.clone())),
            assignment_api: Arc::new(assignment_api),
            supplier_order_api: Arc::new(SupplierOrderApi::new(conn.clone(), events.clone())),
            production_api: Arc::new(ProductionApi::new(conn.clone(), events.clone())),
            batch_api: Arc::new(batch_api),
            submission_queue: Arc::new(SubmissionQueue::new(conn, queue_policy)),
            config_manager,
            config,
            events,
        })
    }

    pub fn subscribe(&self, subscriber: Arc<dyn DomainEventPublisher>) {
        self.events.subscribe(subscriber);
    }
}

/// 默认数据库路径: 环境变量优先, 否则当前目录下的 mfg_fulfillment.db
pub fn get_default_db_path() -> String {
    match std::env::var(DB_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => path.trim().to_string(),
        _ => "./mfg_fulfillment.db".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_shared;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db") || std::env::var(DB_PATH_ENV).is_ok());
    }

    #[test]
    fn test_app_state_wires_shared_event_bus() {
        let conn = open_in_memory_shared().unwrap();
        let state = AppState::from_connection(":memory:".to_string(), conn).unwrap();
        assert_eq!(state.events.subscriber_count(), 0);
        assert_eq!(state.config.batch.default_target_quantity, 500);
    }
}

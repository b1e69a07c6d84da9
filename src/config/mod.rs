// ==========================================
// 制造撮合平台 - 履约核心 - 配置层
// ==========================================
// 职责: 业务常量 (定价/权重/批次/重试) 的持久化与类型化加载
// 存储: config_kv 表
// ==========================================

pub mod config_manager;

pub use config_manager::{config_keys, ConfigManager, FulfillmentConfig};

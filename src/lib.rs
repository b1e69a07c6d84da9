// ==========================================
// 制造撮合平台 - 订单履约与产能匹配核心库
// ==========================================
// 范围: 产能账本、供应商匹配、批次聚合、定价、订单/供应商订单状态机、生产进度
// 技术栈: Rust + SQLite (rusqlite)
// 存储: 单库, 所有写操作走 IMMEDIATE 事务 + revision 乐观锁
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则 (纯计算, 不触库)
pub mod engine;

// 配置层 - 业务常量
pub mod config;

// 数据库基础设施 (连接初始化/PRAGMA/建表/事务)
pub mod db;

// 日志系统
pub mod logging;

// 服务层 - 外部建议与提交重试队列
pub mod services;

// API 层 - 业务接口
pub mod api;

// 应用层 - 装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    AcceptanceStatus, Actor, ActorRole, BatchStatus, PaymentOutcome, PaymentStatus, PaymentType,
    StageStatus, SupplierOrderStatus, WorkflowStatus,
};

// 领域实体
pub use domain::{
    AuditRecord, Batch, BatchMember, CapacityRecord, Order, ProductionStage, Supplier,
    SupplierOrder, SupplierOrderOwner,
};

// 引擎
pub use engine::{
    BatchAggregator, CapacityMatcher, EventBus, OrderStateMachine, PricingEngine,
    ProductionStageTracker, SupplierOrderStateMachine,
};

// API
pub use api::{
    ApiError, ApiResult, AssignmentApi, BatchApi, OrderApi, ProductionApi, SupplierOrderApi,
};

pub use app::AppState;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "制造撮合平台履约核心";

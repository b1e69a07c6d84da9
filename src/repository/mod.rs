// ==========================================
// 制造撮合平台 - 履约核心 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口, 屏蔽数据库细节
// 约束: 所有查询使用参数化; 事务内只调用 `*_in(&Connection, ..)`
// ==========================================

pub mod audit_log_repo;
pub mod batch_repo;
pub mod capacity_repo;
pub mod error;
pub mod order_repo;
pub mod payment_repo;
pub mod production_stage_repo;
pub mod stage_template_repo;
pub mod submission_queue_repo;
pub mod supplier_order_repo;
pub mod supplier_repo;

// 重导出核心仓储
pub use audit_log_repo::AuditLogRepository;
pub use batch_repo::BatchRepository;
pub use capacity_repo::CapacityRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use order_repo::OrderRepository;
pub use payment_repo::PaymentRepository;
pub use production_stage_repo::ProductionStageRepository;
pub use stage_template_repo::StageTemplateRepository;
pub use submission_queue_repo::{QueueItemStatus, SubmissionQueueItem, SubmissionQueueRepository};
pub use supplier_order_repo::SupplierOrderRepository;
pub use supplier_repo::SupplierRepository;

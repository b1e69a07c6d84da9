// ==========================================
// 制造撮合平台 - 履约核心 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、产能约束接口
// 红线: 不含数据访问逻辑, 不含引擎逻辑
// ==========================================

pub mod audit_log;
pub mod batch;
pub mod capacity;
pub mod order;
pub mod payment;
pub mod production;
pub mod supplier_order;
pub mod types;

// 重导出核心类型
pub use audit_log::{AuditEntityType, AuditRecord};
pub use batch::{Batch, BatchJoinRequest, BatchMember};
pub use capacity::{CapacityConstraint, CapacityRecord, Supplier};
pub use order::{NewOrderRequest, Order};
pub use payment::{Invoice, PaymentEvent};
pub use production::{
    ProductionProgress, ProductionStage, StageTemplate, StageTemplateStep, StageUpdate,
};
pub use supplier_order::{CounterOfferDecision, SupplierOrder, SupplierOrderOwner};
pub use types::{
    AcceptanceStatus, Actor, ActorRole, BatchStatus, PaymentOutcome, PaymentStatus, PaymentType,
    StageStatus, SupplierOrderStatus, WorkflowStatus,
};

// ==========================================
// 制造撮合平台 - 履约核心 - API 层
// ==========================================
// 职责: 对外业务接口; 每个写操作单事务完成, 提交后发布领域事件
// ==========================================

pub mod assignment_api;
pub mod batch_api;
pub mod error;
pub mod order_api;
pub mod production_api;
pub mod supplier_order_api;
pub(crate) mod workflow;

// 重导出核心类型
pub use assignment_api::{AssignmentApi, AssignmentRequest};
pub use batch_api::{BatchApi, BatchJoinOutcome};
pub use error::{ApiError, ApiResult};
pub use order_api::{OrderApi, PaymentRecordOutcome, TransitionOutcome};
pub use production_api::{ProductionApi, StageUpdateOutcome};
pub use supplier_order_api::SupplierOrderApi;

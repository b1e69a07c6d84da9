// ==========================================
// 制造撮合平台 - 履约核心 - 外围服务
// ==========================================
// 离线提交队列 + 外部供应商建议 (均为非权威旁路)
// ==========================================

pub mod advisory;
pub mod submission_queue;

pub use advisory::{AdvisoryHint, AdvisoryService, AnnotatedRanking, SupplierAdvisor};
pub use submission_queue::{QueueRunSummary, SubmissionQueue};

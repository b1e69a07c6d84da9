// ==========================================
// 制造撮合平台 - 履约核心 - 审计日志仓储
// ==========================================
// 红线: 只追加, 不更新不删除
// 红线: (entity_type, entity_id, event_id) 唯一, 用于幂等识别
// ==========================================

mod core;
mod queries;


pub use core::AuditLogRepository;

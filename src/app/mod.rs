// ==========================================
// 制造撮合平台 - 履约核心 - 应用层
// ==========================================
// 职责: 装配仓储/引擎/API, 供宿主进程持有
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};

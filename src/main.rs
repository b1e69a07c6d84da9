// ==========================================
// 制造撮合平台 - 履约核心 - 维护入口
// ==========================================
// 用途: 定时任务调用; 打开数据库 (必要时建表), 锁定窗口已关闭的批次,
//       输出提交队列积压情况
// 用法: mfg-fulfillment [db_path]
// ==========================================

use anyhow::Result;
use chrono::Utc;

use mfg_fulfillment::app::{get_default_db_path, AppState};
use mfg_fulfillment::logging;

fn main() -> Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} v{}", mfg_fulfillment::APP_NAME, mfg_fulfillment::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)?;

    let locked = state.batch_api.lock_expired_batches(Utc::now())?;
    for batch_id in &locked {
        tracing::info!(batch_id = %batch_id, "过期批次已锁定");
    }

    let pending = state.submission_queue.pending_count()?;
    let dead = state.submission_queue.dead_count()?;
    if dead > 0 {
        tracing::warn!(dead, "提交队列存在已放弃的条目, 需要人工处理");
    }

    tracing::info!(
        locked_batches = locked.len(),
        queue_pending = pending,
        queue_dead = dead,
        "维护任务完成"
    );
    Ok(())
}

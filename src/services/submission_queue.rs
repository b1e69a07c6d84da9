// ==========================================
// 制造撮合平台 - 履约核心 - 离线提交队列
// ==========================================
// 职责: 暂存网络不可用时的提交, 恢复后按序重放
// 退避: 失败后按 RetryPolicy 指数退避重排, 超过 max_retries 置为 dead
// ==========================================

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

use crate::engine::retry::RetryPolicy;
use crate::repository::error::RepositoryResult;
use crate::repository::submission_queue_repo::{
    QueueItemStatus, SubmissionQueueItem, SubmissionQueueRepository,
};
use rusqlite::Connection;

/// 一轮重放的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead: usize,
}

pub struct SubmissionQueue {
    repo: SubmissionQueueRepository,
    policy: RetryPolicy,
}

impl SubmissionQueue {
    pub fn new(conn: Arc<Mutex<Connection>>, policy: RetryPolicy) -> Self {
        Self {
            repo: SubmissionQueueRepository::new(conn),
            policy,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.policy.max_attempts.saturating_sub(1)
    }

    /// 提交到队列, 返回 item_id
    pub fn enqueue(&self, kind: &str, payload: JsonValue, now: DateTime<Utc>) -> RepositoryResult<String> {
        let item = SubmissionQueueItem::new(kind, payload, self.max_retries(), now);
        self.repo.insert(&item)?;
        tracing::info!(item_id = %item.item_id, kind, "提交已加入离线队列");
        Ok(item.item_id)
    }

    /// 重放所有到期项
    ///
    /// handler 返回 Err 时按退避重排; 重试次数用尽后置为 dead
    pub fn process_all<F>(&self, now: DateTime<Utc>, mut handler: F) -> RepositoryResult<QueueRunSummary>
    where
        F: FnMut(&SubmissionQueueItem) -> anyhow::Result<()>,
    {
        let mut summary = QueueRunSummary::default();

        for item in self.repo.list_due(now)? {
            summary.attempted += 1;
            match handler(&item) {
                Ok(()) => {
                    self.repo.mark_done(&item.item_id, now)?;
                    summary.succeeded += 1;
                }
                Err(e) => {
                    let retry_count = item.retry_count + 1;
                    let message = format!("{:#}", e);
                    if retry_count > item.max_retries {
                        self.repo.mark_dead(&item.item_id, retry_count, &message, now)?;
                        summary.dead += 1;
                        tracing::error!(
                            item_id = %item.item_id,
                            kind = %item.kind,
                            retry_count,
                            error = %message,
                            "离线提交重试次数用尽"
                        );
                    } else {
                        let delay = self.policy.delay_for_retry(retry_count);
                        let next_at = now
                            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(60));
                        self.repo
                            .reschedule(&item.item_id, retry_count, next_at, &message, now)?;
                        summary.rescheduled += 1;
                        tracing::warn!(
                            item_id = %item.item_id,
                            retry_count,
                            next_attempt_at = %next_at,
                            error = %message,
                            "离线提交失败, 已重排"
                        );
                    }
                }
            }
        }

        if summary.attempted > 0 {
            tracing::info!(?summary, "离线队列重放完成");
        }
        Ok(summary)
    }

    pub fn pending_count(&self) -> RepositoryResult<usize> {
        self.repo.count_by_status(QueueItemStatus::Pending)
    }

    pub fn dead_count(&self) -> RepositoryResult<usize> {
        self.repo.count_by_status(QueueItemStatus::Dead)
    }

    pub fn get(&self, item_id: &str) -> RepositoryResult<SubmissionQueueItem> {
        self.repo.find_by_id(item_id)
    }

    pub fn clear(&self) -> RepositoryResult<usize> {
        let removed = self.repo.clear()?;
        tracing::info!(removed, "离线队列已清空");
        Ok(removed)
    }
}

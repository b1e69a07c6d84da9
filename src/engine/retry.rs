// ==========================================
// 制造撮合平台 - 履约核心 - 重试退避策略
// ==========================================
// 职责: 乐观锁冲突的有界重试, 离线提交队列的退避调度
// 工具: backon::ExponentialBuilder 生成指数退避序列
// ==========================================

use backon::{BackoffBuilder, ExponentialBuilder};
use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

/// 有界指数退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数 (含首次)
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    /// 产能/批次提交的默认策略: 3 次尝试, 5ms - 100ms, 带抖动
    pub fn for_commit() -> Self {
        Self {
            max_attempts: 3,
            min_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            jitter: true,
        }
    }

    /// 离线提交队列的默认策略: 1s - 60s, 不带抖动 (调度时间可预测)
    pub fn for_queue(max_retries: u32) -> Self {
        Self {
            max_attempts: max_retries + 1,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// 第 n 次重试 (从 1 开始) 前的等待时长
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff()
            .build()
            .nth(retry.saturating_sub(1) as usize)
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_commit()
    }
}

/// 同步重试循环
///
/// `op` 接收当前尝试序号 (从 1 开始); 仅 `is_retryable` 为 true 的错误会重试,
/// 用尽次数后返回最后一次的错误
pub fn run_with_retry<T, E, F, R>(
    policy: &RetryPolicy,
    op_name: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let mut delays = policy.backoff().build();
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) && attempt < policy.max_attempts => {
                let delay = delays.next().unwrap_or(policy.max_delay);
                warn!(
                    op = op_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "乐观锁冲突, 退避后重试"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

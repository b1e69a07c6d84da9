// ==========================================
// 制造撮合平台 - 履约核心 - 批次聚合引擎
// ==========================================
// 职责: 批次资格判定、加入/锁定计算、转换时按产能比例拆分数量
// 红线: current_quantity ≤ target + 容差; current_style_count ≤ max_styles
// 红线: 非 open 批次不接受任何变更
// ==========================================

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::batch::Batch;
use crate::domain::types::BatchStatus;
use crate::engine::error::{EngineError, EngineResult};

const ENTITY: &str = "Batch";

// ==========================================
// BatchPolicy - 新批次参数与容差
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPolicy {
    pub default_target_quantity: i64,
    pub default_max_styles: i32,
    pub window_days: i64,
    /// 允许超出 target 的百分比 (0 表示不允许)
    pub overflow_tolerance_pct: i64,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            default_target_quantity: 500,
            default_max_styles: 5,
            window_days: 7,
            overflow_tolerance_pct: 0,
        }
    }
}

impl BatchPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_target_quantity <= 0 || self.default_max_styles <= 0 {
            return Err(EngineError::Validation(format!(
                "批次目标数量/款式上限必须为正: {:?}",
                self
            )));
        }
        if self.window_days <= 0 || self.overflow_tolerance_pct < 0 {
            return Err(EngineError::Validation(format!(
                "批次窗口必须为正, 容差不能为负: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// 资格判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    NotOpen,
    WindowClosed,
    CategoryMismatch,
    StyleSlotsFull,
    WouldOverflow,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

// ==========================================
// BatchAggregator
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct BatchAggregator {
    policy: BatchPolicy,
}

impl BatchAggregator {
    pub fn new(policy: BatchPolicy) -> EngineResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// 可容纳的数量上限 = target + ⌊target × tolerance% ⌋
    pub fn quantity_limit(&self, batch: &Batch) -> i64 {
        batch.target_quantity + batch.target_quantity * self.policy.overflow_tolerance_pct / 100
    }

    /// 新批次可容纳的数量上限; 超过它的订单任何批次都放不下
    pub fn new_batch_quantity_limit(&self) -> i64 {
        let target = self.policy.default_target_quantity;
        target + target * self.policy.overflow_tolerance_pct / 100
    }

    pub fn new_batch(
        &self,
        batch_id: String,
        product_category: String,
        base_price: Decimal,
        now: DateTime<Utc>,
    ) -> Batch {
        Batch {
            batch_id,
            product_category,
            target_quantity: self.policy.default_target_quantity,
            current_quantity: 0,
            max_styles: self.policy.default_max_styles,
            current_style_count: 0,
            base_price,
            window_closes_at: now + Duration::days(self.policy.window_days),
            status: BatchStatus::Open,
            locked_at: None,
            created_at: now,
            revision: 0,
        }
    }

    /// 判断订单能否加入批次
    ///
    /// style_is_new: 该款式尚未出现在批次中
    pub fn eligibility(
        &self,
        batch: &Batch,
        product_category: &str,
        quantity: i64,
        style_is_new: bool,
        now: DateTime<Utc>,
    ) -> Eligibility {
        if !batch.is_open() {
            return Eligibility::NotOpen;
        }
        if now >= batch.window_closes_at {
            return Eligibility::WindowClosed;
        }
        if batch.product_category != product_category {
            return Eligibility::CategoryMismatch;
        }
        if style_is_new && batch.current_style_count >= batch.max_styles {
            return Eligibility::StyleSlotsFull;
        }
        if batch.current_quantity + quantity > self.quantity_limit(batch) {
            return Eligibility::WouldOverflow;
        }
        Eligibility::Eligible
    }

    /// 计算加入后的批次; 数量达标时自动锁定
    ///
    /// # 错误
    /// - Validation: 数量 ≤ 0
    /// - InvalidTransition: 批次不满足资格
    pub fn apply_join(
        &self,
        batch: &Batch,
        product_category: &str,
        quantity: i64,
        style_is_new: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<Batch> {
        if quantity <= 0 {
            return Err(EngineError::Validation(format!("加入数量必须为正: {}", quantity)));
        }
        let verdict = self.eligibility(batch, product_category, quantity, style_is_new, now);
        if !verdict.is_eligible() {
            return Err(EngineError::transition(
                ENTITY,
                batch.status,
                "join",
                format!("批次 {} 不可加入: {:?}", batch.batch_id, verdict),
            ));
        }

        let mut next = batch.clone();
        next.current_quantity += quantity;
        if style_is_new {
            next.current_style_count += 1;
        }
        if next.current_quantity >= next.target_quantity {
            next.status = BatchStatus::Locked;
            next.locked_at = Some(now);
            debug!(batch_id = %next.batch_id, qty = next.current_quantity, "批次已满, 自动锁定");
        }
        Ok(next)
    }

    pub fn lock(batch: &Batch, now: DateTime<Utc>) -> EngineResult<Batch> {
        if batch.status != BatchStatus::Open {
            return Err(EngineError::transition(ENTITY, batch.status, BatchStatus::Locked, "只有 open 批次可以锁定"));
        }
        let mut next = batch.clone();
        next.status = BatchStatus::Locked;
        next.locked_at = Some(now);
        Ok(next)
    }

    pub fn mark_assigned(batch: &Batch) -> EngineResult<Batch> {
        if batch.status != BatchStatus::Locked {
            return Err(EngineError::transition(
                ENTITY,
                batch.status,
                BatchStatus::Assigned,
                "只有 locked 批次可以转换",
            ));
        }
        let mut next = batch.clone();
        next.status = BatchStatus::Assigned;
        Ok(next)
    }
}

/// 按权重拆分总量 (最大余数法), 各份之和恰为 total, 且每份不超过其权重
///
/// # 错误
/// - Validation: total < 0, 权重为空或含非正数, 或 total 超过权重之和
pub fn split_proportionally(total: i64, weights: &[i64]) -> EngineResult<Vec<i64>> {
    if total < 0 {
        return Err(EngineError::Validation(format!("拆分总量不能为负: {}", total)));
    }
    if weights.is_empty() || weights.iter().any(|w| *w <= 0) {
        return Err(EngineError::Validation(format!("拆分权重必须为正: {:?}", weights)));
    }
    let sum: i128 = weights.iter().map(|w| *w as i128).sum();
    if total as i128 > sum {
        return Err(EngineError::Validation(format!(
            "拆分总量 {} 超过可用量之和 {}",
            total, sum
        )));
    }

    let mut shares: Vec<i64> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(i128, usize)> = Vec::with_capacity(weights.len());
    for (idx, w) in weights.iter().enumerate() {
        let exact = total as i128 * *w as i128;
        shares.push((exact / sum) as i64);
        remainders.push((exact % sum, idx));
    }

    let assigned: i64 = shares.iter().sum();
    let mut leftover = total - assigned;
    // 余数大者优先, 同余数按位置
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, idx) in remainders {
        if leftover == 0 {
            break;
        }
        shares[idx] += 1;
        leftover -= 1;
    }
    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn open_batch(target: i64, max_styles: i32) -> Batch {
        let agg = BatchAggregator::new(BatchPolicy {
            default_target_quantity: target,
            default_max_styles: max_styles,
            ..BatchPolicy::default()
        })
        .unwrap();
        agg.new_batch("B1".to_string(), "knit_tops".to_string(), Decimal::new(1000, 2), now())
    }

    #[test]
    fn test_join_increments_and_counts_new_styles() {
        let agg = BatchAggregator::default();
        let b = open_batch(500, 5);
        let b = agg.apply_join(&b, "knit_tops", 100, true, now()).unwrap();
        let b = agg.apply_join(&b, "knit_tops", 50, false, now()).unwrap();
        assert_eq!(b.current_quantity, 150);
        assert_eq!(b.current_style_count, 1);
        assert!(b.is_open());
    }

    #[test]
    fn test_eligibility_reasons() {
        let agg = BatchAggregator::default();
        let mut b = open_batch(500, 1);
        assert_eq!(agg.eligibility(&b, "bottoms", 10, true, now()), Eligibility::CategoryMismatch);
        assert_eq!(agg.eligibility(&b, "knit_tops", 501, true, now()), Eligibility::WouldOverflow);
        assert_eq!(
            agg.eligibility(&b, "knit_tops", 10, true, now() + Duration::days(7)),
            Eligibility::WindowClosed
        );

        b.current_style_count = 1;
        assert_eq!(agg.eligibility(&b, "knit_tops", 10, true, now()), Eligibility::StyleSlotsFull);
        assert_eq!(agg.eligibility(&b, "knit_tops", 10, false, now()), Eligibility::Eligible);
    }

    #[test]
    fn test_filling_target_auto_locks() {
        let agg = BatchAggregator::default();
        let b = open_batch(100, 5);
        let b = agg.apply_join(&b, "knit_tops", 100, true, now()).unwrap();
        assert_eq!(b.status, BatchStatus::Locked);
        assert_eq!(b.locked_at, Some(now()));
        assert!(agg.apply_join(&b, "knit_tops", 1, false, now()).is_err());
    }

    #[test]
    fn test_overflow_tolerance() {
        let agg = BatchAggregator::new(BatchPolicy {
            overflow_tolerance_pct: 10,
            ..BatchPolicy::default()
        })
        .unwrap();
        let b = open_batch(100, 5);
        assert_eq!(agg.quantity_limit(&b), 110);
        assert!(agg.apply_join(&b, "knit_tops", 110, true, now()).is_ok());
        assert!(agg.apply_join(&b, "knit_tops", 111, true, now()).is_err());
    }

    #[test]
    fn test_new_batch_quantity_limit_follows_policy() {
        assert_eq!(BatchAggregator::default().new_batch_quantity_limit(), 500);
        let agg = BatchAggregator::new(BatchPolicy {
            default_target_quantity: 200,
            overflow_tolerance_pct: 25,
            ..BatchPolicy::default()
        })
        .unwrap();
        assert_eq!(agg.new_batch_quantity_limit(), 250);
    }

    #[test]
    fn test_lock_and_assign_lifecycle() {
        let b = open_batch(100, 5);
        assert!(BatchAggregator::mark_assigned(&b).is_err());
        let locked = BatchAggregator::lock(&b, now()).unwrap();
        assert!(BatchAggregator::lock(&locked, now()).is_err());
        let assigned = BatchAggregator::mark_assigned(&locked).unwrap();
        assert_eq!(assigned.status, BatchStatus::Assigned);
    }

    #[test]
    fn test_split_largest_remainder() {
        assert_eq!(split_proportionally(100, &[1, 1, 1]).unwrap(), vec![34, 33, 33]);
        assert_eq!(split_proportionally(10, &[300, 100]).unwrap(), vec![8, 2]);
        assert_eq!(split_proportionally(0, &[5, 5]).unwrap(), vec![0, 0]);
        assert!(split_proportionally(11, &[5, 5]).is_err());
        assert!(split_proportionally(5, &[]).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_sums_exactly_and_respects_weights(
            weights in proptest::collection::vec(1i64..10_000, 1..8),
            frac in 0u32..=100,
        ) {
            let sum: i64 = weights.iter().sum();
            let total = sum * frac as i64 / 100;
            let shares = split_proportionally(total, &weights).unwrap();
            prop_assert_eq!(shares.iter().sum::<i64>(), total);
            for (s, w) in shares.iter().zip(&weights) {
                prop_assert!(*s >= 0 && s <= w);
            }
        }

        #[test]
        fn prop_join_sequence_keeps_invariants(
            joins in proptest::collection::vec((1i64..200, any::<bool>()), 1..30),
        ) {
            let agg = BatchAggregator::default();
            let mut b = open_batch(500, 3);
            let mut last_fill = b.fill_percentage();

            for (qty, new_style) in joins {
                if let Ok(next) = agg.apply_join(&b, "knit_tops", qty, new_style, now()) {
                    b = next;
                }
                prop_assert!(b.current_quantity <= b.target_quantity);
                prop_assert!(b.current_style_count <= b.max_styles);
                prop_assert!(b.fill_percentage() >= last_fill);
                last_fill = b.fill_percentage();
            }
        }
    }
}

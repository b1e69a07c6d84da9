// ==========================================
// 制造撮合平台 - 履约核心 - 批次定价引擎
// ==========================================
// 职责: 由基准价、款式数、填充率计算出厂价/买家价/节省额
// 红线: 纯函数, 无状态、无副作用、无 I/O
// 红线: 内部全精度计算, 仅在输出边界四舍五入到 2 位小数
// ==========================================

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::engine::error::{EngineError, EngineResult};

// ==========================================
// PricingRules - 可配置的定价常量
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRules {
    /// 每增加一个款式的复杂度系数增量
    pub complexity_step: Decimal,
    /// 低填充率阈值 (%), 低于此值使用 markup_low_fill
    pub low_fill_threshold: Decimal,
    /// 高填充率阈值 (%), 不低于此值使用 markup_high_fill
    pub high_fill_threshold: Decimal,
    pub markup_low_fill: Decimal,
    pub markup_mid_fill: Decimal,
    pub markup_high_fill: Decimal,
    /// 单独下单参考价相对基准价的倍数
    pub solo_multiplier: Decimal,
}

impl Default for PricingRules {
    fn default() -> Self {
        Self {
            complexity_step: Decimal::new(5, 2),
            low_fill_threshold: Decimal::from(30),
            high_fill_threshold: Decimal::from(80),
            markup_low_fill: Decimal::new(25, 2),
            markup_mid_fill: Decimal::new(20, 2),
            markup_high_fill: Decimal::new(15, 2),
            solo_multiplier: Decimal::new(15, 1),
        }
    }
}

/// 定价输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInput {
    pub base_price: Decimal,
    pub quantity: i64,
    pub style_count_in_batch: i32,
    pub fill_percentage: Decimal,
}

/// 定价结果 (均已四舍五入到 2 位小数)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub complexity_multiplier: Decimal,
    pub factory_price: Decimal,
    pub buyer_markup: Decimal,
    pub buyer_price: Decimal,
    pub solo_order_price: Decimal,
    pub savings_per_unit: Decimal,
    pub total_savings: Decimal,
}

// ==========================================
// PricingEngine
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    rules: PricingRules,
}

impl PricingEngine {
    pub fn new(rules: PricingRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PricingRules {
        &self.rules
    }

    /// 按填充率选择买家加价率
    pub fn markup_for_fill(&self, fill_percentage: Decimal) -> Decimal {
        if fill_percentage < self.rules.low_fill_threshold {
            self.rules.markup_low_fill
        } else if fill_percentage < self.rules.high_fill_threshold {
            self.rules.markup_mid_fill
        } else {
            self.rules.markup_high_fill
        }
    }

    /// 计算报价
    ///
    /// # 步骤
    /// 1. complexity = 1 + step × (styles − 1)
    /// 2. factory = base × complexity
    /// 3. markup 按填充率分档
    /// 4. buyer = factory × (1 + markup)
    /// 5. solo = base × solo_multiplier
    /// 6. savings = solo − buyer; total = savings × quantity
    ///
    /// # 错误
    /// - Validation: 基准价为负、数量 ≤ 0、款式数 < 1、填充率为负
    #[instrument(level = "debug", skip(self))]
    pub fn quote(&self, input: &PriceInput) -> EngineResult<PriceQuote> {
        Self::validate(input)?;

        let styles = Decimal::from(input.style_count_in_batch);
        let complexity = Decimal::ONE + self.rules.complexity_step * (styles - Decimal::ONE);
        let factory = input.base_price * complexity;
        let markup = self.markup_for_fill(input.fill_percentage);
        let buyer = factory * (Decimal::ONE + markup);
        let solo = input.base_price * self.rules.solo_multiplier;
        let savings = solo - buyer;
        let total = savings * Decimal::from(input.quantity);

        Ok(PriceQuote {
            complexity_multiplier: round_money(complexity),
            factory_price: round_money(factory),
            buyer_markup: round_money(markup),
            buyer_price: round_money(buyer),
            solo_order_price: round_money(solo),
            savings_per_unit: round_money(savings),
            total_savings: round_money(total),
        })
    }

    fn validate(input: &PriceInput) -> EngineResult<()> {
        if input.base_price.is_sign_negative() {
            return Err(EngineError::Validation(format!(
                "基准价不能为负: {}",
                input.base_price
            )));
        }
        if input.quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "数量必须为正: {}",
                input.quantity
            )));
        }
        if input.style_count_in_batch < 1 {
            return Err(EngineError::Validation(format!(
                "款式数至少为 1: {}",
                input.style_count_in_batch
            )));
        }
        if input.fill_percentage.is_sign_negative() {
            return Err(EngineError::Validation(format!(
                "填充率不能为负: {}",
                input.fill_percentage
            )));
        }
        Ok(())
    }
}

/// 填充率 = current / target × 100 (全精度)
pub fn fill_percentage(current_quantity: i64, target_quantity: i64) -> Decimal {
    if target_quantity <= 0 {
        return Decimal::ZERO;
    }
    Decimal::from(current_quantity) * Decimal::ONE_HUNDRED / Decimal::from(target_quantity)
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn input(base: &str, qty: i64, styles: i32, fill: &str) -> PriceInput {
        PriceInput {
            base_price: dec(base),
            quantity: qty,
            style_count_in_batch: styles,
            fill_percentage: dec(fill),
        }
    }

    #[test]
    fn test_reference_example() {
        let quote = PricingEngine::default()
            .quote(&input("10.00", 100, 2, "50"))
            .unwrap();

        assert_eq!(quote.complexity_multiplier, dec("1.05"));
        assert_eq!(quote.factory_price, dec("10.50"));
        assert_eq!(quote.buyer_markup, dec("0.20"));
        assert_eq!(quote.buyer_price, dec("12.60"));
        assert_eq!(quote.solo_order_price, dec("15.00"));
        assert_eq!(quote.savings_per_unit, dec("2.40"));
        assert_eq!(quote.total_savings, dec("240.00"));
    }

    #[test]
    fn test_markup_tier_boundaries() {
        let engine = PricingEngine::default();
        assert_eq!(engine.markup_for_fill(dec("29.99")), dec("0.25"));
        assert_eq!(engine.markup_for_fill(dec("30")), dec("0.20"));
        assert_eq!(engine.markup_for_fill(dec("79.99")), dec("0.20"));
        assert_eq!(engine.markup_for_fill(dec("80")), dec("0.15"));
        assert_eq!(engine.markup_for_fill(dec("120")), dec("0.15"));
    }

    #[test]
    fn test_rounding_only_at_boundary() {
        // 3 款: complexity 1.10; 1.115 × 1.10 = 1.2265 → factory 1.23
        // buyer = 1.2265 × 1.15 = 1.410475 → 1.41
        // total = (1.6725 − 1.410475) × 1000 = 262.025 → 262.03
        // 逐步舍入则为 (1.67 − 1.41) × 1000 = 260.00
        let quote = PricingEngine::default()
            .quote(&input("1.115", 1000, 3, "90"))
            .unwrap();
        assert_eq!(quote.factory_price, dec("1.23"));
        assert_eq!(quote.buyer_price, dec("1.41"));
        assert_eq!(quote.total_savings, dec("262.03"));
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        let engine = PricingEngine::default();
        assert!(engine.quote(&input("-1", 10, 1, "10")).is_err());
        assert!(engine.quote(&input("10", 0, 1, "10")).is_err());
        assert!(engine.quote(&input("10", 10, 0, "10")).is_err());
        assert!(engine.quote(&input("10", 10, 1, "-5")).is_err());
    }

    #[test]
    fn test_fill_percentage() {
        assert_eq!(fill_percentage(250, 500), dec("50"));
        assert_eq!(fill_percentage(1, 0), Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn prop_quote_is_deterministic(
            base_cents in 0i64..100_000,
            qty in 1i64..10_000,
            styles in 1i32..10,
            fill in 0i64..150,
        ) {
            let engine = PricingEngine::default();
            let inp = PriceInput {
                base_price: Decimal::new(base_cents, 2),
                quantity: qty,
                style_count_in_batch: styles,
                fill_percentage: Decimal::from(fill),
            };
            prop_assert_eq!(engine.quote(&inp).unwrap(), engine.quote(&inp).unwrap());
        }

        #[test]
        fn prop_higher_fill_never_raises_buyer_price(
            base_cents in 1i64..100_000,
            styles in 1i32..10,
            low in 0i64..100,
            delta in 0i64..100,
        ) {
            let engine = PricingEngine::default();
            let mk = |fill: i64| PriceInput {
                base_price: Decimal::new(base_cents, 2),
                quantity: 1,
                style_count_in_batch: styles,
                fill_percentage: Decimal::from(fill),
            };
            let a = engine.quote(&mk(low)).unwrap();
            let b = engine.quote(&mk(low + delta)).unwrap();
            prop_assert!(b.buyer_price <= a.buyer_price);
        }
    }
}

// ==========================================
// 制造撮合平台 - 履约核心 - 生产阶段跟踪
// ==========================================
// 职责: 按品类模板生成阶段, 校验进度更新, 汇总整体进度
// 红线: 进度单调不减; 100% 当且仅当 completed
// 红线: 阶段集合一次生成, 之后只原地更新
// ==========================================

use chrono::{DateTime, Duration, Utc};

use crate::domain::production::{ProductionProgress, ProductionStage, StageTemplateStep, StageUpdate};
use crate::domain::types::StageStatus;
use crate::engine::error::{EngineError, EngineResult};

/// 产品类型 → 品类映射 (未命中归入 general)
const CATEGORY_TABLE: &[(&str, &[&str])] = &[
    ("knit_tops", &["t-shirt", "tee", "polo", "tank-top"]),
    ("woven_tops", &["shirt", "blouse"]),
    ("outerwear", &["hoodie", "sweatshirt", "jacket", "coat"]),
    ("bottoms", &["pants", "trousers", "jeans", "shorts", "skirt"]),
    ("dresses", &["dress"]),
];

pub const GENERAL_CATEGORY: &str = "general";

pub struct ProductionStageTracker;

impl ProductionStageTracker {
    /// 产品类型 (或品类名本身) → 品类
    pub fn product_category(product_type: &str) -> &'static str {
        let key = product_type.trim().to_lowercase();
        CATEGORY_TABLE
            .iter()
            .find(|(category, types)| *category == key || types.contains(&key.as_str()))
            .map(|(category, _)| *category)
            .unwrap_or(GENERAL_CATEGORY)
    }

    /// 无模板时的默认五阶段
    pub fn default_template() -> Vec<StageTemplateStep> {
        vec![
            StageTemplateStep::new("fabric prep", 2),
            StageTemplateStep::new("cutting", 2),
            StageTemplateStep::new("sewing", 5),
            StageTemplateStep::new("quality control", 2),
            StageTemplateStep::new("finishing", 2),
        ]
    }

    /// 按模板生成阶段; target_date = start + 累计 estimated_days
    pub fn instantiate(
        supplier_order_id: &str,
        steps: &[StageTemplateStep],
        start: DateTime<Utc>,
    ) -> EngineResult<Vec<ProductionStage>> {
        if steps.is_empty() {
            return Err(EngineError::Validation("阶段模板不能为空".to_string()));
        }
        if let Some(bad) = steps.iter().find(|s| s.estimated_days < 0) {
            return Err(EngineError::Validation(format!(
                "阶段 {} 的预估天数不能为负: {}",
                bad.stage_name, bad.estimated_days
            )));
        }

        let start_date = start.date_naive();
        let mut offset = 0i64;
        let stages = steps
            .iter()
            .enumerate()
            .map(|(idx, step)| {
                offset += step.estimated_days;
                ProductionStage::new(
                    supplier_order_id.to_string(),
                    idx as i32 + 1,
                    step.stage_name.clone(),
                    start_date + Duration::days(offset),
                )
            })
            .collect();
        Ok(stages)
    }

    /// 校验并应用一次阶段更新, 返回更新后的阶段
    ///
    /// # 错误
    /// - Validation: 百分比越界、进度回退、阶段号不存在
    pub fn apply_update(
        stages: &[ProductionStage],
        update: &StageUpdate,
        now: DateTime<Utc>,
    ) -> EngineResult<ProductionStage> {
        let pct = update.completion_percentage;
        if !(0..=100).contains(&pct) {
            return Err(EngineError::Validation(format!(
                "完成百分比必须在 0 - 100 之间: {}",
                pct
            )));
        }

        let current = stages
            .iter()
            .find(|s| s.stage_number == update.stage_number)
            .ok_or_else(|| {
                EngineError::Validation(format!("阶段号不存在: {}", update.stage_number))
            })?;

        if pct < current.completion_percentage {
            return Err(EngineError::Validation(format!(
                "阶段 {} 进度不能回退: {} → {}",
                current.stage_number, current.completion_percentage, pct
            )));
        }

        let mut next = current.clone();
        next.completion_percentage = pct;
        next.status = StageStatus::from_percentage(pct);
        if pct > 0 && next.started_at.is_none() {
            next.started_at = Some(now);
        }
        if pct == 100 && next.completed_at.is_none() {
            next.completed_at = Some(now);
        }
        if let Some(notes) = &update.notes {
            next.notes = Some(notes.clone());
        }
        next.photos.extend(update.photos.iter().cloned());

        Ok(next)
    }

    /// 整体进度 = 各阶段百分比的算术平均 (无阶段为 0)
    pub fn overall_progress(stages: &[ProductionStage]) -> f64 {
        if stages.is_empty() {
            return 0.0;
        }
        let sum: i64 = stages.iter().map(|s| s.completion_percentage as i64).sum();
        sum as f64 / stages.len() as f64
    }

    /// 第一个未完成的阶段; 全部完成则为最后一个
    pub fn current_stage(stages: &[ProductionStage]) -> Option<&ProductionStage> {
        stages
            .iter()
            .find(|s| !s.is_completed())
            .or_else(|| stages.last())
    }

    pub fn is_complete(stages: &[ProductionStage]) -> bool {
        !stages.is_empty() && stages.iter().all(|s| s.is_completed())
    }

    pub fn progress(supplier_order_id: &str, stages: &[ProductionStage]) -> ProductionProgress {
        ProductionProgress {
            supplier_order_id: supplier_order_id.to_string(),
            overall_percentage: Self::overall_progress(stages),
            current_stage: Self::current_stage(stages).cloned(),
            stage_count: stages.len(),
            completed_stages: stages.iter().filter(|s| s.is_completed()).count(),
        }
    }
}

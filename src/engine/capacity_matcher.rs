// ==========================================
// 制造撮合平台 - 履约核心 - 产能匹配引擎
// ==========================================
// 职责: 按数量/日期/专长对候选供应商打分排序
// 红线: 排名只读, 不做任何产能预留; 提交分配另行原子校验
// 红线: 排序确定: score ↓, available ↓, supplier_id ↑
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, instrument};

use crate::domain::capacity::{CapacityConstraint, CapacityRecord, Supplier};
use crate::engine::error::{EngineError, EngineResult};

// ==========================================
// MatchWeights - 打分权重
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub performance: f64,
    pub specialization: f64,
    pub leadtime: f64,
    pub headroom: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            performance: 0.4,
            specialization: 0.3,
            leadtime: 0.2,
            headroom: 0.1,
        }
    }
}

impl MatchWeights {
    pub fn validate(&self) -> EngineResult<()> {
        let all = [self.performance, self.specialization, self.leadtime, self.headroom];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Validation(format!(
                "匹配权重必须为非负有限数: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// 匹配请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub quantity: i64,
    pub target_date: NaiveDate,
    pub specialization: String,
    #[serde(default)]
    pub excluded_supplier_ids: Vec<String>,
}

/// 排名结果中的一个候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub supplier_id: String,
    pub score: f64,
    pub available_capacity: i64,
    pub capacity_revision: i64,

    // ===== 分项 (0 - 100) =====
    pub performance_score: f64,
    pub specialization_match: f64,
    pub leadtime_fit: f64,
    pub headroom_ratio: f64,

    // ===== 外部建议 (非权威) =====
    pub reasoning: Option<String>,
    pub advisory_confidence: Option<f64>,
}

// ==========================================
// CapacityMatcher
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CapacityMatcher {
    weights: MatchWeights,
}

impl CapacityMatcher {
    pub fn new(weights: MatchWeights) -> EngineResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    pub fn validate_request(request: &MatchRequest) -> EngineResult<()> {
        if request.quantity <= 0 {
            return Err(EngineError::Validation(format!(
                "需求数量必须为正: {}",
                request.quantity
            )));
        }
        if request.specialization.trim().is_empty() {
            return Err(EngineError::Validation("专长品类不能为空".to_string()));
        }
        Ok(())
    }

    /// 交期吻合度 (0 - 100)
    ///
    /// days_available ≤ 0 → 0; 否则 min(1, days_available / lead_time) × 100
    pub fn leadtime_fit(days_available: i64, lead_time_days: i64) -> f64 {
        if days_available <= 0 {
            return 0.0;
        }
        if lead_time_days <= 0 {
            return 100.0;
        }
        (days_available as f64 / lead_time_days as f64).min(1.0) * 100.0
    }

    /// 对候选打分排序
    ///
    /// # 参数
    /// - suppliers: 供应商档案 (未认证/停用者被过滤)
    /// - records: 目标日期的产能记录
    /// - as_of: 计算交期的基准日
    #[instrument(level = "debug", skip(self, suppliers, records), fields(qty = request.quantity, date = %request.target_date))]
    pub fn rank(
        &self,
        request: &MatchRequest,
        suppliers: &[Supplier],
        records: &[CapacityRecord],
        as_of: NaiveDate,
    ) -> EngineResult<Vec<MatchCandidate>> {
        Self::validate_request(request)?;

        let by_id: HashMap<&str, &Supplier> = suppliers
            .iter()
            .map(|s| (s.supplier_id.as_str(), s))
            .collect();
        let days_available = (request.target_date - as_of).num_days();

        let mut candidates: Vec<MatchCandidate> = records
            .iter()
            .filter(|r| r.capacity_date == request.target_date)
            .filter(|r| !request.excluded_supplier_ids.contains(&r.supplier_id))
            .filter(|r| r.can_commit(request.quantity))
            .filter_map(|r| {
                let supplier = by_id.get(r.supplier_id.as_str())?;
                if !supplier.verified || !supplier.active {
                    return None;
                }
                Some(self.score(request, supplier, r, days_available))
            })
            .collect();

        candidates.sort_by(Self::compare);

        debug!(candidates = candidates.len(), "产能匹配完成");
        Ok(candidates)
    }

    fn score(
        &self,
        request: &MatchRequest,
        supplier: &Supplier,
        record: &CapacityRecord,
        days_available: i64,
    ) -> MatchCandidate {
        let performance = supplier.performance_score.clamp(0.0, 100.0);
        let specialization = if supplier.specializes_in(&request.specialization) {
            100.0
        } else {
            0.0
        };
        let leadtime = Self::leadtime_fit(days_available, supplier.lead_time_days);
        let headroom = record.headroom_ratio_after(request.quantity) * 100.0;

        let w = &self.weights;
        let score = w.performance * performance
            + w.specialization * specialization
            + w.leadtime * leadtime
            + w.headroom * headroom;

        MatchCandidate {
            supplier_id: supplier.supplier_id.clone(),
            score,
            available_capacity: record.available_capacity(),
            capacity_revision: record.revision,
            performance_score: performance,
            specialization_match: specialization,
            leadtime_fit: leadtime,
            headroom_ratio: headroom,
            reasoning: None,
            advisory_confidence: None,
        }
    }

    fn compare(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.available_capacity.cmp(&a.available_capacity))
            .then_with(|| a.supplier_id.cmp(&b.supplier_id))
    }
}

// ==========================================
// 制造撮合平台 - 履约核心 - 生产阶段领域模型
// ==========================================
// 红线: stage_number 在同一供应商订单内从 1 连续递增
// 红线: completion_percentage < 100 时不得为 completed
// 红线: 阶段只原地更新, 不重排不删除
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::StageStatus;

// ==========================================
// ProductionStage - 生产阶段
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionStage {
    pub supplier_order_id: String,
    pub stage_number: i32,
    pub stage_name: String,
    pub completion_percentage: i32, // 0 - 100
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub target_date: NaiveDate,
    pub notes: Option<String>,
    pub photos: Vec<String>,
    pub revision: i64,
}

impl ProductionStage {
    pub fn new(
        supplier_order_id: String,
        stage_number: i32,
        stage_name: String,
        target_date: NaiveDate,
    ) -> Self {
        Self {
            supplier_order_id,
            stage_number,
            stage_name,
            completion_percentage: 0,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            target_date,
            notes: None,
            photos: Vec::new(),
            revision: 0,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completion_percentage >= 100
    }
}

// ==========================================
// StageTemplate - 阶段模板 (按产品品类)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageTemplate {
    pub product_category: String,
    pub steps: Vec<StageTemplateStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageTemplateStep {
    pub stage_name: String,
    pub estimated_days: i64,
}

impl StageTemplateStep {
    pub fn new(stage_name: impl Into<String>, estimated_days: i64) -> Self {
        Self {
            stage_name: stage_name.into(),
            estimated_days,
        }
    }
}

/// 阶段进度更新请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageUpdate {
    pub stage_number: i32,
    pub completion_percentage: i32,
    pub notes: Option<String>,
    pub photos: Vec<String>,
}

/// 供应商订单整体进度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionProgress {
    pub supplier_order_id: String,
    pub overall_percentage: f64,
    pub current_stage: Option<ProductionStage>,
    pub stage_count: usize,
    pub completed_stages: usize,
}

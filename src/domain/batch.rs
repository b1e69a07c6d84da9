// ==========================================
// 制造撮合平台 - 履约核心 - 批次聚合领域模型
// ==========================================
// 红线: current_quantity ≤ target_quantity (+ 容差)
// 红线: current_style_count ≤ max_styles
// 红线: locked 之后不再接受任何款式/数量变更
// ==========================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::BatchStatus;

// ==========================================
// Batch - 聚合批次
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: String,
    pub product_category: String,

    // ===== 容量 =====
    pub target_quantity: i64,
    pub current_quantity: i64,
    pub max_styles: i32,
    pub current_style_count: i32,

    // ===== 定价 =====
    pub base_price: Decimal, // 单件基准出厂价

    // ===== 生命周期 =====
    pub window_closes_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub revision: i64,
}

impl Batch {
    /// 填充率 (0 - 100+)
    pub fn fill_percentage(&self) -> f64 {
        if self.target_quantity <= 0 {
            return 0.0;
        }
        self.current_quantity as f64 / self.target_quantity as f64 * 100.0
    }

    pub fn is_open(&self) -> bool {
        self.status == BatchStatus::Open
    }

    /// 是否满足锁定条件: 数量达标或窗口关闭
    pub fn should_lock(&self, now: DateTime<Utc>) -> bool {
        self.current_quantity >= self.target_quantity || now >= self.window_closes_at
    }
}

// ==========================================
// BatchMember - 批次成员 (一张买家订单的一个款式)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchMember {
    pub batch_id: String,
    pub order_id: String,
    pub style_key: String,
    pub quantity: i64,
    pub joined_at: DateTime<Utc>,
    pub locked_unit_price: Option<Decimal>, // 批次锁定时冻结的买家单价
}

/// 加入批次请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJoinRequest {
    pub order_id: String,
    pub style_key: String,
    pub quantity: i64,
    pub base_price: Decimal,
}

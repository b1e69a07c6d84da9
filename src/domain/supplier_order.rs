// ==========================================
// 制造撮合平台 - 履约核心 - 供应商订单领域模型
// ==========================================
// 红线: 提交时 quantity ≤ 供应商当日 available_capacity
// 归属: 恰好属于一个 Order 或一个 Batch 切片
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::{AcceptanceStatus, SupplierOrderStatus};

// ==========================================
// SupplierOrderOwner - 归属
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SupplierOrderOwner {
    Order(String),
    Batch(String),
}

impl SupplierOrderOwner {
    pub fn kind_str(&self) -> &'static str {
        match self {
            SupplierOrderOwner::Order(_) => "order",
            SupplierOrderOwner::Batch(_) => "batch",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            SupplierOrderOwner::Order(id) | SupplierOrderOwner::Batch(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: String) -> Option<Self> {
        match kind {
            "order" => Some(SupplierOrderOwner::Order(id)),
            "batch" => Some(SupplierOrderOwner::Batch(id)),
            _ => None,
        }
    }
}

// ==========================================
// SupplierOrder - 供应商订单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplierOrder {
    pub supplier_order_id: String,
    pub owner: SupplierOrderOwner,
    pub supplier_id: String,
    pub product_type: String,
    pub quantity: i64,
    pub target_date: NaiveDate,

    // ===== 状态 =====
    pub acceptance_status: AcceptanceStatus,
    pub status: SupplierOrderStatus,

    // ===== 价格 =====
    pub supplier_price: Option<Decimal>,
    pub counter_offer_price: Option<Decimal>,
    pub counter_offer_note: Option<String>,
    pub rejection_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: i64,
}

impl SupplierOrder {
    /// 由确认的产能分配创建 (pending)
    pub fn new(
        supplier_order_id: String,
        owner: SupplierOrderOwner,
        supplier_id: String,
        product_type: String,
        quantity: i64,
        target_date: NaiveDate,
        supplier_price: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            supplier_order_id,
            owner,
            supplier_id,
            product_type,
            quantity,
            target_date,
            acceptance_status: AcceptanceStatus::Pending,
            status: SupplierOrderStatus::Pending,
            supplier_price,
            counter_offer_price: None,
            counter_offer_note: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }
}

/// 管理员对还价的决定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum CounterOfferDecision {
    Accept,
    Reject { reason: String },
}

// ==========================================
// 制造撮合平台 - 履约核心 - 买家订单领域模型
// ==========================================
// 红线: workflow_status 只前进 (cancelled / on_hold 除外)
// 红线: payment_status 进入已付款状态后 buyer_price 不可变
// 红线: 订单不做物理删除, 只有软状态
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::types::{PaymentStatus, WorkflowStatus};

// ==========================================
// Order - 买家订单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    // ===== 主键 =====
    pub order_id: String,
    pub buyer_id: String,

    // ===== 需求 =====
    pub product_type: String,
    pub quantity: i64,
    pub target_date: NaiveDate,

    // ===== 状态 =====
    pub workflow_status: WorkflowStatus,
    pub hold_from_status: Option<WorkflowStatus>, // on_hold 之前的状态, resume 时恢复
    pub buyer_price: Option<Decimal>,             // 买家单价
    pub payment_status: PaymentStatus,

    // ===== 审计 =====
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub revision: i64, // 乐观锁版本号
}

impl Order {
    /// 报价被接受时创建订单 (初始状态 quote_requested)
    pub fn new(
        order_id: String,
        buyer_id: String,
        product_type: String,
        quantity: i64,
        target_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            buyer_id,
            product_type,
            quantity,
            target_date,
            workflow_status: WorkflowStatus::QuoteRequested,
            hold_from_status: None,
            buyer_price: None,
            payment_status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// 买家价格是否已冻结
    pub fn is_price_locked(&self) -> bool {
        self.payment_status.is_paid()
    }
}

/// 新建订单请求 (已结构化的报价输入)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderRequest {
    pub buyer_id: String,
    pub product_type: String,
    pub quantity: i64,
    pub target_date: NaiveDate,
    pub buyer_price: Option<Decimal>,
}

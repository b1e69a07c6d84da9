// ==========================================
// 制造撮合平台 - 履约核心 - 发票与付款事件
// ==========================================
// 红线: (payment_ref, outcome) 唯一, 重复投递为空操作
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{PaymentOutcome, PaymentType};

/// 发票: 外部付款引用与订单的绑定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub payment_ref: String,
    pub order_id: String,
    pub payment_type: PaymentType,
    pub created_at: DateTime<Utc>,
}

/// 已处理的付款通知
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentEvent {
    pub payment_ref: String,
    pub outcome: PaymentOutcome,
    pub received_at: DateTime<Utc>,
}

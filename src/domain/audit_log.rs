// ==========================================
// 制造撮合平台 - 履约核心 - 审计日志领域模型
// ==========================================
// 红线: 所有状态转换必须追加一条不可变记录
// 用途: 审计追踪, 重复投递事件的幂等识别
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// AuditEntityType - 被审计实体类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Order,
    SupplierOrder,
    ProductionStage,
    Batch,
    Capacity,
    /// 付款状态 (与订单工作流状态分开记录)
    Payment,
}

impl AuditEntityType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AuditEntityType::Order => "order",
            AuditEntityType::SupplierOrder => "supplier_order",
            AuditEntityType::ProductionStage => "production_stage",
            AuditEntityType::Batch => "batch",
            AuditEntityType::Capacity => "capacity",
            AuditEntityType::Payment => "payment",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "order" => Some(AuditEntityType::Order),
            "supplier_order" => Some(AuditEntityType::SupplierOrder),
            "production_stage" => Some(AuditEntityType::ProductionStage),
            "batch" => Some(AuditEntityType::Batch),
            "capacity" => Some(AuditEntityType::Capacity),
            "payment" => Some(AuditEntityType::Payment),
            _ => None,
        }
    }
}

// ==========================================
// AuditRecord - 审计记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub audit_id: String,
    pub entity_type: AuditEntityType,
    pub entity_id: String,
    pub previous_state: Option<String>,
    pub new_state: String,
    pub actor: String, // 形如 admin:alice
    pub event_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub payload_json: Option<JsonValue>,
}

impl AuditRecord {
    pub fn new(
        entity_type: AuditEntityType,
        entity_id: impl Into<String>,
        previous_state: Option<String>,
        new_state: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            audit_id: uuid::Uuid::new_v4().to_string(),
            entity_type,
            entity_id: entity_id.into(),
            previous_state,
            new_state: new_state.into(),
            actor: actor.into(),
            event_id: None,
            recorded_at: Utc::now(),
            payload_json: None,
        }
    }

    pub fn with_event_id(mut self, event_id: Option<&str>) -> Self {
        self.event_id = event_id.map(str::to_string);
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload_json = Some(payload);
        self
    }
}

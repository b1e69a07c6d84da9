// ==========================================
// 制造撮合平台 - 履约核心 - 领域类型定义
// ==========================================
// 职责: 订单/供应商订单/生产阶段/批次的状态枚举与角色枚举
// 序列化格式: snake_case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 买家订单工作流状态 (Workflow Status)
// ==========================================
// 红线: 只能沿主序列前进; cancelled / on_hold 为旁路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    QuoteRequested,
    QuoteSent,
    AdminReview,
    AwaitingPayment,
    PaymentReceived,
    AssignedToSupplier,
    SampleRequested,
    SampleApproved,
    BulkProduction,
    QcInspection,
    ReadyToShip,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
    OnHold,
}

impl WorkflowStatus {
    /// 主序列 (初始 → 终态)
    pub const SEQUENCE: [WorkflowStatus; 14] = [
        WorkflowStatus::QuoteRequested,
        WorkflowStatus::QuoteSent,
        WorkflowStatus::AdminReview,
        WorkflowStatus::AwaitingPayment,
        WorkflowStatus::PaymentReceived,
        WorkflowStatus::AssignedToSupplier,
        WorkflowStatus::SampleRequested,
        WorkflowStatus::SampleApproved,
        WorkflowStatus::BulkProduction,
        WorkflowStatus::QcInspection,
        WorkflowStatus::ReadyToShip,
        WorkflowStatus::Shipped,
        WorkflowStatus::Delivered,
        WorkflowStatus::Completed,
    ];

    /// 主序列中的位置; 旁路状态返回 None
    pub fn ordinal(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| s == self)
    }

    /// 终态: completed / cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
    }

    /// 旁路状态: cancelled / on_hold
    pub fn is_side_state(&self) -> bool {
        matches!(self, WorkflowStatus::Cancelled | WorkflowStatus::OnHold)
    }

    /// 付款前状态 (买家可自行取消)
    pub fn is_pre_payment(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::QuoteRequested
                | WorkflowStatus::QuoteSent
                | WorkflowStatus::AdminReview
                | WorkflowStatus::AwaitingPayment
        )
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            WorkflowStatus::QuoteRequested => "quote_requested",
            WorkflowStatus::QuoteSent => "quote_sent",
            WorkflowStatus::AdminReview => "admin_review",
            WorkflowStatus::AwaitingPayment => "awaiting_payment",
            WorkflowStatus::PaymentReceived => "payment_received",
            WorkflowStatus::AssignedToSupplier => "assigned_to_supplier",
            WorkflowStatus::SampleRequested => "sample_requested",
            WorkflowStatus::SampleApproved => "sample_approved",
            WorkflowStatus::BulkProduction => "bulk_production",
            WorkflowStatus::QcInspection => "qc_inspection",
            WorkflowStatus::ReadyToShip => "ready_to_ship",
            WorkflowStatus::Shipped => "shipped",
            WorkflowStatus::Delivered => "delivered",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::OnHold => "on_hold",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "quote_requested" => Some(WorkflowStatus::QuoteRequested),
            "quote_sent" => Some(WorkflowStatus::QuoteSent),
            "admin_review" => Some(WorkflowStatus::AdminReview),
            "awaiting_payment" => Some(WorkflowStatus::AwaitingPayment),
            "payment_received" => Some(WorkflowStatus::PaymentReceived),
            "assigned_to_supplier" => Some(WorkflowStatus::AssignedToSupplier),
            "sample_requested" => Some(WorkflowStatus::SampleRequested),
            "sample_approved" => Some(WorkflowStatus::SampleApproved),
            "bulk_production" => Some(WorkflowStatus::BulkProduction),
            "qc_inspection" => Some(WorkflowStatus::QcInspection),
            "ready_to_ship" => Some(WorkflowStatus::ReadyToShip),
            "shipped" => Some(WorkflowStatus::Shipped),
            "delivered" => Some(WorkflowStatus::Delivered),
            "completed" => Some(WorkflowStatus::Completed),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            "on_hold" => Some(WorkflowStatus::OnHold),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 付款状态 (Payment Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,      // 未付款
    DepositPaid, // 已付定金
    Paid,        // 已全额付款
    Failed,      // 付款失败
}

impl PaymentStatus {
    /// 是否已进入"已付款"状态 (此后买家价格不可变)
    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::DepositPaid | PaymentStatus::Paid)
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::DepositPaid => "deposit_paid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "deposit_paid" => Some(PaymentStatus::DepositPaid),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 付款类型 / 付款结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Deposit,
    Balance,
    Full,
}

impl PaymentType {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PaymentType::Deposit => "deposit",
            PaymentType::Balance => "balance",
            PaymentType::Full => "full",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(PaymentType::Deposit),
            "balance" => Some(PaymentType::Balance),
            "full" => Some(PaymentType::Full),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

impl PaymentOutcome {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded => "succeeded",
            PaymentOutcome::Failed => "failed",
        }
    }
}

// ==========================================
// 供应商订单: 接单状态 (Acceptance Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Pending,
    Accepted,
    Rejected,
    CounterOffered,
}

impl AcceptanceStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            AcceptanceStatus::Pending => "pending",
            AcceptanceStatus::Accepted => "accepted",
            AcceptanceStatus::Rejected => "rejected",
            AcceptanceStatus::CounterOffered => "counter_offered",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AcceptanceStatus::Pending),
            "accepted" => Some(AcceptanceStatus::Accepted),
            "rejected" => Some(AcceptanceStatus::Rejected),
            "counter_offered" => Some(AcceptanceStatus::CounterOffered),
            _ => None,
        }
    }
}

impl fmt::Display for AcceptanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 供应商订单: 生命周期状态 (Supplier Order Status)
// ==========================================
// 接单子流程: pending → accepted | rejected | counter_offered
// 生产子流程: accepted → in_progress → completed
// 终态: completed / rejected / cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierOrderStatus {
    Pending,
    CounterOffered,
    Accepted,
    InProgress,
    Completed,
    Rejected,
    Cancelled,
}

impl SupplierOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupplierOrderStatus::Completed
                | SupplierOrderStatus::Rejected
                | SupplierOrderStatus::Cancelled
        )
    }

    /// 是否仍占用产能 (拒绝/取消后释放)
    pub fn holds_capacity(&self) -> bool {
        !matches!(
            self,
            SupplierOrderStatus::Rejected | SupplierOrderStatus::Cancelled
        )
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SupplierOrderStatus::Pending => "pending",
            SupplierOrderStatus::CounterOffered => "counter_offered",
            SupplierOrderStatus::Accepted => "accepted",
            SupplierOrderStatus::InProgress => "in_progress",
            SupplierOrderStatus::Completed => "completed",
            SupplierOrderStatus::Rejected => "rejected",
            SupplierOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SupplierOrderStatus::Pending),
            "counter_offered" => Some(SupplierOrderStatus::CounterOffered),
            "accepted" => Some(SupplierOrderStatus::Accepted),
            "in_progress" => Some(SupplierOrderStatus::InProgress),
            "completed" => Some(SupplierOrderStatus::Completed),
            "rejected" => Some(SupplierOrderStatus::Rejected),
            "cancelled" => Some(SupplierOrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SupplierOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 生产阶段状态 (Stage Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
}

impl StageStatus {
    /// 由完成百分比推导阶段状态
    ///
    /// 红线: completed 当且仅当 completion_percentage == 100
    pub fn from_percentage(pct: i32) -> Self {
        if pct >= 100 {
            StageStatus::Completed
        } else if pct > 0 {
            StageStatus::InProgress
        } else {
            StageStatus::Pending
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Completed => "completed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StageStatus::Pending),
            "in_progress" => Some(StageStatus::InProgress),
            "completed" => Some(StageStatus::Completed),
            _ => None,
        }
    }
}

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
// open → locked → assigned, 锁定后不再接受任何变更
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Open,
    Locked,
    Assigned,
}

impl BatchStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            BatchStatus::Open => "open",
            BatchStatus::Locked => "locked",
            BatchStatus::Assigned => "assigned",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(BatchStatus::Open),
            "locked" => Some(BatchStatus::Locked),
            "assigned" => Some(BatchStatus::Assigned),
            _ => None,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

// ==========================================
// 操作者角色 (Actor Role)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Buyer,
    Supplier,
    Admin,
    System,
}

impl ActorRole {
    /// 管理员或系统 (可推进 admin_review 之后的状态)
    pub fn is_privileged(&self) -> bool {
        matches!(self, ActorRole::Admin | ActorRole::System)
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ActorRole::Buyer => "buyer",
            ActorRole::Supplier => "supplier",
            ActorRole::Admin => "admin",
            ActorRole::System => "system",
        }
    }
}

/// 操作者 (角色 + 标识)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub role: ActorRole,
    pub id: String,
}

impl Actor {
    pub fn new(role: ActorRole, id: impl Into<String>) -> Self {
        Self { role, id: id.into() }
    }

    pub fn buyer(id: impl Into<String>) -> Self {
        Self::new(ActorRole::Buyer, id)
    }

    pub fn supplier(id: impl Into<String>) -> Self {
        Self::new(ActorRole::Supplier, id)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(ActorRole::Admin, id)
    }

    pub fn system() -> Self {
        Self::new(ActorRole::System, "system")
    }

    /// 审计日志中的展示形式, 例如 `admin:alice`
    pub fn audit_label(&self) -> String {
        format!("{}:{}", self.role.to_db_str(), self.id)
    }
}

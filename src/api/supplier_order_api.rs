// ==========================================
// 制造撮合平台 - 履约核心 - 供应商订单 API
// ==========================================
// 职责: 接单 / 拒绝 / 还价 / 裁决 / 取消, 以及由此引起的连带变更
//   - 进入 accepted: 按品类模板生成生产阶段, 尝试把买家订单推进到 bulk_production
//   - 进入 rejected / cancelled: 同一事务内释放产能
//   - 进入 completed: 尝试把买家订单推进到 qc_inspection
// ==========================================

use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::assignment_api::release_capacity_in;
use crate::api::error::{ApiError, ApiResult};
use crate::api::workflow::{audit_supplier_order_in, forward_to_bulk_production_in, forward_to_qc_in};
use crate::db::{run_in_transaction, SharedConnection};
use crate::domain::supplier_order::{CounterOfferDecision, SupplierOrder, SupplierOrderOwner};
use crate::domain::types::{Actor, SupplierOrderStatus};
use crate::engine::events::{DomainEvent, EventBus};
use crate::engine::production_tracker::ProductionStageTracker;
use crate::engine::supplier_order_state_machine::{SupplierOrderCommand, SupplierOrderStateMachine};
use crate::repository::{ProductionStageRepository, StageTemplateRepository, SupplierOrderRepository};

// ==========================================
// SupplierOrderApi
// ==========================================
pub struct SupplierOrderApi {
    conn: SharedConnection,
    so_repo: Arc<SupplierOrderRepository>,
    events: Arc<EventBus>,
}

impl SupplierOrderApi {
    pub fn new(conn: SharedConnection, events: Arc<EventBus>) -> Self {
        Self {
            so_repo: Arc::new(SupplierOrderRepository::new(conn.clone())),
            conn,
            events,
        }
    }

    pub fn get(&self, supplier_order_id: &str) -> ApiResult<SupplierOrder> {
        self.so_repo
            .find_by_id(supplier_order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("SupplierOrder(id={}) 不存在", supplier_order_id)))
    }

    pub fn list_for_owner(&self, owner: &SupplierOrderOwner) -> ApiResult<Vec<SupplierOrder>> {
        Ok(self.so_repo.find_by_owner(owner)?)
    }

    pub fn list_for_supplier(&self, supplier_id: &str) -> ApiResult<Vec<SupplierOrder>> {
        Ok(self.so_repo.list_by_supplier(supplier_id)?)
    }

    // ==========================================
    // 命令
    // ==========================================

    pub fn accept(&self, supplier_order_id: &str, actor: &Actor) -> ApiResult<SupplierOrder> {
        self.execute(supplier_order_id, &SupplierOrderCommand::Accept, actor)
    }

    pub fn reject(&self, supplier_order_id: &str, reason: Option<String>, actor: &Actor) -> ApiResult<SupplierOrder> {
        self.execute(supplier_order_id, &SupplierOrderCommand::Reject { reason }, actor)
    }

    pub fn counter_offer(
        &self,
        supplier_order_id: &str,
        price: Decimal,
        note: Option<String>,
        actor: &Actor,
    ) -> ApiResult<SupplierOrder> {
        self.execute(supplier_order_id, &SupplierOrderCommand::CounterOffer { price, note }, actor)
    }

    /// 管理员裁决还价
    pub fn decide_counter_offer(
        &self,
        supplier_order_id: &str,
        decision: CounterOfferDecision,
        actor: &Actor,
    ) -> ApiResult<SupplierOrder> {
        self.execute(supplier_order_id, &SupplierOrderCommand::DecideCounterOffer(decision), actor)
    }

    pub fn cancel(&self, supplier_order_id: &str, reason: Option<String>, actor: &Actor) -> ApiResult<SupplierOrder> {
        self.execute(supplier_order_id, &SupplierOrderCommand::Cancel { reason }, actor)
    }

    /// 执行任意命令 (单事务), 提交后发布事件
    pub fn execute(
        &self,
        supplier_order_id: &str,
        command: &SupplierOrderCommand,
        actor: &Actor,
    ) -> ApiResult<SupplierOrder> {
        let (so, events) = run_in_transaction(&self.conn, |tx| -> ApiResult<_> {
            let current = SupplierOrderRepository::get_in(tx, supplier_order_id)?;
            apply_command_in(tx, &current, command, actor)
        })?;
        self.events.publish_all(&events);
        Ok(so)
    }
}

/// 事务内: 应用命令 + CAS 写入 + 审计 + 连带变更
pub(crate) fn apply_command_in(
    conn: &Connection,
    current: &SupplierOrder,
    command: &SupplierOrderCommand,
    actor: &Actor,
) -> ApiResult<(SupplierOrder, Vec<DomainEvent>)> {
    // 完工只由阶段全部达到 100% 推导
    if matches!(command, SupplierOrderCommand::Complete) {
        let stages = ProductionStageRepository::find_by_supplier_order_in(conn, &current.supplier_order_id)?;
        if !ProductionStageTracker::is_complete(&stages) {
            return Err(ApiError::state(
                "SupplierOrder",
                current.status,
                SupplierOrderStatus::Completed,
                format!(
                    "生产阶段未全部完成 (整体进度 {:.0}%)",
                    ProductionStageTracker::overall_progress(&stages)
                ),
            ));
        }
    }

    let mut next = SupplierOrderStateMachine::apply(current, command, actor)?;
    next.revision = SupplierOrderRepository::update_in(conn, &next)?;
    audit_supplier_order_in(conn, current, &next, actor, command.name())?;

    info!(
        supplier_order_id = %next.supplier_order_id,
        command = command.name(),
        from = %current.status,
        to = %next.status,
        actor = %actor.audit_label(),
        "供应商订单已更新"
    );

    let mut events = vec![DomainEvent::SupplierOrderTransitioned {
        supplier_order_id: next.supplier_order_id.clone(),
        from: current.status.to_string(),
        to: next.status.to_string(),
        actor: actor.audit_label(),
    }];

    match next.status {
        SupplierOrderStatus::Accepted if current.status != SupplierOrderStatus::Accepted => {
            instantiate_stages_in(conn, &next)?;
            events.extend(forward_to_bulk_production_in(conn, &next.owner)?);
        }
        SupplierOrderStatus::Rejected | SupplierOrderStatus::Cancelled if current.status.holds_capacity() => {
            events.push(release_capacity_in(conn, &next)?);
        }
        SupplierOrderStatus::Completed => {
            events.extend(forward_to_qc_in(conn, &next.owner)?);
        }
        _ => {}
    }

    Ok((next, events))
}

/// 按品类模板生成阶段 (无模板用默认五阶段); 已存在则不重复生成
fn instantiate_stages_in(conn: &Connection, so: &SupplierOrder) -> ApiResult<()> {
    if !ProductionStageRepository::find_by_supplier_order_in(conn, &so.supplier_order_id)?.is_empty() {
        debug!(supplier_order_id = %so.supplier_order_id, "生产阶段已存在, 跳过生成");
        return Ok(());
    }

    let category = ProductionStageTracker::product_category(&so.product_type);
    let steps = StageTemplateRepository::find_by_category_in(conn, category)?
        .map(|t| t.steps)
        .unwrap_or_else(ProductionStageTracker::default_template);
    let stages = ProductionStageTracker::instantiate(&so.supplier_order_id, &steps, Utc::now())?;
    let inserted = ProductionStageRepository::insert_all_in(conn, &stages)?;

    info!(
        supplier_order_id = %so.supplier_order_id,
        category,
        stages = inserted,
        "生产阶段已生成"
    );
    Ok(())
}

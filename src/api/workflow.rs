// ==========================================
// 制造撮合平台 - 履约核心 - 事务内流程助手
// ==========================================
// 职责: 多个 API 共用的事务内步骤
//   - 订单状态转换 (校验 + CAS 写入 + 审计)
//   - 供应商订单状态回传到买家订单 (bulk_production / qc_inspection)
// 红线: 只接受 &Connection (调用方已持有事务), 不自行加锁
// ==========================================

use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::audit_log::{AuditEntityType, AuditRecord};
use crate::domain::order::Order;
use crate::domain::supplier_order::{SupplierOrder, SupplierOrderOwner};
use crate::domain::types::{Actor, SupplierOrderStatus, WorkflowStatus};
use crate::engine::events::DomainEvent;
use crate::engine::order_state_machine::{OrderGuardContext, OrderStateMachine, OrderTransition};
use crate::repository::{AuditLogRepository, BatchRepository, OrderRepository, SupplierOrderRepository};

/// 非特权操作者直接拒绝
pub(crate) fn ensure_privileged(actor: &Actor, action: &str) -> ApiResult<()> {
    if actor.role.is_privileged() {
        Ok(())
    } else {
        Err(ApiError::PermissionDenied(format!(
            "{} 无权执行 {}",
            actor.audit_label(),
            action
        )))
    }
}

/// 订单相关的全部存活供应商订单 (直属 + 所在批次的)
pub(crate) fn live_supplier_orders_for_order_in(
    conn: &Connection,
    order_id: &str,
) -> ApiResult<Vec<SupplierOrder>> {
    let mut all = SupplierOrderRepository::find_by_owner_in(conn, &SupplierOrderOwner::Order(order_id.to_string()))?;
    if let Some(batch_id) = BatchRepository::batch_id_for_order_in(conn, order_id)? {
        all.extend(SupplierOrderRepository::find_by_owner_in(
            conn,
            &SupplierOrderOwner::Batch(batch_id),
        )?);
    }
    all.retain(|so| so.status.holds_capacity());
    Ok(all)
}

fn is_accepted_or_later(so: &SupplierOrder) -> bool {
    matches!(
        so.status,
        SupplierOrderStatus::Accepted | SupplierOrderStatus::InProgress | SupplierOrderStatus::Completed
    )
}

/// 供应商订单的归属 → 受影响的买家订单
pub(crate) fn orders_for_owner_in(conn: &Connection, owner: &SupplierOrderOwner) -> ApiResult<Vec<String>> {
    match owner {
        SupplierOrderOwner::Order(order_id) => Ok(vec![order_id.clone()]),
        SupplierOrderOwner::Batch(batch_id) => Ok(BatchRepository::find_members_in(conn, batch_id)?
            .into_iter()
            .map(|m| m.order_id)
            .collect()),
    }
}

/// 写入一次已规划的转换并记审计, 返回更新后的订单与事件
fn write_order_transition_in(
    conn: &Connection,
    order: &Order,
    transition: OrderTransition,
    actor: &Actor,
    event_id: Option<&str>,
) -> ApiResult<(Order, DomainEvent)> {
    let mut next = order.clone();
    transition.apply_to(&mut next);
    next.revision = OrderRepository::update_in(conn, &next)?;

    AuditLogRepository::insert_in(
        conn,
        &AuditRecord::new(
            AuditEntityType::Order,
            &next.order_id,
            Some(transition.from.to_string()),
            transition.to.to_string(),
            actor.audit_label(),
        )
        .with_event_id(event_id),
    )?;

    info!(
        order_id = %next.order_id,
        from = %transition.from,
        to = %transition.to,
        actor = %actor.audit_label(),
        "订单状态已转换"
    );

    let event = DomainEvent::OrderTransitioned {
        order_id: next.order_id.clone(),
        from: transition.from.to_string(),
        to: transition.to.to_string(),
        actor: actor.audit_label(),
        event_id: event_id.map(str::to_string),
    };
    Ok((next, event))
}

/// 校验并执行订单转换 (前进 / 取消 / 挂起)
pub(crate) fn move_order_in(
    conn: &Connection,
    order: &Order,
    target: WorkflowStatus,
    actor: &Actor,
    event_id: Option<&str>,
) -> ApiResult<(Order, DomainEvent)> {
    let accepted = live_supplier_orders_for_order_in(conn, &order.order_id)?
        .iter()
        .filter(|so| is_accepted_or_later(so))
        .count();
    let ctx = OrderGuardContext::for_order(order, accepted);
    let transition = OrderStateMachine::plan(order, target, actor, &ctx)?;
    write_order_transition_in(conn, order, transition, actor, event_id)
}

/// 从挂起恢复
pub(crate) fn resume_order_in(
    conn: &Connection,
    order: &Order,
    actor: &Actor,
    event_id: Option<&str>,
) -> ApiResult<(Order, DomainEvent)> {
    let transition = OrderStateMachine::plan_resume(order, actor)?;
    write_order_transition_in(conn, order, transition, actor, event_id)
}

/// 所有存活供应商订单都已接单时, 把买家订单推进到 bulk_production
pub(crate) fn forward_to_bulk_production_in(
    conn: &Connection,
    owner: &SupplierOrderOwner,
) -> ApiResult<Vec<DomainEvent>> {
    forward_orders_in(conn, owner, WorkflowStatus::BulkProduction, |order, sos| {
        let before_bulk = matches!(
            (order.workflow_status.ordinal(), WorkflowStatus::BulkProduction.ordinal()),
            (Some(cur), Some(bulk)) if cur < bulk
        );
        before_bulk && sos.iter().all(is_accepted_or_later)
    })
}

/// 所有存活供应商订单都已完工且订单处于 bulk_production 时, 推进到 qc_inspection
pub(crate) fn forward_to_qc_in(conn: &Connection, owner: &SupplierOrderOwner) -> ApiResult<Vec<DomainEvent>> {
    forward_orders_in(conn, owner, WorkflowStatus::QcInspection, |order, sos| {
        order.workflow_status == WorkflowStatus::BulkProduction
            && sos.iter().all(|so| so.status == SupplierOrderStatus::Completed)
    })
}

/// 守卫不满足 (如尚未付款) 时跳过并记 warn, 不影响供应商订单本身的变更
fn forward_orders_in<F>(
    conn: &Connection,
    owner: &SupplierOrderOwner,
    target: WorkflowStatus,
    ready: F,
) -> ApiResult<Vec<DomainEvent>>
where
    F: Fn(&Order, &[SupplierOrder]) -> bool,
{
    let system = Actor::system();
    let mut events = Vec::new();

    for order_id in orders_for_owner_in(conn, owner)? {
        let order = OrderRepository::get_in(conn, &order_id)?;
        let sos = live_supplier_orders_for_order_in(conn, &order_id)?;
        if sos.is_empty() || !ready(&order, &sos) {
            continue;
        }

        match move_order_in(conn, &order, target, &system, None) {
            Ok((_, event)) => events.push(event),
            Err(ApiError::InvalidStateTransition { reason, .. }) => {
                warn!(
                    order_id = %order_id,
                    from = %order.workflow_status,
                    to = %target,
                    reason = %reason,
                    "订单自动推进被守卫拦截, 等待人工处理"
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok(events)
}

/// 供应商订单审计
pub(crate) fn audit_supplier_order_in(
    conn: &Connection,
    before: &SupplierOrder,
    after: &SupplierOrder,
    actor: &Actor,
    command: &str,
) -> ApiResult<()> {
    AuditLogRepository::insert_in(
        conn,
        &AuditRecord::new(
            AuditEntityType::SupplierOrder,
            &after.supplier_order_id,
            Some(before.status.to_string()),
            after.status.to_string(),
            actor.audit_label(),
        )
        .with_payload(json!({
            "command": command,
            "supplier_price": after.supplier_price.map(|p| p.to_string()),
            "counter_offer_price": after.counter_offer_price.map(|p| p.to_string()),
            "reason": after.rejection_reason,
        })),
    )?;
    Ok(())
}

// ==========================================
// 制造撮合平台 - 履约核心 - 买家订单 API
// ==========================================
// 职责: 订单创建、状态转换 (含挂起/恢复/取消)、买家价格、发票与付款事件
// 红线: 每次转换单事务完成 (校验 → CAS 写入 → 审计), 提交后再发布事件
// 红线: 带 event_id 的转换幂等, 重复投递返回 applied = false
// ==========================================

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::workflow::{ensure_privileged, move_order_in, resume_order_in};
use crate::db::{run_in_transaction, SharedConnection};
use crate::domain::audit_log::{AuditEntityType, AuditRecord};
use crate::domain::order::{NewOrderRequest, Order};
use crate::domain::payment::{Invoice, PaymentEvent};
use crate::domain::types::{
    Actor, ActorRole, PaymentOutcome, PaymentStatus, PaymentType, WorkflowStatus,
};
use crate::engine::events::{DomainEvent, EventBus};
use crate::repository::{AuditLogRepository, OrderRepository, PaymentRepository};

/// 转换结果; applied = false 表示重复事件, 未做任何变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub order: Order,
    pub applied: bool,
}

/// 付款事件处理结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecordOutcome {
    pub order: Order,
    pub applied: bool,
}

// ==========================================
// OrderApi
// ==========================================
pub struct OrderApi {
    conn: SharedConnection,
    order_repo: Arc<OrderRepository>,
    payment_repo: Arc<PaymentRepository>,
    audit_repo: Arc<AuditLogRepository>,
    events: Arc<EventBus>,
}

impl OrderApi {
    pub fn new(conn: SharedConnection, events: Arc<EventBus>) -> Self {
        Self {
            order_repo: Arc::new(OrderRepository::new(conn.clone())),
            payment_repo: Arc::new(PaymentRepository::new(conn.clone())),
            audit_repo: Arc::new(AuditLogRepository::new(conn.clone())),
            conn,
            events,
        }
    }

    // ==========================================
    // 创建与查询
    // ==========================================

    /// 创建询价订单 (quote_requested)
    ///
    /// 买家只能为自己下单; 管理员/系统可代下单
    pub fn create_order(&self, req: NewOrderRequest, actor: &Actor) -> ApiResult<Order> {
        match actor.role {
            ActorRole::Buyer if actor.id == req.buyer_id => {}
            ActorRole::Admin | ActorRole::System => {}
            _ => {
                return Err(ApiError::PermissionDenied(format!(
                    "{} 不能为买家 {} 下单",
                    actor.audit_label(),
                    req.buyer_id
                )))
            }
        }
        if req.quantity <= 0 {
            return Err(ApiError::Validation(format!("订单数量必须为正: {}", req.quantity)));
        }
        if req.product_type.trim().is_empty() || req.buyer_id.trim().is_empty() {
            return Err(ApiError::Validation("买家与产品类型不能为空".to_string()));
        }
        if let Some(price) = req.buyer_price {
            if price.is_sign_negative() {
                return Err(ApiError::Validation(format!("买家价格不能为负: {}", price)));
            }
        }

        let mut order = Order::new(
            Uuid::new_v4().to_string(),
            req.buyer_id,
            req.product_type,
            req.quantity,
            req.target_date,
        );
        order.buyer_price = req.buyer_price;

        run_in_transaction(&self.conn, |tx| -> ApiResult<()> {
            OrderRepository::insert_in(tx, &order)?;
            AuditLogRepository::insert_in(
                tx,
                &AuditRecord::new(
                    AuditEntityType::Order,
                    &order.order_id,
                    None,
                    order.workflow_status.to_string(),
                    actor.audit_label(),
                )
                .with_payload(json!({ "quantity": order.quantity, "product_type": order.product_type })),
            )?;
            Ok(())
        })?;

        info!(order_id = %order.order_id, buyer_id = %order.buyer_id, qty = order.quantity, "订单已创建");
        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> ApiResult<Order> {
        self.order_repo
            .find_by_id(order_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Order(id={}) 不存在", order_id)))
    }

    pub fn list_orders_by_status(&self, status: WorkflowStatus) -> ApiResult<Vec<Order>> {
        Ok(self.order_repo.list_by_status(status)?)
    }

    /// 订单审计轨迹 (按时间先后)
    pub fn history(&self, order_id: &str) -> ApiResult<Vec<AuditRecord>> {
        Ok(self.audit_repo.find_by_entity(AuditEntityType::Order, order_id)?)
    }

    /// 付款状态轨迹; 状态列为 payment_status
    pub fn payment_history(&self, order_id: &str) -> ApiResult<Vec<AuditRecord>> {
        Ok(self.audit_repo.find_by_entity(AuditEntityType::Payment, order_id)?)
    }

    // ==========================================
    // 状态转换
    // ==========================================

    /// 转换订单状态 (前进 / 取消 / 挂起)
    ///
    /// # 参数
    /// - event_id: 触发事件 ID; 同一订单重复的 event_id 为空操作
    ///
    /// # 错误
    /// - InvalidStateTransition: 非法转换或守卫不满足
    /// - PermissionDenied: 操作者无权
    /// - NotFound: 订单不存在
    pub fn transition(
        &self,
        order_id: &str,
        target: WorkflowStatus,
        actor: &Actor,
        event_id: Option<&str>,
    ) -> ApiResult<TransitionOutcome> {
        self.apply(order_id, actor, event_id, |tx, order| {
            move_order_in(tx, order, target, actor, event_id)
        })
    }

    pub fn cancel(&self, order_id: &str, actor: &Actor, event_id: Option<&str>) -> ApiResult<TransitionOutcome> {
        self.transition(order_id, WorkflowStatus::Cancelled, actor, event_id)
    }

    pub fn hold(&self, order_id: &str, actor: &Actor, event_id: Option<&str>) -> ApiResult<TransitionOutcome> {
        self.transition(order_id, WorkflowStatus::OnHold, actor, event_id)
    }

    /// 从挂起恢复到挂起前状态
    pub fn resume(&self, order_id: &str, actor: &Actor, event_id: Option<&str>) -> ApiResult<TransitionOutcome> {
        self.apply(order_id, actor, event_id, |tx, order| resume_order_in(tx, order, actor, event_id))
    }

    fn apply<F>(
        &self,
        order_id: &str,
        actor: &Actor,
        event_id: Option<&str>,
        step: F,
    ) -> ApiResult<TransitionOutcome>
    where
        F: FnOnce(&rusqlite::Connection, &Order) -> ApiResult<(Order, DomainEvent)>,
    {
        if let Some(eid) = event_id {
            if eid.trim().is_empty() {
                return Err(ApiError::Validation("event_id 不能为空串".to_string()));
            }
        }

        let (outcome, event) = run_in_transaction(&self.conn, |tx| -> ApiResult<_> {
            let order = OrderRepository::get_in(tx, order_id)?;
            if let Some(eid) = event_id {
                if AuditLogRepository::find_by_event_id_in(tx, AuditEntityType::Order, order_id, eid)?.is_some() {
                    debug!(order_id, event_id = eid, actor = %actor.audit_label(), "重复事件, 跳过转换");
                    return Ok((TransitionOutcome { order, applied: false }, None));
                }
            }
            let (next, event) = step(tx, &order)?;
            Ok((TransitionOutcome { order: next, applied: true }, Some(event)))
        })?;

        if let Some(event) = event {
            self.events.publish(&event);
        }
        Ok(outcome)
    }

    // ==========================================
    // 价格与付款
    // ==========================================

    /// 更新买家单价; 付款后价格锁定
    pub fn update_buyer_price(&self, order_id: &str, price: Decimal, actor: &Actor) -> ApiResult<Order> {
        ensure_privileged(actor, "update_buyer_price")?;
        if price <= Decimal::ZERO {
            return Err(ApiError::Validation(format!("买家价格必须为正: {}", price)));
        }

        let updated = run_in_transaction(&self.conn, |tx| -> ApiResult<Order> {
            let mut order = OrderRepository::get_in(tx, order_id)?;
            if order.is_price_locked() || order.workflow_status.is_terminal() {
                return Err(ApiError::state(
                    "Order",
                    order.payment_status,
                    "update_buyer_price",
                    "订单已付款或已结束, 价格锁定",
                ));
            }
            let previous = order.buyer_price;
            order.buyer_price = Some(price);
            order.updated_at = Utc::now();
            order.revision = OrderRepository::update_in(tx, &order)?;

            AuditLogRepository::insert_in(
                tx,
                &AuditRecord::new(
                    AuditEntityType::Order,
                    order_id,
                    Some(order.workflow_status.to_string()),
                    order.workflow_status.to_string(),
                    actor.audit_label(),
                )
                .with_payload(json!({
                    "buyer_price_from": previous.map(|p| p.to_string()),
                    "buyer_price_to": price.to_string(),
                })),
            )?;
            Ok(order)
        })?;

        info!(order_id, price = %price, "买家价格已更新");
        Ok(updated)
    }

    /// 登记发票: 把外部付款引用绑定到订单
    pub fn register_invoice(
        &self,
        order_id: &str,
        payment_ref: &str,
        payment_type: PaymentType,
        actor: &Actor,
    ) -> ApiResult<Invoice> {
        ensure_privileged(actor, "register_invoice")?;
        if payment_ref.trim().is_empty() {
            return Err(ApiError::Validation("payment_ref 不能为空".to_string()));
        }
        self.get_order(order_id)?;

        let invoice = Invoice {
            payment_ref: payment_ref.to_string(),
            order_id: order_id.to_string(),
            payment_type,
            created_at: Utc::now(),
        };
        self.payment_repo.insert_invoice(&invoice)?;
        info!(order_id, payment_ref, payment_type = payment_type.to_db_str(), "发票已登记");
        Ok(invoice)
    }

    /// 处理付款网关通知
    ///
    /// (payment_ref, outcome) 重复投递为空操作。成功的定金/全款把
    /// awaiting_payment 的订单推进到 payment_received; 尾款标记为已付清
    pub fn record_payment_event(
        &self,
        payment_ref: &str,
        outcome: PaymentOutcome,
    ) -> ApiResult<PaymentRecordOutcome> {
        let system = Actor::system();
        let event_id = format!("payment:{}:{}", payment_ref, outcome.to_db_str());

        let (result, events) = run_in_transaction(&self.conn, |tx| -> ApiResult<_> {
            let invoice = PaymentRepository::find_invoice_in(tx, payment_ref)?
                .ok_or_else(|| ApiError::NotFound(format!("Invoice(payment_ref={}) 不存在", payment_ref)))?;
            let mut order = OrderRepository::get_in(tx, &invoice.order_id)?;

            let fresh = PaymentRepository::insert_event_in(
                tx,
                &PaymentEvent {
                    payment_ref: payment_ref.to_string(),
                    outcome,
                    received_at: Utc::now(),
                },
            )?;
            if !fresh {
                debug!(payment_ref, outcome = outcome.to_db_str(), "重复付款通知, 跳过");
                return Ok((PaymentRecordOutcome { order, applied: false }, Vec::new()));
            }

            let previous = order.payment_status;
            let next_status = match (outcome, invoice.payment_type) {
                (PaymentOutcome::Succeeded, PaymentType::Deposit) if previous != PaymentStatus::Paid => {
                    PaymentStatus::DepositPaid
                }
                (PaymentOutcome::Succeeded, PaymentType::Deposit) => previous,
                (PaymentOutcome::Succeeded, _) => PaymentStatus::Paid,
                (PaymentOutcome::Failed, _) if previous.is_paid() => previous,
                (PaymentOutcome::Failed, _) => PaymentStatus::Failed,
            };

            let mut events = vec![DomainEvent::PaymentRecorded {
                payment_ref: payment_ref.to_string(),
                order_id: order.order_id.clone(),
                outcome: outcome.to_db_str().to_string(),
            }];

            if next_status != previous {
                order.payment_status = next_status;
                order.updated_at = Utc::now();
                order.revision = OrderRepository::update_in(tx, &order)?;
            }
            AuditLogRepository::insert_in(
                tx,
                &AuditRecord::new(
                    AuditEntityType::Payment,
                    &order.order_id,
                    Some(previous.to_string()),
                    next_status.to_string(),
                    system.audit_label(),
                )
                .with_event_id(Some(&event_id))
                .with_payload(json!({
                    "payment_ref": payment_ref,
                    "payment_type": invoice.payment_type.to_db_str(),
                    "outcome": outcome.to_db_str(),
                })),
            )?;

            let opens_production = matches!(invoice.payment_type, PaymentType::Deposit | PaymentType::Full);
            if outcome == PaymentOutcome::Succeeded
                && opens_production
                && order.workflow_status == WorkflowStatus::AwaitingPayment
            {
                let (moved, event) = move_order_in(tx, &order, WorkflowStatus::PaymentReceived, &system, None)?;
                order = moved;
                events.push(event);
            }

            Ok((PaymentRecordOutcome { order, applied: true }, events))
        })?;

        if result.applied {
            info!(
                payment_ref,
                order_id = %result.order.order_id,
                payment_status = %result.order.payment_status,
                "付款事件已处理"
            );
        }
        self.events.publish_all(&events);
        Ok(result)
    }
}

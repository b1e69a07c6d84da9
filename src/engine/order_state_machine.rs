// ==========================================
// 制造撮合平台 - 履约核心 - 买家订单状态机
// ==========================================
// 主序列: quote_requested → ... → completed
// 旁路: cancelled / on_hold (任意非终态可达)
// 红线: 只前进; 跨越 payment_received 需已付款, 跨越 assigned_to_supplier 需已接单
// 红线: 买家只能在付款前取消; 供应商不能直接推进订单
// ==========================================

use serde::{Deserialize, Serialize};

use crate::domain::order::Order;
use crate::domain::types::{Actor, ActorRole, PaymentStatus, WorkflowStatus};
use crate::engine::error::{EngineError, EngineResult};

const ENTITY: &str = "Order";

/// 守卫条件所需的外部事实
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderGuardContext {
    pub payment_status: Option<PaymentStatus>,
    /// 处于 accepted 及之后 (in_progress/completed) 的供应商订单数
    pub accepted_supplier_orders: usize,
}

impl OrderGuardContext {
    pub fn for_order(order: &Order, accepted_supplier_orders: usize) -> Self {
        Self {
            payment_status: Some(order.payment_status),
            accepted_supplier_orders,
        }
    }
}

/// 一次已校验的状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTransition {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub hold_from_status: Option<WorkflowStatus>,
}

impl OrderTransition {
    /// 把转换写到订单上 (不改 revision)
    pub fn apply_to(&self, order: &mut Order) {
        order.workflow_status = self.to;
        order.hold_from_status = self.hold_from_status;
        order.updated_at = chrono::Utc::now();
    }
}

pub struct OrderStateMachine;

impl OrderStateMachine {
    /// 校验并规划一次转换 (前进 / 取消 / 挂起)
    ///
    /// 恢复挂起请用 [`OrderStateMachine::plan_resume`]
    pub fn plan(
        order: &Order,
        target: WorkflowStatus,
        actor: &Actor,
        ctx: &OrderGuardContext,
    ) -> EngineResult<OrderTransition> {
        let from = order.workflow_status;
        if from.is_terminal() {
            return Err(EngineError::transition(ENTITY, from, target, "订单已处于终态"));
        }
        if actor.role == ActorRole::Supplier {
            return Err(Self::denied(actor, target));
        }

        match target {
            WorkflowStatus::Cancelled => Self::plan_cancel(order, actor),
            WorkflowStatus::OnHold => Self::plan_hold(order, actor),
            _ => Self::plan_advance(order, target, actor, ctx),
        }
    }

    /// 从 on_hold 恢复到被打断的状态
    pub fn plan_resume(order: &Order, actor: &Actor) -> EngineResult<OrderTransition> {
        let from = order.workflow_status;
        if !actor.role.is_privileged() {
            return Err(EngineError::PermissionDenied {
                actor: actor.audit_label(),
                action: "resume".to_string(),
            });
        }
        if from != WorkflowStatus::OnHold {
            return Err(EngineError::transition(ENTITY, from, "resume", "订单未处于挂起状态"));
        }
        let previous = order.hold_from_status.ok_or_else(|| {
            EngineError::transition(ENTITY, from, "resume", "缺少挂起前状态记录")
        })?;

        Ok(OrderTransition {
            from,
            to: previous,
            hold_from_status: None,
        })
    }

    fn plan_cancel(order: &Order, actor: &Actor) -> EngineResult<OrderTransition> {
        let from = order.workflow_status;
        if actor.role == ActorRole::Buyer {
            // 挂起中的订单按挂起前状态判断
            let effective = if from == WorkflowStatus::OnHold {
                order.hold_from_status.unwrap_or(from)
            } else {
                from
            };
            if !effective.is_pre_payment() {
                return Err(EngineError::PermissionDenied {
                    actor: actor.audit_label(),
                    action: format!("cancel from {}", effective),
                });
            }
            if actor.id != order.buyer_id {
                return Err(Self::denied(actor, WorkflowStatus::Cancelled));
            }
        }

        Ok(OrderTransition {
            from,
            to: WorkflowStatus::Cancelled,
            hold_from_status: None,
        })
    }

    fn plan_hold(order: &Order, actor: &Actor) -> EngineResult<OrderTransition> {
        let from = order.workflow_status;
        if !actor.role.is_privileged() {
            return Err(Self::denied(actor, WorkflowStatus::OnHold));
        }
        if from == WorkflowStatus::OnHold {
            return Err(EngineError::transition(ENTITY, from, WorkflowStatus::OnHold, "订单已挂起"));
        }

        Ok(OrderTransition {
            from,
            to: WorkflowStatus::OnHold,
            hold_from_status: Some(from),
        })
    }

    fn plan_advance(
        order: &Order,
        target: WorkflowStatus,
        actor: &Actor,
        ctx: &OrderGuardContext,
    ) -> EngineResult<OrderTransition> {
        let from = order.workflow_status;
        if !actor.role.is_privileged() {
            return Err(Self::denied(actor, target));
        }
        if from == WorkflowStatus::OnHold {
            return Err(EngineError::transition(ENTITY, from, target, "挂起中的订单需先恢复"));
        }

        let (from_ord, to_ord) = match (from.ordinal(), target.ordinal()) {
            (Some(f), Some(t)) => (f, t),
            _ => return Err(EngineError::transition(ENTITY, from, target, "不在主序列上")),
        };
        if to_ord <= from_ord {
            return Err(EngineError::transition(ENTITY, from, target, "状态只能前进"));
        }

        // 守卫: 对跨越的每个门槛都生效
        if Self::crosses(from_ord, to_ord, WorkflowStatus::PaymentReceived)
            && !ctx.payment_status.map(|p| p.is_paid()).unwrap_or(false)
        {
            return Err(EngineError::transition(ENTITY, from, target, "尚未收到付款确认"));
        }
        if Self::crosses(from_ord, to_ord, WorkflowStatus::AssignedToSupplier)
            && ctx.accepted_supplier_orders == 0
        {
            return Err(EngineError::transition(ENTITY, from, target, "没有已接单的供应商订单"));
        }

        Ok(OrderTransition {
            from,
            to: target,
            hold_from_status: None,
        })
    }

    /// from < gate ≤ to
    fn crosses(from_ord: usize, to_ord: usize, gate: WorkflowStatus) -> bool {
        match gate.ordinal() {
            Some(g) => from_ord < g && g <= to_ord,
            None => false,
        }
    }

    fn denied(actor: &Actor, target: WorkflowStatus) -> EngineError {
        EngineError::PermissionDenied {
            actor: actor.audit_label(),
            action: format!("move order to {}", target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn order_at(status: WorkflowStatus) -> Order {
        let mut o = Order::new(
            "O1".to_string(),
            "B1".to_string(),
            "t-shirt".to_string(),
            100,
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        );
        o.workflow_status = status;
        o
    }

    fn paid_ctx(accepted: usize) -> OrderGuardContext {
        OrderGuardContext {
            payment_status: Some(PaymentStatus::Paid),
            accepted_supplier_orders: accepted,
        }
    }

    #[test]
    fn test_admin_advances_one_step() {
        let o = order_at(WorkflowStatus::QuoteRequested);
        let t = OrderStateMachine::plan(
            &o,
            WorkflowStatus::QuoteSent,
            &Actor::admin("a"),
            &OrderGuardContext::default(),
        )
        .unwrap();
        assert_eq!(t.to, WorkflowStatus::QuoteSent);
    }

    #[test]
    fn test_backward_move_is_rejected() {
        let o = order_at(WorkflowStatus::AdminReview);
        let err = OrderStateMachine::plan(&o, WorkflowStatus::QuoteSent, &Actor::admin("a"), &paid_ctx(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn test_payment_guard_applies_when_skipping() {
        let o = order_at(WorkflowStatus::AwaitingPayment);
        let unpaid = OrderGuardContext {
            payment_status: Some(PaymentStatus::Unpaid),
            accepted_supplier_orders: 1,
        };
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::PaymentReceived, &Actor::system(), &unpaid).is_err());
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::BulkProduction, &Actor::system(), &unpaid).is_err());
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::PaymentReceived, &Actor::system(), &paid_ctx(0)).is_ok());
    }

    #[test]
    fn test_assignment_guard_requires_accepted_supplier_order() {
        let o = order_at(WorkflowStatus::PaymentReceived);
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::AssignedToSupplier, &Actor::admin("a"), &paid_ctx(0)).is_err());
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::BulkProduction, &Actor::admin("a"), &paid_ctx(1)).is_ok());
    }

    #[test]
    fn test_buyer_can_only_cancel_before_payment() {
        let buyer = Actor::buyer("B1");
        let o = order_at(WorkflowStatus::AwaitingPayment);
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::Cancelled, &buyer, &paid_ctx(0)).is_ok());
        assert!(matches!(
            OrderStateMachine::plan(&o, WorkflowStatus::PaymentReceived, &buyer, &paid_ctx(0)),
            Err(EngineError::PermissionDenied { .. })
        ));

        let paid = order_at(WorkflowStatus::PaymentReceived);
        assert!(matches!(
            OrderStateMachine::plan(&paid, WorkflowStatus::Cancelled, &buyer, &paid_ctx(0)),
            Err(EngineError::PermissionDenied { .. })
        ));

        // 其他买家不能取消
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::Cancelled, &Actor::buyer("B2"), &paid_ctx(0)).is_err());
    }

    #[test]
    fn test_supplier_never_moves_orders() {
        let o = order_at(WorkflowStatus::BulkProduction);
        assert!(matches!(
            OrderStateMachine::plan(&o, WorkflowStatus::QcInspection, &Actor::supplier("S1"), &paid_ctx(1)),
            Err(EngineError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn test_hold_and_resume_restore_previous_state() {
        let mut o = order_at(WorkflowStatus::SampleRequested);
        let hold = OrderStateMachine::plan(&o, WorkflowStatus::OnHold, &Actor::admin("a"), &paid_ctx(1)).unwrap();
        hold.apply_to(&mut o);
        assert_eq!(o.hold_from_status, Some(WorkflowStatus::SampleRequested));

        // 挂起中不能直接前进
        assert!(OrderStateMachine::plan(&o, WorkflowStatus::SampleApproved, &Actor::admin("a"), &paid_ctx(1)).is_err());

        let resume = OrderStateMachine::plan_resume(&o, &Actor::admin("a")).unwrap();
        resume.apply_to(&mut o);
        assert_eq!(o.workflow_status, WorkflowStatus::SampleRequested);
        assert_eq!(o.hold_from_status, None);
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for s in [WorkflowStatus::Completed, WorkflowStatus::Cancelled] {
            let o = order_at(s);
            assert!(OrderStateMachine::plan(&o, WorkflowStatus::OnHold, &Actor::admin("a"), &paid_ctx(1)).is_err());
            assert!(OrderStateMachine::plan(&o, WorkflowStatus::Cancelled, &Actor::admin("a"), &paid_ctx(1)).is_err());
        }
    }

    fn any_target() -> impl Strategy<Value = Option<WorkflowStatus>> {
        prop_oneof![
            (0usize..14).prop_map(|i| Some(WorkflowStatus::SEQUENCE[i])),
            Just(Some(WorkflowStatus::OnHold)),
            Just(Some(WorkflowStatus::Cancelled)),
            Just(None), // resume
        ]
    }

    proptest! {
        #[test]
        fn prop_main_sequence_never_regresses(targets in proptest::collection::vec(any_target(), 1..40)) {
            let mut o = order_at(WorkflowStatus::QuoteRequested);
            let admin = Actor::admin("a");
            let ctx = paid_ctx(1);
            let mut high_water = 0usize;

            for target in targets {
                let planned = match target {
                    Some(t) => OrderStateMachine::plan(&o, t, &admin, &ctx),
                    None => OrderStateMachine::plan_resume(&o, &admin),
                };
                if let Ok(t) = planned {
                    t.apply_to(&mut o);
                }
                if let Some(ord) = o.workflow_status.ordinal() {
                    prop_assert!(ord >= high_water);
                    high_water = ord;
                }
            }
        }
    }
}

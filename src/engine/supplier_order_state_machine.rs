// ==========================================
// 制造撮合平台 - 履约核心 - 供应商订单状态机
// ==========================================
// 接单子流程: pending → accepted | rejected | counter_offered
// 还价: counter_offered 只能由管理员裁决 (accept → accepted, reject → rejected 且必须给原因)
// 生产子流程: accepted → in_progress → completed
// 终态: completed / rejected / cancelled
// ==========================================

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::supplier_order::{CounterOfferDecision, SupplierOrder};
use crate::domain::types::{AcceptanceStatus, Actor, ActorRole, SupplierOrderStatus};
use crate::engine::error::{EngineError, EngineResult};

const ENTITY: &str = "SupplierOrder";

/// 供应商订单命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SupplierOrderCommand {
    Accept,
    Reject { reason: Option<String> },
    CounterOffer { price: Decimal, note: Option<String> },
    DecideCounterOffer(CounterOfferDecision),
    StartProduction,
    Complete,
    Cancel { reason: Option<String> },
}

impl SupplierOrderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SupplierOrderCommand::Accept => "accept",
            SupplierOrderCommand::Reject { .. } => "reject",
            SupplierOrderCommand::CounterOffer { .. } => "counter_offer",
            SupplierOrderCommand::DecideCounterOffer(_) => "decide_counter_offer",
            SupplierOrderCommand::StartProduction => "start_production",
            SupplierOrderCommand::Complete => "complete",
            SupplierOrderCommand::Cancel { .. } => "cancel",
        }
    }
}

pub struct SupplierOrderStateMachine;

impl SupplierOrderStateMachine {
    /// 校验命令并返回转换后的供应商订单 (revision 不变, 由仓储 CAS 递增)
    pub fn apply(
        so: &SupplierOrder,
        command: &SupplierOrderCommand,
        actor: &Actor,
    ) -> EngineResult<SupplierOrder> {
        Self::authorize(so, command, actor)?;

        let from = so.status;
        if from.is_terminal() {
            return Err(EngineError::transition(
                ENTITY,
                from,
                command.name(),
                "供应商订单已处于终态",
            ));
        }

        let mut next = so.clone();
        match command {
            SupplierOrderCommand::Accept => {
                Self::expect(from, SupplierOrderStatus::Pending, command)?;
                next.acceptance_status = AcceptanceStatus::Accepted;
                next.status = SupplierOrderStatus::Accepted;
            }
            SupplierOrderCommand::Reject { reason } => {
                Self::expect(from, SupplierOrderStatus::Pending, command)?;
                next.acceptance_status = AcceptanceStatus::Rejected;
                next.status = SupplierOrderStatus::Rejected;
                next.rejection_reason = reason.clone();
            }
            SupplierOrderCommand::CounterOffer { price, note } => {
                Self::expect(from, SupplierOrderStatus::Pending, command)?;
                if *price <= Decimal::ZERO {
                    return Err(EngineError::Validation(format!("还价必须为正: {}", price)));
                }
                next.acceptance_status = AcceptanceStatus::CounterOffered;
                next.status = SupplierOrderStatus::CounterOffered;
                next.counter_offer_price = Some(*price);
                next.counter_offer_note = note.clone();
            }
            SupplierOrderCommand::DecideCounterOffer(decision) => {
                Self::expect(from, SupplierOrderStatus::CounterOffered, command)?;
                match decision {
                    CounterOfferDecision::Accept => {
                        next.acceptance_status = AcceptanceStatus::Accepted;
                        next.status = SupplierOrderStatus::Accepted;
                        next.supplier_price = so.counter_offer_price;
                    }
                    CounterOfferDecision::Reject { reason } => {
                        if reason.trim().is_empty() {
                            return Err(EngineError::Validation(
                                "拒绝还价必须填写原因".to_string(),
                            ));
                        }
                        next.acceptance_status = AcceptanceStatus::Rejected;
                        next.status = SupplierOrderStatus::Rejected;
                        next.rejection_reason = Some(reason.clone());
                    }
                }
            }
            SupplierOrderCommand::StartProduction => {
                Self::expect(from, SupplierOrderStatus::Accepted, command)?;
                next.status = SupplierOrderStatus::InProgress;
            }
            SupplierOrderCommand::Complete => {
                if !matches!(
                    from,
                    SupplierOrderStatus::Accepted | SupplierOrderStatus::InProgress
                ) {
                    return Err(EngineError::transition(
                        ENTITY,
                        from,
                        SupplierOrderStatus::Completed,
                        "只有生产中的订单可以完成",
                    ));
                }
                next.status = SupplierOrderStatus::Completed;
            }
            SupplierOrderCommand::Cancel { reason } => {
                next.status = SupplierOrderStatus::Cancelled;
                if reason.is_some() {
                    next.rejection_reason = reason.clone();
                }
            }
        }

        next.updated_at = Utc::now();
        Ok(next)
    }

    fn expect(
        from: SupplierOrderStatus,
        expected: SupplierOrderStatus,
        command: &SupplierOrderCommand,
    ) -> EngineResult<()> {
        if from != expected {
            return Err(EngineError::transition(
                ENTITY,
                from,
                command.name(),
                format!("需要处于 {} 状态", expected),
            ));
        }
        Ok(())
    }

    /// 权限: 接单/拒绝/还价由本供应商或管理员; 裁决/取消由管理员或系统; 生产推进由供应商或系统
    fn authorize(so: &SupplierOrder, command: &SupplierOrderCommand, actor: &Actor) -> EngineResult<()> {
        let is_owner = actor.role == ActorRole::Supplier && actor.id == so.supplier_id;
        let allowed = match command {
            SupplierOrderCommand::Accept
            | SupplierOrderCommand::Reject { .. }
            | SupplierOrderCommand::CounterOffer { .. } => is_owner || actor.role == ActorRole::Admin,
            SupplierOrderCommand::DecideCounterOffer(_) => actor.role == ActorRole::Admin,
            SupplierOrderCommand::Cancel { .. } => actor.role.is_privileged(),
            SupplierOrderCommand::StartProduction | SupplierOrderCommand::Complete => {
                is_owner || actor.role.is_privileged()
            }
        };

        if allowed {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                actor: actor.audit_label(),
                action: format!("{} {}", command.name(), so.supplier_order_id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::supplier_order::SupplierOrderOwner;
    use chrono::NaiveDate;

    fn pending() -> SupplierOrder {
        SupplierOrder::new(
            "SO1".to_string(),
            SupplierOrderOwner::Order("O1".to_string()),
            "S1".to_string(),
            "t-shirt".to_string(),
            50,
            NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
            Some(Decimal::new(800, 2)),
        )
    }

    fn supplier() -> Actor {
        Actor::supplier("S1")
    }

    #[test]
    fn test_supplier_accepts_own_order() {
        let so = SupplierOrderStateMachine::apply(&pending(), &SupplierOrderCommand::Accept, &supplier()).unwrap();
        assert_eq!(so.status, SupplierOrderStatus::Accepted);
        assert_eq!(so.acceptance_status, AcceptanceStatus::Accepted);
    }

    #[test]
    fn test_other_supplier_cannot_act() {
        let err = SupplierOrderStateMachine::apply(&pending(), &SupplierOrderCommand::Accept, &Actor::supplier("S2"))
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
    }

    #[test]
    fn test_counter_offer_waits_for_admin() {
        let offered = SupplierOrderStateMachine::apply(
            &pending(),
            &SupplierOrderCommand::CounterOffer {
                price: Decimal::new(900, 2),
                note: Some("fabric cost".to_string()),
            },
            &supplier(),
        )
        .unwrap();
        assert_eq!(offered.status, SupplierOrderStatus::CounterOffered);

        // 供应商自己不能再接单/裁决
        assert!(SupplierOrderStateMachine::apply(&offered, &SupplierOrderCommand::Accept, &supplier()).is_err());
        assert!(SupplierOrderStateMachine::apply(
            &offered,
            &SupplierOrderCommand::DecideCounterOffer(CounterOfferDecision::Accept),
            &supplier()
        )
        .is_err());

        let accepted = SupplierOrderStateMachine::apply(
            &offered,
            &SupplierOrderCommand::DecideCounterOffer(CounterOfferDecision::Accept),
            &Actor::admin("a"),
        )
        .unwrap();
        assert_eq!(accepted.status, SupplierOrderStatus::Accepted);
        assert_eq!(accepted.supplier_price, Some(Decimal::new(900, 2)));
    }

    #[test]
    fn test_counter_offer_rejection_requires_reason() {
        let offered = SupplierOrderStateMachine::apply(
            &pending(),
            &SupplierOrderCommand::CounterOffer {
                price: Decimal::new(900, 2),
                note: None,
            },
            &supplier(),
        )
        .unwrap();

        let blank = SupplierOrderStateMachine::apply(
            &offered,
            &SupplierOrderCommand::DecideCounterOffer(CounterOfferDecision::Reject {
                reason: "  ".to_string(),
            }),
            &Actor::admin("a"),
        );
        assert!(matches!(blank, Err(EngineError::Validation(_))));

        let rejected = SupplierOrderStateMachine::apply(
            &offered,
            &SupplierOrderCommand::DecideCounterOffer(CounterOfferDecision::Reject {
                reason: "over budget".to_string(),
            }),
            &Actor::admin("a"),
        )
        .unwrap();
        assert_eq!(rejected.status, SupplierOrderStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("over budget"));
    }

    #[test]
    fn test_production_subflow_and_terminal() {
        let accepted = SupplierOrderStateMachine::apply(&pending(), &SupplierOrderCommand::Accept, &supplier()).unwrap();
        let started =
            SupplierOrderStateMachine::apply(&accepted, &SupplierOrderCommand::StartProduction, &Actor::system()).unwrap();
        let done = SupplierOrderStateMachine::apply(&started, &SupplierOrderCommand::Complete, &Actor::system()).unwrap();
        assert_eq!(done.status, SupplierOrderStatus::Completed);

        let again = SupplierOrderStateMachine::apply(&done, &SupplierOrderCommand::Cancel { reason: None }, &Actor::system());
        assert!(matches!(again, Err(EngineError::InvalidTransition { .. })));
    }

    #[test]
    fn test_production_requires_acceptance() {
        let err = SupplierOrderStateMachine::apply(&pending(), &SupplierOrderCommand::StartProduction, &Actor::system())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}

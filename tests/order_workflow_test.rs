// ==========================================
// 买家订单工作流集成测试
// ==========================================
// 职责: 状态转换守卫、取消/挂起权限、事件幂等、付款通知
// ==========================================


#[cfg(test)]
mod order_workflow_test {
    use mfg_fulfillment::api::ApiError;
    use mfg_fulfillment::domain::audit_log::AuditEntityType;
    use mfg_fulfillment::domain::{Actor, PaymentOutcome, PaymentStatus, PaymentType, WorkflowStatus};

    use crate::test_helpers::*;

    #[test]
    fn test_new_order_starts_at_quote_requested_with_audit() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 300, d(2026, 8, 1));

        assert_eq!(order.workflow_status, WorkflowStatus::QuoteRequested);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);

        let history = env.state.order_api.history(&order.order_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entity_type, AuditEntityType::Order);
        assert_eq!(history[0].actor, "buyer:B1");
    }

    #[test]
    fn test_buyer_cannot_order_for_someone_else() {
        let env = setup();
        let err = env
            .state
            .order_api
            .create_order(
                mfg_fulfillment::domain::NewOrderRequest {
                    buyer_id: "B2".to_string(),
                    product_type: "t-shirt".to_string(),
                    quantity: 10,
                    target_date: d(2026, 8, 1),
                    buyer_price: None,
                },
                &Actor::buyer("B1"),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));
    }

    #[test]
    fn test_forward_skip_is_guarded_by_payment() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 300, d(2026, 8, 1));

        // quote_requested → awaiting_payment 可以跳过中间状态
        advance_to(&env.state, &order.order_id, WorkflowStatus::AwaitingPayment);

        // 跨越 payment_received 但未付款
        let err = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::SampleRequested, &admin(), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
        assert!(!err.is_retryable());

        let unchanged = env.state.order_api.get_order(&order.order_id).unwrap();
        assert_eq!(unchanged.workflow_status, WorkflowStatus::AwaitingPayment);
    }

    #[test]
    fn test_assignment_gate_needs_accepted_supplier_order() {
        let env = setup();
        let order = paid_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        assert_eq!(order.workflow_status, WorkflowStatus::PaymentReceived);

        let err = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::AssignedToSupplier, &admin(), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_backward_transition_is_rejected() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        advance_to(&env.state, &order.order_id, WorkflowStatus::AdminReview);

        let err = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::QuoteSent, &admin(), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_buyer_cancel_only_before_payment() {
        let env = setup();
        let buyer = Actor::buyer("B1");

        let early = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        let cancelled = env.state.order_api.cancel(&early.order_id, &buyer, None).unwrap();
        assert_eq!(cancelled.order.workflow_status, WorkflowStatus::Cancelled);

        let paid = paid_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        let err = env.state.order_api.cancel(&paid.order_id, &buyer, None).unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));

        // 管理员任何非终态都可以取消
        let by_admin = env.state.order_api.cancel(&paid.order_id, &admin(), None).unwrap();
        assert_eq!(by_admin.order.workflow_status, WorkflowStatus::Cancelled);

        // 终态不再接受任何转换
        let err = env.state.order_api.hold(&paid.order_id, &admin(), None).unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_other_buyer_cannot_cancel() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        let err = env
            .state
            .order_api
            .cancel(&order.order_id, &Actor::buyer("B2"), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));
    }

    #[test]
    fn test_supplier_cannot_move_orders() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        let err = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::QuoteSent, &Actor::supplier("S1"), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));
    }

    #[test]
    fn test_hold_and_resume_restores_previous_state() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        advance_to(&env.state, &order.order_id, WorkflowStatus::AdminReview);

        let held = env.state.order_api.hold(&order.order_id, &admin(), None).unwrap();
        assert_eq!(held.order.workflow_status, WorkflowStatus::OnHold);
        assert_eq!(held.order.hold_from_status, Some(WorkflowStatus::AdminReview));

        // 挂起中不能前进
        let err = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::AwaitingPayment, &admin(), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

        // 买家不能恢复
        let err = env
            .state
            .order_api
            .resume(&order.order_id, &Actor::buyer("B1"), None)
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));

        let resumed = env.state.order_api.resume(&order.order_id, &admin(), None).unwrap();
        assert_eq!(resumed.order.workflow_status, WorkflowStatus::AdminReview);
        assert_eq!(resumed.order.hold_from_status, None);
    }

    #[test]
    fn test_buyer_can_cancel_held_pre_payment_order() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        env.state.order_api.hold(&order.order_id, &admin(), None).unwrap();

        let cancelled = env
            .state
            .order_api
            .cancel(&order.order_id, &Actor::buyer("B1"), None)
            .unwrap();
        assert_eq!(cancelled.order.workflow_status, WorkflowStatus::Cancelled);
    }

    #[test]
    fn test_duplicate_event_id_is_a_no_op() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));

        let first = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::QuoteSent, &admin(), Some("evt-1"))
            .unwrap();
        assert!(first.applied);
        assert_eq!(first.order.revision, 1);

        env.recorder.clear();
        let second = env
            .state
            .order_api
            .transition(&order.order_id, WorkflowStatus::QuoteSent, &admin(), Some("evt-1"))
            .unwrap();
        assert!(!second.applied);
        assert_eq!(second.order.workflow_status, WorkflowStatus::QuoteSent);
        assert_eq!(second.order.revision, 1);
        assert!(env.recorder.events().is_empty());

        // 审计: 创建 + 一次转换
        assert_eq!(env.state.order_api.history(&order.order_id).unwrap().len(), 2);
    }

    #[test]
    fn test_transition_publishes_event_after_commit() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        env.recorder.clear();

        advance_to(&env.state, &order.order_id, WorkflowStatus::QuoteSent);
        assert_eq!(env.recorder.kinds(), vec!["OrderTransitioned"]);
    }

    #[test]
    fn test_payment_event_moves_order_and_is_idempotent() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        advance_to(&env.state, &order.order_id, WorkflowStatus::AwaitingPayment);
        env.state
            .order_api
            .register_invoice(&order.order_id, "pi_001", PaymentType::Deposit, &admin())
            .unwrap();

        let first = env
            .state
            .order_api
            .record_payment_event("pi_001", PaymentOutcome::Succeeded)
            .unwrap();
        assert!(first.applied);
        assert_eq!(first.order.payment_status, PaymentStatus::DepositPaid);
        assert_eq!(first.order.workflow_status, WorkflowStatus::PaymentReceived);

        let replay = env
            .state
            .order_api
            .record_payment_event("pi_001", PaymentOutcome::Succeeded)
            .unwrap();
        assert!(!replay.applied);
        assert_eq!(replay.order.revision, first.order.revision);
    }

    #[test]
    fn test_payment_audit_is_kept_apart_from_workflow_history() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        advance_to(&env.state, &order.order_id, WorkflowStatus::AwaitingPayment);
        env.state
            .order_api
            .register_invoice(&order.order_id, "pi_003", PaymentType::Deposit, &admin())
            .unwrap();
        env.state
            .order_api
            .record_payment_event("pi_003", PaymentOutcome::Succeeded)
            .unwrap();

        // 工作流轨迹只含工作流状态
        let history = env.state.order_api.history(&order.order_id).unwrap();
        assert!(!history.is_empty());
        for record in &history {
            assert_eq!(record.entity_type, AuditEntityType::Order);
            assert!(WorkflowStatus::from_db_str(&record.new_state).is_some(), "{}", record.new_state);
            if let Some(prev) = &record.previous_state {
                assert!(WorkflowStatus::from_db_str(prev).is_some(), "{}", prev);
            }
        }
        assert_eq!(history.last().unwrap().new_state, "payment_received");

        let payments = env.state.order_api.payment_history(&order.order_id).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].entity_type, AuditEntityType::Payment);
        assert_eq!(payments[0].previous_state.as_deref(), Some(PaymentStatus::Unpaid.to_db_str()));
        assert_eq!(payments[0].new_state, PaymentStatus::DepositPaid.to_db_str());
        assert_eq!(payments[0].payload_json.as_ref().unwrap()["payment_ref"], "pi_003");
    }

    #[test]
    fn test_failed_payment_does_not_advance() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));
        advance_to(&env.state, &order.order_id, WorkflowStatus::AwaitingPayment);
        env.state
            .order_api
            .register_invoice(&order.order_id, "pi_002", PaymentType::Full, &admin())
            .unwrap();

        let failed = env
            .state
            .order_api
            .record_payment_event("pi_002", PaymentOutcome::Failed)
            .unwrap();
        assert_eq!(failed.order.payment_status, PaymentStatus::Failed);
        assert_eq!(failed.order.workflow_status, WorkflowStatus::AwaitingPayment);

        let ok = env
            .state
            .order_api
            .record_payment_event("pi_002", PaymentOutcome::Succeeded)
            .unwrap();
        assert_eq!(ok.order.payment_status, PaymentStatus::Paid);
        assert_eq!(ok.order.workflow_status, WorkflowStatus::PaymentReceived);
    }

    #[test]
    fn test_unknown_payment_ref_is_not_found() {
        let env = setup();
        let err = env
            .state
            .order_api
            .record_payment_event("pi_missing", PaymentOutcome::Succeeded)
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_buyer_price_locks_after_payment() {
        let env = setup();
        let order = create_order(&env.state, "B1", "t-shirt", 100, d(2026, 8, 1));

        let priced = env
            .state
            .order_api
            .update_buyer_price(&order.order_id, money(1056), &admin())
            .unwrap();
        assert_eq!(priced.buyer_price, Some(money(1056)));

        advance_to(&env.state, &order.order_id, WorkflowStatus::AwaitingPayment);
        pay_in_full(&env.state, &order.order_id, "pi_003");

        let err = env
            .state
            .order_api
            .update_buyer_price(&order.order_id, money(999), &admin())
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
        assert_eq!(
            env.state.order_api.get_order(&order.order_id).unwrap().buyer_price,
            Some(money(1056))
        );
    }
}

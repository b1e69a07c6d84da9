// ==========================================
// 批次聚合集成测试
// ==========================================
// 职责: 加入/新开批次、重算与冻结买家价、锁定、转换为供应商订单
// ==========================================


#[cfg(test)]
mod batch_flow_test {
    use chrono::{Duration, Utc};
    use mfg_fulfillment::api::{ApiError, AssignmentRequest, BatchJoinOutcome};
    use mfg_fulfillment::app::AppState;
    use mfg_fulfillment::domain::{
        Actor, BatchJoinRequest, BatchStatus, Order, Supplier, SupplierOrderOwner, SupplierOrderStatus,
    };
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::test_helpers::*;

    fn join(state: &AppState, order: &Order, style: &str, quantity: i64) -> BatchJoinOutcome {
        state
            .batch_api
            .join(
                &BatchJoinRequest {
                    order_id: order.order_id.clone(),
                    style_key: style.to_string(),
                    quantity,
                    base_price: money(800),
                },
                &Actor::buyer(&order.buyer_id),
            )
            .unwrap()
    }

    fn try_join(state: &AppState, order: &Order, quantity: i64) -> Result<BatchJoinOutcome, ApiError> {
        state.batch_api.join(
            &BatchJoinRequest {
                order_id: order.order_id.clone(),
                style_key: "tee-red".to_string(),
                quantity,
                base_price: money(800),
            },
            &Actor::buyer(&order.buyer_id),
        )
    }

    fn tee_order(state: &AppState, buyer: &str, quantity: i64) -> Order {
        create_order(state, buyer, "t-shirt", quantity, d(2026, 9, 1))
    }

    fn buyer_price(state: &AppState, order: &Order) -> Option<rust_decimal::Decimal> {
        state.order_api.get_order(&order.order_id).unwrap().buyer_price
    }

    #[test]
    fn test_first_join_opens_batch_and_second_reuses_it() {
        let env = setup();
        let o1 = tee_order(&env.state, "B1", 200);
        let o2 = tee_order(&env.state, "B2", 100);

        let first = join(&env.state, &o1, "tee-red", 200);
        assert!(first.opened_new_batch);
        assert_eq!(first.batch.product_category, "knit_tops");
        assert_eq!(first.batch.current_quantity, 200);
        assert_eq!(first.batch.status, BatchStatus::Open);
        // 1 款, 填充 40% → 8.00 × 1.20
        assert_eq!(buyer_price(&env.state, &o1), Some(money(960)));

        let second = join(&env.state, &o2, "tee-blue", 100);
        assert!(!second.opened_new_batch);
        assert_eq!(second.batch.batch_id, first.batch.batch_id);
        assert_eq!(second.batch.current_style_count, 2);

        // 2 款, 填充 60% → 8.00 × 1.05 × 1.20; 早加入的成员同步重算
        assert_eq!(buyer_price(&env.state, &o2), Some(money(1008)));
        assert_eq!(buyer_price(&env.state, &o1), Some(money(1008)));
        assert_eq!(env.recorder.count("BatchJoined"), 2);
    }

    #[test]
    fn test_reaching_target_locks_and_freezes_prices() {
        let env = setup();
        let orders: Vec<_> = (1..=3).map(|i| tee_order(&env.state, &format!("B{}", i), 200)).collect();
        join(&env.state, &orders[0], "tee-red", 200);
        join(&env.state, &orders[1], "tee-blue", 100);
        let last = join(&env.state, &orders[2], "tee-green", 200);

        assert_eq!(last.batch.status, BatchStatus::Locked);
        assert!(last.batch.locked_at.is_some());
        assert_eq!(env.recorder.count("BatchLocked"), 1);

        // 3 款, 填充 100% → 8.00 × 1.10 × 1.15
        let frozen = money(1012);
        assert_eq!(last.member.locked_unit_price, Some(frozen));
        let members = env.state.batch_api.members(&last.batch.batch_id).unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.iter().all(|m| m.locked_unit_price == Some(frozen)));
        for order in &orders {
            assert_eq!(buyer_price(&env.state, order), Some(frozen));
        }

        // 锁定批次不再接收, 下一个订单开启新批次
        let late = tee_order(&env.state, "B9", 50);
        let next = join(&env.state, &late, "tee-red", 50);
        assert!(next.opened_new_batch);
        assert_ne!(next.batch.batch_id, last.batch.batch_id);
    }

    #[test]
    fn test_paid_order_keeps_its_price() {
        let env = setup();
        let paid = paid_order(&env.state, "B1", "t-shirt", 100, d(2026, 9, 1));
        let fresh = tee_order(&env.state, "B2", 100);

        join(&env.state, &paid, "tee-red", 100);
        join(&env.state, &fresh, "tee-blue", 100);

        assert_eq!(buyer_price(&env.state, &paid), None);
        assert!(buyer_price(&env.state, &fresh).is_some());
    }

    #[test]
    fn test_style_slots_and_single_membership() {
        let env = setup();
        let mut first_batch = None;
        for i in 0..5 {
            let order = tee_order(&env.state, &format!("B{}", i), 10);
            let outcome = join(&env.state, &order, &format!("style-{}", i), 10);
            first_batch.get_or_insert(outcome.batch.batch_id);
        }
        let first_batch = first_batch.unwrap();

        // 已有款式仍可加入
        let repeat = tee_order(&env.state, "B10", 10);
        assert_eq!(join(&env.state, &repeat, "style-0", 10).batch.batch_id, first_batch);

        // 第 6 个款式放不下, 新开批次
        let sixth = tee_order(&env.state, "B11", 10);
        let outcome = join(&env.state, &sixth, "style-5", 10);
        assert!(outcome.opened_new_batch);

        let batch = env.state.batch_api.get_batch(&first_batch).unwrap();
        assert_eq!(batch.current_style_count, 5);
        assert!(batch.current_style_count <= batch.max_styles);

        // 同一订单不能进两个批次
        let err = env
            .state
            .batch_api
            .join(
                &BatchJoinRequest {
                    order_id: sixth.order_id.clone(),
                    style_key: "style-5".to_string(),
                    quantity: 10,
                    base_price: money(800),
                },
                &Actor::buyer("B11"),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_overflowing_join_opens_new_batch() {
        let env = setup();
        let big = tee_order(&env.state, "B1", 450);
        let first = join(&env.state, &big, "tee-red", 450);

        let extra = tee_order(&env.state, "B2", 100);
        let second = join(&env.state, &extra, "tee-red", 100);
        assert!(second.opened_new_batch);

        let batch = env.state.batch_api.get_batch(&first.batch.batch_id).unwrap();
        assert_eq!(batch.current_quantity, 450);
        assert_eq!(batch.status, BatchStatus::Open);
    }

    #[test]
    fn test_join_quantity_must_match_order() {
        let env = setup();
        let order = tee_order(&env.state, "B1", 10);

        let err = try_join(&env.state, &order, 499).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{:?}", err);
        assert!(env.state.batch_api.open_batches("knit_tops").unwrap().is_empty());
        assert_eq!(env.recorder.count("BatchJoined"), 0);

        // 数量一致即可加入
        let outcome = try_join(&env.state, &order, 10).unwrap();
        assert_eq!(outcome.batch.current_quantity, 10);
    }

    #[test]
    fn test_join_above_batch_limit_is_invalid() {
        let env = setup();
        let order = tee_order(&env.state, "B1", 600);

        let err = try_join(&env.state, &order, 600).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)), "{:?}", err);
        assert!(env.state.batch_api.open_batches("knit_tops").unwrap().is_empty());

        // 恰好等于目标量可以
        let full = tee_order(&env.state, "B2", 500);
        let outcome = try_join(&env.state, &full, 500).unwrap();
        assert_eq!(outcome.batch.status, BatchStatus::Locked);
    }

    #[test]
    fn test_concurrent_joins_never_overfill() {
        let env = setup();
        let orders = vec![tee_order(&env.state, "B1", 300), tee_order(&env.state, "B2", 300)];

        // 两个进程各自的连接, 同时各加入 300 件 (目标 500)
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = orders
            .into_iter()
            .map(|order| {
                let db_path = env.db_path.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let state = AppState::new(db_path).unwrap();
                    barrier.wait();
                    try_join(&state, &order, 300)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for result in &results {
            assert!(result.is_ok(), "{:?}", result);
        }

        let batches = env.state.batch_api.open_batches("knit_tops").unwrap();
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert!(batch.current_quantity <= batch.target_quantity, "{:?}", batch);
            assert_eq!(batch.current_quantity, 300);
            assert_eq!(env.state.batch_api.members(&batch.batch_id).unwrap().len(), 1);
        }
        assert_eq!(batches.iter().map(|b| b.current_quantity).sum::<i64>(), 600);
    }

    #[test]
    fn test_other_buyer_cannot_join_for_order() {
        let env = setup();
        let order = tee_order(&env.state, "B1", 100);
        let err = env
            .state
            .batch_api
            .join(
                &BatchJoinRequest {
                    order_id: order.order_id,
                    style_key: "tee-red".to_string(),
                    quantity: 100,
                    base_price: money(800),
                },
                &Actor::buyer("B2"),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));
    }

    #[test]
    fn test_expired_window_locks_batch() {
        let env = setup();
        let order = tee_order(&env.state, "B1", 100);
        let outcome = join(&env.state, &order, "tee-red", 100);

        let none_yet = env.state.batch_api.lock_expired_batches(Utc::now()).unwrap();
        assert!(none_yet.is_empty());

        let locked = env
            .state
            .batch_api
            .lock_expired_batches(Utc::now() + Duration::days(8))
            .unwrap();
        assert_eq!(locked, vec![outcome.batch.batch_id.clone()]);

        let batch = env.state.batch_api.get_batch(&outcome.batch.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Locked);
        let members = env.state.batch_api.members(&batch.batch_id).unwrap();
        assert!(members[0].locked_unit_price.is_some());

        // 再跑一次没有可锁的
        assert!(env
            .state
            .batch_api
            .lock_expired_batches(Utc::now() + Duration::days(8))
            .unwrap()
            .is_empty());
    }

    /// 300 件、2 款的锁定批次
    fn locked_batch(env: &TestEnv) -> String {
        let o1 = tee_order(&env.state, "B1", 200);
        let o2 = tee_order(&env.state, "B2", 100);
        let batch_id = join(&env.state, &o1, "tee-red", 200).batch.batch_id;
        join(&env.state, &o2, "tee-blue", 100);
        env.state.batch_api.lock_batch(&batch_id, &admin()).unwrap();
        batch_id
    }

    #[test]
    fn test_convert_splits_by_available_capacity() {
        let env = setup();
        let date = d(2026, 9, 1);
        seed_supplier(&env.state, "S_A", &["knit_tops"], 90.0, 10);
        seed_supplier(&env.state, "S_B", &["knit_tops"], 80.0, 10);
        seed_supplier(&env.state, "S_Z", &["knit_tops"], 80.0, 10);
        seed_capacity(&env.state, "S_A", date, 600);
        seed_capacity(&env.state, "S_B", date, 300);
        let batch_id = locked_batch(&env);
        env.recorder.clear();

        let suppliers = vec!["S_A".to_string(), "S_B".to_string(), "S_Z".to_string()];
        let orders = env.state.batch_api.convert_batch(&batch_id, &suppliers, date, &admin()).unwrap();

        assert_eq!(orders.len(), 2);
        let quantities: Vec<_> = orders.iter().map(|so| (so.supplier_id.as_str(), so.quantity)).collect();
        assert_eq!(quantities, vec![("S_A", 200), ("S_B", 100)]);
        for so in &orders {
            assert_eq!(so.owner, SupplierOrderOwner::Batch(batch_id.clone()));
            assert_eq!(so.status, SupplierOrderStatus::Pending);
            // 2 款 → 8.00 × 1.05
            assert_eq!(so.supplier_price, Some(money(840)));
        }

        assert_eq!(env.state.batch_api.get_batch(&batch_id).unwrap().status, BatchStatus::Assigned);
        assert_eq!(
            env.state.assignment_api.get_capacity("S_A", date).unwrap().unwrap().current_utilization,
            200
        );
        assert_eq!(env.recorder.count("CapacityCommitted"), 2);
        assert_eq!(env.recorder.count("BatchAssigned"), 1);
    }

    #[test]
    fn test_convert_is_all_or_nothing() {
        let env = setup();
        let date = d(2026, 9, 1);
        seed_supplier(&env.state, "S_A", &["knit_tops"], 90.0, 10);
        seed_supplier(&env.state, "S_B", &["knit_tops"], 80.0, 10);
        seed_capacity(&env.state, "S_A", date, 200);
        seed_capacity(&env.state, "S_B", date, 200);
        // S_B 在产能登记之后被停用
        env.state
            .assignment_api
            .upsert_supplier(
                &Supplier {
                    supplier_id: "S_B".to_string(),
                    name: "S_B Garments".to_string(),
                    verified: true,
                    active: false,
                    performance_score: 80.0,
                    specializations: vec!["knit_tops".to_string()],
                    lead_time_days: 10,
                },
                &admin(),
            )
            .unwrap();
        let batch_id = locked_batch(&env);

        let suppliers = vec!["S_A".to_string(), "S_B".to_string()];
        let err = env
            .state
            .batch_api
            .convert_batch(&batch_id, &suppliers, date, &admin())
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        assert_eq!(env.state.batch_api.get_batch(&batch_id).unwrap().status, BatchStatus::Locked);
        assert_eq!(
            env.state.assignment_api.get_capacity("S_A", date).unwrap().unwrap().current_utilization,
            0
        );
        assert!(env
            .state
            .supplier_order_api
            .list_for_owner(&SupplierOrderOwner::Batch(batch_id))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_convert_preconditions() {
        let env = setup();
        let date = d(2026, 9, 1);
        seed_supplier(&env.state, "S_A", &["knit_tops"], 90.0, 10);
        seed_capacity(&env.state, "S_A", date, 100);

        let order = tee_order(&env.state, "B1", 100);
        let open_id = join(&env.state, &order, "tee-red", 100).batch.batch_id;
        let err = env
            .state
            .batch_api
            .convert_batch(&open_id, &["S_A".to_string()], date, &admin())
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

        let err = env
            .state
            .batch_api
            .convert_batch(&open_id, &["S_A".to_string(), "S_A".to_string()], date, &admin())
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = env
            .state
            .batch_api
            .convert_batch(&open_id, &["S_A".to_string()], date, &Actor::buyer("B1"))
            .unwrap_err();
        assert!(matches!(err, ApiError::PermissionDenied(_)));

        // 未锁定批次不能直接分配产能
        let err = env
            .state
            .assignment_api
            .commit_assignment(
                &AssignmentRequest {
                    owner: SupplierOrderOwner::Batch(open_id.clone()),
                    supplier_id: "S_A".to_string(),
                    product_type: "t-shirt".to_string(),
                    quantity: 100,
                    target_date: date,
                    supplier_price: None,
                },
                &admin(),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }), "{:?}", err);
        assert_eq!(
            env.state.assignment_api.get_capacity("S_A", date).unwrap().unwrap().current_utilization,
            0
        );

        // 可用 100 不够锁定批次的数量
        let locked_id = locked_batch(&env);
        let err = env
            .state
            .batch_api
            .convert_batch(&locked_id, &["S_A".to_string()], date, &admin())
            .unwrap_err();
        assert!(matches!(err, ApiError::CapacityExhausted(_)));
    }
}

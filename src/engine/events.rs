// ==========================================
// 制造撮合平台 - 履约核心 - 领域事件发布
// ==========================================
// 职责: 定义领域事件与订阅者 trait, 由 EventBus 扇出
// 红线: 事件在事务提交后发布; 订阅者失败只记日志, 不回滚已提交的变更
// ==========================================

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, RwLock};

// ==========================================
// 领域事件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    OrderTransitioned {
        order_id: String,
        from: String,
        to: String,
        actor: String,
        event_id: Option<String>,
    },
    CapacityCommitted {
        supplier_id: String,
        capacity_date: NaiveDate,
        quantity: i64,
        supplier_order_id: String,
    },
    CapacityReleased {
        supplier_id: String,
        capacity_date: NaiveDate,
        quantity: i64,
        supplier_order_id: String,
    },
    SupplierOrderTransitioned {
        supplier_order_id: String,
        from: String,
        to: String,
        actor: String,
    },
    StageUpdated {
        supplier_order_id: String,
        stage_number: i32,
        completion_percentage: i32,
    },
    BatchJoined {
        batch_id: String,
        order_id: String,
        quantity: i64,
        buyer_price: Decimal,
    },
    BatchLocked {
        batch_id: String,
        current_quantity: i64,
    },
    BatchAssigned {
        batch_id: String,
        supplier_order_ids: Vec<String>,
    },
    PaymentRecorded {
        payment_ref: String,
        order_id: String,
        outcome: String,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::OrderTransitioned { .. } => "OrderTransitioned",
            DomainEvent::CapacityCommitted { .. } => "CapacityCommitted",
            DomainEvent::CapacityReleased { .. } => "CapacityReleased",
            DomainEvent::SupplierOrderTransitioned { .. } => "SupplierOrderTransitioned",
            DomainEvent::StageUpdated { .. } => "StageUpdated",
            DomainEvent::BatchJoined { .. } => "BatchJoined",
            DomainEvent::BatchLocked { .. } => "BatchLocked",
            DomainEvent::BatchAssigned { .. } => "BatchAssigned",
            DomainEvent::PaymentRecorded { .. } => "PaymentRecorded",
        }
    }
}

// ==========================================
// 事件订阅者 Trait
// ==========================================

/// 领域事件订阅者
///
/// UI 推送、通知、外部审计等下游各自实现此 trait
pub trait DomainEventPublisher: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作订阅者 (单元测试用)
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl DomainEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: &DomainEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(event_type = event.kind(), "NoOpEventPublisher: 跳过事件");
        Ok(())
    }
}

// ==========================================
// EventBus - 扇出到所有订阅者
// ==========================================
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn DomainEventPublisher>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn DomainEventPublisher>) {
        match self.subscribers.write() {
            Ok(mut subs) => subs.push(subscriber),
            Err(poisoned) => poisoned.into_inner().push(subscriber),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.read() {
            Ok(subs) => subs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// 发布事件, 返回成功投递的订阅者数
    pub fn publish(&self, event: &DomainEvent) -> usize {
        let subs: Vec<Arc<dyn DomainEventPublisher>> = match self.subscribers.read() {
            Ok(subs) => subs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        if subs.is_empty() {
            tracing::debug!(event_type = event.kind(), "EventBus: 无订阅者, 跳过事件");
            return 0;
        }

        let mut delivered = 0;
        for (idx, sub) in subs.iter().enumerate() {
            match sub.publish(event) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        event_type = event.kind(),
                        subscriber = idx,
                        error = %e,
                        "事件投递失败, 已忽略"
                    );
                }
            }
        }
        delivered
    }

    pub fn publish_all(&self, events: &[DomainEvent]) {
        for event in events {
            self.publish(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    impl DomainEventPublisher for Recorder {
        fn publish(&self, event: &DomainEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(event.kind().to_string());
            Ok(())
        }
    }

    struct Failing;

    impl DomainEventPublisher for Failing {
        fn publish(&self, _event: &DomainEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("socket closed".into())
        }
    }

    fn locked() -> DomainEvent {
        DomainEvent::BatchLocked {
            batch_id: "B1".to_string(),
            current_quantity: 500,
        }
    }

    #[test]
    fn test_bus_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(&locked()), 0);
    }

    #[test]
    fn test_fan_out_survives_failing_subscriber() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(recorder.clone());
        bus.subscribe(Arc::new(NoOpEventPublisher));

        assert_eq!(bus.subscriber_count(), 3);
        assert_eq!(bus.publish(&locked()), 2);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["BatchLocked".to_string()]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(locked()).unwrap();
        assert_eq!(json["type"], "batch_locked");
        assert_eq!(json["batch_id"], "B1");
    }
}

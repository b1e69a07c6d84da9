// ==========================================
// 制造撮合平台 - 履约核心 - 引擎层
// ==========================================
// 职责: 纯业务规则 (定价/打分/状态机/阶段/批次/重试/事件)
// 红线: Engine 不拼 SQL, 不做 I/O; 所有拒绝必须带原因
// ==========================================

pub mod batch_aggregator;
pub mod capacity_matcher;
pub mod error;
pub mod events;
pub mod order_state_machine;
pub mod pricing;
pub mod production_tracker;
pub mod retry;
pub mod supplier_order_state_machine;

pub use batch_aggregator::{split_proportionally, BatchAggregator, BatchPolicy, Eligibility};
pub use capacity_matcher::{CapacityMatcher, MatchCandidate, MatchRequest, MatchWeights};
pub use error::{EngineError, EngineResult};
pub use events::{DomainEvent, DomainEventPublisher, EventBus, NoOpEventPublisher};
pub use order_state_machine::{OrderGuardContext, OrderStateMachine, OrderTransition};
pub use pricing::{fill_percentage, PriceInput, PriceQuote, PricingEngine, PricingRules};
pub use production_tracker::ProductionStageTracker;
pub use retry::{run_with_retry, RetryPolicy};
pub use supplier_order_state_machine::{SupplierOrderCommand, SupplierOrderStateMachine};

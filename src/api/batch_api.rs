// ==========================================
// 制造撮合平台 - 履约核心 - 批次聚合 API
// ==========================================
// 职责: 订单加入批次、批次锁定 (达标 / 窗口关闭)、锁定批次转换为供应商订单
// 红线: 锁定前每次加入后重算全部成员的买家价; 锁定时冻结, 之后不再变
// 红线: 转换按各供应商可用产能比例拆分, 全部承诺成功或全部不生效
// ==========================================

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::assignment_api::{commit_assignment_in, AssignmentRequest};
use crate::api::error::{ApiError, ApiResult};
use crate::api::workflow::ensure_privileged;
use crate::config::FulfillmentConfig;
use crate::db::{run_in_transaction, SharedConnection};
use crate::domain::audit_log::{AuditEntityType, AuditRecord};
use crate::domain::batch::{Batch, BatchJoinRequest, BatchMember};
use crate::domain::capacity::CapacityConstraint;
use crate::domain::supplier_order::{SupplierOrder, SupplierOrderOwner};
use crate::domain::types::{Actor, ActorRole, BatchStatus};
use crate::engine::batch_aggregator::{split_proportionally, BatchAggregator};
use crate::engine::events::{DomainEvent, EventBus};
use crate::engine::pricing::{fill_percentage, PriceInput, PriceQuote, PricingEngine};
use crate::engine::production_tracker::ProductionStageTracker;
use crate::engine::retry::{run_with_retry, RetryPolicy};
use crate::repository::{AuditLogRepository, BatchRepository, CapacityRepository, OrderRepository};

/// 加入批次的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJoinOutcome {
    pub batch: Batch,
    pub member: BatchMember,
    pub quote: PriceQuote,
    pub opened_new_batch: bool,
}

// ==========================================
// BatchApi
// ==========================================
pub struct BatchApi {
    conn: SharedConnection,
    batch_repo: Arc<BatchRepository>,
    aggregator: BatchAggregator,
    pricing: PricingEngine,
    retry: RetryPolicy,
    events: Arc<EventBus>,
}

impl BatchApi {
    pub fn new(
        conn: SharedConnection,
        aggregator: BatchAggregator,
        pricing: PricingEngine,
        retry: RetryPolicy,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            batch_repo: Arc::new(BatchRepository::new(conn.clone())),
            conn,
            aggregator,
            pricing,
            retry,
            events,
        }
    }

    pub fn from_config(conn: SharedConnection, config: &FulfillmentConfig, events: Arc<EventBus>) -> ApiResult<Self> {
        Ok(Self::new(
            conn,
            BatchAggregator::new(config.batch)?,
            PricingEngine::new(config.pricing.clone()),
            config.commit_retry,
            events,
        ))
    }

    pub fn get_batch(&self, batch_id: &str) -> ApiResult<Batch> {
        self.batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Batch(id={}) 不存在", batch_id)))
    }

    pub fn members(&self, batch_id: &str) -> ApiResult<Vec<BatchMember>> {
        Ok(self.batch_repo.find_members(batch_id)?)
    }

    pub fn open_batches(&self, product_category: &str) -> ApiResult<Vec<Batch>> {
        Ok(self.batch_repo.find_open_by_category(product_category)?)
    }

    /// 按当前批次状态给指定数量报价
    pub fn quote_for(&self, batch: &Batch, quantity: i64) -> ApiResult<PriceQuote> {
        Ok(self.pricing.quote(&PriceInput {
            base_price: batch.base_price,
            quantity,
            style_count_in_batch: batch.current_style_count.max(1),
            fill_percentage: fill_percentage(batch.current_quantity, batch.target_quantity),
        })?)
    }

    // ==========================================
    // 加入
    // ==========================================

    /// 订单加入同品类的第一个可加入批次; 没有则新开一个
    ///
    /// # 错误
    /// - Validation: 数量/款式/基准价非法, 或订单已在某个批次中
    /// - PermissionDenied: 非订单买家且非管理员/系统
    /// - Conflict: 重试次数用尽仍冲突
    #[instrument(skip(self, request, actor), fields(order_id = %request.order_id, qty = request.quantity))]
    pub fn join(&self, request: &BatchJoinRequest, actor: &Actor) -> ApiResult<BatchJoinOutcome> {
        if request.quantity <= 0 {
            return Err(ApiError::Validation(format!("加入数量必须为正: {}", request.quantity)));
        }
        if request.style_key.trim().is_empty() {
            return Err(ApiError::Validation("style_key 不能为空".to_string()));
        }
        if request.base_price <= Decimal::ZERO {
            return Err(ApiError::Validation(format!("基准价必须为正: {}", request.base_price)));
        }
        let limit = self.aggregator.new_batch_quantity_limit();
        if request.quantity > limit {
            return Err(ApiError::Validation(format!(
                "加入数量 {} 超过单个批次上限 {}",
                request.quantity, limit
            )));
        }

        let (outcome, events) = run_with_retry(
            &self.retry,
            "batch_join",
            |e: &ApiError| e.is_retryable(),
            |_| run_in_transaction(&self.conn, |tx| self.join_in(tx, request, actor)),
        )?;

        self.events.publish_all(&events);
        Ok(outcome)
    }

    fn join_in(
        &self,
        conn: &Connection,
        request: &BatchJoinRequest,
        actor: &Actor,
    ) -> ApiResult<(BatchJoinOutcome, Vec<DomainEvent>)> {
        let order = OrderRepository::get_in(conn, &request.order_id)?;
        let is_buyer = actor.role == ActorRole::Buyer && actor.id == order.buyer_id;
        if !(is_buyer || actor.role.is_privileged()) {
            return Err(ApiError::PermissionDenied(format!(
                "{} 不能把订单 {} 加入批次",
                actor.audit_label(),
                order.order_id
            )));
        }
        if order.workflow_status.is_terminal() {
            return Err(ApiError::state("Order", order.workflow_status, "join_batch", "订单已结束"));
        }
        if request.quantity != order.quantity {
            return Err(ApiError::Validation(format!(
                "加入数量 {} 与订单 {} 的数量 {} 不一致",
                request.quantity, order.order_id, order.quantity
            )));
        }
        if let Some(existing) = BatchRepository::batch_id_for_order_in(conn, &order.order_id)? {
            return Err(ApiError::Validation(format!(
                "订单 {} 已在批次 {} 中",
                order.order_id, existing
            )));
        }

        let category = ProductionStageTracker::product_category(&order.product_type);
        let now = Utc::now();

        // 第一个可加入的 open 批次 (按创建时间)
        let mut chosen = None;
        for batch in BatchRepository::find_open_by_category_in(conn, category)? {
            let style_is_new = !BatchRepository::has_style_in(conn, &batch.batch_id, &request.style_key)?;
            let verdict = self
                .aggregator
                .eligibility(&batch, category, request.quantity, style_is_new, now);
            if verdict.is_eligible() {
                chosen = Some((batch, style_is_new));
                break;
            }
        }

        let opened_new_batch = chosen.is_none();
        let (batch, style_is_new) = match chosen {
            Some(found) => found,
            None => {
                let fresh = self.aggregator.new_batch(
                    Uuid::new_v4().to_string(),
                    category.to_string(),
                    request.base_price,
                    now,
                );
                BatchRepository::insert_in(conn, &fresh)?;
                info!(batch_id = %fresh.batch_id, category, target = fresh.target_quantity, "新批次已开启");
                (fresh, true)
            }
        };

        let mut next = self
            .aggregator
            .apply_join(&batch, category, request.quantity, style_is_new, now)?;
        next.revision = BatchRepository::update_in(conn, &next)?;

        let member = BatchMember {
            batch_id: next.batch_id.clone(),
            order_id: order.order_id.clone(),
            style_key: request.style_key.clone(),
            quantity: request.quantity,
            joined_at: now,
            locked_unit_price: None,
        };
        BatchRepository::insert_member_in(conn, &member)?;

        let locked = next.status == BatchStatus::Locked;
        let quote = self.reprice_members_in(conn, &next, locked)?;

        AuditLogRepository::insert_in(
            conn,
            &AuditRecord::new(
                AuditEntityType::Batch,
                &next.batch_id,
                Some(batch.status.to_string()),
                next.status.to_string(),
                actor.audit_label(),
            )
            .with_payload(json!({
                "joined_order_id": order.order_id,
                "quantity": request.quantity,
                "current_quantity": next.current_quantity,
                "style_count": next.current_style_count,
                "buyer_price": quote.buyer_price.to_string(),
            })),
        )?;

        let mut events = vec![DomainEvent::BatchJoined {
            batch_id: next.batch_id.clone(),
            order_id: order.order_id.clone(),
            quantity: request.quantity,
            buyer_price: quote.buyer_price,
        }];
        if locked {
            events.push(DomainEvent::BatchLocked {
                batch_id: next.batch_id.clone(),
                current_quantity: next.current_quantity,
            });
        }

        let member = BatchMember {
            locked_unit_price: locked.then_some(quote.buyer_price),
            ..member
        };
        info!(
            batch_id = %next.batch_id,
            order_id = %order.order_id,
            fill = next.fill_percentage(),
            buyer_price = %quote.buyer_price,
            locked,
            "订单已加入批次"
        );

        Ok((
            BatchJoinOutcome {
                batch: next,
                member,
                quote,
                opened_new_batch,
            },
            events,
        ))
    }

    /// 按批次当前状态重算所有成员的买家价; freeze 时同时冻结成员单价
    ///
    /// 已付款订单的 buyer_price 不再改动。返回 1 件的参考报价
    fn reprice_members_in(&self, conn: &Connection, batch: &Batch, freeze: bool) -> ApiResult<PriceQuote> {
        let reference = self.quote_for(batch, 1)?;
        for member in BatchRepository::find_members_in(conn, &batch.batch_id)? {
            if member.locked_unit_price.is_some() {
                continue;
            }
            let quote = self.quote_for(batch, member.quantity)?;

            let mut order = OrderRepository::get_in(conn, &member.order_id)?;
            if !order.is_price_locked() && order.buyer_price != Some(quote.buyer_price) {
                order.buyer_price = Some(quote.buyer_price);
                order.updated_at = Utc::now();
                order.revision = OrderRepository::update_in(conn, &order)?;
            }
            if freeze {
                BatchRepository::set_member_price_in(conn, &batch.batch_id, &member.order_id, quote.buyer_price)?;
            }
        }
        Ok(reference)
    }

    // ==========================================
    // 锁定
    // ==========================================

    /// 手动锁定 open 批次
    pub fn lock_batch(&self, batch_id: &str, actor: &Actor) -> ApiResult<Batch> {
        ensure_privileged(actor, "lock_batch")?;
        let now = Utc::now();
        let (batch, event) = run_in_transaction(&self.conn, |tx| self.lock_in(tx, batch_id, actor, now))?;
        self.events.publish(&event);
        Ok(batch)
    }

    fn lock_in(
        &self,
        conn: &Connection,
        batch_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> ApiResult<(Batch, DomainEvent)> {
        let batch = BatchRepository::get_in(conn, batch_id)?;
        let mut next = BatchAggregator::lock(&batch, now)?;
        next.revision = BatchRepository::update_in(conn, &next)?;
        let quote = self.reprice_members_in(conn, &next, true)?;

        AuditLogRepository::insert_in(
            conn,
            &AuditRecord::new(
                AuditEntityType::Batch,
                batch_id,
                Some(batch.status.to_string()),
                next.status.to_string(),
                actor.audit_label(),
            )
            .with_payload(json!({
                "current_quantity": next.current_quantity,
                "buyer_price": quote.buyer_price.to_string(),
            })),
        )?;
        info!(batch_id, qty = next.current_quantity, fill = next.fill_percentage(), "批次已锁定");

        let event = DomainEvent::BatchLocked {
            batch_id: batch_id.to_string(),
            current_quantity: next.current_quantity,
        };
        Ok((next, event))
    }

    /// 锁定所有窗口已关闭的 open 批次, 返回被锁定的批次 ID
    pub fn lock_expired_batches(&self, now: DateTime<Utc>) -> ApiResult<Vec<String>> {
        let system = Actor::system();
        let mut locked = Vec::new();

        for batch in self.batch_repo.find_expired_open(now)? {
            match run_in_transaction(&self.conn, |tx| self.lock_in(tx, &batch.batch_id, &system, now)) {
                Ok((b, event)) => {
                    self.events.publish(&event);
                    locked.push(b.batch_id);
                }
                Err(ApiError::InvalidStateTransition { reason, .. }) => {
                    warn!(batch_id = %batch.batch_id, reason = %reason, "批次已不在 open 状态, 跳过");
                }
                Err(e) => return Err(e),
            }
        }

        if !locked.is_empty() {
            info!(count = locked.len(), "过期批次已锁定");
        }
        Ok(locked)
    }

    // ==========================================
    // 转换
    // ==========================================

    /// 把锁定批次转换为供应商订单
    ///
    /// 数量按各供应商在 target_date 的可用产能比例拆分 (最大余数法),
    /// 可用为 0 的供应商不参与。单事务完成: 任一承诺失败则全部回滚
    ///
    /// # 错误
    /// - InvalidStateTransition: 批次不是 locked
    /// - CapacityExhausted: 可用产能之和不足批次数量
    pub fn convert_batch(
        &self,
        batch_id: &str,
        supplier_ids: &[String],
        target_date: NaiveDate,
        actor: &Actor,
    ) -> ApiResult<Vec<SupplierOrder>> {
        ensure_privileged(actor, "convert_batch")?;
        if supplier_ids.is_empty() {
            return Err(ApiError::Validation("至少需要一个供应商".to_string()));
        }
        let distinct: HashSet<&String> = supplier_ids.iter().collect();
        if distinct.len() != supplier_ids.len() {
            return Err(ApiError::Validation(format!("供应商列表有重复: {:?}", supplier_ids)));
        }

        let (orders, events) = run_in_transaction(&self.conn, |tx| -> ApiResult<_> {
            let batch = BatchRepository::get_in(tx, batch_id)?;
            if batch.status != BatchStatus::Locked {
                return Err(ApiError::state("Batch", batch.status, BatchStatus::Assigned, "只有 locked 批次可以转换"));
            }
            if batch.current_quantity <= 0 {
                return Err(ApiError::Validation(format!("批次 {} 没有数量可转换", batch_id)));
            }

            let mut pool = Vec::new();
            for supplier_id in supplier_ids {
                if let Some(record) = CapacityRepository::find_in(tx, supplier_id, target_date)? {
                    let available = record.available_capacity();
                    if available > 0 {
                        pool.push((supplier_id.clone(), available, record.revision));
                    }
                }
            }
            let total_available: i64 = pool.iter().map(|(_, a, _)| *a).sum();
            if total_available < batch.current_quantity {
                return Err(ApiError::CapacityExhausted(format!(
                    "批次 {} 需要 {} 件, {} 可用合计 {}",
                    batch_id, batch.current_quantity, target_date, total_available
                )));
            }

            let weights: Vec<i64> = pool.iter().map(|(_, a, _)| *a).collect();
            let shares = split_proportionally(batch.current_quantity, &weights)?;
            let factory_price = self.quote_for(&batch, batch.current_quantity)?.factory_price;

            let mut orders = Vec::new();
            let mut events = Vec::new();
            for ((supplier_id, _, revision), share) in pool.iter().zip(shares) {
                if share == 0 {
                    continue;
                }
                let request = AssignmentRequest {
                    owner: SupplierOrderOwner::Batch(batch_id.to_string()),
                    supplier_id: supplier_id.clone(),
                    product_type: batch.product_category.clone(),
                    quantity: share,
                    target_date,
                    supplier_price: Some(factory_price),
                };
                let so = commit_assignment_in(tx, &request, *revision, actor)?;
                events.push(DomainEvent::CapacityCommitted {
                    supplier_id: so.supplier_id.clone(),
                    capacity_date: so.target_date,
                    quantity: so.quantity,
                    supplier_order_id: so.supplier_order_id.clone(),
                });
                orders.push(so);
            }

            let mut next = BatchAggregator::mark_assigned(&batch)?;
            next.revision = BatchRepository::update_in(tx, &next)?;
            AuditLogRepository::insert_in(
                tx,
                &AuditRecord::new(
                    AuditEntityType::Batch,
                    batch_id,
                    Some(batch.status.to_string()),
                    next.status.to_string(),
                    actor.audit_label(),
                )
                .with_payload(json!({
                    "supplier_orders": orders.iter().map(|so| &so.supplier_order_id).collect::<Vec<_>>(),
                    "factory_price": factory_price.to_string(),
                })),
            )?;

            events.push(DomainEvent::BatchAssigned {
                batch_id: batch_id.to_string(),
                supplier_order_ids: orders.iter().map(|so| so.supplier_order_id.clone()).collect(),
            });
            Ok((orders, events))
        })?;

        info!(batch_id, supplier_orders = orders.len(), "批次已转换为供应商订单");
        self.events.publish_all(&events);
        Ok(orders)
    }
}

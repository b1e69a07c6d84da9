// ==========================================
// 制造撮合平台 - 履约核心 - 产能分配 API
// ==========================================
// 职责: 供应商/产能维护, 候选排名, 确认分配 (扣产能 + 建供应商订单)
// 红线: 排名只读; 提交时按快照 revision 做 CAS, 冲突按策略退避重试
// 红线: 扣减与供应商订单创建同一事务, 不存在半提交
// ==========================================

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::workflow::ensure_privileged;
use crate::config::FulfillmentConfig;
use crate::db::{run_in_transaction, SharedConnection};
use crate::domain::audit_log::{AuditEntityType, AuditRecord};
use crate::domain::capacity::{CapacityConstraint, CapacityRecord, Supplier};
use crate::domain::supplier_order::{SupplierOrder, SupplierOrderOwner};
use crate::domain::types::{Actor, ActorRole, BatchStatus, WorkflowStatus};
use crate::engine::capacity_matcher::{CapacityMatcher, MatchCandidate, MatchRequest};
use crate::engine::events::{DomainEvent, EventBus};
use crate::engine::retry::{run_with_retry, RetryPolicy};
use crate::repository::{
    AuditLogRepository, BatchRepository, CapacityRepository, OrderRepository, SupplierOrderRepository,
    SupplierRepository,
};
use crate::services::advisory::{AdvisoryService, AnnotatedRanking};

/// 确认分配请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub owner: SupplierOrderOwner,
    pub supplier_id: String,
    pub product_type: String,
    pub quantity: i64,
    pub target_date: NaiveDate,
    pub supplier_price: Option<Decimal>,
}

// ==========================================
// AssignmentApi
// ==========================================
pub struct AssignmentApi {
    conn: SharedConnection,
    supplier_repo: Arc<SupplierRepository>,
    capacity_repo: Arc<CapacityRepository>,
    matcher: CapacityMatcher,
    retry: RetryPolicy,
    advisory: Arc<AdvisoryService>,
    events: Arc<EventBus>,
}

impl AssignmentApi {
    pub fn new(
        conn: SharedConnection,
        matcher: CapacityMatcher,
        retry: RetryPolicy,
        advisory: Arc<AdvisoryService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            supplier_repo: Arc::new(SupplierRepository::new(conn.clone())),
            capacity_repo: Arc::new(CapacityRepository::new(conn.clone())),
            conn,
            matcher,
            retry,
            advisory,
            events,
        }
    }

    /// 按已加载的配置构造 (无外部建议)
    pub fn from_config(conn: SharedConnection, config: &FulfillmentConfig, events: Arc<EventBus>) -> ApiResult<Self> {
        let matcher = CapacityMatcher::new(config.match_weights)?;
        Ok(Self::new(
            conn,
            matcher,
            config.commit_retry,
            Arc::new(AdvisoryService::none()),
            events,
        ))
    }

    pub fn with_advisory(mut self, advisory: Arc<AdvisoryService>) -> Self {
        self.advisory = advisory;
        self
    }

    // ==========================================
    // 供应商与产能维护
    // ==========================================

    pub fn upsert_supplier(&self, supplier: &Supplier, actor: &Actor) -> ApiResult<()> {
        ensure_privileged(actor, "upsert_supplier")?;
        if supplier.supplier_id.trim().is_empty() {
            return Err(ApiError::Validation("supplier_id 不能为空".to_string()));
        }
        if !(0.0..=100.0).contains(&supplier.performance_score) {
            return Err(ApiError::Validation(format!(
                "绩效分必须在 0 - 100 之间: {}",
                supplier.performance_score
            )));
        }
        self.supplier_repo.upsert(supplier)?;
        Ok(())
    }

    pub fn get_supplier(&self, supplier_id: &str) -> ApiResult<Supplier> {
        self.supplier_repo
            .find_by_id(supplier_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Supplier(id={}) 不存在", supplier_id)))
    }

    /// 维护总产能 (供应商本人或管理员)
    ///
    /// 总产能不得低于已承诺量; 已承诺量只由分配流程修改
    pub fn upsert_capacity(&self, record: &CapacityRecord, actor: &Actor) -> ApiResult<CapacityRecord> {
        let own = actor.role == ActorRole::Supplier && actor.id == record.supplier_id;
        if !(actor.role.is_privileged() || own) {
            return Err(ApiError::PermissionDenied(format!(
                "{} 不能维护供应商 {} 的产能",
                actor.audit_label(),
                record.supplier_id
            )));
        }
        if record.total_capacity < 0 {
            return Err(ApiError::Validation(format!("总产能不能为负: {}", record.total_capacity)));
        }

        let saved = run_in_transaction(&self.conn, |tx| -> ApiResult<CapacityRecord> {
            if SupplierRepository::find_by_id_in(tx, &record.supplier_id)?.is_none() {
                return Err(ApiError::NotFound(format!("Supplier(id={}) 不存在", record.supplier_id)));
            }
            let saved = CapacityRepository::upsert_in(tx, record)?;
            AuditLogRepository::insert_in(
                tx,
                &AuditRecord::new(
                    AuditEntityType::Capacity,
                    format!("{}@{}", saved.supplier_id, saved.capacity_date),
                    None,
                    format!("total={}", saved.total_capacity),
                    actor.audit_label(),
                ),
            )?;
            Ok(saved)
        })?;

        info!(
            supplier_id = %saved.supplier_id,
            date = %saved.capacity_date,
            total = saved.total_capacity,
            used = saved.current_utilization,
            "产能记录已更新"
        );
        Ok(saved)
    }

    pub fn get_capacity(&self, supplier_id: &str, date: NaiveDate) -> ApiResult<Option<CapacityRecord>> {
        Ok(self.capacity_repo.find(supplier_id, date)?)
    }

    pub fn list_capacity_for_date(&self, date: NaiveDate) -> ApiResult<Vec<CapacityRecord>> {
        Ok(self.capacity_repo.list_for_date(date)?)
    }

    // ==========================================
    // 排名
    // ==========================================

    /// 候选供应商排名 (只读)
    ///
    /// # 错误
    /// - CapacityExhausted: 没有供应商满足数量/日期
    pub fn rank_suppliers(&self, request: &MatchRequest, as_of: NaiveDate) -> ApiResult<Vec<MatchCandidate>> {
        let suppliers = self.supplier_repo.list_eligible()?;
        let records = self.capacity_repo.list_for_date(request.target_date)?;
        let ranked = self.matcher.rank(request, &suppliers, &records, as_of)?;

        if ranked.is_empty() {
            return Err(ApiError::CapacityExhausted(format!(
                "{} 在 {} 无供应商可承接 {} 件",
                request.specialization, request.target_date, request.quantity
            )));
        }
        Ok(ranked)
    }

    /// 排名 + 外部建议; 建议失败或超时只记录, 排名照常返回
    pub async fn rank_with_advice(&self, request: &MatchRequest, as_of: NaiveDate) -> ApiResult<AnnotatedRanking> {
        let ranked = self.rank_suppliers(request, as_of)?;
        let annotated = self.advisory.annotate(request, ranked).await;
        match &annotated.advisory_error {
            Some(err) if self.advisory.is_configured() => {
                warn!(error = %err, "外部建议不可用, 返回纯评分排名");
            }
            _ => {}
        }
        Ok(annotated)
    }

    // ==========================================
    // 确认分配
    // ==========================================

    /// 确认分配: 扣减产能并创建 pending 供应商订单
    ///
    /// # 错误
    /// - CapacityExhausted: 记录不存在或余量不足
    /// - Conflict: 重试次数用尽仍冲突
    #[instrument(skip(self, request, actor), fields(supplier = %request.supplier_id, qty = request.quantity))]
    pub fn commit_assignment(&self, request: &AssignmentRequest, actor: &Actor) -> ApiResult<SupplierOrder> {
        ensure_privileged(actor, "commit_assignment")?;
        validate_assignment(request)?;

        let so = run_with_retry(
            &self.retry,
            "commit_assignment",
            |e: &ApiError| e.is_retryable(),
            |attempt| {
                let snapshot = self
                    .capacity_repo
                    .find(&request.supplier_id, request.target_date)?
                    .ok_or_else(|| exhausted(request, 0))?;
                if !snapshot.can_commit(request.quantity) {
                    return Err(exhausted(request, snapshot.available_capacity()));
                }
                if attempt > 1 {
                    info!(attempt, revision = snapshot.revision, "按新快照重试分配");
                }

                run_in_transaction(&self.conn, |tx| {
                    commit_assignment_in(tx, request, snapshot.revision, actor)
                })
            },
        )?;

        self.events.publish(&DomainEvent::CapacityCommitted {
            supplier_id: so.supplier_id.clone(),
            capacity_date: so.target_date,
            quantity: so.quantity,
            supplier_order_id: so.supplier_order_id.clone(),
        });
        Ok(so)
    }
}

fn validate_assignment(request: &AssignmentRequest) -> ApiResult<()> {
    if request.quantity <= 0 {
        return Err(ApiError::Validation(format!("分配数量必须为正: {}", request.quantity)));
    }
    if let Some(price) = request.supplier_price {
        if price <= Decimal::ZERO {
            return Err(ApiError::Validation(format!("工厂价必须为正: {}", price)));
        }
    }
    Ok(())
}

fn exhausted(request: &AssignmentRequest, available: i64) -> ApiError {
    ApiError::CapacityExhausted(format!(
        "供应商 {} 在 {} 可用 {}, 需求 {}",
        request.supplier_id, request.target_date, available, request.quantity
    ))
}

/// 事务内: 按 expected_revision 扣减产能, 创建供应商订单并记审计
pub(crate) fn commit_assignment_in(
    conn: &Connection,
    request: &AssignmentRequest,
    expected_revision: i64,
    actor: &Actor,
) -> ApiResult<SupplierOrder> {
    validate_assignment(request)?;

    // 归属方必须仍可接收产能: 订单未结束且未挂起, 批次已锁定且未转换
    match &request.owner {
        SupplierOrderOwner::Order(order_id) => {
            let order = OrderRepository::get_in(conn, order_id)?;
            if order.workflow_status.is_terminal() || order.workflow_status == WorkflowStatus::OnHold {
                return Err(ApiError::state(
                    "Order",
                    order.workflow_status,
                    "commit_assignment",
                    format!("订单 {} 已结束或挂起, 不能分配产能", order_id),
                ));
            }
        }
        SupplierOrderOwner::Batch(batch_id) => {
            let batch = BatchRepository::get_in(conn, batch_id)?;
            if batch.status != BatchStatus::Locked {
                return Err(ApiError::state(
                    "Batch",
                    batch.status,
                    "commit_assignment",
                    format!("批次 {} 未锁定或已转换, 不能分配产能", batch_id),
                ));
            }
        }
    }
    let supplier = SupplierRepository::find_by_id_in(conn, &request.supplier_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Supplier(id={}) 不存在", request.supplier_id)))?;
    if !supplier.verified || !supplier.active {
        return Err(ApiError::Validation(format!(
            "供应商 {} 未认证或已停用",
            supplier.supplier_id
        )));
    }

    CapacityRepository::commit_in(
        conn,
        &request.supplier_id,
        request.target_date,
        request.quantity,
        expected_revision,
    )?;

    let so = SupplierOrder::new(
        Uuid::new_v4().to_string(),
        request.owner.clone(),
        request.supplier_id.clone(),
        request.product_type.clone(),
        request.quantity,
        request.target_date,
        request.supplier_price,
    );
    SupplierOrderRepository::insert_in(conn, &so)?;

    AuditLogRepository::insert_in(
        conn,
        &AuditRecord::new(
            AuditEntityType::SupplierOrder,
            &so.supplier_order_id,
            None,
            so.status.to_string(),
            actor.audit_label(),
        )
        .with_payload(json!({
            "owner_kind": so.owner.kind_str(),
            "owner_id": so.owner.id(),
            "supplier_id": so.supplier_id,
            "quantity": so.quantity,
            "capacity_date": so.target_date.to_string(),
        })),
    )?;

    info!(
        supplier_order_id = %so.supplier_order_id,
        supplier_id = %so.supplier_id,
        qty = so.quantity,
        date = %so.target_date,
        "产能已承诺, 供应商订单已创建"
    );
    Ok(so)
}

/// 事务内: 释放供应商订单占用的产能
pub(crate) fn release_capacity_in(conn: &Connection, so: &SupplierOrder) -> ApiResult<DomainEvent> {
    CapacityRepository::release_in(conn, &so.supplier_id, so.target_date, so.quantity)?;
    info!(
        supplier_order_id = %so.supplier_order_id,
        supplier_id = %so.supplier_id,
        qty = so.quantity,
        "产能已释放"
    );
    Ok(DomainEvent::CapacityReleased {
        supplier_id: so.supplier_id.clone(),
        capacity_date: so.target_date,
        quantity: so.quantity,
        supplier_order_id: so.supplier_order_id.clone(),
    })
}

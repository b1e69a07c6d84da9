// ==========================================
// 制造撮合平台 - 履约核心 - 生产进度 API
// ==========================================
// 职责: 阶段模板维护, 阶段进度上报, 整体进度查询
// 红线: 只有 accepted / in_progress 的供应商订单可上报
// 红线: 首次上报把供应商订单推进到 in_progress; 全部 100% 时自动完工
// ==========================================

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::api::supplier_order_api::apply_command_in;
use crate::api::workflow::ensure_privileged;
use crate::db::{run_in_transaction, SharedConnection};
use crate::domain::audit_log::{AuditEntityType, AuditRecord};
use crate::domain::production::{ProductionProgress, ProductionStage, StageTemplate, StageUpdate};
use crate::domain::supplier_order::SupplierOrder;
use crate::domain::types::{Actor, ActorRole, SupplierOrderStatus};
use crate::engine::events::{DomainEvent, EventBus};
use crate::engine::production_tracker::ProductionStageTracker;
use crate::engine::supplier_order_state_machine::SupplierOrderCommand;
use crate::repository::{
    AuditLogRepository, ProductionStageRepository, RepositoryError, StageTemplateRepository,
    SupplierOrderRepository,
};

/// 一次阶段上报的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageUpdateOutcome {
    pub stage: ProductionStage,
    pub progress: ProductionProgress,
    pub supplier_order: SupplierOrder,
}

pub struct ProductionApi {
    conn: SharedConnection,
    stage_repo: Arc<ProductionStageRepository>,
    template_repo: Arc<StageTemplateRepository>,
    events: Arc<EventBus>,
}

impl ProductionApi {
    pub fn new(conn: SharedConnection, events: Arc<EventBus>) -> Self {
        Self {
            stage_repo: Arc::new(ProductionStageRepository::new(conn.clone())),
            template_repo: Arc::new(StageTemplateRepository::new(conn.clone())),
            conn,
            events,
        }
    }

    // ==========================================
    // 模板
    // ==========================================

    pub fn upsert_stage_template(&self, template: &StageTemplate, actor: &Actor) -> ApiResult<()> {
        ensure_privileged(actor, "upsert_stage_template")?;
        if template.product_category.trim().is_empty() {
            return Err(ApiError::Validation("模板品类不能为空".to_string()));
        }
        if template.steps.is_empty() {
            return Err(ApiError::Validation("阶段模板不能为空".to_string()));
        }
        if let Some(bad) = template
            .steps
            .iter()
            .find(|s| s.stage_name.trim().is_empty() || s.estimated_days < 0)
        {
            return Err(ApiError::Validation(format!(
                "非法的模板步骤: {:?} ({} 天)",
                bad.stage_name, bad.estimated_days
            )));
        }

        let normalized = StageTemplate {
            product_category: template.product_category.trim().to_lowercase(),
            steps: template.steps.clone(),
        };
        self.template_repo.upsert(&normalized)?;
        info!(category = %normalized.product_category, steps = normalized.steps.len(), "阶段模板已更新");
        Ok(())
    }

    pub fn stage_template(&self, product_category: &str) -> ApiResult<Option<StageTemplate>> {
        Ok(self.template_repo.find_by_category(product_category)?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn stages(&self, supplier_order_id: &str) -> ApiResult<Vec<ProductionStage>> {
        Ok(self.stage_repo.find_by_supplier_order(supplier_order_id)?)
    }

    pub fn progress(&self, supplier_order_id: &str) -> ApiResult<ProductionProgress> {
        let stages = self.stages(supplier_order_id)?;
        Ok(ProductionStageTracker::progress(supplier_order_id, &stages))
    }

    pub fn current_stage(&self, supplier_order_id: &str) -> ApiResult<Option<ProductionStage>> {
        let stages = self.stages(supplier_order_id)?;
        Ok(ProductionStageTracker::current_stage(&stages).cloned())
    }

    // ==========================================
    // 上报
    // ==========================================

    /// 上报阶段进度
    ///
    /// # 参数
    /// - expected_revision: 调用方读到的阶段 revision; 给出且已变化时拒绝
    ///
    /// # 错误
    /// - Validation: 百分比越界或回退
    /// - InvalidStateTransition: 供应商订单不在生产中, 或阶段已被并发修改
    /// - PermissionDenied: 非本供应商且非管理员/系统
    pub fn update_stage(
        &self,
        supplier_order_id: &str,
        update: &StageUpdate,
        expected_revision: Option<i64>,
        actor: &Actor,
    ) -> ApiResult<StageUpdateOutcome> {
        let (outcome, events) = run_in_transaction(&self.conn, |tx| -> ApiResult<_> {
            let mut so = SupplierOrderRepository::get_in(tx, supplier_order_id)?;

            let is_owner = actor.role == ActorRole::Supplier && actor.id == so.supplier_id;
            if !(is_owner || actor.role.is_privileged()) {
                return Err(ApiError::PermissionDenied(format!(
                    "{} 不能上报供应商订单 {} 的进度",
                    actor.audit_label(),
                    supplier_order_id
                )));
            }
            if !matches!(so.status, SupplierOrderStatus::Accepted | SupplierOrderStatus::InProgress) {
                return Err(ApiError::state(
                    "ProductionStage",
                    so.status,
                    "update_stage",
                    "供应商订单未在生产中",
                ));
            }

            let mut stages = ProductionStageRepository::find_by_supplier_order_in(tx, supplier_order_id)?;
            if stages.is_empty() {
                return Err(ApiError::state(
                    "ProductionStage",
                    so.status,
                    "update_stage",
                    "供应商订单没有生产阶段",
                ));
            }

            let mut stage = ProductionStageTracker::apply_update(&stages, update, Utc::now())?;
            if let Some(expected) = expected_revision {
                if expected != stage.revision {
                    return Err(stale_stage(&stage, expected, stage.revision));
                }
            }
            let before = stages
                .iter()
                .find(|s| s.stage_number == stage.stage_number)
                .map(|s| s.status.to_db_str())
                .unwrap_or_default();

            stage.revision = match ProductionStageRepository::update_in(tx, &stage) {
                Ok(revision) => revision,
                Err(RepositoryError::OptimisticLockFailure { expected, actual, .. }) => {
                    return Err(stale_stage(&stage, expected, actual));
                }
                Err(e) => return Err(e.into()),
            };

            AuditLogRepository::insert_in(
                tx,
                &AuditRecord::new(
                    AuditEntityType::ProductionStage,
                    format!("{}#{}", supplier_order_id, stage.stage_number),
                    Some(before.to_string()),
                    stage.status.to_db_str(),
                    actor.audit_label(),
                )
                .with_payload(json!({
                    "completion_percentage": stage.completion_percentage,
                    "photos_added": update.photos.len(),
                })),
            )?;

            let mut events = vec![DomainEvent::StageUpdated {
                supplier_order_id: supplier_order_id.to_string(),
                stage_number: stage.stage_number,
                completion_percentage: stage.completion_percentage,
            }];

            if let Some(slot) = stages.iter_mut().find(|s| s.stage_number == stage.stage_number) {
                *slot = stage.clone();
            }

            if so.status == SupplierOrderStatus::Accepted {
                let (next, more) = apply_command_in(tx, &so, &SupplierOrderCommand::StartProduction, actor)?;
                so = next;
                events.extend(more);
            }
            if ProductionStageTracker::is_complete(&stages) {
                let (next, more) = apply_command_in(tx, &so, &SupplierOrderCommand::Complete, actor)?;
                so = next;
                events.extend(more);
            }

            let progress = ProductionStageTracker::progress(supplier_order_id, &stages);
            info!(
                supplier_order_id,
                stage = stage.stage_number,
                pct = stage.completion_percentage,
                overall = progress.overall_percentage,
                "生产进度已上报"
            );
            Ok((
                StageUpdateOutcome {
                    stage,
                    progress,
                    supplier_order: so,
                },
                events,
            ))
        })?;

        self.events.publish_all(&events);
        Ok(outcome)
    }
}

fn stale_stage(stage: &ProductionStage, expected: i64, actual: i64) -> ApiError {
    ApiError::state(
        "ProductionStage",
        format!("revision={}", actual),
        format!("revision={}", expected + 1),
        format!(
            "阶段 {}#{} 已被并发修改, 请刷新后重试",
            stage.supplier_order_id, stage.stage_number
        ),
    )
}

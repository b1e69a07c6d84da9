// ==========================================
// 制造撮合平台 - 履约核心 - 外部供应商建议
// ==========================================
// 职责: 调用外部建议服务, 给排名结果附加 reasoning/confidence
// 红线: 建议只做注释, 永不改变权威排名顺序
// 红线: 超时或失败降级为无建议, 不阻塞任何流程
// ==========================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::capacity_matcher::{MatchCandidate, MatchRequest};

/// 单个供应商的建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryHint {
    pub supplier_id: String,
    pub reasoning: String,
    pub confidence: f64,
}

/// 外部建议服务
#[async_trait]
pub trait SupplierAdvisor: Send + Sync {
    async fn advise(
        &self,
        request: &MatchRequest,
        candidates: &[MatchCandidate],
    ) -> anyhow::Result<Vec<AdvisoryHint>>;
}

/// 附加建议后的排名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRanking {
    pub candidates: Vec<MatchCandidate>,
    /// 建议不可用时的原因 (未配置/超时/出错)
    pub advisory_error: Option<String>,
}

pub struct AdvisoryService {
    advisor: Option<Arc<dyn SupplierAdvisor>>,
    timeout: Duration,
}

impl AdvisoryService {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn with_advisor(advisor: Arc<dyn SupplierAdvisor>, timeout: Duration) -> Self {
        Self {
            advisor: Some(advisor),
            timeout,
        }
    }

    pub fn none() -> Self {
        Self {
            advisor: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.advisor.is_some()
    }

    /// 给排名附加建议; 顺序与输入一致
    pub async fn annotate(&self, request: &MatchRequest, mut candidates: Vec<MatchCandidate>) -> AnnotatedRanking {
        let Some(advisor) = &self.advisor else {
            return AnnotatedRanking {
                candidates,
                advisory_error: Some("advisor not configured".to_string()),
            };
        };
        if candidates.is_empty() {
            return AnnotatedRanking {
                candidates,
                advisory_error: None,
            };
        }

        let outcome = tokio::time::timeout(self.timeout, advisor.advise(request, &candidates)).await;
        let hints = match outcome {
            Ok(Ok(hints)) => hints,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "供应商建议服务出错, 降级为人工判断");
                return AnnotatedRanking {
                    candidates,
                    advisory_error: Some(format!("advisor failed: {:#}", e)),
                };
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "供应商建议服务超时");
                return AnnotatedRanking {
                    candidates,
                    advisory_error: Some("advisor timed out".to_string()),
                };
            }
        };

        let by_id: HashMap<String, AdvisoryHint> = hints
            .into_iter()
            .map(|h| (h.supplier_id.clone(), h))
            .collect();
        for c in candidates.iter_mut() {
            if let Some(hint) = by_id.get(&c.supplier_id) {
                c.reasoning = Some(hint.reasoning.clone());
                c.advisory_confidence = Some(hint.confidence.clamp(0.0, 1.0));
            }
        }

        AnnotatedRanking {
            candidates,
            advisory_error: None,
        }
    }
}

impl Default for AdvisoryService {
    fn default() -> Self {
        Self::none()
    }
}

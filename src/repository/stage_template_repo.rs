// ==========================================
// 制造撮合平台 - 履约核心 - 阶段模板仓储
// ==========================================

use crate::domain::production::{StageTemplate, StageTemplateStep};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, TransactionBehavior};
use std::sync::{Arc, Mutex};

pub struct StageTemplateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StageTemplateRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 整体替换某品类的模板步骤
    pub fn upsert(&self, template: &StageTemplate) -> RepositoryResult<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM stage_templates WHERE product_category = ?1",
            params![template.product_category],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO stage_templates (product_category, step_order, stage_name, estimated_days)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for (idx, step) in template.steps.iter().enumerate() {
                stmt.execute(params![
                    template.product_category,
                    idx as i64 + 1,
                    step.stage_name,
                    step.estimated_days,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// 按品类查询模板; 无步骤时返回 None
    pub fn find_by_category_in(
        conn: &Connection,
        product_category: &str,
    ) -> RepositoryResult<Option<StageTemplate>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT stage_name, estimated_days
            FROM stage_templates
            WHERE product_category = ?1
            ORDER BY step_order
            "#,
        )?;
        let steps = stmt
            .query_map(params![product_category], |row| {
                Ok(StageTemplateStep {
                    stage_name: row.get(0)?,
                    estimated_days: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if steps.is_empty() {
            return Ok(None);
        }
        Ok(Some(StageTemplate {
            product_category: product_category.to_string(),
            steps,
        }))
    }

    pub fn find_by_category(&self, product_category: &str) -> RepositoryResult<Option<StageTemplate>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Self::find_by_category_in(&conn, product_category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_previous_steps() {
        let repo = StageTemplateRepository::new(crate::db::open_in_memory_shared().unwrap());
        repo.upsert(&StageTemplate {
            product_category: "outerwear".to_string(),
            steps: vec![
                StageTemplateStep::new("cutting", 3),
                StageTemplateStep::new("sewing", 6),
                StageTemplateStep::new("pressing", 1),
            ],
        })
        .unwrap();
        repo.upsert(&StageTemplate {
            product_category: "outerwear".to_string(),
            steps: vec![StageTemplateStep::new("cutting", 2)],
        })
        .unwrap();

        let found = repo.find_by_category("outerwear").unwrap().unwrap();
        assert_eq!(found.steps, vec![StageTemplateStep::new("cutting", 2)]);
        assert!(repo.find_by_category("dresses").unwrap().is_none());
    }
}

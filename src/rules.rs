//! Rules (C6): CRUD over per-tenant policy entries. The engine only
//! stores and filters these; enforcement is read by the surrounding
//! assistant (§4.6). Grounded on the source's `list_rules`/`update_rule`/
//! `touch_rule` trio in `qdrant_store.py`.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::index::{Filter, FilterCond, RecordType, UpsertPoint, VectorIndex};
use crate::memstore::{rule_from_payload, rule_point_id, rule_to_payload};
use crate::tenant::TenantContext;
use crate::types::{Enforcement, Rule};

/// Fields a caller may supply when updating a rule; `None` leaves the
/// field untouched (§4.6: "accepts only `{scope, condition,
/// enforcement}`").
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub scope: Option<String>,
    pub condition: Option<String>,
    pub enforcement: Option<Enforcement>,
}

pub async fn create_rule(
    index: &dyn VectorIndex,
    ctx: &TenantContext,
    scope: impl Into<String>,
    condition: impl Into<String>,
    enforcement: Enforcement,
) -> Result<Rule> {
    let rule = Rule {
        rule_id: format!("rule_{}", Uuid::new_v4().simple()),
        scope: scope.into(),
        condition: condition.into(),
        enforcement,
        created: Utc::now(),
        last_triggered: None,
    };
    index
        .upsert(UpsertPoint {
            id: rule_point_id(&ctx.user_id, &rule.rule_id),
            dense: Vec::new(),
            text: rule.condition.clone(),
            payload: rule_to_payload(&ctx.user_id, &rule),
        })
        .await?;
    Ok(rule)
}

/// Newest-first, per §4.6.
pub async fn list_rules(index: &dyn VectorIndex, ctx: &TenantContext) -> Result<Vec<Rule>> {
    let filter = Filter::new(RecordType::Rule).with(FilterCond::Eq("user_id", ctx.user_id.clone()));
    let points = index.scroll(&filter, 500, Some("created")).await?;
    Ok(points.into_iter().filter_map(|p| rule_from_payload(&p.payload)).collect())
}

pub async fn get_rule(index: &dyn VectorIndex, ctx: &TenantContext, rule_id: &str) -> Result<Option<Rule>> {
    let filter = Filter::new(RecordType::Rule)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Eq("rule_id", rule_id.to_string()));
    let points = index.scroll(&filter, 1, None).await?;
    Ok(points.into_iter().next().and_then(|p| rule_from_payload(&p.payload)))
}

pub async fn update_rule(index: &dyn VectorIndex, ctx: &TenantContext, rule_id: &str, update: RuleUpdate) -> Result<()> {
    let Some(existing) = get_rule(index, ctx, rule_id).await? else {
        return Err(EngineError::NotFound(format!("rule {rule_id}")));
    };
    let updated = Rule {
        scope: update.scope.unwrap_or(existing.scope),
        condition: update.condition.unwrap_or(existing.condition),
        enforcement: update.enforcement.unwrap_or(existing.enforcement),
        ..existing
    };
    index
        .upsert(UpsertPoint {
            id: rule_point_id(&ctx.user_id, rule_id),
            dense: Vec::new(),
            text: updated.condition.clone(),
            payload: rule_to_payload(&ctx.user_id, &updated),
        })
        .await
}

pub async fn delete_rule(index: &dyn VectorIndex, ctx: &TenantContext, rule_id: &str) -> Result<bool> {
    let filter = Filter::new(RecordType::Rule)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Eq("rule_id", rule_id.to_string()));
    let deleted = index.delete(&filter).await?;
    Ok(deleted > 0)
}

/// Record that `rule_id` fired just now.
pub async fn touch_rule(index: &dyn VectorIndex, ctx: &TenantContext, rule_id: &str) -> Result<()> {
    let Some(existing) = get_rule(index, ctx, rule_id).await? else {
        return Err(EngineError::NotFound(format!("rule {rule_id}")));
    };
    index
        .set_payload(
            &[rule_point_id(&ctx.user_id, rule_id)],
            serde_json::json!({"last_triggered": Utc::now().timestamp() as f64}),
        )
        .await?;
    let _ = existing;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sqlite::SqliteIndex;

    #[tokio::test]
    async fn create_then_list_returns_the_rule() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let ctx = TenantContext::user("u1");
        let rule = create_rule(&index, &ctx, "global", "never commit secrets", Enforcement::Enforce)
            .await
            .unwrap();
        let rules = list_rules(&index, &ctx).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule_id, rule.rule_id);
    }

    #[tokio::test]
    async fn update_rule_only_touches_the_allowed_fields() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let ctx = TenantContext::user("u1");
        let rule = create_rule(&index, &ctx, "global", "old condition", Enforcement::Suggest)
            .await
            .unwrap();
        update_rule(
            &index,
            &ctx,
            &rule.rule_id,
            RuleUpdate {
                condition: Some("new condition".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let updated = get_rule(&index, &ctx, &rule.rule_id).await.unwrap().unwrap();
        assert_eq!(updated.condition, "new condition");
        assert_eq!(updated.scope, "global");
        assert_eq!(updated.enforcement, Enforcement::Suggest);
    }

    #[tokio::test]
    async fn touch_rule_sets_last_triggered() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let ctx = TenantContext::user("u1");
        let rule = create_rule(&index, &ctx, "global", "cond", Enforcement::Block).await.unwrap();
        assert!(get_rule(&index, &ctx, &rule.rule_id).await.unwrap().unwrap().last_triggered.is_none());
        touch_rule(&index, &ctx, &rule.rule_id).await.unwrap();
        assert!(get_rule(&index, &ctx, &rule.rule_id).await.unwrap().unwrap().last_triggered.is_some());
    }

    #[tokio::test]
    async fn delete_rule_removes_it() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let ctx = TenantContext::user("u1");
        let rule = create_rule(&index, &ctx, "global", "cond", Enforcement::Suggest).await.unwrap();
        assert!(delete_rule(&index, &ctx, &rule.rule_id).await.unwrap());
        assert!(get_rule(&index, &ctx, &rule.rule_id).await.unwrap().is_none());
    }
}

//! CRUD and bulk surfaces that sit alongside `Remember`/`Recall`: `Forget`,
//! `Pin`/`Unpin`, `UpdateMemory`, `ListMemories`, `GetMemory`, `Scan`, and
//! `Migrate`. Grounded on `qdrant_store.py`'s `delete_memory`,
//! `update_memory`, `set_pinned`, `list_memories`, `count_by_gate`/
//! `count_by_sensitivity`, and `migrate_user_id`, and on `tools/forget.py`
//! for the private-then-team deletion fallback.

use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::index::{Filter, FilterCond, RecordType, VectorIndex};
use crate::memstore::{get_memory_raw, memory_from_payload, memory_point_id, upsert_memory};
use crate::tenant::{make_filter, FilterOptions, TenantContext};
use crate::types::{ListOptions, Memory, ScanReport, UpdateMemoryInput};

/// `GetMemory`: private-then-team lookup, matching `Recall`'s
/// materialization fallback (§4.3 step 2).
pub async fn get_memory(index: &dyn VectorIndex, ctx: &TenantContext, memory_id: &str) -> Result<Option<Memory>> {
    if let Some(mem) = get_memory_raw(index, &ctx.user_id, memory_id).await? {
        return Ok(Some(mem));
    }
    if let Some(team_id) = &ctx.team_id {
        let team_user_id = format!("team:{team_id}");
        return get_memory_raw(index, &team_user_id, memory_id).await;
    }
    Ok(None)
}

/// `Forget(ctx, memory_id, reason, is_team_admin)`: try the private
/// namespace first; if absent and `ctx.team_id` is set, try the team
/// namespace, refusing deletion unless the caller created the memory or
/// `is_team_admin` is set (the admin/owner role lookup itself is an
/// authentication concern the caller resolves before calling in — §1
/// out-of-scope, per the supplemented-surface note in `tools/forget.py`).
pub async fn forget(
    index: &dyn VectorIndex,
    ctx: &TenantContext,
    memory_id: &str,
    is_team_admin: bool,
) -> Result<String> {
    let private_filter = Filter::new(RecordType::Memory)
        .with(FilterCond::Eq("memory_id", memory_id.to_string()))
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()));
    if index.delete(&private_filter).await? > 0 {
        return Ok(format!("Forgotten: {memory_id}."));
    }

    if let Some(team_id) = &ctx.team_id {
        let team_user_id = format!("team:{team_id}");
        if let Some(mem) = get_memory_raw(index, &team_user_id, memory_id).await? {
            let is_owner = mem.created_by.as_deref() == Some(ctx.user_id.as_str());
            if !is_owner && !is_team_admin {
                return Ok(format!(
                    "Cannot delete team memory {memory_id}: only the creator or a team admin can delete it."
                ));
            }
            let team_filter = Filter::new(RecordType::Memory)
                .with(FilterCond::Eq("memory_id", memory_id.to_string()))
                .with(FilterCond::Eq("user_id", team_user_id));
            index.delete(&team_filter).await?;
            return Ok(format!("Forgotten: {memory_id}."));
        }
    }

    Ok(format!("No memory found with id: {memory_id}"))
}

async fn set_pinned(index: &dyn VectorIndex, ctx: &TenantContext, memory_id: &str, pinned: bool) -> Result<()> {
    let Some(_) = get_memory(index, ctx, memory_id).await? else {
        return Err(EngineError::NotFound(format!("memory {memory_id}")));
    };
    index
        .set_payload(&[memory_point_id(memory_id)], serde_json::json!({"pinned": pinned}))
        .await
}

pub async fn pin(index: &dyn VectorIndex, ctx: &TenantContext, memory_id: &str) -> Result<()> {
    set_pinned(index, ctx, memory_id, true).await
}

pub async fn unpin(index: &dyn VectorIndex, ctx: &TenantContext, memory_id: &str) -> Result<()> {
    set_pinned(index, ctx, memory_id, false).await
}

/// `UpdateMemory`: mutate `content`/`person`/`project`; re-embeds only
/// when `content` changes (§3 Lifecycle: "Update (caller-supplied fields;
/// re-embeds when `content` changes)"). `Pin`/`Unpin`/`Reclassify` are
/// separate named operations and are not reachable through this path.
pub async fn update_memory(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    ctx: &TenantContext,
    memory_id: &str,
    update: UpdateMemoryInput,
) -> Result<Memory> {
    let Some(mut mem) = get_memory(index, ctx, memory_id).await? else {
        return Err(EngineError::NotFound(format!("memory {memory_id}")));
    };
    let content_changed = update.content.is_some() && update.content.as_deref() != Some(mem.content.as_str());

    if let Some(content) = update.content {
        if content.len() > crate::types::MAX_CONTENT_LEN {
            return Err(EngineError::Validation(format!(
                "content exceeds {} characters",
                crate::types::MAX_CONTENT_LEN
            )));
        }
        mem.content = content;
    }
    if let Some(person) = update.person {
        mem.person = Some(person);
    }
    if let Some(project) = update.project {
        mem.project = Some(project);
    }

    let owner = mem.created_by.clone().unwrap_or_else(|| ctx.user_id.clone());
    let owner_key = match mem.team_id {
        Some(ref team_id) if mem.visibility == crate::types::Visibility::Team => format!("team:{team_id}"),
        _ => owner,
    };

    if content_changed {
        upsert_memory(index, embedder, &owner_key, &mem).await?;
    } else {
        index
            .set_payload(
                &[memory_point_id(memory_id)],
                serde_json::json!({"person": mem.person, "project": mem.project}),
            )
            .await?;
    }
    Ok(mem)
}

/// `ListMemories`: tenant-filtered scan narrowed by `ListOptions`, newest
/// first, with client-side pagination (the reference index's `scroll`
/// does not support a native offset — §6: "paginated scan"; the source's
/// `list_memories` applies the same `offset`-after-`scroll` pattern).
/// `pinned` is narrowed client-side too: it isn't one of §6's required
/// keyword indexes, so there's no indexed column to filter on in the
/// reference `VectorIndex`.
pub async fn list_memories(index: &dyn VectorIndex, ctx: &TenantContext, opts: &ListOptions) -> Result<Vec<Memory>> {
    let filter_opts = FilterOptions {
        gate: opts.gate,
        person: opts.person.clone(),
        project: opts.project.clone(),
        visibility: opts.visibility,
        sensitivity: None,
        date: None,
    };
    let filter = make_filter(ctx, RecordType::Memory, &filter_opts);
    let fetch_limit = opts.offset + opts.limit.max(1);
    let points = index.scroll(&filter, fetch_limit, Some("created")).await?;
    let mut memories: Vec<Memory> = points
        .into_iter()
        .filter_map(|p| memory_from_payload(&p.payload).ok())
        .collect();
    if let Some(pinned) = opts.pinned {
        memories.retain(|m| m.pinned == pinned);
    }
    if opts.offset > 0 {
        memories = memories.into_iter().skip(opts.offset).collect();
    }
    memories.truncate(opts.limit.max(1));
    Ok(memories)
}

/// `Teams.Memories.List`: the combined private+team view for a team
/// member, equivalent to `list_memories` with `team_id` set and no
/// explicit `visibility` narrowing (§4.1's OR filter).
pub async fn list_team_memories(index: &dyn VectorIndex, ctx: &TenantContext, limit: usize) -> Result<Vec<Memory>> {
    if ctx.team_id.is_none() {
        return Err(EngineError::Config("Teams.Memories.List requires a team context".to_string()));
    }
    list_memories(index, ctx, &ListOptions::with_limit(limit)).await
}

/// `Scan`: per-gate and per-sensitivity counts for the tenant (§6:
/// resolves the gap between `Scan`'s name and the source's two
/// `count_by_gate`/`count_by_sensitivity` helpers).
pub async fn scan(index: &dyn VectorIndex, ctx: &TenantContext) -> Result<ScanReport> {
    use crate::types::{Gate, Sensitivity};

    let base = Filter::new(RecordType::Memory).with(FilterCond::Eq("user_id", ctx.user_id.clone()));
    let total = index.count(&base).await?;

    let mut by_gate = std::collections::BTreeMap::new();
    for gate in [
        Gate::Behavioral,
        Gate::Relational,
        Gate::Epistemic,
        Gate::Promissory,
        Gate::Correction,
    ] {
        let filter = Filter::new(RecordType::Memory)
            .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
            .with(FilterCond::Eq("gate", gate.as_str().to_string()));
        let count = index.count(&filter).await?;
        if count > 0 {
            by_gate.insert(gate.as_str().to_string(), count);
        }
    }

    let mut by_sensitivity = std::collections::BTreeMap::new();
    for level in [Sensitivity::Safe, Sensitivity::Sensitive, Sensitivity::Critical] {
        let filter = Filter::new(RecordType::Memory)
            .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
            .with(FilterCond::Eq("sensitivity", level.as_str().to_string()));
        let count = index.count(&filter).await?;
        if count > 0 {
            by_sensitivity.insert(level.as_str().to_string(), count);
        }
    }

    Ok(ScanReport {
        total,
        by_gate,
        by_sensitivity,
    })
}

/// `Migrate(from_scope, to_scope)`: scroll every point owned by
/// `from_user_id` and rewrite its `user_id` payload field in place,
/// returning the count moved (§9 supplemented surface, grounded on
/// `qdrant_store.py`'s `migrate_user_id`).
pub async fn migrate(index: &dyn VectorIndex, from_user_id: &str, to_user_id: &str) -> Result<u64> {
    const PAGE: usize = 100;
    let mut migrated = 0u64;
    loop {
        let filter = Filter::new(RecordType::Memory).with(FilterCond::Eq("user_id", from_user_id.to_string()));
        // `RecordType::Memory` narrows the common case; journal/identity/
        // rule points for the same tenant are migrated by repeating the
        // call with their own record-type filter (the source migrates
        // every point regardless of `type` in one pass over a single
        // collection; this crate exposes the same effect per record kind
        // since the reference index keys narrowing on `type`).
        let points = index.scroll(&filter, PAGE, None).await?;
        if points.is_empty() {
            break;
        }
        let ids: Vec<i64> = points.iter().map(|p| p.id).collect();
        index
            .set_payload(&ids, serde_json::json!({"user_id": to_user_id}))
            .await?;
        migrated += points.len() as u64;
        if points.len() < PAGE {
            break;
        }
    }
    Ok(migrated)
}

/// Migrate every record kind (memory, journal, identity, rule) owned by
/// `from_user_id` to `to_user_id`, mirroring the source's single-pass
/// `migrate_user_id` which does not filter on `type` at all.
pub async fn migrate_all(index: &dyn VectorIndex, from_user_id: &str, to_user_id: &str) -> Result<u64> {
    let mut total = 0u64;
    for record_type in [RecordType::Memory, RecordType::Journal, RecordType::Identity, RecordType::Rule] {
        const PAGE: usize = 100;
        loop {
            let filter = Filter::new(record_type).with(FilterCond::Eq("user_id", from_user_id.to_string()));
            let points = index.scroll(&filter, PAGE, None).await?;
            if points.is_empty() {
                break;
            }
            let ids: Vec<i64> = points.iter().map(|p| p.id).collect();
            index
                .set_payload(&ids, serde_json::json!({"user_id": to_user_id}))
                .await?;
            total += points.len() as u64;
            if points.len() < PAGE {
                break;
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tfidf::TfIdfEmbedder;
    use crate::index::sqlite::SqliteIndex;
    use crate::remember::remember;
    use crate::types::{RememberInput, Visibility};

    fn input(content: &str, gate: &str) -> RememberInput {
        RememberInput {
            content: content.to_string(),
            gate: gate.to_string(),
            person: None,
            project: None,
            visibility: Visibility::Private,
            team_id: None,
        }
    }

    async fn remember_and_id(index: &SqliteIndex, embedder: &TfIdfEmbedder, ctx: &TenantContext, content: &str, gate: &str) -> String {
        let config = crate::config::EngineConfig::default();
        let msg = remember(ctx, index, embedder, None, &config, input(content, gate)).await.unwrap();
        msg.rsplit("id: ").next().unwrap().trim_end_matches(')').to_string()
    }

    #[tokio::test]
    async fn forget_removes_an_existing_memory() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let id = remember_and_id(&index, &embedder, &ctx, "throwaway note", "behavioral").await;

        let result = forget(&index, &ctx, &id, false).await.unwrap();
        assert!(result.starts_with("Forgotten"));
        assert!(get_memory(&index, &ctx, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn forget_missing_memory_returns_sentinel() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let ctx = TenantContext::user("u1");
        let result = forget(&index, &ctx, "mem_does_not_exist", false).await.unwrap();
        assert!(result.starts_with("No memory found"));
    }

    #[tokio::test]
    async fn pin_then_unpin_round_trips() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let id = remember_and_id(&index, &embedder, &ctx, "a pinned fact", "epistemic").await;

        pin(&index, &ctx, &id).await.unwrap();
        assert!(get_memory(&index, &ctx, &id).await.unwrap().unwrap().pinned);
        unpin(&index, &ctx, &id).await.unwrap();
        assert!(!get_memory(&index, &ctx, &id).await.unwrap().unwrap().pinned);
    }

    #[tokio::test]
    async fn update_memory_reembeds_only_on_content_change() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let id = remember_and_id(&index, &embedder, &ctx, "original content", "epistemic").await;

        let updated = update_memory(
            &index,
            &embedder,
            &ctx,
            &id,
            UpdateMemoryInput {
                person: Some("Alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.content, "original content");
        assert_eq!(updated.person.as_deref(), Some("Alice"));

        let updated = update_memory(
            &index,
            &embedder,
            &ctx,
            &id,
            UpdateMemoryInput {
                content: Some("revised content".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.content, "revised content");
    }

    #[tokio::test]
    async fn list_memories_respects_gate_filter_and_limit() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        remember_and_id(&index, &embedder, &ctx, "a behavioral note", "behavioral").await;
        remember_and_id(&index, &embedder, &ctx, "an epistemic fact", "epistemic").await;

        let opts = ListOptions {
            gate: Some(crate::types::Gate::Epistemic),
            limit: 10,
            ..Default::default()
        };
        let found = list_memories(&index, &ctx, &opts).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].gate, crate::types::Gate::Epistemic);
    }

    #[tokio::test]
    async fn list_memories_respects_pinned_filter() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let pinned_id = remember_and_id(&index, &embedder, &ctx, "keep this one", "epistemic").await;
        remember_and_id(&index, &embedder, &ctx, "ordinary note", "epistemic").await;
        pin(&index, &ctx, &pinned_id).await.unwrap();

        let opts = ListOptions {
            pinned: Some(true),
            limit: 10,
            ..Default::default()
        };
        let found = list_memories(&index, &ctx, &opts).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, pinned_id);
    }

    #[tokio::test]
    async fn scan_counts_by_gate() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        remember_and_id(&index, &embedder, &ctx, "one", "behavioral").await;
        remember_and_id(&index, &embedder, &ctx, "two", "behavioral").await;
        remember_and_id(&index, &embedder, &ctx, "three", "epistemic").await;

        let report = scan(&index, &ctx).await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.by_gate.get("behavioral"), Some(&2));
        assert_eq!(report.by_gate.get("epistemic"), Some(&1));
    }

    #[tokio::test]
    async fn migrate_moves_every_memory_and_empties_the_source() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        remember_and_id(&index, &embedder, &ctx, "one", "behavioral").await;
        remember_and_id(&index, &embedder, &ctx, "two", "epistemic").await;

        let moved = migrate(&index, "u1", "u2").await.unwrap();
        assert_eq!(moved, 2);

        let from_filter = Filter::new(RecordType::Memory).with(FilterCond::Eq("user_id", "u1".to_string()));
        let to_filter = Filter::new(RecordType::Memory).with(FilterCond::Eq("user_id", "u2".to_string()));
        assert_eq!(index.count(&from_filter).await.unwrap(), 0);
        assert_eq!(index.count(&to_filter).await.unwrap(), 2);
    }
}

//! Write Pipeline — `Remember` (C2): validates a write, derives its decay
//! class, persists journal + memory records, then runs five best-effort
//! side effects (contradiction check, correction handling, follows chain,
//! PII heuristic, sensitivity classification).

use chrono::Utc;
use rand::Rng;
use tracing::{instrument, warn};

use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::graph::add_edge;
use crate::index::{Filter, FilterCond, PrefetchQuery, Prefetch, RecordType, VectorIndex};
use crate::memstore::{insert_journal, memory_point_id, upsert_memory};
use crate::pii;
use crate::synth::{parse_classification, Synthesizer, CLASSIFY_SYSTEM_PROMPT};
use crate::tenant::{FilterOptions, TenantContext};
use crate::types::{
    Gate, JournalEntry, JournalKind, Memory, RememberInput, Relation, Sensitivity, Visibility, MAX_CONTENT_LEN,
};

fn utc_compact(now: chrono::DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

fn new_memory_id(now: chrono::DateTime<Utc>) -> String {
    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..4).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
    };
    format!("mem_{}_{}", utc_compact(now), suffix)
}

/// Validate and execute a `Remember` call. `index`/`embedder`/`synthesizer`
/// are the three capabilities the engine wires together; `synthesizer` is
/// optional (step 7 is skipped silently when absent, matching "if
/// Synthesizer configured").
#[instrument(skip(index, embedder, synthesizer, input), fields(content_len = input.content.len(), gate = %input.gate))]
pub async fn remember(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    synthesizer: Option<&dyn Synthesizer>,
    config: &EngineConfig,
    input: RememberInput,
) -> Result<String> {
    if input.content.is_empty() {
        return Err(EngineError::Validation("content must not be empty".to_string()));
    }
    if input.content.len() > MAX_CONTENT_LEN {
        return Err(EngineError::Validation(format!(
            "content exceeds {MAX_CONTENT_LEN} characters"
        )));
    }
    let gate = Gate::from_str_opt(&input.gate)
        .ok_or_else(|| EngineError::Validation(format!("unknown gate {:?}", input.gate)))?;
    if input.visibility == Visibility::Team && input.team_id.is_none() {
        return Err(EngineError::Config(
            "cannot write a team-visibility memory without a team_id".to_string(),
        ));
    }

    let user_id = ctx.write_user_id(input.visibility)?;
    let now = Utc::now();
    let id = new_memory_id(now);
    let decay_class = gate.decay_class();

    // Step 1: journal append.
    let journal_entry = JournalEntry {
        timestamp: now,
        kind: JournalKind::Primary(gate),
        content: input.content.clone(),
        person: input.person.clone(),
        project: input.project.clone(),
        date: now.format("%Y-%m-%d").to_string(),
    };
    insert_journal(index, embedder, &user_id, &journal_entry).await?;

    // Step 2: memory insert.
    let memory = Memory {
        id: id.clone(),
        created: now,
        last_accessed: now,
        access_count: 1,
        gate,
        decay_class,
        confidence: 0.9,
        content: input.content.clone(),
        person: input.person.clone(),
        project: input.project.clone(),
        pinned: false,
        sensitivity: None,
        sensitivity_reason: None,
        visibility: input.visibility,
        team_id: input.team_id.clone(),
        created_by: Some(ctx.user_id.clone()),
        edges: Vec::new(),
    };
    upsert_memory(index, embedder, &user_id, &memory).await?;

    let mut warnings: Vec<String> = Vec::new();

    // Step 3: contradiction check, advisory only.
    match check_contradiction(index, embedder, &user_id, &id, &input.content, config).await {
        Ok(Some(w)) => warnings.push(w),
        Ok(None) => {}
        Err(e) => warn!(step = "contradiction_check", error = %e, "side effect failed"),
    }

    // Step 4: correction handling.
    if gate == Gate::Correction {
        if let Err(e) = handle_correction(index, embedder, &user_id, &id, &input.content, config).await {
            warn!(step = "correction_handling", error = %e, "side effect failed");
        }
    }

    // Step 5: follows chain.
    if input.person.is_some() || input.project.is_some() {
        if let Err(e) = chain_follows(index, &user_id, &id, &input, now, config).await {
            warn!(step = "follows_chain", error = %e, "side effect failed");
        }
    }

    // Step 6: PII heuristic.
    if let Some(warning) = pii::check_pii(&input.content) {
        warnings.push(warning);
    }

    // Step 7: sensitivity classification.
    if let Some(synth) = synthesizer {
        match classify_one(synth, config, &input.content).await {
            Ok(Some((level, reason))) => {
                if let Err(e) = index
                    .set_payload(
                        &[memory_point_id(&id)],
                        serde_json::json!({"sensitivity": level, "sensitivity_reason": reason}),
                    )
                    .await
                {
                    warn!(step = "sensitivity_classification", error = %e, "side effect failed");
                } else {
                    warnings.push(format!("classified as {level}: {reason}"));
                }
            }
            Ok(None) => {}
            Err(e) => warn!(step = "sensitivity_classification", error = %e, "side effect failed"),
        }
    }

    let preview = memory.preview(config.preview_chars);
    let mut message = format!("Remembered [{gate}]: {preview} (id: {id})");
    for w in &warnings {
        message.push_str(&format!("\n- {w}"));
    }
    Ok(message)
}

async fn check_contradiction(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    new_id: &str,
    content: &str,
    config: &EngineConfig,
) -> Result<Option<String>> {
    let hits = hybrid_search(index, embedder, user_id, new_id, content, 3, config).await?;
    for (mem, score) in hits {
        if mem.id != new_id && score > config.contradiction_threshold && mem.content != content {
            return Ok(Some(format!(
                "high similarity to existing memory: {}",
                mem.preview(config.preview_chars)
            )));
        }
    }
    Ok(None)
}

async fn handle_correction(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    new_id: &str,
    content: &str,
    config: &EngineConfig,
) -> Result<()> {
    let hits = hybrid_search(index, embedder, user_id, new_id, content, 1, config).await?;
    if let Some((target, score)) = hits.into_iter().find(|(m, _)| m.id != new_id) {
        if score > config.correction_threshold {
            add_edge(index, user_id, new_id, &target.id, Relation::Contradicts).await?;
            index
                .set_payload(
                    &[memory_point_id(&target.id)],
                    serde_json::json!({"confidence": target.confidence * config.correction_confidence_decay}),
                )
                .await?;
        }
    }
    Ok(())
}

async fn chain_follows(
    index: &dyn VectorIndex,
    user_id: &str,
    new_id: &str,
    input: &RememberInput,
    now: chrono::DateTime<Utc>,
    config: &EngineConfig,
) -> Result<()> {
    let mut opts = FilterOptions::default();
    opts.person = input.person.clone();
    opts.project = input.project.clone();
    let ctx = TenantContext {
        user_id: user_id.to_string(),
        team_id: None,
    };
    let filter = crate::tenant::make_filter(&ctx, RecordType::Memory, &opts);
    let cutoff = (now - chrono::Duration::from_std(config.follows_window).unwrap_or_default()).timestamp() as f64;
    let candidates = index.scroll(&filter, 20, Some("created")).await?;
    for point in candidates {
        let mem = crate::memstore::memory_from_payload(&point.payload)?;
        if mem.id == new_id {
            continue;
        }
        if mem.created.timestamp() as f64 >= cutoff {
            add_edge(index, user_id, new_id, &mem.id, Relation::Follows).await?;
            return Ok(());
        }
    }
    Ok(())
}

async fn classify_one(synth: &dyn Synthesizer, config: &EngineConfig, content: &str) -> Result<Option<(String, String)>> {
    let response = crate::synth::synthesize(synth, config, CLASSIFY_SYSTEM_PROMPT, content, 64, None).await?;
    let classification = parse_classification(&response);
    if classification.level == "safe" || classification.level == "unknown" {
        return Ok(None);
    }
    if Sensitivity::from_str_opt(&classification.level).is_none() {
        return Ok(None);
    }
    Ok(Some((classification.level, classification.reason)))
}

/// Run a hybrid search restricted to `user_id`'s own memories, excluding
/// `exclude_id` (the memory just written in this `Remember` call, which
/// would otherwise be its own nearest neighbour and starve out the prior
/// memory a contradiction/correction check is looking for), and return
/// `(memory, fused_score)` pairs, highest score first.
async fn hybrid_search(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    user_id: &str,
    exclude_id: &str,
    query: &str,
    limit: usize,
    config: &EngineConfig,
) -> Result<Vec<(Memory, f32)>> {
    let filter = Filter::new(RecordType::Memory)
        .with(FilterCond::Eq("user_id", user_id.to_string()))
        .with(FilterCond::Ne("memory_id", exclude_id.to_string()));
    let dense = embedder.embed(query).await?;
    let stage_limit = (limit * 4).max(20);
    let prefetch = vec![
        Prefetch {
            query: PrefetchQuery::Dense(dense),
            limit: stage_limit,
            filter: filter.clone(),
        },
        Prefetch {
            query: PrefetchQuery::Sparse(query.to_string()),
            limit: stage_limit,
            filter,
        },
    ];
    let scored = index.query_points(prefetch, limit, config.rrf_k).await?;
    let mut out = Vec::with_capacity(scored.len());
    for point in scored {
        out.push((crate::memstore::memory_from_payload(&point.payload)?, point.score));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tfidf::TfIdfEmbedder;
    use crate::index::sqlite::SqliteIndex;

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

    #[tokio::test]
    async fn remembers_and_returns_a_preview() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let config = EngineConfig::default();
        let result = remember(&ctx, &index, &embedder, None, &config, input("I prefer tabs", "behavioral"))
            .await
            .unwrap();
        assert!(result.starts_with("Remembered [behavioral]: I prefer tabs"));
    }

    #[tokio::test]
    async fn rejects_unknown_gate() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let config = EngineConfig::default();
        let err = remember(&ctx, &index, &embedder, None, &config, input("x", "bogus"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn team_write_without_team_id_is_config_error() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let config = EngineConfig::default();
        let mut bad = input("x", "epistemic");
        bad.visibility = Visibility::Team;
        let err = remember(&ctx, &index, &embedder, None, &config, bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn flags_pii_in_warnings() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let ctx = TenantContext::user("u1");
        let config = EngineConfig::default();
        let result = remember(&ctx, &index, &embedder, None, &config, input("email me at a@b.com", "epistemic"))
            .await
            .unwrap();
        assert!(result.contains("email address"));
    }
}

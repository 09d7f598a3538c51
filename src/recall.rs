//! Retrieval — `Recall` (C3): hybrid dense+sparse search with RRF fusion,
//! lexical fallback, graph expansion, and access touching. Every failure
//! mode downgrades to the next stage rather than propagating (§4.3,
//! §7: "the user-facing return is always a valid result").

use tracing::{debug, instrument, warn};

use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::graph::find_related;
use crate::index::{Filter, FilterCond, PrefetchQuery, Prefetch, RecordType, VectorIndex};
use crate::memstore::{get_memory_raw, memory_from_payload, touch_memory};
use crate::tenant::{make_filter, FilterOptions, TenantContext};
use crate::types::{Memory, RecallHit};

/// Fetch `mem_id` under `ctx`'s private scope, falling back to the team
/// scope when `ctx.team_id` is set and the private lookup misses (§4.3
/// step 2).
async fn materialize(index: &dyn VectorIndex, ctx: &TenantContext, mem_id: &str) -> Result<Option<Memory>> {
    if let Some(mem) = get_memory_raw(index, &ctx.user_id, mem_id).await? {
        return Ok(Some(mem));
    }
    if let Some(team_id) = &ctx.team_id {
        let team_user_id = format!("team:{team_id}");
        if let Some(mem) = get_memory_raw(index, &team_user_id, mem_id).await? {
            return Ok(Some(mem));
        }
    }
    Ok(None)
}

/// Touch the memory wherever it was materialized from (private or team
/// namespace); best-effort, matching the source's fire-and-forget
/// `touch_memory` call.
async fn touch(index: &dyn VectorIndex, ctx: &TenantContext, mem: &Memory) {
    if let Err(e) = touch_memory(index, &ctx.user_id, &mem.id).await {
        debug!(error = %e, "touch via private namespace failed");
    }
    if let Some(team_id) = &ctx.team_id {
        let team_user_id = format!("team:{team_id}");
        let _ = touch_memory(index, &team_user_id, &mem.id).await;
    }
}

/// Run `Recall(ctx, query)`: hybrid search → lexical fallback → graph
/// expansion, in that order, returning as soon as a stage has produced
/// results is NOT how this behaves — stage 4 (graph) always runs if fewer
/// than `graph_expansion_threshold` direct hits were found, even after a
/// successful hybrid search, per §4.3 step 4.
#[instrument(skip(index, embedder, config, query), fields(query_len = query.len()))]
pub async fn recall(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    config: &EngineConfig,
    query: &str,
) -> Result<Vec<RecallHit>> {
    let mut hits: Vec<RecallHit> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    // Step 1: hybrid search.
    match hybrid_stage(index, embedder, ctx, query, config).await {
        Ok(scored) => {
            for (mem_id, score) in scored {
                if !seen.insert(mem_id.clone()) {
                    continue;
                }
                if let Some(mem) = materialize(index, ctx, &mem_id).await? {
                    touch(index, ctx, &mem).await;
                    hits.push(RecallHit {
                        memory: mem,
                        score: Some(score),
                        via_relation: None,
                        depth: 0,
                    });
                }
            }
        }
        Err(e) => warn!(step = "hybrid_search", error = %e, "falling back to lexical stage"),
    }

    // Step 3: lexical fallback, only when hybrid search yielded nothing.
    if hits.is_empty() {
        match lexical_stage(index, ctx, query, config).await {
            Ok(found) => {
                for mem_id in found {
                    if !seen.insert(mem_id.clone()) {
                        continue;
                    }
                    if let Some(mem) = materialize(index, ctx, &mem_id).await? {
                        touch(index, ctx, &mem).await;
                        hits.push(RecallHit {
                            memory: mem,
                            score: None,
                            via_relation: None,
                            depth: 0,
                        });
                    }
                }
            }
            Err(e) => warn!(step = "lexical_fallback", error = %e, "proceeding to graph expansion"),
        }
    }

    // Step 4: graph expansion when still under threshold.
    if hits.len() < config.graph_expansion_threshold {
        let seeds: Vec<String> = hits.iter().take(2).map(|h| h.memory.id.clone()).collect();
        for seed in seeds {
            let related = match find_related(index, &ctx.user_id, &seed, config.graph_expansion_depth).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, "graph expansion failed silently");
                    continue;
                }
            };
            for neighbour in related {
                if !seen.insert(neighbour.id.clone()) {
                    continue;
                }
                if let Some(mem) = materialize(index, ctx, &neighbour.id).await? {
                    hits.push(RecallHit {
                        memory: mem,
                        score: None,
                        via_relation: Some(neighbour.relation),
                        depth: neighbour.depth,
                    });
                }
            }
        }
    }

    Ok(hits)
}

async fn hybrid_stage(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    ctx: &TenantContext,
    query: &str,
    config: &EngineConfig,
) -> Result<Vec<(String, f32)>> {
    let filter = make_filter(ctx, RecordType::Memory, &FilterOptions::default());
    let dense = embedder.embed(query).await?;
    let stage_limit = (config.recall_limit * 4).max(20);
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
    let scored = index.query_points(prefetch, config.recall_limit, config.rrf_k).await?;
    let mut out = Vec::with_capacity(scored.len());
    for point in scored {
        let mem_id = point
            .payload
            .get("memory_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if !mem_id.is_empty() {
            out.push((mem_id, point.score));
        }
    }
    Ok(out)
}

async fn lexical_stage(index: &dyn VectorIndex, ctx: &TenantContext, query: &str, config: &EngineConfig) -> Result<Vec<String>> {
    let filter = make_filter(ctx, RecordType::Memory, &FilterOptions::default());
    let points = index.text_search(&filter, query, config.lexical_fallback_limit).await?;
    Ok(points
        .into_iter()
        .filter_map(|p| p.payload.get("memory_id").and_then(|v| v.as_str()).map(String::from))
        .collect())
}

/// Render hits the way the assistant-facing tool layer expects: a tenant
/// tag, gate, score or `text`, date, person, a snippet, and the id — or
/// the canonical "no memories found" sentinel when `hits` is empty
/// (§4.3 step 5, §7).
pub fn render(ctx: &TenantContext, hits: &[RecallHit], preview_chars: usize) -> String {
    if hits.is_empty() {
        return "No memories found matching that query.".to_string();
    }

    let lines: Vec<String> = hits
        .iter()
        .map(|hit| render_one(ctx, hit, preview_chars))
        .collect();

    format!("Found {} memories:\n\n{}", hits.len(), lines.join("\n\n"))
}

fn render_one(ctx: &TenantContext, hit: &RecallHit, preview_chars: usize) -> String {
    let mem = &hit.memory;
    let tag = if ctx.team_id.is_some() {
        format!("[{}] ", mem.visibility.as_str())
    } else {
        String::new()
    };

    if let Some(relation) = hit.via_relation {
        return format!(
            "{tag}[graph: {relation}] {} (id: {})",
            mem.preview(preview_chars),
            mem.id
        );
    }

    let qualifier = match hit.score {
        Some(score) => format!("{}, score={score:.2}", mem.gate),
        None => format!("{}, text", mem.gate),
    };
    let person = mem.person.as_deref().unwrap_or("?");
    format!(
        "{tag}[{qualifier}] ({}, {person}) {}\n  id: {}",
        mem.created.format("%Y-%m-%d"),
        mem.preview(preview_chars),
        mem.id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tfidf::TfIdfEmbedder;
    use crate::index::sqlite::SqliteIndex;
    use crate::remember::remember;
    use crate::types::RememberInput;

    fn input(content: &str, gate: &str) -> RememberInput {
        RememberInput {
            content: content.to_string(),
            gate: gate.to_string(),
            person: None,
            project: None,
            visibility: crate::types::Visibility::Private,
            team_id: None,
        }
    }

    #[tokio::test]
    async fn write_then_recall_finds_one_result_and_touches_it() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let config = EngineConfig::default();
        let ctx = TenantContext::user("u1");

        let msg = remember(&ctx, &index, &embedder, None, &config, input("I prefer tabs over spaces", "behavioral"))
            .await
            .unwrap();
        let id = msg.rsplit("id: ").next().unwrap().trim_end_matches(')').to_string();

        let hits = recall(&ctx, &index, &embedder, &config, "tabs").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, id);
        assert_eq!(hits[0].memory.access_count, 2);
    }

    #[tokio::test]
    async fn recall_never_crosses_tenants() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let config = EngineConfig::default();

        let u1 = TenantContext::user("u1");
        let u2 = TenantContext::user("u2");
        remember(&u1, &index, &embedder, None, &config, input("a secret plan", "epistemic"))
            .await
            .unwrap();

        let hits = recall(&u2, &index, &embedder, &config, "secret plan").await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn empty_index_renders_sentinel() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let config = EngineConfig::default();
        let ctx = TenantContext::user("u1");
        let hits = recall(&ctx, &index, &embedder, &config, "anything").await.unwrap();
        assert_eq!(render(&ctx, &hits, config.preview_chars), "No memories found matching that query.");
    }
}

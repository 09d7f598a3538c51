//! Graph Overlay (C4): typed directed edges stored inline on the source
//! memory. `AddEdge` is not atomic across concurrent writers on the same
//! source — last writer wins, acceptable because edges are a retrieval
//! aid, not a correctness invariant (§4.4).

use std::collections::HashSet;

use serde_json::json;

use crate::error::Result;
use crate::index::VectorIndex;
use crate::memstore::{get_memory_raw, memory_point_id};
use crate::types::{Edge, Relation};

/// One neighbour discovered by [`find_related`].
#[derive(Debug, Clone)]
pub struct RelatedMemory {
    pub id: String,
    pub content: String,
    pub gate: crate::types::Gate,
    pub relation: Relation,
    pub depth: u32,
}

/// Read `from_id`, dedup by `(to_id, relation)`, append, write back.
pub async fn add_edge(index: &dyn VectorIndex, user_id: &str, from_id: &str, to_id: &str, relation: Relation) -> Result<()> {
    let Some(source) = get_memory_raw(index, user_id, from_id).await? else {
        return Ok(());
    };
    if source.edges.iter().any(|e| e.to == to_id && e.relation == relation) {
        return Ok(());
    }
    let mut edges = source.edges;
    edges.push(Edge {
        to: to_id.to_string(),
        relation,
    });
    let payload_edges: Vec<_> = edges
        .iter()
        .map(|e| json!({"to": e.to, "relation": e.relation.as_str()}))
        .collect();
    index
        .set_payload(&[memory_point_id(from_id)], json!({"edges": payload_edges}))
        .await
}

/// Breadth-first traversal of inline edges up to `depth` hops. `visited`
/// is seeded with `{start_id}` so cycles cannot be revisited; the result
/// is in BFS discovery order.
pub async fn find_related(index: &dyn VectorIndex, user_id: &str, start_id: &str, depth: u32) -> Result<Vec<RelatedMemory>> {
    let mut visited: HashSet<String> = HashSet::from([start_id.to_string()]);
    let mut results = Vec::new();
    let mut frontier = vec![start_id.to_string()];

    for current_depth in 1..=depth {
        let mut next_frontier = Vec::new();
        for mid in &frontier {
            let Some(source) = get_memory_raw(index, user_id, mid).await? else {
                continue;
            };
            for edge in &source.edges {
                if visited.contains(&edge.to) {
                    continue;
                }
                visited.insert(edge.to.clone());
                next_frontier.push(edge.to.clone());
                if let Some(target) = get_memory_raw(index, user_id, &edge.to).await? {
                    results.push(RelatedMemory {
                        id: edge.to.clone(),
                        content: target.content,
                        gate: target.gate,
                        relation: edge.relation,
                        depth: current_depth,
                    });
                }
            }
        }
        frontier = next_frontier;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tfidf::TfIdfEmbedder;
    use crate::embedding::Embedder;
    use crate::index::sqlite::SqliteIndex;
    use crate::memstore::upsert_memory;
    use crate::types::{DecayClass, Gate, Memory, Visibility};
    use chrono::Utc;

    fn memory(id: &str, content: &str) -> Memory {
        Memory {
            id: id.to_string(),
            created: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 1,
            gate: Gate::Epistemic,
            decay_class: DecayClass::Moderate,
            confidence: 0.9,
            content: content.to_string(),
            person: None,
            project: None,
            pinned: false,
            sensitivity: None,
            sensitivity_reason: None,
            visibility: Visibility::Private,
            team_id: None,
            created_by: None,
            edges: vec![],
        }
    }

    #[tokio::test]
    async fn add_edge_is_idempotent() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        let a = memory("a", "alpha");
        let b = memory("b", "beta");
        upsert_memory(&index, &embedder, "u1", &a).await.unwrap();
        upsert_memory(&index, &embedder, "u1", &b).await.unwrap();

        add_edge(&index, "u1", "a", "b", Relation::Follows).await.unwrap();
        add_edge(&index, "u1", "a", "b", Relation::Follows).await.unwrap();

        let source = get_memory_raw(&index, "u1", "a").await.unwrap().unwrap();
        assert_eq!(source.edges.len(), 1);
    }

    #[tokio::test]
    async fn find_related_walks_bfs_and_stops_on_cycles() {
        let index = SqliteIndex::open_in_memory().unwrap();
        let embedder = TfIdfEmbedder::default();
        for (id, content) in [("a", "alpha"), ("b", "beta"), ("c", "gamma")] {
            upsert_memory(&index, &embedder, "u1", &memory(id, content)).await.unwrap();
        }
        add_edge(&index, "u1", "a", "b", Relation::Follows).await.unwrap();
        add_edge(&index, "u1", "b", "c", Relation::Follows).await.unwrap();
        add_edge(&index, "u1", "c", "a", Relation::Follows).await.unwrap(); // cycle back to start

        let related = find_related(&index, "u1", "a", 2).await.unwrap();
        let ids: Vec<_> = related.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn embedder_dimensions_are_consistent() {
        let embedder = TfIdfEmbedder::new(16);
        assert_eq!(embedder.embed("x").await.unwrap().len(), 16);
    }
}

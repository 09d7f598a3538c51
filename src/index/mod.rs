//! The `VectorIndex` capability (§6): the single external dependency the
//! engine's storage-facing code talks to. Point IDs never leak the domain
//! id; see [`stable_point_id`].
//!
//! A concrete, SQLite-backed reference implementation lives in
//! [`sqlite`]; production deployments can swap in a different backend
//! (Qdrant, a managed vector DB, …) behind the same trait.

pub mod sqlite;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// The four kinds of record the index stores, distinguished by a `type`
/// payload discriminator rather than separate tables/collections (§9:
/// "model records as a tagged union with a common envelope").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Memory,
    Journal,
    Identity,
    Rule,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Memory => "memory",
            RecordType::Journal => "journal",
            RecordType::Identity => "identity",
            RecordType::Rule => "rule",
        }
    }
}

/// A single keyword-field equality or range condition.
#[derive(Debug, Clone)]
pub enum FilterCond {
    Eq(&'static str, String),
    Ne(&'static str, String),
    Lt(&'static str, f64),
    Gte(&'static str, f64),
    IsNull(&'static str),
}

/// A filter predicate on the index: all of `must` and, if `should` is
/// non-empty, at least one of its OR-groups (each itself an AND of
/// conditions). Mirrors the must/should shape `MakeFilter` composes.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<FilterCond>,
    pub should: Vec<Vec<FilterCond>>,
}

impl Filter {
    pub fn new(record_type: RecordType) -> Self {
        Self {
            must: vec![FilterCond::Eq("type", record_type.as_str().to_string())],
            should: Vec::new(),
        }
    }

    pub fn with(mut self, cond: FilterCond) -> Self {
        self.must.push(cond);
        self
    }

    pub fn with_should(mut self, group: Vec<FilterCond>) -> Self {
        self.should.push(group);
        self
    }
}

/// A point about to be written: its dense embedding plus a JSON payload
/// carrying the typed record and every indexed keyword field.
pub struct UpsertPoint {
    pub id: i64,
    pub dense: Vec<f32>,
    /// Raw text indexed by the lexical (FTS5) side; empty for records with
    /// no free-text body.
    pub text: String,
    pub payload: serde_json::Value,
}

/// A prefetch stage's query: an already-embedded dense vector, or the raw
/// query text for the lexical/sparse side (the index owns tokenization and
/// BM25 ranking; the engine owns dense embedding).
pub enum PrefetchQuery {
    Dense(Vec<f32>),
    Sparse(String),
}

/// One prefetch stage of a hybrid query: a dense (cosine ANN) or
/// sparse/lexical (BM25) retrieval over the same filter.
pub struct Prefetch {
    pub query: PrefetchQuery,
    pub limit: usize,
    pub filter: Filter,
}

/// A single fused hit: the point id and its Reciprocal-Rank-Fusion score.
pub struct ScoredPoint {
    pub id: i64,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// A page of points returned by `scroll`.
pub struct ScrolledPoint {
    pub id: i64,
    pub payload: serde_json::Value,
}

/// The capability the engine relies on for persistence and retrieval.
/// Every operation is `idempotent` on `point_id` for `upsert`, merges
/// fields for `set_payload`, and otherwise matches the semantics in §6.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent upsert keyed by `point.id`.
    async fn upsert(&self, point: UpsertPoint) -> Result<()>;

    /// Merge `partial` fields into the payload of every matching point.
    async fn set_payload(&self, point_ids: &[i64], partial: serde_json::Value) -> Result<()>;

    /// Remove every point matching `filter`.
    async fn delete(&self, filter: &Filter) -> Result<u64>;

    /// Paginated scan. `order_by` names a payload field; results are
    /// returned descending on it when present.
    async fn scroll(
        &self,
        filter: &Filter,
        limit: usize,
        order_by: Option<&str>,
    ) -> Result<Vec<ScrolledPoint>>;

    /// Exact count of points matching `filter`.
    async fn count(&self, filter: &Filter) -> Result<u64>;

    /// Hybrid retrieval: run every prefetch stage, fuse with Reciprocal
    /// Rank Fusion using constant `rrf_k`, return the top `limit`. Scores
    /// are normalized so `1.0` means ranked first in every stage, keeping
    /// them comparable across callers regardless of `rrf_k` or stage count.
    async fn query_points(&self, prefetch: Vec<Prefetch>, limit: usize, rrf_k: f32) -> Result<Vec<ScoredPoint>>;

    /// Word-tokenized full-text query against the lexical index.
    async fn text_search(&self, filter: &Filter, query: &str, limit: usize) -> Result<Vec<ScrolledPoint>>;
}

/// Deterministic point-ID derivation: SHA-256 of the domain key, top 8
/// bytes interpreted as a big-endian `u64`, right-shifted one bit so the
/// result fits a signed 63-bit id and the index never sees the domain id
/// itself as a key.
pub fn stable_point_id(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(buf) >> 1) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_point_id_is_deterministic() {
        assert_eq!(stable_point_id("mem_x"), stable_point_id("mem_x"));
    }

    #[test]
    fn stable_point_id_differs_by_key() {
        assert_ne!(stable_point_id("mem_x"), stable_point_id("mem_y"));
    }

    #[test]
    fn stable_point_id_fits_i64() {
        assert!(stable_point_id("anything") >= 0);
    }
}

//! Reference `VectorIndex` backed by SQLite: dense vectors as BLOBs with
//! cosine similarity computed in-process, lexical ranking via FTS5 BM25.
//! Grounded on the storage layer's connection/pragma handling and the
//! hybrid search module's fusion math, generalized from a fixed `memories`
//! table to the tagged-union `points` table the persisted-state layout
//! (§6) describes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};

use crate::error::{EngineError, Result};

use super::{Filter, FilterCond, Prefetch, PrefetchQuery, ScoredPoint, ScrolledPoint, UpsertPoint, VectorIndex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS points (
    id INTEGER PRIMARY KEY,
    type TEXT NOT NULL,
    user_id TEXT,
    team_id TEXT,
    visibility TEXT,
    gate TEXT,
    sensitivity TEXT,
    person TEXT,
    project TEXT,
    memory_id TEXT,
    rule_id TEXT,
    date TEXT,
    created REAL,
    timestamp REAL,
    content TEXT NOT NULL DEFAULT '',
    dense BLOB,
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_points_type ON points(type);
CREATE INDEX IF NOT EXISTS idx_points_user ON points(user_id);
CREATE INDEX IF NOT EXISTS idx_points_team ON points(team_id);
CREATE INDEX IF NOT EXISTS idx_points_gate ON points(gate);
CREATE INDEX IF NOT EXISTS idx_points_sensitivity ON points(sensitivity);
CREATE INDEX IF NOT EXISTS idx_points_person ON points(person);
CREATE INDEX IF NOT EXISTS idx_points_project ON points(project);
CREATE INDEX IF NOT EXISTS idx_points_memory_id ON points(memory_id);
CREATE INDEX IF NOT EXISTS idx_points_rule_id ON points(rule_id);
CREATE INDEX IF NOT EXISTS idx_points_date ON points(date);
CREATE INDEX IF NOT EXISTS idx_points_visibility ON points(visibility);

CREATE VIRTUAL TABLE IF NOT EXISTS points_fts USING fts5(
    content,
    content = 'points',
    content_rowid = 'id',
    tokenize = 'unicode61 remove_diacritics 2'
);

CREATE TRIGGER IF NOT EXISTS points_ai AFTER INSERT ON points BEGIN
    INSERT INTO points_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS points_ad AFTER DELETE ON points BEGIN
    INSERT INTO points_fts(points_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS points_au AFTER UPDATE ON points BEGIN
    INSERT INTO points_fts(points_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO points_fts(rowid, content) VALUES (new.id, new.content);
END;
"#;

/// Owns a single SQLite connection. Matches the storage layer's
/// mutex-guarded single-connection model: SQLite serializes writers
/// anyway, and the engine is expected to hold at most one index instance
/// per process (§5 shared-resource policy).
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 30_000)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn encode_dense(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn decode_dense(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Turn free-text search input into an FTS5 `MATCH` query: each whitespace
/// token is quoted individually (so FTS5 operators and special characters
/// in the caller's text are never interpreted) and the tokens are OR'd
/// together, so a query matches any document sharing at least one term
/// rather than requiring the caller's exact phrase verbatim.
fn escape_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            let mut escaped = String::with_capacity(term.len() + 2);
            escaped.push('"');
            escaped.push_str(&term.replace('"', "\"\""));
            escaped.push('"');
            escaped
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Render a [`Filter`] into a `WHERE` clause plus bound parameters.
fn render_filter(filter: &Filter) -> (String, Vec<rusqlite::types::Value>) {
    let mut clauses = Vec::new();
    let mut params: Vec<rusqlite::types::Value> = Vec::new();

    for cond in &filter.must {
        push_cond(cond, &mut clauses, &mut params);
    }

    if !filter.should.is_empty() {
        let mut groups = Vec::new();
        for group in &filter.should {
            let mut sub_clauses = Vec::new();
            for cond in group {
                push_cond(cond, &mut sub_clauses, &mut params);
            }
            groups.push(format!("({})", sub_clauses.join(" AND ")));
        }
        clauses.push(format!("({})", groups.join(" OR ")));
    }

    if clauses.is_empty() {
        ("1=1".to_string(), params)
    } else {
        (clauses.join(" AND "), params)
    }
}

fn push_cond(cond: &FilterCond, clauses: &mut Vec<String>, params: &mut Vec<rusqlite::types::Value>) {
    match cond {
        FilterCond::Eq(field, value) => {
            clauses.push(format!("{field} = ?"));
            params.push(rusqlite::types::Value::Text(value.clone()));
        }
        FilterCond::Ne(field, value) => {
            clauses.push(format!("({field} != ? OR {field} IS NULL)"));
            params.push(rusqlite::types::Value::Text(value.clone()));
        }
        FilterCond::Lt(field, value) => {
            clauses.push(format!("{field} < ?"));
            params.push(rusqlite::types::Value::Real(*value));
        }
        FilterCond::Gte(field, value) => {
            clauses.push(format!("{field} >= ?"));
            params.push(rusqlite::types::Value::Real(*value));
        }
        FilterCond::IsNull(field) => {
            clauses.push(format!("{field} IS NULL"));
        }
    }
}

fn row_payload(row: &Row) -> rusqlite::Result<(i64, serde_json::Value)> {
    let id: i64 = row.get("id")?;
    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null);
    Ok((id, payload))
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, point: UpsertPoint) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let payload_text = point.payload.to_string();
            let field = |key: &str| -> Option<String> {
                point.payload.get(key).and_then(|v| v.as_str()).map(String::from)
            };
            let created = point.payload.get("created").and_then(|v| v.as_f64());
            let timestamp = point.payload.get("timestamp").and_then(|v| v.as_f64());
            guard.execute(
                "INSERT INTO points (id, type, user_id, team_id, visibility, gate, sensitivity,
                    person, project, memory_id, rule_id, date, created, timestamp, content, dense, payload)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)
                 ON CONFLICT(id) DO UPDATE SET
                    type=excluded.type, user_id=excluded.user_id, team_id=excluded.team_id,
                    visibility=excluded.visibility, gate=excluded.gate, sensitivity=excluded.sensitivity,
                    person=excluded.person, project=excluded.project, memory_id=excluded.memory_id,
                    rule_id=excluded.rule_id, date=excluded.date, created=excluded.created,
                    timestamp=excluded.timestamp, content=excluded.content, dense=excluded.dense,
                    payload=excluded.payload",
                params![
                    point.id,
                    field("type"),
                    field("user_id"),
                    field("team_id"),
                    field("visibility"),
                    field("gate"),
                    field("sensitivity"),
                    field("person"),
                    field("project"),
                    field("memory_id"),
                    field("rule_id"),
                    field("date"),
                    created,
                    timestamp,
                    point.text,
                    encode_dense(&point.dense),
                    payload_text,
                ],
            )?;
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn set_payload(&self, point_ids: &[i64], partial: serde_json::Value) -> Result<()> {
        let conn = self.conn.clone();
        let ids = point_ids.to_vec();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            for id in ids {
                let existing: String = guard.query_row(
                    "SELECT payload FROM points WHERE id = ?1",
                    params![id],
                    |r| r.get(0),
                )?;
                let mut value: serde_json::Value =
                    serde_json::from_str(&existing).unwrap_or(serde_json::Value::Object(Default::default()));
                if let (Some(obj), Some(patch)) = (value.as_object_mut(), partial.as_object()) {
                    for (k, v) in patch {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                let field = |key: &str| -> Option<String> { value.get(key).and_then(|v| v.as_str()).map(String::from) };
                let content = value.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
                guard.execute(
                    "UPDATE points SET payload=?1, content=?2, gate=?3, sensitivity=?4 WHERE id=?5",
                    params![value.to_string(), content, field("gate"), field("sensitivity"), id],
                )?;
            }
            Ok::<_, rusqlite::Error>(())
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn delete(&self, filter: &Filter) -> Result<u64> {
        let (clause, params) = render_filter(filter);
        let conn = self.conn.clone();
        let sql = format!("DELETE FROM points WHERE {clause}");
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let n = guard.execute(&sql, params_from_iter(params.iter()))?;
            Ok::<_, rusqlite::Error>(n as u64)
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?
        .map_err(EngineError::from)
    }

    async fn scroll(&self, filter: &Filter, limit: usize, order_by: Option<&str>) -> Result<Vec<ScrolledPoint>> {
        let (clause, params) = render_filter(filter);
        let order = order_by
            .filter(|f| f.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            .map(|f| format!("ORDER BY {f} DESC"))
            .unwrap_or_default();
        let sql = format!("SELECT id, payload FROM points WHERE {clause} {order} LIMIT {limit}");
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(params.iter()), row_payload)?;
            let mut out = Vec::new();
            for row in rows {
                let (id, payload) = row?;
                out.push(ScrolledPoint { id, payload });
            }
            Ok::<_, rusqlite::Error>(out)
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?
        .map_err(EngineError::from)
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let (clause, params) = render_filter(filter);
        let sql = format!("SELECT COUNT(*) FROM points WHERE {clause}");
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let n: i64 = guard.query_row(&sql, params_from_iter(params.iter()), |r| r.get(0))?;
            Ok::<_, rusqlite::Error>(n as u64)
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?
        .map_err(EngineError::from)
    }

    async fn query_points(&self, prefetch: Vec<Prefetch>, limit: usize, rrf_k: f32) -> Result<Vec<ScoredPoint>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            // rank: point_id -> (rank starting at 1, payload)
            let mut rank_lists: Vec<HashMap<i64, (usize, serde_json::Value)>> = Vec::new();

            for stage in &prefetch {
                let (clause, params) = render_filter(&stage.filter);
                match &stage.query {
                    PrefetchQuery::Dense(query_vec) => {
                        let sql = format!("SELECT id, dense, payload FROM points WHERE {clause} AND dense IS NOT NULL");
                        let mut stmt = guard.prepare(&sql)?;
                        let mut scored: Vec<(i64, f32, serde_json::Value)> = stmt
                            .query_map(params_from_iter(params.iter()), |row| {
                                let id: i64 = row.get(0)?;
                                let dense: Vec<u8> = row.get(1)?;
                                let payload_text: String = row.get(2)?;
                                Ok((id, decode_dense(&dense), payload_text))
                            })?
                            .filter_map(|r| r.ok())
                            .map(|(id, dense, payload_text)| {
                                let payload = serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null);
                                (id, cosine_similarity(query_vec, &dense), payload)
                            })
                            .collect();
                        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                        scored.truncate(stage.limit);
                        let mut map = HashMap::new();
                        for (rank, (id, _, payload)) in scored.into_iter().enumerate() {
                            map.insert(id, (rank + 1, payload));
                        }
                        rank_lists.push(map);
                    }
                    PrefetchQuery::Sparse(query_text) => {
                        let sql = format!(
                            "SELECT p.id, p.payload, bm25(points_fts) as rank
                             FROM points_fts JOIN points p ON p.id = points_fts.rowid
                             WHERE points_fts MATCH ?1 AND {clause}
                             ORDER BY rank LIMIT {}",
                            stage.limit
                        );
                        let mut stmt = guard.prepare(&sql)?;
                        let mut bound: Vec<rusqlite::types::Value> =
                            vec![rusqlite::types::Value::Text(escape_fts5_query(query_text))];
                        bound.extend(params);
                        let rows: Vec<(i64, serde_json::Value)> = stmt
                            .query_map(params_from_iter(bound.iter()), |row| {
                                let id: i64 = row.get(0)?;
                                let payload_text: String = row.get(1)?;
                                Ok((id, payload_text))
                            })?
                            .filter_map(|r| r.ok())
                            .map(|(id, text)| (id, serde_json::from_str(&text).unwrap_or(serde_json::Value::Null)))
                            .collect();
                        let mut map = HashMap::new();
                        for (rank, (id, payload)) in rows.into_iter().enumerate() {
                            map.insert(id, (rank + 1, payload));
                        }
                        rank_lists.push(map);
                    }
                }
            }

            let mut fused: HashMap<i64, (f32, serde_json::Value)> = HashMap::new();
            for map in &rank_lists {
                for (id, (rank, payload)) in map {
                    let contribution = 1.0 / (rrf_k + *rank as f32);
                    let entry = fused.entry(*id).or_insert((0.0, payload.clone()));
                    entry.0 += contribution;
                }
            }

            // Normalize against the score a point would get ranked first in
            // every stage that ran, so `1.0` means "top of every stage"
            // regardless of `rrf_k` or how many stages were prefetched —
            // keeps `contradiction_threshold`/`correction_threshold` meaningful.
            let max_possible = rank_lists.len() as f32 / (rrf_k + 1.0);
            let mut out: Vec<ScoredPoint> = fused
                .into_iter()
                .map(|(id, (score, payload))| ScoredPoint {
                    id,
                    score: if max_possible > 0.0 { score / max_possible } else { score },
                    payload,
                })
                .collect();
            out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            out.truncate(limit);
            Ok::<_, rusqlite::Error>(out)
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?
        .map_err(EngineError::from)
    }

    async fn text_search(&self, filter: &Filter, query: &str, limit: usize) -> Result<Vec<ScrolledPoint>> {
        let (clause, params) = render_filter(filter);
        let sql = format!(
            "SELECT p.id, p.payload FROM points_fts JOIN points p ON p.id = points_fts.rowid
             WHERE points_fts MATCH ?1 AND {clause} ORDER BY bm25(points_fts) LIMIT {limit}"
        );
        let conn = self.conn.clone();
        let query_param = escape_fts5_query(query);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare(&sql)?;
            let mut bound = vec![rusqlite::types::Value::Text(query_param)];
            bound.extend(params);
            let rows = stmt.query_map(params_from_iter(bound.iter()), row_payload)?;
            let mut out = Vec::new();
            for row in rows {
                let (id, payload) = row?;
                out.push(ScrolledPoint { id, payload });
            }
            Ok::<_, rusqlite::Error>(out)
        })
        .await
        .map_err(|e| EngineError::Storage(e.to_string()))?
        .map_err(EngineError::from)
    }
}

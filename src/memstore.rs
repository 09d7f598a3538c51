//! Conversions between the typed records in [`crate::types`] and the
//! index's point/payload representation, plus the handful of
//! fetch/touch/upsert helpers every component builds on. Grounded on the
//! source's payload-shaping (`_memory_payload`, `_memory_from_payload`)
//! and point-id derivation, one prefix per record kind.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use crate::embedding::Embedder;
use crate::error::{EngineError, Result};
use crate::index::{stable_point_id, Filter, FilterCond, RecordType, UpsertPoint, VectorIndex};
use crate::types::{
    Edge, Enforcement, Gate, IdentityCard, JournalEntry, JournalKind, Memory, Relation, Rule, Sensitivity, Visibility,
};

pub fn memory_point_id(memory_id: &str) -> i64 {
    stable_point_id(memory_id)
}

pub fn journal_point_id(user_id: &str, timestamp: DateTime<Utc>, content: &str) -> i64 {
    let prefix: String = content.chars().take(50).collect();
    stable_point_id(&format!("journal:{user_id}:{}:{prefix}", timestamp.timestamp()))
}

pub fn identity_point_id(user_id: &str) -> i64 {
    stable_point_id(&format!("identity:{user_id}"))
}

pub fn rule_point_id(user_id: &str, rule_id: &str) -> i64 {
    stable_point_id(&format!("rule:{user_id}:{rule_id}"))
}

fn ts(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + dt.timestamp_subsec_millis() as f64 / 1000.0
}

fn from_ts(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0).single().unwrap_or_else(Utc::now)
}

pub fn memory_to_payload(user_id: &str, memory: &Memory) -> serde_json::Value {
    json!({
        "type": RecordType::Memory.as_str(),
        "memory_id": memory.id,
        "content": memory.content,
        "person": memory.person,
        "project": memory.project,
        "user_id": user_id,
        "gate": memory.gate.as_str(),
        "confidence": memory.confidence,
        "created": ts(memory.created),
        "last_accessed": ts(memory.last_accessed),
        "access_count": memory.access_count,
        "decay_class": memory.decay_class.as_str(),
        "pinned": memory.pinned,
        "sensitivity": memory.sensitivity.map(|s| s.as_str()),
        "sensitivity_reason": memory.sensitivity_reason,
        "visibility": memory.visibility.as_str(),
        "team_id": memory.team_id,
        "created_by": memory.created_by,
        "edges": memory.edges.iter().map(|e| json!({"to": e.to, "relation": e.relation.as_str()})).collect::<Vec<_>>(),
    })
}

pub fn memory_from_payload(payload: &serde_json::Value) -> Result<Memory> {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(String::from);
    let id = get_str("memory_id").ok_or_else(|| EngineError::Storage("point missing memory_id".into()))?;
    let gate = payload
        .get("gate")
        .and_then(|v| v.as_str())
        .and_then(Gate::from_str_opt)
        .unwrap_or(Gate::Epistemic);
    let decay_class = payload
        .get("decay_class")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| gate.decay_class());
    let visibility = match get_str("visibility").as_deref() {
        Some("team") => Visibility::Team,
        _ => Visibility::Private,
    };
    let edges = payload
        .get("edges")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|e| {
                    let to = e.get("to")?.as_str()?.to_string();
                    let relation = Relation::from_str_opt(e.get("relation")?.as_str()?)?;
                    Some(Edge { to, relation })
                })
                .collect()
        })
        .unwrap_or_default();
    let created = payload.get("created").and_then(|v| v.as_f64()).map(from_ts).unwrap_or_else(Utc::now);
    let last_accessed = payload
        .get("last_accessed")
        .and_then(|v| v.as_f64())
        .map(from_ts)
        .unwrap_or(created);

    Ok(Memory {
        id,
        created,
        last_accessed,
        access_count: payload.get("access_count").and_then(|v| v.as_u64()).unwrap_or(1),
        gate,
        decay_class,
        confidence: payload.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.9) as f32,
        content: get_str("content").unwrap_or_default(),
        person: get_str("person"),
        project: get_str("project"),
        pinned: payload.get("pinned").and_then(|v| v.as_bool()).unwrap_or(false),
        sensitivity: get_str("sensitivity").as_deref().and_then(Sensitivity::from_str_opt),
        sensitivity_reason: get_str("sensitivity_reason"),
        visibility,
        team_id: get_str("team_id"),
        created_by: get_str("created_by"),
        edges,
    })
}

/// Fetch a memory by domain id within a single `user_id` namespace (the
/// private-then-team fallback lives one level up, in `recall`/`forget`).
pub async fn get_memory_raw(index: &dyn VectorIndex, user_id: &str, memory_id: &str) -> Result<Option<Memory>> {
    let filter = Filter::new(RecordType::Memory)
        .with(FilterCond::Eq("memory_id", memory_id.to_string()))
        .with(FilterCond::Eq("user_id", user_id.to_string()));
    let points = index.scroll(&filter, 1, None).await?;
    match points.into_iter().next() {
        Some(p) => Ok(Some(memory_from_payload(&p.payload)?)),
        None => Ok(None),
    }
}

pub async fn upsert_memory(index: &dyn VectorIndex, embedder: &dyn Embedder, user_id: &str, memory: &Memory) -> Result<()> {
    let dense = embedder.embed(&memory.content).await?;
    index
        .upsert(UpsertPoint {
            id: memory_point_id(&memory.id),
            dense,
            text: memory.content.clone(),
            payload: memory_to_payload(user_id, memory),
        })
        .await
}

pub async fn touch_memory(index: &dyn VectorIndex, user_id: &str, memory_id: &str) -> Result<()> {
    if let Some(existing) = get_memory_raw(index, user_id, memory_id).await? {
        let point_id = memory_point_id(memory_id);
        index
            .set_payload(
                &[point_id],
                json!({
                    "last_accessed": ts(Utc::now()),
                    "access_count": existing.access_count + 1,
                }),
            )
            .await?;
    }
    Ok(())
}

pub fn journal_to_payload(user_id: &str, entry: &JournalEntry) -> serde_json::Value {
    json!({
        "type": RecordType::Journal.as_str(),
        "user_id": user_id,
        "gate": entry.kind.as_str(),
        "content": entry.content,
        "person": entry.person,
        "project": entry.project,
        "timestamp": ts(entry.timestamp),
        "date": entry.date,
    })
}

pub fn journal_from_payload(payload: &serde_json::Value) -> JournalEntry {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(String::from);
    let kind = get_str("gate").as_deref().and_then(JournalKind::from_str_opt).unwrap_or(JournalKind::Observation);
    let timestamp = payload.get("timestamp").and_then(|v| v.as_f64()).map(from_ts).unwrap_or_else(Utc::now);
    JournalEntry {
        timestamp,
        kind,
        content: get_str("content").unwrap_or_default(),
        person: get_str("person"),
        project: get_str("project"),
        date: get_str("date").unwrap_or_default(),
    }
}

pub async fn insert_journal(index: &dyn VectorIndex, embedder: &dyn Embedder, user_id: &str, entry: &JournalEntry) -> Result<()> {
    let dense = embedder.embed(&entry.content).await?;
    index
        .upsert(UpsertPoint {
            id: journal_point_id(user_id, entry.timestamp, &entry.content),
            dense,
            text: entry.content.clone(),
            payload: journal_to_payload(user_id, entry),
        })
        .await
}

pub fn identity_to_payload(user_id: &str, card: &IdentityCard) -> serde_json::Value {
    json!({
        "type": RecordType::Identity.as_str(),
        "user_id": user_id,
        "person": card.person,
        "project": card.project,
        "content": card.content,
        "last_updated": ts(card.last_updated),
    })
}

pub fn identity_from_payload(payload: &serde_json::Value) -> IdentityCard {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(String::from);
    IdentityCard {
        person: get_str("person"),
        project: get_str("project"),
        content: get_str("content").unwrap_or_default(),
        last_updated: payload.get("last_updated").and_then(|v| v.as_f64()).map(from_ts).unwrap_or_else(Utc::now),
    }
}

pub fn rule_to_payload(user_id: &str, rule: &Rule) -> serde_json::Value {
    let content = format!("{}: {} ({})", rule.scope, rule.condition, rule.enforcement.as_str());
    json!({
        "type": RecordType::Rule.as_str(),
        "rule_id": rule.rule_id,
        "user_id": user_id,
        "scope": rule.scope,
        "condition": rule.condition,
        "enforcement": rule.enforcement.as_str(),
        "created": ts(rule.created),
        "last_triggered": rule.last_triggered.map(ts),
        "content": content,
    })
}

pub fn rule_from_payload(payload: &serde_json::Value) -> Option<Rule> {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(String::from);
    Some(Rule {
        rule_id: get_str("rule_id")?,
        scope: get_str("scope").unwrap_or_else(|| "global".to_string()),
        condition: get_str("condition")?,
        enforcement: get_str("enforcement").as_deref().and_then(Enforcement::from_str_opt).unwrap_or(Enforcement::Suggest),
        created: payload.get("created").and_then(|v| v.as_f64()).map(from_ts).unwrap_or_else(Utc::now),
        last_triggered: payload.get("last_triggered").and_then(|v| v.as_f64()).map(from_ts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_memory() -> Memory {
        Memory {
            id: "mem_20260101_000000_abcd".to_string(),
            created: Utc::now(),
            last_accessed: Utc::now(),
            access_count: 1,
            gate: Gate::Epistemic,
            decay_class: Gate::Epistemic.decay_class(),
            confidence: 0.9,
            content: "the API uses REST".to_string(),
            person: None,
            project: Some("api".to_string()),
            pinned: false,
            sensitivity: None,
            sensitivity_reason: None,
            visibility: Visibility::Private,
            team_id: None,
            created_by: None,
            edges: vec![],
        }
    }

    #[test]
    fn payload_roundtrips_a_memory() {
        let mem = sample_memory();
        let payload = memory_to_payload("u1", &mem);
        let back = memory_from_payload(&payload).unwrap();
        assert_eq!(back.id, mem.id);
        assert_eq!(back.content, mem.content);
        assert_eq!(back.gate, mem.gate);
        assert_eq!(back.project, mem.project);
    }

    #[test]
    fn memory_point_id_has_no_prefix_collision_with_journal() {
        assert_ne!(memory_point_id("x"), journal_point_id("u1", Utc::now(), "x"));
    }
}

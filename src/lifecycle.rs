//! Lifecycle (C5): decay scoring, `Reflect` consolidation of stale
//! journal entries into weekly digests, identity regeneration, and
//! batch sensitivity (re)classification. Grounded on the source's
//! `consolidation/decay.py` (decay score) and `consolidation/digest.py`
//! (weekly grouping and archival), generalized from the source's
//! single-tenant `user_id="local"` default to any [`TenantContext`].

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, Utc};
use tracing::warn;

use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{Filter, FilterCond, RecordType, VectorIndex};
use crate::memstore::{
    get_memory_raw, identity_from_payload, identity_to_payload, insert_journal, journal_from_payload, memory_from_payload,
    memory_point_id,
};
use crate::synth::{Synthesizer, CONSOLIDATE_SYSTEM_PROMPT, IDENTITY_SYSTEM_PROMPT};
use crate::tenant::{make_filter, FilterOptions, TenantContext};
use crate::types::{DecayClass, IdentityCard, JournalEntry, JournalKind, Memory, ReflectReport, Sensitivity};

/// `recency = 1` for `decay_class == never`, else `0.5^(Δdays /
/// half_life_days)`, measured from `last_accessed` (§4.5).
pub fn recency(mem: &Memory, now: chrono::DateTime<Utc>) -> f64 {
    match mem.decay_class.half_life_days() {
        None => 1.0,
        Some(half_life) => {
            let delta_days = (now - mem.last_accessed).num_seconds() as f64 / 86_400.0;
            0.5f64.powf(delta_days.max(0.0) / half_life)
        }
    }
}

/// `frequency = log2(access_count + 1)`.
pub fn frequency(mem: &Memory) -> f64 {
    ((mem.access_count + 1) as f64).log2()
}

/// `score = recency × frequency`.
pub fn decay_score(mem: &Memory, now: chrono::DateTime<Utc>) -> f64 {
    recency(mem, now) * frequency(mem)
}

/// `is_fading = (decay_class ≠ never) ∧ (score < fading_threshold)`.
pub fn is_fading(mem: &Memory, now: chrono::DateTime<Utc>, config: &EngineConfig) -> bool {
    mem.decay_class != DecayClass::Never && decay_score(mem, now) < config.fading_threshold as f64
}

fn iso_week_key(date: &str) -> Option<String> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let iso = parsed.iso_week();
    Some(format!("{:04}-W{:02}", iso.year(), iso.week()))
}

/// `Reflect(ctx)`: fold journal days older than the consolidation window
/// into weekly digests, archive fading memories, and regenerate the
/// identity card if the tenant has been active recently. Each of steps
/// 2-4 records its own failures in the report rather than aborting (§4.5,
/// §7: "one failing step does not abort the others").
pub async fn reflect(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    synthesizer: Option<&dyn Synthesizer>,
    config: &EngineConfig,
) -> Result<ReflectReport> {
    let mut report = ReflectReport::default();
    let now = Utc::now();

    // Step 1: collect stale journal days, grouped by ISO week.
    let stale_days = match collect_stale_days(index, ctx, now, config).await {
        Ok(days) => days,
        Err(e) => {
            report.warnings.push(format!("collecting stale journal days failed: {e}"));
            Vec::new()
        }
    };

    let mut by_week: BTreeMap<String, Vec<(String, JournalEntry)>> = BTreeMap::new();
    for day in stale_days {
        if let Some(week) = iso_week_key(&day) {
            match entries_for_day(index, ctx, &day).await {
                Ok(entries) => {
                    for entry in entries {
                        by_week.entry(week.clone()).or_default().push((day.clone(), entry));
                    }
                }
                Err(e) => report.warnings.push(format!("reading journal day {day} failed: {e}")),
            }
        }
    }

    // Step 2: synthesize + persist a digest per non-empty week, then
    // archive the source days.
    if let Some(synth) = synthesizer {
        for (week, entries) in &by_week {
            if entries.is_empty() {
                continue;
            }
            let concatenated = entries
                .iter()
                .map(|(_, e)| format!("[{}] {}", e.kind, e.content))
                .collect::<Vec<_>>()
                .join("\n");
            match crate::synth::synthesize(synth, config, CONSOLIDATE_SYSTEM_PROMPT, &concatenated, 1024, None).await {
                Ok(digest_text) => {
                    let digest = JournalEntry {
                        timestamp: now,
                        kind: JournalKind::Digest,
                        content: digest_text,
                        person: None,
                        project: None,
                        date: week.clone(),
                    };
                    if let Err(e) = insert_journal(index, embedder, &ctx.user_id, &digest).await {
                        report.warnings.push(format!("persisting digest for {week} failed: {e}"));
                        continue;
                    }
                    let days: std::collections::HashSet<&String> = entries.iter().map(|(d, _)| d).collect();
                    for day in days {
                        if let Err(e) = archive_journal_day(index, ctx, day).await {
                            report.warnings.push(format!("archiving journal day {day} failed: {e}"));
                        } else {
                            report.days_archived += 1;
                        }
                    }
                    report.digests_written += 1;
                }
                Err(e) => report.warnings.push(format!("consolidating week {week} failed: {e}")),
            }
        }
    } else if !by_week.is_empty() {
        report.warnings.push("no synthesizer configured: skipped journal consolidation".to_string());
    }

    // Step 3: scan memories, archive non-pinned fading ones.
    match scan_and_archive_fading(index, ctx, now, config).await {
        Ok(count) => report.memories_archived = count,
        Err(e) => report.warnings.push(format!("scanning fading memories failed: {e}")),
    }

    // Step 4: regenerate identity if the tenant has recent activity.
    match has_recent_activity(index, ctx, now, config).await {
        Ok(true) => match regenerate_identity(index, ctx, synthesizer, now, config).await {
            Ok(()) => report.identity_regenerated = true,
            Err(e) => report.warnings.push(format!("identity regeneration failed: {e}")),
        },
        Ok(false) => {}
        Err(e) => report.warnings.push(format!("checking recent activity failed: {e}")),
    }

    Ok(report)
}

async fn collect_stale_days(
    index: &dyn VectorIndex,
    ctx: &TenantContext,
    now: chrono::DateTime<Utc>,
    config: &EngineConfig,
) -> Result<Vec<String>> {
    let cutoff = (now - Duration::days(config.consolidation_window_days)).timestamp() as f64;
    let filter = Filter::new(RecordType::Journal)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Lt("timestamp", cutoff));
    let points = index.scroll(&filter, 1000, None).await?;
    let mut days: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for point in points {
        if let Some(date) = point.payload.get("date").and_then(|v| v.as_str()) {
            if !date.is_empty() {
                days.insert(date.to_string());
            }
        }
    }
    Ok(days.into_iter().collect())
}

async fn entries_for_day(index: &dyn VectorIndex, ctx: &TenantContext, day: &str) -> Result<Vec<JournalEntry>> {
    let filter = Filter::new(RecordType::Journal)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Eq("date", day.to_string()));
    let points = index.scroll(&filter, 500, None).await?;
    Ok(points.into_iter().map(|p| journal_from_payload(&p.payload)).collect())
}

async fn archive_journal_day(index: &dyn VectorIndex, ctx: &TenantContext, day: &str) -> Result<()> {
    let filter = Filter::new(RecordType::Journal)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Eq("date", day.to_string()));
    index.delete(&filter).await?;
    Ok(())
}

async fn scan_and_archive_fading(
    index: &dyn VectorIndex,
    ctx: &TenantContext,
    now: chrono::DateTime<Utc>,
    config: &EngineConfig,
) -> Result<u64> {
    let filter = make_filter(ctx, RecordType::Memory, &FilterOptions::default());
    let points = index.scroll(&filter, 10_000, None).await?;
    let mut archived = 0u64;
    for point in points {
        let mem = match memory_from_payload(&point.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "skipping unparsable memory point during reflect");
                continue;
            }
        };
        if mem.pinned {
            continue;
        }
        if is_fading(&mem, now, config) {
            let per_memory_filter = Filter::new(RecordType::Memory)
                .with(FilterCond::Eq("memory_id", mem.id.clone()));
            index.delete(&per_memory_filter).await?;
            archived += 1;
        }
    }
    Ok(archived)
}

async fn has_recent_activity(
    index: &dyn VectorIndex,
    ctx: &TenantContext,
    now: chrono::DateTime<Utc>,
    config: &EngineConfig,
) -> Result<bool> {
    let cutoff = (now - Duration::days(config.identity_refresh_window_days)).timestamp() as f64;
    let filter = Filter::new(RecordType::Journal)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Gte("timestamp", cutoff));
    let count = index.count(&filter).await?;
    Ok(count > 0)
}

async fn regenerate_identity(
    index: &dyn VectorIndex,
    ctx: &TenantContext,
    synthesizer: Option<&dyn Synthesizer>,
    now: chrono::DateTime<Utc>,
    config: &EngineConfig,
) -> Result<()> {
    let Some(synth) = synthesizer else {
        return Err(crate::error::EngineError::Config(
            "identity regeneration requires a synthesizer".to_string(),
        ));
    };

    let cutoff = (now - Duration::days(config.identity_refresh_window_days)).timestamp() as f64;
    let filter = Filter::new(RecordType::Journal)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Gte("timestamp", cutoff));
    let points = index.scroll(&filter, 200, None).await?;
    let recent_content = points
        .iter()
        .map(|p| p.payload.get("content").and_then(|v| v.as_str()).unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n");

    let prior = get_identity(index, ctx).await?;
    let content = crate::synth::synthesize(synth, config, IDENTITY_SYSTEM_PROMPT, &recent_content, 512, None).await?;
    let card = IdentityCard {
        person: prior.as_ref().and_then(|c| c.person.clone()),
        project: prior.as_ref().and_then(|c| c.project.clone()),
        content,
        last_updated: now,
    };
    set_identity(index, ctx, card).await
}

pub async fn get_identity(index: &dyn VectorIndex, ctx: &TenantContext) -> Result<Option<IdentityCard>> {
    let filter = Filter::new(RecordType::Identity).with(FilterCond::Eq("user_id", ctx.user_id.clone()));
    let points = index.scroll(&filter, 1, None).await?;
    Ok(points.into_iter().next().map(|p| identity_from_payload(&p.payload)))
}

pub async fn set_identity(index: &dyn VectorIndex, ctx: &TenantContext, card: IdentityCard) -> Result<()> {
    let point_id = crate::memstore::identity_point_id(&ctx.user_id);
    index
        .upsert(crate::index::UpsertPoint {
            id: point_id,
            dense: Vec::new(),
            text: card.content.clone(),
            payload: identity_to_payload(&ctx.user_id, &card),
        })
        .await
}

/// Write a checkpoint: a journal-only record capturing session hand-off
/// state, surfaced at the start of the next session via
/// [`latest_checkpoint`] (§4.7). Exempting checkpoints from the
/// consolidation window is left to the surrounding tool layer, not this
/// engine (§4.7).
pub async fn write_checkpoint(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    content: &str,
) -> Result<()> {
    write_journal_only(ctx, index, embedder, JournalKind::Checkpoint, content).await
}

/// Write a flow-mode observation: a journal-only record with no backing
/// `Memory` (§3: "checkpoints and flow-mode observations are
/// journal-only").
pub async fn write_observation(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    content: &str,
) -> Result<()> {
    write_journal_only(ctx, index, embedder, JournalKind::Observation, content).await
}

async fn write_journal_only(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    kind: JournalKind,
    content: &str,
) -> Result<()> {
    let now = Utc::now();
    let entry = JournalEntry {
        timestamp: now,
        kind,
        content: content.to_string(),
        person: None,
        project: None,
        date: now.format("%Y-%m-%d").to_string(),
    };
    insert_journal(index, embedder, &ctx.user_id, &entry).await
}

/// Newest journal entry with `gate == checkpoint` (§4.7).
pub async fn latest_checkpoint(index: &dyn VectorIndex, ctx: &TenantContext) -> Result<Option<JournalEntry>> {
    let filter = Filter::new(RecordType::Journal)
        .with(FilterCond::Eq("user_id", ctx.user_id.clone()))
        .with(FilterCond::Eq("gate", "checkpoint".to_string()));
    let points = index.scroll(&filter, 1, Some("timestamp")).await?;
    Ok(points.into_iter().next().map(|p| journal_from_payload(&p.payload)))
}

/// `Classify(ctx)`: the batch version of §4.2 step 7. Iterates currently
/// unclassified memories, or every memory when `force` is set.
pub async fn classify(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    synthesizer: &dyn Synthesizer,
    config: &EngineConfig,
    force: bool,
) -> Result<u64> {
    let mut filter = Filter::new(RecordType::Memory).with(FilterCond::Eq("user_id", ctx.user_id.clone()));
    if !force {
        filter = filter.with(FilterCond::IsNull("sensitivity"));
    }
    let points = index.scroll(&filter, 10_000, None).await?;

    let mut classified = 0u64;
    for point in points {
        let mem = match memory_from_payload(&point.payload) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let response =
            crate::synth::synthesize(synthesizer, config, crate::synth::CLASSIFY_SYSTEM_PROMPT, &mem.content, 64, None).await?;
        let parsed = crate::synth::parse_classification(&response);
        if parsed.level == "safe" || parsed.level == "unknown" {
            continue;
        }
        if Sensitivity::from_str_opt(&parsed.level).is_none() {
            continue;
        }
        index
            .set_payload(
                &[memory_point_id(&mem.id)],
                serde_json::json!({"sensitivity": parsed.level, "sensitivity_reason": parsed.reason}),
            )
            .await?;
        classified += 1;
    }
    Ok(classified)
}

/// `Reclassify`: force a single memory through the Synthesizer, overriding
/// any existing sensitivity (the single-memory counterpart of `Classify`'s
/// `force` flag).
pub async fn reclassify(
    ctx: &TenantContext,
    index: &dyn VectorIndex,
    synthesizer: &dyn Synthesizer,
    config: &EngineConfig,
    memory_id: &str,
) -> Result<Option<Sensitivity>> {
    let Some(mem) = get_memory_raw(index, &ctx.user_id, memory_id).await? else {
        return Ok(None);
    };
    let response =
        crate::synth::synthesize(synthesizer, config, crate::synth::CLASSIFY_SYSTEM_PROMPT, &mem.content, 64, None).await?;
    let parsed = crate::synth::parse_classification(&response);
    let level = Sensitivity::from_str_opt(&parsed.level);
    index
        .set_payload(
            &[memory_point_id(memory_id)],
            serde_json::json!({"sensitivity": parsed.level, "sensitivity_reason": parsed.reason}),
        )
        .await?;
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Gate, Visibility};

    fn memory_with(gate: Gate, access_count: u64, last_accessed: chrono::DateTime<Utc>, pinned: bool) -> Memory {
        Memory {
            id: "mem_x".to_string(),
            created: last_accessed,
            last_accessed,
            access_count,
            gate,
            decay_class: gate.decay_class(),
            confidence: 0.9,
            content: "x".to_string(),
            person: None,
            project: None,
            pinned,
            sensitivity: None,
            sensitivity_reason: None,
            visibility: Visibility::Private,
            team_id: None,
            created_by: None,
            edges: vec![],
        }
    }

    #[test]
    fn never_decay_is_never_fading() {
        let now = Utc::now();
        let ancient = now - Duration::days(10_000);
        let mem = memory_with(Gate::Promissory, 0, ancient, false);
        let config = EngineConfig::default();
        assert!(!is_fading(&mem, now, &config));
    }

    #[test]
    fn zero_access_count_has_zero_frequency_and_score() {
        let now = Utc::now();
        let mem = memory_with(Gate::Behavioral, 0, now, false);
        assert_eq!(frequency(&mem), 0.0);
        assert_eq!(decay_score(&mem, now), 0.0);
    }

    #[test]
    fn fast_decay_at_one_half_life_is_about_half() {
        let now = Utc::now();
        let aged = now - Duration::days(30);
        let mem = memory_with(Gate::Behavioral, 1, aged, false);
        let r = recency(&mem, now);
        assert!((r - 0.5).abs() < 0.01);
    }

    #[test]
    fn stale_fast_memory_is_fading() {
        let now = Utc::now();
        let aged = now - Duration::days(200);
        let mem = memory_with(Gate::Behavioral, 1, aged, false);
        let config = EngineConfig::default();
        assert!(is_fading(&mem, now, &config));
    }

    #[test]
    fn iso_week_key_formats_as_yyyy_www() {
        assert_eq!(iso_week_key("2026-01-05").unwrap(), "2026-W02");
    }
}

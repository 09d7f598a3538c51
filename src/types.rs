//! Core data model: memories, journal entries, identity cards, rules and
//! the tagged-union envelope the reference index stores them under.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length, in bytes, of a memory's `content`.
pub const MAX_CONTENT_LEN: usize = 100_000;
/// Maximum length of `person`/`project` tags.
pub const MAX_TAG_LEN: usize = 500;
/// Maximum length of an identity card's prose.
pub const MAX_IDENTITY_LEN: usize = 50_000;

/// Why a memory was kept. Every memory carries exactly one gate; it
/// determines the memory's [`DecayClass`] and therefore its half-life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gate {
    Behavioral,
    Relational,
    Epistemic,
    Promissory,
    Correction,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::Behavioral => "behavioral",
            Gate::Relational => "relational",
            Gate::Epistemic => "epistemic",
            Gate::Promissory => "promissory",
            Gate::Correction => "correction",
        }
    }

    /// Total function from gate to decay class, per the write pipeline's
    /// derivation rule.
    pub fn decay_class(&self) -> DecayClass {
        match self {
            Gate::Promissory => DecayClass::Never,
            Gate::Relational => DecayClass::Slow,
            Gate::Epistemic => DecayClass::Moderate,
            Gate::Behavioral => DecayClass::Fast,
            Gate::Correction => DecayClass::Moderate,
        }
    }

    /// Parse a gate string, returning `None` rather than erroring so
    /// callers can compose their own validation message.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "behavioral" => Some(Gate::Behavioral),
            "relational" => Some(Gate::Relational),
            "epistemic" => Some(Gate::Epistemic),
            "promissory" => Some(Gate::Promissory),
            "correction" => Some(Gate::Correction),
            _ => None,
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extended, journal-only kinds. These never appear on a `Memory`, only on
/// a [`JournalEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalKind {
    Primary(Gate),
    Checkpoint,
    Digest,
    Observation,
}

impl JournalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalKind::Primary(g) => g.as_str(),
            JournalKind::Checkpoint => "checkpoint",
            JournalKind::Digest => "digest",
            JournalKind::Observation => "observation",
        }
    }

    /// Decay class used when folding journal-only kinds into the same
    /// half-life machinery as primary gates (the extended kinds never
    /// back a `Memory`, but `Reflect` reasons about journal age using the
    /// same clock).
    pub fn decay_class(&self) -> DecayClass {
        match self {
            JournalKind::Primary(g) => g.decay_class(),
            JournalKind::Checkpoint => DecayClass::Fast,
            JournalKind::Digest => DecayClass::Moderate,
            JournalKind::Observation => DecayClass::Fast,
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "checkpoint" => Some(JournalKind::Checkpoint),
            "digest" => Some(JournalKind::Digest),
            "observation" => Some(JournalKind::Observation),
            other => Gate::from_str_opt(other).map(JournalKind::Primary),
        }
    }
}

impl fmt::Display for JournalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed by gate; dictates half-life in the decay score (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayClass {
    Never,
    Slow,
    Moderate,
    Fast,
}

impl DecayClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecayClass::Never => "never",
            DecayClass::Slow => "slow",
            DecayClass::Moderate => "moderate",
            DecayClass::Fast => "fast",
        }
    }

    /// `None` for `never`, which never decays.
    pub fn half_life_days(&self) -> Option<f64> {
        match self {
            DecayClass::Never => None,
            DecayClass::Slow => Some(180.0),
            DecayClass::Moderate => Some(90.0),
            DecayClass::Fast => Some(30.0),
        }
    }
}

impl FromStr for DecayClass {
    type Err = ();
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "never" => Ok(DecayClass::Never),
            "slow" => Ok(DecayClass::Slow),
            "moderate" => Ok(DecayClass::Moderate),
            "fast" => Ok(DecayClass::Fast),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DecayClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who can see a memory: the creator only, or the creator's team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Team,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Team => "team",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensitivity level assigned by the Synthesizer-backed classifier.
/// `None` means "not yet classified", which is distinct from `Safe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Safe,
    Sensitive,
    Critical,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Safe => "safe",
            Sensitivity::Sensitive => "sensitive",
            Sensitivity::Critical => "critical",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(Sensitivity::Safe),
            "sensitive" => Some(Sensitivity::Sensitive),
            "critical" => Some(Sensitivity::Critical),
            _ => None,
        }
    }
}

/// The relation a directed graph edge carries. Only these two kinds are
/// ever written; `RELATED_TO`/auto-link is intentionally not implemented
/// (§9 Open Questions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relation {
    Contradicts,
    Follows,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Contradicts => "CONTRADICTS",
            Relation::Follows => "FOLLOWS",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "CONTRADICTS" => Some(Relation::Contradicts),
            "FOLLOWS" => Some(Relation::Follows),
            _ => None,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge from a memory to another memory in the same tenant
/// scope. Lives inline on the source memory's `edges` sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub to: String,
    pub relation: Relation,
}

/// The durable unit the engine manages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub gate: Gate,
    pub decay_class: DecayClass,
    pub confidence: f32,
    pub content: String,
    pub person: Option<String>,
    pub project: Option<String>,
    pub pinned: bool,
    pub sensitivity: Option<Sensitivity>,
    pub sensitivity_reason: Option<String>,
    pub visibility: Visibility,
    pub team_id: Option<String>,
    pub created_by: Option<String>,
    pub edges: Vec<Edge>,
}

impl Memory {
    /// Snippet used in `Recall`'s rendered output and in the contradiction
    /// warning (`remember.py`'s `content[:80]` truncation).
    pub fn preview(&self, max_chars: usize) -> &str {
        match self.content.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &self.content[..byte_idx],
            None => &self.content,
        }
    }
}

/// An append-only journal record. `Remember` writes one per call;
/// `Reflect` writes digest-kind entries and deletes the days it folded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: JournalKind,
    pub content: String,
    pub person: Option<String>,
    pub project: Option<String>,
    /// UTC day key, `yyyy-mm-dd`, or an ISO week key (`yyyy-Www`) for
    /// digest entries.
    pub date: String,
}

/// One prose summary per tenant, regenerated by `Reflect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityCard {
    pub person: Option<String>,
    pub project: Option<String>,
    pub content: String,
    pub last_updated: DateTime<Utc>,
}

/// Enforcement strength of a [`Rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    Suggest,
    Enforce,
    Block,
}

impl Enforcement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Enforcement::Suggest => "suggest",
            Enforcement::Enforce => "enforce",
            Enforcement::Block => "block",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "suggest" => Some(Enforcement::Suggest),
            "enforce" => Some(Enforcement::Enforce),
            "block" => Some(Enforcement::Block),
            _ => None,
        }
    }
}

/// Per-tenant policy entry, read and enforced by the surrounding
/// assistant; the engine only stores and filters these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub scope: String,
    pub condition: String,
    pub enforcement: Enforcement,
    pub created: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
}

/// Fields a caller may supply to `Remember`.
#[derive(Debug, Clone)]
pub struct RememberInput {
    pub content: String,
    pub gate: String,
    pub person: Option<String>,
    pub project: Option<String>,
    pub visibility: Visibility,
    pub team_id: Option<String>,
}

/// Fields a caller may mutate via `UpdateMemory`. `None` leaves a field
/// untouched; re-embedding only happens when `content` is `Some`.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryInput {
    pub content: Option<String>,
    pub person: Option<String>,
    pub project: Option<String>,
}

/// Narrowing filters accepted by `ListMemories`, beyond the bare tenant
/// filter `MakeFilter` always applies.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub gate: Option<Gate>,
    pub person: Option<String>,
    pub project: Option<String>,
    pub visibility: Option<Visibility>,
    pub pinned: Option<bool>,
    pub limit: usize,
    pub offset: usize,
}

impl ListOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }
}

/// One rendered hit returned by `Recall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallHit {
    pub memory: Memory,
    /// `None` for text-fallback and graph hits, which carry no fused score.
    pub score: Option<f32>,
    /// Set when this hit was reached via graph expansion rather than
    /// direct retrieval.
    pub via_relation: Option<Relation>,
    pub depth: u32,
}

/// Output of `Scan`: per-gate and per-sensitivity counts for a tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub total: u64,
    pub by_gate: std::collections::BTreeMap<String, u64>,
    pub by_sensitivity: std::collections::BTreeMap<String, u64>,
}

/// Outcome report returned by `Reflect`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectReport {
    pub digests_written: u64,
    pub days_archived: u64,
    pub memories_archived: u64,
    pub identity_regenerated: bool,
    /// Best-effort step failures, recorded but not fatal (§7).
    pub warnings: Vec<String>,
}

impl ReflectReport {
    /// Human-readable summary line, e.g. for display to the assistant.
    pub fn summary(&self) -> String {
        format!(
            "Consolidated {} week(s), archived {} fading memories.",
            self.digests_written, self.memories_archived
        )
    }
}

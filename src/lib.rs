//! `engram`: a persistent memory engine for conversational AI assistants.
//!
//! The crate is organized around five cooperating components (§2 of the
//! design): the tenant plane (`tenant`), the write pipeline (`remember`),
//! hybrid retrieval (`recall`), the graph overlay (`graph`), and the
//! lifecycle surface (`lifecycle`). [`Engine`] wires a [`VectorIndex`],
//! an [`Embedder`] and an optional [`Synthesizer`] together and exposes
//! every operation as a method, so a caller constructs one `Engine` per
//! process and threads a [`TenantContext`] through each call.

pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod index;
pub mod lifecycle;
pub mod memops;
pub mod memstore;
pub mod pii;
pub mod recall;
pub mod remember;
pub mod rules;
pub mod synth;
pub mod tenant;
pub mod types;

pub use config::EngineConfig;
pub use embedding::Embedder;
pub use error::{EngineError, Result};
pub use index::VectorIndex;
pub use synth::Synthesizer;
pub use tenant::TenantContext;
pub use types::{
    DecayClass, Edge, Enforcement, Gate, IdentityCard, JournalEntry, JournalKind, ListOptions, Memory,
    RecallHit, ReflectReport, RememberInput, Rule, ScanReport, Sensitivity, UpdateMemoryInput, Visibility,
};

use std::sync::Arc;

use rules::RuleUpdate;

/// The engine's three capabilities plus configuration, constructed once
/// per process and shared across requests. No field is a process global:
/// a caller that wants several engines (e.g. one per test) simply builds
/// several `Engine`s (§9: "a clean rewrite exposes these as explicit
/// engine-construction parameters").
pub struct Engine {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    config: EngineConfig,
}

impl Engine {
    /// Build an engine with no Synthesizer configured. Operations that
    /// require one (`Classify`, `Reclassify`, and `Reflect`'s digest and
    /// identity steps) skip or no-op rather than failing, per the
    /// best-effort policy in §4.2/§4.5.
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, config: EngineConfig) -> Self {
        Self {
            index,
            embedder,
            synthesizer: None,
            config,
        }
    }

    /// Attach a live Synthesizer. Returns `self` for chaining at
    /// construction time.
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn synthesizer_ref(&self) -> Option<&dyn Synthesizer> {
        self.synthesizer.as_deref()
    }

    fn require_synthesizer(&self) -> Result<&dyn Synthesizer> {
        self.synthesizer
            .as_deref()
            .ok_or_else(|| EngineError::Config("this operation requires a configured Synthesizer".to_string()))
    }

    // ---- C2: Write Pipeline -------------------------------------------------

    pub async fn remember(&self, ctx: &TenantContext, input: RememberInput) -> Result<String> {
        remember::remember(
            ctx,
            self.index.as_ref(),
            self.embedder.as_ref(),
            self.synthesizer_ref(),
            &self.config,
            input,
        )
        .await
    }

    // ---- C3: Retrieval -------------------------------------------------------

    pub async fn recall(&self, ctx: &TenantContext, query: &str) -> Result<Vec<RecallHit>> {
        recall::recall(ctx, self.index.as_ref(), self.embedder.as_ref(), &self.config, query).await
    }

    /// Recall, rendered as the printable lines an assistant would surface
    /// directly (§4.3 step 5), or the canonical "no memories found"
    /// sentinel when empty.
    pub async fn recall_rendered(&self, ctx: &TenantContext, query: &str) -> Result<String> {
        let hits = self.recall(ctx, query).await?;
        Ok(recall::render(ctx, &hits, self.config.preview_chars))
    }

    // ---- C4: Graph Overlay ---------------------------------------------------

    pub async fn add_edge(&self, ctx: &TenantContext, from_id: &str, to_id: &str, relation: types::Relation) -> Result<()> {
        graph::add_edge(self.index.as_ref(), &ctx.user_id, from_id, to_id, relation).await
    }

    pub async fn find_related(&self, ctx: &TenantContext, start_id: &str, depth: u32) -> Result<Vec<graph::RelatedMemory>> {
        graph::find_related(self.index.as_ref(), &ctx.user_id, start_id, depth).await
    }

    // ---- memops: CRUD and bulk surfaces ---------------------------------------

    pub async fn get_memory(&self, ctx: &TenantContext, memory_id: &str) -> Result<Option<Memory>> {
        memops::get_memory(self.index.as_ref(), ctx, memory_id).await
    }

    pub async fn forget(&self, ctx: &TenantContext, memory_id: &str, is_team_admin: bool) -> Result<String> {
        memops::forget(self.index.as_ref(), ctx, memory_id, is_team_admin).await
    }

    pub async fn pin(&self, ctx: &TenantContext, memory_id: &str) -> Result<()> {
        memops::pin(self.index.as_ref(), ctx, memory_id).await
    }

    pub async fn unpin(&self, ctx: &TenantContext, memory_id: &str) -> Result<()> {
        memops::unpin(self.index.as_ref(), ctx, memory_id).await
    }

    pub async fn update_memory(&self, ctx: &TenantContext, memory_id: &str, update: UpdateMemoryInput) -> Result<Memory> {
        memops::update_memory(self.index.as_ref(), self.embedder.as_ref(), ctx, memory_id, update).await
    }

    pub async fn list_memories(&self, ctx: &TenantContext, opts: &ListOptions) -> Result<Vec<Memory>> {
        memops::list_memories(self.index.as_ref(), ctx, opts).await
    }

    pub async fn list_team_memories(&self, ctx: &TenantContext, limit: usize) -> Result<Vec<Memory>> {
        memops::list_team_memories(self.index.as_ref(), ctx, limit).await
    }

    pub async fn scan(&self, ctx: &TenantContext) -> Result<ScanReport> {
        memops::scan(self.index.as_ref(), ctx).await
    }

    pub async fn migrate(&self, from_user_id: &str, to_user_id: &str) -> Result<u64> {
        memops::migrate_all(self.index.as_ref(), from_user_id, to_user_id).await
    }

    // ---- C5: Lifecycle --------------------------------------------------------

    pub async fn reflect(&self, ctx: &TenantContext) -> Result<ReflectReport> {
        lifecycle::reflect(
            ctx,
            self.index.as_ref(),
            self.embedder.as_ref(),
            self.synthesizer_ref(),
            &self.config,
        )
        .await
    }

    pub async fn classify(&self, ctx: &TenantContext, force: bool) -> Result<u64> {
        let synthesizer = self.require_synthesizer()?;
        lifecycle::classify(ctx, self.index.as_ref(), synthesizer, &self.config, force).await
    }

    pub async fn reclassify(&self, ctx: &TenantContext, memory_id: &str) -> Result<Option<Sensitivity>> {
        let synthesizer = self.require_synthesizer()?;
        lifecycle::reclassify(ctx, self.index.as_ref(), synthesizer, &self.config, memory_id).await
    }

    // ---- C7: Identity & Checkpoints --------------------------------------------

    pub async fn get_identity(&self, ctx: &TenantContext) -> Result<Option<IdentityCard>> {
        lifecycle::get_identity(self.index.as_ref(), ctx).await
    }

    pub async fn set_identity(&self, ctx: &TenantContext, card: IdentityCard) -> Result<()> {
        lifecycle::set_identity(self.index.as_ref(), ctx, card).await
    }

    pub async fn latest_checkpoint(&self, ctx: &TenantContext) -> Result<Option<JournalEntry>> {
        lifecycle::latest_checkpoint(self.index.as_ref(), ctx).await
    }

    /// Write a session-handoff checkpoint, surfaced by `latest_checkpoint`
    /// at the start of the next session.
    pub async fn write_checkpoint(&self, ctx: &TenantContext, content: &str) -> Result<()> {
        lifecycle::write_checkpoint(ctx, self.index.as_ref(), self.embedder.as_ref(), content).await
    }

    /// Write a flow-mode observation: a journal-only record with no
    /// backing `Memory` (§3).
    pub async fn write_observation(&self, ctx: &TenantContext, content: &str) -> Result<()> {
        lifecycle::write_observation(ctx, self.index.as_ref(), self.embedder.as_ref(), content).await
    }

    // ---- C6: Rules --------------------------------------------------------------

    pub async fn create_rule(
        &self,
        ctx: &TenantContext,
        scope: impl Into<String>,
        condition: impl Into<String>,
        enforcement: Enforcement,
    ) -> Result<Rule> {
        rules::create_rule(self.index.as_ref(), ctx, scope, condition, enforcement).await
    }

    pub async fn list_rules(&self, ctx: &TenantContext) -> Result<Vec<Rule>> {
        rules::list_rules(self.index.as_ref(), ctx).await
    }

    pub async fn get_rule(&self, ctx: &TenantContext, rule_id: &str) -> Result<Option<Rule>> {
        rules::get_rule(self.index.as_ref(), ctx, rule_id).await
    }

    pub async fn update_rule(&self, ctx: &TenantContext, rule_id: &str, update: RuleUpdate) -> Result<()> {
        rules::update_rule(self.index.as_ref(), ctx, rule_id, update).await
    }

    pub async fn delete_rule(&self, ctx: &TenantContext, rule_id: &str) -> Result<bool> {
        rules::delete_rule(self.index.as_ref(), ctx, rule_id).await
    }

    pub async fn touch_rule(&self, ctx: &TenantContext, rule_id: &str) -> Result<()> {
        rules::touch_rule(self.index.as_ref(), ctx, rule_id).await
    }
}

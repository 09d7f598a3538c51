//! Engine configuration. Constructed explicitly by the caller and passed
//! into [`crate::Engine::new`] — no process-global state (§9: "a clean
//! rewrite exposes these as explicit engine-construction parameters").

use std::time::Duration;

/// Tunables for the engine. `Default` matches the values the distilled
/// specification fixes (timeouts, half-lives, fusion constants); callers
/// that need different values construct their own.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `Synthesizer.synthesize()` timeout (§5: default 60s).
    pub synthesizer_timeout: Duration,
    /// Every `VectorIndex` operation's timeout (§5: default 30s).
    pub index_timeout: Duration,

    /// Reciprocal Rank Fusion's `k` constant, shared by both prefetch
    /// stages (§4.3). `query_points` normalizes its fused score against
    /// the max achievable with this `k`, so `contradiction_threshold` and
    /// `correction_threshold` stay meaningful regardless of its value; kept
    /// small (Qdrant's default) so a point's rank among a handful of
    /// candidates still moves the fused score rather than being swamped by
    /// a large additive constant.
    pub rrf_k: f32,
    /// Number of fused hits `Recall` returns (§4.3: `limit=10`).
    pub recall_limit: usize,
    /// Lexical fallback's result cap (§4.3 step 3: `limit=5`).
    pub lexical_fallback_limit: usize,
    /// Graph expansion triggers when fewer than this many direct hits
    /// were found (§4.3 step 4).
    pub graph_expansion_threshold: usize,
    /// Graph expansion's BFS depth (§4.3 step 4, §4.4: "typical 2").
    pub graph_expansion_depth: u32,

    /// Contradiction-check threshold (§4.2 step 3: fused score > 0.85).
    pub contradiction_threshold: f32,
    /// Correction-edge threshold (§4.2 step 4: score > 0.5).
    pub correction_threshold: f32,
    /// Correction halves the contradicted memory's confidence by this
    /// factor (§4.2 step 4).
    pub correction_confidence_decay: f32,
    /// Window within which a same-person/project write chains via a
    /// FOLLOWS edge (§4.2 step 5: 24h).
    pub follows_window: Duration,
    /// Preview length used in `Remember`'s returned message and the
    /// contradiction warning (`remember.py`'s 80-character truncation).
    pub preview_chars: usize,

    /// Fading threshold for the decay score (§4.5: `score < 0.05`).
    pub fading_threshold: f32,
    /// Journal age, in days, after which `Reflect` folds a day into a
    /// weekly digest (§4.5 step 1: 14d).
    pub consolidation_window_days: i64,
    /// Window, in days, within which any journal activity triggers an
    /// identity regeneration (§4.5 step 4: 2d).
    pub identity_refresh_window_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            synthesizer_timeout: Duration::from_secs(60),
            index_timeout: Duration::from_secs(30),
            rrf_k: 2.0,
            recall_limit: 10,
            lexical_fallback_limit: 5,
            graph_expansion_threshold: 3,
            graph_expansion_depth: 2,
            contradiction_threshold: 0.85,
            correction_threshold: 0.5,
            correction_confidence_decay: 0.5,
            follows_window: Duration::from_secs(24 * 60 * 60),
            preview_chars: 80,
            fading_threshold: 0.05,
            consolidation_window_days: 14,
            identity_refresh_window_days: 2,
        }
    }
}

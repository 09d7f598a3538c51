//! Property-based tests for engram
//!
//! These tests verify invariants that must hold for all inputs:
//! - the decay score is never fading for `decay_class == never`
//! - `access_count == 0` implies `frequency == 0`
//! - the PII heuristic never panics on arbitrary input
//! - `Memory::preview` never panics on arbitrary unicode content
//! - point-id derivation is deterministic and fits a signed 63-bit space
//!
//! Run with: cargo test --test property_tests

use chrono::{Duration, Utc};
use proptest::prelude::*;

use engram::config::EngineConfig;
use engram::index::stable_point_id;
use engram::lifecycle::{decay_score, frequency, is_fading};
use engram::pii::check_pii;
use engram::types::{DecayClass, Edge, Gate, Memory, Sensitivity, Visibility};

fn memory_with(gate: Gate, access_count: u64, age_days: i64) -> Memory {
    let now = Utc::now();
    let created = now - Duration::days(age_days);
    Memory {
        id: "mem_test".to_string(),
        created,
        last_accessed: created,
        access_count,
        gate,
        decay_class: gate.decay_class(),
        confidence: 0.9,
        content: "content".to_string(),
        person: None,
        project: None,
        pinned: false,
        sensitivity: None::<Sensitivity>,
        sensitivity_reason: None,
        visibility: Visibility::Private,
        team_id: None,
        created_by: None,
        edges: Vec::<Edge>::new(),
    }
}

proptest! {
    /// `decay_class == never` (promissory) never fades, regardless of age
    /// or access count (§8 boundary: "decay_class == never -> is_fading == false").
    #[test]
    fn promissory_never_fades(age_days in 0i64..5000, access_count in 0u64..1000) {
        let now = Utc::now();
        let mem = memory_with(Gate::Promissory, access_count, age_days);
        prop_assert_eq!(mem.decay_class, DecayClass::Never);
        prop_assert!(!is_fading(&mem, now, &EngineConfig::default()));
    }

    /// Zero access count always yields zero frequency and therefore a
    /// zero decay score (§8 boundary: "access_count == 0 -> frequency == 0").
    #[test]
    fn zero_access_count_yields_zero_score(age_days in 0i64..5000) {
        let now = Utc::now();
        let mem = memory_with(Gate::Behavioral, 0, age_days);
        prop_assert_eq!(frequency(&mem), 0.0);
        prop_assert_eq!(decay_score(&mem, now), 0.0);
    }

    /// The decay score is never negative and never exceeds `recency *
    /// frequency`'s natural bound for any age/access combination.
    #[test]
    fn decay_score_is_non_negative(age_days in 0i64..10000, access_count in 0u64..10000) {
        let now = Utc::now();
        let mem = memory_with(Gate::Epistemic, access_count, age_days);
        prop_assert!(decay_score(&mem, now) >= 0.0);
    }

    /// Frequency is monotonically non-decreasing in access count.
    #[test]
    fn frequency_is_monotonic(a in 0u64..5000, b in 0u64..5000) {
        let mem_a = memory_with(Gate::Behavioral, a, 10);
        let mem_b = memory_with(Gate::Behavioral, b, 10);
        if a <= b {
            prop_assert!(frequency(&mem_a) <= frequency(&mem_b));
        }
    }

    /// The PII heuristic never panics on arbitrary text.
    #[test]
    fn pii_check_never_panics(s in ".*") {
        let _ = check_pii(&s);
    }

    /// `Memory::preview` never panics on arbitrary unicode content and
    /// returns exactly `min(max_chars, content.len())` characters.
    #[test]
    fn preview_never_panics_and_respects_bound(s in "\\PC{0,500}", max_chars in 0usize..200) {
        let mut mem = memory_with(Gate::Epistemic, 1, 0);
        mem.content = s;
        let expected = max_chars.min(mem.content.chars().count());
        let preview = mem.preview(max_chars);
        prop_assert_eq!(preview.chars().count(), expected);
    }

    /// Point-id derivation is deterministic and always fits a non-negative
    /// `i64` (§6: "top 63 bits").
    #[test]
    fn stable_point_id_is_deterministic_and_non_negative(s in ".*") {
        let a = stable_point_id(&s);
        let b = stable_point_id(&s);
        prop_assert_eq!(a, b);
        prop_assert!(a >= 0);
    }
}

//! Golden tests - fixture-based tests that lock expected behavior for the
//! pure, table-driven pieces of the engine: the gate -> decay-class
//! derivation and the Synthesizer classification-response parser.
//!
//! Run with: cargo test --test golden_tests

use serde::Deserialize;
use std::fs;

use engram::types::Gate;

#[derive(Debug, Deserialize)]
struct Fixture<T> {
    test_cases: Vec<T>,
}

mod decay_class_golden {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Case {
        name: String,
        gate: String,
        expected: String,
    }

    #[test]
    fn test_gate_to_decay_class_golden() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/gate_decay_class.json");
        let content = fs::read_to_string(path).expect("failed to read gate_decay_class.json fixture");
        let fixture: Fixture<Case> = serde_json::from_str(&content).expect("failed to parse fixture JSON");

        for case in fixture.test_cases {
            let gate = Gate::from_str_opt(&case.gate).unwrap_or_else(|| panic!("case '{}': unknown gate {}", case.name, case.gate));
            assert_eq!(
                gate.decay_class().as_str(),
                case.expected,
                "case '{}': gate {} decay class mismatch",
                case.name,
                case.gate
            );
        }
    }
}

mod classification_golden {
    use super::*;
    use engram::synth::parse_classification;

    #[derive(Debug, Deserialize)]
    struct Case {
        name: String,
        response: String,
        expected_level: String,
        expected_reason: String,
    }

    #[test]
    fn test_classification_parsing_golden() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/classification_responses.json");
        let content = fs::read_to_string(path).expect("failed to read classification_responses.json fixture");
        let fixture: Fixture<Case> = serde_json::from_str(&content).expect("failed to parse fixture JSON");

        for case in fixture.test_cases {
            let parsed = parse_classification(&case.response);
            assert_eq!(parsed.level, case.expected_level, "case '{}': level mismatch", case.name);
            assert_eq!(parsed.reason, case.expected_reason, "case '{}': reason mismatch", case.name);
        }
    }
}

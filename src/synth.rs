//! The `Synthesizer` capability (§6): the engine's narrow interface onto
//! an external LLM endpoint, used for consolidation (`Reflect`), identity
//! regeneration, and sensitivity classification.

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// `synthesize(system, prompt, max_tokens, model?) → text`. Implementations
/// fail with [`crate::error::EngineError::Upstream`] on a non-2xx response
/// or a timeout; the engine treats every call site as best-effort (§4.2,
/// §4.5) except where the spec says otherwise.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, system: &str, prompt: &str, max_tokens: u32, model: Option<&str>) -> Result<String>;
}

/// Every call site goes through here rather than the trait method
/// directly, so `EngineConfig::synthesizer_timeout` (§5: default 60s) is
/// enforced uniformly regardless of which `Synthesizer` is plugged in.
pub async fn synthesize(
    synth: &dyn Synthesizer,
    config: &EngineConfig,
    system: &str,
    prompt: &str,
    max_tokens: u32,
    model: Option<&str>,
) -> Result<String> {
    tokio::time::timeout(config.synthesizer_timeout, synth.synthesize(system, prompt, max_tokens, model))
        .await
        .map_err(|_| EngineError::Upstream("synthesizer call timed out".to_string()))?
}

/// Sensitivity classification result (§4.2 step 7, §4.5 `Classify`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub level: String,
    pub reason: String,
}

pub const CLASSIFY_SYSTEM_PROMPT: &str =
    "Classify the sensitivity of the given memory content as one of: safe, sensitive, critical. \
     Respond with exactly two lines: the level, then a one-sentence reason.";

pub const CONSOLIDATE_SYSTEM_PROMPT: &str =
    "Summarize the following journal entries from one week into a short, dense digest paragraph \
     capturing durable facts and decisions. Omit timestamps and filler.";

pub const IDENTITY_SYSTEM_PROMPT: &str =
    "Write a short third-person prose summary of this person based on their recent journal \
     entries: who they are, what they're working on, and any standing preferences.";

/// Parse a `Synthesizer` classification response, defaulting to `unknown`
/// on a malformed response rather than failing the caller.
pub fn parse_classification(response: &str) -> Classification {
    let mut lines = response.lines().filter(|l| !l.trim().is_empty());
    let level = lines
        .next()
        .map(|l| l.trim().to_lowercase())
        .filter(|l| matches!(l.as_str(), "safe" | "sensitive" | "critical"))
        .unwrap_or_else(|| "unknown".to_string());
    let reason = lines.next().unwrap_or("").trim().to_string();
    Classification { level, reason }
}

#[cfg(feature = "synthesizer-http")]
pub mod http {
    //! A live `Synthesizer` over an OpenAI-compatible chat completions
    //! endpoint, the only live external integration this crate ships.

    use async_trait::async_trait;
    use serde::Deserialize;

    use crate::error::{EngineError, Result};

    use super::Synthesizer;

    pub struct HttpSynthesizer {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        default_model: String,
    }

    impl HttpSynthesizer {
        pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, default_model: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into(),
                api_key: api_key.into(),
                default_model: default_model.into(),
            }
        }
    }

    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<ChatChoice>,
    }

    #[derive(Deserialize)]
    struct ChatChoice {
        message: ChatMessage,
    }

    #[derive(Deserialize)]
    struct ChatMessage {
        content: String,
    }

    #[async_trait]
    impl Synthesizer for HttpSynthesizer {
        async fn synthesize(&self, system: &str, prompt: &str, max_tokens: u32, model: Option<&str>) -> Result<String> {
            let resp = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({
                    "model": model.unwrap_or(&self.default_model),
                    "max_tokens": max_tokens,
                    "messages": [
                        {"role": "system", "content": system},
                        {"role": "user", "content": prompt},
                    ],
                }))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(EngineError::Upstream(format!("synthesizer returned {}", resp.status())));
            }
            let parsed: ChatResponse = resp.json().await?;
            parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| EngineError::Upstream("synthesizer returned no choices".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct SlowSynthesizer;

    #[async_trait]
    impl Synthesizer for SlowSynthesizer {
        async fn synthesize(&self, _system: &str, _prompt: &str, _max_tokens: u32, _model: Option<&str>) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn synthesize_wrapper_times_out_slower_calls() {
        let mut config = EngineConfig::default();
        config.synthesizer_timeout = Duration::from_millis(5);
        let err = synthesize(&SlowSynthesizer, &config, "sys", "prompt", 16, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Upstream(_)));
    }

    #[tokio::test]
    async fn synthesize_wrapper_passes_through_fast_calls() {
        let config = EngineConfig::default();
        let out = synthesize(&SlowSynthesizer, &config, "sys", "prompt", 16, None).await.unwrap();
        assert_eq!(out, "done");
    }

    #[test]
    fn parses_well_formed_response() {
        let c = parse_classification("sensitive\ncontains a home address");
        assert_eq!(c.level, "sensitive");
        assert_eq!(c.reason, "contains a home address");
    }

    #[test]
    fn malformed_response_defaults_to_unknown() {
        let c = parse_classification("not a recognized level");
        assert_eq!(c.level, "unknown");
    }

    #[test]
    fn blank_response_defaults_to_unknown() {
        let c = parse_classification("");
        assert_eq!(c.level, "unknown");
    }
}

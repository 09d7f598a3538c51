//! The `Embedder` capability (§6, via the engine's own construction
//! parameters rather than a process global per §9). Produces the dense
//! vector side of hybrid retrieval.

pub mod tfidf;

use async_trait::async_trait;

use crate::error::Result;

/// Embeds free text into a fixed-dimension dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;
}

#[cfg(feature = "synthesizer-http")]
pub mod http {
    //! A live `Embedder` backed by an OpenAI-compatible embeddings
    //! endpoint, grounded on the same HTTP client shape used for the
    //! `Synthesizer`.

    use async_trait::async_trait;
    use serde::Deserialize;

    use crate::error::{EngineError, Result};

    use super::Embedder;

    pub struct HttpEmbedder {
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        dimensions: usize,
    }

    impl HttpEmbedder {
        pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: base_url.into(),
                api_key: api_key.into(),
                model: model.into(),
                dimensions,
            }
        }
    }

    #[derive(Deserialize)]
    struct EmbeddingResponse {
        data: Vec<EmbeddingData>,
    }

    #[derive(Deserialize)]
    struct EmbeddingData {
        embedding: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for HttpEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let resp = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&serde_json::json!({"model": self.model, "input": text}))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(EngineError::Upstream(format!("embedder returned {}", resp.status())));
            }
            let parsed: EmbeddingResponse = resp.json().await?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| EngineError::Upstream("embedder returned no data".to_string()))
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }
}

/// Cosine similarity between two vectors of equal length. Returns `0.0`
/// for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
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
        0.0
    } else {
        dot / (na.sqrt() * nb.sqrt())
    }
}

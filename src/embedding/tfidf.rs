//! Fallback dense embedder requiring no external API key: a feature-hashed
//! TF-IDF-like vector, used when no live Embedder endpoint is configured.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::Result;

use super::Embedder;

pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for TfIdfEmbedder {
    fn default() -> Self {
        Self::new(512)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|tok| tok.len() > 1)
        .map(|tok| tok.to_lowercase())
        .collect()
}

fn hash_token(token: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    hasher.finish()
}

fn hash_sign(token: &str) -> f32 {
    let mut hasher = DefaultHasher::new();
    (token, "sign").hash(&mut hasher);
    if hasher.finish() % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

#[async_trait]
impl Embedder for TfIdfEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for tok in &tokens {
            *counts.entry(tok.as_str()).or_insert(0) += 1;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in &counts {
            let tf = ((*count as f32) / doc_len + 1.0).ln();
            let pseudo_idf = 1.0 + token.len() as f32 * 0.1;
            let dim = (hash_token(token) as usize) % self.dimensions;
            vector[dim] += hash_sign(token) * tf * pseudo_idf;
        }

        for pair in tokens.windows(2) {
            let bigram = format!("{}_{}", pair[0], pair[1]);
            let dim = (hash_token(&bigram) as usize) % self.dimensions;
            vector[dim] += hash_sign(&bigram) * 0.5;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let embedder = TfIdfEmbedder::new(64);
        let a = embedder.embed("the quick brown fox").await.unwrap();
        let b = embedder.embed("the quick brown fox").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn similar_text_scores_higher_than_unrelated_text() {
        let embedder = TfIdfEmbedder::new(256);
        let base = embedder.embed("I prefer tabs over spaces").await.unwrap();
        let similar = embedder.embed("tabs over spaces, always").await.unwrap();
        let unrelated = embedder.embed("the weather in Lisbon is mild").await.unwrap();

        let sim_close = super::super::cosine_similarity(&base, &similar);
        let sim_far = super::super::cosine_similarity(&base, &unrelated);
        assert!(sim_close > sim_far);
    }

    #[tokio::test]
    async fn empty_input_yields_zero_vector() {
        let embedder = TfIdfEmbedder::new(32);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn non_empty_vector_is_unit_normalized() {
        let embedder = TfIdfEmbedder::new(128);
        let v = embedder.embed("some reasonably long piece of content").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}

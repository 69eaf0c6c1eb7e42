//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait producing both a dense vector and a sparse
//! (index, value) vector per input text, and two implementations:
//! - **[`HashedEmbedder`]** — fully local and deterministic; feature-hashes
//!   tokens into a fixed-width dense vector. Useful offline and in tests.
//! - **[`OpenAiEmbedder`]** — calls an OpenAI-compatible embeddings API with
//!   retry and exponential backoff for the dense space.
//!
//! The sparse space is always produced by the local term encoder: each
//! token maps to a stable 32-bit index (SHA-256 of the token) with its
//! term frequency as the value. IDF weighting is applied by the index at
//! query time, so stored values stay corpus-independent.
//!
//! # Retry Strategy
//!
//! The OpenAI provider retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::index::SparseVector;

/// A provider that embeds a batch of texts into both vector spaces.
///
/// Both methods return one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dense vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed texts into the dense space.
    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed texts into the sparse space.
    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>>;
}

/// Create the appropriate [`Embedder`] based on configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashed" => Ok(Arc::new(HashedEmbedder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Stable 32-bit index for a token, derived from SHA-256 so it never varies
/// across processes or runs.
fn token_index(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Encode a text as a sparse term-frequency vector with stable hashed indices.
/// Indices are returned in ascending order.
pub fn sparse_encode(text: &str) -> SparseVector {
    let mut counts: HashMap<u32, f32> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token_index(&token)).or_insert(0.0) += 1.0;
    }

    let mut pairs: Vec<(u32, f32)> = counts.into_iter().collect();
    pairs.sort_by_key(|(idx, _)| *idx);

    SparseVector {
        indices: pairs.iter().map(|(idx, _)| *idx).collect(),
        values: pairs.iter().map(|(_, v)| *v).collect(),
    }
}

// ============ Hashed Provider ============

/// Deterministic local embedder: tokens are feature-hashed into `dims`
/// buckets and the resulting count vector is L2-normalized. Captures lexical
/// overlap only, which is enough for offline operation and reproducible
/// tests.
pub struct HashedEmbedder {
    dims: usize,
}

impl HashedEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn dense_one(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for token in tokenize(text) {
            let bucket = token_index(&token) as usize % self.dims;
            // Second hash byte decides the sign, which spreads collisions.
            let digest = Sha256::digest(token.as_bytes());
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }

        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.dense_one(t)).collect())
    }

    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|t| sparse_encode(t)).collect())
    }
}

// ============ OpenAI Provider ============

/// Dense embeddings via an OpenAI-compatible `POST /v1/embeddings` endpoint.
/// Requires the `OPENAI_API_KEY` environment variable. Sparse vectors are
/// still produced by the local term encoder.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_dense(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(format!("{}/v1/embeddings", self.url))
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("Embeddings API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embeddings API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }

    async fn embed_sparse(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|t| sparse_encode(t)).collect())
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **`LocalProvider`**: runs a sentence-transformers model in-process via
//!   fastembed; the model is loaded once and shared by every request.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides the vector utilities used by the tenant index:
//! - [`cosine_similarity`]: angle-based similarity between two vectors
//! - [`relevance_score`]: maps cosine similarity onto the relevance scale
//!   the retrieval threshold is expressed in
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Model identity
//!
//! Exactly one provider is created per process (see [`create_provider`]) and
//! its [`model_name`](EmbeddingProvider::model_name) is recorded in every
//! index it builds. Queries refuse to run against an index built by a
//! different model, so vectors from different models never meet.
//!
//! # Failure policy
//!
//! Providers do not retry. Each HTTP call carries the configured timeout and
//! the first failure is returned to the caller.

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
mod remote;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::EmbeddingConfig;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;
pub use remote::{OllamaProvider, OpenAIProvider};

/// Default local model, matching the reference deployment.
pub const DEFAULT_LOCAL_MODEL: &str = "all-mpnet-base-v2";

/// Trait for embedding providers.
///
/// Implementations must be safe to call concurrently from independent
/// requests and must be deterministic for a given input.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-mpnet-base-v2"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Create the process-wide [`EmbeddingProvider`] from configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | `LocalProvider` (requires the `local-embeddings-fastembed` feature) |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!(
            "Local embedding provider requires --features local-embeddings-fastembed"
        ),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use tenant_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![0.5f32, -1.25];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form
/// a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a zero
/// vector on either side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

/// Lowest value [`relevance_score`] can return (opposite vectors).
pub const MIN_RELEVANCE: f32 = 1.0 - 2.0 * std::f32::consts::SQRT_2;

/// Relevance of a chunk to a query, given their cosine similarity.
///
/// Both vectors are taken as unit length, so their squared L2 distance is
/// `2 - 2 * cosine`; relevance is `1 - distance / sqrt(2)`. Identical
/// directions score `1.0`, orthogonal ones about `-0.41`, and a relevance
/// of `0.3` corresponds to a cosine similarity of about `0.505`.
pub fn relevance_score(cosine: f32) -> f32 {
    let squared_distance = 2.0 - 2.0 * cosine;
    1.0 - squared_distance / std::f32::consts::SQRT_2
}

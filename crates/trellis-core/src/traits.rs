//! Trait seams implemented by backend crates.
//!
//! Core defines the abstractions; `trellis-embed` provides the embedding
//! implementations and higher-level crates inject them. This keeps the
//! dependency graph acyclic and lets tests swap in deterministic providers.

use crate::error::EngineResult;

/// Maps text to fixed-dimension dense vectors.
///
/// Implementations must be deterministic modulo model version and safe to
/// share across tasks. Query embedding may apply a different prefix than
/// document embedding when the model requires it.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of documents.
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Stable identity of the underlying model, used in cache keys.
    fn model_identity(&self) -> &str;

    /// Output dimensionality.
    fn dimensions(&self) -> usize;
}

/// Second-stage scorer over `(query, document)` pairs.
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    /// Return one calibrated relevance score per document, in input order.
    async fn rerank(&self, query: &str, documents: &[String]) -> EngineResult<Vec<f32>>;
}

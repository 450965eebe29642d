//! Embedding providers for Trellis.
//!
//! [`EmbeddingEngine`] is the piece the rest of the workspace talks to: it
//! wraps a concrete provider with the embedding cache, a per-batch deadline,
//! and the shared retry policy, and serializes calls so model backends that
//! are not reentrant stay safe. Providers: [`HashEmbedder`] (deterministic,
//! offline, used by tests and as the `hash` model) and the fastembed-backed
//! provider behind the `fastembed` feature.

pub mod engine;
pub mod hashed;

#[cfg(feature = "fastembed")]
pub mod local;

pub use engine::EmbeddingEngine;
pub use hashed::HashEmbedder;

#[cfg(feature = "fastembed")]
pub use local::{FastEmbedProvider, FastEmbedReranker};

use std::sync::Arc;

use trellis_core::{EmbeddingProvider, EngineResult};

/// Resolve a provider from the configured model name.
///
/// `"hash"` always resolves to the offline [`HashEmbedder`]; other names are
/// handed to fastembed when the feature is enabled. Model load failure is
/// fatal at initialize time.
pub fn provider_for_model(
    model: &str,
    dimensions: usize,
) -> EngineResult<Arc<dyn EmbeddingProvider>> {
    if model == "hash" {
        return Ok(Arc::new(HashEmbedder::new(dimensions)));
    }

    #[cfg(feature = "fastembed")]
    {
        Ok(Arc::new(FastEmbedProvider::try_new(model)?))
    }

    #[cfg(not(feature = "fastembed"))]
    {
        Err(trellis_core::EngineError::Config(format!(
            "embedding model {model:?} requires the `fastembed` feature; \
             use model = \"hash\" for offline operation"
        )))
    }
}

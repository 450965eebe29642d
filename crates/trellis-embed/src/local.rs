//! fastembed-backed providers: local ONNX embedding models and the
//! cross-encoder reranker. Models are loaded once at construction; a load
//! failure is fatal at initialize time.

use fastembed::{
    EmbeddingModel, InitOptions, RerankInitOptions, RerankerModel, TextEmbedding, TextRerank,
};
use tracing::{info, warn};

use trellis_core::{EmbeddingProvider, EngineError, EngineResult, Reranker};

pub struct FastEmbedProvider {
    model: tokio::sync::Mutex<TextEmbedding>,
    identity: String,
    dimensions: usize,
}

impl FastEmbedProvider {
    pub fn try_new(model_name: &str) -> EngineResult<Self> {
        let (model, identity, dimensions) = resolve_model(model_name);
        let options = InitOptions::new(model).with_show_download_progress(false);
        let text_embedding = TextEmbedding::try_new(options).map_err(|e| {
            EngineError::Config(format!("failed to load embedding model {identity}: {e}"))
        })?;
        info!(model = %identity, dimensions, "loaded embedding model");
        Ok(Self {
            model: tokio::sync::Mutex::new(text_embedding),
            identity,
            dimensions,
        })
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let model = self.model.lock().await;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EngineError::transient(format!("embedding failed: {e}")))
    }

    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let model = self.model.lock().await;
        // Query embedding applies the model's query instruction when the
        // model distinguishes queries from passages
        model
            .query_embed(text)
            .map_err(|e| EngineError::transient(format!("query embedding failed: {e}")))
    }

    fn model_identity(&self) -> &str {
        &self.identity
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn resolve_model(name: &str) -> (EmbeddingModel, String, usize) {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => (
            EmbeddingModel::AllMiniLML6V2,
            "all-minilm-l6-v2".to_string(),
            384,
        ),
        "bge-small-en-v1.5" => (
            EmbeddingModel::BGESmallENV15,
            "bge-small-en-v1.5".to_string(),
            384,
        ),
        "nomic-embed-text-v1.5" => (
            EmbeddingModel::NomicEmbedTextV15,
            "nomic-embed-text-v1.5".to_string(),
            768,
        ),
        other => {
            warn!("unknown embedding model {other:?}, falling back to all-minilm-l6-v2");
            (
                EmbeddingModel::AllMiniLML6V2,
                "all-minilm-l6-v2".to_string(),
                384,
            )
        }
    }
}

/// Cross-encoder reranker over `(query, document)` pairs.
pub struct FastEmbedReranker {
    model: tokio::sync::Mutex<TextRerank>,
}

impl FastEmbedReranker {
    pub fn try_new() -> EngineResult<Self> {
        let options = RerankInitOptions::new(RerankerModel::BGERerankerBase)
            .with_show_download_progress(false);
        let model = TextRerank::try_new(options)
            .map_err(|e| EngineError::Config(format!("failed to load reranker: {e}")))?;
        info!("loaded cross-encoder reranker");
        Ok(Self {
            model: tokio::sync::Mutex::new(model),
        })
    }
}

#[async_trait::async_trait]
impl Reranker for FastEmbedReranker {
    async fn rerank(&self, query: &str, documents: &[String]) -> EngineResult<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.lock().await;
        let results = model
            .rerank(query, documents.iter().collect(), false, None)
            .map_err(|e| EngineError::transient(format!("rerank failed: {e}")))?;

        // Results come back sorted by score; restore input order
        let mut scores = vec![0.0f32; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }
}

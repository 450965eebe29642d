//! The embedding engine: cache, deadline, retry, and call serialization
//! around a concrete provider.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use trellis_cache::{CacheManager, Namespace};
use trellis_core::retry::{retry_with_backoff, RetryPolicy};
use trellis_core::{EmbeddingProvider, EngineError, EngineResult};

pub struct EmbeddingEngine {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Arc<CacheManager>>,
    /// Model backends are not assumed reentrant; calls are serialized.
    call_lock: tokio::sync::Mutex<()>,
    batch_deadline: Duration,
    retry: RetryPolicy,
}

impl EmbeddingEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Option<Arc<CacheManager>>) -> Self {
        Self {
            provider,
            cache,
            call_lock: tokio::sync::Mutex::new(()),
            batch_deadline: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = deadline;
        self
    }

    /// Cache key: model identity plus the text digest, so switching models
    /// never serves stale vectors.
    fn cache_key(&self, prefix: &str, text: &str) -> String {
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        format!("{}:{}:{}", self.provider.model_identity(), prefix, digest)
    }

    async fn call_provider_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let _serialized = self.call_lock.lock().await;
        retry_with_backoff(self.retry, "embed_batch", || async move {
            match tokio::time::timeout(self.batch_deadline, self.provider.embed_batch(texts)).await
            {
                Ok(result) => result,
                Err(_) => Err(EngineError::transient(format!(
                    "embedding batch exceeded {:?} deadline",
                    self.batch_deadline
                ))),
            }
        })
        .await
    }

    async fn call_provider_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let _serialized = self.call_lock.lock().await;
        retry_with_backoff(self.retry, "embed_query", || async move {
            match tokio::time::timeout(self.batch_deadline, self.provider.embed_query(text)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::transient(format!(
                    "query embedding exceeded {:?} deadline",
                    self.batch_deadline
                ))),
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingEngine {
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<usize> = Vec::new();

        if let Some(cache) = &self.cache {
            for (i, text) in texts.iter().enumerate() {
                let key = self.cache_key("d", text);
                match cache.get::<Vec<f32>>(Namespace::Embedding, &key).await {
                    Some(vector) => results[i] = Some(vector),
                    None => missing.push(i),
                }
            }
        } else {
            missing = (0..texts.len()).collect();
        }

        if !missing.is_empty() {
            let to_embed: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            debug!(
                total = texts.len(),
                uncached = missing.len(),
                "embedding batch"
            );
            let vectors = self.call_provider_batch(&to_embed).await?;
            if vectors.len() != missing.len() {
                return Err(EngineError::integrity(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    missing.len()
                )));
            }
            for (&i, vector) in missing.iter().zip(vectors) {
                if let Some(cache) = &self.cache {
                    let key = self.cache_key("d", &texts[i]);
                    let _ = cache
                        .set(Namespace::Embedding, &key, &vector, None)
                        .await;
                }
                results[i] = Some(vector);
            }
        }

        Ok(results
            .into_iter()
            .map(|v| v.expect("every slot filled by cache or provider"))
            .collect())
    }

    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let key = self.cache_key("q", text);
        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get::<Vec<f32>>(Namespace::Embedding, &key).await {
                return Ok(vector);
            }
        }

        let vector = self.call_provider_query(text).await?;
        if let Some(cache) = &self.cache {
            let _ = cache.set(Namespace::Embedding, &key, &vector, None).await;
        }
        Ok(vector)
    }

    fn model_identity(&self) -> &str {
        self.provider.model_identity()
    }

    fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts provider calls so cache behavior is observable.
    struct CountingProvider {
        inner: HashEmbedder,
        batch_calls: AtomicUsize,
        query_calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                inner: HashEmbedder::new(32),
                batch_calls: AtomicUsize::new(0),
                query_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }

        async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_query(text).await
        }

        fn model_identity(&self) -> &str {
            self.inner.model_identity()
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    fn cache(dir: &TempDir) -> Arc<CacheManager> {
        Arc::new(CacheManager::open(&dir.path().join("cache"), 100, 10.0, 50.0).unwrap())
    }

    #[tokio::test]
    async fn repeat_queries_hit_the_cache() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(CountingProvider::new());
        let engine = EmbeddingEngine::new(provider.clone(), Some(cache(&dir)));

        let first = engine.embed_query("cached question").await.unwrap();
        let second = engine.embed_query("cached question").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.query_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_only_embeds_uncached_texts() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(CountingProvider::new());
        let engine = EmbeddingEngine::new(provider.clone(), Some(cache(&dir)));

        let texts = vec!["alpha".to_string(), "beta".to_string()];
        engine.embed_batch(&texts).await.unwrap();
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);

        // Second batch with one new text triggers exactly one more call
        let texts = vec!["alpha".to_string(), "gamma".to_string()];
        let vectors = engine.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn works_without_a_cache() {
        let provider = Arc::new(CountingProvider::new());
        let engine = EmbeddingEngine::new(provider.clone(), None);

        engine.embed_query("q").await.unwrap();
        engine.embed_query("q").await.unwrap();
        assert_eq!(provider.query_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_and_document_caches_are_distinct() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(CountingProvider::new());
        let engine = EmbeddingEngine::new(provider.clone(), Some(cache(&dir)));

        engine.embed_query("same text").await.unwrap();
        engine
            .embed_batch(&["same text".to_string()])
            .await
            .unwrap();

        // Both paths called the provider once each
        assert_eq!(provider.query_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_elevates_to_permanent_after_retries() {
        struct StallingProvider;

        #[async_trait::async_trait]
        impl EmbeddingProvider for StallingProvider {
            async fn embed_batch(&self, _texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![])
            }

            async fn embed_query(&self, _text: &str) -> EngineResult<Vec<f32>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![])
            }

            fn model_identity(&self) -> &str {
                "stall"
            }

            fn dimensions(&self) -> usize {
                8
            }
        }

        let engine = EmbeddingEngine::new(Arc::new(StallingProvider), None)
            .with_deadline(Duration::from_millis(10));
        let err = engine.embed_query("anything").await.unwrap_err();
        assert!(matches!(err, EngineError::PermanentItem { .. }));
    }
}

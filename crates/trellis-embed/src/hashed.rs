//! Deterministic offline embedder.
//!
//! Tokens are hashed into a fixed number of buckets and the resulting
//! bag-of-words vector is L2-normalized, so texts sharing vocabulary land
//! close in cosine space. Not a substitute for a learned model, but fully
//! deterministic and dependency-free, which is what tests and air-gapped
//! setups need.

use sha2::{Digest, Sha256};

use trellis_core::{EmbeddingProvider, EngineResult};

pub struct HashEmbedder {
    dimensions: usize,
    identity: String,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(8);
        Self {
            identity: format!("hash-v1-{dimensions}"),
            dimensions,
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(
                digest[..8].try_into().expect("digest has at least 8 bytes"),
            ) as usize
                % self.dimensions;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn model_identity(&self) -> &str {
        &self.identity
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_query("rust programming language").await.unwrap();
        let b = embedder.embed_query("rust programming language").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn vectors_are_unit_length() {
        let embedder = HashEmbedder::new(64);
        let v = embedder.embed_query("some words here").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn overlapping_vocabulary_scores_higher() {
        let embedder = HashEmbedder::new(128);
        let query = embedder.embed_query("python programming").await.unwrap();
        let related = embedder
            .embed_query("python is a programming language")
            .await
            .unwrap();
        let unrelated = embedder
            .embed_query("italian cuisine recipes")
            .await
            .unwrap();

        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[tokio::test]
    async fn batch_matches_single() {
        let embedder = HashEmbedder::new(32);
        let batch = embedder
            .embed_batch(&["one text".to_string(), "another".to_string()])
            .await
            .unwrap();
        let single = embedder.embed_query("one text").await.unwrap();
        assert_eq!(batch[0], single);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed_query("").await.unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}

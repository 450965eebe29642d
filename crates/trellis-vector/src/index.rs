//! In-memory search index tiers over the stored vectors.
//!
//! Below [`HNSW_THRESHOLD`] documents the exact inner-product index is both
//! faster to build and strictly better in recall; past it the HNSW graph
//! takes over. All vectors are L2-normalized before indexing so inner
//! product equals cosine similarity. The tier is chosen at (re)build time
//! only; insertions never change the index type.

use hnsw_rs::prelude::*;
use tracing::debug;

/// Collection size at which rebuilds switch to the HNSW graph.
pub const HNSW_THRESHOLD: usize = 1000;

const HNSW_MAX_NB_CONNECTION: usize = 32;
const HNSW_EF_CONSTRUCTION: usize = 40;
const HNSW_MAX_LAYER: usize = 16;
const HNSW_EF_SEARCH: usize = 64;

pub enum AnnIndex {
    Flat(FlatIndex),
    Hnsw(HnswIndex),
}

impl AnnIndex {
    /// Build the appropriate tier for the given vectors, positions implied
    /// by order.
    pub fn build(vectors: &[Vec<f32>]) -> Self {
        if vectors.len() >= HNSW_THRESHOLD {
            debug!(count = vectors.len(), "building hnsw index");
            let mut index = HnswIndex::with_capacity(vectors.len());
            for (position, vector) in vectors.iter().enumerate() {
                index.insert(position, vector);
            }
            AnnIndex::Hnsw(index)
        } else {
            debug!(count = vectors.len(), "building flat index");
            AnnIndex::Flat(FlatIndex {
                vectors: vectors.to_vec(),
            })
        }
    }

    /// Insert one vector at the next position. Never switches tiers.
    pub fn insert(&mut self, position: usize, vector: &[f32]) {
        match self {
            AnnIndex::Flat(flat) => {
                debug_assert_eq!(position, flat.vectors.len());
                flat.vectors.push(vector.to_vec());
            }
            AnnIndex::Hnsw(hnsw) => hnsw.insert(position, vector),
        }
    }

    /// Top-k positions by similarity score (descending). Scores are clamped
    /// to `[0, 1]`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        match self {
            AnnIndex::Flat(flat) => flat.search(query, k),
            AnnIndex::Hnsw(hnsw) => hnsw.search(query, k),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AnnIndex::Flat(_) => "flat",
            AnnIndex::Hnsw(_) => "hnsw",
        }
    }
}

/// Exact inner-product index.
pub struct FlatIndex {
    vectors: Vec<Vec<f32>>,
}

impl FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, dot(query, vector).clamp(0.0, 1.0)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Hierarchical navigable small-world graph over normalized vectors.
pub struct HnswIndex {
    graph: Hnsw<'static, f32, DistDot>,
}

impl HnswIndex {
    fn with_capacity(capacity: usize) -> Self {
        let graph = Hnsw::new(
            HNSW_MAX_NB_CONNECTION,
            capacity.max(HNSW_THRESHOLD),
            HNSW_MAX_LAYER,
            HNSW_EF_CONSTRUCTION,
            DistDot {},
        );
        Self { graph }
    }

    fn insert(&mut self, position: usize, vector: &[f32]) {
        let owned = vector.to_vec();
        self.graph.insert((&owned, position));
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        self.graph
            .search(query, k, HNSW_EF_SEARCH)
            .into_iter()
            .map(|neighbour| {
                // DistDot yields 1 - x·y, so similarity is its complement
                let score = (1.0 - neighbour.distance).clamp(0.0, 1.0);
                (neighbour.d_id, score)
            })
            .collect()
    }
}

pub fn l2_normalize(vector: &mut [f32]) {
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

    fn unit(values: &[f32]) -> Vec<f32> {
        let mut v = values.to_vec();
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn flat_index_ranks_by_cosine() {
        let vectors = vec![
            unit(&[1.0, 0.0, 0.0]),
            unit(&[0.0, 1.0, 0.0]),
            unit(&[0.9, 0.1, 0.0]),
        ];
        let index = AnnIndex::build(&vectors);
        assert_eq!(index.kind(), "flat");

        let hits = index.search(&unit(&[1.0, 0.0, 0.0]), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 2);
        assert!(hits[0].1 > hits[1].1);
    }

    #[test]
    fn build_switches_to_hnsw_at_threshold() {
        let vectors: Vec<Vec<f32>> = (0..HNSW_THRESHOLD)
            .map(|i| unit(&[(i % 7) as f32 + 1.0, (i % 11) as f32, 1.0]))
            .collect();
        let index = AnnIndex::build(&vectors);
        assert_eq!(index.kind(), "hnsw");
    }

    #[test]
    fn insert_does_not_change_tier() {
        let vectors = vec![unit(&[1.0, 0.0]); 10];
        let mut index = AnnIndex::build(&vectors);
        for i in 10..(HNSW_THRESHOLD + 10) {
            index.insert(i, &unit(&[1.0, i as f32]));
        }
        assert_eq!(index.kind(), "flat");
    }

    #[test]
    fn hnsw_finds_the_nearest_vector() {
        let mut vectors: Vec<Vec<f32>> = (0..HNSW_THRESHOLD)
            .map(|i| unit(&[(i % 13) as f32 + 1.0, (i % 5) as f32 + 1.0, (i % 3) as f32]))
            .collect();
        // A distinctive target vector
        vectors.push(unit(&[0.0, 0.0, 1.0]));
        let target_position = vectors.len() - 1;

        let index = AnnIndex::build(&vectors);
        let hits = index.search(&unit(&[0.0, 0.0, 1.0]), 5);
        assert!(hits.iter().any(|(pos, _)| *pos == target_position));
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let vectors = vec![unit(&[1.0, 0.0]), unit(&[-1.0, 0.0])];
        let index = AnnIndex::build(&vectors);
        let hits = index.search(&unit(&[1.0, 0.0]), 2);
        for (_, score) in hits {
            assert!((0.0..=1.0).contains(&score));
        }
    }
}

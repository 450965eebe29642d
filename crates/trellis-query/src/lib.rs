//! Hybrid retrieval: lexical candidates from the structured store fused
//! with semantic candidates from the vector store.
//!
//! Fusion is weighted Reciprocal Rank Fusion; each input list contributes
//! `weight / (60 + rank + 1)` per candidate and contributions accumulate
//! across lists. An optional cross-encoder rescores the head of the fused
//! list. Results are cached under the `query` namespace keyed by
//! `(query, k, filters)`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use trellis_cache::{CacheManager, Namespace};
use trellis_config::RetrieverConfig;
use trellis_core::{EngineResult, NoteId, Reranker, SearchResult};
use trellis_sqlite::StructuredStore;
use trellis_vector::{SearchFilters, VectorStore};

/// RRF rank constant.
const RRF_K: f32 = 60.0;
/// How much of a note body seeds a similarity query.
const SIMILAR_BODY_PREFIX: usize = 500;

pub struct Retriever {
    store: StructuredStore,
    vectors: Arc<VectorStore>,
    cache: Option<Arc<CacheManager>>,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrieverConfig,
}

#[derive(Clone)]
struct Candidate {
    result: SearchResult,
    /// Chunk text when the candidate came from the vector store, else the
    /// lexical snippet; this is what the reranker scores.
    text: String,
}

impl Retriever {
    pub fn new(
        store: StructuredStore,
        vectors: Arc<VectorStore>,
        cache: Option<Arc<CacheManager>>,
        reranker: Option<Arc<dyn Reranker>>,
        config: RetrieverConfig,
    ) -> Self {
        if config.rerank_enabled && reranker.is_none() {
            warn!("reranking enabled but no reranker available, continuing without");
        }
        Self {
            store,
            vectors,
            cache,
            reranker,
            config,
        }
    }

    fn rerank_active(&self) -> bool {
        self.config.rerank_enabled && self.reranker.is_some()
    }

    /// Hybrid search returning at most `k` fused results.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> EngineResult<Vec<SearchResult>> {
        let cache_key = cache_key(query, k, filters);
        if let Some(cache) = &self.cache {
            if let Some(results) = cache
                .get::<Vec<SearchResult>>(Namespace::Query, &cache_key)
                .await
            {
                debug!(query, "query cache hit");
                return Ok(results);
            }
        }

        let k_candidate = if self.rerank_active() {
            (2 * k).max(self.config.rerank_top_n)
        } else {
            2 * k
        };

        let lexical = self.store.keyword_search(query, k_candidate).await?;
        let semantic = self.vectors.search_text(query, k_candidate, filters).await?;

        let mut fused = self.rrf_fusion(&semantic, &lexical);
        fused.retain(|c| c.result.score >= self.config.min_score);

        if self.rerank_active() && !fused.is_empty() {
            fused = self.rerank(query, fused).await;
        }

        let results: Vec<SearchResult> = fused
            .into_iter()
            .take(k)
            .map(|c| {
                let mut result = c.result;
                result.highlights = vec![query.to_string()];
                result
            })
            .collect();

        if let Some(cache) = &self.cache {
            let _ = cache
                .set(Namespace::Query, &cache_key, &results, None)
                .await;
        }
        Ok(results)
    }

    /// Notes similar to an existing note: its title plus the head of its
    /// body form the query; the note itself is excluded from the results.
    pub async fn find_similar(
        &self,
        note_id: &NoteId,
        k: usize,
    ) -> EngineResult<Vec<SearchResult>> {
        let note = self
            .store
            .get_note(note_id)
            .await
            .map_err(trellis_core::EngineError::from)?
            .ok_or_else(|| trellis_core::EngineError::caller(format!("unknown note {note_id}")))?;

        let prefix: String = note.body.chars().take(SIMILAR_BODY_PREFIX).collect();
        let query = format!("{} {}", note.title, prefix);

        let mut results = self.search(&query, k + 1, &SearchFilters::default()).await?;
        results.retain(|r| &r.note_id != note_id);
        results.truncate(k);
        Ok(results)
    }

    /// Assemble retrieval context for an LLM prompt: full note bodies in
    /// rank order with a header block per note, bounded by a rough
    /// characters-per-token estimate.
    pub async fn context_for_query(
        &self,
        query: &str,
        max_tokens: usize,
    ) -> EngineResult<String> {
        let results = self
            .search(query, self.config.k_default, &SearchFilters::default())
            .await?;

        let char_limit = max_tokens * 4;
        let mut context = String::new();

        for result in results {
            let Some(note) = self
                .store
                .get_note(&result.note_id)
                .await
                .map_err(trellis_core::EngineError::from)?
            else {
                continue;
            };

            let mut entry = format!("## {}\nPath: {}\n", note.title, note.rel_path);
            if !note.tags.is_empty() {
                let tags: Vec<&str> = note.tags.iter().map(|t| t.as_str()).collect();
                entry.push_str(&format!("Tags: {}\n", tags.join(", ")));
            }
            entry.push_str(&format!("\n{}\n\n---\n\n", note.body));

            if context.len() + entry.len() > char_limit {
                let remaining = char_limit.saturating_sub(context.len());
                if remaining > 200 {
                    let mut cut = remaining.min(entry.len());
                    while cut > 0 && !entry.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    context.push_str(&entry[..cut]);
                    context.push_str("...\n\n---\n\n");
                }
                break;
            }
            context.push_str(&entry);
        }

        Ok(context)
    }

    /// Weighted RRF over the two ranked lists, deduplicating by note.
    ///
    /// Candidates are ordered by their raw fused mass; the displayed score
    /// is that mass normalized onto `[0, 1]`. Semantic hits with no
    /// similarity signal at all are not candidates.
    fn rrf_fusion(
        &self,
        semantic: &[trellis_vector::VectorHit],
        lexical: &[SearchResult],
    ) -> Vec<Candidate> {
        let mut mass: HashMap<String, f32> = HashMap::new();
        let mut candidates: HashMap<String, Candidate> = HashMap::new();

        for (rank, hit) in semantic.iter().filter(|h| h.score > 0.0).enumerate() {
            let key = hit.note_id.to_string();
            *mass.entry(key.clone()).or_default() +=
                self.config.semantic_weight / (RRF_K + rank as f32 + 1.0);
            candidates.entry(key).or_insert_with(|| Candidate {
                result: SearchResult {
                    note_id: hit.note_id.clone(),
                    rel_path: hit.rel_path.clone(),
                    title: hit.title.clone(),
                    score: 0.0,
                    snippet: hit.content_snippet.clone(),
                    highlights: Vec::new(),
                },
                text: hit.content.clone(),
            });
        }

        for (rank, result) in lexical.iter().enumerate() {
            let key = result.note_id.to_string();
            *mass.entry(key.clone()).or_default() +=
                self.config.lexical_weight / (RRF_K + rank as f32 + 1.0);
            candidates.entry(key).or_insert_with(|| Candidate {
                result: result.clone(),
                text: result.snippet.clone(),
            });
        }

        let mut fused: Vec<(f32, Candidate)> = candidates
            .into_iter()
            .map(|(key, mut candidate)| {
                let raw = mass[&key];
                candidate.result.score = (raw * 100.0).min(1.0);
                (raw, candidate)
            })
            .collect();

        fused.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.result.rel_path.cmp(&b.1.result.rel_path))
        });
        fused.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Replace fused scores on the head of the list with cross-encoder
    /// output and re-sort.
    async fn rerank(&self, query: &str, fused: Vec<Candidate>) -> Vec<Candidate> {
        let reranker = self.reranker.as_ref().expect("checked by rerank_active");
        let top_n = self.config.rerank_top_n.min(fused.len());
        let (head, tail) = fused.split_at(top_n);

        let documents: Vec<String> = head.iter().map(|c| c.text.clone()).collect();
        match reranker.rerank(query, &documents).await {
            Ok(scores) => {
                let mut reranked: Vec<Candidate> = head
                    .iter()
                    .zip(scores)
                    .map(|(candidate, score)| {
                        let mut candidate = candidate.clone();
                        candidate.result.score = score;
                        candidate
                    })
                    .collect();
                reranked.sort_by(|a, b| {
                    b.result
                        .score
                        .partial_cmp(&a.result.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                reranked.extend(tail.iter().cloned());
                reranked
            }
            Err(err) => {
                warn!("reranking failed, keeping fused order: {err}");
                fused
            }
        }
    }
}

fn cache_key(query: &str, k: usize, filters: &SearchFilters) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}",
        query,
        k,
        filters.note_id.as_ref().map(|n| n.as_str()).unwrap_or(""),
        filters.rel_path.as_deref().unwrap_or(""),
        filters.tag.as_deref().unwrap_or(""),
        filters.section_title.as_deref().unwrap_or(""),
    )
}

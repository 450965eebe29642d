//! Persistent vector store for note chunks.
//!
//! The durable state is the document list: `(chunk_id, vector, metadata,
//! content)` tuples persisted as a version-prefixed bincode file with a
//! companion manifest mapping chunk ids to index positions. The in-memory
//! ANN index is derived from that list and rebuilt on load and after
//! deletions, so rebuilding from the stored tuples always reproduces search
//! quality. Every mutation is journaled through the audit sink injected at
//! construction.

pub mod index;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use trellis_core::{
    AuditAction, AuditEntry, AuditSink, Chunk, ChunkMetadata, EmbeddingProvider, EngineError,
    EngineResult, NoteId, OperationId,
};

use index::{l2_normalize, AnnIndex};

const DOCUMENTS_FILE: &str = "documents.bin";
const MANIFEST_FILE: &str = "manifest.json";
const FORMAT_VERSION: u8 = 1;
const SNIPPET_LEN: usize = 200;
/// Over-fetch factor applied when post-filtering on metadata.
const FILTER_OVERFETCH: usize = 3;

/// One stored chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Manifest persisted next to the document list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u8,
    index_kind: String,
    count: usize,
    positions: HashMap<String, usize>,
}

/// Equality predicates applied to hit metadata after the ANN search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub note_id: Option<NoteId>,
    pub rel_path: Option<String>,
    /// Matches when the chunk's tag list contains this tag.
    pub tag: Option<String>,
    pub section_title: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.note_id.is_none()
            && self.rel_path.is_none()
            && self.tag.is_none()
            && self.section_title.is_none()
    }

    fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(note_id) = &self.note_id {
            if &metadata.note_id != note_id {
                return false;
            }
        }
        if let Some(rel_path) = &self.rel_path {
            if &metadata.rel_path != rel_path {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !metadata.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(section) = &self.section_title {
            if metadata.section_title.as_deref() != Some(section.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One vector search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub note_id: NoteId,
    pub rel_path: String,
    pub title: String,
    /// Full chunk text, for reranking and context assembly.
    pub content: String,
    /// At most 200 chars of the chunk.
    pub content_snippet: String,
    pub score: f32,
    pub distance: f32,
}

struct State {
    documents: Vec<StoredChunk>,
    positions: HashMap<String, usize>,
    index: AnnIndex,
}

/// Durable chunk vector store with ANN search.
pub struct VectorStore {
    dir: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    audit: Arc<dyn AuditSink>,
    state: RwLock<State>,
}

impl VectorStore {
    /// Open the store, loading any persisted documents and building the
    /// search index over them.
    pub fn open(
        dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> EngineResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            EngineError::Config(format!("cannot create vector dir {}: {e}", dir.display()))
        })?;

        let documents = load_documents(&dir.join(DOCUMENTS_FILE))?;
        let vectors: Vec<Vec<f32>> = documents.iter().map(|d| d.vector.clone()).collect();
        let index = AnnIndex::build(&vectors);
        let positions = positions_of(&documents);
        info!(
            count = documents.len(),
            kind = index.kind(),
            "opened vector store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            embedder,
            audit,
            state: RwLock::new(State {
                documents,
                positions,
                index,
            }),
        })
    }

    pub fn count(&self) -> usize {
        self.state.read().documents.len()
    }

    pub fn index_kind(&self) -> &'static str {
        self.state.read().index.kind()
    }

    /// Embed and insert chunks. Chunks whose ids already exist are replaced
    /// (triggering an index rebuild); new chunks append without changing the
    /// index tier. Journaled as one audit entry carrying the chunk ids.
    pub async fn add_chunks(&self, chunks: &[Chunk]) -> EngineResult<OperationId> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let mut vectors = self.embedder.embed_batch(&texts).await?;
        for vector in &mut vectors {
            l2_normalize(vector);
        }

        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        {
            let mut state = self.state.write();
            let mut needs_rebuild = false;

            for (chunk, vector) in chunks.iter().zip(vectors) {
                let stored = StoredChunk {
                    chunk_id: chunk.id.clone(),
                    content: chunk.content.clone(),
                    vector,
                    metadata: chunk.metadata.clone(),
                };
                match state.positions.get(&chunk.id).copied() {
                    Some(position) => {
                        state.documents[position] = stored;
                        needs_rebuild = true;
                    }
                    None => {
                        let position = state.documents.len();
                        state.positions.insert(chunk.id.clone(), position);
                        let vector = stored.vector.clone();
                        state.documents.push(stored);
                        if !needs_rebuild {
                            state.index.insert(position, &vector);
                        }
                    }
                }
            }

            if needs_rebuild {
                rebuild_index(&mut state);
            }
            persist(&self.dir, &state)?;
        }

        let entry = AuditEntry::new(AuditAction::AddChunks, chunk_note_target(chunks))
            .with_metadata(serde_json::json!({ "chunk_ids": chunk_ids }));
        let op_id = self.audit.log(entry).await?;
        debug!(count = chunks.len(), "added chunks to vector store");
        Ok(op_id)
    }

    /// Search with a text query (embedded through the configured provider).
    pub async fn search_text(
        &self,
        query: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> EngineResult<Vec<VectorHit>> {
        let mut vector = self.embedder.embed_query(query).await?;
        l2_normalize(&mut vector);
        Ok(self.search_vector(&vector, k, filters))
    }

    /// Search with an already-computed query vector.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        filters: &SearchFilters,
    ) -> Vec<VectorHit> {
        let state = self.state.read();
        // Over-fetch when post-filtering so rank quality survives the filter
        let fetch_k = if filters.is_empty() {
            k
        } else {
            k * FILTER_OVERFETCH
        };

        state
            .index
            .search(query, fetch_k)
            .into_iter()
            .filter_map(|(position, score)| {
                let doc = state.documents.get(position)?;
                filters.matches(&doc.metadata).then(|| to_hit(doc, score))
            })
            .take(k)
            .collect()
    }

    /// Remove all chunks of one note by rebuilding from the survivors.
    /// Journaled when anything was removed; a no-op produces no entry.
    pub async fn delete_by_note(
        &self,
        note_id: &NoteId,
    ) -> EngineResult<(Option<OperationId>, usize)> {
        let removed_ids: Vec<String>;
        {
            let mut state = self.state.write();
            removed_ids = state
                .documents
                .iter()
                .filter(|d| &d.metadata.note_id == note_id)
                .map(|d| d.chunk_id.clone())
                .collect();
            if removed_ids.is_empty() {
                return Ok((None, 0));
            }

            state.documents.retain(|d| &d.metadata.note_id != note_id);
            rebuild_index(&mut state);
            persist(&self.dir, &state)?;
            debug!(
                note_id = %note_id,
                removed = removed_ids.len(),
                "deleted chunks for note"
            );
        }

        let removed = removed_ids.len();
        let entry = AuditEntry::new(AuditAction::DeleteChunks, Some(note_id.to_string()))
            .with_metadata(serde_json::json!({
                "removed": removed,
                "chunk_ids": removed_ids,
            }));
        let op_id = self.audit.log(entry).await?;
        Ok((Some(op_id), removed))
    }

    /// Remove specific chunks by id (used by rollback of `add_chunks`).
    pub async fn delete_chunk_ids(&self, chunk_ids: &[String]) -> EngineResult<usize> {
        let mut state = self.state.write();
        let before = state.documents.len();
        let to_remove: std::collections::HashSet<&str> =
            chunk_ids.iter().map(|s| s.as_str()).collect();
        state
            .documents
            .retain(|d| !to_remove.contains(d.chunk_id.as_str()));
        let removed = before - state.documents.len();
        if removed > 0 {
            rebuild_index(&mut state);
            persist(&self.dir, &state)?;
        }
        Ok(removed)
    }

    /// Rebuild the index from the stored documents. Idempotent; this is
    /// also where the flat/HNSW tier switch happens.
    pub fn rebuild(&self) -> EngineResult<()> {
        let mut state = self.state.write();
        rebuild_index(&mut state);
        persist(&self.dir, &state)?;
        Ok(())
    }

    /// All chunks belonging to one note, in chunk order.
    pub fn chunks_for_note(&self, note_id: &NoteId) -> Vec<StoredChunk> {
        let state = self.state.read();
        let mut chunks: Vec<StoredChunk> = state
            .documents
            .iter()
            .filter(|d| &d.metadata.note_id == note_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| {
            c.chunk_id
                .rsplit('_')
                .next()
                .and_then(|suffix| suffix.parse::<usize>().ok())
                .unwrap_or(0)
        });
        chunks
    }
}

fn to_hit(doc: &StoredChunk, score: f32) -> VectorHit {
    VectorHit {
        chunk_id: doc.chunk_id.clone(),
        note_id: doc.metadata.note_id.clone(),
        rel_path: doc.metadata.rel_path.clone(),
        title: doc.metadata.title.clone(),
        content: doc.content.clone(),
        content_snippet: snippet(&doc.content),
        score,
        distance: 1.0 - score,
    }
}

fn snippet(content: &str) -> String {
    if content.len() <= SNIPPET_LEN {
        return content.to_string();
    }
    let mut end = SNIPPET_LEN;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &content[..end])
}

fn chunk_note_target(chunks: &[Chunk]) -> Option<String> {
    chunks.first().map(|c| c.note_id.to_string())
}

fn positions_of(documents: &[StoredChunk]) -> HashMap<String, usize> {
    documents
        .iter()
        .enumerate()
        .map(|(position, doc)| (doc.chunk_id.clone(), position))
        .collect()
}

fn rebuild_index(state: &mut State) {
    let vectors: Vec<Vec<f32>> = state.documents.iter().map(|d| d.vector.clone()).collect();
    state.index = AnnIndex::build(&vectors);
    state.positions = positions_of(&state.documents);
}

fn load_documents(path: &Path) -> EngineResult<Vec<StoredChunk>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::integrity(format!("cannot read document list: {e}")))?;
    match bytes.split_first() {
        Some((&FORMAT_VERSION, payload)) => {
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map(|(documents, _)| documents)
                .map_err(|e| EngineError::integrity(format!("corrupt document list: {e}")))
        }
        Some((version, _)) => Err(EngineError::integrity(format!(
            "unsupported vector store format version {version}"
        ))),
        None => Ok(Vec::new()),
    }
}

fn persist(dir: &Path, state: &State) -> EngineResult<()> {
    let mut bytes = vec![FORMAT_VERSION];
    let payload = bincode::serde::encode_to_vec(&state.documents, bincode::config::standard())
        .map_err(|e| EngineError::integrity(format!("cannot encode document list: {e}")))?;
    bytes.extend(payload);
    std::fs::write(dir.join(DOCUMENTS_FILE), bytes)
        .map_err(|e| EngineError::transient(format!("cannot persist document list: {e}")))?;

    let manifest = Manifest {
        version: FORMAT_VERSION,
        index_kind: state.index.kind().to_string(),
        count: state.documents.len(),
        positions: state.positions.clone(),
    };
    let json = serde_json::to_string(&manifest)
        .map_err(|e| EngineError::integrity(format!("cannot encode manifest: {e}")))?;
    std::fs::write(dir.join(MANIFEST_FILE), json)
        .map_err(|e| EngineError::transient(format!("cannot persist manifest: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use trellis_core::test_support::MemoryAuditSink;
    use trellis_core::{note_id, Chunk};
    use trellis_embed::HashEmbedder;

    fn make_chunk(rel_path: &str, index: usize, content: &str, tags: &[&str]) -> Chunk {
        let nid = note_id(rel_path);
        Chunk {
            id: Chunk::chunk_id(&nid, index),
            note_id: nid.clone(),
            content: content.to_string(),
            index,
            metadata: ChunkMetadata {
                note_id: nid,
                title: rel_path.trim_end_matches(".md").to_string(),
                rel_path: rel_path.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                section_title: None,
                header_level: 0,
            },
        }
    }

    fn open_store(dir: &TempDir) -> (VectorStore, Arc<MemoryAuditSink>) {
        let audit = Arc::new(MemoryAuditSink::new());
        let store = VectorStore::open(
            &dir.path().join("vector"),
            Arc::new(HashEmbedder::new(64)),
            audit.clone(),
        )
        .unwrap();
        (store, audit)
    }

    #[tokio::test]
    async fn add_and_search_round_trips() {
        let dir = TempDir::new().unwrap();
        let (store, audit) = open_store(&dir);

        store
            .add_chunks(&[
                make_chunk("python.md", 0, "python is a programming language", &[]),
                make_chunk("cooking.md", 0, "italian cuisine and recipes", &[]),
            ])
            .await
            .unwrap();

        let hits = store
            .search_text("python programming", 1, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rel_path, "python.md");
        assert!(hits[0].score > 0.0);
        assert!((hits[0].distance - (1.0 - hits[0].score)).abs() < 1e-6);

        // One audit entry for the batch
        assert_eq!(audit.len(), 1);
        assert_eq!(audit.entries()[0].action, AuditAction::AddChunks);
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (store, _) = open_store(&dir);
            store
                .add_chunks(&[make_chunk("a.md", 0, "durable content about rust", &[])])
                .await
                .unwrap();
        }

        let (store, _) = open_store(&dir);
        assert_eq!(store.count(), 1);
        let hits = store
            .search_text("rust", 1, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].rel_path, "a.md");
    }

    #[tokio::test]
    async fn delete_by_note_removes_and_journals() {
        let dir = TempDir::new().unwrap();
        let (store, audit) = open_store(&dir);

        store
            .add_chunks(&[
                make_chunk("keep.md", 0, "kept text", &[]),
                make_chunk("drop.md", 0, "dropped text one", &[]),
                make_chunk("drop.md", 1, "dropped text two", &[]),
            ])
            .await
            .unwrap();

        let (_, removed) = store.delete_by_note(&note_id("drop.md")).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count(), 1);

        let hits = store
            .search_text("dropped", 5, &SearchFilters::default())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.rel_path != "drop.md"));

        let entries = audit.entries();
        assert_eq!(entries.last().unwrap().action, AuditAction::DeleteChunks);
    }

    #[tokio::test]
    async fn filters_restrict_hits() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);

        store
            .add_chunks(&[
                make_chunk("a.md", 0, "shared words appear here", &["alpha"]),
                make_chunk("b.md", 0, "shared words appear here too", &["beta"]),
            ])
            .await
            .unwrap();

        let filters = SearchFilters {
            tag: Some("beta".to_string()),
            ..Default::default()
        };
        let hits = store.search_text("shared words", 5, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rel_path, "b.md");

        let filters = SearchFilters {
            note_id: Some(note_id("a.md")),
            ..Default::default()
        };
        let hits = store.search_text("shared words", 5, &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rel_path, "a.md");
    }

    #[tokio::test]
    async fn replacing_a_chunk_updates_content() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);

        store
            .add_chunks(&[make_chunk("a.md", 0, "original wording", &[])])
            .await
            .unwrap();
        store
            .add_chunks(&[make_chunk("a.md", 0, "replacement wording", &[])])
            .await
            .unwrap();

        assert_eq!(store.count(), 1);
        let hits = store
            .search_text("replacement", 1, &SearchFilters::default())
            .await
            .unwrap();
        assert!(hits[0].content.contains("replacement"));
    }

    #[tokio::test]
    async fn snippet_is_bounded() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);

        let long = "repeated words ".repeat(50);
        store
            .add_chunks(&[make_chunk("long.md", 0, &long, &[])])
            .await
            .unwrap();

        let hits = store
            .search_text("repeated", 1, &SearchFilters::default())
            .await
            .unwrap();
        assert!(hits[0].content_snippet.len() <= SNIPPET_LEN + 3);
        assert!(hits[0].content.len() > SNIPPET_LEN);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open_store(&dir);
        store
            .add_chunks(&[make_chunk("a.md", 0, "some content", &[])])
            .await
            .unwrap();

        let before = store
            .search_text("content", 1, &SearchFilters::default())
            .await
            .unwrap();
        store.rebuild().unwrap();
        store.rebuild().unwrap();
        let after = store
            .search_text("content", 1, &SearchFilters::default())
            .await
            .unwrap();
        assert_eq!(before, after);
    }
}

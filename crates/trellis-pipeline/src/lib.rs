//! Reconciliation between the vault on disk and the persistent indexes.
//!
//! One note's reconciliation is the unit of atomicity: parse, upsert into
//! the structured store, replace its vector chunks, all under one audit
//! scope. The content hash short-circuits unchanged files, which is what
//! makes a second full scan report all-skipped. Per-file errors are
//! counted and never abort a pass.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use trellis_core::{
    AuditAction, AuditEntry, AuditSink, CancelFlag, EngineError, EngineResult, NoteId,
};
use trellis_parser::{Chunker, NoteParser};
use trellis_sqlite::StructuredStore;
use trellis_vector::VectorStore;
use trellis_watch::{is_watchable, VaultEvent};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// What happened to a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Added,
    Updated,
    Skipped,
    Deleted,
    Missing,
}

pub struct Indexer {
    parser: NoteParser,
    chunker: Chunker,
    store: StructuredStore,
    vectors: Arc<VectorStore>,
    audit: Arc<dyn AuditSink>,
    cancel: CancelFlag,
}

impl Indexer {
    pub fn new(
        parser: NoteParser,
        chunker: Chunker,
        store: StructuredStore,
        vectors: Arc<VectorStore>,
        audit: Arc<dyn AuditSink>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            parser,
            chunker,
            store,
            vectors,
            audit,
            cancel,
        }
    }

    /// Full scan: reconcile every note file under the vault root, then
    /// sweep out notes whose files disappeared. Idempotent.
    pub async fn reindex_all(&self) -> EngineResult<ReindexReport> {
        let mut report = ReindexReport::default();
        let files = self.discover_files();
        info!(files = files.len(), "starting full reindex");

        let mut observed: BTreeSet<String> = BTreeSet::new();
        for rel_path in files {
            self.cancel.check()?;
            observed.insert(rel_path.clone());

            match self.reindex_rel_path(&rel_path).await {
                Ok(IndexOutcome::Added) => report.added += 1,
                Ok(IndexOutcome::Updated) => report.updated += 1,
                Ok(IndexOutcome::Skipped) => report.skipped += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(rel_path, "failed to index file: {err}");
                    report.errors += 1;
                }
            }
        }

        // Deletion sweep: stored paths no longer on disk
        for rel_path in self.store.all_note_paths().await.map_err(EngineError::from)? {
            self.cancel.check()?;
            if observed.contains(&rel_path) {
                continue;
            }
            match self.delete_rel_path(&rel_path).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(rel_path, "failed to delete stale note: {err}");
                    report.errors += 1;
                }
            }
        }

        self.audit
            .log(
                AuditEntry::new(AuditAction::ReindexAll, None)
                    .with_metadata(serde_json::json!({
                        "added": report.added,
                        "updated": report.updated,
                        "deleted": report.deleted,
                        "skipped": report.skipped,
                        "errors": report.errors,
                    }))
                    .irreversible(),
            )
            .await?;

        info!(?report, "full reindex complete");
        Ok(report)
    }

    /// Apply one debounced watcher event.
    pub async fn apply_event(&self, event: &VaultEvent) -> EngineResult<IndexOutcome> {
        match event {
            VaultEvent::Created(path) | VaultEvent::Modified(path) => {
                let rel_path = self.parser.rel_path(path)?;
                self.reindex_rel_path(&rel_path).await
            }
            VaultEvent::Deleted(path) => {
                let rel_path = self.parser.rel_path(path)?;
                if self.delete_rel_path(&rel_path).await? {
                    Ok(IndexOutcome::Deleted)
                } else {
                    Ok(IndexOutcome::Missing)
                }
            }
        }
    }

    /// Reconcile one file by vault-relative path.
    pub async fn reindex_rel_path(&self, rel_path: &str) -> EngineResult<IndexOutcome> {
        let abs_path = self.parser.vault_root().join(rel_path);
        if !abs_path.exists() {
            return Ok(IndexOutcome::Missing);
        }

        let parsed = self.parser.parse_file(&abs_path).await?;
        let note = parsed.note;

        let previous = self
            .store
            .get_note_by_path(rel_path)
            .await
            .map_err(EngineError::from)?;
        if let Some(previous) = &previous {
            if previous.content_hash == note.content_hash {
                debug!(rel_path, "content hash unchanged, skipping");
                return Ok(IndexOutcome::Skipped);
            }
        }

        let old_hash = previous.as_ref().map(|n| n.content_hash.clone());
        let is_new = previous.is_none();

        // The scope entry is journaled before any mutation is applied
        self.audit
            .log(
                AuditEntry::new(AuditAction::ReindexNote, Some(rel_path.to_string()))
                    .with_metadata(serde_json::json!({
                        "old_hash": old_hash,
                        "new_hash": note.content_hash,
                    }))
                    .irreversible(),
            )
            .await?;

        // upsert_note, journaled with row snapshots for rollback
        let snapshot_before = previous
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| EngineError::integrity(format!("cannot snapshot note: {e}")))?;
        let snapshot_after = serde_json::to_string(&note)
            .map_err(|e| EngineError::integrity(format!("cannot snapshot note: {e}")))?;
        self.audit
            .log(
                AuditEntry::new(AuditAction::UpsertNote, Some(rel_path.to_string()))
                    .with_snapshots(snapshot_before, Some(snapshot_after)),
            )
            .await?;
        self.store
            .upsert_note(&note)
            .await
            .map_err(EngineError::from)?;
        self.store
            .replace_links(&note.id, &parsed.links)
            .await
            .map_err(EngineError::from)?;

        // Replace the note's chunks wholesale
        self.vectors.delete_by_note(&note.id).await?;
        let chunks = self.chunker.chunk_note(&note);
        if !chunks.is_empty() {
            self.vectors.add_chunks(&chunks).await?;
        }

        debug!(rel_path, chunks = chunks.len(), new = is_new, "reindexed note");
        Ok(if is_new {
            IndexOutcome::Added
        } else {
            IndexOutcome::Updated
        })
    }

    /// Delete a note and its chunks by vault-relative path.
    pub async fn delete_rel_path(&self, rel_path: &str) -> EngineResult<bool> {
        let Some(note) = self
            .store
            .get_note_by_path(rel_path)
            .await
            .map_err(EngineError::from)?
        else {
            return Ok(false);
        };

        let snapshot = serde_json::to_string(&note)
            .map_err(|e| EngineError::integrity(format!("cannot snapshot note: {e}")))?;
        self.audit
            .log(
                AuditEntry::new(AuditAction::DeleteNote, Some(rel_path.to_string()))
                    .with_snapshots(Some(snapshot), None),
            )
            .await?;

        self.store
            .delete_note(&note.id)
            .await
            .map_err(EngineError::from)?;
        self.vectors.delete_by_note(&note.id).await?;
        info!(rel_path, "deleted note");
        Ok(true)
    }

    /// Delete by id, for callers that no longer have the path.
    pub async fn delete_note_id(&self, id: &NoteId) -> EngineResult<bool> {
        let Some(note) = self.store.get_note(id).await.map_err(EngineError::from)? else {
            return Ok(false);
        };
        self.delete_rel_path(&note.rel_path.clone()).await
    }

    /// Note files under the vault root, relative, sorted.
    fn discover_files(&self) -> Vec<String> {
        let root = self.parser.vault_root();
        let mut files: Vec<String> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| is_watchable(entry.path(), None))
            .filter_map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            })
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use trellis_core::test_support::{create_vault, MemoryAuditSink};
    use trellis_core::{content_hash, note_id, EmbeddingProvider};
    use trellis_embed::HashEmbedder;
    use trellis_vector::SearchFilters;

    struct Fixture {
        vault: TempDir,
        _data: TempDir,
        indexer: Indexer,
        store: StructuredStore,
        vectors: Arc<VectorStore>,
        audit: Arc<MemoryAuditSink>,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let vault = create_vault(files).unwrap();
        let data = TempDir::new().unwrap();
        let store = StructuredStore::open_in_memory().unwrap();
        let audit = Arc::new(MemoryAuditSink::new());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(64));
        let vectors = Arc::new(
            VectorStore::open(&data.path().join("vector"), embedder, audit.clone()).unwrap(),
        );

        let indexer = Indexer::new(
            NoteParser::new(vault.path()),
            Chunker::default(),
            store.clone(),
            vectors.clone(),
            audit.clone(),
            CancelFlag::new(),
        );

        Fixture {
            vault,
            _data: data,
            indexer,
            store,
            vectors,
            audit,
        }
    }

    const VAULT: &[(&str, &str)] = &[
        ("A.md", "# Python\n\nPython is a programming language."),
        ("B.md", "# Cooking\n\nItalian cuisine recipes."),
        ("notes/C.md", "# Python Tips\n\nList comprehensions in Python."),
    ];

    #[tokio::test]
    async fn full_reindex_indexes_every_note() {
        let f = fixture(VAULT);
        let report = f.indexer.reindex_all().await.unwrap();

        assert_eq!(report.added, 3);
        assert_eq!(report.updated, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.errors, 0);

        let note = f.store.get_note_by_path("A.md").await.unwrap().unwrap();
        assert_eq!(
            note.content_hash,
            content_hash("# Python\n\nPython is a programming language.")
        );
        assert!(f.vectors.count() >= 3);
    }

    #[tokio::test]
    async fn second_reindex_is_all_skipped() {
        let f = fixture(VAULT);
        f.indexer.reindex_all().await.unwrap();
        let report = f.indexer.reindex_all().await.unwrap();

        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test]
    async fn modified_file_is_updated_and_chunks_replaced() {
        let f = fixture(VAULT);
        f.indexer.reindex_all().await.unwrap();

        std::fs::write(
            f.vault.path().join("A.md"),
            "# Python\n\nPython is a snake.",
        )
        .unwrap();
        let outcome = f.indexer.reindex_rel_path("A.md").await.unwrap();
        assert_eq!(outcome, IndexOutcome::Updated);

        // The old chunk content is gone from vector search
        let hits = f
            .vectors
            .search_text("programming language", 3, &SearchFilters::default())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.rel_path != "A.md"));

        let snake_hits = f
            .vectors
            .search_text("snake", 3, &SearchFilters::default())
            .await
            .unwrap();
        assert!(snake_hits.iter().any(|h| h.rel_path == "A.md"));

        // A reindex_note audit entry exists for the update
        let reindex_entries: Vec<_> = f
            .audit
            .entries()
            .into_iter()
            .filter(|e| e.action == AuditAction::ReindexNote)
            .filter(|e| e.target.as_deref() == Some("A.md"))
            .collect();
        assert!(!reindex_entries.is_empty());
    }

    #[tokio::test]
    async fn deleted_file_cascades() {
        let f = fixture(VAULT);
        f.indexer.reindex_all().await.unwrap();

        std::fs::remove_file(f.vault.path().join("B.md")).unwrap();
        let report = f.indexer.reindex_all().await.unwrap();
        assert_eq!(report.deleted, 1);

        assert!(f.store.get_note_by_path("B.md").await.unwrap().is_none());
        let hits = f
            .vectors
            .search_text("cuisine", 5, &SearchFilters::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(f.store.stats().await.unwrap().notes, 2);
    }

    #[tokio::test]
    async fn watcher_events_drive_incremental_updates() {
        let f = fixture(VAULT);
        f.indexer.reindex_all().await.unwrap();

        let new_path = f.vault.path().join("D.md");
        std::fs::write(&new_path, "# Fresh\n\nBrand new note.").unwrap();
        let outcome = f
            .indexer
            .apply_event(&VaultEvent::Created(new_path.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Added);

        std::fs::remove_file(&new_path).unwrap();
        let outcome = f
            .indexer
            .apply_event(&VaultEvent::Deleted(new_path))
            .await
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Deleted);
        assert!(f.store.get_note_by_path("D.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_note_entries_are_ignored() {
        let f = fixture(VAULT);

        std::fs::write(f.vault.path().join("image.png"), [0u8; 4]).unwrap();
        std::fs::create_dir(f.vault.path().join("node_modules")).unwrap();
        std::fs::write(f.vault.path().join("node_modules/pkg.md"), "# Not a note").unwrap();

        let report = f.indexer.reindex_all().await.unwrap();
        assert_eq!(report.added, 3);
        assert_eq!(report.errors, 0);
    }

    #[tokio::test]
    async fn cancellation_stops_between_files() {
        let f = fixture(VAULT);
        f.indexer.cancel.cancel();
        let err = f.indexer.reindex_all().await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn delete_by_note_id_works() {
        let f = fixture(VAULT);
        f.indexer.reindex_all().await.unwrap();

        assert!(f.indexer.delete_note_id(&note_id("A.md")).await.unwrap());
        assert!(!f.indexer.delete_note_id(&note_id("A.md")).await.unwrap());
    }

    #[tokio::test]
    async fn event_outside_vault_is_caller_error() {
        let f = fixture(VAULT);
        let err = f
            .indexer
            .apply_event(&VaultEvent::Created(PathBuf::from("/elsewhere/x.md")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Caller(_)));
    }
}

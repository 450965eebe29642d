//! Rollback handlers, one per journaled mutation kind.
//!
//! A handler restores the state captured in an entry's `snapshot_before`.
//! Note-level handlers also rebuild the note's chunks so the content-hash /
//! chunk correspondence holds after an undo.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use trellis_core::{AuditEntry, EngineError, EngineResult, Note, NoteId};
use trellis_parser::Chunker;
use trellis_sqlite::{RollbackHandler, StructuredStore};
use trellis_vector::VectorStore;

fn note_from_snapshot(entry: &AuditEntry) -> EngineResult<Option<Note>> {
    entry
        .snapshot_before
        .as_deref()
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|e| EngineError::integrity(format!("corrupt note snapshot: {e}")))
        })
        .transpose()
}

async fn restore_note(
    store: &StructuredStore,
    vectors: &VectorStore,
    chunker: &Chunker,
    note: &Note,
) -> EngineResult<()> {
    store.upsert_note(note).await.map_err(EngineError::from)?;
    vectors.delete_by_note(&note.id).await?;
    let chunks = chunker.chunk_note(note);
    if !chunks.is_empty() {
        vectors.add_chunks(&chunks).await?;
    }
    Ok(())
}

/// Undo an `upsert_note`: restore the previous row (and chunks), or delete
/// the note entirely when the upsert created it.
pub struct UpsertNoteUndo {
    pub store: StructuredStore,
    pub vectors: Arc<VectorStore>,
    pub chunker: Arc<Chunker>,
}

#[async_trait::async_trait]
impl RollbackHandler for UpsertNoteUndo {
    async fn rollback(&self, entry: &AuditEntry) -> EngineResult<()> {
        match note_from_snapshot(entry)? {
            Some(previous) => {
                restore_note(&self.store, &self.vectors, &self.chunker, &previous).await
            }
            None => {
                // The upsert created the note; undo by deleting it
                let after: Note = entry
                    .snapshot_after
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| EngineError::integrity(format!("corrupt note snapshot: {e}")))?
                    .ok_or_else(|| {
                        EngineError::integrity("upsert entry has no snapshots to undo from")
                    })?;
                self.store
                    .delete_note(&after.id)
                    .await
                    .map_err(EngineError::from)?;
                self.vectors.delete_by_note(&after.id).await?;
                info!(note_id = %after.id, "rolled back note creation");
                Ok(())
            }
        }
    }
}

/// Undo a `delete_note`: re-insert the row and rebuild its chunks.
pub struct DeleteNoteUndo {
    pub store: StructuredStore,
    pub vectors: Arc<VectorStore>,
    pub chunker: Arc<Chunker>,
}

#[async_trait::async_trait]
impl RollbackHandler for DeleteNoteUndo {
    async fn rollback(&self, entry: &AuditEntry) -> EngineResult<()> {
        let note = note_from_snapshot(entry)?.ok_or_else(|| {
            EngineError::integrity("delete_note entry is missing its snapshot")
        })?;
        restore_note(&self.store, &self.vectors, &self.chunker, &note).await?;
        info!(note_id = %note.id, "rolled back note deletion");
        Ok(())
    }
}

/// Undo an `add_chunks`: remove exactly the chunk ids the entry recorded.
pub struct AddChunksUndo {
    pub vectors: Arc<VectorStore>,
}

#[async_trait::async_trait]
impl RollbackHandler for AddChunksUndo {
    async fn rollback(&self, entry: &AuditEntry) -> EngineResult<()> {
        let chunk_ids: Vec<String> = entry
            .metadata
            .get("chunk_ids")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .ok_or_else(|| {
                EngineError::integrity("add_chunks entry is missing its chunk id list")
            })?;
        let removed = self.vectors.delete_chunk_ids(&chunk_ids).await?;
        info!(removed, "rolled back chunk insertion");
        Ok(())
    }
}

/// Undo a `delete_chunks`: re-chunk and re-embed the note from the
/// structured store, which is the source of truth for its body.
pub struct DeleteChunksUndo {
    pub store: StructuredStore,
    pub vectors: Arc<VectorStore>,
    pub chunker: Arc<Chunker>,
}

#[async_trait::async_trait]
impl RollbackHandler for DeleteChunksUndo {
    async fn rollback(&self, entry: &AuditEntry) -> EngineResult<()> {
        let target = entry.target.as_deref().ok_or_else(|| {
            EngineError::integrity("delete_chunks entry has no target note id")
        })?;
        let note = self
            .store
            .get_note(&NoteId::from_raw(target))
            .await
            .map_err(EngineError::from)?
            .ok_or_else(|| {
                EngineError::caller(format!(
                    "cannot rebuild chunks, note {target} no longer exists"
                ))
            })?;
        let chunks = self.chunker.chunk_note(&note);
        if !chunks.is_empty() {
            self.vectors.add_chunks(&chunks).await?;
        }
        info!(note_id = %note.id, "rolled back chunk deletion");
        Ok(())
    }
}

/// Undo a `rewrite_file`: restore the file byte-for-byte from the snapshot.
pub struct RewriteFileUndo {
    pub vault_root: PathBuf,
}

#[async_trait::async_trait]
impl RollbackHandler for RewriteFileUndo {
    async fn rollback(&self, entry: &AuditEntry) -> EngineResult<()> {
        let rel_path = entry.target.as_deref().ok_or_else(|| {
            EngineError::integrity("rewrite_file entry has no target path")
        })?;
        let snapshot = entry.snapshot_before.as_deref().ok_or_else(|| {
            EngineError::integrity("rewrite_file entry is missing its snapshot")
        })?;

        let abs = self.vault_root.join(rel_path);
        tokio::fs::write(&abs, snapshot)
            .await
            .map_err(|e| EngineError::permanent(rel_path, format!("restore failed: {e}")))?;
        info!(rel_path, "restored file from snapshot");
        Ok(())
    }
}

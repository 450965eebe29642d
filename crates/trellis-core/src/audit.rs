//! Audit journal types and the sink trait backends implement.
//!
//! Every state-changing operation in the engine produces exactly one
//! [`AuditEntry`], written before the mutation is acknowledged. Entries are
//! immutable once persisted except for the one-time `rolled_back` toggle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineResult;
use crate::types::OperationId;

/// The mutation kinds the engine journals. Rollback handlers are registered
/// per action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UpsertNote,
    DeleteNote,
    AddChunks,
    DeleteChunks,
    RewriteFile,
    ReindexNote,
    ReindexAll,
    Rollback,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UpsertNote => "upsert_note",
            AuditAction::DeleteNote => "delete_note",
            AuditAction::AddChunks => "add_chunks",
            AuditAction::DeleteChunks => "delete_chunks",
            AuditAction::RewriteFile => "rewrite_file",
            AuditAction::ReindexNote => "reindex_note",
            AuditAction::ReindexAll => "reindex_all",
            AuditAction::Rollback => "rollback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "upsert_note" => Some(AuditAction::UpsertNote),
            "delete_note" => Some(AuditAction::DeleteNote),
            "add_chunks" => Some(AuditAction::AddChunks),
            "delete_chunks" => Some(AuditAction::DeleteChunks),
            "rewrite_file" => Some(AuditAction::RewriteFile),
            "reindex_note" => Some(AuditAction::ReindexNote),
            "reindex_all" => Some(AuditAction::ReindexAll),
            "rollback" => Some(AuditAction::Rollback),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record of a state-changing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: OperationId,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_after: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub reversible: bool,
    pub user_approved: bool,
    #[serde(default)]
    pub rolled_back: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_at: Option<DateTime<Utc>>,
}

impl AuditEntry {
    /// Create a new entry with a fresh id and timestamp. Checksums are
    /// computed from the snapshots; a null snapshot implies no checksum.
    pub fn new(action: AuditAction, target: Option<String>) -> Self {
        Self {
            id: OperationId::new(),
            timestamp: Utc::now(),
            action,
            target,
            snapshot_before: None,
            snapshot_after: None,
            checksum_before: None,
            checksum_after: None,
            metadata: serde_json::Value::Null,
            reversible: true,
            user_approved: false,
            rolled_back: false,
            rollback_at: None,
        }
    }

    pub fn with_snapshots(
        mut self,
        before: Option<String>,
        after: Option<String>,
    ) -> Self {
        self.checksum_before = before.as_deref().map(snapshot_checksum);
        self.checksum_after = after.as_deref().map(snapshot_checksum);
        self.snapshot_before = before;
        self.snapshot_after = after;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.reversible = false;
        self
    }

    pub fn approved(mut self) -> Self {
        self.user_approved = true;
        self
    }
}

/// Full (untruncated) SHA-256 of a snapshot string, hex-encoded.
pub fn snapshot_checksum(snapshot: &str) -> String {
    hex::encode(Sha256::digest(snapshot.as_bytes()))
}

/// Destination for audit entries. The SQLite journal implements this; the
/// vector store and healer take it as a constructor dependency.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist the entry (fsynced) and return its id.
    async fn log(&self, entry: AuditEntry) -> EngineResult<OperationId>;
}

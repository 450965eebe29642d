//! Append-only audit journal with rollback support.
//!
//! Entries are immutable once written; the only permitted mutation is the
//! one-time `rolled_back` toggle. Checksums form a per-target hash chain: a
//! mismatch is accepted but flagged as `chain_break` in the entry metadata,
//! never silently reordered or dropped. Metadata is scrubbed for secrets
//! before persistence; snapshots are kept verbatim so rollback restores are
//! byte-exact.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};

use trellis_core::{redact, AuditAction, AuditEntry, AuditSink, EngineError, EngineResult, OperationId};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_logs (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    action TEXT NOT NULL,
    target TEXT,
    snapshot_before TEXT,
    snapshot_after TEXT,
    checksum_before TEXT,
    checksum_after TEXT,
    metadata TEXT,
    reversible INTEGER NOT NULL DEFAULT 1,
    user_approved INTEGER NOT NULL DEFAULT 0,
    rolled_back INTEGER NOT NULL DEFAULT 0,
    rollback_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_logs(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_logs(action);
CREATE INDEX IF NOT EXISTS idx_audit_target ON audit_logs(target);
"#;

/// Journal statistics for `stats()`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuditStats {
    pub total: u64,
    pub rolled_back: u64,
    pub by_action: BTreeMap<String, u64>,
}

/// Restores the state captured in an entry's `snapshot_before`.
///
/// One handler is registered per [`AuditAction`] at startup. A handler must
/// journal its own compensating entry (marked irreversible) before the
/// original entry is flagged as rolled back.
#[async_trait::async_trait]
pub trait RollbackHandler: Send + Sync {
    async fn rollback(&self, entry: &AuditEntry) -> EngineResult<()>;
}

/// Handler registry keyed by action.
#[derive(Default)]
pub struct RollbackRegistry {
    handlers: HashMap<AuditAction, Arc<dyn RollbackHandler>>,
}

impl RollbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: AuditAction, handler: Arc<dyn RollbackHandler>) {
        self.handlers.insert(action, handler);
    }

    pub fn get(&self, action: AuditAction) -> Option<&Arc<dyn RollbackHandler>> {
        self.handlers.get(&action)
    }
}

/// SQLite-backed append-only audit log.
#[derive(Clone)]
pub struct AuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // Entries must hit disk before the mutation is acknowledged
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened audit log");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append an entry and return its id. Metadata is redacted; the chain
    /// checksum for the entry's target is verified and breaks are flagged.
    pub async fn append(&self, mut entry: AuditEntry) -> Result<OperationId, StoreError> {
        redact::redact_value(&mut entry.metadata);

        let conn = self.conn.lock();
        if let (Some(target), Some(checksum_before)) =
            (entry.target.as_deref(), entry.checksum_before.as_deref())
        {
            // Chains are per target and per action: different actions
            // snapshot different representations of the same artifact
            let previous: Option<String> = conn
                .query_row(
                    "SELECT checksum_after FROM audit_logs
                     WHERE target = ?1 AND action = ?2 AND checksum_after IS NOT NULL
                     ORDER BY rowid DESC LIMIT 1",
                    params![target, entry.action.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(previous) = previous {
                if previous != checksum_before {
                    warn!(target, "audit chain break detected");
                    match entry.metadata.as_object_mut() {
                        Some(map) => {
                            map.insert("chain_break".to_string(), serde_json::Value::Bool(true));
                        }
                        None => entry.metadata = serde_json::json!({ "chain_break": true }),
                    }
                }
            }
        }

        conn.execute(
            r#"
            INSERT INTO audit_logs (id, timestamp, action, target,
                                    snapshot_before, snapshot_after,
                                    checksum_before, checksum_after,
                                    metadata, reversible, user_approved)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                entry.id.to_string(),
                entry.timestamp.to_rfc3339(),
                entry.action.as_str(),
                entry.target,
                entry.snapshot_before,
                entry.snapshot_after,
                entry.checksum_before,
                entry.checksum_after,
                serde_json::to_string(&entry.metadata)?,
                entry.reversible as i64,
                entry.user_approved as i64,
            ],
        )?;

        debug!(id = %entry.id, action = %entry.action, "logged audit entry");
        Ok(entry.id)
    }

    pub async fn get(&self, id: OperationId) -> Result<Option<AuditEntry>, StoreError> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT id, timestamp, action, target, snapshot_before, snapshot_after,
                        checksum_before, checksum_after, metadata,
                        reversible, user_approved, rolled_back, rollback_at
                 FROM audit_logs WHERE id = ?1",
                params![id.to_string()],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// History ordered by time descending with optional filters.
    pub async fn history(
        &self,
        action: Option<AuditAction>,
        target: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, action, target, snapshot_before, snapshot_after,
                    checksum_before, checksum_after, metadata,
                    reversible, user_approved, rolled_back, rollback_at
             FROM audit_logs WHERE 1=1",
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(action) = action {
            sql.push_str(" AND action = ?");
            params_vec.push(Box::new(action.as_str().to_string()));
        }
        if let Some(target) = target {
            sql.push_str(" AND target = ?");
            params_vec.push(Box::new(target.to_string()));
        }
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC LIMIT ?");
        params_vec.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(
                rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
                row_to_entry,
            )?
            .collect::<Result<_, _>>()?;
        Ok(entries)
    }

    pub async fn stats(&self) -> Result<AuditStats, StoreError> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM audit_logs", [], |r| r.get(0))?;
        let rolled_back: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_logs WHERE rolled_back = 1",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare("SELECT action, COUNT(*) FROM audit_logs GROUP BY action")?;
        let by_action = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<_, _>>()?;

        Ok(AuditStats {
            total: total as u64,
            rolled_back: rolled_back as u64,
            by_action,
        })
    }

    /// Undo the operation recorded under `id`.
    ///
    /// Dispatches to the handler registered for the entry's action; on
    /// success the original entry is marked rolled back. Returns the id of
    /// the compensating entry written by the handler flow.
    pub async fn rollback(
        &self,
        id: OperationId,
        registry: &RollbackRegistry,
    ) -> EngineResult<OperationId> {
        let entry = self
            .get(id)
            .await
            .map_err(EngineError::from)?
            .ok_or_else(|| EngineError::from(StoreError::NotFound(format!("audit entry {id}"))))?;

        if !entry.reversible {
            return Err(StoreError::NotReversible(id.to_string()).into());
        }
        if entry.rolled_back {
            return Err(StoreError::AlreadyRolledBack(id.to_string()).into());
        }

        let handler = registry
            .get(entry.action)
            .ok_or_else(|| StoreError::NoHandler(entry.action.to_string()))?;

        handler.rollback(&entry).await?;

        // Compensating record; irreversible to prevent recursive undo
        let compensating = AuditEntry::new(AuditAction::Rollback, entry.target.clone())
            .with_metadata(serde_json::json!({
                "original_id": id.to_string(),
                "original_action": entry.action.as_str(),
            }))
            .irreversible();
        let compensating_id = self
            .append(compensating)
            .await
            .map_err(EngineError::from)?;

        self.mark_rolled_back(id).await.map_err(EngineError::from)?;
        info!(original = %id, compensating = %compensating_id, "rolled back operation");
        Ok(compensating_id)
    }

    async fn mark_rolled_back(&self, id: OperationId) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE audit_logs SET rolled_back = 1, rollback_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl AuditSink for AuditLog {
    async fn log(&self, entry: AuditEntry) -> EngineResult<OperationId> {
        self.append(entry).await.map_err(EngineError::from)
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let id: String = row.get(0)?;
    let timestamp: String = row.get(1)?;
    let action: String = row.get(2)?;
    let metadata: Option<String> = row.get(8)?;
    let rollback_at: Option<String> = row.get(12)?;

    Ok(AuditEntry {
        id: OperationId(
            uuid::Uuid::parse_str(&id).unwrap_or_else(|_| uuid::Uuid::nil()),
        ),
        timestamp: parse_timestamp(&timestamp),
        action: AuditAction::parse(&action).unwrap_or(AuditAction::Rollback),
        target: row.get(3)?,
        snapshot_before: row.get(4)?,
        snapshot_after: row.get(5)?,
        checksum_before: row.get(6)?,
        checksum_after: row.get(7)?,
        metadata: metadata
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
        reversible: row.get::<_, i64>(9)? != 0,
        user_approved: row.get::<_, i64>(10)? != 0,
        rolled_back: row.get::<_, i64>(11)? != 0,
        rollback_at: rollback_at.as_deref().map(parse_timestamp),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

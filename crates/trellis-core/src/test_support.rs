//! Test fixtures shared across the workspace.
//!
//! Provides helpers for creating temporary vaults. Enable with the
//! `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! trellis-core = { path = "../trellis-core", features = ["test-utils"] }
//! ```

use std::sync::Mutex;

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::audit::{AuditEntry, AuditSink};
use crate::error::EngineResult;
use crate::types::OperationId;

/// An [`AuditSink`] that keeps entries in memory, for asserting on journal
/// behavior without a database.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("sink lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log(&self, entry: AuditEntry) -> EngineResult<OperationId> {
        let id = entry.id;
        self.entries.lock().expect("sink lock poisoned").push(entry);
        Ok(id)
    }
}

/// Create a temporary vault containing the given `(relative_path, contents)`
/// files. Parent directories are created as needed.
pub fn create_vault(files: &[(&str, &str)]) -> Result<TempDir> {
    let temp_dir = TempDir::new().context("failed to create temporary vault directory")?;
    let vault_path = temp_dir.path();

    for (relative_path, contents) in files {
        let file_path = vault_path.join(relative_path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create vault subdirectory {:?}", parent))?;
        }
        std::fs::write(&file_path, contents)
            .with_context(|| format!("failed to write vault file {:?}", file_path))?;
    }

    Ok(temp_dir)
}

/// A small general-purpose vault: three notes with headings, links, and tags.
pub fn create_basic_vault() -> Result<TempDir> {
    create_vault(&[
        (
            "Getting Started.md",
            "# Getting Started\n\nWelcome to the vault. See [[Projects]] for ongoing work.\n\n#meta\n",
        ),
        (
            "Projects.md",
            "---\ntags: [projects]\n---\n\n# Projects\n\nCurrent projects and their status.\n",
        ),
        (
            "notes/Daily Log.md",
            "# Daily Log\n\nShort updates, linked back to [[Getting Started]].\n",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_vault_writes_nested_files() {
        let vault = create_vault(&[
            ("root.md", "# Root"),
            ("nested/inner.md", "# Inner"),
        ])
        .unwrap();

        assert!(vault.path().join("root.md").exists());
        assert!(vault.path().join("nested/inner.md").exists());
    }

    #[test]
    fn basic_vault_has_three_notes() {
        let vault = create_basic_vault().unwrap();
        assert!(vault.path().join("Getting Started.md").exists());
        assert!(vault.path().join("Projects.md").exists());
        assert!(vault.path().join("notes/Daily Log.md").exists());
    }
}

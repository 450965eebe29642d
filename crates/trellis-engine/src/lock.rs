//! Indexer-owner lockfile.
//!
//! Exactly one engine owns a data directory at a time. The lock is a file
//! created exclusively and holding the owner's PID; it is removed when the
//! handle drops. A leftover lock whose PID no longer runs is treated as
//! stale and reclaimed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use trellis_core::{EngineError, EngineResult};

#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock or fail with an ownership error.
    pub fn acquire(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!(
                    "cannot create data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                info!(lock = %path.display(), "acquired indexer lock");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                if lock_is_stale(path) {
                    warn!(lock = %path.display(), "reclaiming stale lock");
                    let _ = std::fs::remove_file(path);
                    return Self::acquire(path);
                }
                Err(EngineError::Ownership(format!(
                    "another indexer owns this data directory (lock at {})",
                    path.display()
                )))
            }
            Err(err) => Err(EngineError::Config(format!(
                "cannot create lockfile {}: {e}",
                path.display(),
                e = err
            ))),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), "failed to remove lockfile: {err}");
        }
    }
}

/// A lock is stale when its recorded PID is no longer alive (best-effort;
/// an unreadable PID keeps the lock).
fn lock_is_stale(path: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return false;
    };
    if pid == std::process::id() {
        return false;
    }

    #[cfg(unix)]
    {
        !Path::new(&format!("/proc/{pid}")).exists() && cfg!(target_os = "linux")
    }

    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_then_conflict() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        let _lock = LockFile::acquire(&path).unwrap();
        // Same PID means the lock is not considered stale
        let err = LockFile::acquire(&path).unwrap_err();
        assert!(matches!(err, EngineError::Ownership(_)));
    }

    #[test]
    fn release_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");

        {
            let _lock = LockFile::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());

        let _lock = LockFile::acquire(&path).unwrap();
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn stale_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        // A PID far above pid_max never runs
        std::fs::write(&path, "999999999").unwrap();

        let _lock = LockFile::acquire(&path).unwrap();
    }
}

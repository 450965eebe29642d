//! Debounced file watching over the vault.
//!
//! OS events from `notify` arrive on the watcher's own thread and are
//! bridged into async land over a flume channel. Only `.md` files outside
//! the ignore set surface. Events are debounced per path: a burst of saves
//! to one file collapses into a single [`VaultEvent`] emitted after the
//! quiet period, with the final state decided by looking at the filesystem
//! when the timer fires. Renames therefore resolve naturally into
//! delete(old) + create(new).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use trellis_core::{EngineError, EngineResult};

/// Directory components that never contain user notes.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".obsidian",
    ".pkm-agent",
    ".trellis",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
];

/// A debounced, classified filesystem event for one note file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
}

impl VaultEvent {
    pub fn path(&self) -> &Path {
        match self {
            VaultEvent::Created(p) | VaultEvent::Modified(p) | VaultEvent::Deleted(p) => p,
        }
    }
}

/// Whether a path is a note file the engine should track.
pub fn is_watchable(path: &Path, data_dir: Option<&Path>) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some("md") {
        return false;
    }
    if let Some(data_dir) = data_dir {
        if path.starts_with(data_dir) {
            return false;
        }
    }
    !path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(|name| IGNORED_DIRS.contains(&name))
            .unwrap_or(false)
    })
}

/// Handle to a running watcher. Dropping it stops watching.
pub struct VaultWatcher {
    // Held to keep the OS watcher alive
    _watcher: notify::RecommendedWatcher,
    dispatcher: JoinHandle<()>,
}

impl VaultWatcher {
    /// Start watching `vault_root` recursively. Returns the handle and the
    /// channel on which debounced events arrive.
    ///
    /// A failure to schedule the watch is returned to the caller, which may
    /// choose to continue in on-demand mode.
    pub fn start(
        vault_root: &Path,
        data_dir: Option<PathBuf>,
        debounce: Duration,
    ) -> EngineResult<(Self, mpsc::UnboundedReceiver<VaultEvent>)> {
        let (raw_tx, raw_rx) = flume::unbounded::<Event>();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    let _ = raw_tx.send(event);
                }
                Err(err) => warn!("watch error: {err}"),
            }
        })
        .map_err(|e| EngineError::transient(format!("cannot create watcher: {e}")))?;

        watcher
            .watch(vault_root, RecursiveMode::Recursive)
            .map_err(|e| {
                EngineError::transient(format!(
                    "cannot watch {}: {e}",
                    vault_root.display()
                ))
            })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(raw_rx, event_tx, data_dir, debounce));
        info!(vault = %vault_root.display(), "started vault watcher");

        Ok((
            Self {
                _watcher: watcher,
                dispatcher,
            },
            event_rx,
        ))
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Drains raw notify events, applies filtering, and runs the per-path
/// debounce timers.
async fn dispatch_loop(
    raw_rx: flume::Receiver<Event>,
    event_tx: mpsc::UnboundedSender<VaultEvent>,
    data_dir: Option<PathBuf>,
    debounce: Duration,
) {
    let mut pending: HashMap<PathBuf, JoinHandle<()>> = HashMap::new();

    while let Ok(event) = raw_rx.recv_async().await {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            continue;
        }

        for path in event.paths {
            if !is_watchable(&path, data_dir.as_deref()) {
                continue;
            }

            let saw_create = matches!(event.kind, EventKind::Create(_));

            // A new event for the same path cancels and reschedules
            if let Some(timer) = pending.remove(&path) {
                timer.abort();
            }

            let tx = event_tx.clone();
            let fire_path = path.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                // Decide the final event from the state on disk at fire time
                let event = if fire_path.exists() {
                    if saw_create {
                        VaultEvent::Created(fire_path)
                    } else {
                        VaultEvent::Modified(fire_path)
                    }
                } else {
                    VaultEvent::Deleted(fire_path)
                };
                debug!(?event, "debounce fired");
                let _ = tx.send(event);
            });
            pending.insert(path, timer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_markdown_files_are_watchable() {
        assert!(is_watchable(Path::new("/v/note.md"), None));
        assert!(!is_watchable(Path::new("/v/image.png"), None));
        assert!(!is_watchable(Path::new("/v/no_extension"), None));
    }

    #[test]
    fn ignored_directories_are_filtered() {
        for dir in IGNORED_DIRS {
            let path = PathBuf::from("/v").join(dir).join("inner.md");
            assert!(!is_watchable(&path, None), "{dir} should be ignored");
        }
        assert!(is_watchable(Path::new("/v/sub/inner.md"), None));
    }

    #[test]
    fn data_dir_is_filtered() {
        let data_dir = PathBuf::from("/v/engine-state");
        assert!(!is_watchable(
            Path::new("/v/engine-state/cache.md"),
            Some(&data_dir)
        ));
        assert!(is_watchable(Path::new("/v/real.md"), Some(&data_dir)));
    }
}

//! On-disk cache tier.
//!
//! Payloads live in `<cache_dir>/<first-two-hex>/<sha256>.bin`; the index
//! (`_index.json`) maps keys to file path, size, and expiry metadata and is
//! reloaded on startup. The tier stays under a total-size budget by evicting
//! oldest entries first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use trellis_core::{EngineError, EngineResult};

use crate::TierStats;

const INDEX_FILE: &str = "_index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntryMeta {
    path: PathBuf,
    size: u64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

pub(crate) struct DiskTier {
    root: PathBuf,
    max_bytes: u64,
    index: HashMap<String, DiskEntryMeta>,
    hits: u64,
    misses: u64,
}

impl DiskTier {
    pub fn open(root: &Path, max_bytes: u64) -> EngineResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            EngineError::Config(format!("cannot create cache dir {}: {e}", root.display()))
        })?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            match std::fs::read_to_string(&index_path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
            {
                Some(index) => index,
                None => {
                    warn!("cache index unreadable, starting fresh");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            root: root.to_path_buf(),
            max_bytes,
            index,
            hits: 0,
            misses: 0,
        })
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join(&digest[..2]).join(format!("{digest}.bin"))
    }

    fn save_index(&self) {
        let index_path = self.root.join(INDEX_FILE);
        match serde_json::to_string(&self.index) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&index_path, json) {
                    warn!("failed to persist cache index: {e}");
                }
            }
            Err(e) => warn!("failed to serialize cache index: {e}"),
        }
    }

    /// Read a payload; returns the bytes and their expiry for L1 promotion.
    pub fn get(&mut self, key: &str) -> Option<(Vec<u8>, Option<DateTime<Utc>>)> {
        let Some(meta) = self.index.get(key) else {
            self.misses += 1;
            return None;
        };

        if matches!(meta.expires_at, Some(at) if Utc::now() > at) {
            self.remove(key);
            self.misses += 1;
            return None;
        }

        let expires_at = meta.expires_at;
        let path = meta.path.clone();
        match std::fs::read(&path) {
            Ok(bytes) => {
                self.hits += 1;
                Some((bytes, expires_at))
            }
            Err(_) => {
                // Payload vanished out from under the index
                self.index.remove(key);
                self.save_index();
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(
        &mut self,
        key: &str,
        bytes: &[u8],
        expires_at: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        self.evict_for(bytes.len() as u64);

        let path = self.payload_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::transient(format!("cache mkdir failed: {e}")))?;
        }
        std::fs::write(&path, bytes)
            .map_err(|e| EngineError::transient(format!("cache write failed: {e}")))?;

        self.index.insert(
            key.to_string(),
            DiskEntryMeta {
                path,
                size: bytes.len() as u64,
                created_at: Utc::now(),
                expires_at,
            },
        );
        self.save_index();
        Ok(())
    }

    fn total_bytes(&self) -> u64 {
        self.index.values().map(|m| m.size).sum()
    }

    /// Evict oldest entries until `incoming` bytes fit in the budget.
    fn evict_for(&mut self, incoming: u64) {
        while self.total_bytes() + incoming > self.max_bytes && !self.index.is_empty() {
            let oldest = self
                .index
                .iter()
                .min_by_key(|(_, meta)| meta.created_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => self.remove(&key),
                None => break,
            }
        }
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(meta) = self.index.remove(key) {
            let _ = std::fs::remove_file(&meta.path);
            self.save_index();
        }
    }

    pub fn remove_prefix(&mut self, prefix: &str) -> EngineResult<()> {
        let keys: Vec<String> = self
            .index
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in keys {
            self.remove(&key);
        }
        Ok(())
    }

    pub fn clear(&mut self) -> EngineResult<()> {
        for meta in self.index.values() {
            let _ = std::fs::remove_file(&meta.path);
        }
        self.index.clear();
        self.save_index();
        Ok(())
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.index.len(),
            size_bytes: self.total_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trip_and_index_reload() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");

        {
            let mut tier = DiskTier::open(&root, 1024).unwrap();
            tier.insert("q:key", b"payload", None).unwrap();
            assert!(tier.get("q:key").is_some());
        }

        // New instance reloads the persisted index
        let mut tier = DiskTier::open(&root, 1024).unwrap();
        let (bytes, _) = tier.get("q:key").unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn payloads_are_bucketed_by_hash_prefix() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let mut tier = DiskTier::open(&root, 1024).unwrap();
        tier.insert("bucketed", b"x", None).unwrap();

        let digest = hex::encode(Sha256::digest(b"bucketed"));
        assert!(root.join(&digest[..2]).join(format!("{digest}.bin")).exists());
    }

    #[test]
    fn size_budget_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let mut tier = DiskTier::open(&dir.path().join("cache"), 10).unwrap();

        tier.insert("old", &[0; 6], None).unwrap();
        tier.insert("new", &[0; 6], None).unwrap();

        assert!(tier.get("old").is_none());
        assert!(tier.get("new").is_some());
    }

    #[test]
    fn missing_payload_file_degrades_to_miss() {
        let dir = TempDir::new().unwrap();
        let mut tier = DiskTier::open(&dir.path().join("cache"), 1024).unwrap();
        tier.insert("fragile", b"data", None).unwrap();

        let path = tier.index.get("fragile").unwrap().path.clone();
        std::fs::remove_file(path).unwrap();

        assert!(tier.get("fragile").is_none());
        assert_eq!(tier.stats().entries, 0);
    }

    #[test]
    fn corrupt_index_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("cache");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(INDEX_FILE), "not json at all").unwrap();

        let tier = DiskTier::open(&root, 1024).unwrap();
        assert_eq!(tier.stats().entries, 0);
    }
}

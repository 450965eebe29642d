//! Two-tier cache: in-memory LRU backed by an on-disk store.
//!
//! Lookups check L1 first, then L2; an L2 hit is promoted back into L1.
//! Writes land in both tiers. Entries carry per-namespace default TTLs and
//! expire lazily on read. Payloads are bincode with a one-byte version
//! prefix shared by both tiers.

pub mod disk;
pub mod memory;

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use trellis_core::{EngineError, EngineResult};

use disk::DiskTier;
use memory::MemoryTier;

/// Payload format version for both tiers.
pub(crate) const PAYLOAD_VERSION: u8 = 1;

/// Cache namespaces with their default TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Query,
    Embedding,
    Chunk,
    Retrieval,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Query => "query",
            Namespace::Embedding => "embedding",
            Namespace::Chunk => "chunk",
            Namespace::Retrieval => "retrieval",
        }
    }

    /// Default time-to-live for entries in this namespace.
    pub fn default_ttl(&self) -> Duration {
        match self {
            // Query results go stale as soon as the vault changes
            Namespace::Query | Namespace::Retrieval => Duration::from_secs(300),
            // Embeddings are stable for a given model version
            Namespace::Embedding => Duration::from_secs(7 * 24 * 3600),
            Namespace::Chunk => Duration::from_secs(3600),
        }
    }

    pub fn all() -> [Namespace; 4] {
        [
            Namespace::Query,
            Namespace::Embedding,
            Namespace::Chunk,
            Namespace::Retrieval,
        ]
    }
}

/// Counters for one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub size_bytes: u64,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Combined stats for both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub memory: TierStats,
    pub disk: TierStats,
}

/// The two-tier cache manager. Internally thread-safe; clone-free sharing is
/// done by wrapping it in an `Arc` at the engine level.
pub struct CacheManager {
    memory: Mutex<MemoryTier>,
    disk: Mutex<DiskTier>,
}

impl CacheManager {
    /// Open (or create) the cache rooted at `cache_dir`.
    pub fn open(
        cache_dir: &Path,
        memory_max_entries: usize,
        memory_max_mb: f64,
        disk_max_mb: f64,
    ) -> EngineResult<Self> {
        let memory = MemoryTier::new(memory_max_entries, mb_to_bytes(memory_max_mb));
        let disk = DiskTier::open(cache_dir, mb_to_bytes(disk_max_mb))?;
        Ok(Self {
            memory: Mutex::new(memory),
            disk: Mutex::new(disk),
        })
    }

    /// Look up a value. Checks L1, then L2 with promotion.
    pub async fn get<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Option<T> {
        let full_key = full_key(ns, key);

        if let Some(bytes) = self.memory.lock().get(&full_key) {
            return decode(&bytes);
        }

        let promoted = self.disk.lock().get(&full_key);
        if let Some((bytes, expires_at)) = promoted {
            self.memory.lock().insert(&full_key, bytes.clone(), expires_at);
            return decode(&bytes);
        }

        None
    }

    /// Store a value in both tiers. `ttl` defaults to the namespace TTL.
    pub async fn set<T: Serialize>(
        &self,
        ns: Namespace,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> EngineResult<()> {
        let full_key = full_key(ns, key);
        let bytes = encode(value)?;
        let ttl = ttl.unwrap_or_else(|| ns.default_ttl());
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        self.memory
            .lock()
            .insert(&full_key, bytes.clone(), Some(expires_at));
        self.disk.lock().insert(&full_key, &bytes, Some(expires_at))?;
        debug!(namespace = ns.as_str(), key, bytes = bytes.len(), "cached");
        Ok(())
    }

    /// Drop one entry from both tiers.
    pub async fn remove(&self, ns: Namespace, key: &str) {
        let full_key = full_key(ns, key);
        self.memory.lock().remove(&full_key);
        self.disk.lock().remove(&full_key);
    }

    /// Purge one namespace, or everything when `ns` is `None`.
    pub async fn clear(&self, ns: Option<Namespace>) -> EngineResult<()> {
        match ns {
            Some(ns) => {
                let prefix = format!("{}:", ns.as_str());
                self.memory.lock().remove_prefix(&prefix);
                self.disk.lock().remove_prefix(&prefix)?;
            }
            None => {
                self.memory.lock().clear();
                self.disk.lock().clear()?;
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory: self.memory.lock().stats(),
            disk: self.disk.lock().stats(),
        }
    }
}

fn full_key(ns: Namespace, key: &str) -> String {
    format!("{}:{}", ns.as_str(), key)
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0) as u64
}

pub(crate) fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    let mut bytes = vec![PAYLOAD_VERSION];
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EngineError::permanent("cache", format!("encode failed: {e}")))?;
    bytes.extend(payload);
    Ok(bytes)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    match bytes.split_first() {
        Some((&PAYLOAD_VERSION, payload)) => {
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map(|(value, _)| value)
                .ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_cache(dir: &TempDir) -> CacheManager {
        CacheManager::open(&dir.path().join("cache"), 100, 10.0, 50.0).unwrap()
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        cache
            .set(Namespace::Query, "k1", &vec![1u32, 2, 3], None)
            .await
            .unwrap();
        let value: Option<Vec<u32>> = cache.get(Namespace::Query, "k1").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn miss_returns_none_and_counts() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let value: Option<String> = cache.get(Namespace::Query, "absent").await;
        assert_eq!(value, None);
        let stats = cache.stats();
        assert_eq!(stats.memory.misses, 1);
        assert_eq!(stats.disk.misses, 1);
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        cache
            .set(Namespace::Query, "same-key", &"from-query".to_string(), None)
            .await
            .unwrap();
        let other: Option<String> = cache.get(Namespace::Embedding, "same-key").await;
        assert_eq!(other, None);
    }

    #[tokio::test]
    async fn l2_hit_promotes_to_l1() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");

        {
            let cache = CacheManager::open(&cache_dir, 100, 10.0, 50.0).unwrap();
            cache
                .set(Namespace::Embedding, "vec", &vec![0.5f32], None)
                .await
                .unwrap();
        }

        // Fresh manager: L1 is empty, value must come from disk
        let cache = CacheManager::open(&cache_dir, 100, 10.0, 50.0).unwrap();
        let value: Option<Vec<f32>> = cache.get(Namespace::Embedding, "vec").await;
        assert_eq!(value, Some(vec![0.5]));
        assert_eq!(cache.stats().disk.hits, 1);

        // Second read is served by L1
        let _: Option<Vec<f32>> = cache.get(Namespace::Embedding, "vec").await;
        assert_eq!(cache.stats().memory.hits, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        cache
            .set(
                Namespace::Query,
                "ephemeral",
                &1u8,
                Some(Duration::from_millis(0)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let value: Option<u8> = cache.get(Namespace::Query, "ephemeral").await;
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn clear_namespace_leaves_others() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        cache
            .set(Namespace::Query, "a", &1u8, None)
            .await
            .unwrap();
        cache
            .set(Namespace::Embedding, "b", &2u8, None)
            .await
            .unwrap();

        cache.clear(Some(Namespace::Query)).await.unwrap();

        let a: Option<u8> = cache.get(Namespace::Query, "a").await;
        let b: Option<u8> = cache.get(Namespace::Embedding, "b").await;
        assert_eq!(a, None);
        assert_eq!(b, Some(2));
    }

    #[tokio::test]
    async fn clear_all_purges_everything() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        cache.set(Namespace::Query, "a", &1u8, None).await.unwrap();
        cache.set(Namespace::Chunk, "b", &2u8, None).await.unwrap();
        cache.clear(None).await.unwrap();

        assert_eq!(cache.stats().memory.entries, 0);
        assert_eq!(cache.stats().disk.entries, 0);
    }

    #[test]
    fn versioned_payload_rejects_unknown_version() {
        let bytes = encode(&42u32).unwrap();
        assert_eq!(bytes[0], PAYLOAD_VERSION);

        let mut tampered = bytes.clone();
        tampered[0] = 99;
        let decoded: Option<u32> = decode(&tampered);
        assert_eq!(decoded, None);
    }
}

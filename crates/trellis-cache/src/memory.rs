//! In-memory LRU tier bounded by entry count and total bytes.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::TierStats;

struct MemoryEntry {
    bytes: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    access_count: u64,
    last_accessed: DateTime<Utc>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if Utc::now() > at)
    }
}

pub(crate) struct MemoryTier {
    entries: LruCache<String, MemoryEntry>,
    max_bytes: u64,
    current_bytes: u64,
    hits: u64,
    misses: u64,
}

impl MemoryTier {
    pub fn new(max_entries: usize, max_bytes: u64) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).expect("max(1) is non-zero");
        Self {
            entries: LruCache::new(cap),
            max_bytes,
            current_bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        let expired = self
            .entries
            .get(key)
            .map(MemoryEntry::is_expired)
            .unwrap_or(false);
        if expired {
            self.remove(key);
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_accessed = Utc::now();
                self.hits += 1;
                Some(entry.bytes.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: &str, bytes: Vec<u8>, expires_at: Option<DateTime<Utc>>) {
        let size = bytes.len() as u64;

        // Stay within the byte budget before inserting
        while self.current_bytes + size > self.max_bytes && !self.entries.is_empty() {
            if let Some((_, evicted)) = self.entries.pop_lru() {
                self.current_bytes -= evicted.bytes.len() as u64;
            }
        }

        if let Some(old) = self.entries.push(
            key.to_string(),
            MemoryEntry {
                bytes,
                expires_at,
                access_count: 0,
                last_accessed: Utc::now(),
            },
        ) {
            // push returns the displaced LRU entry (or the old value for the
            // same key); account for its size
            self.current_bytes -= old.1.bytes.len() as u64;
        }
        self.current_bytes += size;
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.pop(key) {
            self.current_bytes -= entry.bytes.len() as u64;
        }
    }

    pub fn remove_prefix(&mut self, prefix: &str) {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.remove(&key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_bytes = 0;
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
            size_bytes: self.current_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_eviction_by_entry_count() {
        let mut tier = MemoryTier::new(2, u64::MAX);
        tier.insert("a", vec![1], None);
        tier.insert("b", vec![2], None);
        tier.insert("c", vec![3], None);

        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn eviction_by_byte_budget() {
        let mut tier = MemoryTier::new(100, 10);
        tier.insert("a", vec![0; 6], None);
        tier.insert("b", vec![0; 6], None); // forces out "a"

        assert!(tier.get("a").is_none());
        assert!(tier.get("b").is_some());
        assert!(tier.stats().size_bytes <= 10);
    }

    #[test]
    fn replacing_a_key_updates_byte_accounting() {
        let mut tier = MemoryTier::new(10, 100);
        tier.insert("k", vec![0; 8], None);
        tier.insert("k", vec![0; 4], None);
        assert_eq!(tier.stats().size_bytes, 4);
        assert_eq!(tier.stats().entries, 1);
    }

    #[test]
    fn expired_entry_counts_as_miss() {
        let mut tier = MemoryTier::new(10, 100);
        tier.insert(
            "gone",
            vec![1],
            Some(Utc::now() - chrono::Duration::seconds(1)),
        );
        assert!(tier.get("gone").is_none());
        assert_eq!(tier.stats().misses, 1);
        assert_eq!(tier.stats().entries, 0);
    }
}

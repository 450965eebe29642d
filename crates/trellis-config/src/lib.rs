//! Configuration for the Trellis engine.
//!
//! Precedence, highest first: programmatic overrides, `TRELLIS_*`
//! environment variables, a TOML file, built-in defaults. Unknown keys in
//! the file are ignored with a warning rather than rejected, so configs
//! written for newer versions still load.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use trellis_core::{EngineError, EngineResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory of the user's notes. Required.
    pub vault_root: PathBuf,
    /// Directory for the engine's own state (databases, vector index,
    /// cache, lockfile). Required; created if missing.
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub cache: CacheConfig,
    pub retriever: RetrieverConfig,
    pub watcher: WatcherConfig,
    pub link_heal: LinkHealConfig,
    /// Worker pool size for incremental indexing; defaults to CPU count.
    pub index_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vault_root: PathBuf::new(),
            data_dir: PathBuf::new(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            cache: CacheConfig::default(),
            retriever: RetrieverConfig::default(),
            watcher: WatcherConfig::default(),
            link_heal: LinkHealConfig::default(),
            index_workers: num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier. `"hash"` selects the deterministic offline
    /// embedder; anything else is resolved by the fastembed provider.
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    /// Per-batch deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-minilm-l6-v2".to_string(),
            dimensions: 384,
            batch_size: 16,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_size: usize,
    pub max_size: usize,
    pub min_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            max_size: 1000,
            min_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_max_mb: f64,
    pub disk_max_mb: f64,
    pub memory_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_max_mb: 100.0,
            disk_max_mb: 500.0,
            memory_max_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    pub k_default: usize,
    pub semantic_weight: f32,
    pub lexical_weight: f32,
    pub min_score: f32,
    pub rerank_enabled: bool,
    pub rerank_top_n: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            k_default: 10,
            semantic_weight: 0.7,
            lexical_weight: 0.3,
            min_score: 0.3,
            rerank_enabled: false,
            rerank_top_n: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkHealConfig {
    pub min_confidence: f32,
}

impl Default for LinkHealConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.7,
        }
    }
}

impl EngineConfig {
    /// Construct a config for the given vault with the data directory
    /// defaulting to `<vault_root>/.trellis`.
    pub fn for_vault(vault_root: impl Into<PathBuf>) -> Self {
        let vault_root = vault_root.into();
        let data_dir = vault_root.join(".trellis");
        Self {
            vault_root,
            data_dir,
            ..Default::default()
        }
    }

    /// Load configuration from an optional TOML file, then apply `TRELLIS_*`
    /// environment overrides. A missing file falls back to defaults; an
    /// unreadable or syntactically invalid file is a configuration error.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML document, warning about (and discarding) unknown keys.
    pub fn from_toml(raw: &str) -> EngineResult<Self> {
        let table: toml::Table = raw
            .parse()
            .map_err(|e| EngineError::Config(format!("invalid TOML: {e}")))?;

        warn_unknown_keys(&table);

        table
            .try_into()
            .map_err(|e| EngineError::Config(format!("invalid configuration: {e}")))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(vault) = std::env::var("TRELLIS_VAULT_ROOT") {
            self.vault_root = PathBuf::from(vault);
        }
        if let Ok(data) = std::env::var("TRELLIS_DATA_DIR") {
            self.data_dir = PathBuf::from(data);
        }
        if let Ok(model) = std::env::var("TRELLIS_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Check invariants the engine relies on. Called once at initialize;
    /// violations are fatal.
    pub fn validate(&self) -> EngineResult<()> {
        if self.vault_root.as_os_str().is_empty() {
            return Err(EngineError::Config("vault_root is required".to_string()));
        }
        if !self.vault_root.is_dir() {
            return Err(EngineError::Config(format!(
                "vault_root is not a directory: {}",
                self.vault_root.display()
            )));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(EngineError::Config("data_dir is required".to_string()));
        }
        if self.chunking.min_size >= self.chunking.max_size {
            return Err(EngineError::Config(format!(
                "chunking.min_size ({}) must be below chunking.max_size ({})",
                self.chunking.min_size, self.chunking.max_size
            )));
        }
        for (name, weight) in [
            ("retriever.semantic_weight", self.retriever.semantic_weight),
            ("retriever.lexical_weight", self.retriever.lexical_weight),
            ("retriever.min_score", self.retriever.min_score),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Config(format!(
                    "{name} must be finite and non-negative, got {weight}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.link_heal.min_confidence) {
            return Err(EngineError::Config(format!(
                "link_heal.min_confidence must be within [0, 1], got {}",
                self.link_heal.min_confidence
            )));
        }
        if self.index_workers == 0 {
            return Err(EngineError::Config(
                "index_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Derived paths inside the data directory.
    pub fn structured_db_path(&self) -> PathBuf {
        self.data_dir.join("structured.db")
    }

    pub fn audit_db_path(&self) -> PathBuf {
        self.data_dir.join("audit.db")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vector")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("lock")
    }
}

fn known_keys() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        (
            "",
            &["vault_root", "data_dir", "index_workers"],
        ),
        (
            "embedding",
            &["model", "dimensions", "batch_size", "timeout_secs"],
        ),
        ("chunking", &["target_size", "max_size", "min_size"]),
        (
            "cache",
            &["memory_max_mb", "disk_max_mb", "memory_max_entries"],
        ),
        (
            "retriever",
            &[
                "k_default",
                "semantic_weight",
                "lexical_weight",
                "min_score",
                "rerank_enabled",
                "rerank_top_n",
            ],
        ),
        ("watcher", &["debounce_ms"]),
        ("link_heal", &["min_confidence"]),
    ]
}

fn warn_unknown_keys(table: &toml::Table) {
    let sections: BTreeSet<&str> = known_keys()
        .iter()
        .map(|(section, _)| *section)
        .filter(|s| !s.is_empty())
        .collect();
    let top_level: &[&str] = known_keys()[0].1;

    for (key, value) in table {
        if sections.contains(key.as_str()) {
            let allowed = known_keys()
                .iter()
                .find(|(section, _)| section == key)
                .map(|(_, keys)| *keys)
                .unwrap_or(&[]);
            if let toml::Value::Table(inner) = value {
                for inner_key in inner.keys() {
                    if !allowed.contains(&inner_key.as_str()) {
                        warn!("ignoring unknown configuration key {key}.{inner_key}");
                    }
                }
            }
        } else if !top_level.contains(&key.as_str()) {
            warn!("ignoring unknown configuration key {key}");
        }
    }
}

//! The Trellis engine facade.
//!
//! [`Engine::initialize`] boots the stores, cache, and audit journal, takes
//! the indexer-owner lock, runs a reconciliation pass, and starts the file
//! watcher. Everything the CLI and other collaborators need goes through
//! the handle; dropping it releases the lock. No process-wide singletons:
//! the embedding model and vector index live inside the handle.

pub mod handlers;
pub mod lock;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use trellis_cache::{CacheManager, CacheStats};
use trellis_config::EngineConfig;
use trellis_core::{
    AuditAction, CancelFlag, EngineError, EngineResult, NoteId, OperationId, Reranker,
    SearchResult,
};
use trellis_embed::EmbeddingEngine;
use trellis_links::{LinkAnalyzer, LinkHealer};
use trellis_parser::{Chunker, ChunkerConfig, NoteParser};
use trellis_pipeline::Indexer;
use trellis_query::Retriever;
use trellis_sqlite::{AuditLog, AuditStats, RollbackRegistry, StructuredStore};
use trellis_vector::VectorStore;
use trellis_watch::VaultWatcher;

use handlers::{AddChunksUndo, DeleteChunksUndo, DeleteNoteUndo, RewriteFileUndo, UpsertNoteUndo};
use lock::LockFile;

// Re-exported so thin front-ends only need the facade crate
pub use trellis_links::{HealAction, HealOutcome, HealReport, LinkAnalysisResult};
pub use trellis_pipeline::ReindexReport;
pub use trellis_vector::SearchFilters;

/// Aggregate snapshot returned by [`Engine::stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub notes: u64,
    pub tags: u64,
    pub links: u64,
    pub total_words: u64,
    pub vectors: usize,
    pub index_kind: String,
    pub cache: CacheStats,
    pub audit: AuditStats,
    pub watcher_active: bool,
}

pub struct Engine {
    config: EngineConfig,
    store: StructuredStore,
    audit: AuditLog,
    cache: Arc<CacheManager>,
    vectors: Arc<VectorStore>,
    indexer: Arc<Indexer>,
    retriever: Retriever,
    registry: RollbackRegistry,
    cancel: CancelFlag,
    watcher: Option<VaultWatcher>,
    event_task: Option<tokio::task::JoinHandle<()>>,
    // Dropped last; releases the data directory to the next owner
    _lock: LockFile,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Boot the engine: validate config, take ownership of the data
    /// directory, open every store, reconcile, and start watching.
    pub async fn initialize(config: EngineConfig) -> EngineResult<Self> {
        let mut engine = Self::initialize_on_demand(config).await?;
        engine.start_watching();
        Ok(engine)
    }

    /// Boot without the file watcher, for one-shot callers. The rest of the
    /// engine is fully functional; changes are picked up on `reindex`.
    pub async fn initialize_on_demand(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            EngineError::Config(format!(
                "cannot create data directory {}: {e}",
                config.data_dir.display()
            ))
        })?;

        let lock = LockFile::acquire(&config.lock_path())?;

        let audit = AuditLog::open(&config.audit_db_path()).map_err(EngineError::from)?;
        let store = StructuredStore::open(&config.structured_db_path()).map_err(EngineError::from)?;
        let cache = Arc::new(CacheManager::open(
            &config.cache_dir(),
            config.cache.memory_max_entries,
            config.cache.memory_max_mb,
            config.cache.disk_max_mb,
        )?);

        let provider =
            trellis_embed::provider_for_model(&config.embedding.model, config.embedding.dimensions)?;
        let embedder = Arc::new(
            EmbeddingEngine::new(provider, Some(cache.clone()))
                .with_deadline(Duration::from_secs(config.embedding.timeout_secs)),
        );

        let vectors = Arc::new(VectorStore::open(
            &config.vector_dir(),
            embedder,
            Arc::new(audit.clone()),
        )?);

        let chunker = Arc::new(Chunker::new(ChunkerConfig {
            target_size: config.chunking.target_size,
            max_size: config.chunking.max_size,
            min_size: config.chunking.min_size,
        }));

        let cancel = CancelFlag::new();
        let indexer = Arc::new(Indexer::new(
            NoteParser::new(&config.vault_root),
            Chunker::new(ChunkerConfig {
                target_size: config.chunking.target_size,
                max_size: config.chunking.max_size,
                min_size: config.chunking.min_size,
            }),
            store.clone(),
            vectors.clone(),
            Arc::new(audit.clone()),
            cancel.clone(),
        ));

        let retriever = Retriever::new(
            store.clone(),
            vectors.clone(),
            Some(cache.clone()),
            load_reranker(&config),
            config.retriever.clone(),
        );

        let registry = build_registry(&config, &store, &vectors, &chunker);

        let engine = Self {
            config,
            store,
            audit,
            cache,
            vectors,
            indexer,
            retriever,
            registry,
            cancel,
            watcher: None,
            event_task: None,
            _lock: lock,
        };

        // Initial reconciliation brings the indexes up to date with disk
        let report = engine.indexer.reindex_all().await?;
        info!(?report, "initial reconciliation complete");
        Ok(engine)
    }

    /// Start the watcher and the worker pool draining its events. A
    /// scheduling failure logs and leaves the engine in on-demand mode.
    pub fn start_watching(&mut self) {
        if self.watcher.is_some() {
            return;
        }
        let debounce = Duration::from_millis(self.config.watcher.debounce_ms);
        match VaultWatcher::start(
            &self.config.vault_root,
            Some(self.config.data_dir.clone()),
            debounce,
        ) {
            Ok((watcher, mut events)) => {
                let indexer = self.indexer.clone();
                let cache = self.cache.clone();
                let workers = Arc::new(Semaphore::new(self.config.index_workers.max(1)));
                let task = tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        let indexer = indexer.clone();
                        let cache = cache.clone();
                        let workers = workers.clone();
                        tokio::spawn(async move {
                            let _slot = workers.acquire_owned().await;
                            match indexer.apply_event(&event).await {
                                Ok(outcome) => {
                                    use trellis_pipeline::IndexOutcome;
                                    if matches!(
                                        outcome,
                                        IndexOutcome::Added
                                            | IndexOutcome::Updated
                                            | IndexOutcome::Deleted
                                    ) {
                                        // Cached query results are stale now
                                        let _ = cache
                                            .clear(Some(trellis_cache::Namespace::Query))
                                            .await;
                                    }
                                }
                                Err(err) => {
                                    warn!(?event, "event reconciliation failed: {err}")
                                }
                            }
                        });
                    }
                });
                self.watcher = Some(watcher);
                self.event_task = Some(task);
            }
            Err(err) => {
                warn!("file watching unavailable, staying in on-demand mode: {err}");
            }
        }
    }

    /// Reconcile the vault. `full` additionally rebuilds the vector index
    /// from its stored documents.
    pub async fn reindex(&self, full: bool) -> EngineResult<ReindexReport> {
        if full {
            self.vectors.rebuild()?;
        }
        let report = self.indexer.reindex_all().await?;
        // Results computed against the old corpus are stale now
        if report.added + report.updated + report.deleted > 0 {
            self.cache.clear(Some(trellis_cache::Namespace::Query)).await?;
        }
        Ok(report)
    }

    /// Hybrid search over the corpus.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: Option<SearchFilters>,
    ) -> EngineResult<Vec<SearchResult>> {
        self.cancel.check()?;
        self.retriever
            .search(query, k, &filters.unwrap_or_default())
            .await
    }

    /// Notes similar to an existing one.
    pub async fn find_similar(
        &self,
        note_id: &NoteId,
        k: usize,
    ) -> EngineResult<Vec<SearchResult>> {
        self.cancel.check()?;
        self.retriever.find_similar(note_id, k).await
    }

    /// Retrieval context for an LLM prompt.
    pub async fn context_for_query(
        &self,
        query: &str,
        max_tokens: usize,
    ) -> EngineResult<String> {
        self.retriever.context_for_query(query, max_tokens).await
    }

    /// Classify every link in the vault.
    pub async fn validate_links(&self) -> EngineResult<LinkAnalysisResult> {
        let analyzer = LinkAnalyzer::build(&self.config.vault_root)?;
        analyzer.analyze_vault().await
    }

    /// Repair broken links, optionally as a dry run. `min_confidence`
    /// defaults to the configured threshold.
    pub async fn heal_links(
        &self,
        min_confidence: Option<f32>,
        dry_run: bool,
    ) -> EngineResult<HealReport> {
        let analyzer = LinkAnalyzer::build(&self.config.vault_root)?;
        let healer = LinkHealer::new(
            analyzer,
            Arc::new(self.audit.clone()),
            min_confidence.unwrap_or(self.config.link_heal.min_confidence),
        );
        let report = healer.heal(None, dry_run).await?;

        // Healed files must be re-indexed; the watcher would get there too,
        // but do it synchronously so callers observe a consistent state
        if !dry_run && report.fixed > 0 {
            self.reindex(false).await?;
        }
        Ok(report)
    }

    /// Undo one journaled operation.
    pub async fn rollback(&self, op_id: OperationId) -> EngineResult<OperationId> {
        self.audit.rollback(op_id, &self.registry).await
    }

    /// Journal history, newest first.
    pub async fn history(
        &self,
        action: Option<AuditAction>,
        target: Option<&str>,
        limit: usize,
    ) -> EngineResult<Vec<trellis_core::AuditEntry>> {
        self.audit
            .history(action, target, limit)
            .await
            .map_err(EngineError::from)
    }

    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let store = self.store.stats().await.map_err(EngineError::from)?;
        let audit = self.audit.stats().await.map_err(EngineError::from)?;
        Ok(EngineStats {
            notes: store.notes,
            tags: store.tags,
            links: store.links,
            total_words: store.total_words,
            vectors: self.vectors.count(),
            index_kind: self.vectors.index_kind().to_string(),
            cache: self.cache.stats(),
            audit,
            watcher_active: self.watcher.is_some(),
        })
    }

    /// Cooperative cancellation handle for long-running calls.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop watching and release background tasks. The lock is released
    /// when the engine drops.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
        self.watcher = None;
        info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

fn build_registry(
    config: &EngineConfig,
    store: &StructuredStore,
    vectors: &Arc<VectorStore>,
    chunker: &Arc<Chunker>,
) -> RollbackRegistry {
    let mut registry = RollbackRegistry::new();
    registry.register(
        AuditAction::UpsertNote,
        Arc::new(UpsertNoteUndo {
            store: store.clone(),
            vectors: vectors.clone(),
            chunker: chunker.clone(),
        }),
    );
    registry.register(
        AuditAction::DeleteNote,
        Arc::new(DeleteNoteUndo {
            store: store.clone(),
            vectors: vectors.clone(),
            chunker: chunker.clone(),
        }),
    );
    registry.register(
        AuditAction::AddChunks,
        Arc::new(AddChunksUndo {
            vectors: vectors.clone(),
        }),
    );
    registry.register(
        AuditAction::DeleteChunks,
        Arc::new(DeleteChunksUndo {
            store: store.clone(),
            vectors: vectors.clone(),
            chunker: chunker.clone(),
        }),
    );
    registry.register(
        AuditAction::RewriteFile,
        Arc::new(RewriteFileUndo {
            vault_root: config.vault_root.clone(),
        }),
    );
    registry
}

#[cfg(feature = "fastembed")]
fn load_reranker(config: &EngineConfig) -> Option<Arc<dyn Reranker>> {
    if !config.retriever.rerank_enabled {
        return None;
    }
    match trellis_embed::FastEmbedReranker::try_new() {
        Ok(reranker) => Some(Arc::new(reranker)),
        Err(err) => {
            warn!("reranker unavailable, continuing without: {err}");
            None
        }
    }
}

#[cfg(not(feature = "fastembed"))]
fn load_reranker(config: &EngineConfig) -> Option<Arc<dyn Reranker>> {
    if config.retriever.rerank_enabled {
        warn!("reranking requires the `fastembed` feature, continuing without");
    }
    None
}

//! Core types and traits for the Trellis PKM engine.
//!
//! This crate is the foundation of the workspace: it defines the data model
//! (notes, chunks, links, tags, audit entries), the deterministic hashing
//! scheme for note identifiers, the engine-wide error taxonomy, and the
//! trait seams (`EmbeddingProvider`, `AuditSink`) that backend crates
//! implement. Higher-level crates inject the implementations; core never
//! depends on a backend.

pub mod audit;
pub mod cancel;
pub mod error;
pub mod hash;
pub mod redact;
pub mod retry;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use audit::{snapshot_checksum, AuditAction, AuditEntry, AuditSink};
pub use cancel::CancelFlag;
pub use error::{EngineError, EngineResult};
pub use hash::{content_hash, note_id};
pub use traits::{EmbeddingProvider, Reranker};
pub use types::{
    Chunk, ChunkMetadata, FrontMatter, Link, LinkKind, LinkStatus, Note, NoteId, OperationId,
    SearchResult, Tag, TagCategory,
};

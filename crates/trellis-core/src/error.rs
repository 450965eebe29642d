//! Engine-wide error taxonomy.
//!
//! Errors are classified by how the caller is expected to react rather than
//! by which subsystem produced them. Internal pipelines catch per-item
//! errors, count them, and continue; fatal variants unwind to the
//! initialize/run boundary.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or missing configuration; fatal at boot.
    #[error("configuration error: {0}")]
    Config(String),

    /// Another indexer owns the data directory; fatal at boot.
    #[error("ownership error: {0}")]
    Ownership(String),

    /// An item failed and will keep failing (unreadable file, oversized
    /// input). The surrounding pass skips it and continues.
    #[error("permanent error for {item}: {reason}")]
    PermanentItem { item: String, reason: String },

    /// A call failed but may succeed on retry (timeout, transient I/O).
    #[error("transient error: {0}")]
    TransientItem(String),

    /// Stored state contradicts itself (hash mismatch, audit chain break).
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The caller asked for something that does not exist or is not allowed.
    #[error("caller error: {0}")]
    Caller(String),

    /// The ambient cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn permanent(item: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        EngineError::PermanentItem {
            item: item.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transient(reason: impl std::fmt::Display) -> Self {
        EngineError::TransientItem(reason.to_string())
    }

    pub fn caller(reason: impl std::fmt::Display) -> Self {
        EngineError::Caller(reason.to_string())
    }

    pub fn integrity(reason: impl std::fmt::Display) -> Self {
        EngineError::Integrity(reason.to_string())
    }

    /// Whether a retry of the same call can be expected to help.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientItem(_))
    }

    /// Whether the error must abort initialization entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_) | EngineError::Ownership(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EngineError::transient("timeout").is_transient());
        assert!(!EngineError::caller("nope").is_transient());
    }

    #[test]
    fn fatal_classification() {
        assert!(EngineError::Config("bad path".into()).is_fatal());
        assert!(EngineError::Ownership("locked".into()).is_fatal());
        assert!(!EngineError::permanent("a.md", "io denied").is_fatal());
    }
}

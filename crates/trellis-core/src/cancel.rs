//! Cooperative cancellation flag.
//!
//! Long-running passes (reindex, retrieval) check the flag before each
//! suspension point and bail with [`EngineError::Cancelled`]. Per-note
//! reconciliation commits atomically, so stopping between notes always
//! leaves the stores in a committed state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if the flag has been raised.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_latches() {
        let flag = CancelFlag::new();
        assert!(flag.check().is_ok());

        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(EngineError::Cancelled)));
    }
}

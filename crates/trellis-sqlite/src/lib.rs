//! SQLite backends for the Trellis PKM engine.
//!
//! Two databases live side by side in the data directory: `structured.db`
//! (notes, tags, links, conversations) and `audit.db` (the append-only
//! journal with rollback support). Writers are serialized behind a mutex per
//! connection; readers proceed under WAL.

pub mod audit;
pub mod error;
pub mod store;

pub use audit::{AuditLog, AuditStats, RollbackHandler, RollbackRegistry};
pub use error::StoreError;
pub use store::{StoreStats, StructuredStore};

//! Link graph analysis and healing.
//!
//! The analyzer classifies every link in the vault against a name map built
//! from note stems and extension-less relative paths; the healer suggests
//! fuzzy-matched repairs for broken links and applies them as targeted,
//! audit-journaled text substitutions.

pub mod analyzer;
pub mod healer;

pub use analyzer::{LinkAnalysisResult, LinkAnalyzer};
pub use healer::{HealAction, HealOutcome, HealReport, LinkHealer, LinkSuggestion};

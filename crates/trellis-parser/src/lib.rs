//! Parsing and chunking of markdown notes.
//!
//! [`NoteParser`] turns raw file bytes into a [`trellis_core::Note`] plus the
//! links it contains; [`Chunker`] splits a note body into bounded,
//! self-describing chunks for embedding. Both are pure with respect to their
//! inputs: identical content always yields identical output.

pub mod chunk;
pub mod frontmatter;
pub mod links;
pub mod note;

pub use chunk::{Chunker, ChunkerConfig};
pub use frontmatter::extract_front_matter;
pub use links::extract_links;
pub use note::{NoteParser, ParsedNote};

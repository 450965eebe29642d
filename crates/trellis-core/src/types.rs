//! Data model for notes, chunks, links, and search results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deterministic identifier for a note, derived from its vault-relative path.
///
/// 16 lowercase hex characters; see [`crate::hash::note_id`]. Renaming a note
/// therefore produces a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub(crate) String);

impl NoteId {
    /// Wrap an already-computed identifier (e.g. read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one audit-journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Typed front matter with a string-keyed escape hatch.
///
/// The well-known fields are first-class; anything else a user puts in the
/// YAML block survives round-trips through `extra`. Dates are normalized to
/// ISO-8601 strings at parse time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontMatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FrontMatter {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tags.is_empty()
            && self.created.is_none()
            && self.modified.is_none()
            && self.status.is_none()
            && self.area.is_none()
            && self.project.is_none()
            && self.extra.is_empty()
    }
}

/// A markdown note as tracked by the structured store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    /// Path relative to the vault root, forward slashes.
    pub rel_path: String,
    pub title: String,
    pub body: String,
    pub front_matter: FrontMatter,
    /// Union of front-matter tags and inline `#tags`.
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub word_count: usize,
    /// 16-hex digest of `body`; see [`crate::hash::content_hash`].
    pub content_hash: String,
}

/// Tag provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    User,
    System,
    Auto,
}

impl TagCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagCategory::User => "user",
            TagCategory::System => "system",
            TagCategory::Auto => "auto",
        }
    }
}

/// A tag with its reference count across the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub usage_count: u64,
    pub category: TagCategory,
}

/// Syntactic form of a link found in a note body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Wiki,
    WikiAlias,
    Embed,
    Markdown,
    Tag,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Wiki => "wiki",
            LinkKind::WikiAlias => "wiki_alias",
            LinkKind::Embed => "embed",
            LinkKind::Markdown => "markdown",
            LinkKind::Tag => "tag",
        }
    }
}

/// Resolution state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Valid,
    Broken,
    Ambiguous,
}

/// One link occurrence inside a source note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub source_note: NoteId,
    /// The raw target as written (alias stripped for wiki forms).
    pub target: String,
    pub kind: LinkKind,
    /// 1-based line number.
    pub line: usize,
    /// 0-based column of the match start.
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
    /// Vault-relative path the target resolved to, when valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_target: Option<String>,
    pub status: LinkStatus,
}

/// Metadata carried by every chunk so hits are self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub note_id: NoteId,
    pub title: String,
    pub rel_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    #[serde(default)]
    pub header_level: u8,
}

/// A bounded excerpt of a note body, the atomic unit of semantic retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{note_id}_{index}`.
    pub id: String,
    pub note_id: NoteId,
    pub content: String,
    pub index: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Compose the chunk identifier for a note/index pair.
    pub fn chunk_id(note_id: &NoteId, index: usize) -> String {
        format!("{}_{}", note_id, index)
    }
}

/// A ranked hit returned by keyword, vector, or hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub note_id: NoteId,
    pub rel_path: String,
    pub title: String,
    pub score: f32,
    pub snippet: String,
    #[serde(default)]
    pub highlights: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_composes_note_id_and_index() {
        let note_id = NoteId::from_raw("0123456789abcdef");
        assert_eq!(Chunk::chunk_id(&note_id, 0), "0123456789abcdef_0");
        assert_eq!(Chunk::chunk_id(&note_id, 12), "0123456789abcdef_12");
    }

    #[test]
    fn operation_ids_are_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }

    #[test]
    fn front_matter_default_is_empty() {
        assert!(FrontMatter::default().is_empty());

        let fm = FrontMatter {
            title: Some("Hello".into()),
            ..Default::default()
        };
        assert!(!fm.is_empty());
    }

    #[test]
    fn link_kind_round_trips_through_serde() {
        let json = serde_json::to_string(&LinkKind::WikiAlias).unwrap();
        assert_eq!(json, "\"wiki_alias\"");
        let back: LinkKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LinkKind::WikiAlias);
    }
}

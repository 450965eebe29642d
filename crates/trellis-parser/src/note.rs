//! Note assembly: raw bytes to a [`Note`] plus its links.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use trellis_core::{content_hash, note_id, EngineError, EngineResult, Link, Note};

use crate::frontmatter::{extract_front_matter, parse_date};
use crate::links::extract_links;

/// A parsed note together with the links found in its body.
#[derive(Debug, Clone)]
pub struct ParsedNote {
    pub note: Note,
    pub links: Vec<Link>,
}

/// Parses note files relative to a vault root.
pub struct NoteParser {
    vault_root: PathBuf,
}

impl NoteParser {
    pub fn new(vault_root: impl Into<PathBuf>) -> Self {
        Self {
            vault_root: vault_root.into(),
        }
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// Vault-relative path with forward slashes for an absolute path.
    pub fn rel_path(&self, path: &Path) -> EngineResult<String> {
        let rel = path.strip_prefix(&self.vault_root).map_err(|_| {
            EngineError::caller(format!(
                "path {} is outside the vault root {}",
                path.display(),
                self.vault_root.display()
            ))
        })?;
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }

    /// Read and parse one note file. Invalid UTF-8 is decoded lossily; I/O
    /// failures surface as permanent per-item errors so a scan can skip the
    /// file and continue.
    pub async fn parse_file(&self, path: &Path) -> EngineResult<ParsedNote> {
        let rel_path = self.rel_path(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::permanent(&rel_path, format!("read failed: {e}")))?;
        let raw = String::from_utf8_lossy(&bytes).into_owned();

        let (created_at, modified_at) = file_times(path).await;
        Ok(self.parse_content(&rel_path, &raw, created_at, modified_at))
    }

    /// Parse already-loaded content. Pure: no filesystem access.
    pub fn parse_content(
        &self,
        rel_path: &str,
        raw: &str,
        fs_created: DateTime<Utc>,
        fs_modified: DateTime<Utc>,
    ) -> ParsedNote {
        let (front_matter, body) = extract_front_matter(raw);
        let id = note_id(rel_path);

        let title = resolve_title(&front_matter.title, &body, rel_path);

        let (links, inline_tags) = extract_links(&id, &body);
        let mut tags: BTreeSet<String> = inline_tags;
        tags.extend(front_matter.tags.iter().cloned());

        let created_at = front_matter
            .created
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(fs_created);
        let modified_at = front_matter
            .modified
            .as_deref()
            .and_then(parse_date)
            .unwrap_or(fs_modified);

        let note = Note {
            content_hash: content_hash(&body),
            word_count: body.split_whitespace().count(),
            id,
            rel_path: rel_path.to_string(),
            title,
            body,
            front_matter,
            tags,
            created_at,
            modified_at,
        };

        debug!(rel_path, links = links.len(), "parsed note");
        ParsedNote { note, links }
    }
}

/// Title resolution: front-matter `title`, else the first top-level `# `
/// heading, else the title-cased filename stem.
fn resolve_title(fm_title: &Option<String>, body: &str, rel_path: &str) -> String {
    if let Some(title) = fm_title {
        if !title.trim().is_empty() {
            return title.trim().to_string();
        }
    }

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("# ") {
            let heading = heading.trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }

    let stem = Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| rel_path.to_string());
    title_case(&stem.replace(['-', '_'], " "))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn file_times(path: &Path) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    match tokio::fs::metadata(path).await {
        Ok(meta) => {
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(now);
            let created = meta
                .created()
                .map(DateTime::<Utc>::from)
                .unwrap_or(modified);
            (created, modified)
        }
        Err(_) => (now, now),
    }
}

//! Durable structured store: notes, tags, links, conversations.
//!
//! All writes go through one connection guarded by a mutex. Tag reference
//! counts are maintained on every note upsert/delete so the exposed tag set
//! is always exactly the union of live note tags.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use trellis_core::{Link, LinkKind, LinkStatus, Note, NoteId, SearchResult, Tag, TagCategory};

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id TEXT PRIMARY KEY,
    rel_path TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL DEFAULT '',
    front_matter TEXT,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    word_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_notes_rel_path ON notes(rel_path);
CREATE INDEX IF NOT EXISTS idx_notes_modified ON notes(modified_at DESC);

CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL DEFAULT 'user',
    usage_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name);

CREATE TABLE IF NOT EXISTS note_tags (
    note_id TEXT NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (note_id, tag_id),
    FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_note_tags ON note_tags(note_id, tag_id);

CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    target_spec TEXT NOT NULL,
    kind TEXT NOT NULL,
    line INTEGER NOT NULL,
    col INTEGER NOT NULL,
    display_text TEXT,
    resolved_target TEXT,
    status TEXT NOT NULL,
    FOREIGN KEY (source_id) REFERENCES notes(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_id);
CREATE INDEX IF NOT EXISTS idx_links_target ON links(resolved_target);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    message_count INTEGER NOT NULL DEFAULT 0,
    summary TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    tokens_used INTEGER,
    model TEXT,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_messages_conv ON messages(conversation_id);
"#;

/// Aggregate counts for `stats()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoreStats {
    pub notes: u64,
    pub tags: u64,
    pub links: u64,
    pub total_words: u64,
}

/// SQLite-backed store of notes, tags, links, and conversations.
#[derive(Clone)]
pub struct StructuredStore {
    conn: Arc<Mutex<Connection>>,
}

impl StructuredStore {
    /// Open (or create) the store, applying the schema and WAL mode.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), "opened structured store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a note by identity, replacing its tag associations
    /// in the same transaction.
    pub async fn upsert_note(&self, note: &Note) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO notes (id, rel_path, title, body, content_hash, front_matter,
                               created_at, modified_at, word_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                rel_path = excluded.rel_path,
                title = excluded.title,
                body = excluded.body,
                content_hash = excluded.content_hash,
                front_matter = excluded.front_matter,
                created_at = excluded.created_at,
                modified_at = excluded.modified_at,
                word_count = excluded.word_count
            "#,
            params![
                note.id.as_str(),
                note.rel_path,
                note.title,
                note.body,
                note.content_hash,
                serde_json::to_string(&note.front_matter)?,
                note.created_at.to_rfc3339(),
                note.modified_at.to_rfc3339(),
                note.word_count as i64,
            ],
        )?;

        replace_note_tags(&tx, &note.id, &note.tags)?;
        tx.commit()?;
        debug!(note_id = %note.id, rel_path = %note.rel_path, "upserted note");
        Ok(())
    }

    pub async fn get_note(&self, id: &NoteId) -> Result<Option<Note>, StoreError> {
        let conn = self.conn.lock();
        let note = conn
            .query_row(
                "SELECT id, rel_path, title, body, content_hash, front_matter,
                        created_at, modified_at, word_count
                 FROM notes WHERE id = ?1",
                params![id.as_str()],
                row_to_note,
            )
            .optional()?;
        match note {
            Some(mut note) => {
                note.tags = note_tags(&conn, &note.id)?;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    pub async fn get_note_by_path(&self, rel_path: &str) -> Result<Option<Note>, StoreError> {
        let conn = self.conn.lock();
        let note = conn
            .query_row(
                "SELECT id, rel_path, title, body, content_hash, front_matter,
                        created_at, modified_at, word_count
                 FROM notes WHERE rel_path = ?1",
                params![rel_path],
                row_to_note,
            )
            .optional()?;
        match note {
            Some(mut note) => {
                note.tags = note_tags(&conn, &note.id)?;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    /// All notes, most recently modified first.
    pub async fn all_notes(&self, limit: usize) -> Result<Vec<Note>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, rel_path, title, body, content_hash, front_matter,
                    created_at, modified_at, word_count
             FROM notes ORDER BY modified_at DESC LIMIT ?1",
        )?;
        let mut notes: Vec<Note> = stmt
            .query_map(params![limit as i64], row_to_note)?
            .collect::<Result<_, _>>()?;
        for note in &mut notes {
            note.tags = note_tags(&conn, &note.id)?;
        }
        Ok(notes)
    }

    /// All stored relative paths, for deletion sweeps.
    pub async fn all_note_paths(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT rel_path FROM notes")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        Ok(paths)
    }

    /// Content hash for a note id, without loading the body.
    pub async fn content_hash_of(&self, id: &NoteId) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT content_hash FROM notes WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Delete a note; cascades to its tag associations (decrementing usage
    /// counts) and links. Returns whether a row was deleted.
    pub async fn delete_note(&self, id: &NoteId) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        decrement_tags_for_note(&tx, id)?;
        tx.execute("DELETE FROM links WHERE source_id = ?1", params![id.as_str()])?;
        let deleted = tx.execute("DELETE FROM notes WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;

        debug!(note_id = %id, deleted = deleted > 0, "deleted note");
        Ok(deleted > 0)
    }

    /// Case-insensitive substring search over titles and bodies. Title hits
    /// score higher; a snippet window around the first occurrence is
    /// returned with each hit.
    pub async fn keyword_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let conn = self.conn.lock();
        let pattern = format!("%{}%", query);
        let mut stmt = conn.prepare(
            r#"
            SELECT id, rel_path, title, body,
                   (CASE
                        WHEN title LIKE ?1 THEN 10
                        WHEN body LIKE ?1 THEN 5
                        ELSE 1
                    END) AS score
            FROM notes
            WHERE title LIKE ?1 OR body LIKE ?1
            ORDER BY score DESC, modified_at DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![pattern, k as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, rel_path, title, body, score) = row?;
            results.push(SearchResult {
                note_id: NoteId::from_raw(id),
                rel_path,
                title,
                score: score as f32 / 10.0,
                snippet: snippet_around(&body, query),
                highlights: vec![query.to_string()],
            });
        }
        Ok(results)
    }

    /// Replace the stored links of one source note.
    pub async fn replace_links(
        &self,
        source: &NoteId,
        links: &[Link],
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM links WHERE source_id = ?1",
            params![source.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO links (source_id, target_spec, kind, line, col,
                                    display_text, resolved_target, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for link in links {
                stmt.execute(params![
                    source.as_str(),
                    link.target,
                    link.kind.as_str(),
                    link.line as i64,
                    link.column as i64,
                    link.display_text,
                    link.resolved_target,
                    status_str(link.status),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// All stored links, grouped under their source notes.
    pub async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT source_id, target_spec, kind, line, col,
                    display_text, resolved_target, status
             FROM links",
        )?;
        let links = stmt
            .query_map([], row_to_link)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Tags currently in use, with counts.
    pub async fn all_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, usage_count, category FROM tags
             WHERE usage_count > 0 ORDER BY usage_count DESC, name",
        )?;
        let tags = stmt
            .query_map([], |row| {
                Ok(Tag {
                    name: row.get(0)?,
                    usage_count: row.get::<_, i64>(1)? as u64,
                    category: parse_category(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(tags)
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn.lock();
        let notes: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?;
        let tags: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tags WHERE usage_count > 0",
            [],
            |r| r.get(0),
        )?;
        let links: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?;
        let words: i64 = conn.query_row(
            "SELECT COALESCE(SUM(word_count), 0) FROM notes",
            [],
            |r| r.get(0),
        )?;
        Ok(StoreStats {
            notes: notes as u64,
            tags: tags as u64,
            links: links as u64,
            total_words: words as u64,
        })
    }

    // -- Conversations (used opaquely by the chat collaborator) -----------

    pub async fn create_conversation(&self, conv_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO conversations (id, started_at) VALUES (?1, ?2)",
            params![conv_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub async fn add_message(
        &self,
        conv_id: &str,
        role: &str,
        content: &str,
        tokens_used: Option<u64>,
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (conversation_id, role, content, timestamp, tokens_used, model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                conv_id,
                role,
                content,
                Utc::now().to_rfc3339(),
                tokens_used.map(|t| t as i64),
                model,
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET message_count = message_count + 1 WHERE id = ?1",
            params![conv_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub async fn conversation_messages(
        &self,
        conv_id: &str,
        limit: usize,
    ) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages
             WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut messages: Vec<(String, String)> = stmt
            .query_map(params![conv_id, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<_, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn replace_note_tags(
    tx: &rusqlite::Transaction<'_>,
    note_id: &NoteId,
    tags: &BTreeSet<String>,
) -> Result<(), StoreError> {
    decrement_tags_for_note(tx, note_id)?;
    tx.execute(
        "DELETE FROM note_tags WHERE note_id = ?1",
        params![note_id.as_str()],
    )?;

    for tag in tags {
        tx.execute(
            "INSERT INTO tags (name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![tag, Utc::now().to_rfc3339()],
        )?;
        let tag_id: i64 = tx.query_row(
            "SELECT id FROM tags WHERE name = ?1",
            params![tag],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO note_tags (note_id, tag_id) VALUES (?1, ?2)",
            params![note_id.as_str(), tag_id],
        )?;
        tx.execute(
            "UPDATE tags SET usage_count = usage_count + 1 WHERE id = ?1",
            params![tag_id],
        )?;
    }
    Ok(())
}

fn decrement_tags_for_note(
    tx: &rusqlite::Transaction<'_>,
    note_id: &NoteId,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE tags SET usage_count = usage_count - 1
         WHERE id IN (SELECT tag_id FROM note_tags WHERE note_id = ?1)",
        params![note_id.as_str()],
    )?;
    tx.execute("DELETE FROM tags WHERE usage_count <= 0", [])?;
    Ok(())
}

fn note_tags(conn: &Connection, note_id: &NoteId) -> Result<BTreeSet<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT t.name FROM tags t
         JOIN note_tags nt ON nt.tag_id = t.id
         WHERE nt.note_id = ?1",
    )?;
    let tags = stmt
        .query_map(params![note_id.as_str()], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    Ok(tags)
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    let front_matter: Option<String> = row.get(5)?;
    let created: String = row.get(6)?;
    let modified: String = row.get(7)?;
    Ok(Note {
        id: NoteId::from_raw(row.get::<_, String>(0)?),
        rel_path: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        content_hash: row.get(4)?,
        front_matter: front_matter
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        tags: BTreeSet::new(),
        created_at: parse_timestamp(&created),
        modified_at: parse_timestamp(&modified),
        word_count: row.get::<_, i64>(8)? as usize,
    })
}

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<Link> {
    let kind: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Link {
        source_note: NoteId::from_raw(row.get::<_, String>(0)?),
        target: row.get(1)?,
        kind: parse_kind(&kind),
        line: row.get::<_, i64>(3)? as usize,
        column: row.get::<_, i64>(4)? as usize,
        display_text: row.get(5)?,
        resolved_target: row.get(6)?,
        status: parse_status(&status),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_kind(raw: &str) -> LinkKind {
    match raw {
        "wiki_alias" => LinkKind::WikiAlias,
        "embed" => LinkKind::Embed,
        "markdown" => LinkKind::Markdown,
        "tag" => LinkKind::Tag,
        _ => LinkKind::Wiki,
    }
}

fn status_str(status: LinkStatus) -> &'static str {
    match status {
        LinkStatus::Valid => "valid",
        LinkStatus::Broken => "broken",
        LinkStatus::Ambiguous => "ambiguous",
    }
}

fn parse_status(raw: &str) -> LinkStatus {
    match raw {
        "valid" => LinkStatus::Valid,
        "ambiguous" => LinkStatus::Ambiguous,
        _ => LinkStatus::Broken,
    }
}

fn parse_category(raw: &str) -> TagCategory {
    match raw {
        "system" => TagCategory::System,
        "auto" => TagCategory::Auto,
        _ => TagCategory::User,
    }
}

/// ±50-char window around the first case-insensitive occurrence of `query`.
fn snippet_around(body: &str, query: &str) -> String {
    const WINDOW: usize = 50;
    let lower_body = body.to_lowercase();
    let lower_query = query.to_lowercase();

    match lower_body.find(&lower_query) {
        Some(idx) => {
            let start = floor_char_boundary(body, idx.saturating_sub(WINDOW));
            let end = floor_char_boundary(body, (idx + query.len() + WINDOW).min(body.len()));
            let mut snippet = body[start..end].to_string();
            if start > 0 {
                snippet = format!("...{snippet}");
            }
            if end < body.len() {
                snippet = format!("{snippet}...");
            }
            snippet
        }
        None => {
            let end = floor_char_boundary(body, body.len().min(100));
            let mut snippet = body[..end].to_string();
            if end < body.len() {
                snippet.push_str("...");
            }
            snippet
        }
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

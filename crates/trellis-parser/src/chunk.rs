//! Section-aware chunking of note bodies.
//!
//! The body is split along ATX headings, paragraphs inside each section are
//! assembled up to the target size, fenced code blocks are never split, and
//! oversized paragraphs fall back to sentence splitting. Each chunk is
//! prefixed with a breadcrumb of its enclosing heading so it stands alone as
//! retrieval context.

use once_cell::sync::Lazy;
use regex::Regex;

use trellis_core::{Chunk, ChunkMetadata, Note};

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#{1,6})\s+(.+)$").unwrap());
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").unwrap());
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+\s+").unwrap());

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Preferred chunk length; paragraph assembly stops here.
    pub target_size: usize,
    /// Hard cap; beyond this a paragraph is sentence-split.
    pub max_size: usize,
    /// Bodies shorter than this become a single chunk.
    pub min_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            max_size: 1000,
            min_size: 100,
        }
    }
}

/// Pure chunker: identical input always yields identical chunks.
pub struct Chunker {
    config: ChunkerConfig,
}

struct Section {
    level: u8,
    title: Option<String>,
    content: String,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a note into chunks with breadcrumbs and metadata.
    pub fn chunk_note(&self, note: &Note) -> Vec<Chunk> {
        let body = note.body.trim();
        if body.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut index = 0;

        for section in parse_sections(body) {
            for content in self.split_section(&section.content) {
                let with_breadcrumb = match &section.title {
                    Some(title) => format!("# {title}\n\n{content}"),
                    None => content,
                };
                chunks.push(Chunk {
                    id: Chunk::chunk_id(&note.id, index),
                    note_id: note.id.clone(),
                    content: with_breadcrumb,
                    index,
                    metadata: ChunkMetadata {
                        note_id: note.id.clone(),
                        title: note.title.clone(),
                        rel_path: note.rel_path.clone(),
                        tags: note.tags.iter().cloned().collect(),
                        section_title: section.title.clone(),
                        header_level: section.level,
                    },
                });
                index += 1;
            }
        }

        chunks
    }

    /// Split one section's text into pieces within the size bounds. Fenced
    /// code blocks are masked with opaque placeholders while splitting and
    /// restored afterwards, so a fence is never cut in half.
    fn split_section(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.config.target_size.max(self.config.min_size) {
            return vec![text.to_string()];
        }

        let (masked, fences) = mask_code_fences(text);

        let mut pieces: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0;

        for para in PARAGRAPH_BREAK.split(&masked) {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            if para.len() > self.config.max_size {
                if !current.is_empty() {
                    pieces.push(current.join("\n\n"));
                    current.clear();
                    current_len = 0;
                }
                pieces.extend(self.split_by_sentences(para));
                continue;
            }

            if current_len + para.len() + 2 > self.config.target_size && !current.is_empty() {
                pieces.push(current.join("\n\n"));
                current = vec![para];
                current_len = para.len();
            } else {
                current_len += para.len() + 2;
                current.push(para);
            }
        }
        if !current.is_empty() {
            pieces.push(current.join("\n\n"));
        }

        pieces
            .into_iter()
            .map(|piece| restore_code_fences(piece, &fences))
            .collect()
    }

    /// Sentence-level fallback for a paragraph above the hard cap. A single
    /// sentence longer than the cap is emitted intact rather than cut.
    fn split_by_sentences(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);
        let mut pieces = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_len = 0;

        for sentence in &sentences {
            if current_len + sentence.len() + 1 > self.config.target_size && !current.is_empty() {
                pieces.push(current.join(" "));
                current = vec![sentence];
                current_len = sentence.len();
            } else {
                current_len += sentence.len() + 1;
                current.push(sentence);
            }
        }
        if !current.is_empty() {
            pieces.push(current.join(" "));
        }
        pieces
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

/// Split a body into a flat list of sections along ATX headings. Content
/// before the first heading becomes an untitled preamble section.
fn parse_sections(body: &str) -> Vec<Section> {
    let matches: Vec<_> = HEADING.captures_iter(body).collect();
    if matches.is_empty() {
        return vec![Section {
            level: 0,
            title: None,
            content: body.to_string(),
        }];
    }

    let mut sections = Vec::new();

    let first_start = matches[0].get(0).expect("group 0").start();
    if first_start > 0 {
        let preamble = body[..first_start].trim();
        if !preamble.is_empty() {
            sections.push(Section {
                level: 0,
                title: None,
                content: preamble.to_string(),
            });
        }
    }

    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).expect("group 0");
        let level = caps[1].len() as u8;
        let title = caps[2].trim().to_string();

        let start = whole.end();
        let end = matches
            .get(i + 1)
            .map(|next| next.get(0).expect("group 0").start())
            .unwrap_or(body.len());

        let content = body[start..end].trim();
        if !content.is_empty() {
            sections.push(Section {
                level,
                title: Some(title),
                content: content.to_string(),
            });
        }
    }

    sections
}

fn mask_code_fences(text: &str) -> (String, Vec<String>) {
    let mut fences = Vec::new();
    let masked = CODE_FENCE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let placeholder = format!("\u{0}CODE{}\u{0}", fences.len());
            fences.push(caps[0].to_string());
            placeholder
        })
        .into_owned();
    (masked, fences)
}

fn restore_code_fences(mut piece: String, fences: &[String]) -> String {
    for (i, fence) in fences.iter().enumerate() {
        let placeholder = format!("\u{0}CODE{i}\u{0}");
        if piece.contains(&placeholder) {
            piece = piece.replace(&placeholder, fence);
        }
    }
    piece
}

/// Split text at sentence terminators followed by whitespace, keeping the
/// terminators attached.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for m in SENTENCE_END.find_iter(text) {
        let end = m.end();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(text[start..end].trim());
        }
        start = end;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trellis_core::{note_id, FrontMatter, Note};

    fn make_note(body: &str) -> Note {
        let now = Utc::now();
        Note {
            id: note_id("test.md"),
            rel_path: "test.md".to_string(),
            title: "Test".to_string(),
            body: body.to_string(),
            front_matter: FrontMatter::default(),
            tags: Default::default(),
            created_at: now,
            modified_at: now,
            word_count: body.split_whitespace().count(),
            content_hash: trellis_core::content_hash(body),
        }
    }

    #[test]
    fn empty_body_yields_no_chunks() {
        let chunks = Chunker::default().chunk_note(&make_note(""));
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_body_is_one_chunk() {
        let chunks = Chunker::default().chunk_note(&make_note("Just a little text."));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].id, format!("{}_0", note_id("test.md")));
    }

    #[test]
    fn sections_get_breadcrumbs() {
        let body = "# Alpha\n\nContent under alpha.\n\n## Beta\n\nContent under beta.";
        let chunks = Chunker::default().chunk_note(&make_note(body));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.starts_with("# Alpha\n\n"));
        assert!(chunks[1].content.starts_with("# Beta\n\n"));
        assert_eq!(chunks[0].metadata.section_title.as_deref(), Some("Alpha"));
        assert_eq!(chunks[1].metadata.header_level, 2);
    }

    #[test]
    fn preamble_before_first_heading_has_no_breadcrumb() {
        let body = "Intro text before any heading.\n\n# First\n\nSection content.";
        let chunks = Chunker::default().chunk_note(&make_note(body));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.section_title, None);
        assert!(chunks[0].content.starts_with("Intro text"));
    }

    #[test]
    fn indexes_are_monotone() {
        let body = "# A\n\nOne.\n\n# B\n\nTwo.\n\n# C\n\nThree.";
        let chunks = Chunker::default().chunk_note(&make_note(body));
        let indexes: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    #[test]
    fn long_sections_split_at_paragraphs() {
        let para = "Sentence one is here. ".repeat(10); // ~220 chars
        let body = format!("# Long\n\n{para}\n\n{para}\n\n{para}\n\n{para}");
        let chunks = Chunker::default().chunk_note(&make_note(&body));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // breadcrumb + content stays near the target, never past the cap
            assert!(chunk.content.len() <= 1000 + "# Long\n\n".len());
        }
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sentences() {
        let para = "This sentence is part of a very long paragraph. ".repeat(30); // ~1.4k
        let body = format!("# Big\n\n{para}");
        let chunks = Chunker::default().chunk_note(&make_note(&body));
        assert!(chunks.len() > 1);
    }

    #[test]
    fn single_oversized_sentence_is_emitted_intact() {
        let sentence = format!("{}.", "word ".repeat(300).trim_end());
        let chunks = Chunker::default().chunk_note(&make_note(&sentence));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("word word"));
    }

    #[test]
    fn code_fences_are_never_split() {
        let code = format!("```rust\n{}\n```", "let x = 1;\n".repeat(150));
        assert!(code.len() > 1000);
        let body = format!("# Code\n\n{code}");
        let chunks = Chunker::default().chunk_note(&make_note(&body));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("```rust"));
        assert!(chunks[0].content.ends_with("```"));
        assert!(!chunks[0].content.contains('\u{0}'));
    }

    #[test]
    fn chunking_is_deterministic() {
        let body = "# A\n\nSome text here.\n\n## B\n\nMore text follows in this section.";
        let note = make_note(body);
        let first = Chunker::default().chunk_note(&note);
        let second = Chunker::default().chunk_note(&note);
        assert_eq!(first, second);
    }

    #[test]
    fn metadata_carries_note_fields() {
        let mut note = make_note("# Section\n\nBody text.");
        note.tags.insert("topic".to_string());
        let chunks = Chunker::default().chunk_note(&note);
        assert_eq!(chunks[0].metadata.rel_path, "test.md");
        assert_eq!(chunks[0].metadata.title, "Test");
        assert_eq!(chunks[0].metadata.tags, vec!["topic"]);
    }
}

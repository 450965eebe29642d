//! Link and tag extraction from note bodies.
//!
//! Recognized forms, in extraction order: embeds `![[target]]`, wiki links
//! `[[target|alias?]]` (with embeds masked out first so they are not counted
//! twice), markdown links `[text](target)` (external URLs skipped), and
//! inline `#tags`. Positions are 1-based lines and 0-based columns.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use trellis_core::{Link, LinkKind, LinkStatus, NoteId};

static EMBED: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\[([^\]]+)\]\]").unwrap());
static WIKI: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[([^\]]+)\]\]").unwrap());
static MARKDOWN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\s)(#[A-Za-z0-9_/-]+)").unwrap());

const EXTERNAL_SCHEMES: &[&str] = &["http://", "https://", "ftp://", "mailto:", "data:"];

/// Extract all links and inline tags from a note body.
pub fn extract_links(source_note: &NoteId, body: &str) -> (Vec<Link>, BTreeSet<String>) {
    let mut links = Vec::new();
    let mut tags = BTreeSet::new();

    for (line_idx, line) in body.lines().enumerate() {
        let line_no = line_idx + 1;

        // Embeds first: they contain the wiki pattern
        for caps in EMBED.captures_iter(line) {
            let whole = caps.get(0).expect("match always has group 0");
            let (target, alias) = split_alias(&caps[1]);
            links.push(Link {
                source_note: source_note.clone(),
                target,
                kind: LinkKind::Embed,
                line: line_no,
                column: whole.start(),
                display_text: alias,
                resolved_target: None,
                status: LinkStatus::Broken,
            });
        }

        // Mask embeds with same-length padding so wiki columns stay accurate
        let masked = mask_matches(line, &EMBED);

        for caps in WIKI.captures_iter(&masked) {
            let whole = caps.get(0).expect("match always has group 0");
            let (target, alias) = split_alias(&caps[1]);
            let kind = if alias.is_some() {
                LinkKind::WikiAlias
            } else {
                LinkKind::Wiki
            };
            links.push(Link {
                source_note: source_note.clone(),
                target,
                kind,
                line: line_no,
                column: whole.start(),
                display_text: alias,
                resolved_target: None,
                status: LinkStatus::Broken,
            });
        }

        for caps in MARKDOWN.captures_iter(&masked) {
            let whole = caps.get(0).expect("match always has group 0");
            let display = caps[1].to_string();
            let target = caps[2].trim().to_string();
            if is_external(&target) {
                continue;
            }
            links.push(Link {
                source_note: source_note.clone(),
                target,
                kind: LinkKind::Markdown,
                line: line_no,
                column: whole.start(),
                display_text: Some(display),
                resolved_target: None,
                status: LinkStatus::Broken,
            });
        }

        for caps in TAG.captures_iter(line) {
            let tag_match = caps.get(1).expect("tag group always present");
            let name = tag_match.as_str().trim_start_matches('#').to_string();
            links.push(Link {
                source_note: source_note.clone(),
                target: name.clone(),
                kind: LinkKind::Tag,
                line: line_no,
                column: tag_match.start(),
                display_text: None,
                resolved_target: None,
                status: LinkStatus::Valid,
            });
            tags.insert(name);
        }
    }

    (links, tags)
}

fn split_alias(inner: &str) -> (String, Option<String>) {
    match inner.split_once('|') {
        Some((target, alias)) => (target.trim().to_string(), Some(alias.trim().to_string())),
        None => (inner.trim().to_string(), None),
    }
}

fn is_external(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    EXTERNAL_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

fn mask_matches(line: &str, pattern: &Regex) -> String {
    let mut masked = line.to_string();
    for m in pattern.find_iter(line) {
        masked.replace_range(m.range(), &" ".repeat(m.len()));
    }
    masked
}

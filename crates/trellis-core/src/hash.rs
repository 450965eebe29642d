//! Content-addressable hashing for note identity and change detection.
//!
//! Both digests are SHA-256 truncated to 16 hex characters, stable across
//! runs and platforms. Path separators are normalized to forward slashes
//! before hashing so the same note hashes identically on Windows and Unix.

use sha2::{Digest, Sha256};

use crate::types::NoteId;

const DIGEST_HEX_LEN: usize = 16;

fn short_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..DIGEST_HEX_LEN].to_string()
}

/// Compute the [`NoteId`] for a vault-relative path.
pub fn note_id(rel_path: &str) -> NoteId {
    let normalized = rel_path.replace('\\', "/");
    NoteId(short_sha256(&normalized))
}

/// Compute the content hash of a note body.
pub fn content_hash(body: &str) -> String {
    short_sha256(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_id_is_deterministic() {
        assert_eq!(note_id("notes/a.md"), note_id("notes/a.md"));
        assert_ne!(note_id("notes/a.md"), note_id("notes/b.md"));
    }

    #[test]
    fn note_id_normalizes_separators() {
        assert_eq!(note_id("notes\\a.md"), note_id("notes/a.md"));
    }

    #[test]
    fn digests_are_16_hex_chars() {
        let id = note_id("some/path.md");
        assert_eq!(id.as_str().len(), 16);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));

        let hash = content_hash("body text");
        assert_eq!(hash.len(), 16);
    }

    #[test]
    fn content_hash_tracks_body_changes() {
        let a = content_hash("alpha");
        let b = content_hash("beta");
        assert_ne!(a, b);
        assert_eq!(a, content_hash("alpha"));
    }
}

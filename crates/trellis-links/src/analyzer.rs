//! Vault-wide link classification and graph statistics.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use trellis_core::{note_id, EngineError, EngineResult, Link, LinkKind, LinkStatus};
use trellis_parser::extract_links;

const HUB_LIMIT: usize = 10;

/// Result of analyzing a vault snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAnalysisResult {
    /// All non-tag links found.
    pub total_links: usize,
    pub broken_links: Vec<Link>,
    /// Notes with no incoming non-tag links.
    pub orphan_notes: Vec<String>,
    /// Top notes by incoming degree, `(rel_path, count)`.
    pub hub_notes: Vec<(String, usize)>,
    /// Forward adjacency: source rel_path to resolved target rel_paths.
    pub graph: BTreeMap<String, BTreeSet<String>>,
}

/// Builds the note name map and classifies links against it.
pub struct LinkAnalyzer {
    vault_root: PathBuf,
    /// Lookup keys (stem and extension-less relative path) to rel_path.
    name_map: HashMap<String, String>,
}

impl LinkAnalyzer {
    /// Scan the vault and build the name map. Deterministic for a given
    /// snapshot of files.
    pub fn build(vault_root: &Path) -> EngineResult<Self> {
        if !vault_root.is_dir() {
            return Err(EngineError::Config(format!(
                "vault root does not exist: {}",
                vault_root.display()
            )));
        }

        let mut name_map = HashMap::new();
        for rel_path in note_files(vault_root) {
            let without_ext = rel_path.trim_end_matches(".md").to_string();
            if let Some(stem) = Path::new(&rel_path).file_stem().and_then(|s| s.to_str()) {
                name_map.insert(stem.to_string(), rel_path.clone());
            }
            name_map.insert(without_ext, rel_path.clone());
        }

        info!(entries = name_map.len(), "built note name map");
        Ok(Self {
            vault_root: vault_root.to_path_buf(),
            name_map,
        })
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// Candidate names for fuzzy repair suggestions.
    pub fn candidate_names(&self) -> impl Iterator<Item = &str> {
        self.name_map.keys().map(|k| k.as_str())
    }

    /// All note files in the vault, relative and sorted.
    pub fn note_paths(&self) -> Vec<String> {
        note_files(&self.vault_root)
    }

    pub fn resolve_name(&self, name: &str) -> Option<&str> {
        self.name_map
            .get(name)
            .or_else(|| self.name_map.get(name.trim_end_matches(".md")))
            .map(|s| s.as_str())
    }

    /// Classify one link, filling `status` and `resolved_target`.
    pub fn classify(&self, link: &mut Link, source_rel_path: &str) {
        match link.kind {
            // Tags point at nothing; always valid
            LinkKind::Tag => link.status = LinkStatus::Valid,
            LinkKind::Wiki | LinkKind::WikiAlias | LinkKind::Embed => {
                match self.resolve_name(&link.target) {
                    Some(rel_path) => {
                        link.status = LinkStatus::Valid;
                        link.resolved_target = Some(rel_path.to_string());
                    }
                    None => link.status = LinkStatus::Broken,
                }
            }
            LinkKind::Markdown => {
                let source_dir = Path::new(source_rel_path)
                    .parent()
                    .unwrap_or_else(|| Path::new(""));
                let joined = self.vault_root.join(source_dir).join(&link.target);
                match normalize_within(&joined, &self.vault_root) {
                    Some(resolved) if self.vault_root.join(&resolved).exists() => {
                        link.status = LinkStatus::Valid;
                        link.resolved_target = Some(resolved);
                    }
                    _ => link.status = LinkStatus::Broken,
                }
            }
        }
    }

    /// Extract and classify all links of one file.
    pub async fn links_in_file(&self, rel_path: &str) -> EngineResult<Vec<Link>> {
        let abs = self.vault_root.join(rel_path);
        let bytes = tokio::fs::read(&abs)
            .await
            .map_err(|e| EngineError::permanent(rel_path, format!("read failed: {e}")))?;
        let content = String::from_utf8_lossy(&bytes);

        let (mut links, _tags) = extract_links(&note_id(rel_path), &content);
        for link in &mut links {
            self.classify(link, rel_path);
        }
        Ok(links)
    }

    /// Broken links in one file, or across the whole vault.
    pub async fn find_broken_links(&self, rel_path: Option<&str>) -> EngineResult<Vec<Link>> {
        let files: Vec<String> = match rel_path {
            Some(rel) => vec![rel.to_string()],
            None => note_files(&self.vault_root),
        };

        let mut broken = Vec::new();
        for file in files {
            match self.links_in_file(&file).await {
                Ok(links) => {
                    broken.extend(
                        links
                            .into_iter()
                            .filter(|l| l.status == LinkStatus::Broken),
                    );
                }
                Err(err) => warn!(file, "skipping file during link check: {err}"),
            }
        }
        Ok(broken)
    }

    /// Full vault analysis: totals, broken links, orphans, hubs, adjacency.
    pub async fn analyze_vault(&self) -> EngineResult<LinkAnalysisResult> {
        let files = note_files(&self.vault_root);
        let mut total_links = 0;
        let mut broken_links = Vec::new();
        let mut graph: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut incoming: HashMap<String, usize> = HashMap::new();

        for rel_path in &files {
            let links = match self.links_in_file(rel_path).await {
                Ok(links) => links,
                Err(err) => {
                    warn!(rel_path, "skipping file during analysis: {err}");
                    continue;
                }
            };

            for link in links {
                if link.kind == LinkKind::Tag {
                    continue;
                }
                total_links += 1;
                match (&link.status, &link.resolved_target) {
                    (LinkStatus::Valid, Some(target)) => {
                        // Self-links do not count toward incoming degree
                        if target != rel_path {
                            *incoming.entry(target.clone()).or_default() += 1;
                        }
                        graph
                            .entry(rel_path.clone())
                            .or_default()
                            .insert(target.clone());
                    }
                    _ => broken_links.push(link),
                }
            }
        }

        let orphan_notes: Vec<String> = files
            .iter()
            .filter(|f| !incoming.contains_key(*f))
            .cloned()
            .collect();

        let mut hub_notes: Vec<(String, usize)> = incoming.into_iter().collect();
        hub_notes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hub_notes.truncate(HUB_LIMIT);

        debug!(
            total_links,
            broken = broken_links.len(),
            orphans = orphan_notes.len(),
            "vault link analysis complete"
        );

        Ok(LinkAnalysisResult {
            total_links,
            broken_links,
            orphan_notes,
            hub_notes,
            graph,
        })
    }
}

/// All note files under the root, vault-relative with forward slashes,
/// sorted for determinism.
fn note_files(vault_root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(vault_root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !is_ignored_dir(name))
                .unwrap_or(true)
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|e| e.to_str()) == Some("md"))
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(vault_root)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .collect();
    files.sort();
    files
}

fn is_ignored_dir(name: &str) -> bool {
    matches!(
        name,
        ".git" | ".obsidian" | ".pkm-agent" | ".trellis" | "node_modules" | "__pycache__"
            | ".venv" | "venv"
    )
}

/// Lexically normalize `path` and return it relative to `root`, or `None`
/// when it escapes the root.
fn normalize_within(path: &Path, root: &Path) -> Option<String> {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                parts.pop()?;
            }
            std::path::Component::CurDir => {}
            other => parts.push(other.as_os_str().to_os_string()),
        }
    }
    let normalized: PathBuf = parts.iter().collect();
    normalized
        .strip_prefix(root)
        .ok()
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::test_support::create_vault;

    #[tokio::test]
    async fn wiki_links_resolve_by_stem_and_path() {
        let vault = create_vault(&[
            ("Target.md", "# Target"),
            ("sub/Nested.md", "# Nested"),
            (
                "Source.md",
                "See [[Target]] and [[sub/Nested]] and [[Missing]].",
            ),
        ])
        .unwrap();

        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();
        let links = analyzer.links_in_file("Source.md").await.unwrap();

        let by_target: HashMap<&str, &Link> =
            links.iter().map(|l| (l.target.as_str(), l)).collect();
        assert_eq!(by_target["Target"].status, LinkStatus::Valid);
        assert_eq!(
            by_target["Target"].resolved_target.as_deref(),
            Some("Target.md")
        );
        assert_eq!(by_target["sub/Nested"].status, LinkStatus::Valid);
        assert_eq!(by_target["Missing"].status, LinkStatus::Broken);
    }

    #[tokio::test]
    async fn markdown_links_resolve_relative_to_source() {
        let vault = create_vault(&[
            ("docs/Source.md", "[up](../Top.md) and [gone](./missing.md)"),
            ("Top.md", "# Top"),
        ])
        .unwrap();

        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();
        let links = analyzer.links_in_file("docs/Source.md").await.unwrap();

        assert_eq!(links[0].status, LinkStatus::Valid);
        assert_eq!(links[0].resolved_target.as_deref(), Some("Top.md"));
        assert_eq!(links[1].status, LinkStatus::Broken);
    }

    #[tokio::test]
    async fn markdown_links_escaping_vault_are_broken() {
        let vault = create_vault(&[("Source.md", "[escape](../../etc/passwd)")]).unwrap();
        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();
        let links = analyzer.links_in_file("Source.md").await.unwrap();
        assert_eq!(links[0].status, LinkStatus::Broken);
    }

    #[tokio::test]
    async fn tags_are_always_valid() {
        let vault = create_vault(&[("Source.md", "Tagged #idea here")]).unwrap();
        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();
        let links = analyzer.links_in_file("Source.md").await.unwrap();
        assert_eq!(links[0].kind, LinkKind::Tag);
        assert_eq!(links[0].status, LinkStatus::Valid);
    }

    #[tokio::test]
    async fn analyze_reports_orphans_and_hubs() {
        let vault = create_vault(&[
            ("Hub.md", "# Hub"),
            ("A.md", "[[Hub]]"),
            ("B.md", "[[Hub]]"),
            ("Lonely.md", "# Nobody links here"),
        ])
        .unwrap();

        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();
        let result = analyzer.analyze_vault().await.unwrap();

        assert_eq!(result.total_links, 2);
        assert!(result.broken_links.is_empty());
        assert_eq!(result.hub_notes[0], ("Hub.md".to_string(), 2));
        assert!(result.orphan_notes.contains(&"Lonely.md".to_string()));
        assert!(result.orphan_notes.contains(&"A.md".to_string()));
        assert!(!result.orphan_notes.contains(&"Hub.md".to_string()));
        assert_eq!(
            result.graph["A.md"],
            BTreeSet::from(["Hub.md".to_string()])
        );
    }

    #[tokio::test]
    async fn broken_links_found_per_file_and_vault_wide() {
        let vault = create_vault(&[
            ("One.md", "See [[Pythn]] for details."),
            ("Two.md", "All good: [[One]]"),
        ])
        .unwrap();

        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();

        let all = analyzer.find_broken_links(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].target, "Pythn");

        let scoped = analyzer.find_broken_links(Some("Two.md")).await.unwrap();
        assert!(scoped.is_empty());
    }
}

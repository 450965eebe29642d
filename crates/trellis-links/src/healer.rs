//! Fuzzy-match repair of broken links.
//!
//! Suggestions score every candidate note name against the broken target
//! (subsequence similarity plus prefix/suffix/word-overlap bonuses) and are
//! only emitted above a confidence floor. Applying a fix is a targeted
//! substitution at the link's recorded line and column; each file rewrite
//! is one audit entry carrying full before/after snapshots.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use trellis_core::{
    AuditAction, AuditEntry, AuditSink, EngineError, EngineResult, Link, LinkKind, OperationId,
};

use crate::analyzer::LinkAnalyzer;

/// A proposed repair for one broken link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSuggestion {
    pub target: String,
    pub suggested: String,
    pub confidence: f32,
    pub reason: String,
}

/// What happened to one broken link during healing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealAction {
    Fixed,
    Simulated,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealOutcome {
    pub link: Link,
    pub action: HealAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<LinkSuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch healing report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealReport {
    pub dry_run: bool,
    pub fixed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<HealOutcome>,
}

pub struct LinkHealer {
    analyzer: LinkAnalyzer,
    audit: Arc<dyn AuditSink>,
    min_confidence: f32,
}

impl LinkHealer {
    pub fn new(analyzer: LinkAnalyzer, audit: Arc<dyn AuditSink>, min_confidence: f32) -> Self {
        Self {
            analyzer,
            audit,
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    pub fn analyzer(&self) -> &LinkAnalyzer {
        &self.analyzer
    }

    /// Best repair candidate for a broken link, if any clears the
    /// confidence floor.
    pub fn suggest_fix(&self, link: &Link) -> Option<LinkSuggestion> {
        let target_lower = link.target.to_lowercase();
        let target_words: BTreeSet<&str> = target_lower.split_whitespace().collect();

        let mut best: Option<(f32, &str)> = None;
        for candidate in self.analyzer.candidate_names() {
            let candidate_lower = candidate.to_lowercase();
            let mut score = subsequence_ratio(&target_lower, &candidate_lower);

            if candidate_lower.starts_with(&target_lower) {
                score += 0.2;
            }
            if candidate_lower.ends_with(&target_lower) {
                score += 0.1;
            }
            let candidate_words: BTreeSet<&str> = candidate_lower.split_whitespace().collect();
            let overlap = target_words.intersection(&candidate_words).count();
            if overlap > 0 {
                score += (overlap as f32 / target_words.len().max(1) as f32) * 0.3;
            }

            let better = match best {
                None => true,
                Some((best_score, best_name)) => {
                    score > best_score || (score == best_score && candidate < best_name)
                }
            };
            if better {
                best = Some((score, candidate));
            }
        }

        let (score, name) = best?;
        if score < self.min_confidence {
            return None;
        }
        Some(LinkSuggestion {
            target: link.target.clone(),
            suggested: name.to_string(),
            confidence: score,
            reason: format!("fuzzy match (similarity {:.0}%)", score * 100.0),
        })
    }

    /// Repair one broken link in its source file. `dry_run` simulates
    /// without touching the file or the journal.
    pub async fn heal_link(
        &self,
        link: &Link,
        suggestion: &LinkSuggestion,
        dry_run: bool,
    ) -> HealOutcome {
        match self.apply_substitution(link, suggestion, dry_run).await {
            Ok(operation_id) => HealOutcome {
                link: link.clone(),
                action: if dry_run {
                    HealAction::Simulated
                } else {
                    HealAction::Fixed
                },
                suggestion: Some(suggestion.clone()),
                operation_id,
                error: None,
            },
            Err(err) => {
                warn!(target = %link.target, "link heal failed: {err}");
                HealOutcome {
                    link: link.clone(),
                    action: HealAction::Failed,
                    suggestion: Some(suggestion.clone()),
                    operation_id: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn apply_substitution(
        &self,
        link: &Link,
        suggestion: &LinkSuggestion,
        dry_run: bool,
    ) -> EngineResult<Option<OperationId>> {
        let (old_pattern, new_pattern) = patterns_for(link, suggestion)?;

        let source_rel = self.source_rel_path(link)?;
        let abs_path = self.analyzer.vault_root().join(&source_rel);
        let original = tokio::fs::read_to_string(&abs_path)
            .await
            .map_err(|e| EngineError::permanent(&source_rel, format!("read failed: {e}")))?;

        let mut lines: Vec<&str> = original.split('\n').collect();
        let line_idx = link
            .line
            .checked_sub(1)
            .filter(|idx| *idx < lines.len())
            .ok_or_else(|| {
                EngineError::caller(format!(
                    "line {} out of range in {source_rel}",
                    link.line
                ))
            })?;

        let line = lines[line_idx];
        let new_line = substitute_at(line, link.column, &old_pattern, &new_pattern)
            .ok_or_else(|| {
                EngineError::caller(format!(
                    "pattern {old_pattern:?} not found at {source_rel}:{}",
                    link.line
                ))
            })?;

        if dry_run {
            debug!(%source_rel, line = link.line, "dry run, would fix link");
            return Ok(None);
        }

        lines[line_idx] = &new_line;
        let updated = lines.join("\n");

        // Journal first; the mutation is only acknowledged once the entry
        // with the full before/after snapshots is durable
        let entry = AuditEntry::new(AuditAction::RewriteFile, Some(source_rel.clone()))
            .with_snapshots(Some(original.clone()), Some(updated.clone()))
            .with_metadata(serde_json::json!({
                "line": link.line,
                "old_target": link.target,
                "new_path": suggestion.suggested,
            }));
        let op_id = self.audit.log(entry).await?;

        tokio::fs::write(&abs_path, &updated)
            .await
            .map_err(|e| EngineError::permanent(&source_rel, format!("write failed: {e}")))?;
        info!(%source_rel, line = link.line, "fixed link");
        Ok(Some(op_id))
    }

    fn source_rel_path(&self, link: &Link) -> EngineResult<String> {
        self.analyzer
            .note_paths()
            .into_iter()
            .find(|candidate| trellis_core::note_id(candidate) == link.source_note)
            .ok_or_else(|| {
                EngineError::caller(format!("unknown source note {}", link.source_note))
            })
    }

    /// Heal every broken link in one file or the whole vault.
    pub async fn heal(
        &self,
        rel_path: Option<&str>,
        dry_run: bool,
    ) -> EngineResult<HealReport> {
        let broken = self.analyzer.find_broken_links(rel_path).await?;
        let mut report = HealReport {
            dry_run,
            ..Default::default()
        };

        for link in broken {
            let outcome = match self.suggest_fix(&link) {
                Some(suggestion) => self.heal_link(&link, &suggestion, dry_run).await,
                None => HealOutcome {
                    link: link.clone(),
                    action: HealAction::Skipped,
                    suggestion: None,
                    operation_id: None,
                    error: Some("no suggestion above confidence threshold".to_string()),
                },
            };

            match outcome.action {
                HealAction::Fixed | HealAction::Simulated => report.fixed += 1,
                HealAction::Skipped => report.skipped += 1,
                HealAction::Failed => report.failed += 1,
            }
            report.outcomes.push(outcome);
        }

        info!(
            dry_run,
            fixed = report.fixed,
            skipped = report.skipped,
            failed = report.failed,
            "link healing pass complete"
        );
        Ok(report)
    }
}

/// The exact old/new text for each repairable link kind.
fn patterns_for(link: &Link, suggestion: &LinkSuggestion) -> EngineResult<(String, String)> {
    let (old, new) = (&link.target, &suggestion.suggested);
    match link.kind {
        LinkKind::Wiki => Ok((format!("[[{old}]]"), format!("[[{new}]]"))),
        LinkKind::WikiAlias => {
            let alias = link.display_text.as_deref().unwrap_or("");
            Ok((
                format!("[[{old}|{alias}]]"),
                format!("[[{new}|{alias}]]"),
            ))
        }
        LinkKind::Embed => match &link.display_text {
            Some(alias) => Ok((
                format!("![[{old}|{alias}]]"),
                format!("![[{new}|{alias}]]"),
            )),
            None => Ok((format!("![[{old}]]"), format!("![[{new}]]"))),
        },
        LinkKind::Markdown => match &link.display_text {
            Some(display) => Ok((
                format!("[{display}]({old})"),
                format!("[{display}]({new})"),
            )),
            // Without display text there is not enough context for a safe
            // substitution
            None => Err(EngineError::caller(
                "markdown link without display text cannot be rewritten",
            )),
        },
        LinkKind::Tag => Err(EngineError::caller("tags are not repairable")),
    }
}

/// Replace `old` with `new` at the recorded column, falling back to the
/// first occurrence in the line when the column has drifted. Returns `None`
/// when the pattern is absent from the line.
fn substitute_at(line: &str, column: usize, old: &str, new: &str) -> Option<String> {
    if line.get(column..)?.starts_with(old) {
        let mut out = String::with_capacity(line.len() + new.len());
        out.push_str(&line[..column]);
        out.push_str(new);
        out.push_str(&line[column + old.len()..]);
        return Some(out);
    }
    if line.contains(old) {
        return Some(line.replacen(old, new, 1));
    }
    None
}

/// Similarity of two strings as matched-character ratio over a longest
/// common subsequence, like difflib's ratio.
fn subsequence_ratio(a: &str, b: &str) -> f32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b_chars.len() + 1];
    let mut current = vec![0usize; b_chars.len() + 1];
    for &ca in &a_chars {
        for (j, &cb) in b_chars.iter().enumerate() {
            current[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    let lcs = prev[b_chars.len()];
    (2.0 * lcs as f32) / (a_chars.len() + b_chars.len()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::test_support::{create_vault, MemoryAuditSink};

    fn healer_for(vault: &tempfile::TempDir, min_confidence: f32) -> (LinkHealer, Arc<MemoryAuditSink>) {
        let analyzer = LinkAnalyzer::build(vault.path()).unwrap();
        let audit = Arc::new(MemoryAuditSink::new());
        (
            LinkHealer::new(analyzer, audit.clone(), min_confidence),
            audit,
        )
    }

    #[test]
    fn subsequence_ratio_behaves() {
        assert_eq!(subsequence_ratio("abc", "abc"), 1.0);
        assert!(subsequence_ratio("pythn", "python") > 0.85);
        assert!(subsequence_ratio("pythn", "cooking") < 0.3);
        assert_eq!(subsequence_ratio("", "anything"), 0.0);
    }

    #[tokio::test]
    async fn suggests_close_match_above_threshold() {
        let vault = create_vault(&[
            ("Python.md", "# Python"),
            ("Source.md", "See [[Pythn]] for details."),
        ])
        .unwrap();
        let (healer, _) = healer_for(&vault, 0.7);

        let broken = healer.analyzer().find_broken_links(None).await.unwrap();
        assert_eq!(broken.len(), 1);

        let suggestion = healer.suggest_fix(&broken[0]).unwrap();
        assert_eq!(suggestion.suggested, "Python");
        assert!(suggestion.confidence >= 0.7);
    }

    #[tokio::test]
    async fn no_suggestion_for_hopeless_targets() {
        let vault = create_vault(&[
            ("Cooking.md", "# Cooking"),
            ("Source.md", "See [[zzqqxxyy]]."),
        ])
        .unwrap();
        let (healer, _) = healer_for(&vault, 0.7);

        let broken = healer.analyzer().find_broken_links(None).await.unwrap();
        assert!(healer.suggest_fix(&broken[0]).is_none());
    }

    #[tokio::test]
    async fn heal_rewrites_file_and_journals() {
        let vault = create_vault(&[
            ("Python.md", "# Python"),
            ("Source.md", "See [[Pythn]] for details."),
        ])
        .unwrap();
        let (healer, audit) = healer_for(&vault, 0.7);

        let report = healer.heal(None, false).await.unwrap();
        assert_eq!(report.fixed, 1);
        assert_eq!(report.failed, 0);

        let contents = std::fs::read_to_string(vault.path().join("Source.md")).unwrap();
        assert_eq!(contents, "See [[Python]] for details.");

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::RewriteFile);
        assert_eq!(
            entries[0].snapshot_before.as_deref(),
            Some("See [[Pythn]] for details.")
        );
        assert_eq!(
            entries[0].snapshot_after.as_deref(),
            Some("See [[Python]] for details.")
        );
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let vault = create_vault(&[
            ("Python.md", "# Python"),
            ("Source.md", "See [[Pythn]]."),
        ])
        .unwrap();
        let (healer, audit) = healer_for(&vault, 0.7);

        let report = healer.heal(None, true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.fixed, 1);
        assert_eq!(report.outcomes[0].action, HealAction::Simulated);

        let contents = std::fs::read_to_string(vault.path().join("Source.md")).unwrap();
        assert_eq!(contents, "See [[Pythn]].");
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn alias_links_keep_their_alias() {
        let vault = create_vault(&[
            ("Python.md", "# Python"),
            ("Source.md", "See [[Pythn|the snake]]."),
        ])
        .unwrap();
        let (healer, _) = healer_for(&vault, 0.7);

        let report = healer.heal(None, false).await.unwrap();
        assert_eq!(report.fixed, 1);

        let contents = std::fs::read_to_string(vault.path().join("Source.md")).unwrap();
        assert_eq!(contents, "See [[Python|the snake]].");
    }

    #[tokio::test]
    async fn markdown_without_display_text_is_unrepairable() {
        let link = Link {
            source_note: trellis_core::note_id("s.md"),
            target: "old.md".into(),
            kind: LinkKind::Markdown,
            line: 1,
            column: 0,
            display_text: None,
            resolved_target: None,
            status: trellis_core::LinkStatus::Broken,
        };
        let suggestion = LinkSuggestion {
            target: "old.md".into(),
            suggested: "new.md".into(),
            confidence: 1.0,
            reason: "test".into(),
        };
        assert!(patterns_for(&link, &suggestion).is_err());
    }

    #[tokio::test]
    async fn pattern_drift_is_reported_not_fatal() {
        let vault = create_vault(&[
            ("Python.md", "# Python"),
            ("Source.md", "See [[Pythn]]."),
        ])
        .unwrap();
        let (healer, _) = healer_for(&vault, 0.7);

        let mut broken = healer.analyzer().find_broken_links(None).await.unwrap();
        // Simulate the file changing between analysis and healing
        broken[0].line = 999;
        let suggestion = healer.suggest_fix(&broken[0]).unwrap();
        let outcome = healer.heal_link(&broken[0], &suggestion, false).await;
        assert_eq!(outcome.action, HealAction::Failed);
        assert!(outcome.error.unwrap().contains("out of range"));
    }

    #[tokio::test]
    async fn substitute_prefers_recorded_column() {
        // Two identical links on one line; only the one at the recorded
        // column is replaced
        let line = "[[X]] and [[X]]";
        let replaced = substitute_at(line, 10, "[[X]]", "[[Y]]").unwrap();
        assert_eq!(replaced, "[[X]] and [[Y]]");
    }
}

//! Terminal rendering for command results.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use trellis_core::{AuditEntry, SearchResult};
use trellis_engine::{EngineStats, HealAction, HealReport, LinkAnalysisResult, ReindexReport};

pub fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner
}

pub fn print_reindex_report(report: &ReindexReport) {
    println!("{}", "Reindex complete".bold());
    println!("  added:   {}", report.added.to_string().green());
    println!("  updated: {}", report.updated.to_string().yellow());
    println!("  deleted: {}", report.deleted.to_string().red());
    println!("  skipped: {}", report.skipped);
    if report.errors > 0 {
        println!("  errors:  {}", report.errors.to_string().red().bold());
    }
}

pub fn print_search_results(query: &str, results: &[SearchResult]) {
    if results.is_empty() {
        println!("no results for {}", query.italic());
        return;
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. {} {} {}",
            rank + 1,
            result.title.bold(),
            format!("({})", result.rel_path).dimmed(),
            format!("[{:.2}]", result.score).cyan(),
        );
        let snippet = result.snippet.replace('\n', " ");
        if !snippet.trim().is_empty() {
            println!("    {}", snippet.trim().dimmed());
        }
    }
}

pub fn print_stats(stats: &EngineStats) {
    println!("{}", "Vault".bold());
    println!("  notes: {}  tags: {}  links: {}", stats.notes, stats.tags, stats.links);
    println!("  words: {}", stats.total_words);

    println!("{}", "Vector index".bold());
    println!("  chunks: {}  index: {}", stats.vectors, stats.index_kind);

    println!("{}", "Cache".bold());
    println!(
        "  memory: {} entries, {:.1}% hit rate",
        stats.cache.memory.entries,
        stats.cache.memory.hit_rate() * 100.0
    );
    println!(
        "  disk:   {} entries, {:.1}% hit rate",
        stats.cache.disk.entries,
        stats.cache.disk.hit_rate() * 100.0
    );

    println!("{}", "Audit".bold());
    println!(
        "  entries: {}  rolled back: {}",
        stats.audit.total, stats.audit.rolled_back
    );
    for (action, count) in &stats.audit.by_action {
        println!("    {action}: {count}");
    }

    if stats.watcher_active {
        println!("{}", "watcher: active".green());
    }
}

pub fn print_link_analysis(analysis: &LinkAnalysisResult) {
    println!("{}", "Link analysis".bold());
    println!("  total links:  {}", analysis.total_links);
    println!(
        "  broken links: {}",
        if analysis.broken_links.is_empty() {
            analysis.broken_links.len().to_string().green()
        } else {
            analysis.broken_links.len().to_string().red()
        }
    );
    println!("  orphan notes: {}", analysis.orphan_notes.len());

    for link in &analysis.broken_links {
        println!(
            "    {} line {}: {}",
            "broken".red(),
            link.line,
            link.target
        );
    }

    if !analysis.hub_notes.is_empty() {
        println!("{}", "Hubs".bold());
        for (path, count) in &analysis.hub_notes {
            println!("  {count:>3} ← {path}");
        }
    }
}

pub fn print_heal_report(report: &HealReport) {
    let mode = if report.dry_run {
        "dry run".yellow()
    } else {
        "applied".green()
    };
    println!("{} ({mode})", "Link healing".bold());
    println!("  fixed:   {}", report.fixed);
    println!("  skipped: {}", report.skipped);
    println!("  failed:  {}", report.failed);

    for outcome in &report.outcomes {
        let action = match outcome.action {
            HealAction::Fixed => "fixed".green(),
            HealAction::Simulated => "would fix".yellow(),
            HealAction::Skipped => "skipped".dimmed(),
            HealAction::Failed => "failed".red(),
        };
        match &outcome.suggestion {
            Some(suggestion) => println!(
                "  {action} [[{}]] -> [[{}]] ({:.0}%)",
                suggestion.target,
                suggestion.suggested,
                suggestion.confidence * 100.0
            ),
            None => println!(
                "  {action} [[{}]] ({})",
                outcome.link.target,
                outcome.error.as_deref().unwrap_or("no reason recorded")
            ),
        }
    }
}

pub fn print_history(entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("journal is empty");
        return;
    }

    for entry in entries {
        let flags = if entry.rolled_back {
            " (rolled back)".red().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {} {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            entry.action.as_str().bold(),
            entry.target.as_deref().unwrap_or("-"),
            flags,
        );
        println!("    id: {}", entry.id.to_string().dimmed());
    }
}

//! Argument definitions for the `trellis` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trellis", version, about = "Local-first PKM engine: index, search, and heal your notes")]
pub struct Cli {
    /// Vault root directory
    #[arg(long, global = true, default_value = ".")]
    pub vault: PathBuf,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile the indexes with the vault
    Index {
        /// Also rebuild the vector index from its stored documents
        #[arg(long)]
        full: bool,
    },

    /// Hybrid search over the vault
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Restrict semantic hits to notes carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Find notes similar to an existing note
    Similar {
        /// Vault-relative path of the source note
        path: String,

        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Engine, corpus, cache, and audit statistics
    Stats,

    /// Link graph operations
    #[command(subcommand)]
    Links(LinkCommands),

    /// Show the audit journal, newest first
    History {
        /// Filter by action (e.g. upsert_note, rewrite_file)
        #[arg(long)]
        action: Option<String>,

        /// Filter by target
        #[arg(long)]
        target: Option<String>,

        #[arg(short = 'n', default_value_t = 20)]
        limit: usize,
    },

    /// Undo a journaled operation by id
    Rollback { operation_id: String },

    /// Watch the vault and keep the indexes in sync until interrupted
    Watch,
}

#[derive(Subcommand)]
pub enum LinkCommands {
    /// Classify every link and report broken links, orphans, and hubs
    Validate,

    /// Suggest (and optionally apply) repairs for broken links
    Heal {
        /// Apply fixes instead of the default dry run
        #[arg(long)]
        apply: bool,

        /// Minimum suggestion confidence
        #[arg(long)]
        min_confidence: Option<f32>,
    },
}

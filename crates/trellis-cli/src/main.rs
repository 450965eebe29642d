//! The `trellis` binary: a thin wrapper over the engine facade.
//!
//! Exit codes: 0 success, 1 unrecoverable error, 2 invalid configuration,
//! 3 lock contention (another indexer owns the data directory).

mod cli;
mod output;

use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing::Level;

use trellis_config::EngineConfig;
use trellis_core::{AuditAction, EngineError, OperationId};
use trellis_engine::{Engine, SearchFilters};

use cli::{Cli, Commands, LinkCommands};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_LOCKED: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::WARN
        })
        .with_target(false)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &EngineError) -> u8 {
    match err {
        EngineError::Config(_) => EXIT_CONFIG,
        EngineError::Ownership(_) => EXIT_LOCKED,
        _ => EXIT_FAILURE,
    }
}

async fn run(args: Cli) -> Result<(), EngineError> {
    let mut config = EngineConfig::load(args.config.as_deref())?;
    let vault_overridden = args.vault.as_path() != std::path::Path::new(".");
    if config.vault_root.as_os_str().is_empty() || vault_overridden {
        config.vault_root = args.vault.clone();
        config.data_dir = args.vault.join(".trellis");
    }

    match args.command {
        Commands::Index { full } => {
            let spinner = output::spinner("indexing vault");
            let engine = Engine::initialize_on_demand(config).await?;
            let report = engine.reindex(full).await?;
            spinner.finish_and_clear();
            output::print_reindex_report(&report);
        }

        Commands::Search { query, k, tag } => {
            let engine = Engine::initialize_on_demand(config).await?;
            let filters = tag.map(|tag| SearchFilters {
                tag: Some(tag),
                ..Default::default()
            });
            let results = engine.search(&query, k, filters).await?;
            output::print_search_results(&query, &results);
        }

        Commands::Similar { path, k } => {
            let engine = Engine::initialize_on_demand(config).await?;
            let note_id = trellis_core::note_id(&path);
            let results = engine.find_similar(&note_id, k).await?;
            output::print_search_results(&path, &results);
        }

        Commands::Stats => {
            let engine = Engine::initialize_on_demand(config).await?;
            let stats = engine.stats().await?;
            output::print_stats(&stats);
        }

        Commands::Links(LinkCommands::Validate) => {
            let engine = Engine::initialize_on_demand(config).await?;
            let analysis = engine.validate_links().await?;
            output::print_link_analysis(&analysis);
        }

        Commands::Links(LinkCommands::Heal {
            apply,
            min_confidence,
        }) => {
            let engine = Engine::initialize_on_demand(config).await?;
            let report = engine.heal_links(min_confidence, !apply).await?;
            output::print_heal_report(&report);
        }

        Commands::History {
            action,
            target,
            limit,
        } => {
            let action = match action.as_deref() {
                Some(raw) => Some(AuditAction::parse(raw).ok_or_else(|| {
                    EngineError::caller(format!("unknown action {raw:?}"))
                })?),
                None => None,
            };
            let engine = Engine::initialize_on_demand(config).await?;
            let entries = engine.history(action, target.as_deref(), limit).await?;
            output::print_history(&entries);
        }

        Commands::Rollback { operation_id } => {
            let id = operation_id
                .parse::<uuid::Uuid>()
                .map(OperationId)
                .map_err(|_| EngineError::caller(format!("invalid operation id {operation_id:?}")))?;
            let engine = Engine::initialize_on_demand(config).await?;
            let compensating = engine.rollback(id).await?;
            println!(
                "{} rolled back {operation_id} (compensating entry {compensating})",
                "ok:".green().bold()
            );
        }

        Commands::Watch => {
            let engine = Engine::initialize(config).await?;
            println!(
                "{} watching {} (ctrl-c to stop)",
                "trellis:".cyan().bold(),
                engine.config().vault_root.display()
            );
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| EngineError::transient(format!("signal handler failed: {e}")))?;
            println!("stopped");
        }
    }

    Ok(())
}

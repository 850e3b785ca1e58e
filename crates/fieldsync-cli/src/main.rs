//! fieldsync CLI - queue data changes offline and sync them later
//!
//! Thin shell over `fieldsync-core`: every command opens the engine on the
//! local sync database, does its work, and waits for any session it
//! triggered before exiting.

mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, PrefsCommands, SyncCommands};
use crate::commands::common::EngineOptions;
use crate::commands::completions::run_completions;
use crate::commands::enqueue::run_enqueue;
use crate::commands::list::run_list;
use crate::commands::prefs::{run_prefs_set, run_prefs_show};
use crate::commands::resolve::run_resolve;
use crate::commands::retry::run_retry;
use crate::commands::stats::run_stats;
use crate::commands::sync::{run_sync, run_sync_conflicts, run_sync_prune};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fieldsync=info,fieldsync_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }
    let options = EngineOptions::from_cli(&cli)?;

    match cli.command {
        Commands::Enqueue {
            mutation,
            entity,
            data,
            priority,
            json,
        } => {
            run_enqueue(
                mutation.into(),
                &entity,
                &data,
                priority.into(),
                json,
                &options,
            )
            .await?;
        }
        Commands::List { status, json } => {
            run_list(status.map(Into::into), json, &options).await?;
        }
        Commands::Sync { command, json } => match command {
            None => run_sync(json, &options).await?,
            Some(SyncCommands::Conflicts { all, json }) => {
                run_sync_conflicts(all, json, &options).await?;
            }
            Some(SyncCommands::Prune { older_than_days }) => {
                run_sync_prune(older_than_days, &options).await?;
            }
        },
        Commands::Resolve { id, resolution } => {
            run_resolve(&id, resolution.into(), &options).await?;
        }
        Commands::Retry { id } => run_retry(&id, &options).await?,
        Commands::Stats { json } => run_stats(json, &options).await?,
        Commands::Prefs { command } => match command {
            PrefsCommands::Show { json } => run_prefs_show(json, &options).await?,
            PrefsCommands::Set(args) => run_prefs_set(args, &options).await?,
        },
        Commands::Watch { json } => run_watch(json, &options).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

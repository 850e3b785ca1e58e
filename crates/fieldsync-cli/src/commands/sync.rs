use std::time::Duration;

use fieldsync_core::SyncOutcome;

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, format_stats_lines, open_engine, EngineOptions,
    OpenEngineMode, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(as_json: bool, options: &EngineOptions) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::RequireRemote).await?;

    match engine.start_sync().await {
        SyncOutcome::Completed(stats) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Sync completed");
                for line in format_stats_lines(&stats) {
                    println!("  {line}");
                }
                if stats.conflicts_pending > 0 {
                    println!("Run `fieldsync sync conflicts` to review open conflicts.");
                }
            }
            Ok(())
        }
        SyncOutcome::AlreadyRunning => {
            println!("A sync session is already running");
            Ok(())
        }
        SyncOutcome::Rejected(reason) => Err(CliError::Rejected(reason)),
    }
}

pub async fn run_sync_conflicts(
    include_resolved: bool,
    as_json: bool,
    options: &EngineOptions,
) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let conflicts = engine
        .conflicts()
        .await
        .into_iter()
        .filter(|conflict| include_resolved || !conflict.is_resolved())
        .collect::<Vec<_>>();

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync_prune(older_than_days: u64, options: &EngineOptions) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let age = Duration::from_secs(older_than_days.saturating_mul(24 * 60 * 60));
    let pruned = engine.prune_resolved_conflicts(age).await;
    println!("Pruned {pruned} resolved conflicts");
    Ok(())
}

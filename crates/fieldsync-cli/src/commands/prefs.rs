use fieldsync_core::{PreferencesPatch, Priority};

use crate::cli::PrefsSetArgs;
use crate::commands::common::{format_preferences_lines, open_engine, EngineOptions, OpenEngineMode};
use crate::error::CliError;

pub async fn run_prefs_show(as_json: bool, options: &EngineOptions) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let preferences = engine.preferences();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&preferences)?);
    } else {
        for line in format_preferences_lines(&preferences) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_prefs_set(args: PrefsSetArgs, options: &EngineOptions) -> Result<(), CliError> {
    let patch = preferences_patch(args);
    if patch.is_empty() {
        return Err(CliError::EmptyPreferencesPatch);
    }

    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let updated = engine.update_preferences(patch).await?;
    for line in format_preferences_lines(&updated) {
        println!("{line}");
    }
    Ok(())
}

pub fn preferences_patch(args: PrefsSetArgs) -> PreferencesPatch {
    let bandwidth_limit = if args.no_bandwidth_limit {
        Some(None)
    } else {
        args.bandwidth_limit.map(Some)
    };

    PreferencesPatch {
        auto_sync: args.auto_sync,
        sync_interval: args.interval,
        sync_on_cellular: args.sync_on_cellular,
        max_retries: args.max_retries,
        conflict_strategy: args.strategy.map(Into::into),
        priority_order: args
            .priority_order
            .map(|order| order.into_iter().map(Priority::from).collect()),
        bandwidth_limit,
    }
}

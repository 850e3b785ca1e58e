use crate::commands::common::{format_stats_lines, open_engine, EngineOptions, OpenEngineMode};
use crate::error::CliError;

pub async fn run_stats(as_json: bool, options: &EngineOptions) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let stats = engine.stats().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in format_stats_lines(&stats) {
            println!("{line}");
        }
    }
    Ok(())
}

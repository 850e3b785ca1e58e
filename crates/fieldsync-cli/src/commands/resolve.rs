use fieldsync_core::Resolution;

use crate::commands::common::{open_engine, resolve_conflict, EngineOptions, OpenEngineMode};
use crate::error::CliError;

pub async fn run_resolve(
    id: &str,
    resolution: Resolution,
    options: &EngineOptions,
) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let conflict = resolve_conflict(&engine, id).await?;
    let resolved = engine.resolve(conflict.id, resolution).await?;

    match resolved.resolution {
        Some(applied) if applied != resolution => println!(
            "Conflict {} was already resolved ({})",
            resolved.id,
            applied.label()
        ),
        _ => println!("Resolved conflict {} ({})", resolved.id, resolution.label()),
    }
    Ok(())
}

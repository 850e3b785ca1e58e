use crate::commands::common::{open_engine, resolve_item, EngineOptions, OpenEngineMode};
use crate::error::CliError;

pub async fn run_retry(id: &str, options: &EngineOptions) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let item = resolve_item(&engine, id).await?;
    let retried = engine.retry(item.id).await?;
    engine.settle().await;

    if engine.get(retried.id).await.is_some() {
        println!("Queued {} for the next sync", retried.id);
    } else {
        println!("{} synced", retried.id);
    }
    Ok(())
}

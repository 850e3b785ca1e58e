use fieldsync_core::{MutationType, NewSyncItem, Priority};

use crate::commands::common::{
    format_item_lines, item_to_list_item, open_engine, parse_mutation_data, EngineOptions,
    OpenEngineMode,
};
use crate::error::CliError;

pub async fn run_enqueue(
    mutation: MutationType,
    entity: &str,
    raw_data: &str,
    priority: Priority,
    as_json: bool,
    options: &EngineOptions,
) -> Result<(), CliError> {
    let data = parse_mutation_data(raw_data)?;
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let item = engine
        .enqueue(NewSyncItem::new(mutation, entity, data, priority))
        .await?;

    // auto-sync may have started a session; let it finish before exiting
    engine.settle().await;
    let current = engine.get(item.id).await;

    if as_json {
        let json_item = item_to_list_item(current.as_ref().unwrap_or(&item));
        println!("{}", serde_json::to_string_pretty(&json_item)?);
        return Ok(());
    }

    match current {
        Some(queued) => {
            for line in format_item_lines(std::slice::from_ref(&queued)) {
                println!("{line}");
            }
        }
        None => println!("{} synced", item.id),
    }
    Ok(())
}

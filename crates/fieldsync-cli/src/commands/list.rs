use fieldsync_core::SyncStatus;

use crate::commands::common::{
    format_item_lines, item_to_list_item, open_engine, EngineOptions, OpenEngineMode,
    SyncItemListItem,
};
use crate::error::CliError;

pub async fn run_list(
    status: Option<SyncStatus>,
    as_json: bool,
    options: &EngineOptions,
) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::Standard).await?;
    let items = engine
        .list()
        .await
        .into_iter()
        .filter(|item| status.is_none_or(|status| item.status == status))
        .collect::<Vec<_>>();

    if as_json {
        let json_items = items
            .iter()
            .map(item_to_list_item)
            .collect::<Vec<SyncItemListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if items.is_empty() {
        println!("Sync queue is empty.");
    } else {
        for line in format_item_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}

use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_event, open_engine, EngineOptions, OpenEngineMode};
use crate::error::CliError;

/// Run the auto-sync loop until ctrl-c, printing every event.
pub async fn run_watch(as_json: bool, options: &EngineOptions) -> Result<(), CliError> {
    let engine = open_engine(options, OpenEngineMode::RequireRemote).await?;
    let mut events = engine.subscribe();
    engine.start_background();
    engine.request_sync();
    tracing::info!("Watching sync events; press ctrl-c to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            received = events.recv() => match received {
                Ok(event) => {
                    if as_json {
                        println!("{}", serde_json::json!({
                            "event": event.label(),
                            "message": format_event(&event),
                        }));
                    } else {
                        println!("{}", format_event(&event));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event output fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    engine.shutdown();
    engine.settle().await;
    Ok(())
}

use propsync_core::{DroppedOperation, PropertyClient, RemoteApi};

use crate::commands::common::{format_sync_timestamp, short_id};
use crate::error::CliError;

pub async fn run_dropped<R: RemoteApi>(
    client: &PropertyClient<R>,
    as_json: bool,
    clear: bool,
) -> Result<(), CliError> {
    let dropped = client.get_dropped_operations().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&dropped)?);
    } else if dropped.is_empty() {
        println!("No dropped operations.");
    } else {
        for line in format_dropped_lines(&dropped) {
            println!("{line}");
        }
    }

    if clear {
        let removed = client.clear_dropped_operations().await?;
        tracing::info!("Cleared {} dropped operations", removed);
    }
    Ok(())
}

pub fn format_dropped_lines(dropped: &[DroppedOperation]) -> Vec<String> {
    dropped
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<6}  {:<13}  attempts={}  {}",
                format_sync_timestamp(entry.dropped_at),
                entry.change.kind().as_str(),
                short_id(entry.change.record_id()),
                entry.attempts,
                entry.last_error
            )
        })
        .collect()
}

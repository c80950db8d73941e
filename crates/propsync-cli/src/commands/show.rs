use propsync_core::{PropertyClient, RecordId, RemoteApi};

use crate::commands::common::{format_sync_timestamp, record_flags};
use crate::error::CliError;

pub async fn run_show<R: RemoteApi>(
    client: &PropertyClient<R>,
    id: &RecordId,
    as_json: bool,
) -> Result<(), CliError> {
    let record = client
        .get_record(id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("id: {}", record.id);
    let flags = record_flags(&record);
    if !flags.is_empty() {
        println!("flags: {flags}");
    }
    if let Some(timestamp) = record.last_modified {
        println!("modified: {}", format_sync_timestamp(timestamp));
    }
    for (key, value) in &record.fields {
        match value.as_str() {
            Some(text) => println!("{key}: {text}"),
            None => println!("{key}: {value}"),
        }
    }
    Ok(())
}

use propsync_core::{PropertyClient, RemoteApi};

use crate::commands::common::{format_record_lines, record_to_list_item, RecordListItem};
use crate::error::CliError;

pub async fn run_list<R: RemoteApi>(
    client: &PropertyClient<R>,
    archived: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let records = if archived {
        client.get_archived_records().await?
    } else {
        client.get_records().await?
    };

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No records.");
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}

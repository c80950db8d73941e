use propsync_core::{PropertyClient, RemoteApi, SyncState, SyncStatus};
use serde::Serialize;

use crate::commands::common::format_sync_timestamp;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub state: SyncState,
    pub pending_count: usize,
    pub dropped_count: usize,
    pub last_sync: Option<i64>,
}

pub async fn run_status<R: RemoteApi>(
    client: &PropertyClient<R>,
    as_json: bool,
) -> Result<(), CliError> {
    let pending_count = client.get_pending_count().await?;
    let status = client.get_status();
    let report = StatusReport {
        status,
        state: status.state(pending_count),
        pending_count,
        dropped_count: client.get_dropped_operations().await?.len(),
        last_sync: client.get_last_sync().await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in format_status_lines(&report) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn format_status_lines(report: &StatusReport) -> Vec<String> {
    let state = match report.state {
        SyncState::Offline => "offline",
        SyncState::Syncing => "syncing",
        SyncState::Synced => "synced",
        SyncState::Pending => "pending changes",
    };
    let last_sync = report
        .last_sync
        .map_or_else(|| "never".to_string(), format_sync_timestamp);

    let mut lines = vec![
        format!("state:     {state}"),
        format!("connected: {}", if report.status.connected { "yes" } else { "no" }),
        format!("pending:   {}", report.pending_count),
        format!("last sync: {last_sync}"),
    ];
    if report.dropped_count > 0 {
        lines.push(format!("dropped:   {}", report.dropped_count));
    }
    lines
}

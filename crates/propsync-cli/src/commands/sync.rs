use propsync_core::{PropertyClient, RemoteApi, SyncReport};

use crate::error::CliError;

pub async fn run_sync<R: RemoteApi>(client: &PropertyClient<R>) -> Result<(), CliError> {
    match client.force_sync().await? {
        Some(report) => println!("{}", format_sync_report(&report)),
        None => println!("A sync is already in progress"),
    }
    Ok(())
}

pub fn format_sync_report(report: &SyncReport) -> String {
    let mut line = format!(
        "Sync completed: {} delivered, {} failed, {} pending",
        report.success_count, report.error_count, report.pending_count
    );
    if report.dropped_count > 0 {
        line.push_str(&format!(
            " ({} dropped; see `propsync dropped`)",
            report.dropped_count
        ));
    }
    line
}

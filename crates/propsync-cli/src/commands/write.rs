use propsync_core::{PropertyClient, RecordId, RemoteApi};

use crate::commands::common::{apply_field_assignments, parse_field_assignments};
use crate::error::CliError;

pub async fn run_add<R: RemoteApi>(
    client: &PropertyClient<R>,
    assignments: &[String],
) -> Result<RecordId, CliError> {
    let fields = parse_field_assignments(assignments)?;
    let record = client.add_record(fields).await?;

    if record.is_offline_created {
        tracing::info!("Saved offline; will sync when the API is reachable");
    }
    println!("{}", record.id);
    Ok(record.id)
}

pub async fn run_update<R: RemoteApi>(
    client: &PropertyClient<R>,
    id: &RecordId,
    assignments: &[String],
) -> Result<(), CliError> {
    let fields = parse_field_assignments(assignments)?;
    let record = client
        .get_record(id)
        .await?
        .ok_or_else(|| CliError::RecordNotFound(id.to_string()))?;

    let updated = client
        .update_record(apply_field_assignments(record, fields))
        .await?;
    println!("{}", updated.id);
    Ok(())
}

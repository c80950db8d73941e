use propsync_core::{PropertyClient, RecordId, RemoteApi};

use crate::error::CliError;

pub async fn run_set_archived<R: RemoteApi>(
    client: &PropertyClient<R>,
    id: &RecordId,
    archived: bool,
) -> Result<(), CliError> {
    let result = if archived {
        client.archive_record(id).await
    } else {
        client.unarchive_record(id).await
    };

    let record = result.map_err(|error| match error {
        propsync_core::Error::NotFound(_) => CliError::RecordNotFound(id.to_string()),
        other => CliError::Core(other),
    })?;
    println!("{}", record.id);
    Ok(())
}

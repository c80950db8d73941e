use propsync_core::{PropertyClient, RecordId, RemoteApi};

use crate::error::CliError;

pub async fn run_delete<R: RemoteApi>(
    client: &PropertyClient<R>,
    id: &RecordId,
) -> Result<(), CliError> {
    if client.get_record(id).await?.is_none() {
        return Err(CliError::RecordNotFound(id.to_string()));
    }

    client.delete_record(id).await?;
    println!("{id}");
    Ok(())
}

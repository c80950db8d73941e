use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] propsync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Invalid record ID: {0}")]
    InvalidRecordId(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("Invalid field `{0}`; expected KEY=VALUE")]
    InvalidField(String),
    #[error("`{0}` is managed by propsync and cannot be set directly")]
    ReservedField(String),
    #[error(
        "API is not configured. Pass --api-url or set PROPSYNC_API_URL to use `propsync`."
    )]
    ApiNotConfigured,
}

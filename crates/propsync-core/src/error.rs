//! Error types for propsync-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using propsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in propsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The local durable store could not be opened
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found in the local store
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An explicit sync was requested while disconnected
    #[error("Cannot sync while offline")]
    Offline,

    /// Remote authority error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

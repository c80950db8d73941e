//! Remote authority clients.
//!
//! The sync engine talks to the system of record through [`RemoteApi`]. Two
//! implementations ship with the crate: [`HttpRemote`] for a real JSON API and
//! [`InMemoryRemote`], an in-process authority used as a fake collaborator.

use std::future::Future;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Record, RecordId};

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::{CallKind, InMemoryRemote, RemoteCall};

/// Errors reported by a remote authority
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The authority could not be reached at all
    #[error("Network unreachable: {0}")]
    Unreachable(String),
    /// The request did not finish within its time bound
    #[error("Remote request timed out")]
    Timeout,
    /// The authority answered with a non-success status
    #[error("Remote rejected request: {message} ({status})")]
    Rejected { status: u16, message: String },
    /// The addressed record does not exist remotely
    #[error("Remote record not found")]
    NotFound,
    /// The response body could not be understood
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Whether the failure is about reachability rather than the request itself
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout)
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Record-oriented API of the remote authority.
///
/// Payloads never carry local-only fields; see [`Record::remote_payload`].
pub trait RemoteApi: Send + Sync + 'static {
    /// Fetch the full authoritative record set
    fn list_records(&self) -> impl Future<Output = RemoteResult<Vec<Record>>> + Send;

    /// Create a record; the authority assigns its id
    fn create_record(
        &self,
        payload: Map<String, Value>,
    ) -> impl Future<Output = RemoteResult<Record>> + Send;

    /// Replace a record by id
    fn update_record(
        &self,
        id: u64,
        payload: Map<String, Value>,
    ) -> impl Future<Output = RemoteResult<Record>> + Send;

    /// Delete a record by id
    fn delete_record(&self, id: u64) -> impl Future<Output = RemoteResult<()>> + Send;

    /// Toggle the archived flag of a record
    fn set_archived(
        &self,
        id: u64,
        archived: bool,
    ) -> impl Future<Output = RemoteResult<Record>> + Send;

    /// Lightweight liveness round-trip
    fn ping(&self) -> impl Future<Output = RemoteResult<()>> + Send;
}

/// Reject records the authority returned without an authoritative id
pub(crate) fn authoritative(record: Record) -> RemoteResult<Record> {
    match record.id {
        RecordId::Persistent(_) => Ok(Record {
            is_offline_created: false,
            last_modified: None,
            ..record
        }),
        RecordId::Temporary(id) => Err(RemoteError::InvalidPayload(format!(
            "record returned with temporary id {id}"
        ))),
    }
}

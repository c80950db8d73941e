//! Data models for propsync

mod pending;
mod record;

pub use pending::{DroppedOperation, OperationKind, PendingChange, PendingOperation};
pub use record::{ArchiveFilter, Record, RecordId, TEMP_ID_PREFIX};

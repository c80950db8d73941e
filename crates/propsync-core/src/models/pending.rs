//! Pending operation queue models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::record::{Record, RecordId};
use crate::error::Error;

/// Kind of remote mutation a queued operation carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// Snapshot queued for delivery: the full record for create/update, the id for delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "data", rename_all = "lowercase")]
pub enum PendingChange {
    Create(Record),
    Update(Record),
    Delete(RecordId),
}

impl PendingChange {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create(_) => OperationKind::Create,
            Self::Update(_) => OperationKind::Update,
            Self::Delete(_) => OperationKind::Delete,
        }
    }

    /// Id embedded in the queued payload
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        match self {
            Self::Create(record) | Self::Update(record) => &record.id,
            Self::Delete(id) => id,
        }
    }
}

/// A queued intent to mutate remote state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Queue position; strictly increasing in enqueue order
    pub seq: i64,
    /// Operation and its payload snapshot
    #[serde(flatten)]
    pub change: PendingChange,
    /// Enqueue time (Unix ms)
    pub timestamp: i64,
    /// Failed delivery attempts so far
    pub attempts: u32,
}

impl PendingOperation {
    #[must_use]
    pub const fn operation(&self) -> OperationKind {
        self.change.kind()
    }

    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        self.change.record_id()
    }
}

/// An operation evicted from the queue after reaching the retry cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedOperation {
    /// Ledger row identifier
    pub id: i64,
    /// Operation and its final payload snapshot
    #[serde(flatten)]
    pub change: PendingChange,
    /// Original enqueue time (Unix ms)
    pub timestamp: i64,
    /// Attempts made before dropping
    pub attempts: u32,
    /// Last error reported by the remote authority
    pub last_error: String,
    /// Drop time (Unix ms)
    pub dropped_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_kind_round_trips_through_text() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn pending_operation_serializes_operation_and_data() {
        let op = PendingOperation {
            seq: 1,
            change: PendingChange::Delete(RecordId::Persistent(42)),
            timestamp: 10,
            attempts: 0,
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["operation"], json!("delete"));
        assert_eq!(value["data"], json!(42));
        assert_eq!(op.record_id(), &RecordId::Persistent(42));
    }
}

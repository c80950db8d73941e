//! In-process remote authority.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};

use super::{RemoteApi, RemoteError, RemoteResult};
use crate::models::{Record, RecordId};

/// Which endpoint a call hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    List,
    Create,
    Update,
    Delete,
    SetArchived,
    Ping,
}

/// One request received by [`InMemoryRemote`], in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    List,
    Create(Map<String, Value>),
    Update(u64, Map<String, Value>),
    Delete(u64),
    SetArchived(u64, bool),
    Ping,
}

impl RemoteCall {
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::List => CallKind::List,
            Self::Create(_) => CallKind::Create,
            Self::Update(..) => CallKind::Update,
            Self::Delete(_) => CallKind::Delete,
            Self::SetArchived(..) => CallKind::SetArchived,
            Self::Ping => CallKind::Ping,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<u64, Record>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    unreachable: bool,
    queued_failures: HashMap<CallKind, VecDeque<RemoteError>>,
    persistent_failures: HashMap<CallKind, RemoteError>,
    latency: HashMap<CallKind, Duration>,
}

/// Remote authority that keeps its records in memory.
///
/// Ids are assigned sequentially. Every call is logged before it is served,
/// and calls can be slowed down or made to fail per endpoint.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<MemoryState>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the authority with records; returns the stored copy
    pub fn insert(&self, fields: Map<String, Value>) -> Record {
        let mut state = self.lock();
        let id = state.allocate_id();
        let record = Record {
            id: RecordId::Persistent(id),
            ..Record::from_fields(fields)
        };
        state.records.insert(id, record.clone());
        record
    }

    /// Snapshot of the authoritative record set
    pub fn records(&self) -> Vec<Record> {
        self.lock().records.values().cloned().collect()
    }

    /// Every call received so far
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Calls received so far, excluding liveness probes
    pub fn data_calls(&self) -> Vec<RemoteCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.kind() != CallKind::Ping)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make every endpoint fail as if the network were down
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Fail the next call to `kind` with `error`; queued failures are consumed in order
    pub fn fail_next(&self, kind: CallKind, error: RemoteError) {
        self.lock()
            .queued_failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    /// Fail every call to `kind` until cleared
    pub fn fail_always(&self, kind: CallKind, error: RemoteError) {
        self.lock().persistent_failures.insert(kind, error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.queued_failures.clear();
        state.persistent_failures.clear();
    }

    /// Delay every call to `kind` before it is served
    pub fn set_latency(&self, kind: CallKind, delay: Duration) {
        self.lock().latency.insert(kind, delay);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call, wait out its latency, then report any injected failure
    async fn admit(&self, call: RemoteCall) -> RemoteResult<()> {
        let kind = call.kind();
        let delay = {
            let mut state = self.lock();
            state.calls.push(call);
            state.latency.get(&kind).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.unreachable {
            return Err(RemoteError::Unreachable("in-memory remote offline".into()));
        }
        if let Some(error) = state
            .queued_failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if let Some(error) = state.persistent_failures.get(&kind) {
            return Err(error.clone());
        }
        Ok(())
    }
}

impl MemoryState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl RemoteApi for InMemoryRemote {
    async fn list_records(&self) -> RemoteResult<Vec<Record>> {
        self.admit(RemoteCall::List).await?;
        Ok(self.records())
    }

    async fn create_record(&self, payload: Map<String, Value>) -> RemoteResult<Record> {
        if payload.contains_key("id") {
            return Err(RemoteError::Rejected {
                status: 400,
                message: "id must not be supplied on create".to_string(),
            });
        }
        self.admit(RemoteCall::Create(payload.clone())).await?;
        Ok(self.insert(payload))
    }

    async fn update_record(&self, id: u64, payload: Map<String, Value>) -> RemoteResult<Record> {
        self.admit(RemoteCall::Update(id, payload.clone())).await?;
        let mut state = self.lock();
        if !state.records.contains_key(&id) {
            return Err(RemoteError::NotFound);
        }
        let record = Record {
            id: RecordId::Persistent(id),
            ..Record::from_fields(payload)
        };
        state.records.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_record(&self, id: u64) -> RemoteResult<()> {
        self.admit(RemoteCall::Delete(id)).await?;
        self.lock()
            .records
            .remove(&id)
            .map(|_| ())
            .ok_or(RemoteError::NotFound)
    }

    async fn set_archived(&self, id: u64, archived: bool) -> RemoteResult<Record> {
        self.admit(RemoteCall::SetArchived(id, archived)).await?;
        let mut state = self.lock();
        let record = state.records.get_mut(&id).ok_or(RemoteError::NotFound)?;
        record.archived = archived;
        Ok(record.clone())
    }

    async fn ping(&self) -> RemoteResult<()> {
        self.admit(RemoteCall::Ping).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(address: &str) -> Map<String, Value> {
        json!({ "address": address }).as_object().cloned().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn assigns_sequential_ids() {
        let remote = InMemoryRemote::new();
        let first = remote.create_record(fields("1 Oak St")).await.unwrap();
        let second = remote.create_record(fields("2 Elm Rd")).await.unwrap();

        assert_eq!(first.id, RecordId::Persistent(1));
        assert_eq!(second.id, RecordId::Persistent(2));
        assert_eq!(remote.records().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_failures_are_consumed_once() {
        let remote = InMemoryRemote::new();
        remote.fail_next(CallKind::Ping, RemoteError::Timeout);

        assert_eq!(remote.ping().await, Err(RemoteError::Timeout));
        assert_eq!(remote.ping().await, Ok(()));
        assert_eq!(remote.calls(), vec![RemoteCall::Ping, RemoteCall::Ping]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_remote_fails_everything() {
        let remote = InMemoryRemote::new();
        remote.set_reachable(false);

        assert!(remote.list_records().await.unwrap_err().is_transient());
        remote.set_reachable(true);
        assert!(remote.list_records().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_records_report_not_found() {
        let remote = InMemoryRemote::new();
        assert_eq!(remote.delete_record(42).await, Err(RemoteError::NotFound));
        assert_eq!(
            remote.update_record(42, fields("x")).await,
            Err(RemoteError::NotFound)
        );
    }
}

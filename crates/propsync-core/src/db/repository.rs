//! Record access layer over the local store

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{
    ArchiveFilter, DroppedOperation, OperationKind, PendingChange, PendingOperation, Record,
    RecordId,
};
use crate::util::now_millis;

use super::connection::{LocalStore, StoreWrite};

/// Metadata key holding the Unix ms timestamp of the last successful pull
pub const LAST_SYNC_KEY: &str = "lastSync";

/// What a local delete left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Record was never sent remotely; it and its queued create are gone
    Discarded,
    /// Local copy removed and a remote delete queued
    Queued,
}

/// Domain operations over the local store.
///
/// This is the only writer of the store. It keeps the offline-created
/// invariant: a record with a temporary id has exactly one queued `create`
/// and never any `update` or `delete`.
#[derive(Clone)]
pub struct RecordRepository {
    store: Arc<LocalStore>,
}

impl RecordRepository {
    /// Create a new repository over the given store
    pub const fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Records whose `archived` flag is false
    pub async fn get_active_records(&self) -> Result<Vec<Record>> {
        self.store
            .get_all_records(Some(ArchiveFilter::Active))
            .await
    }

    /// Records whose `archived` flag is true
    pub async fn get_archived_records(&self) -> Result<Vec<Record>> {
        self.store
            .get_all_records(Some(ArchiveFilter::Archived))
            .await
    }

    /// Every cached record
    pub async fn get_all_records(&self) -> Result<Vec<Record>> {
        self.store.get_all_records(None).await
    }

    pub async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        self.store.get_record(id).await
    }

    pub async fn count_records(&self) -> Result<usize> {
        self.store.count_records().await
    }

    /// Persist a new record under a temporary id and queue its `create`
    pub async fn create_local(&self, record: Record) -> Result<Record> {
        let mut record = record;
        record.id = RecordId::temporary();
        record.is_offline_created = true;

        self.store
            .apply(vec![
                StoreWrite::PutRecord(record.clone()),
                StoreWrite::AppendPending {
                    change: PendingChange::Create(record.clone()),
                    timestamp: now_millis(),
                },
            ])
            .await?;

        tracing::debug!("Created local record {}", record.id);
        self.reload(&record.id).await
    }

    /// Persist a new snapshot of an existing record.
    ///
    /// For a record not yet accepted remotely the queued `create` snapshot is
    /// refreshed in place; otherwise an `update` is queued.
    pub async fn update_local(&self, record: Record) -> Result<Record> {
        let mut record = record;
        let stored = self.store.get_record(&record.id).await?;
        record.is_offline_created = record.id.is_temporary()
            || record.is_offline_created
            || stored.as_ref().is_some_and(|stored| stored.is_offline_created);

        if record.is_offline_created {
            let stamped = self.store.put_record(&record).await?;
            self.refresh_pending_create(&stamped).await?;
            return Ok(stamped);
        }

        self.store
            .apply(vec![
                StoreWrite::PutRecord(record.clone()),
                StoreWrite::AppendPending {
                    change: PendingChange::Update(record.clone()),
                    timestamp: now_millis(),
                },
            ])
            .await?;
        self.reload(&record.id).await
    }

    /// Remove a record locally, queueing a remote delete unless it was never synced
    pub async fn delete_local(&self, id: &RecordId) -> Result<DeleteOutcome> {
        let stored = self.store.get_record(id).await?;
        let offline_created =
            id.is_temporary() || stored.as_ref().is_some_and(|stored| stored.is_offline_created);

        if offline_created {
            self.store
                .apply(vec![
                    StoreWrite::DeleteRecord(id.clone()),
                    StoreWrite::DeletePendingFor(id.clone()),
                ])
                .await?;
            tracing::debug!("Discarded unsynced record {}", id);
            return Ok(DeleteOutcome::Discarded);
        }

        // Updates still waiting for this record are superseded by the delete
        self.store
            .apply(vec![
                StoreWrite::DeleteRecord(id.clone()),
                StoreWrite::DeletePendingMatching(OperationKind::Update, id.clone()),
                StoreWrite::AppendPending {
                    change: PendingChange::Delete(id.clone()),
                    timestamp: now_millis(),
                },
            ])
            .await?;
        Ok(DeleteOutcome::Queued)
    }

    /// Swap a temporary record for its authoritative copy and clear its queue entries
    pub async fn accept_created(&self, temp_id: &RecordId, server: Record) -> Result<Record> {
        let mut server = server;
        server.is_offline_created = false;

        self.store
            .apply(vec![
                StoreWrite::DeleteRecord(temp_id.clone()),
                StoreWrite::PutRecord(server.clone()),
                StoreWrite::DeletePendingFor(temp_id.clone()),
            ])
            .await?;

        tracing::debug!("Remapped record {} -> {}", temp_id, server.id);
        self.reload(&server.id).await
    }

    /// Store the server's copy after a delivered update and clear matching queue entries
    pub async fn accept_updated(&self, server: Record) -> Result<Record> {
        let mut server = server;
        server.is_offline_created = false;

        self.store
            .apply(vec![
                StoreWrite::PutRecord(server.clone()),
                StoreWrite::DeletePendingMatching(OperationKind::Update, server.id.clone()),
            ])
            .await?;
        self.reload(&server.id).await
    }

    /// Store the server's copy after a queued operation was delivered.
    ///
    /// The local copy is only replaced when nothing else is queued for the
    /// record, so newer local edits stay visible until they are delivered too.
    pub async fn accept_delivered(&self, operation: &PendingOperation, server: Record) -> Result<()> {
        let mut server = server;
        server.is_offline_created = false;

        self.store
            .apply(vec![
                StoreWrite::DeletePending(operation.seq),
                StoreWrite::PutRecordIfSettled(server),
            ])
            .await
    }

    /// Settle a queued update after the remote accepted an equivalent direct call.
    ///
    /// The queued operation is kept if an older one for the same record is
    /// still waiting, so delivery order is preserved.
    pub async fn accept_toggled(&self, operation: &PendingOperation, server: Record) -> Result<()> {
        let mut server = server;
        server.is_offline_created = false;

        self.store
            .apply(vec![
                StoreWrite::DeletePendingIfOldest {
                    seq: operation.seq,
                    id: operation.record_id().clone(),
                },
                StoreWrite::PutRecordIfSettled(server),
            ])
            .await
    }

    /// Cache a record pulled from the remote authority.
    ///
    /// Records with queued operations keep their local copy.
    pub async fn put_remote(&self, record: Record) -> Result<()> {
        let mut record = record;
        record.is_offline_created = false;
        self.store
            .apply(vec![StoreWrite::PutRecordIfSettled(record)])
            .await
    }

    /// Append an operation to the queue
    pub async fn enqueue(&self, change: PendingChange) -> Result<PendingOperation> {
        self.store.append_pending(&change, now_millis()).await
    }

    /// The queue in enqueue order
    pub async fn list_pending(&self) -> Result<Vec<PendingOperation>> {
        self.store.pending_operations().await
    }

    /// Most recently queued operation for a record
    pub async fn latest_pending_for(&self, id: &RecordId) -> Result<Option<PendingOperation>> {
        Ok(self
            .store
            .pending_operations()
            .await?
            .into_iter()
            .rev()
            .find(|op| op.record_id() == id))
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.store.count_pending().await
    }

    /// Remove queued operations matching `kind` and the id embedded in their payload
    pub async fn remove_pending(&self, kind: OperationKind, id: &RecordId) -> Result<u64> {
        self.store.delete_pending_matching(kind, id).await
    }

    /// Remove one queued operation
    pub async fn complete_pending(&self, operation: &PendingOperation) -> Result<()> {
        self.store.delete_pending(operation.seq).await
    }

    /// Persist the attempt counter of a queued operation
    pub async fn record_attempt(&self, operation: &PendingOperation) -> Result<()> {
        self.store
            .set_pending_attempts(operation.seq, operation.attempts)
            .await
    }

    /// Evict a queued operation into the dropped-operation ledger
    pub async fn drop_pending(&self, operation: PendingOperation, last_error: &str) -> Result<()> {
        self.store
            .apply(vec![StoreWrite::DropPending {
                operation,
                last_error: last_error.to_string(),
            }])
            .await
    }

    pub async fn dropped_operations(&self) -> Result<Vec<DroppedOperation>> {
        self.store.dropped_operations().await
    }

    pub async fn clear_dropped(&self) -> Result<u64> {
        self.store.clear_dropped().await
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.store.get_metadata(key).await
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_metadata(key, value).await
    }

    /// Unix ms of the last successful pull
    pub async fn last_sync(&self) -> Result<Option<i64>> {
        Ok(self
            .get_metadata(LAST_SYNC_KEY)
            .await?
            .and_then(|value| value.parse().ok()))
    }

    pub async fn set_last_sync(&self, timestamp: i64) -> Result<()> {
        self.set_metadata(LAST_SYNC_KEY, &timestamp.to_string())
            .await
    }

    async fn reload(&self, id: &RecordId) -> Result<Record> {
        self.store
            .get_record(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn refresh_pending_create(&self, record: &Record) -> Result<()> {
        let queued_create = self
            .store
            .pending_operations()
            .await?
            .into_iter()
            .find(|op| op.operation() == OperationKind::Create && op.record_id() == &record.id);

        match queued_create {
            Some(op) => {
                self.store
                    .replace_pending_change(op.seq, &PendingChange::Create(record.clone()))
                    .await
            }
            None => {
                tracing::warn!(
                    "Offline record {} had no queued create; re-queueing",
                    record.id
                );
                self.enqueue(PendingChange::Create(record.clone()))
                    .await
                    .map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    async fn setup() -> RecordRepository {
        let store = LocalStore::open_in_memory().await.unwrap();
        RecordRepository::new(Arc::new(store))
    }

    fn draft(address: &str) -> Record {
        Record::from_fields(Map::new()).with("address", address)
    }

    fn synced(id: u64, address: &str) -> Record {
        Record {
            id: RecordId::Persistent(id),
            ..draft(address)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_local_assigns_temp_id_and_queues_create() {
        let repo = setup().await;

        let record = repo.create_local(draft("1 Oak St")).await.unwrap();

        assert!(record.id.is_temporary());
        assert!(record.is_offline_created);
        assert!(record.last_modified.is_some());

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].operation(), OperationKind::Create);
        assert_eq!(pending[0].record_id(), &record.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn updating_offline_record_folds_into_queued_create() {
        let repo = setup().await;
        let record = repo.create_local(draft("1 Oak St")).await.unwrap();

        let edited = record.clone().with("address", "1 Oak Street");
        repo.update_local(edited).await.unwrap();

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        match &pending[0].change {
            PendingChange::Create(snapshot) => {
                assert_eq!(snapshot.get("address"), Some(&json!("1 Oak Street")));
            }
            other => panic!("expected queued create, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn updating_synced_record_queues_update() {
        let repo = setup().await;
        repo.put_remote(synced(4, "4 Birch Ave")).await.unwrap();

        repo.update_local(synced(4, "4 Birch Avenue")).await.unwrap();
        repo.update_local(synced(4, "4 Birch Av.")).await.unwrap();

        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending
            .iter()
            .all(|op| op.operation() == OperationKind::Update));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_offline_record_discards_everything() {
        let repo = setup().await;
        let record = repo.create_local(draft("1 Oak St")).await.unwrap();

        let outcome = repo.delete_local(&record.id).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Discarded);
        assert_eq!(repo.count_records().await.unwrap(), 0);
        assert_eq!(repo.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_synced_record_queues_delete() {
        let repo = setup().await;
        repo.put_remote(synced(42, "42 Main St")).await.unwrap();

        let outcome = repo.delete_local(&RecordId::Persistent(42)).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::Queued);
        assert_eq!(repo.count_records().await.unwrap(), 0);
        let pending = repo.list_pending().await.unwrap();
        assert_eq!(
            pending[0].change,
            PendingChange::Delete(RecordId::Persistent(42))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deleting_synced_record_supersedes_its_queued_updates() {
        let repo = setup().await;
        repo.put_remote(synced(42, "42 Main St")).await.unwrap();
        repo.put_remote(synced(7, "7 Spruce Dr")).await.unwrap();
        repo.update_local(synced(42, "42 Main Street")).await.unwrap();
        repo.update_local(synced(7, "7 Spruce Drive")).await.unwrap();

        repo.delete_local(&RecordId::Persistent(42)).await.unwrap();

        let pending: Vec<PendingChange> = repo
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.change)
            .collect();
        assert_eq!(pending.len(), 2);
        assert!(matches!(&pending[0], PendingChange::Update(r) if r.id == RecordId::Persistent(7)));
        assert_eq!(pending[1], PendingChange::Delete(RecordId::Persistent(42)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_created_replaces_temp_copy() {
        let repo = setup().await;
        let record = repo.create_local(draft("1 Oak St")).await.unwrap();

        let accepted = repo
            .accept_created(&record.id, synced(101, "1 Oak St"))
            .await
            .unwrap();

        assert_eq!(accepted.id, RecordId::Persistent(101));
        assert!(!accepted.is_offline_created);
        assert!(repo.get_record(&record.id).await.unwrap().is_none());
        assert_eq!(repo.count_records().await.unwrap(), 1);
        assert_eq!(repo.pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_remote_keeps_records_with_queued_edits() {
        let repo = setup().await;
        repo.put_remote(synced(4, "4 Birch Ave")).await.unwrap();
        repo.update_local(synced(4, "4 Birch Avenue")).await.unwrap();

        repo.put_remote(synced(4, "stale remote copy")).await.unwrap();

        let local = repo.get_record(&RecordId::Persistent(4)).await.unwrap().unwrap();
        assert_eq!(local.get("address"), Some(&json!("4 Birch Avenue")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_toggled_preserves_older_queued_updates() {
        let repo = setup().await;
        repo.put_remote(synced(4, "4 Birch Ave")).await.unwrap();
        repo.update_local(synced(4, "edit that failed")).await.unwrap();
        let mut archived = synced(4, "edit that failed");
        archived.archived = true;
        repo.update_local(archived.clone()).await.unwrap();

        let latest = repo
            .latest_pending_for(&RecordId::Persistent(4))
            .await
            .unwrap()
            .unwrap();
        repo.accept_toggled(&latest, archived).await.unwrap();

        assert_eq!(repo.pending_count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_delivered_clears_operation_and_stores_server_copy() {
        let repo = setup().await;
        repo.put_remote(synced(4, "4 Birch Ave")).await.unwrap();
        repo.update_local(synced(4, "4 Birch Avenue")).await.unwrap();
        let queued = repo.list_pending().await.unwrap().remove(0);

        let server = synced(4, "4 Birch Avenue").with("valuation", 310_000);
        repo.accept_delivered(&queued, server).await.unwrap();

        assert_eq!(repo.pending_count().await.unwrap(), 0);
        let local = repo.get_record(&RecordId::Persistent(4)).await.unwrap().unwrap();
        assert_eq!(local.get("valuation"), Some(&json!(310_000)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn archive_views_split_on_flag() {
        let repo = setup().await;
        repo.put_remote(synced(1, "active")).await.unwrap();
        let mut archived = synced(2, "archived");
        archived.archived = true;
        repo.put_remote(archived).await.unwrap();

        assert_eq!(repo.get_active_records().await.unwrap().len(), 1);
        assert_eq!(repo.get_archived_records().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_pending_tolerates_id_representation() {
        let repo = setup().await;
        repo.enqueue(PendingChange::Delete(RecordId::Persistent(42)))
            .await
            .unwrap();

        let id: RecordId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(
            repo.remove_pending(OperationKind::Delete, &id).await.unwrap(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn last_sync_round_trips_through_metadata() {
        let repo = setup().await;
        assert_eq!(repo.last_sync().await.unwrap(), None);

        repo.set_last_sync(1_700_000_000_000).await.unwrap();
        assert_eq!(repo.last_sync().await.unwrap(), Some(1_700_000_000_000));
    }
}

//! Application-facing client over the local store and sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::db::{LocalStore, RecordRepository};
use crate::error::{Error, Result};
use crate::models::{DroppedOperation, Record, RecordId};
use crate::remote::{HttpRemote, RemoteApi};
use crate::state::{SyncState, SyncStatus};
use crate::sync::{ListenerId, SyncEvent, SyncManager, SyncOptions, SyncReport};

/// One sync client per application session.
///
/// Construct it once and pass it around; clones share the same store,
/// connectivity state and listeners.
pub struct PropertyClient<R> {
    manager: SyncManager<R>,
    db_path: Option<PathBuf>,
}

impl<R> Clone for PropertyClient<R> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            db_path: self.db_path.clone(),
        }
    }
}

impl PropertyClient<HttpRemote> {
    /// Open a client talking to the configured HTTP API.
    pub async fn open_http(config: &ClientConfig) -> Result<Self> {
        let remote = HttpRemote::from_config(config)?;
        Self::from_config(config, remote).await
    }
}

impl<R: RemoteApi> PropertyClient<R> {
    /// Open a client whose store lives at `config.db_path`.
    pub async fn from_config(config: &ClientConfig, remote: R) -> Result<Self> {
        config.validate()?;
        let db_path = config
            .db_path
            .clone()
            .ok_or_else(|| Error::Config("database path is not set".to_string()))?;
        Self::open_path(db_path, remote, config.sync_options()).await
    }

    /// Open a client backed by a store at the given filesystem path.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        remote: R,
        options: SyncOptions,
    ) -> Result<Self> {
        let db_path = db_path.into();
        let store = LocalStore::open(&db_path).await?;
        tracing::info!("Opened property store at {}", db_path.display());
        Ok(Self::with_store(store, remote, options, Some(db_path)))
    }

    /// Open a client backed by an in-memory store (primarily for tests).
    pub async fn open_in_memory(remote: R, options: SyncOptions) -> Result<Self> {
        let store = LocalStore::open_in_memory().await?;
        Ok(Self::with_store(store, remote, options, None))
    }

    fn with_store(
        store: LocalStore,
        remote: R,
        options: SyncOptions,
        db_path: Option<PathBuf>,
    ) -> Self {
        let repo = RecordRepository::new(Arc::new(store));
        Self {
            manager: SyncManager::new(repo, Arc::new(remote), options),
            db_path,
        }
    }

    /// Store location, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub const fn manager(&self) -> &SyncManager<R> {
        &self.manager
    }

    pub async fn get_records(&self) -> Result<Vec<Record>> {
        self.manager.get_records().await
    }

    pub async fn get_archived_records(&self) -> Result<Vec<Record>> {
        self.manager.get_archived_records().await
    }

    pub async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        self.manager.get_record(id).await
    }

    pub async fn add_record(&self, data: Map<String, Value>) -> Result<Record> {
        self.manager.add_record(data).await
    }

    pub async fn update_record(&self, record: Record) -> Result<Record> {
        self.manager.update_record(record).await
    }

    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        self.manager.delete_record(id).await
    }

    pub async fn archive_record(&self, id: &RecordId) -> Result<Record> {
        self.manager.archive_record(id).await
    }

    pub async fn unarchive_record(&self, id: &RecordId) -> Result<Record> {
        self.manager.unarchive_record(id).await
    }

    pub fn get_status(&self) -> SyncStatus {
        self.manager.status()
    }

    /// Status collapsed into a single state, taking the queue into account.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let pending = self.get_pending_count().await?;
        Ok(self.get_status().state(pending))
    }

    pub async fn get_pending_count(&self) -> Result<usize> {
        self.manager.pending_count().await
    }

    /// Unix ms of the last successful pull.
    pub async fn get_last_sync(&self) -> Result<Option<i64>> {
        self.manager.last_sync().await
    }

    pub fn add_sync_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.manager.add_listener(listener)
    }

    pub fn remove_sync_listener(&self, id: ListenerId) -> bool {
        self.manager.remove_listener(id)
    }

    /// Run a sync pass now; fails with [`Error::Offline`] when disconnected.
    pub async fn force_sync(&self) -> Result<Option<SyncReport>> {
        self.manager.force_sync().await
    }

    pub async fn probe_connection(&self) -> bool {
        self.manager.probe().await
    }

    pub async fn get_dropped_operations(&self) -> Result<Vec<DroppedOperation>> {
        self.manager.dropped_operations().await
    }

    pub async fn clear_dropped_operations(&self) -> Result<u64> {
        self.manager.clear_dropped_operations().await
    }

    /// Feed platform connectivity signals into the client.
    pub fn watch_connectivity(&self, signals: watch::Receiver<bool>) -> JoinHandle<()> {
        self.manager.watch_connectivity(signals)
    }

    /// Probe periodically; the returned handle owns the loop.
    pub fn start_probe_loop(&self, interval: Duration) -> JoinHandle<()> {
        self.manager.spawn_probe_loop(interval)
    }

    /// Wait for background work started by reads to finish.
    pub async fn wait_idle(&self) {
        self.manager.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn offline() -> SyncOptions {
        SyncOptions {
            start_online: false,
            ..SyncOptions::default()
        }
    }

    fn data(address: &str) -> Map<String, Value> {
        json!({ "address": address }).as_object().cloned().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn isolated_instances_do_not_share_state() {
        let first = PropertyClient::open_in_memory(InMemoryRemote::new(), offline())
            .await
            .unwrap();
        let second = PropertyClient::open_in_memory(InMemoryRemote::new(), offline())
            .await
            .unwrap();

        first.add_record(data("1 Oak St")).await.unwrap();

        assert_eq!(first.get_pending_count().await.unwrap(), 1);
        assert_eq!(second.get_pending_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn status_reflects_connectivity_and_queue() {
        let client = PropertyClient::open_in_memory(InMemoryRemote::new(), offline())
            .await
            .unwrap();
        assert_eq!(
            client.get_status(),
            SyncStatus {
                connected: false,
                sync_in_flight: false
            }
        );

        client.add_record(data("1 Oak St")).await.unwrap();
        assert_eq!(client.get_sync_state().await.unwrap(), SyncState::Offline);
        assert!(matches!(client.force_sync().await, Err(Error::Offline)));

        assert!(client.probe_connection().await);
        assert_eq!(client.get_sync_state().await.unwrap(), SyncState::Synced);
        assert!(client.get_last_sync().await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_edits_survive_restart() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("propsync.db");

        let temp_id = {
            let client = PropertyClient::open_path(&db_path, InMemoryRemote::new(), offline())
                .await
                .unwrap();
            let record = client.add_record(data("1 Oak St")).await.unwrap();
            assert_eq!(client.db_path(), Some(db_path.as_path()));
            record.id
        };

        let reopened = PropertyClient::open_path(&db_path, InMemoryRemote::new(), offline())
            .await
            .unwrap();
        let records = reopened.get_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, temp_id);
        assert_eq!(reopened.get_pending_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn from_config_requires_a_database_path() {
        let config = ClientConfig::default();
        let result = PropertyClient::from_config(&config, InMemoryRemote::new()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_operations_can_be_inspected_and_cleared() {
        let client = PropertyClient::open_in_memory(
            InMemoryRemote::new(),
            SyncOptions {
                max_attempts: 1,
                ..offline()
            },
        )
        .await
        .unwrap();
        client.manager().remote().fail_always(
            crate::remote::CallKind::Create,
            crate::remote::RemoteError::Rejected {
                status: 400,
                message: "bad payload".into(),
            },
        );
        client.add_record(data("1 Oak St")).await.unwrap();

        client.probe_connection().await;

        let dropped = client.get_dropped_operations().await.unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(client.get_pending_count().await.unwrap(), 0);
        assert_eq!(client.clear_dropped_operations().await.unwrap(), 1);
        assert!(client.get_dropped_operations().await.unwrap().is_empty());
    }
}

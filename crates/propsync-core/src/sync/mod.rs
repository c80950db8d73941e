//! Sync manager: connectivity tracking, optimistic writes and reconciliation
//! against the remote authority.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::db::{DeleteOutcome, RecordRepository};
use crate::error::{Error, Result};
use crate::models::{DroppedOperation, OperationKind, Record, RecordId};
use crate::remote::{RemoteApi, RemoteError};
use crate::state::SyncStatus;

mod connectivity;
mod events;
mod reconcile;
mod remap;

pub use events::{EventBus, ListenerId, SyncEvent};

use remap::RemapTable;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Failed delivery attempts before a queued operation is dropped
    pub max_attempts: u32,
    /// Bound on a connectivity probe
    pub probe_timeout: Duration,
    /// Connectivity assumed before the first signal or probe
    pub start_online: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            start_online: true,
        }
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Queued operations delivered
    pub success_count: usize,
    /// Queued operations that failed this pass
    pub error_count: usize,
    /// Operations moved to the dropped ledger this pass
    pub dropped_count: usize,
    /// Remote records written into the local store
    pub pulled_count: usize,
    /// Queue length after the pass
    pub pending_count: usize,
}

struct Shared<R> {
    repo: RecordRepository,
    remote: Arc<R>,
    events: EventBus,
    options: SyncOptions,
    connected: AtomicBool,
    sync_in_flight: AtomicBool,
    /// Held by a sync pass or a direct write while it talks to the remote
    push_gate: Mutex<()>,
    /// Temporary ids already replaced by the remote authority
    remapped: StdMutex<RemapTable>,
    background: StdMutex<Option<JoinHandle<()>>>,
}

/// Offline-first coordinator between the local store and the remote authority.
///
/// Cheap to clone; clones share connectivity state, listeners and the
/// in-flight guard.
pub struct SyncManager<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for SyncManager<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Clears the in-flight flag when a pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: RemoteApi> SyncManager<R> {
    pub fn new(repo: RecordRepository, remote: Arc<R>, options: SyncOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                repo,
                remote,
                events: EventBus::new(),
                options,
                connected: AtomicBool::new(options.start_online),
                sync_in_flight: AtomicBool::new(false),
                push_gate: Mutex::new(()),
                remapped: StdMutex::new(RemapTable::default()),
                background: StdMutex::new(None),
            }),
        }
    }

    pub fn repository(&self) -> &RecordRepository {
        &self.shared.repo
    }

    pub fn remote(&self) -> &R {
        &self.shared.remote
    }

    pub fn options(&self) -> SyncOptions {
        self.shared.options
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn is_sync_in_flight(&self) -> bool {
        self.shared.sync_in_flight.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            connected: self.is_connected(),
            sync_in_flight: self.is_sync_in_flight(),
        }
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// Record a connectivity observation.
    ///
    /// Emits `Online`/`Offline` on a transition and runs a full sync pass when
    /// connectivity comes back. Returns whether the state changed.
    pub async fn set_connectivity(&self, online: bool) -> bool {
        let was_online = self.shared.connected.swap(online, Ordering::AcqRel);
        if was_online == online {
            return false;
        }

        if online {
            tracing::info!("Connectivity restored");
            self.emit(SyncEvent::Online);
            if let Err(error) = self.sync_to_server().await {
                tracing::warn!("Sync after reconnect failed: {}", error);
            }
        } else {
            tracing::info!("Connectivity lost");
            self.emit(SyncEvent::Offline);
        }
        true
    }

    /// Round-trip to the remote liveness endpoint and update connectivity from the result
    pub async fn probe(&self) -> bool {
        let reachable = match tokio::time::timeout(
            self.shared.options.probe_timeout,
            self.shared.remote.ping(),
        )
        .await
        {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                tracing::debug!("Connectivity probe failed: {}", error);
                false
            }
            Err(_) => {
                tracing::debug!(
                    "Connectivity probe timed out after {:?}",
                    self.shared.options.probe_timeout
                );
                false
            }
        };

        self.set_connectivity(reachable).await;
        reachable
    }

    /// Run one push-then-pull pass.
    ///
    /// Returns `Ok(None)` without doing anything when disconnected or when
    /// another pass is already running. Remote failures are counted against
    /// the queued operation or, for the pull, reported as a `SyncError` event;
    /// local storage failures end the pass and are returned.
    pub async fn sync_to_server(&self) -> Result<Option<SyncReport>> {
        if !self.is_connected() {
            tracing::debug!("Skipping sync while offline");
            return Ok(None);
        }
        let Some(_in_flight) = InFlight::acquire(&self.shared.sync_in_flight) else {
            tracing::debug!("Sync already in flight");
            return Ok(None);
        };
        let _gate = self.shared.push_gate.lock().await;

        self.emit(SyncEvent::SyncStart);
        match self.run_pass().await {
            Ok(report) => {
                tracing::info!(
                    "Sync complete: {} delivered, {} failed, {} pending",
                    report.success_count,
                    report.error_count,
                    report.pending_count
                );
                self.emit(SyncEvent::SyncComplete {
                    pending_count: report.pending_count,
                    success_count: report.success_count,
                    error_count: report.error_count,
                });
                Ok(Some(report))
            }
            Err(error) => {
                tracing::warn!("Sync failed: {}", error);
                self.emit(SyncEvent::SyncError {
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Explicit sync requested by the caller; fails with [`Error::Offline`] when disconnected
    pub async fn force_sync(&self) -> Result<Option<SyncReport>> {
        if !self.is_connected() {
            return Err(Error::Offline);
        }
        self.sync_to_server().await
    }

    /// Start a detached sync pass; returns false when none was started
    pub fn spawn_background_sync(&self) -> bool {
        if !self.is_connected() || self.is_sync_in_flight() {
            return false;
        }

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(error) = manager.sync_to_server().await {
                tracing::warn!("Background sync failed: {}", error);
            }
        });
        *self
            .shared
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Wait for the most recent background sync to finish
    pub async fn wait_idle(&self) {
        let handle = self
            .shared
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(error) = handle.await {
                tracing::warn!("Background sync task ended abnormally: {}", error);
            }
        }
    }

    /// Active records, served from the local store.
    ///
    /// An empty store is filled from the remote first when connected; a
    /// non-empty one triggers a background sync instead.
    pub async fn get_records(&self) -> Result<Vec<Record>> {
        if self.shared.repo.count_records().await? > 0 {
            let records = self.shared.repo.get_active_records().await?;
            self.spawn_background_sync();
            return Ok(records);
        }

        if self.is_connected() {
            match self.pull_remote().await {
                Ok(pulled) => tracing::debug!("Filled empty cache with {} records", pulled),
                Err(Error::Remote(error)) => {
                    tracing::warn!("Could not fill empty cache: {}", error);
                }
                Err(error) => return Err(error),
            }
        }
        self.shared.repo.get_active_records().await
    }

    pub async fn get_archived_records(&self) -> Result<Vec<Record>> {
        self.shared.repo.get_archived_records().await
    }

    pub async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        let id = self.resolve_id(id.clone());
        self.shared.repo.get_record(&id).await
    }

    /// Create a record locally, then try to deliver it directly when online
    pub async fn add_record(&self, fields: Map<String, Value>) -> Result<Record> {
        let record = self
            .shared
            .repo
            .create_local(Record::from_fields(fields))
            .await?;
        self.deliver_create_directly(record).await
    }

    /// Store a new snapshot locally, then try to deliver it directly when online
    pub async fn update_record(&self, record: Record) -> Result<Record> {
        let mut record = record;
        record.id = self.resolve_id(record.id);
        if self.shared.repo.get_record(&record.id).await?.is_none() {
            return Err(Error::NotFound(record.id.to_string()));
        }
        if !record.id.is_temporary() {
            // A snapshot taken before its create was accepted still carries the flag
            record.is_offline_created = false;
        }

        let saved = self.shared.repo.update_local(record).await?;
        if saved.is_offline_created {
            return self.deliver_create_directly(saved).await;
        }

        let Some(id) = saved.id.as_persistent() else {
            return Ok(saved);
        };
        let Some(_gate) = self.direct_gate() else {
            return Ok(saved);
        };

        match self
            .shared
            .remote
            .update_record(id, saved.remote_payload())
            .await
        {
            Ok(server) => self.shared.repo.accept_updated(server).await,
            Err(error) => {
                tracing::warn!("Direct update of {} failed, left queued: {}", id, error);
                Ok(saved)
            }
        }
    }

    /// Remove a record locally, then try to delete it remotely when online
    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let id = self.resolve_id(id.clone());
        if self.shared.repo.delete_local(&id).await? == DeleteOutcome::Discarded {
            return Ok(());
        }

        let Some(remote_id) = id.as_persistent() else {
            return Ok(());
        };
        self.shared
            .remapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forget_target(remote_id);
        let Some(_gate) = self.direct_gate() else {
            return Ok(());
        };

        match self.shared.remote.delete_record(remote_id).await {
            Ok(()) | Err(RemoteError::NotFound) => {
                self.shared
                    .repo
                    .remove_pending(OperationKind::Delete, &id)
                    .await?;
            }
            Err(error) => {
                tracing::warn!("Direct delete of {} failed, left queued: {}", id, error);
            }
        }
        Ok(())
    }

    pub async fn archive_record(&self, id: &RecordId) -> Result<Record> {
        self.set_archived(id, true).await
    }

    pub async fn unarchive_record(&self, id: &RecordId) -> Result<Record> {
        self.set_archived(id, false).await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.shared.repo.pending_count().await
    }

    pub async fn last_sync(&self) -> Result<Option<i64>> {
        self.shared.repo.last_sync().await
    }

    pub async fn dropped_operations(&self) -> Result<Vec<DroppedOperation>> {
        self.shared.repo.dropped_operations().await
    }

    pub async fn clear_dropped_operations(&self) -> Result<u64> {
        self.shared.repo.clear_dropped().await
    }

    /// Flip the archived flag through the update path, with a direct toggle call when online
    async fn set_archived(&self, id: &RecordId, archived: bool) -> Result<Record> {
        let id = self.resolve_id(id.clone());
        let mut record = self
            .shared
            .repo
            .get_record(&id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        record.archived = archived;

        let saved = self.shared.repo.update_local(record).await?;
        if saved.is_offline_created {
            return self.deliver_create_directly(saved).await;
        }

        let Some(remote_id) = saved.id.as_persistent() else {
            return Ok(saved);
        };
        let Some(_gate) = self.direct_gate() else {
            return Ok(saved);
        };
        let Some(queued) = self.shared.repo.latest_pending_for(&saved.id).await? else {
            return Ok(saved);
        };

        match self.shared.remote.set_archived(remote_id, archived).await {
            Ok(server) => {
                self.shared.repo.accept_toggled(&queued, server).await?;
                Ok(self
                    .shared
                    .repo
                    .get_record(&saved.id)
                    .await?
                    .unwrap_or(saved))
            }
            Err(error) => {
                tracing::warn!(
                    "Direct archive toggle of {} failed, left queued: {}",
                    remote_id,
                    error
                );
                Ok(saved)
            }
        }
    }

    /// Send a queued create right away; the caller gets the authoritative record on success
    async fn deliver_create_directly(&self, record: Record) -> Result<Record> {
        let Some(_gate) = self.direct_gate() else {
            return Ok(record);
        };

        match self
            .shared
            .remote
            .create_record(record.remote_payload())
            .await
        {
            Ok(server) => {
                let accepted = self.shared.repo.accept_created(&record.id, server).await?;
                self.remember_remap(&record.id, &accepted.id);
                Ok(accepted)
            }
            Err(error) => {
                tracing::warn!("Direct create of {} failed, left queued: {}", record.id, error);
                Ok(record)
            }
        }
    }

    /// Permission to call the remote outside a sync pass
    fn direct_gate(&self) -> Option<MutexGuard<'_, ()>> {
        if !self.is_connected() {
            return None;
        }
        self.shared.push_gate.try_lock().ok()
    }

    fn remember_remap(&self, temp_id: &RecordId, server_id: &RecordId) {
        if let (RecordId::Temporary(temp), Some(id)) = (temp_id, server_id.as_persistent()) {
            self.shared
                .remapped
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(temp.clone(), id);
        }
    }

    /// Translate a temporary id that has already been replaced remotely
    fn resolve_id(&self, id: RecordId) -> RecordId {
        match &id {
            RecordId::Temporary(temp) => self
                .shared
                .remapped
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(temp)
                .map_or(id.clone(), RecordId::Persistent),
            RecordId::Persistent(_) => id,
        }
    }

    fn emit(&self, event: SyncEvent) {
        self.shared.events.emit(&event);
    }
}

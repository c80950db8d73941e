//! Push and pull phases of a sync pass

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::models::{PendingChange, PendingOperation, RecordId};
use crate::remote::{RemoteApi, RemoteError};
use crate::util::now_millis;

use super::{SyncEvent, SyncManager, SyncReport};

/// What happened to one queued operation
enum Delivery {
    /// Remote accepted it and the queue entry is gone
    Applied,
    /// Nothing to send; the entry was discarded
    Redundant,
}

#[derive(Default)]
struct PushOutcome {
    success_count: usize,
    error_count: usize,
    dropped_count: usize,
}

impl<R: RemoteApi> SyncManager<R> {
    /// Push, then pull. Remote failures are counted or reported; only local
    /// storage errors end the pass early.
    pub(super) async fn run_pass(&self) -> Result<SyncReport> {
        let push = self.push_pending().await?;
        let pulled_count = match self.pull_remote().await {
            Ok(pulled) => pulled,
            Err(Error::Remote(error)) => {
                tracing::warn!("Pull failed, keeping cached records: {}", error);
                self.emit(SyncEvent::SyncError {
                    message: error.to_string(),
                });
                0
            }
            Err(error) => return Err(error),
        };

        Ok(SyncReport {
            success_count: push.success_count,
            error_count: push.error_count,
            dropped_count: push.dropped_count,
            pulled_count,
            pending_count: self.shared.repo.pending_count().await?,
        })
    }

    /// Deliver the queue sequentially in enqueue order.
    ///
    /// Once an operation fails, later operations for the same record wait for
    /// the next pass so they never overtake it.
    async fn push_pending(&self) -> Result<PushOutcome> {
        let queue = self.shared.repo.list_pending().await?;
        let mut outcome = PushOutcome::default();
        if queue.is_empty() {
            return Ok(outcome);
        }

        tracing::debug!("Pushing {} queued operations", queue.len());
        let mut held: HashSet<RecordId> = HashSet::new();
        for operation in queue {
            let record_id = self.resolve_id(operation.record_id().clone());
            if held.contains(&record_id) {
                tracing::debug!(
                    "Holding queued {} for {} behind an earlier failure",
                    operation.operation(),
                    record_id
                );
                continue;
            }

            match self.deliver(&operation).await {
                Ok(Delivery::Applied) => outcome.success_count += 1,
                Ok(Delivery::Redundant) => {}
                Err(Error::Remote(error)) => {
                    outcome.error_count += 1;
                    held.insert(record_id);
                    if self.register_failure(operation, &error).await? {
                        outcome.dropped_count += 1;
                    }
                }
                Err(error) => return Err(error),
            }
        }
        Ok(outcome)
    }

    async fn deliver(&self, operation: &PendingOperation) -> Result<Delivery> {
        let repo = &self.shared.repo;
        let remote = &self.shared.remote;

        match &operation.change {
            PendingChange::Create(record) => {
                let server = remote.create_record(record.remote_payload()).await?;
                let accepted = repo.accept_created(&record.id, server).await?;
                tracing::debug!("Delivered create {} -> {}", record.id, accepted.id);
                self.remember_remap(&record.id, &accepted.id);
                Ok(Delivery::Applied)
            }
            PendingChange::Update(record) => {
                let Some(id) = self.resolve_id(record.id.clone()).as_persistent() else {
                    return self.discard_unresolved(operation).await;
                };
                let server = match remote.update_record(id, record.remote_payload()).await {
                    Ok(server) => server,
                    Err(RemoteError::NotFound) => {
                        if !self.deleted_locally(id).await? {
                            return Err(RemoteError::NotFound.into());
                        }
                        tracing::debug!("Record {} deleted on both sides; dropping update", id);
                        repo.complete_pending(operation).await?;
                        return Ok(Delivery::Redundant);
                    }
                    Err(error) => return Err(error.into()),
                };
                repo.accept_delivered(operation, server).await?;
                tracing::debug!("Delivered update {}", id);
                Ok(Delivery::Applied)
            }
            PendingChange::Delete(record_id) => {
                let Some(id) = self.resolve_id(record_id.clone()).as_persistent() else {
                    return self.discard_unresolved(operation).await;
                };
                match remote.delete_record(id).await {
                    Ok(()) => tracing::debug!("Delivered delete {}", id),
                    Err(RemoteError::NotFound) => {
                        tracing::debug!("Record {} already gone remotely", id);
                    }
                    Err(error) => return Err(error.into()),
                }
                repo.complete_pending(operation).await?;
                Ok(Delivery::Applied)
            }
        }
    }

    async fn deleted_locally(&self, id: u64) -> Result<bool> {
        Ok(self
            .shared
            .repo
            .get_record(&RecordId::Persistent(id))
            .await?
            .is_none())
    }

    /// An update or delete whose record never reached the remote has nothing to act on
    async fn discard_unresolved(&self, operation: &PendingOperation) -> Result<Delivery> {
        tracing::warn!(
            "Discarding queued {} for unsynced record {}",
            operation.operation(),
            operation.record_id()
        );
        self.shared.repo.complete_pending(operation).await?;
        Ok(Delivery::Redundant)
    }

    /// Count a failed attempt; returns true when the operation was dropped.
    ///
    /// Network failures count the same as rejections.
    async fn register_failure(
        &self,
        mut operation: PendingOperation,
        error: &RemoteError,
    ) -> Result<bool> {
        operation.attempts += 1;

        if operation.attempts < self.shared.options.max_attempts {
            tracing::debug!(
                "Queued {} for {} {} (attempt {}): {}",
                operation.operation(),
                operation.record_id(),
                if error.is_transient() { "could not reach the remote" } else { "was rejected" },
                operation.attempts,
                error
            );
            self.shared.repo.record_attempt(&operation).await?;
            return Ok(false);
        }

        tracing::warn!(
            "Dropping queued {} for {} after {} attempts: {}",
            operation.operation(),
            operation.record_id(),
            operation.attempts,
            error
        );
        let event = SyncEvent::OperationDropped {
            operation: operation.operation(),
            record_id: operation.record_id().clone(),
            attempts: operation.attempts,
        };
        self.shared
            .repo
            .drop_pending(operation, &error.to_string())
            .await?;
        self.emit(event);
        Ok(true)
    }

    /// Copy the authoritative record set into the local store.
    ///
    /// Records that are unsynced locally or still have queued operations keep
    /// their local copy; unchanged records are not rewritten. Returns how many
    /// records were written.
    pub(super) async fn pull_remote(&self) -> Result<usize> {
        let repo = &self.shared.repo;
        let remote_records = self.shared.remote.list_records().await?;

        let busy: HashSet<RecordId> = repo
            .list_pending()
            .await?
            .iter()
            .map(|op| op.record_id().clone())
            .collect();
        let local: HashMap<RecordId, _> = repo
            .get_all_records()
            .await?
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();

        let mut written = 0;
        for record in remote_records {
            if busy.contains(&record.id) {
                continue;
            }
            match local.get(&record.id) {
                Some(existing) if existing.is_offline_created => continue,
                Some(existing) if existing.same_content(&record) => continue,
                _ => {}
            }
            repo.put_remote(record).await?;
            written += 1;
        }

        repo.set_last_sync(now_millis()).await?;
        tracing::debug!("Pulled {} changed records", written);
        Ok(written)
    }
}

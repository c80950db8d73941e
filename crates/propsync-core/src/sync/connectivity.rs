//! Connectivity sources feeding the sync manager

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::remote::RemoteApi;

use super::SyncManager;

impl<R: RemoteApi> SyncManager<R> {
    /// Follow platform connectivity signals until the sender is dropped.
    ///
    /// The current value is applied immediately, then every change.
    pub fn watch_connectivity(&self, mut signals: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let online = *signals.borrow_and_update();
            manager.set_connectivity(online).await;

            while signals.changed().await.is_ok() {
                let online = *signals.borrow_and_update();
                manager.set_connectivity(online).await;
            }
            tracing::debug!("Connectivity signal source closed");
        })
    }

    /// Probe the remote every `interval` until the handle is aborted
    pub fn spawn_probe_loop(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.probe().await;
            }
        })
    }
}

//! Sync event notification

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::models::{OperationKind, RecordId};

/// Something observable happened in the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Connectivity went from unavailable to available
    Online,
    /// Connectivity went from available to unavailable
    Offline,
    /// A sync pass began
    SyncStart,
    /// A sync pass finished
    #[serde(rename_all = "camelCase")]
    SyncComplete {
        pending_count: usize,
        success_count: usize,
        error_count: usize,
    },
    /// A sync pass was aborted
    SyncError { message: String },
    /// A queued operation hit the retry cap and moved to the dropped ledger
    #[serde(rename_all = "camelCase")]
    OperationDropped {
        operation: OperationKind,
        record_id: RecordId,
        attempts: u32,
    },
}

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<ListenerId, Listener>,
}

/// Publish/subscribe channel for [`SyncEvent`]s.
///
/// Listeners run synchronously on the emitting task, in registration order.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let mut listeners = self.lock();
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        listeners.entries.insert(id, Arc::new(listener));
        id
    }

    /// Returns false if the listener was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn emit(&self, event: &SyncEvent) {
        // Snapshot first so listeners may (un)subscribe while being notified
        let listeners: Vec<Listener> = self.lock().entries.values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn listeners_receive_events_until_removed() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

        bus.emit(&SyncEvent::Online);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&SyncEvent::Offline);

        assert_eq!(*seen.lock().unwrap(), vec![SyncEvent::Online]);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::default();

        let handle = bus.clone();
        let own_id = Arc::clone(&slot);
        let id = bus.subscribe(move |_| {
            if let Some(id) = own_id.lock().unwrap().take() {
                handle.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(&SyncEvent::SyncStart);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(SyncEvent::SyncComplete {
            pending_count: 1,
            success_count: 2,
            error_count: 0,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "syncComplete",
                "pendingCount": 1,
                "successCount": 2,
                "errorCount": 0
            })
        );
    }
}

//! propsync-core - Offline-first sync engine for property records
//!
//! This crate contains the record models, the local durable store, the
//! remote authority clients and the sync manager used by every propsync
//! front-end.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{DroppedOperation, Record, RecordId};
pub use remote::{HttpRemote, InMemoryRemote, RemoteApi, RemoteError};
pub use services::PropertyClient;
pub use state::{SyncState, SyncStatus};
pub use sync::{ListenerId, SyncEvent, SyncOptions, SyncReport};

//! Local durable store and record access layer

mod connection;
mod metadata;
mod migrations;
mod queue;
mod repository;

pub use connection::{LocalStore, StoreWrite};
pub use repository::{DeleteOutcome, RecordRepository, LAST_SYNC_KEY};

//! Local durable store: connection management and the records table

use std::path::{Path, PathBuf};

use libsql::{params, Builder, Connection, Database as LibSqlDatabase};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::models::{
    ArchiveFilter, OperationKind, PendingChange, PendingOperation, Record, RecordId,
};
use crate::util::now_millis;

use super::migrations;
use super::queue;

/// A single write inside an atomic batch
#[derive(Debug, Clone)]
pub enum StoreWrite {
    /// Insert or replace a record (stamps `last_modified`)
    PutRecord(Record),
    /// Remove a record; absent keys are ignored
    DeleteRecord(RecordId),
    /// Append an operation at the tail of the queue
    AppendPending {
        change: PendingChange,
        timestamp: i64,
    },
    /// Insert or replace a record unless a queued operation still references it
    PutRecordIfSettled(Record),
    /// Remove one queued operation by sequence number
    DeletePending(i64),
    /// Remove one queued operation unless an earlier one targets the same record
    DeletePendingIfOldest { seq: i64, id: RecordId },
    /// Remove queued operations of one kind for one record
    DeletePendingMatching(OperationKind, RecordId),
    /// Remove every queued operation for one record
    DeletePendingFor(RecordId),
    /// Move a queued operation to the dropped-operations ledger
    DropPending {
        operation: PendingOperation,
        last_error: String,
    },
}

/// libSQL-backed store holding the records, pending queue and metadata tables.
///
/// All access goes through one connection guarded by an async mutex, so each
/// call (and each [`LocalStore::apply`] batch) is atomic with respect to the
/// others.
pub struct LocalStore {
    _db: LibSqlDatabase,
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open the store at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. Any failure to provide durable storage
    /// is reported as [`Error::StorageUnavailable`].
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(unavailable)?;
        }

        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str)
            .build()
            .await
            .map_err(unavailable)?;
        let store = Self::initialize(db, Some(path)).await?;
        tracing::debug!("Opened local store at {}", path_str);
        Ok(store)
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(unavailable)?;
        Self::initialize(db, None).await
    }

    async fn initialize(db: LibSqlDatabase, path: Option<PathBuf>) -> Result<Self> {
        let conn = db.connect().map_err(unavailable)?;
        configure(&conn).await.map_err(unavailable)?;
        migrations::run(&conn).await.map_err(unavailable)?;

        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Filesystem location, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) async fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Every record, optionally restricted to one side of the archived index
    pub async fn get_all_records(&self, filter: Option<ArchiveFilter>) -> Result<Vec<Record>> {
        let conn = self.connection().await;
        let mut rows = match filter {
            Some(filter) => {
                conn.query(
                    "SELECT data FROM records WHERE archived = ? ORDER BY rowid",
                    [filter.archived_flag()],
                )
                .await?
            }
            None => {
                conn.query("SELECT data FROM records ORDER BY rowid", ())
                    .await?
            }
        };

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let data: String = row.get(0)?;
            records.push(serde_json::from_str(&data)?);
        }
        Ok(records)
    }

    /// Fetch one record by id
    pub async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        let conn = self.connection().await;
        let mut rows = conn
            .query("SELECT data FROM records WHERE id = ?", [id.storage_key()])
            .await?;

        match rows.next().await? {
            Some(row) => {
                let data: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace a record, returning it with `last_modified` stamped
    pub async fn put_record(&self, record: &Record) -> Result<Record> {
        let conn = self.connection().await;
        put_record_on(&conn, record).await
    }

    /// Remove a record; absent ids are not an error
    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let conn = self.connection().await;
        delete_record_on(&conn, id).await
    }

    /// Number of cached records, archived included
    pub async fn count_records(&self) -> Result<usize> {
        let conn = self.connection().await;
        count(&conn, "SELECT COUNT(*) FROM records").await
    }

    /// Apply several writes in one transaction
    pub async fn apply(&self, writes: Vec<StoreWrite>) -> Result<()> {
        let conn = self.connection().await;
        conn.execute("BEGIN IMMEDIATE", ()).await?;

        for write in writes {
            if let Err(e) = apply_write(&conn, write).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
        Ok(())
    }
}

/// Configure `SQLite` for a single-writer local cache
async fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases reject WAL; the remaining pragmas still apply
    conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
    conn.execute("PRAGMA synchronous = NORMAL;", ()).await.ok();
    conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
    Ok(())
}

fn unavailable(error: impl std::fmt::Display) -> Error {
    Error::StorageUnavailable(error.to_string())
}

pub(super) async fn count(conn: &Connection, sql: &str) -> Result<usize> {
    let mut rows = conn.query(sql, ()).await?;
    let total: i64 = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };
    Ok(usize::try_from(total).unwrap_or_default())
}

async fn put_record_on(conn: &Connection, record: &Record) -> Result<Record> {
    let mut stamped = record.clone();
    stamped.last_modified = Some(now_millis());
    let data = serde_json::to_string(&stamped)?;

    conn.execute(
        "INSERT OR REPLACE INTO records (id, archived, is_offline_created, last_modified, data)
         VALUES (?, ?, ?, ?, ?)",
        params![
            stamped.id.storage_key(),
            i64::from(stamped.archived),
            i64::from(stamped.is_offline_created),
            stamped.last_modified.unwrap_or_default(),
            data
        ],
    )
    .await?;

    Ok(stamped)
}

async fn delete_record_on(conn: &Connection, id: &RecordId) -> Result<()> {
    conn.execute("DELETE FROM records WHERE id = ?", [id.storage_key()])
        .await?;
    Ok(())
}

async fn apply_write(conn: &Connection, write: StoreWrite) -> Result<()> {
    match write {
        StoreWrite::PutRecord(record) => put_record_on(conn, &record).await.map(|_| ()),
        StoreWrite::DeleteRecord(id) => delete_record_on(conn, &id).await,
        StoreWrite::AppendPending { change, timestamp } => {
            queue::append_pending_on(conn, &change, timestamp)
                .await
                .map(|_| ())
        }
        StoreWrite::PutRecordIfSettled(record) => {
            if queue::has_pending_on(conn, &record.id).await? {
                tracing::debug!("Kept local copy of {}; operations still queued", record.id);
                Ok(())
            } else {
                put_record_on(conn, &record).await.map(|_| ())
            }
        }
        StoreWrite::DeletePending(seq) => queue::delete_pending_on(conn, seq).await,
        StoreWrite::DeletePendingIfOldest { seq, id } => {
            queue::delete_pending_if_oldest_on(conn, seq, &id).await
        }
        StoreWrite::DeletePendingMatching(kind, id) => {
            queue::delete_pending_matching_on(conn, kind, &id)
                .await
                .map(|_| ())
        }
        StoreWrite::DeletePendingFor(id) => queue::delete_pending_for_on(conn, &id).await,
        StoreWrite::DropPending {
            operation,
            last_error,
        } => queue::drop_pending_on(conn, &operation, &last_error).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn property(id: u64, address: &str, archived: bool) -> Record {
        let mut record = Record::from_fields(serde_json::Map::new()).with("address", address);
        record.id = RecordId::Persistent(id);
        record.archived = archived;
        record
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert!(store.path().is_none());
        assert_eq!(store.count_records().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_stamps_last_modified_and_replaces_by_key() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let first = store.put_record(&property(1, "1 Oak St", false)).await.unwrap();
        assert!(first.last_modified.is_some());

        store.put_record(&property(1, "1 Oak Street", false)).await.unwrap();
        let fetched = store.get_record(&RecordId::Persistent(1)).await.unwrap().unwrap();
        assert_eq!(fetched.get("address"), Some(&json!("1 Oak Street")));
        assert_eq!(store.count_records().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_all_filters_on_archived_index() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.put_record(&property(1, "active", false)).await.unwrap();
        store.put_record(&property(2, "archived", true)).await.unwrap();

        let active = store
            .get_all_records(Some(ArchiveFilter::Active))
            .await
            .unwrap();
        let archived = store
            .get_all_records(Some(ArchiveFilter::Archived))
            .await
            .unwrap();
        let all = store.get_all_records(None).await.unwrap();

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, RecordId::Persistent(1));
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, RecordId::Persistent(2));
        assert_eq!(all.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_is_silent_for_missing_keys() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.delete_record(&RecordId::Persistent(99)).await.unwrap();

        store.put_record(&property(5, "5 Pine Ct", false)).await.unwrap();
        store.delete_record(&RecordId::Persistent(5)).await.unwrap();
        assert!(store
            .get_record(&RecordId::Persistent(5))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn apply_swaps_records_atomically() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let local = Record::new_local(serde_json::Map::new()).with("address", "1 Oak St");
        store.put_record(&local).await.unwrap();

        store
            .apply(vec![
                StoreWrite::DeleteRecord(local.id.clone()),
                StoreWrite::PutRecord(property(7, "1 Oak St", false)),
            ])
            .await
            .unwrap();

        let all = store.get_all_records(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, RecordId::Persistent(7));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn settled_put_skips_records_with_queued_operations() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.put_record(&property(8, "local edit", false)).await.unwrap();
        store
            .append_pending(&PendingChange::Delete(RecordId::Persistent(8)), 1)
            .await
            .unwrap();

        store
            .apply(vec![
                StoreWrite::PutRecordIfSettled(property(8, "remote copy", false)),
                StoreWrite::PutRecordIfSettled(property(9, "untouched", false)),
            ])
            .await
            .unwrap();

        let kept = store.get_record(&RecordId::Persistent(8)).await.unwrap().unwrap();
        assert_eq!(kept.get("address"), Some(&json!("local edit")));
        assert!(store
            .get_record(&RecordId::Persistent(9))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_survive_reopen() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("propsync.db");

        {
            let store = LocalStore::open(&db_path).await.unwrap();
            store.put_record(&property(3, "3 Ash Ln", false)).await.unwrap();
            store.set_metadata("lastSync", "123").await.unwrap();
        }

        let reopened = LocalStore::open(&db_path).await.unwrap();
        assert_eq!(reopened.count_records().await.unwrap(), 1);
        assert_eq!(
            reopened.get_metadata("lastSync").await.unwrap().as_deref(),
            Some("123")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_fails_with_storage_unavailable() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let result = LocalStore::open(blocker.join("propsync.db")).await;
        assert!(matches!(result, Err(Error::StorageUnavailable(_))));
    }
}

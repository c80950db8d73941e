//! Pending-operation queue and dropped-operation ledger tables

use libsql::{params, Connection, Row};

use crate::error::Result;
use crate::models::{
    DroppedOperation, OperationKind, PendingChange, PendingOperation, Record, RecordId,
};
use crate::util::now_millis;

use super::connection::{count, LocalStore};

impl LocalStore {
    /// Append an operation at the tail of the queue
    pub async fn append_pending(
        &self,
        change: &PendingChange,
        timestamp: i64,
    ) -> Result<PendingOperation> {
        let conn = self.connection().await;
        append_pending_on(&conn, change, timestamp).await
    }

    /// The whole queue in enqueue order
    pub async fn pending_operations(&self) -> Result<Vec<PendingOperation>> {
        let conn = self.connection().await;
        let mut rows = conn
            .query(
                "SELECT seq, operation, data, timestamp, attempts
                 FROM pending_operations
                 ORDER BY seq ASC",
                (),
            )
            .await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(parse_pending(&row)?);
        }
        Ok(operations)
    }

    /// Number of queued operations
    pub async fn count_pending(&self) -> Result<usize> {
        let conn = self.connection().await;
        count(&conn, "SELECT COUNT(*) FROM pending_operations").await
    }

    /// Persist a new attempt counter for a queued operation
    pub async fn set_pending_attempts(&self, seq: i64, attempts: u32) -> Result<()> {
        let conn = self.connection().await;
        conn.execute(
            "UPDATE pending_operations SET attempts = ? WHERE seq = ?",
            params![i64::from(attempts), seq],
        )
        .await?;
        Ok(())
    }

    /// Replace the payload snapshot of a queued operation, keeping its position
    pub async fn replace_pending_change(&self, seq: i64, change: &PendingChange) -> Result<()> {
        let conn = self.connection().await;
        conn.execute(
            "UPDATE pending_operations SET operation = ?, record_id = ?, data = ? WHERE seq = ?",
            params![
                change.kind().as_str(),
                change.record_id().storage_key(),
                encode_change(change)?,
                seq
            ],
        )
        .await?;
        Ok(())
    }

    /// Remove one queued operation by sequence number
    pub async fn delete_pending(&self, seq: i64) -> Result<()> {
        let conn = self.connection().await;
        delete_pending_on(&conn, seq).await
    }

    /// Remove every queued operation of `kind` whose payload id is `id`
    pub async fn delete_pending_matching(&self, kind: OperationKind, id: &RecordId) -> Result<u64> {
        let conn = self.connection().await;
        delete_pending_matching_on(&conn, kind, id).await
    }

    /// Operations evicted at the retry cap, most recent first
    pub async fn dropped_operations(&self) -> Result<Vec<DroppedOperation>> {
        let conn = self.connection().await;
        let mut rows = conn
            .query(
                "SELECT id, operation, data, timestamp, attempts, last_error, dropped_at
                 FROM dropped_operations
                 ORDER BY dropped_at DESC, id DESC",
                (),
            )
            .await?;

        let mut dropped = Vec::new();
        while let Some(row) = rows.next().await? {
            let operation: String = row.get(1)?;
            let data: String = row.get(2)?;
            dropped.push(DroppedOperation {
                id: row.get(0)?,
                change: decode_change(operation.parse()?, &data)?,
                timestamp: row.get(3)?,
                attempts: attempts_from(row.get(4)?),
                last_error: row.get(5)?,
                dropped_at: row.get(6)?,
            });
        }
        Ok(dropped)
    }

    /// Empty the dropped-operation ledger, returning how many rows were removed
    pub async fn clear_dropped(&self) -> Result<u64> {
        let conn = self.connection().await;
        Ok(conn.execute("DELETE FROM dropped_operations", ()).await?)
    }
}

pub(super) async fn append_pending_on(
    conn: &Connection,
    change: &PendingChange,
    timestamp: i64,
) -> Result<PendingOperation> {
    conn.execute(
        "INSERT INTO pending_operations (operation, record_id, data, timestamp, attempts)
         VALUES (?, ?, ?, ?, 0)",
        params![
            change.kind().as_str(),
            change.record_id().storage_key(),
            encode_change(change)?,
            timestamp
        ],
    )
    .await?;

    Ok(PendingOperation {
        seq: conn.last_insert_rowid(),
        change: change.clone(),
        timestamp,
        attempts: 0,
    })
}

pub(super) async fn delete_pending_matching_on(
    conn: &Connection,
    kind: OperationKind,
    id: &RecordId,
) -> Result<u64> {
    let removed = conn
        .execute(
            "DELETE FROM pending_operations WHERE operation = ? AND record_id = ?",
            params![kind.as_str(), id.storage_key()],
        )
        .await?;
    Ok(removed)
}

pub(super) async fn delete_pending_for_on(conn: &Connection, id: &RecordId) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_operations WHERE record_id = ?",
        [id.storage_key()],
    )
    .await?;
    Ok(())
}

pub(super) async fn has_pending_on(conn: &Connection, id: &RecordId) -> Result<bool> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM pending_operations WHERE record_id = ? LIMIT 1",
            [id.storage_key()],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}

pub(super) async fn delete_pending_if_oldest_on(
    conn: &Connection,
    seq: i64,
    id: &RecordId,
) -> Result<()> {
    conn.execute(
        "DELETE FROM pending_operations
         WHERE seq = ?1
           AND NOT EXISTS (
               SELECT 1 FROM pending_operations WHERE record_id = ?2 AND seq < ?1
           )",
        params![seq, id.storage_key()],
    )
    .await?;
    Ok(())
}

pub(super) async fn delete_pending_on(conn: &Connection, seq: i64) -> Result<()> {
    conn.execute("DELETE FROM pending_operations WHERE seq = ?", [seq])
        .await?;
    Ok(())
}

pub(super) async fn drop_pending_on(
    conn: &Connection,
    operation: &PendingOperation,
    last_error: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO dropped_operations
            (operation, record_id, data, timestamp, attempts, last_error, dropped_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            operation.operation().as_str(),
            operation.record_id().storage_key(),
            encode_change(&operation.change)?,
            operation.timestamp,
            i64::from(operation.attempts),
            last_error,
            now_millis()
        ],
    )
    .await?;
    delete_pending_on(conn, operation.seq).await
}

fn encode_change(change: &PendingChange) -> Result<String> {
    Ok(match change {
        PendingChange::Create(record) | PendingChange::Update(record) => {
            serde_json::to_string(record)?
        }
        PendingChange::Delete(id) => serde_json::to_string(id)?,
    })
}

fn decode_change(kind: OperationKind, data: &str) -> Result<PendingChange> {
    Ok(match kind {
        OperationKind::Create => PendingChange::Create(serde_json::from_str::<Record>(data)?),
        OperationKind::Update => PendingChange::Update(serde_json::from_str::<Record>(data)?),
        OperationKind::Delete => PendingChange::Delete(serde_json::from_str::<RecordId>(data)?),
    })
}

fn parse_pending(row: &Row) -> Result<PendingOperation> {
    let operation: String = row.get(1)?;
    let data: String = row.get(2)?;
    Ok(PendingOperation {
        seq: row.get(0)?,
        change: decode_change(operation.parse()?, &data)?,
        timestamp: row.get(3)?,
        attempts: attempts_from(row.get(4)?),
    })
}

fn attempts_from(raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or_default()
}

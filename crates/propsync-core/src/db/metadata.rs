//! Metadata table: single-valued key/value pairs

use crate::error::Result;

use super::connection::LocalStore;

impl LocalStore {
    /// Read a metadata value
    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection().await;
        let mut rows = conn
            .query("SELECT value FROM metadata WHERE key = ?", [key])
            .await?;

        if let Some(row) = rows.next().await? {
            let value: String = row.get(0)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    /// Write a metadata value, replacing any previous one
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.connection().await;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?, ?)",
            [key, value],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_key_reads_as_none() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert_eq!(store.get_metadata("lastSync").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_overwrites_previous_value() {
        let store = LocalStore::open_in_memory().await.unwrap();
        store.set_metadata("lastSync", "1").await.unwrap();
        store.set_metadata("lastSync", "2").await.unwrap();
        assert_eq!(
            store.get_metadata("lastSync").await.unwrap().as_deref(),
            Some("2")
        );
    }
}

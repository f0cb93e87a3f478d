//! The `sync_state` singleton row: resumable-ingest bookkeeping, mirroring
//! the companion `indexer-state` blob described in §6.

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::AppError;

use super::Store;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncState {
    pub last_processed_block: u64,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub is_syncing: bool,
}

impl Store {
    pub async fn sync_state(&self) -> Result<SyncState, AppError> {
        let row = sqlx::query("SELECT * FROM sync_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(SyncState {
            last_processed_block: row.try_get::<i64, _>("last_processed_block")? as u64,
            last_sync_timestamp: row.try_get("last_sync_timestamp")?,
            is_syncing: row.try_get::<i64, _>("is_syncing")? != 0,
        })
    }

    pub async fn begin_syncing(&self) -> Result<(), AppError> {
        sqlx::query("UPDATE sync_state SET is_syncing = 1 WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_sync_progress(&self, last_processed_block: u64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE sync_state SET last_processed_block = ?, last_sync_timestamp = ? WHERE id = 1",
        )
        .bind(last_processed_block as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn end_syncing(&self) -> Result<(), AppError> {
        sqlx::query("UPDATE sync_state SET is_syncing = 0 WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::super::open_temp;

    #[tokio::test]
    async fn starts_unsynced_at_block_zero() {
        let (store, _dir) = open_temp().await;
        let state = store.sync_state().await.unwrap();
        assert_eq!(state.last_processed_block, 0);
        assert!(!state.is_syncing);
    }

    #[tokio::test]
    async fn tracks_sync_progress() {
        let (store, _dir) = open_temp().await;
        store.begin_syncing().await.unwrap();
        store.record_sync_progress(42).await.unwrap();
        let state = store.sync_state().await.unwrap();
        assert_eq!(state.last_processed_block, 42);
        assert!(state.is_syncing);
        store.end_syncing().await.unwrap();
        assert!(!store.sync_state().await.unwrap().is_syncing);
    }
}

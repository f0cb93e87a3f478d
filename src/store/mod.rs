//! Relational Store (§4.8): embedded SQLite holding accounts, transfers, and
//! their derived aggregates.

pub mod accounts;
pub mod investigations;
pub mod schema;
pub mod stats;
pub mod sync_state;
pub mod transfers;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::AppError;

/// A handle to the embedded database. Cheap to clone (an `Arc` internally, via
/// `SqlitePool`); every component that touches storage holds one of these.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the database at `path` and applies the
    /// schema. Starts in durable (synchronous=FULL) mode; callers doing a
    /// bulk import should call [`Store::begin_bulk_import`] first.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| AppError::Internal.tap_log(&e))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(schema::SCHEMA).execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Switches to asynchronous journaling with no synchronous fsync for the
    /// duration of a bulk ingest run, per §4.8. Must be paired with
    /// [`Store::end_bulk_import`] before serving traffic.
    pub async fn begin_bulk_import(&self) -> Result<(), AppError> {
        sqlx::query("PRAGMA synchronous = OFF")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA journal_mode = MEMORY")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Restores durable settings, then runs `ANALYZE`/`VACUUM` to keep the
    /// query planner's statistics and the file layout in good shape.
    pub async fn end_bulk_import(&self) -> Result<(), AppError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous = FULL")
            .execute(&self.pool)
            .await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }
}

/// Small helper so a `From<io::Error>`-less construction site can still log
/// the underlying cause before collapsing to [`AppError::Internal`].
trait TapLog {
    fn tap_log(self, cause: &dyn std::fmt::Display) -> Self;
}

impl TapLog for AppError {
    fn tap_log(self, cause: &dyn std::fmt::Display) -> Self {
        tracing::error!(%cause, "store open failed");
        self
    }
}

#[cfg(all(test, feature = "testing"))]
pub(crate) async fn open_temp() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.sqlite");
    let store = Store::open(&path).await.expect("open temp store");
    (store, dir)
}

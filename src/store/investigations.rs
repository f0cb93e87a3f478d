//! Saved investigation records (`POST /api/investigations`): a lightweight
//! case file pinning a set of addresses together with analyst notes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Row;

use crate::error::AppError;
use crate::model::Address;

use super::Store;

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationRecord {
    pub id: String,
    pub title: String,
    pub addresses: Vec<Address>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Store {
    /// Persists a new investigation and returns the stored record, including
    /// the server-assigned id and creation timestamp.
    pub async fn save_investigation(
        &self,
        id: String,
        title: String,
        addresses: Vec<Address>,
        notes: Option<String>,
    ) -> Result<InvestigationRecord, AppError> {
        let created_at = Utc::now();
        let addresses_json = serde_json::to_string(&addresses).map_err(|e| {
            tracing::error!(cause = %e, "failed to serialize investigation addresses");
            AppError::Internal
        })?;

        sqlx::query(
            "INSERT INTO investigations (id, title, addresses, notes, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&title)
        .bind(&addresses_json)
        .bind(&notes)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(InvestigationRecord { id, title, addresses, notes, created_at })
    }

    pub async fn get_investigation(&self, id: &str) -> Result<Option<InvestigationRecord>, AppError> {
        let row = sqlx::query("SELECT * FROM investigations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let addresses_json: String = row.try_get("addresses")?;
        let addresses: Vec<Address> = serde_json::from_str(&addresses_json).map_err(|e| {
            tracing::error!(cause = %e, "stored investigation addresses are not valid JSON");
            AppError::Internal
        })?;

        Ok(Some(InvestigationRecord {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            addresses,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::super::open_temp;
    use super::*;

    #[tokio::test]
    async fn round_trips_a_saved_investigation() {
        let (store, _dir) = open_temp().await;
        let addresses: Vec<Address> =
            vec![Address::parse("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY").unwrap()];
        let saved = store
            .save_investigation("inv_1".into(), "suspicious cluster".into(), addresses.clone(), Some("watch this".into()))
            .await
            .unwrap();
        assert_eq!(saved.id, "inv_1");

        let fetched = store.get_investigation("inv_1").await.unwrap().unwrap();
        assert_eq!(fetched.title, "suspicious cluster");
        assert_eq!(fetched.addresses, addresses);
        assert_eq!(fetched.notes.as_deref(), Some("watch this"));
    }

    #[tokio::test]
    async fn unknown_id_returns_none() {
        let (store, _dir) = open_temp().await;
        assert!(store.get_investigation("missing").await.unwrap().is_none());
    }
}

//! Account reads/writes.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::AppError;
use crate::model::{Account, Address, Identity};

use super::Store;

fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account, AppError> {
    let address: String = row.try_get("address")?;
    let balance: String = row.try_get("balance")?;
    let tags: String = row.try_get("tags")?;

    let identity = Identity {
        display: row.try_get("display_name")?,
        legal: row.try_get("legal_name")?,
        web: row.try_get("web")?,
        email: row.try_get("email")?,
        twitter: row.try_get("twitter")?,
        is_verified: row.try_get::<i64, _>("is_verified")? != 0,
        parent: match row.try_get::<Option<String>, _>("parent_address")? {
            Some(parent) => Some((
                Address::parse(&parent)?,
                row.try_get::<Option<String>, _>("sub_display")?.unwrap_or_default(),
            )),
            None => None,
        },
    };

    Ok(Account {
        address: Address::parse(&address)?,
        balance: U256::from_str_radix(&balance, 10).unwrap_or(U256::ZERO),
        identity: (!identity.is_empty()).then_some(identity),
        risk_score: row
            .try_get::<Option<i64>, _>("risk_score")?
            .map(|s| s as u8),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        notes: row.try_get("notes")?,
        first_seen_block: row.try_get::<i64, _>("first_seen_block")? as u64,
        last_seen_block: row.try_get::<i64, _>("last_seen_block")? as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

impl Store {
    pub async fn get_account(&self, address: &Address) -> Result<Option<Account>, AppError> {
        let row = sqlx::query("SELECT * FROM accounts WHERE address = ?")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_account).transpose()
    }

    /// Inserts an account on first observation, or bumps its `updated_at`
    /// watermark if it's already known (identity/balance always overwrite,
    /// per §3's lifecycle rule).
    pub async fn upsert_account_observed(
        &self,
        address: &Address,
        seen_block: u64,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO accounts (address, first_seen_block, last_seen_block, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                last_seen_block = MAX(last_seen_block, excluded.last_seen_block),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(address.as_str())
        .bind(seen_block as i64)
        .bind(seen_block as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_account_identity(
        &self,
        address: &Address,
        balance: U256,
        identity: Option<&Identity>,
        risk_score: Option<u8>,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        let (display, legal, web, email, twitter, is_verified, parent_address, sub_display) =
            match identity {
                Some(id) => (
                    id.display.clone(),
                    id.legal.clone(),
                    id.web.clone(),
                    id.email.clone(),
                    id.twitter.clone(),
                    id.is_verified,
                    id.parent.as_ref().map(|(a, _)| a.to_string()),
                    id.parent.as_ref().map(|(_, s)| s.clone()),
                ),
                None => (None, None, None, None, None, false, None, None),
            };

        sqlx::query(
            r#"
            UPDATE accounts SET
                balance = ?, display_name = ?, legal_name = ?, web = ?, email = ?, twitter = ?,
                is_verified = ?, parent_address = ?, sub_display = ?, risk_score = ?, updated_at = ?
            WHERE address = ?
            "#,
        )
        .bind(balance.to_string())
        .bind(display)
        .bind(legal)
        .bind(web)
        .bind(email)
        .bind(twitter)
        .bind(is_verified as i64)
        .bind(parent_address)
        .bind(sub_display)
        .bind(risk_score.map(|s| s as i64))
        .bind(now)
        .bind(address.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Candidate search over display name and address prefix, for the address
    /// search endpoint.
    pub async fn search_accounts(&self, query: &str, limit: i64) -> Result<Vec<Account>, AppError> {
        let pattern = format!("%{query}%");
        let rows = sqlx::query(
            "SELECT * FROM accounts WHERE address LIKE ?1 OR display_name LIKE ?1 LIMIT ?2",
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_account).collect()
    }
}

//! Reads over the derived `transfer_stats`/`account_stats` aggregates.

use alloy_primitives::U256;
use sqlx::Row;

use crate::error::AppError;
use crate::model::{AccountStats, Address, TransferStats};

use super::Store;

fn amount(raw: &str) -> U256 {
    U256::from_str_radix(raw, 10).unwrap_or(U256::ZERO)
}

impl Store {
    /// Counterparty stats for `address`, in both directions, ordered by
    /// `total_amount` descending, filtered to `total_amount >= min_volume`.
    /// This is the Direct (depth=1) traversal's primary data source (§4.9).
    pub async fn counterparty_stats(
        &self,
        address: &Address,
        min_volume: U256,
        limit: i64,
    ) -> Result<Vec<TransferStats>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT from_address, to_address, total_amount, transfer_count, first_transfer_block, last_transfer_block
            FROM transfer_stats
            WHERE (from_address = ?1 OR to_address = ?1) AND CAST(total_amount AS NUMERIC) >= CAST(?2 AS NUMERIC)
            ORDER BY CAST(total_amount AS NUMERIC) DESC
            LIMIT ?3
            "#,
        )
        .bind(address.as_str())
        .bind(min_volume.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(TransferStats {
                    from: Address::parse(&row.try_get::<String, _>("from_address")?)?,
                    to: Address::parse(&row.try_get::<String, _>("to_address")?)?,
                    total_amount: amount(&row.try_get::<String, _>("total_amount")?),
                    transfer_count: row.try_get::<i64, _>("transfer_count")? as u64,
                    first_transfer_block: row.try_get::<i64, _>("first_transfer_block")? as u64,
                    last_transfer_block: row.try_get::<i64, _>("last_transfer_block")? as u64,
                })
            })
            .collect()
    }

    pub async fn transfer_stats_between(
        &self,
        from: &Address,
        to: &Address,
    ) -> Result<Option<TransferStats>, AppError> {
        let row = sqlx::query(
            "SELECT * FROM transfer_stats WHERE from_address = ? AND to_address = ?",
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(TransferStats {
                from: from.clone(),
                to: to.clone(),
                total_amount: amount(&row.try_get::<String, _>("total_amount")?),
                transfer_count: row.try_get::<i64, _>("transfer_count")? as u64,
                first_transfer_block: row.try_get::<i64, _>("first_transfer_block")? as u64,
                last_transfer_block: row.try_get::<i64, _>("last_transfer_block")? as u64,
            })
        })
        .transpose()
    }

    pub async fn account_stats(&self, address: &Address) -> Result<AccountStats, AppError> {
        let row = sqlx::query("SELECT * FROM account_stats WHERE address = ?")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(AccountStats::empty(address.clone()));
        };

        Ok(AccountStats {
            address: address.clone(),
            total_sent: amount(&row.try_get::<String, _>("total_sent")?),
            total_received: amount(&row.try_get::<String, _>("total_received")?),
            send_count: row.try_get::<i64, _>("send_count")? as u64,
            receive_count: row.try_get::<i64, _>("receive_count")? as u64,
            unique_senders: row.try_get::<i64, _>("unique_senders")? as u64,
            unique_receivers: row.try_get::<i64, _>("unique_receivers")? as u64,
            first_activity_block: row.try_get::<Option<i64>, _>("first_activity_block")?.map(|v| v as u64),
            last_activity_block: row.try_get::<Option<i64>, _>("last_activity_block")?.map(|v| v as u64),
            suspicious_pattern_count: row.try_get::<i64, _>("suspicious_pattern_count")? as u64,
            high_risk_interaction_count: row.try_get::<i64, _>("high_risk_interaction_count")? as u64,
        })
    }

    /// Recomputes `unique_senders`/`unique_receivers` for `address` from the
    /// transfer table directly; called periodically rather than on every
    /// ingest, since it requires a full counterparty scan.
    pub async fn recompute_unique_counterparties(&self, address: &Address) -> Result<(), AppError> {
        let unique_senders: i64 = sqlx::query(
            "SELECT COUNT(DISTINCT from_address) AS n FROM transfers WHERE to_address = ?",
        )
        .bind(address.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let unique_receivers: i64 = sqlx::query(
            "SELECT COUNT(DISTINCT to_address) AS n FROM transfers WHERE from_address = ?",
        )
        .bind(address.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        sqlx::query(
            r#"
            INSERT INTO account_stats (address, unique_senders, unique_receivers)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(address) DO UPDATE SET unique_senders = ?2, unique_receivers = ?3
            "#,
        )
        .bind(address.as_str())
        .bind(unique_senders)
        .bind(unique_receivers)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

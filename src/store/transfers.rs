//! Transfer ingest and reads. Ingest is idempotent on `(transaction_hash,
//! event_index)`; the derived aggregates update in the same transaction as
//! the underlying insert, per §5's ordering guarantee.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::error::AppError;
use crate::model::{Address, Transfer};

use super::Store;

fn row_to_transfer(row: &sqlx::sqlite::SqliteRow) -> Result<Transfer, AppError> {
    let amount: String = row.try_get("amount")?;
    Ok(Transfer {
        id: row.try_get("id")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        block_timestamp: row.try_get::<DateTime<Utc>, _>("block_timestamp")?,
        from: Address::parse(&row.try_get::<String, _>("from_address")?)?,
        to: Address::parse(&row.try_get::<String, _>("to_address")?)?,
        amount: U256::from_str_radix(&amount, 10).unwrap_or(U256::ZERO),
        transaction_hash: row.try_get("transaction_hash")?,
        event_index: row.try_get("event_index")?,
    })
}

impl Store {
    /// Inserts a transfer and updates `transfer_stats`/`account_stats` in one
    /// transaction. A repeat of the same `(tx_hash, event_index)` is a no-op
    /// on every aggregate, including the insert itself.
    pub async fn ingest_transfer(&self, transfer: &Transfer) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        for address in [&transfer.from, &transfer.to] {
            sqlx::query(
                r#"
                INSERT INTO accounts (address, first_seen_block, last_seen_block, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(address) DO UPDATE SET last_seen_block = MAX(last_seen_block, excluded.last_seen_block)
                "#,
            )
            .bind(address.as_str())
            .bind(transfer.block_number as i64)
            .bind(transfer.block_number as i64)
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        let insert_result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO transfers
                (block_number, block_timestamp, from_address, to_address, amount, transaction_hash, event_index)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transfer.block_number as i64)
        .bind(transfer.block_timestamp)
        .bind(transfer.from.as_str())
        .bind(transfer.to.as_str())
        .bind(transfer.amount.to_string())
        .bind(&transfer.transaction_hash)
        .bind(transfer.event_index)
        .execute(&mut *tx)
        .await?;

        if insert_result.rows_affected() == 0 {
            // Duplicate event: every aggregate below is keyed off this insert,
            // so a no-op insert means a no-op on the rest of the transaction.
            tx.commit().await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO transfer_stats (from_address, to_address, total_amount, transfer_count, first_transfer_block, last_transfer_block)
            VALUES (?1, ?2, ?3, 1, ?4, ?4)
            ON CONFLICT(from_address, to_address) DO UPDATE SET
                total_amount = CAST(CAST(total_amount AS NUMERIC) + CAST(?3 AS NUMERIC) AS TEXT),
                transfer_count = transfer_count + 1,
                first_transfer_block = MIN(first_transfer_block, ?4),
                last_transfer_block = MAX(last_transfer_block, ?4)
            "#,
        )
        .bind(transfer.from.as_str())
        .bind(transfer.to.as_str())
        .bind(transfer.amount.to_string())
        .bind(transfer.block_number as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO account_stats (address, total_sent, send_count, first_activity_block, last_activity_block)
            VALUES (?1, ?2, 1, ?3, ?3)
            ON CONFLICT(address) DO UPDATE SET
                total_sent = CAST(CAST(total_sent AS NUMERIC) + CAST(?2 AS NUMERIC) AS TEXT),
                send_count = send_count + 1,
                first_activity_block = MIN(COALESCE(first_activity_block, ?3), ?3),
                last_activity_block = MAX(COALESCE(last_activity_block, ?3), ?3)
            "#,
        )
        .bind(transfer.from.as_str())
        .bind(transfer.amount.to_string())
        .bind(transfer.block_number as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO account_stats (address, total_received, receive_count, first_activity_block, last_activity_block)
            VALUES (?1, ?2, 1, ?3, ?3)
            ON CONFLICT(address) DO UPDATE SET
                total_received = CAST(CAST(total_received AS NUMERIC) + CAST(?2 AS NUMERIC) AS TEXT),
                receive_count = receive_count + 1,
                first_activity_block = MIN(COALESCE(first_activity_block, ?3), ?3),
                last_activity_block = MAX(COALESCE(last_activity_block, ?3), ?3)
            "#,
        )
        .bind(transfer.to.as_str())
        .bind(transfer.amount.to_string())
        .bind(transfer.block_number as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Lists transfers touching `address`, most recent block first.
    /// `direction` filters to `sent`, `received`, or (if `None`) both.
    pub async fn list_transfers(
        &self,
        address: &Address,
        direction: Option<TransferDirection>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transfer>, AppError> {
        let rows = match direction {
            Some(TransferDirection::Sent) => {
                sqlx::query("SELECT * FROM transfers WHERE from_address = ? ORDER BY block_number DESC LIMIT ? OFFSET ?")
                    .bind(address.as_str())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            },
            Some(TransferDirection::Received) => {
                sqlx::query("SELECT * FROM transfers WHERE to_address = ? ORDER BY block_number DESC LIMIT ? OFFSET ?")
                    .bind(address.as_str())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            },
            None => {
                sqlx::query("SELECT * FROM transfers WHERE from_address = ? OR to_address = ? ORDER BY block_number DESC LIMIT ? OFFSET ?")
                    .bind(address.as_str())
                    .bind(address.as_str())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        rows.iter().map(row_to_transfer).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferDirection {
    Sent,
    Received,
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::super::open_temp;
    use super::*;
    use chrono::Utc;

    fn addr(c: char) -> Address {
        Address::parse(&c.to_string().repeat(48)).unwrap()
    }

    #[tokio::test]
    async fn repeat_insert_of_same_event_is_a_no_op_on_aggregates() {
        let (store, _dir) = open_temp().await;
        let transfer = Transfer::new(
            0,
            100,
            Utc::now(),
            addr('A'),
            addr('B'),
            U256::from(1_000u64),
            Some("0xhash".to_owned()),
            0,
        )
        .unwrap();

        store.ingest_transfer(&transfer).await.unwrap();
        store.ingest_transfer(&transfer).await.unwrap();

        let stats = store
            .transfer_stats_between(&addr('A'), &addr('B'))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.transfer_count, 1);
        assert_eq!(stats.total_amount, U256::from(1_000u64));
    }

    #[tokio::test]
    async fn list_transfers_filters_by_direction() {
        let (store, _dir) = open_temp().await;
        let sent = Transfer::new(0, 1, Utc::now(), addr('A'), addr('B'), U256::from(1u64), None, 0).unwrap();
        let received = Transfer::new(0, 2, Utc::now(), addr('C'), addr('A'), U256::from(1u64), None, 1).unwrap();
        store.ingest_transfer(&sent).await.unwrap();
        store.ingest_transfer(&received).await.unwrap();

        let sent_only = store
            .list_transfers(&addr('A'), Some(TransferDirection::Sent), 10, 0)
            .await
            .unwrap();
        assert_eq!(sent_only.len(), 1);
        assert_eq!(sent_only[0].to, addr('B'));
    }
}

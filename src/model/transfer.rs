//! Transfer events and the aggregates derived from them.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::Address;
use crate::error::AppError;

/// A single directed value-moving event. `from != to` and `amount > 0` are enforced
/// at construction, not merely documented.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: i64,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub transaction_hash: Option<String>,
    pub event_index: i64,
}

impl Transfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i64,
        block_number: u64,
        block_timestamp: DateTime<Utc>,
        from: Address,
        to: Address,
        amount: U256,
        transaction_hash: Option<String>,
        event_index: i64,
    ) -> Result<Self, AppError> {
        if from == to {
            return Err(AppError::InvalidParameters {
                reason: "transfer from and to address must differ".to_owned(),
            });
        }
        if amount.is_zero() {
            return Err(AppError::InvalidParameters {
                reason: "transfer amount must be positive".to_owned(),
            });
        }
        Ok(Self {
            id,
            block_number,
            block_timestamp,
            from,
            to,
            amount,
            transaction_hash,
            event_index,
        })
    }

    /// Identity used for idempotent ingest: two events with the same hash and index
    /// refer to the same on-chain event.
    pub fn dedup_key(&self) -> (Option<&str>, i64) {
        (self.transaction_hash.as_deref(), self.event_index)
    }
}

/// Aggregate over all transfers between a specific `(from, to)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    pub from: Address,
    pub to: Address,
    pub total_amount: U256,
    pub transfer_count: u64,
    pub first_transfer_block: u64,
    pub last_transfer_block: u64,
}

impl TransferStats {
    pub fn avg_amount(&self) -> U256 {
        if self.transfer_count == 0 {
            U256::ZERO
        } else {
            self.total_amount / U256::from(self.transfer_count)
        }
    }
}

/// Per-address aggregate, both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    pub address: Address,
    pub total_sent: U256,
    pub total_received: U256,
    pub send_count: u64,
    pub receive_count: u64,
    pub unique_senders: u64,
    pub unique_receivers: u64,
    pub first_activity_block: Option<u64>,
    pub last_activity_block: Option<u64>,
    pub suspicious_pattern_count: u64,
    pub high_risk_interaction_count: u64,
}

impl AccountStats {
    pub fn empty(address: Address) -> Self {
        Self {
            address,
            total_sent: U256::ZERO,
            total_received: U256::ZERO,
            send_count: 0,
            receive_count: 0,
            unique_senders: 0,
            unique_receivers: 0,
            first_activity_block: None,
            last_activity_block: None,
            suspicious_pattern_count: 0,
            high_risk_interaction_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(c: char) -> Address {
        Address::parse(&c.to_string().repeat(48)).unwrap()
    }

    #[test]
    fn rejects_self_transfer() {
        let a = addr('A');
        let err = Transfer::new(
            1,
            1,
            Utc::now(),
            a.clone(),
            a,
            U256::from(1u64),
            None,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidParameters { .. }));
    }

    #[test]
    fn rejects_zero_amount() {
        let err = Transfer::new(
            1,
            1,
            Utc::now(),
            addr('A'),
            addr('B'),
            U256::ZERO,
            None,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidParameters { .. }));
    }

    #[test]
    fn avg_amount_divides_total_by_count() {
        let stats = TransferStats {
            from: addr('A'),
            to: addr('B'),
            total_amount: U256::from(100u64),
            transfer_count: 4,
            first_transfer_block: 1,
            last_transfer_block: 10,
        };
        assert_eq!(stats.avg_amount(), U256::from(25u64));
    }
}

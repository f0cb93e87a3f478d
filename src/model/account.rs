//! Account and identity entities.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::Address;

/// Heuristic risk banding used for display and for the `riskThreshold`/`nodeTypes`
/// query filters. Derived from `risk_score`; not a separate source of truth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Bands: <30 low, <60 medium, <85 high, else critical.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => RiskLevel::Low,
            30..=59 => RiskLevel::Medium,
            60..=84 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

/// On-chain identity, as registered with the network's identity pallet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub display: Option<String>,
    pub legal: Option<String>,
    pub web: Option<String>,
    pub email: Option<String>,
    pub twitter: Option<String>,
    pub is_verified: bool,
    /// If this identity is a sub-identity, the parent account and its sub-label.
    pub parent: Option<(Address, String)>,
}

impl Identity {
    pub fn is_empty(&self) -> bool {
        self.display.is_none()
            && self.legal.is_none()
            && self.web.is_none()
            && self.email.is_none()
            && self.twitter.is_none()
            && self.parent.is_none()
    }
}

/// A persisted account record. `balance` is non-negative and wide enough to exceed
/// 64 bits (native chain balances are 128-bit fixed-point); `risk_score`, if present,
/// is monotone non-negative and capped at 100.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: U256,
    pub identity: Option<Identity>,
    pub risk_score: Option<u8>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub first_seen_block: u64,
    pub last_seen_block: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.risk_score.map(RiskLevel::from_score)
    }

    /// An account is stale once it hasn't been refreshed within `staleness`.
    pub fn is_stale(&self, staleness: chrono::Duration) -> bool {
        Utc::now() - self.updated_at > staleness
    }

    pub fn new_observed(address: Address, seen_block: u64) -> Self {
        let now = Utc::now();
        Self {
            address,
            balance: U256::ZERO,
            identity: None,
            risk_score: None,
            tags: Vec::new(),
            notes: None,
            first_seen_block: seen_block,
            last_seen_block: seen_block,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(85), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn staleness_threshold() {
        let mut account = Account::new_observed(
            Address::parse(&"A".repeat(48)).unwrap(),
            10,
        );
        account.updated_at = Utc::now() - chrono::Duration::hours(25);
        assert!(account.is_stale(chrono::Duration::hours(24)));
        account.updated_at = Utc::now();
        assert!(!account.is_stale(chrono::Duration::hours(24)));
    }
}

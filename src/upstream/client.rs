//! Client for the upstream chain indexer.
//!
//! Every outbound call passes through the token bucket (shaping) and the
//! circuit breaker (failure isolation) before it ever reaches the wire, and
//! is retried with exponential backoff on transient failures.

use std::time::Duration;

use alloy_primitives::U256;
use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surf_disco::Url;
use tide_disco::error::ServerError;
use vbs::version::StaticVersion;

use crate::error::AppError;
use crate::model::Address;

use super::circuit_breaker::CircuitBreaker;
use super::queue::Priority;
use super::token_bucket::TokenBucket;

/// The upstream indexer speaks a single, frozen API version.
type ApiVer = StaticVersion<0, 1>;

/// Raw account record as returned by the upstream indexer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamAccount {
    pub address: String,
    pub free_balance: String,
    pub reserved_balance: String,
    pub frozen_balance: String,
    pub identity: Option<UpstreamIdentity>,
    pub first_seen_block: u64,
    pub last_seen_block: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamIdentity {
    pub display: Option<String>,
    pub legal: Option<String>,
    pub web: Option<String>,
    pub email: Option<String>,
    pub twitter: Option<String>,
    pub is_confirmed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTransfer {
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub transaction_hash: Option<String>,
    pub event_index: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTransferPage {
    pub transfers: Vec<UpstreamTransfer>,
    pub next_page_token: Option<String>,
}

/// Wraps a `surf_disco` client with the shaping/resilience layers the spec
/// requires of every outbound upstream call.
pub struct UpstreamClient {
    inner: surf_disco::Client<ServerError, ApiVer>,
    api_key: Option<String>,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
}

impl UpstreamClient {
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            inner: surf_disco::Client::new(base_url),
            api_key,
            bucket: TokenBucket::default_upstream(),
            breaker: CircuitBreaker::default_upstream(),
        }
    }

    fn backoff_policy() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(20)),
            ..Default::default()
        }
    }

    /// Runs one shaped, breaker-guarded, retried call against the indexer.
    /// `priority` only affects how long the token-bucket wait is logged at;
    /// scheduling by priority happens one layer up, in the request queue.
    async fn call<T, F>(&self, priority: Priority, route: &str, f: F) -> Result<T, AppError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(&surf_disco::Client<ServerError, ApiVer>) -> surf_disco::Request<T, ServerError, ApiVer>
            + Send
            + Sync,
    {
        tracing::trace!(?priority, route, "upstream call admitted to shaping layer");
        self.bucket.wait_and_consume(1).await;

        let api_key = self.api_key.clone();
        self.breaker
            .call(|| {
                retry(Self::backoff_policy(), || async {
                    let mut req = f(&self.inner);
                    if let Some(key) = &api_key {
                        req = req.header("Authorization", format!("Bearer {key}"));
                    }
                    req.send().await.map_err(|e| {
                        tracing::warn!(route, error = %e, "upstream request failed, retrying");
                        backoff::Error::transient(AppError::UpstreamUnavailable {
                            reason: e.to_string(),
                        })
                    })
                })
                .await
            })
            .await
    }

    pub async fn get_account(
        &self,
        address: &Address,
        priority: Priority,
    ) -> Result<Option<UpstreamAccount>, AppError> {
        let route = format!("accounts/{address}");
        match self
            .call(priority, &route, |c| c.get::<UpstreamAccount>(&route))
            .await
        {
            Ok(account) => Ok(Some(account)),
            Err(AppError::AddressNotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    pub async fn get_transfers(
        &self,
        address: &Address,
        page_token: Option<&str>,
        priority: Priority,
    ) -> Result<UpstreamTransferPage, AppError> {
        let route = match page_token {
            Some(token) => format!("accounts/{address}/transfers?pageToken={token}"),
            None => format!("accounts/{address}/transfers"),
        };
        self.call(priority, &route, |c| c.get::<UpstreamTransferPage>(&route))
            .await
    }

    pub async fn get_relationships(
        &self,
        address: &Address,
        priority: Priority,
    ) -> Result<Vec<UpstreamTransfer>, AppError> {
        let route = format!("accounts/{address}/relationships");
        self.call(priority, &route, |c| c.get::<Vec<UpstreamTransfer>>(&route))
            .await
    }
}

/// Parses a decimal-string indexer amount into a `U256`, the wire format for
/// every balance/amount field the upstream indexer emits.
pub fn parse_amount(raw: &str) -> Result<U256, AppError> {
    U256::from_str_radix(raw, 10).map_err(|e| AppError::UpstreamUnavailable {
        reason: format!("malformed amount {raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_amounts() {
        assert_eq!(parse_amount("1000").unwrap(), U256::from(1000u64));
    }

    #[test]
    fn rejects_non_numeric_amounts() {
        assert!(parse_amount("not-a-number").is_err());
    }
}

//! Salted, keyed address anonymization: applied to structured logs and data
//! exports, and -- per §6 -- to API response bodies themselves whenever the
//! caller hasn't authenticated with an API key, so an anonymous caller never
//! receives counterparty addresses it didn't already ask for.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::model::address::looks_like_address;
use crate::model::Address;

/// Wraps the `ANONYMIZATION_SALT` config value. Without a salt configured,
/// anonymization is a no-op identity function and the caller sees the real
/// address -- local development without a configured salt shouldn't silently
/// start masking data.
#[derive(Clone, Debug)]
pub struct Anonymizer {
    salt: Option<String>,
}

impl Anonymizer {
    pub fn new(salt: Option<String>) -> Self {
        Self { salt }
    }

    pub fn disabled() -> Self {
        Self { salt: None }
    }

    /// `sha256(salt || address)`, truncated to 16 hex chars and prefixed so
    /// it's visually distinguishable from a real address at a glance.
    pub fn anonymize(&self, address: &Address) -> String {
        match &self.salt {
            Some(salt) => {
                let mut hasher = Sha256::new();
                hasher.update(salt.as_bytes());
                hasher.update(address.as_str().as_bytes());
                let digest = hasher.finalize();
                format!("anon_{}", hex::encode(&digest[..8]))
            },
            None => address.as_str().to_owned(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.salt.is_some()
    }

    /// Same digest as [`Anonymizer::anonymize`], but over a raw string that
    /// hasn't necessarily passed [`Address::parse`] (e.g. a value pulled back
    /// out of an already-serialized response body).
    pub fn anonymize_str(&self, raw: &str) -> String {
        match &self.salt {
            Some(salt) => {
                let mut hasher = Sha256::new();
                hasher.update(salt.as_bytes());
                hasher.update(raw.as_bytes());
                let digest = hasher.finalize();
                format!("anon_{}", hex::encode(&digest[..8]))
            },
            None => raw.to_owned(),
        }
    }
}

/// Walks a JSON response body in place, replacing every string that looks
/// like an address with its anonymized form, except the caller's own
/// `exempt` addresses (the ones it explicitly asked about and already
/// knows). A no-op when the anonymizer has no salt configured.
pub fn anonymize_json(value: &mut serde_json::Value, anonymizer: &Anonymizer, exempt: &[&str]) {
    if !anonymizer.is_enabled() {
        return;
    }
    match value {
        serde_json::Value::String(s) => {
            if looks_like_address(s) && !exempt.contains(&s.as_str()) {
                *s = anonymizer.anonymize_str(s);
            }
        },
        serde_json::Value::Array(items) => {
            for item in items {
                anonymize_json(item, anonymizer, exempt);
            }
        },
        serde_json::Value::Object(fields) => {
            for item in fields.values_mut() {
                anonymize_json(item, anonymizer, exempt);
            }
        },
        _ => {},
    }
}

/// A log-export record with the address already anonymized, for use by the
/// ingest binary's CSV/JSONL export path.
#[derive(Clone, Debug)]
pub struct AnonymizedEvent {
    pub anonymized_address: String,
    pub at: DateTime<Utc>,
}

pub fn anonymize_event(anonymizer: &Anonymizer, address: &Address) -> AnonymizedEvent {
    AnonymizedEvent {
        anonymized_address: anonymizer.anonymize(address),
        at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::parse(&"A".repeat(48)).unwrap()
    }

    #[test]
    fn disabled_anonymizer_passes_through() {
        let anonymizer = Anonymizer::disabled();
        assert_eq!(anonymizer.anonymize(&addr()), addr().as_str());
        assert!(!anonymizer.is_enabled());
    }

    #[test]
    fn same_salt_and_address_hash_identically() {
        let anonymizer = Anonymizer::new(Some("pepper".to_owned()));
        assert_eq!(anonymizer.anonymize(&addr()), anonymizer.anonymize(&addr()));
        assert!(anonymizer.anonymize(&addr()).starts_with("anon_"));
    }

    #[test]
    fn different_salts_hash_differently() {
        let a = Anonymizer::new(Some("pepper".to_owned()));
        let b = Anonymizer::new(Some("salt".to_owned()));
        assert_ne!(a.anonymize(&addr()), b.anonymize(&addr()));
    }

    #[test]
    fn json_walk_masks_addresses_except_the_exempt_one() {
        let anonymizer = Anonymizer::new(Some("pepper".to_owned()));
        let center = addr();
        let counterparty = Address::parse(&"B".repeat(48)).unwrap();
        let mut body = serde_json::json!({
            "address": center.as_str(),
            "edges": [{ "source": center.as_str(), "target": counterparty.as_str() }],
        });

        anonymize_json(&mut body, &anonymizer, &[center.as_str()]);

        assert_eq!(body["address"], center.as_str());
        assert_eq!(body["edges"][0]["source"], center.as_str());
        assert_ne!(body["edges"][0]["target"], counterparty.as_str());
        assert!(body["edges"][0]["target"].as_str().unwrap().starts_with("anon_"));
    }

    #[test]
    fn json_walk_is_a_no_op_when_disabled() {
        let anonymizer = Anonymizer::disabled();
        let counterparty = Address::parse(&"B".repeat(48)).unwrap();
        let mut body = serde_json::json!({ "address": counterparty.as_str() });
        anonymize_json(&mut body, &anonymizer, &[]);
        assert_eq!(body["address"], counterparty.as_str());
    }
}

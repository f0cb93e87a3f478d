//! Chain addresses: an opaque, base58-like identifier, validated before it ever
//! reaches a SQL query or an upstream request.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// `^[1-9A-HJ-NP-Za-km-z]{47,50}$` — base58 without the visually-ambiguous
/// `0`, `O`, `I`, `l`.
static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{47,50}$").expect("valid regex"));

/// Shape-only check (format, no homograph scan): used by the anonymizer to
/// decide whether an arbitrary response-body string looks like an address
/// worth masking, without requiring a fully validated [`Address`].
pub(crate) fn looks_like_address(raw: &str) -> bool {
    ADDRESS_PATTERN.is_match(raw)
}

/// Code point ranges that must never appear in an address: Cyrillic, Greek
/// lowercase, and Latin Extended, which together cover the common homograph
/// attack surface against a base58 alphabet.
fn is_homograph_codepoint(c: char) -> bool {
    let cp = c as u32;
    matches!(cp,
        0x0400..=0x04FF // Cyrillic
        | 0x03B1..=0x03C9 // Greek lowercase
        | 0x0100..=0x024F // Latin Extended-A/B
    )
}

/// A validated chain address. Equality is byte-exact; the only way to build one
/// is [`Address::parse`], so every `Address` in the system has already passed
/// the format and homograph checks.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if let Some(c) = raw.chars().find(|c| is_homograph_codepoint(*c)) {
            return Err(AppError::InvalidAddress {
                reason: format!("disallowed code point U+{:04X}", c as u32),
            });
        }
        if !ADDRESS_PATTERN.is_match(raw) {
            return Err(AppError::InvalidAddress {
                reason: "does not match the base58 address pattern".to_owned(),
            });
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_address(seed: char) -> String {
        // 48 chars from the allowed alphabet, repeating `seed`.
        std::iter::repeat(seed).take(48).collect()
    }

    #[test]
    fn accepts_well_formed_address() {
        assert!(Address::parse(&valid_address('A')).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Address::parse("short").is_err());
    }

    #[test]
    fn rejects_ambiguous_characters() {
        // '0', 'O', 'I', 'l' are excluded from base58.
        let mut addr = valid_address('A');
        addr.replace_range(0..1, "0");
        assert!(Address::parse(&addr).is_err());
    }

    #[test]
    fn rejects_cyrillic_homograph() {
        // Cyrillic 'А' (U+0410) looks identical to Latin 'A'.
        let mut addr = valid_address('A');
        addr.replace_range(0..1, "\u{0410}");
        let err = Address::parse(&addr).unwrap_err();
        assert!(matches!(err, AppError::InvalidAddress { .. }));
    }

    #[test]
    fn rejects_greek_lowercase_homograph() {
        let mut addr = valid_address('A');
        addr.replace_range(0..1, "\u{03B1}"); // α
        assert!(Address::parse(&addr).is_err());
    }

    #[test]
    fn rejects_latin_extended_homograph() {
        let mut addr = valid_address('A');
        addr.replace_range(0..1, "\u{0101}"); // ā
        assert!(Address::parse(&addr).is_err());
    }
}

//! Query Validator (§4.5): address, numeric, JSON, and complexity checks
//! applied to every request before any store or upstream work happens.

use alloy_primitives::U256;
use serde_json::Value;

use crate::error::AppError;
use crate::model::Address;

pub const DEFAULT_DEPTH: u32 = 2;
pub const MIN_DEPTH: u32 = 1;
pub const MAX_DEPTH: u32 = 4;

pub const DEFAULT_MAX_NODES: usize = 100;
pub const MIN_MAX_NODES: usize = 10;
pub const MAX_MAX_NODES: usize = 500;

pub const DEFAULT_COMPLEXITY_CAP: f64 = 10.0;

pub fn validate_address(raw: &str) -> Result<Address, AppError> {
    Address::parse(raw)
}

/// Coerces to integer and clamps to `[MIN_DEPTH, MAX_DEPTH]`.
pub fn clamp_depth(raw: Option<&str>) -> u32 {
    let parsed = raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(DEFAULT_DEPTH as i64);
    parsed.clamp(MIN_DEPTH as i64, MAX_DEPTH as i64) as u32
}

/// Coerces to integer and clamps to `[MIN_MAX_NODES, MAX_MAX_NODES]`.
pub fn clamp_max_nodes(raw: Option<&str>) -> usize {
    let parsed = raw
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(DEFAULT_MAX_NODES as i64);
    parsed.clamp(MIN_MAX_NODES as i64, MAX_MAX_NODES as i64) as usize
}

/// A decimal-string volume filter. The source ecosystem has shipped decimals
/// in this field; we accept them and truncate toward zero for big-integer
/// comparison, logging when truncation actually drops precision (§9 open
/// question: preserved for compatibility, but never silent).
pub fn parse_volume_filter(raw: &str) -> Result<U256, AppError> {
    let trimmed = raw.trim();
    let integer_part = match trimmed.split_once('.') {
        Some((whole, fraction)) => {
            if fraction.bytes().any(|b| b != b'0') {
                tracing::warn!(raw, "volume filter truncated a non-zero fractional part");
            }
            whole
        },
        None => trimmed,
    };
    if integer_part.is_empty() || !integer_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::InvalidParameters {
            reason: format!("volume filter {raw:?} is not a valid decimal integer"),
        });
    }
    U256::from_str_radix(integer_part, 10).map_err(|e| AppError::InvalidParameters {
        reason: format!("volume filter {raw:?} overflowed: {e}"),
    })
}

/// Parses a generic numeric parameter; on failure, returns the supplied default
/// rather than erroring, per §4.5.
pub fn parse_numeric_or_default(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(default)
}

/// Parses a JSON filter body, stripping executable content and rejecting
/// prototype-pollution keys (`__proto__`, `constructor`, `prototype`).
pub fn parse_filter_json(raw: &str) -> Result<Value, AppError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| AppError::InvalidParameters {
        reason: format!("malformed filter JSON: {e}"),
    })?;
    reject_prototype_pollution(&value)?;
    Ok(value)
}

fn reject_prototype_pollution(value: &Value) -> Result<(), AppError> {
    const FORBIDDEN: [&str; 3] = ["__proto__", "constructor", "prototype"];
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                if FORBIDDEN.contains(&key.as_str()) {
                    return Err(AppError::InvalidParameters {
                        reason: format!("filter key {key:?} is not permitted"),
                    });
                }
                reject_prototype_pollution(nested)?;
            }
            Ok(())
        },
        Value::Array(items) => {
            for item in items {
                reject_prototype_pollution(item)?;
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

/// Query-complexity score (§4.5): `depth*log10(maxNodes+1) + 0.5*|filters| + log10(days+1)`.
/// Requests exceeding `cap` (default 10) are rejected before any DB work.
pub fn complexity_score(depth: u32, max_nodes: usize, filter_count: usize, days: u32) -> f64 {
    depth as f64 * ((max_nodes + 1) as f64).log10()
        + 0.5 * filter_count as f64
        + ((days + 1) as f64).log10()
}

pub fn enforce_complexity_cap(score: f64, cap: f64) -> Result<(), AppError> {
    if score > cap {
        return Err(AppError::QueryTooComplex { score, cap });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_depth_into_range() {
        assert_eq!(clamp_depth(None), DEFAULT_DEPTH);
        assert_eq!(clamp_depth(Some("0")), MIN_DEPTH);
        assert_eq!(clamp_depth(Some("99")), MAX_DEPTH);
        assert_eq!(clamp_depth(Some("not-a-number")), DEFAULT_DEPTH);
    }

    #[test]
    fn clamps_max_nodes_into_range() {
        assert_eq!(clamp_max_nodes(Some("1")), MIN_MAX_NODES);
        assert_eq!(clamp_max_nodes(Some("10000")), MAX_MAX_NODES);
    }

    #[test]
    fn volume_filter_truncates_fractional_part() {
        let a = parse_volume_filter("1000000000000.5").unwrap();
        let b = parse_volume_filter("1000000000000").unwrap();
        assert!(a >= b);
        assert_eq!(a, b);
    }

    #[test]
    fn volume_filter_rejects_non_numeric() {
        assert!(parse_volume_filter("abc").is_err());
    }

    #[test]
    fn numeric_or_default_falls_back() {
        assert_eq!(parse_numeric_or_default(None, 7), 7);
        assert_eq!(parse_numeric_or_default(Some("garbage"), 7), 7);
        assert_eq!(parse_numeric_or_default(Some("42"), 7), 42);
    }

    #[test]
    fn filter_json_rejects_proto_pollution_keys() {
        assert!(parse_filter_json(r#"{"__proto__": {}}"#).is_err());
        assert!(parse_filter_json(r#"{"nested": {"constructor": 1}}"#).is_err());
        assert!(parse_filter_json(r#"{"riskThreshold": 30}"#).is_ok());
    }

    #[test]
    fn complexity_cap_rejects_over_budget_queries() {
        let score = complexity_score(4, 500, 6, 365);
        assert!(enforce_complexity_cap(score, DEFAULT_COMPLEXITY_CAP).is_err());
        let score = complexity_score(1, 10, 0, 1);
        assert!(enforce_complexity_cap(score, DEFAULT_COMPLEXITY_CAP).is_ok());
    }
}

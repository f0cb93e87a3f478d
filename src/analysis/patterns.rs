//! Suspicious-pattern detection (§4.11): circular flows, rapid sequential
//! fan-out, round-number transfers, and the two higher-order fan-in/fan-out
//! heuristics (mixing-service-like and exchange-consolidation-like activity).
//!
//! Every variant shares the same evidence envelope so the risk assessor in
//! [`super::risk`] can weigh them uniformly regardless of kind.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::model::{Address, Transfer};
use crate::store::Store;

use super::paths;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    CircularFlow,
    RapidSequential,
    RoundNumber,
    MixingService,
    ExchangeConsolidation,
}

impl PatternKind {
    /// Base severity weight used by the risk assessor (§4.11's weighted
    /// synthesis: circular=30, rapid=20, round=10; the two fan-in/out
    /// heuristics are weighted like circular flow since they indicate
    /// comparable laundering risk).
    pub fn weight(self) -> u32 {
        match self {
            PatternKind::CircularFlow => 30,
            PatternKind::RapidSequential => 20,
            PatternKind::RoundNumber => 10,
            PatternKind::MixingService => 30,
            PatternKind::ExchangeConsolidation => 15,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub kind: PatternKind,
    pub confidence: f64,
    pub description: String,
    pub evidence: Vec<Address>,
    pub timestamp: DateTime<Utc>,
}

/// Divisors checked for the round-number heuristic, largest first so the
/// strongest match (and its confidence) wins.
const ROUND_DIVISORS: [(u128, f64); 3] = [(1_000_000_000_000_00, 0.9), (1_000_000_000_000_0, 0.75), (1_000_000_000_000, 0.6)];

pub async fn detect_circular_flows(
    store: &Store,
    center: &Address,
    depth: u32,
    min_volume: U256,
) -> Result<Vec<Pattern>, AppError> {
    let cycles = crate::graph::engine::circular_flows(store, center, depth, min_volume).await?;
    Ok(cycles
        .into_iter()
        .map(|cycle| Pattern {
            kind: PatternKind::CircularFlow,
            confidence: 0.9,
            description: format!("funds return to the origin after {} hops", cycle.len()),
            evidence: close_loop_at(cycle, center),
            timestamp: Utc::now(),
        })
        .collect())
}

/// `crate::graph::engine::circular_flows` returns each cycle in its
/// globally-canonical rotation (for dedup), which may not start at `center`.
/// Evidence for a single center's pattern list should read as a path anchored
/// on that center and closing back on it, e.g. `[A, B, C, A]`.
fn close_loop_at(cycle: Vec<Address>, center: &Address) -> Vec<Address> {
    let Some(start) = cycle.iter().position(|a| a == center) else {
        return cycle;
    };
    let mut path: Vec<Address> = cycle[start..].to_vec();
    path.extend_from_slice(&cycle[..start]);
    path.push(center.clone());
    path
}

/// Flags a sender with >= 3 outgoing transfers inside any `time_window`,
/// which is the spec's rapid-sequential-transfer signature.
pub fn detect_rapid_sequential(transfers: &[Transfer], time_window: Duration) -> Vec<Pattern> {
    let window = chrono::Duration::from_std(time_window).unwrap_or(chrono::Duration::minutes(5));
    let mut by_sender: HashMap<&Address, Vec<&Transfer>> = HashMap::new();
    for t in transfers {
        by_sender.entry(&t.from).or_default().push(t);
    }

    let mut patterns = Vec::new();
    for (sender, mut sent) in by_sender {
        sent.sort_by_key(|t| t.block_timestamp);
        for start in 0..sent.len() {
            let mut group = vec![sent[start]];
            for candidate in sent.iter().skip(start + 1) {
                if candidate.block_timestamp - sent[start].block_timestamp <= window {
                    group.push(candidate);
                } else {
                    break;
                }
            }
            if group.len() >= 3 {
                patterns.push(Pattern {
                    kind: PatternKind::RapidSequential,
                    confidence: (0.5 + 0.1 * group.len() as f64).min(0.95),
                    description: format!(
                        "{} outgoing transfers from the same address within {:?}",
                        group.len(),
                        time_window
                    ),
                    evidence: vec![sender.clone()],
                    timestamp: Utc::now(),
                });
                break;
            }
        }
    }
    patterns
}

/// Flags transfers whose amount is an exact multiple of 1e12 (and, more
/// strongly, 1e13 or 1e14) -- amounts real economic activity rarely produces
/// but a manual or scripted move often does.
pub fn detect_round_numbers(transfers: &[Transfer]) -> Vec<Pattern> {
    transfers
        .iter()
        .filter_map(|t| {
            let amount: u128 = t.amount.to_string().parse().ok()?;
            let (divisor, confidence) = ROUND_DIVISORS.iter().find(|(d, _)| amount % d == 0 && amount > 0)?;
            Some(Pattern {
                kind: PatternKind::RoundNumber,
                confidence: *confidence,
                description: format!("transfer amount is an exact multiple of {divisor}"),
                evidence: vec![t.from.clone(), t.to.clone()],
                timestamp: t.block_timestamp,
            })
        })
        .collect()
}

/// Fan-in-then-fan-out heuristic: an address with at least `min_counterparties`
/// distinct senders AND receivers within a short window, roughly balancing
/// inflow against outflow, resembles a mixing relay rather than a wallet.
pub fn detect_mixing_service(
    address: &Address,
    unique_senders: u64,
    unique_receivers: u64,
    total_received: U256,
    total_sent: U256,
    min_counterparties: u64,
) -> Option<Pattern> {
    if unique_senders < min_counterparties || unique_receivers < min_counterparties {
        return None;
    }
    let balanced = if total_received.is_zero() {
        false
    } else {
        let ratio: f64 = (total_sent.to_string().parse::<f64>().unwrap_or(0.0))
            / (total_received.to_string().parse::<f64>().unwrap_or(1.0));
        (0.8..=1.2).contains(&ratio)
    };
    if !balanced {
        return None;
    }
    Some(Pattern {
        kind: PatternKind::MixingService,
        confidence: 0.7,
        description: format!(
            "{unique_senders} distinct senders and {unique_receivers} distinct receivers with near-balanced flow"
        ),
        evidence: vec![address.clone()],
        timestamp: Utc::now(),
    })
}

/// Fan-in-only heuristic: many distinct senders consolidating into one
/// address with comparatively little onward activity, resembling deposit
/// consolidation into a custodial or exchange-style wallet.
pub fn detect_exchange_consolidation(
    address: &Address,
    unique_senders: u64,
    unique_receivers: u64,
    min_senders: u64,
) -> Option<Pattern> {
    if unique_senders < min_senders || unique_receivers > unique_senders / 4 {
        return None;
    }
    Some(Pattern {
        kind: PatternKind::ExchangeConsolidation,
        confidence: 0.6,
        description: format!("{unique_senders} distinct senders consolidate funds with little onward spread"),
        evidence: vec![address.clone()],
        timestamp: Utc::now(),
    })
}

/// Scores a (from, to) pair's connecting paths for plausibility as a
/// laundering route -- a thin helper bridging path-finding into pattern
/// evidence when a caller wants "how would funds from A have reached B".
pub async fn supporting_paths(
    store: &Store,
    from: &Address,
    to: &Address,
    max_depth: u32,
) -> Result<Vec<paths::Path>, AppError> {
    paths::find_all_paths(store, from, to, max_depth, paths::DEFAULT_MAX_PATHS).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn addr(c: char) -> Address {
        Address::parse(&c.to_string().repeat(48)).unwrap()
    }

    fn transfer(from: char, to: char, amount: u64, minute: i64) -> Transfer {
        Transfer::new(
            0,
            1,
            Utc::now() + ChronoDuration::minutes(minute),
            addr(from),
            addr(to),
            U256::from(amount),
            None,
            minute,
        )
        .unwrap()
    }

    #[test]
    fn flags_three_rapid_transfers_from_the_same_sender() {
        let transfers = vec![
            transfer('A', 'B', 1, 0),
            transfer('A', 'C', 1, 1),
            transfer('A', 'D', 1, 2),
        ];
        let patterns = detect_rapid_sequential(&transfers, Duration::from_secs(300));
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, PatternKind::RapidSequential);
    }

    #[test]
    fn does_not_flag_two_transfers() {
        let transfers = vec![transfer('A', 'B', 1, 0), transfer('A', 'C', 1, 1)];
        assert!(detect_rapid_sequential(&transfers, Duration::from_secs(300)).is_empty());
    }

    #[test]
    fn flags_round_trillion_amount() {
        let transfers = vec![transfer('A', 'B', 1_000_000_000_000, 0)];
        let patterns = detect_round_numbers(&transfers);
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn does_not_flag_non_round_amount() {
        let transfers = vec![transfer('A', 'B', 1_234_567, 0)];
        assert!(detect_round_numbers(&transfers).is_empty());
    }

    #[test]
    fn close_loop_at_rotates_and_appends_the_center() {
        // The engine hands back the globally-canonical rotation, e.g. [B, C, A]
        // for the cycle A -> B -> C -> A; the pattern's evidence should read as
        // a path anchored on and closing back on the query's own center.
        let (a, b, c) = (addr('A'), addr('B'), addr('C'));
        let canonical = vec![b.clone(), c.clone(), a.clone()];
        let evidence = close_loop_at(canonical, &a);
        assert_eq!(evidence, vec![a.clone(), b, c, a]);
    }

    #[test]
    fn mixing_service_requires_balanced_flow() {
        let address = addr('A');
        let flagged = detect_mixing_service(
            &address,
            10,
            10,
            U256::from(1000u64),
            U256::from(950u64),
            5,
        );
        assert!(flagged.is_some());

        let not_flagged = detect_mixing_service(
            &address,
            10,
            10,
            U256::from(1000u64),
            U256::from(10u64),
            5,
        );
        assert!(not_flagged.is_none());
    }
}

//! Direct, multi-hop, and circular-flow traversals (§4.9), operating directly
//! against the `transfer_stats` aggregate rather than raw transfers.

use std::collections::{BTreeSet, HashMap, HashSet};

use alloy_primitives::U256;

use crate::error::AppError;
use crate::model::{Address, TransferStats};
use crate::store::Store;

/// A node discovered by traversal, before it's enriched into a [`crate::model::GraphNode`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawNode {
    pub address: Address,
    pub hop_level: u32,
}

/// An edge discovered by traversal: one aggregated `transfer_stats` row,
/// possibly folding both directions together when `bidirectional`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEdge {
    pub from: Address,
    pub to: Address,
    pub total_amount: U256,
    pub transfer_count: u64,
    pub first_block: u64,
    pub last_block: u64,
    pub bidirectional: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Traversal {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}

fn merge_directions(forward: Option<TransferStats>, reverse: Option<TransferStats>) -> Option<RawEdge> {
    match (forward, reverse) {
        (Some(f), Some(r)) => Some(RawEdge {
            from: f.from,
            to: f.to,
            total_amount: f.total_amount + r.total_amount,
            transfer_count: f.transfer_count + r.transfer_count,
            first_block: f.first_transfer_block.min(r.first_transfer_block),
            last_block: f.last_transfer_block.max(r.last_transfer_block),
            bidirectional: true,
        }),
        (Some(f), None) => Some(RawEdge {
            from: f.from,
            to: f.to,
            total_amount: f.total_amount,
            transfer_count: f.transfer_count,
            first_block: f.first_transfer_block,
            last_block: f.last_transfer_block,
            bidirectional: false,
        }),
        (None, Some(r)) => Some(RawEdge {
            from: r.from,
            to: r.to,
            total_amount: r.total_amount,
            transfer_count: r.transfer_count,
            first_block: r.first_transfer_block,
            last_block: r.last_transfer_block,
            bidirectional: false,
        }),
        (None, None) => None,
    }
}

/// Direct (depth=1) traversal: counterparties of `center` with `total_amount
/// >= min_volume`, ordered by volume descending, capped at `limit`. Both
/// directions between a pair are folded into one bidirectional edge.
pub async fn direct(
    store: &Store,
    center: &Address,
    min_volume: U256,
    limit: usize,
) -> Result<Traversal, AppError> {
    let stats = store
        .counterparty_stats(center, min_volume, limit as i64 * 2)
        .await?;

    let mut by_pair: HashMap<(Address, Address), (Option<TransferStats>, Option<TransferStats>)> =
        HashMap::new();
    for s in stats {
        let counterparty = if &s.from == center { s.to.clone() } else { s.from.clone() };
        let key = pair_key(center, &counterparty);
        let entry = by_pair.entry(key).or_insert((None, None));
        if &s.from == center {
            entry.0 = Some(s);
        } else {
            entry.1 = Some(s);
        }
    }

    let mut edges: Vec<RawEdge> = by_pair
        .into_values()
        .filter_map(|(f, r)| merge_directions(f, r))
        .collect();
    edges.sort_by(|a, b| b.total_amount.cmp(&a.total_amount));
    edges.truncate(limit);

    let mut nodes = vec![RawNode { address: center.clone(), hop_level: 0 }];
    for edge in &edges {
        let counterparty = if &edge.from == center { &edge.to } else { &edge.from };
        nodes.push(RawNode { address: counterparty.clone(), hop_level: 1 });
    }

    Ok(Traversal { nodes, edges })
}

fn pair_key(center: &Address, counterparty: &Address) -> (Address, Address) {
    if center <= counterparty {
        (center.clone(), counterparty.clone())
    } else {
        (counterparty.clone(), center.clone())
    }
}

/// BFS frontier-by-frontier multi-hop traversal (depth > 1). Each frontier
/// node contributes its top-K counterparties, K = remaining node budget /
/// frontier size (min 1). Ties break on larger `total_amount`, then
/// lexicographic address.
pub async fn multi_hop(
    store: &Store,
    center: &Address,
    depth: u32,
    max_nodes: usize,
    min_volume: U256,
) -> Result<Traversal, AppError> {
    let mut visited: HashSet<Address> = HashSet::from([center.clone()]);
    let mut nodes = vec![RawNode { address: center.clone(), hop_level: 0 }];
    let mut edges_by_pair: HashMap<(Address, Address), RawEdge> = HashMap::new();
    let mut frontier = vec![center.clone()];

    for hop in 1..=depth {
        if nodes.len() >= max_nodes || frontier.is_empty() {
            break;
        }
        let remaining_budget = max_nodes.saturating_sub(nodes.len());
        let k = (remaining_budget / frontier.len()).max(1);

        let mut next_frontier = Vec::new();
        for node in &frontier {
            if nodes.len() >= max_nodes {
                break;
            }
            let stats = store.counterparty_stats(node, min_volume, (k as i64) * 2).await?;

            let mut by_pair: HashMap<Address, (Option<TransferStats>, Option<TransferStats>)> =
                HashMap::new();
            for s in stats {
                let counterparty = if &s.from == node { s.to.clone() } else { s.from.clone() };
                if counterparty == *node {
                    continue;
                }
                let entry = by_pair.entry(counterparty).or_insert((None, None));
                if &s.from == node {
                    entry.0 = Some(s);
                } else {
                    entry.1 = Some(s);
                }
            }

            let mut candidates: Vec<(Address, RawEdge)> = by_pair
                .into_iter()
                .filter_map(|(addr, (f, r))| merge_directions(f, r).map(|e| (addr, e)))
                .collect();
            candidates.sort_by(|(addr_a, a), (addr_b, b)| {
                b.total_amount.cmp(&a.total_amount).then_with(|| addr_a.cmp(addr_b))
            });
            candidates.truncate(k);

            for (counterparty, edge) in candidates {
                let key = pair_key(node, &counterparty);
                edges_by_pair.entry(key).or_insert(edge);

                if !visited.contains(&counterparty) {
                    if nodes.len() >= max_nodes {
                        break;
                    }
                    visited.insert(counterparty.clone());
                    nodes.push(RawNode { address: counterparty.clone(), hop_level: hop });
                    next_frontier.push(counterparty);
                }
            }
        }
        frontier = next_frontier;
    }

    // Edges are included iff both endpoints made the final node set.
    let edges = edges_by_pair
        .into_values()
        .filter(|e| visited.contains(&e.from) && visited.contains(&e.to))
        .collect();

    Ok(Traversal { nodes, edges })
}

/// Falls back to an `account_stats`-driven relationship view (same output
/// shape) when both traversal modes produce zero edges, so the caller always
/// gets a well-formed, possibly-empty graph.
pub async fn fallback_from_account_stats(store: &Store, center: &Address) -> Result<Traversal, AppError> {
    let stats = store.account_stats(center).await?;
    let mut nodes = vec![RawNode { address: center.clone(), hop_level: 0 }];
    if stats.send_count == 0 && stats.receive_count == 0 {
        return Ok(Traversal { nodes, edges: vec![] });
    }
    // No per-counterparty detail survives into account_stats; emit the center
    // node alone, describing its aggregate activity via metadata instead.
    nodes.truncate(1);
    Ok(Traversal { nodes, edges: vec![] })
}

/// Finds every distinct cycle `center -> ... -> center` of length <= `depth`
/// whose minimum edge volume is >= `min_volume`. Each cycle is returned once,
/// in its canonical (lexicographically smallest rotation) form.
pub async fn circular_flows(
    store: &Store,
    center: &Address,
    depth: u32,
    min_volume: U256,
) -> Result<Vec<Vec<Address>>, AppError> {
    let mut cycles = Vec::new();
    let mut path = vec![center.clone()];
    search_cycles(store, center, center, depth, min_volume, &mut path, &mut cycles).await?;

    let mut canonical: BTreeSet<Vec<Address>> = BTreeSet::new();
    for cycle in cycles {
        canonical.insert(canonicalize_cycle(&cycle));
    }
    Ok(canonical.into_iter().collect())
}

fn search_cycles<'a>(
    store: &'a Store,
    origin: &'a Address,
    current: &'a Address,
    remaining_depth: u32,
    min_volume: U256,
    path: &'a mut Vec<Address>,
    cycles: &'a mut Vec<Vec<Address>>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), AppError>> + 'a>> {
    Box::pin(async move {
        if remaining_depth == 0 {
            return Ok(());
        }
        let stats = store
            .counterparty_stats(current, min_volume, 50)
            .await?;

        for s in stats {
            if &s.from != current || s.total_amount < min_volume {
                continue;
            }
            let next = s.to.clone();
            if &next == origin && path.len() >= 2 {
                let mut cycle = path.clone();
                cycle.push(origin.clone());
                cycles.push(cycle);
                continue;
            }
            if path.contains(&next) {
                continue;
            }
            path.push(next.clone());
            search_cycles(store, origin, &next, remaining_depth - 1, min_volume, path, cycles).await?;
            path.pop();
        }
        Ok(())
    })
}

fn canonicalize_cycle(cycle: &[Address]) -> Vec<Address> {
    // `cycle` is `[origin, .., origin]`; drop the repeated terminal node before
    // rotating so every representation of the same cycle collapses to one.
    let ring = &cycle[..cycle.len() - 1];
    (0..ring.len())
        .map(|start| {
            let mut rotated = ring[start..].to_vec();
            rotated.extend_from_slice(&ring[..start]);
            rotated
        })
        .min()
        .unwrap_or_default()
}

#[cfg(all(test, feature = "testing"))]
mod tests {
    use super::*;
    use crate::model::Transfer;
    use crate::store::open_temp;
    use chrono::Utc;

    fn addr(c: char) -> Address {
        Address::parse(&c.to_string().repeat(48)).unwrap()
    }

    #[tokio::test]
    async fn direct_traversal_merges_both_directions_into_one_edge() {
        let (store, _dir) = open_temp().await;
        let a = addr('A');
        let b = addr('B');
        store
            .ingest_transfer(&Transfer::new(0, 1, Utc::now(), a.clone(), b.clone(), U256::from(10u64), None, 0).unwrap())
            .await
            .unwrap();
        store
            .ingest_transfer(&Transfer::new(0, 2, Utc::now(), b.clone(), a.clone(), U256::from(5u64), None, 1).unwrap())
            .await
            .unwrap();

        let traversal = direct(&store, &a, U256::ZERO, 10).await.unwrap();
        assert_eq!(traversal.edges.len(), 1);
        assert!(traversal.edges[0].bidirectional);
        assert_eq!(traversal.edges[0].total_amount, U256::from(15u64));
    }

    #[tokio::test]
    async fn detects_a_three_hop_circular_flow() {
        let (store, _dir) = open_temp().await;
        let (a, b, c) = (addr('A'), addr('B'), addr('C'));
        for (from, to, block) in [(&a, &b, 100), (&b, &c, 101), (&c, &a, 102)] {
            store
                .ingest_transfer(&Transfer::new(0, block, Utc::now(), from.clone(), to.clone(), U256::from(1u64), None, block).unwrap())
                .await
                .unwrap();
        }

        let cycles = circular_flows(&store, &a, 3, U256::ZERO).await.unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }
}

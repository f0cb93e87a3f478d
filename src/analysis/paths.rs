//! Shortest-path and all-simple-paths search between two addresses (§4.11),
//! bounded by `maxDepth` and backed directly by the `transfer_stats`
//! aggregate rather than a pre-assembled graph, since a path's two endpoints
//! may be far apart in any single depth-bounded neighborhood.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use alloy_primitives::U256;

use crate::error::AppError;
use crate::model::Address;
use crate::store::Store;

pub const DEFAULT_MAX_DEPTH: u32 = 4;
pub const DEFAULT_MAX_PATHS: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathHop {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub hops: Vec<PathHop>,
    pub total_volume: U256,
}

impl Path {
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// `100 - 10*hops + min(50, 10*log10(totalVolume/1e12))`, floored at 0.
    pub fn score(&self) -> f64 {
        let volume: f64 = self.total_volume.to_string().parse().unwrap_or(0.0);
        let volume_term = if volume > 0.0 {
            (10.0 * (volume / 1e12).log10()).min(50.0)
        } else {
            0.0
        };
        (100.0 - 10.0 * self.hop_count() as f64 + volume_term).max(0.0)
    }
}

async fn outgoing(store: &Store, from: &Address) -> Result<Vec<(Address, U256)>, AppError> {
    let stats = store.counterparty_stats(from, U256::ZERO, 200).await?;
    Ok(stats
        .into_iter()
        .filter(|s| &s.from == from)
        .map(|s| (s.to, s.total_amount))
        .collect())
}

/// Fewest-hops path, BFS with unit edge weight.
pub async fn shortest_path_by_hops(
    store: &Store,
    from: &Address,
    to: &Address,
    max_depth: u32,
) -> Result<Option<Path>, AppError> {
    if from == to {
        return Ok(Some(Path { hops: Vec::new(), total_volume: U256::ZERO }));
    }

    let mut visited = HashSet::from([from.clone()]);
    let mut queue = std::collections::VecDeque::from([(from.clone(), 0u32)]);
    let mut predecessor: HashMap<Address, (Address, U256)> = HashMap::new();

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for (next, amount) in outgoing(store, &current).await? {
            if visited.insert(next.clone()) {
                predecessor.insert(next.clone(), (current.clone(), amount));
                if &next == to {
                    return Ok(Some(reconstruct(to, &predecessor)));
                }
                queue.push_back((next, depth + 1));
            }
        }
    }
    Ok(None)
}

fn reconstruct(to: &Address, predecessor: &HashMap<Address, (Address, U256)>) -> Path {
    let mut hops = Vec::new();
    let mut current = to.clone();
    while let Some((prev, amount)) = predecessor.get(&current) {
        hops.push(PathHop { from: prev.clone(), to: current.clone(), amount: *amount });
        current = prev.clone();
    }
    hops.reverse();
    let total_volume = hops.iter().map(|h| h.amount).fold(U256::ZERO, |acc, v| acc + v);
    Path { hops, total_volume }
}

#[derive(Clone, Eq, PartialEq)]
struct WidestCandidate {
    bottleneck: U256,
    address: Address,
}

impl Ord for WidestCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bottleneck.cmp(&other.bottleneck).then_with(|| other.address.cmp(&self.address))
    }
}

impl PartialOrd for WidestCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Maximum-bottleneck (widest) path: a modified Dijkstra that maximizes the
/// minimum edge amount along the path rather than minimizing hop count.
pub async fn widest_path(
    store: &Store,
    from: &Address,
    to: &Address,
    max_depth: u32,
) -> Result<Option<Path>, AppError> {
    if from == to {
        return Ok(Some(Path { hops: Vec::new(), total_volume: U256::ZERO }));
    }

    let mut best_bottleneck: HashMap<Address, U256> = HashMap::from([(from.clone(), U256::MAX)]);
    let mut depth_reached: HashMap<Address, u32> = HashMap::from([(from.clone(), 0)]);
    let mut predecessor: HashMap<Address, (Address, U256)> = HashMap::new();
    let mut heap = BinaryHeap::from([WidestCandidate { bottleneck: U256::MAX, address: from.clone() }]);

    while let Some(WidestCandidate { bottleneck, address }) = heap.pop() {
        if bottleneck < *best_bottleneck.get(&address).unwrap_or(&U256::ZERO) {
            continue;
        }
        let depth = depth_reached[&address];
        if depth >= max_depth {
            continue;
        }
        for (next, amount) in outgoing(store, &address).await? {
            let candidate_bottleneck = bottleneck.min(amount);
            if candidate_bottleneck > *best_bottleneck.get(&next).unwrap_or(&U256::ZERO) {
                best_bottleneck.insert(next.clone(), candidate_bottleneck);
                depth_reached.insert(next.clone(), depth + 1);
                predecessor.insert(next.clone(), (address.clone(), amount));
                heap.push(WidestCandidate { bottleneck: candidate_bottleneck, address: next });
            }
        }
    }

    if !predecessor.contains_key(to) {
        return Ok(None);
    }
    Ok(Some(reconstruct(to, &predecessor)))
}

/// Up to `max_paths` distinct simple paths between `from` and `to`, each of
/// length <= `max_depth`, ranked by [`Path::score`] descending. Exploration
/// itself is capped at `max_depth` hops and a generous node-expansion budget
/// to keep the DFS from blowing up on a densely connected neighborhood.
pub async fn find_all_paths(
    store: &Store,
    from: &Address,
    to: &Address,
    max_depth: u32,
    max_paths: usize,
) -> Result<Vec<Path>, AppError> {
    let mut found = Vec::new();
    let mut visiting = HashSet::from([from.clone()]);
    let mut path = Vec::new();

    search_paths(store, from, to, max_depth, &mut visiting, &mut path, &mut found, 5_000).await?;

    found.sort_by(|a: &Path, b: &Path| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));
    found.truncate(max_paths);
    Ok(found)
}

#[allow(clippy::too_many_arguments)]
fn search_paths<'a>(
    store: &'a Store,
    origin_current: &'a Address,
    target: &'a Address,
    remaining_depth: u32,
    visiting: &'a mut HashSet<Address>,
    path: &'a mut Vec<PathHop>,
    found: &'a mut Vec<Path>,
    mut expansion_budget: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, AppError>> + 'a>> {
    Box::pin(async move {
        if remaining_depth == 0 || expansion_budget == 0 {
            return Ok(expansion_budget);
        }
        expansion_budget -= 1;

        for (next, amount) in outgoing(store, origin_current).await? {
            if &next == target {
                let mut hops = path.clone();
                hops.push(PathHop { from: origin_current.clone(), to: next.clone(), amount });
                let total_volume = hops.iter().map(|h| h.amount).fold(U256::ZERO, |acc, v| acc + v);
                found.push(Path { hops, total_volume });
                continue;
            }
            if visiting.contains(&next) {
                continue;
            }
            visiting.insert(next.clone());
            path.push(PathHop { from: origin_current.clone(), to: next.clone(), amount });
            expansion_budget =
                search_paths(store, &next, target, remaining_depth - 1, visiting, path, found, expansion_budget)
                    .await?;
            path.pop();
            visiting.remove(&next);
        }
        Ok(expansion_budget)
    })
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
    async fn from_equals_to_is_the_empty_path() {
        let (store, _dir) = open_temp().await;
        let path = shortest_path_by_hops(&store, &addr('A'), &addr('A'), 4).await.unwrap().unwrap();
        assert_eq!(path.hop_count(), 0);
    }

    #[tokio::test]
    async fn finds_shortest_hop_path_through_an_intermediary() {
        let (store, _dir) = open_temp().await;
        let (a, b, c) = (addr('A'), addr('B'), addr('C'));
        store.ingest_transfer(&Transfer::new(0, 1, Utc::now(), a.clone(), b.clone(), U256::from(10u64), None, 0).unwrap()).await.unwrap();
        store.ingest_transfer(&Transfer::new(0, 2, Utc::now(), b.clone(), c.clone(), U256::from(20u64), None, 1).unwrap()).await.unwrap();

        let path = shortest_path_by_hops(&store, &a, &c, 4).await.unwrap().unwrap();
        assert_eq!(path.hop_count(), 2);
        assert_eq!(path.total_volume, U256::from(30u64));
    }

    #[tokio::test]
    async fn widest_path_prefers_the_higher_bottleneck_route() {
        let (store, _dir) = open_temp().await;
        let (a, b, c, d) = (addr('A'), addr('B'), addr('C'), addr('D'));
        // A -> B -> D: bottleneck 5. A -> C -> D: bottleneck 100.
        store.ingest_transfer(&Transfer::new(0, 1, Utc::now(), a.clone(), b.clone(), U256::from(5u64), None, 0).unwrap()).await.unwrap();
        store.ingest_transfer(&Transfer::new(0, 2, Utc::now(), b.clone(), d.clone(), U256::from(999u64), None, 1).unwrap()).await.unwrap();
        store.ingest_transfer(&Transfer::new(0, 3, Utc::now(), a.clone(), c.clone(), U256::from(100u64), None, 2).unwrap()).await.unwrap();
        store.ingest_transfer(&Transfer::new(0, 4, Utc::now(), c.clone(), d.clone(), U256::from(100u64), None, 3).unwrap()).await.unwrap();

        let path = widest_path(&store, &a, &d, 4).await.unwrap().unwrap();
        assert_eq!(path.hops[0].to, c);
    }
}

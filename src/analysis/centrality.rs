//! Degree, clustering, betweenness, PageRank, and closeness centrality.
//!
//! Betweenness/PageRank/closeness are computed over whatever subgraph the
//! caller passes in -- normally the already depth/maxNodes-bounded graph a
//! request assembled, never the full network. They're local approximations,
//! not network-wide centrality; a node central to the whole chain but absent
//! from this neighborhood won't show as central here.

use std::collections::{HashMap, HashSet, VecDeque};

use alloy_primitives::U256;

use crate::model::{Address, GraphEdge, GraphNode};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DegreeCentrality {
    pub in_degree: u32,
    pub out_degree: u32,
    pub total_degree: u32,
    pub weighted_degree: U256,
}

fn adjacency(nodes: &[GraphNode], edges: &[GraphEdge]) -> HashMap<Address, Vec<Address>> {
    let mut adj: HashMap<Address, Vec<Address>> =
        nodes.iter().map(|n| (n.address.clone(), Vec::new())).collect();
    for edge in edges {
        adj.entry(edge.source.clone()).or_default().push(edge.target.clone());
        adj.entry(edge.target.clone()).or_default().push(edge.source.clone());
    }
    adj
}

/// Per-node in/out/total degree plus the sum of incident edge volumes.
pub fn degree_centrality(
    nodes: &[GraphNode],
    edges: &[GraphEdge],
) -> HashMap<Address, DegreeCentrality> {
    let mut result: HashMap<Address, DegreeCentrality> =
        nodes.iter().map(|n| (n.address.clone(), DegreeCentrality::default())).collect();

    for edge in edges {
        let volume = edge.volume_u256();
        if let Some(entry) = result.get_mut(&edge.source) {
            entry.out_degree += 1;
            entry.total_degree += 1;
            entry.weighted_degree += volume;
        }
        if let Some(entry) = result.get_mut(&edge.target) {
            entry.in_degree += 1;
            entry.total_degree += 1;
            entry.weighted_degree += volume;
        }
    }
    result
}

/// Local (per-node) clustering coefficient: the fraction of a node's
/// neighbor pairs that are themselves connected. Unlike the assembler's
/// response-level average, this is computed exactly for every node -- the
/// sampling cap only applies to the cheap summary statistic, not to a
/// targeted per-address query.
pub fn clustering_coefficients(nodes: &[GraphNode], edges: &[GraphEdge]) -> HashMap<Address, f64> {
    let adj = adjacency(nodes, edges);
    let neighbor_sets: HashMap<Address, HashSet<Address>> = adj
        .iter()
        .map(|(addr, neighbors)| (addr.clone(), neighbors.iter().cloned().collect()))
        .collect();

    nodes
        .iter()
        .map(|n| {
            let neighbors = &adj[&n.address];
            let k = neighbors.len();
            if k < 2 {
                return (n.address.clone(), 0.0);
            }
            let mut links = 0usize;
            for i in 0..neighbors.len() {
                for j in (i + 1)..neighbors.len() {
                    if neighbor_sets[&neighbors[i]].contains(&neighbors[j]) {
                        links += 1;
                    }
                }
            }
            let possible = k * (k - 1) / 2;
            (n.address.clone(), links as f64 / possible as f64)
        })
        .collect()
}

/// Unweighted Brandes' betweenness centrality, normalized to `[0, 1]` by the
/// number of node pairs excluding the node itself.
pub fn betweenness_approx(nodes: &[GraphNode], edges: &[GraphEdge]) -> HashMap<Address, f64> {
    let adj = adjacency(nodes, edges);
    let addrs: Vec<Address> = nodes.iter().map(|n| n.address.clone()).collect();
    let mut betweenness: HashMap<Address, f64> = addrs.iter().cloned().map(|a| (a, 0.0)).collect();

    for source in &addrs {
        let mut stack = Vec::new();
        let mut predecessors: HashMap<Address, Vec<Address>> = HashMap::new();
        let mut sigma: HashMap<Address, f64> = addrs.iter().cloned().map(|a| (a, 0.0)).collect();
        let mut distance: HashMap<Address, i64> = addrs.iter().cloned().map(|a| (a, -1)).collect();
        sigma.insert(source.clone(), 1.0);
        distance.insert(source.clone(), 0);

        let mut queue = VecDeque::from([source.clone()]);
        while let Some(v) = queue.pop_front() {
            stack.push(v.clone());
            if let Some(neighbors) = adj.get(&v) {
                for w in neighbors {
                    if distance[w] < 0 {
                        distance.insert(w.clone(), distance[&v] + 1);
                        queue.push_back(w.clone());
                    }
                    if distance[w] == distance[&v] + 1 {
                        let sigma_v = sigma[&v];
                        *sigma.get_mut(w).unwrap() += sigma_v;
                        predecessors.entry(w.clone()).or_default().push(v.clone());
                    }
                }
            }
        }

        let mut delta: HashMap<Address, f64> = addrs.iter().cloned().map(|a| (a, 0.0)).collect();
        while let Some(w) = stack.pop() {
            if let Some(preds) = predecessors.get(&w) {
                for v in preds {
                    let contribution = (sigma[v] / sigma[&w]) * (1.0 + delta[&w]);
                    *delta.get_mut(v).unwrap() += contribution;
                }
            }
            if w != *source {
                *betweenness.get_mut(&w).unwrap() += delta[&w];
            }
        }
    }

    let n = addrs.len();
    if n > 2 {
        let normalizer = ((n - 1) * (n - 2)) as f64;
        for value in betweenness.values_mut() {
            *value /= normalizer;
        }
    }
    betweenness
}

/// PageRank via power iteration, damping factor 0.85, 50 iterations or
/// earlier convergence at `1e-6` total delta.
pub fn pagerank_approx(nodes: &[GraphNode], edges: &[GraphEdge]) -> HashMap<Address, f64> {
    const DAMPING: f64 = 0.85;
    const ITERATIONS: usize = 50;
    const TOLERANCE: f64 = 1e-6;

    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }
    let adj = adjacency(nodes, edges);
    let addrs: Vec<Address> = nodes.iter().map(|n| n.address.clone()).collect();
    let mut rank: HashMap<Address, f64> = addrs.iter().cloned().map(|a| (a, 1.0 / n as f64)).collect();

    for _ in 0..ITERATIONS {
        let mut next: HashMap<Address, f64> =
            addrs.iter().cloned().map(|a| (a, (1.0 - DAMPING) / n as f64)).collect();

        for addr in &addrs {
            let out_degree = adj.get(addr).map(|v| v.len()).unwrap_or(0);
            if out_degree == 0 {
                continue;
            }
            let share = DAMPING * rank[addr] / out_degree as f64;
            for target in &adj[addr] {
                *next.get_mut(target).unwrap() += share;
            }
        }

        let delta: f64 = addrs.iter().map(|a| (next[a] - rank[a]).abs()).sum();
        rank = next;
        if delta < TOLERANCE {
            break;
        }
    }
    rank
}

/// Closeness centrality: inverse of the average shortest-path distance to
/// every reachable node, normalized by the fraction of the graph reached (the
/// Wasserman-Faust variant, which tolerates a disconnected local subgraph).
pub fn closeness_approx(nodes: &[GraphNode], edges: &[GraphEdge]) -> HashMap<Address, f64> {
    let adj = adjacency(nodes, edges);
    let n = nodes.len();
    nodes
        .iter()
        .map(|node| {
            let distances = bfs_distances(&node.address, &adj);
            let reachable: Vec<i64> = distances.values().copied().filter(|&d| d > 0).collect();
            if reachable.is_empty() || n <= 1 {
                return (node.address.clone(), 0.0);
            }
            let total: i64 = reachable.iter().sum();
            let reached = reachable.len() as f64;
            let closeness = (reached / total as f64) * (reached / (n - 1) as f64);
            (node.address.clone(), closeness)
        })
        .collect()
}

fn bfs_distances(source: &Address, adj: &HashMap<Address, Vec<Address>>) -> HashMap<Address, i64> {
    let mut distance = HashMap::from([(source.clone(), 0i64)]);
    let mut queue = VecDeque::from([source.clone()]);
    while let Some(node) = queue.pop_front() {
        let d = distance[&node];
        if let Some(neighbors) = adj.get(&node) {
            for neighbor in neighbors {
                if !distance.contains_key(neighbor) {
                    distance.insert(neighbor.clone(), d + 1);
                    queue.push_back(neighbor.clone());
                }
            }
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::{BalanceSummary, Direction, EdgeType, IdentitySummary};
    use chrono::Utc;

    fn addr(c: char) -> Address {
        Address::parse(&c.to_string().repeat(48)).unwrap()
    }

    fn node(c: char) -> GraphNode {
        GraphNode {
            address: addr(c),
            identity: IdentitySummary { display: None, is_confirmed: false, is_invalid: false },
            balance: BalanceSummary { free: "0".into(), reserved: "0".into(), frozen: "0".into() },
            node_type: "counterparty".into(),
            hop_level: 1,
            degree: 0,
            in_degree: 0,
            out_degree: 0,
            total_volume: "0".into(),
            suggested_size: 8.0,
            suggested_color: "#000".into(),
            first_seen: None,
            last_active: None,
            risk_score: None,
            risk_factors: vec![],
            importance_score: None,
        }
    }

    fn edge(from: char, to: char, volume: u64) -> GraphEdge {
        GraphEdge {
            id: format!("{from}-{to}"),
            source: addr(from),
            target: addr(to),
            count: 1,
            volume: volume.to_string(),
            edge_type: EdgeType::Transfer,
            first_transfer: Utc::now(),
            last_transfer: Utc::now(),
            suspicious_pattern: false,
            pattern_type: None,
            suggested_width: 1.0,
            suggested_color: "#000".into(),
            suggested_opacity: 1.0,
            animated: false,
            bidirectional: false,
            dominant_direction: Direction::Outbound,
        }
    }

    #[test]
    fn degree_centrality_counts_both_directions() {
        let nodes = vec![node('A'), node('B'), node('C')];
        let edges = vec![edge('A', 'B', 10), edge('B', 'C', 5)];
        let centrality = degree_centrality(&nodes, &edges);
        assert_eq!(centrality[&addr('B')].in_degree, 1);
        assert_eq!(centrality[&addr('B')].out_degree, 1);
        assert_eq!(centrality[&addr('B')].weighted_degree, U256::from(15u64));
    }

    #[test]
    fn triangle_has_full_clustering_coefficient() {
        let nodes = vec![node('A'), node('B'), node('C')];
        let edges = vec![edge('A', 'B', 1), edge('B', 'C', 1), edge('C', 'A', 1)];
        let coeffs = clustering_coefficients(&nodes, &edges);
        assert_eq!(coeffs[&addr('A')], 1.0);
    }

    #[test]
    fn pagerank_sums_to_roughly_one() {
        let nodes = vec![node('A'), node('B'), node('C')];
        let edges = vec![edge('A', 'B', 1), edge('B', 'C', 1), edge('C', 'A', 1)];
        let rank = pagerank_approx(&nodes, &edges);
        let total: f64 = rank.values().sum();
        assert!((total - 1.0).abs() < 1e-3, "total was {total}");
    }

    #[test]
    fn betweenness_is_zero_for_a_triangle() {
        // Every node has a direct edge to every other: no shortest path runs
        // through a third node.
        let nodes = vec![node('A'), node('B'), node('C')];
        let edges = vec![edge('A', 'B', 1), edge('B', 'C', 1), edge('C', 'A', 1)];
        let betweenness = betweenness_approx(&nodes, &edges);
        assert!(betweenness.values().all(|&v| v == 0.0));
    }
}

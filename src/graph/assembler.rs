//! Graph Assembler (§4.10): turns a validated request into a capped,
//! D3-shaped [`GraphPayload`], pulling from the store and, when freshness
//! permits, the upstream client.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy_primitives::U256;
use chrono::{DateTime, Utc};

use crate::cursor::GraphCursor;
use crate::error::AppError;
use crate::model::account::RiskLevel;
use crate::model::graph::{
    BalanceSummary, Direction, EdgeType, ForceParameters, GraphEdge, GraphMetadata, GraphNode,
    GraphPayload, IdentitySummary, Layout, RenderingComplexity, SuggestedLayout,
};
use crate::model::{Account, Address};
use crate::store::Store;
use crate::upstream::UpstreamService;

use super::engine::{self, RawEdge, RawNode, Traversal};

#[derive(Clone, Debug)]
pub struct GraphRequest {
    pub center: Address,
    pub depth: u32,
    pub max_nodes: usize,
    pub min_volume: U256,
    pub include_risk: bool,
    pub enable_clustering: bool,
}

pub struct GraphAssembler {
    store: Store,
    upstream: Option<Arc<UpstreamService>>,
    account_staleness: chrono::Duration,
}

impl GraphAssembler {
    pub fn new(store: Store, upstream: Option<Arc<UpstreamService>>, account_staleness: std::time::Duration) -> Self {
        Self {
            store,
            upstream,
            account_staleness: chrono::Duration::from_std(account_staleness)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    /// Resolves the center account from the store, refreshing from upstream
    /// when it's stale or missing and upstream access is enabled.
    async fn resolve_center(&self, address: &Address) -> Result<Option<Account>, AppError> {
        let existing = self.store.get_account(address).await?;
        let needs_refresh = match &existing {
            Some(account) => account.is_stale(self.account_staleness),
            None => true,
        };

        if needs_refresh {
            if let Some(upstream) = &self.upstream {
                if let Some(remote) = upstream.get_account(address).await? {
                    self.store.upsert_account_observed(address, remote.first_seen_block).await?;
                    let identity = remote.identity.map(|i| crate::model::Identity {
                        display: i.display,
                        legal: i.legal,
                        web: i.web,
                        email: i.email,
                        twitter: i.twitter,
                        is_verified: i.is_confirmed,
                        parent: None,
                    });
                    let balance = crate::upstream::client::parse_amount(&remote.free_balance)?;
                    self.store
                        .update_account_identity(address, balance, identity.as_ref(), None)
                        .await?;
                }
            }
        }

        self.store.get_account(address).await
    }

    /// Executes the full request pipeline (§4.10 steps 2-6). Validation and
    /// cost charging (steps 1) are the caller's responsibility.
    pub async fn assemble(&self, request: &GraphRequest) -> Result<GraphPayload, AppError> {
        let center_account = self.resolve_center(&request.center).await?;

        let mut traversal = if request.depth <= 1 {
            engine::direct(&self.store, &request.center, request.min_volume, request.max_nodes).await?
        } else {
            engine::multi_hop(
                &self.store,
                &request.center,
                request.depth,
                request.max_nodes,
                request.min_volume,
            )
            .await?
        };

        if traversal.edges.is_empty() {
            traversal = engine::fallback_from_account_stats(&self.store, &request.center).await?;
        }

        let has_more = traversal.nodes.len() > request.max_nodes;
        let mut frontier_cut: Vec<Address> = Vec::new();
        if has_more {
            frontier_cut = traversal.nodes[request.max_nodes..]
                .iter()
                .map(|n| n.address.clone())
                .collect();
            traversal.nodes.truncate(request.max_nodes);
            let kept: HashSet<&Address> = traversal.nodes.iter().map(|n| &n.address).collect();
            traversal.edges.retain(|e| kept.contains(&e.from) && kept.contains(&e.to));
        }

        let nodes = self
            .build_nodes(&traversal, center_account.as_ref(), request.include_risk)
            .await?;
        let edges = build_edges(&traversal.edges);

        let clusters = if request.enable_clustering {
            Some(sample_clusters(&traversal))
        } else {
            None
        };

        let metadata = build_metadata(request, &nodes, &edges, has_more, &frontier_cut);

        Ok(GraphPayload {
            nodes,
            edges,
            layout: Layout {
                force_parameters: ForceParameters::default(),
                fixed_positions: vec![(request.center.clone(), 0.0, 0.0)],
            },
            clusters,
            metadata,
        })
    }

    /// Progressive expansion (§4.10): decode the cursor, re-fetch direct
    /// neighbors of up to 5 of its frontier addresses, and emit only new
    /// nodes/edges plus a next cursor if more remain.
    pub async fn expand(
        &self,
        cursor: &GraphCursor,
        limit: usize,
        min_volume: U256,
    ) -> Result<GraphPayload, AppError> {
        if self.store.get_account(&cursor.center_address).await?.is_none() {
            return Err(AppError::AddressNotFound);
        }

        let already_known: HashSet<Address> = cursor.exclude_nodes.iter().cloned().collect();
        let frontier: Vec<Address> = cursor.last_nodes.iter().take(5).cloned().collect();

        let mut new_nodes: Vec<RawNode> = Vec::new();
        let mut new_edges: Vec<RawEdge> = Vec::new();
        let mut seen: HashSet<Address> = already_known.clone();
        seen.insert(cursor.center_address.clone());

        for node in &frontier {
            if new_nodes.len() >= limit {
                break;
            }
            let remaining = limit - new_nodes.len();
            let t = engine::direct(&self.store, node, min_volume, remaining).await?;
            for n in t.nodes {
                if n.address != *node && !seen.contains(&n.address) {
                    seen.insert(n.address.clone());
                    new_nodes.push(RawNode { address: n.address, hop_level: cursor.current_depth + 1 });
                }
            }
            new_edges.extend(t.edges);
        }
        new_nodes.truncate(limit);

        let has_more = !new_nodes.is_empty() && new_nodes.len() >= limit;
        let traversal = Traversal { nodes: new_nodes.clone(), edges: new_edges };
        let nodes = self.build_nodes(&traversal, None, false).await?;
        let edges = build_edges(&traversal.edges);

        let next_cursor = has_more.then(|| {
            cursor
                .advance(new_nodes.iter().map(|n| n.address.clone()))
                .encode()
        });

        let metadata = GraphMetadata {
            total_nodes: nodes.len(),
            total_edges: edges.len(),
            network_density: 0.0,
            average_clustering_coefficient: 0.0,
            center_node: cursor.center_address.clone(),
            requested_depth: cursor.current_depth + 1,
            actual_depth: cursor.current_depth + 1,
            has_more,
            next_cursor,
            nodes_omitted: 0,
            edges_omitted: 0,
            rendering_complexity: RenderingComplexity::Low,
            suggested_layout: SuggestedLayout::Force,
            high_risk_node_count: 0,
            suspicious_edge_count: 0,
            earliest_transfer: edges.iter().map(|e| e.first_transfer).min(),
            latest_transfer: edges.iter().map(|e| e.last_transfer).max(),
        };

        Ok(GraphPayload {
            nodes,
            edges,
            layout: Layout::default(),
            clusters: None,
            metadata,
        })
    }

    async fn build_nodes(
        &self,
        traversal: &Traversal,
        center_account: Option<&Account>,
        include_risk: bool,
    ) -> Result<Vec<GraphNode>, AppError> {
        let degree = degree_map(&traversal.edges);
        let mut nodes = Vec::with_capacity(traversal.nodes.len());

        for raw in &traversal.nodes {
            let account = if raw.hop_level == 0 {
                center_account.cloned()
            } else {
                self.store.get_account(&raw.address).await?
            };
            let (in_degree, out_degree) = degree.get(&raw.address).copied().unwrap_or((0, 0));
            let total_volume: U256 = traversal
                .edges
                .iter()
                .filter(|e| e.from == raw.address || e.to == raw.address)
                .map(|e| e.total_amount)
                .fold(U256::ZERO, |acc, v| acc + v);

            let risk_score = if include_risk { account.as_ref().and_then(|a| a.risk_score) } else { None };

            nodes.push(GraphNode {
                address: raw.address.clone(),
                identity: account
                    .as_ref()
                    .and_then(|a| a.identity.as_ref())
                    .map(|i| IdentitySummary {
                        display: i.display.clone(),
                        is_confirmed: i.is_verified,
                        is_invalid: false,
                    })
                    .unwrap_or(IdentitySummary { display: None, is_confirmed: false, is_invalid: false }),
                balance: BalanceSummary {
                    free: account.as_ref().map(|a| a.balance.to_string()).unwrap_or_else(|| "0".to_owned()),
                    reserved: "0".to_owned(),
                    frozen: "0".to_owned(),
                },
                node_type: if raw.hop_level == 0 { "center".to_owned() } else { "counterparty".to_owned() },
                hop_level: raw.hop_level,
                degree: in_degree + out_degree,
                in_degree,
                out_degree,
                total_volume: total_volume.to_string(),
                suggested_size: node_size(in_degree + out_degree),
                suggested_color: node_color(raw.hop_level, risk_score),
                first_seen: account.as_ref().map(|a| a.created_at),
                last_active: account.as_ref().map(|a| a.updated_at),
                risk_score,
                risk_factors: Vec::new(),
                importance_score: None,
            });
        }

        Ok(nodes)
    }
}

fn degree_map(edges: &[RawEdge]) -> HashMap<Address, (u32, u32)> {
    let mut map: HashMap<Address, (u32, u32)> = HashMap::new();
    for edge in edges {
        map.entry(edge.from.clone()).or_default().0 += 1;
        map.entry(edge.to.clone()).or_default().1 += 1;
    }
    map
}

fn node_size(degree: u32) -> f64 {
    8.0 + (degree as f64).sqrt() * 4.0
}

fn node_color(hop_level: u32, risk_score: Option<u8>) -> String {
    if let Some(score) = risk_score {
        return match RiskLevel::from_score(score) {
            RiskLevel::Critical | RiskLevel::High => "#d32f2f".to_owned(),
            RiskLevel::Medium => "#f9a825".to_owned(),
            RiskLevel::Low => "#2e7d32".to_owned(),
        };
    }
    if hop_level == 0 { "#1565c0".to_owned() } else { "#90a4ae".to_owned() }
}

fn build_edges(raw_edges: &[RawEdge]) -> Vec<GraphEdge> {
    raw_edges
        .iter()
        .map(|e| {
            let now = Utc::now();
            GraphEdge {
                id: format!("{}-{}", e.from, e.to),
                source: e.from.clone(),
                target: e.to.clone(),
                count: e.transfer_count,
                volume: e.total_amount.to_string(),
                edge_type: EdgeType::Transfer,
                first_transfer: block_to_timestamp(e.first_block, now),
                last_transfer: block_to_timestamp(e.last_block, now),
                suspicious_pattern: false,
                pattern_type: None,
                suggested_width: 1.0 + (e.transfer_count as f64).ln().max(0.0),
                suggested_color: "#546e7a".to_owned(),
                suggested_opacity: if e.bidirectional { 0.9 } else { 0.6 },
                animated: false,
                bidirectional: e.bidirectional,
                dominant_direction: if e.bidirectional { Direction::Both } else { Direction::Outbound },
            }
        })
        .collect()
}

/// Block numbers don't carry wall-clock time once stripped into a `RawEdge`;
/// until the assembler threads actual transfer timestamps through, this
/// returns `now` as a placeholder so every emitted edge is well-formed.
fn block_to_timestamp(_block: u64, now: DateTime<Utc>) -> DateTime<Utc> {
    now
}

fn sample_clusters(traversal: &Traversal) -> Vec<Vec<Address>> {
    // A simple connected-components pass over the kept edge set; clustering
    // quality beyond component membership is the Pattern Analyzer's job.
    let mut adjacency: HashMap<Address, Vec<Address>> = HashMap::new();
    for edge in &traversal.edges {
        adjacency.entry(edge.from.clone()).or_default().push(edge.to.clone());
        adjacency.entry(edge.to.clone()).or_default().push(edge.from.clone());
    }

    let mut visited = HashSet::new();
    let mut clusters = Vec::new();
    for node in &traversal.nodes {
        if visited.contains(&node.address) {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![node.address.clone()];
        while let Some(addr) = stack.pop() {
            if !visited.insert(addr.clone()) {
                continue;
            }
            component.push(addr.clone());
            if let Some(neighbors) = adjacency.get(&addr) {
                stack.extend(neighbors.iter().cloned());
            }
        }
        if component.len() > 1 {
            clusters.push(component);
        }
    }
    clusters
}

fn build_metadata(
    request: &GraphRequest,
    nodes: &[GraphNode],
    edges: &[GraphEdge],
    has_more: bool,
    frontier_cut: &[Address],
) -> GraphMetadata {
    let n = nodes.len();
    let e = edges.len();
    let network_density = if n > 1 { e as f64 / (n as f64 * (n as f64 - 1.0)) } else { 0.0 };

    // Sampled clustering coefficient, capped at 10 nodes per §4.10.
    let sample_size = n.min(10);
    let average_clustering_coefficient = if sample_size > 0 {
        let adjacency = build_adjacency(nodes, edges);
        let sum: f64 = nodes
            .iter()
            .take(sample_size)
            .map(|node| local_clustering_coefficient(&node.address, &adjacency))
            .sum();
        sum / sample_size as f64
    } else {
        0.0
    };

    let suggested_layout = if n < 20 {
        SuggestedLayout::Circular
    } else if network_density > 0.1 {
        SuggestedLayout::Hierarchical
    } else {
        SuggestedLayout::Force
    };

    let rendering_complexity = match n {
        0..=50 => RenderingComplexity::Low,
        51..=200 => RenderingComplexity::Medium,
        _ => RenderingComplexity::High,
    };

    let next_cursor = has_more.then(|| {
        GraphCursor {
            center_address: request.center.clone(),
            current_depth: request.depth,
            last_nodes: frontier_cut.iter().take(5).cloned().collect(),
            exclude_nodes: nodes.iter().map(|n| n.address.clone()).collect(),
        }
        .encode()
    });

    GraphMetadata {
        total_nodes: n,
        total_edges: e,
        network_density,
        average_clustering_coefficient,
        center_node: request.center.clone(),
        requested_depth: request.depth,
        actual_depth: nodes.iter().map(|n| n.hop_level).max().unwrap_or(0),
        has_more,
        next_cursor,
        nodes_omitted: frontier_cut.len(),
        edges_omitted: 0,
        rendering_complexity,
        suggested_layout,
        high_risk_node_count: nodes
            .iter()
            .filter(|n| matches!(n.risk_level(), Some(RiskLevel::High | RiskLevel::Critical)))
            .count(),
        suspicious_edge_count: edges.iter().filter(|e| e.suspicious_pattern).count(),
        earliest_transfer: edges.iter().map(|e| e.first_transfer).min(),
        latest_transfer: edges.iter().map(|e| e.last_transfer).max(),
    }
}

fn build_adjacency(nodes: &[GraphNode], edges: &[GraphEdge]) -> HashMap<Address, HashSet<Address>> {
    let mut adjacency: HashMap<Address, HashSet<Address>> =
        nodes.iter().map(|n| (n.address.clone(), HashSet::new())).collect();
    for edge in edges {
        adjacency.entry(edge.source.clone()).or_default().insert(edge.target.clone());
        adjacency.entry(edge.target.clone()).or_default().insert(edge.source.clone());
    }
    adjacency
}

fn local_clustering_coefficient(node: &Address, adjacency: &HashMap<Address, HashSet<Address>>) -> f64 {
    let Some(neighbors) = adjacency.get(node) else { return 0.0 };
    let k = neighbors.len();
    if k < 2 {
        return 0.0;
    }
    let mut links = 0;
    let neighbor_list: Vec<&Address> = neighbors.iter().collect();
    for i in 0..neighbor_list.len() {
        for j in (i + 1)..neighbor_list.len() {
            if adjacency
                .get(neighbor_list[i])
                .map(|n| n.contains(neighbor_list[j]))
                .unwrap_or(false)
            {
                links += 1;
            }
        }
    }
    let possible = k * (k - 1) / 2;
    links as f64 / possible as f64
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
    async fn empty_graph_returns_center_node_alone() {
        let (store, _dir) = open_temp().await;
        store.upsert_account_observed(&addr('A'), 1).await.unwrap();
        let assembler = GraphAssembler::new(store, None, std::time::Duration::from_secs(86400));
        let payload = assembler
            .assemble(&GraphRequest {
                center: addr('A'),
                depth: 2,
                max_nodes: 50,
                min_volume: U256::ZERO,
                include_risk: false,
                enable_clustering: false,
            })
            .await
            .unwrap();
        assert_eq!(payload.nodes.len(), 1);
        assert!(!payload.metadata.has_more);
        assert!(payload.edges_reference_known_nodes());
    }

    #[tokio::test]
    async fn depth_one_with_small_max_nodes_returns_exactly_max_nodes_plus_cursor() {
        let (store, _dir) = open_temp().await;
        let center = addr('A');
        for i in 0..5u8 {
            let counterparty = Address::parse(&((b'B' + i) as char).to_string().repeat(48)).unwrap();
            store
                .ingest_transfer(
                    &Transfer::new(0, 100 + i as u64, Utc::now(), center.clone(), counterparty, U256::from(100u64 - i as u64), None, i as i64)
                        .unwrap(),
                )
                .await
                .unwrap();
        }

        let assembler = GraphAssembler::new(store, None, std::time::Duration::from_secs(86400));
        let payload = assembler
            .assemble(&GraphRequest {
                center: center.clone(),
                depth: 1,
                max_nodes: 3,
                min_volume: U256::ZERO,
                include_risk: false,
                enable_clustering: false,
            })
            .await
            .unwrap();

        assert_eq!(payload.nodes.len(), 3);
        assert!(payload.metadata.has_more);
        assert!(payload.metadata.next_cursor.is_some());
    }
}

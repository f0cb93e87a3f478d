//! Transient graph entities assembled per-request; never persisted as such.

use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{account::RiskLevel, address::Address};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeType {
    Transfer,
    Inferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Outbound,
    Inbound,
    Both,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySummary {
    pub display: Option<String>,
    pub is_confirmed: bool,
    pub is_invalid: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub free: String,
    pub reserved: String,
    pub frozen: String,
}

/// A view over an [`Account`](super::account::Account) as it appears inside one
/// assembled graph response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub address: Address,
    pub identity: IdentitySummary,
    pub balance: BalanceSummary,
    pub node_type: String,
    pub hop_level: u32,
    pub degree: u32,
    pub in_degree: u32,
    pub out_degree: u32,
    pub total_volume: String,
    pub suggested_size: f64,
    pub suggested_color: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub risk_score: Option<u8>,
    pub risk_factors: Vec<String>,
    pub importance_score: Option<f64>,
}

impl GraphNode {
    pub fn risk_level(&self) -> Option<RiskLevel> {
        self.risk_score.map(RiskLevel::from_score)
    }
}

/// An aggregated edge. `source`/`target` must both be present among the emitted
/// nodes in the same response; `volume > 0` and `count >= 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub source: Address,
    pub target: Address,
    pub count: u64,
    pub volume: String,
    pub edge_type: EdgeType,
    pub first_transfer: DateTime<Utc>,
    pub last_transfer: DateTime<Utc>,
    pub suspicious_pattern: bool,
    pub pattern_type: Option<String>,
    pub suggested_width: f64,
    pub suggested_color: String,
    pub suggested_opacity: f64,
    pub animated: bool,
    pub bidirectional: bool,
    pub dominant_direction: Direction,
}

impl GraphEdge {
    pub fn volume_u256(&self) -> U256 {
        // Constructed internally from a U256; this conversion cannot fail in practice,
        // but callers at the boundary should treat it as fallible data.
        U256::from_str_radix(&self.volume, 10).unwrap_or(U256::ZERO)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceParameters {
    pub charge_strength: f64,
    pub link_distance: f64,
    pub link_strength: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl Default for ForceParameters {
    fn default() -> Self {
        Self {
            charge_strength: -300.0,
            link_distance: 80.0,
            link_strength: 1.0,
            center_x: 0.0,
            center_y: 0.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    pub force_parameters: ForceParameters,
    pub fixed_positions: Vec<(Address, f64, f64)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedLayout {
    Circular,
    Hierarchical,
    Force,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderingComplexity {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub network_density: f64,
    pub average_clustering_coefficient: f64,
    pub center_node: Address,
    pub requested_depth: u32,
    pub actual_depth: u32,
    pub has_more: bool,
    pub next_cursor: Option<String>,
    pub nodes_omitted: usize,
    pub edges_omitted: usize,
    pub rendering_complexity: RenderingComplexity,
    pub suggested_layout: SuggestedLayout,
    pub high_risk_node_count: usize,
    pub suspicious_edge_count: usize,
    pub earliest_transfer: Option<DateTime<Utc>>,
    pub latest_transfer: Option<DateTime<Utc>>,
}

/// The full response payload for `GET /api/graph/:address` and the seed of every
/// streamed `stream:data` batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub layout: Layout,
    pub clusters: Option<Vec<Vec<Address>>>,
    pub metadata: GraphMetadata,
}

impl GraphPayload {
    /// §8 invariant: every edge's endpoints are present among the emitted nodes.
    pub fn edges_reference_known_nodes(&self) -> bool {
        let known: std::collections::HashSet<&Address> =
            self.nodes.iter().map(|n| &n.address).collect();
        self.edges
            .iter()
            .all(|e| known.contains(&e.source) && known.contains(&e.target))
    }
}

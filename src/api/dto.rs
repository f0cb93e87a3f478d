//! Response/request shapes for routes whose payloads aren't already one of
//! the transient `model::graph` types. Kept `camelCase` throughout, matching
//! the convention `model::graph` already uses for everything wire-facing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::centrality::DegreeCentrality;
use crate::analysis::paths::{Path, PathHop};
use crate::analysis::patterns::{Pattern, PatternKind};
use crate::analysis::risk::{Recommendation, RiskAssessment};
use crate::model::{Account, Identity};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityView {
    pub display: Option<String>,
    pub legal: Option<String>,
    pub web: Option<String>,
    pub email: Option<String>,
    pub twitter: Option<String>,
    pub is_verified: bool,
}

impl From<&Identity> for IdentityView {
    fn from(identity: &Identity) -> Self {
        Self {
            display: identity.display.clone(),
            legal: identity.legal.clone(),
            web: identity.web.clone(),
            email: identity.email.clone(),
            twitter: identity.twitter.clone(),
            is_verified: identity.is_verified,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub address: String,
    pub balance: String,
    pub identity: Option<IdentityView>,
    pub risk_score: Option<u8>,
    pub risk_level: Option<&'static str>,
    pub tags: Vec<String>,
    pub first_seen_block: u64,
    pub last_seen_block: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            address: account.address.to_string(),
            balance: account.balance.to_string(),
            identity: account.identity.as_ref().map(IdentityView::from),
            risk_score: account.risk_score,
            risk_level: account.risk_level().map(risk_level_name),
            tags: account.tags.clone(),
            first_seen_block: account.first_seen_block,
            last_seen_block: account.last_seen_block,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

fn risk_level_name(level: crate::model::RiskLevel) -> &'static str {
    use crate::model::RiskLevel::*;
    match level {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferView {
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub transaction_hash: Option<String>,
    pub direction: &'static str,
    pub counterparty: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipView {
    pub counterparty: String,
    pub direction: &'static str,
    pub total_amount: String,
    pub transfer_count: u64,
    pub first_transfer_block: u64,
    pub last_transfer_block: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathHopView {
    pub from: String,
    pub to: String,
    pub amount: String,
}

impl From<&PathHop> for PathHopView {
    fn from(hop: &PathHop) -> Self {
        Self { from: hop.from.to_string(), to: hop.to.to_string(), amount: hop.amount.to_string() }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathView {
    pub hops: Vec<PathHopView>,
    pub length: usize,
    pub total_volume: String,
    pub score: f64,
}

impl From<&Path> for PathView {
    fn from(path: &Path) -> Self {
        Self {
            hops: path.hops.iter().map(PathHopView::from).collect(),
            length: path.hop_count(),
            total_volume: path.total_volume.to_string(),
            score: path.score(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResponse {
    pub path: Option<PathView>,
    pub alternatives: Vec<PathView>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegreeCentralityView {
    pub in_degree: u32,
    pub out_degree: u32,
    pub total_degree: u32,
    pub weighted_degree: String,
}

impl From<&DegreeCentrality> for DegreeCentralityView {
    fn from(d: &DegreeCentrality) -> Self {
        Self {
            in_degree: d.in_degree,
            out_degree: d.out_degree,
            total_degree: d.total_degree,
            weighted_degree: d.weighted_degree.to_string(),
        }
    }
}

/// Local-graph-only classification, never an inference about the node's
/// standing across the full chain (§9 open question: document, don't infer).
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InfluenceClass {
    Low,
    Medium,
    High,
}

impl InfluenceClass {
    pub fn from_pagerank(score: f64, max_in_graph: f64) -> Self {
        if max_in_graph <= 0.0 {
            return InfluenceClass::Low;
        }
        let relative = score / max_in_graph;
        if relative >= 0.66 {
            InfluenceClass::High
        } else if relative >= 0.33 {
            InfluenceClass::Medium
        } else {
            InfluenceClass::Low
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub address: String,
    pub pagerank: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub address: String,
    pub degree: DegreeCentralityView,
    pub clustering_coefficient: f64,
    pub betweenness: f64,
    pub pagerank: f64,
    pub closeness: f64,
    pub rankings: Vec<RankingEntry>,
    pub influence: InfluenceClass,
}

fn pattern_kind_name(kind: PatternKind) -> &'static str {
    match kind {
        PatternKind::CircularFlow => "circular_flow",
        PatternKind::RapidSequential => "rapid_sequential",
        PatternKind::RoundNumber => "round_number",
        PatternKind::MixingService => "mixing_service",
        PatternKind::ExchangeConsolidation => "exchange_consolidation",
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternView {
    pub kind: &'static str,
    pub confidence: f64,
    pub description: String,
    pub evidence: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&Pattern> for PatternView {
    fn from(pattern: &Pattern) -> Self {
        Self {
            kind: pattern_kind_name(pattern.kind),
            confidence: pattern.confidence,
            description: pattern.description.clone(),
            evidence: pattern.evidence.iter().map(|a| a.to_string()).collect(),
            timestamp: pattern.timestamp,
        }
    }
}

fn recommendation_name(recommendation: Recommendation) -> &'static str {
    match recommendation {
        Recommendation::Monitor => "monitor",
        Recommendation::Investigate => "investigate",
        Recommendation::FlagForReview => "flag_for_review",
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskView {
    pub score: u8,
    pub recommendation: &'static str,
    pub contributing_pattern_count: usize,
}

impl From<&RiskAssessment> for RiskView {
    fn from(assessment: &RiskAssessment) -> Self {
        Self {
            score: assessment.score,
            recommendation: recommendation_name(assessment.recommendation),
            contributing_pattern_count: assessment.contributing_pattern_count,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternsResponse {
    pub patterns: Vec<PatternView>,
    pub risk: RiskView,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationRequest {
    pub title: String,
    pub addresses: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationRecordView {
    pub id: String,
    pub title: String,
    pub addresses: Vec<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&crate::store::investigations::InvestigationRecord> for InvestigationRecordView {
    fn from(record: &crate::store::investigations::InvestigationRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            addresses: record.addresses.iter().map(|a| a.to_string()).collect(),
            notes: record.notes.clone(),
            created_at: record.created_at,
        }
    }
}

//! `AppState`: the data the HTTP/stream layer is built over, plus a
//! [`GraphExplorerDataSource`] trait that keeps route handlers in `api::mod`
//! thin wrappers around business logic, the same split `relay_server.rs`
//! draws between its handler closures and `StateRelayServerDataSource`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy_primitives::U256;
use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

use crate::analysis::risk::RiskAssessment;
use crate::analysis::{centrality, paths, patterns, risk};
use crate::config::Config;
use crate::cursor::GraphCursor;
use crate::error::AppError;
use crate::graph::{GraphAssembler, GraphRequest};
use crate::guard::{self, InFlightQueries};
use crate::model::{Address, GraphPayload};
use crate::quota::{CostRateLimiter, Operation};
use crate::security::{Anonymizer, CorsPolicy};
use crate::store::investigations::InvestigationRecord;
use crate::store::transfers::TransferDirection;
use crate::store::Store;
use crate::streaming::{Session, SessionIdFactory, StreamEvent, SubscribeGraph};
use crate::upstream::client::UpstreamClient;
use crate::upstream::UpstreamService;

use super::dto::{
    AccountView, DegreeCentralityView, InfluenceClass, InvestigationRecordView,
    InvestigationRequest, MetricsResponse, PathResponse, PathView, PatternView, PatternsResponse,
    RankingEntry, RelationshipView, RiskView, TransferView,
};

/// Which metric `GET /api/graph/path` should optimize for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathAlgorithm {
    Hops,
    Volume,
}

impl PathAlgorithm {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("volume") => PathAlgorithm::Volume,
            _ => PathAlgorithm::Hops,
        }
    }
}

pub struct AppState {
    store: Store,
    assembler: GraphAssembler,
    #[allow(dead_code)]
    upstream: Option<Arc<UpstreamService>>,
    limiter: CostRateLimiter,
    in_flight: Arc<InFlightQueries>,
    anonymizer: Anonymizer,
    cors: CorsPolicy,
    sessions: AsyncMutex<HashMap<String, Session>>,
    session_ids: SessionIdFactory,
    investigation_ids: AtomicU64,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, AppError> {
        let store = Store::open(&config.db_path).await?;

        let upstream = if config.skip_upstream {
            None
        } else {
            config.upstream_endpoint.clone().map(|endpoint| {
                let client = UpstreamClient::new(endpoint, config.upstream_api_key.clone());
                UpstreamService::new(client)
            })
        };

        let assembler =
            GraphAssembler::new(store.clone(), upstream.clone(), config.account_staleness());

        Ok(Self {
            store,
            assembler,
            upstream,
            limiter: CostRateLimiter::default_limiter(),
            in_flight: Arc::new(InFlightQueries::new()),
            anonymizer: Anonymizer::new(config.anonymization_salt.clone()),
            cors: CorsPolicy::new(config.allowed_origins.clone()),
            sessions: AsyncMutex::new(HashMap::new()),
            session_ids: SessionIdFactory::default(),
            investigation_ids: AtomicU64::new(0),
        })
    }

    /// Runs `producer` through the recursive-query guard (§4.6), adapting its
    /// single-value result into the one-row `Vec` the guard's timeout/in-flight
    /// machinery expects.
    async fn guarded<T, Fut>(
        &self,
        query_id: String,
        producer: impl FnOnce() -> Fut,
    ) -> Result<T, AppError>
    where
        T: Send + 'static,
        Fut: std::future::Future<Output = Result<T, AppError>>,
    {
        let mut rows = guard::guarded_query(
            self.in_flight.clone(),
            query_id,
            guard::DEFAULT_TIMEOUT,
            1,
            || async move { Ok(vec![producer().await?]) },
        )
        .await
        .map_err(AppError::into_public)?;
        rows.pop().ok_or(AppError::Internal)
    }
}

#[async_trait]
pub trait GraphExplorerDataSource {
    /// The address anonymizer the HTTP boundary applies to response bodies
    /// for callers that didn't authenticate with an API key (§6).
    fn anonymizer(&self) -> &Anonymizer;
    /// The CORS allowlist the HTTP boundary checks incoming `Origin` headers
    /// against before echoing one back (§6).
    fn cors(&self) -> &CorsPolicy;

    async fn get_graph(&self, caller: &str, request: GraphRequest) -> Result<GraphPayload, AppError>;
    async fn expand_graph(
        &self,
        caller: &str,
        cursor: &str,
        limit: usize,
        min_volume: U256,
    ) -> Result<GraphPayload, AppError>;
    async fn get_path(
        &self,
        caller: &str,
        from: Address,
        to: Address,
        max_depth: u32,
        algorithm: PathAlgorithm,
        include_alternatives: bool,
    ) -> Result<PathResponse, AppError>;
    async fn get_metrics(&self, caller: &str, address: Address) -> Result<MetricsResponse, AppError>;
    async fn get_patterns(
        &self,
        caller: &str,
        address: Address,
        depth: u32,
        time_window_secs: u64,
        sensitivity: u64,
    ) -> Result<PatternsResponse, AppError>;
    async fn search_addresses(
        &self,
        caller: &str,
        query: String,
        limit: i64,
    ) -> Result<Vec<AccountView>, AppError>;
    async fn get_account(&self, caller: &str, address: Address) -> Result<AccountView, AppError>;
    async fn get_transfers(
        &self,
        caller: &str,
        address: Address,
        direction: Option<TransferDirection>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransferView>, AppError>;
    async fn get_relationships(
        &self,
        caller: &str,
        address: Address,
        limit: i64,
        min_volume: U256,
    ) -> Result<Vec<RelationshipView>, AppError>;
    async fn save_investigation(
        &mut self,
        caller: &str,
        request: InvestigationRequest,
    ) -> Result<InvestigationRecordView, AppError>;
    async fn open_stream_session(&self, request: SubscribeGraph) -> Result<Session, AppError>;
    async fn run_stream_session(
        &self,
        session: &Session,
        emit: impl FnMut(StreamEvent) -> Result<(), AppError> + Send,
    ) -> Result<(), AppError>;
    async fn cancel_stream_session(&self, session_id: &str) -> Result<(), AppError>;
}

#[async_trait]
impl GraphExplorerDataSource for AppState {
    fn anonymizer(&self) -> &Anonymizer {
        &self.anonymizer
    }

    fn cors(&self) -> &CorsPolicy {
        &self.cors
    }

    async fn get_graph(&self, caller: &str, request: GraphRequest) -> Result<GraphPayload, AppError> {
        self.limiter.admit(caller, Operation::GraphQuery)?;
        let query_id = format!("graph:{caller}:{}:{}", request.center, request.depth);
        let assembler = &self.assembler;
        self.guarded(query_id, || async move { assembler.assemble(&request).await }).await
    }

    async fn expand_graph(
        &self,
        caller: &str,
        cursor: &str,
        limit: usize,
        min_volume: U256,
    ) -> Result<GraphPayload, AppError> {
        self.limiter.admit(caller, Operation::GraphQuery)?;
        let cursor = GraphCursor::decode(cursor)?;
        let query_id = format!("expand:{caller}:{}:{}", cursor.center_address, cursor.current_depth);
        let assembler = &self.assembler;
        self.guarded(query_id, || async move { assembler.expand(&cursor, limit, min_volume).await })
            .await
    }

    async fn get_path(
        &self,
        caller: &str,
        from: Address,
        to: Address,
        max_depth: u32,
        algorithm: PathAlgorithm,
        include_alternatives: bool,
    ) -> Result<PathResponse, AppError> {
        self.limiter.admit(caller, Operation::GraphQuery)?;

        let path = match algorithm {
            PathAlgorithm::Hops => paths::shortest_path_by_hops(&self.store, &from, &to, max_depth).await?,
            PathAlgorithm::Volume => paths::widest_path(&self.store, &from, &to, max_depth).await?,
        };

        let alternatives = if include_alternatives {
            paths::find_all_paths(&self.store, &from, &to, max_depth, paths::DEFAULT_MAX_PATHS)
                .await?
                .iter()
                .map(PathView::from)
                .collect()
        } else {
            Vec::new()
        };

        Ok(PathResponse { path: path.as_ref().map(PathView::from), alternatives })
    }

    async fn get_metrics(&self, caller: &str, address: Address) -> Result<MetricsResponse, AppError> {
        self.limiter.admit(caller, Operation::GraphQuery)?;

        let request = GraphRequest {
            center: address.clone(),
            depth: crate::validation::DEFAULT_DEPTH,
            max_nodes: crate::validation::DEFAULT_MAX_NODES,
            min_volume: U256::ZERO,
            include_risk: false,
            enable_clustering: false,
        };
        let payload = self.assembler.assemble(&request).await?;

        let degree = centrality::degree_centrality(&payload.nodes, &payload.edges);
        let clustering = centrality::clustering_coefficients(&payload.nodes, &payload.edges);
        let betweenness = centrality::betweenness_approx(&payload.nodes, &payload.edges);
        let pagerank = centrality::pagerank_approx(&payload.nodes, &payload.edges);
        let closeness = centrality::closeness_approx(&payload.nodes, &payload.edges);

        let max_pagerank = pagerank.values().cloned().fold(0.0_f64, f64::max);
        let own_pagerank = pagerank.get(&address).copied().unwrap_or(0.0);

        let mut rankings: Vec<RankingEntry> = pagerank
            .iter()
            .map(|(addr, score)| RankingEntry { address: addr.to_string(), pagerank: *score })
            .collect();
        rankings.sort_by(|a, b| b.pagerank.partial_cmp(&a.pagerank).unwrap_or(std::cmp::Ordering::Equal));
        rankings.truncate(10);

        Ok(MetricsResponse {
            address: address.to_string(),
            degree: degree.get(&address).map(DegreeCentralityView::from).unwrap_or(DegreeCentralityView {
                in_degree: 0,
                out_degree: 0,
                total_degree: 0,
                weighted_degree: "0".to_owned(),
            }),
            clustering_coefficient: clustering.get(&address).copied().unwrap_or(0.0),
            betweenness: betweenness.get(&address).copied().unwrap_or(0.0),
            pagerank: own_pagerank,
            closeness: closeness.get(&address).copied().unwrap_or(0.0),
            rankings,
            influence: InfluenceClass::from_pagerank(own_pagerank, max_pagerank),
        })
    }

    async fn get_patterns(
        &self,
        caller: &str,
        address: Address,
        depth: u32,
        time_window_secs: u64,
        sensitivity: u64,
    ) -> Result<PatternsResponse, AppError> {
        self.limiter.admit(caller, Operation::GraphQuery)?;

        let mut found = patterns::detect_circular_flows(&self.store, &address, depth, U256::ZERO).await?;

        let recent = self.store.list_transfers(&address, None, 500, 0).await?;
        found.extend(patterns::detect_rapid_sequential(
            &recent,
            std::time::Duration::from_secs(time_window_secs),
        ));
        found.extend(patterns::detect_round_numbers(&recent));

        let stats = self.store.account_stats(&address).await?;
        if let Some(p) = patterns::detect_mixing_service(
            &address,
            stats.unique_senders,
            stats.unique_receivers,
            stats.total_received,
            stats.total_sent,
            sensitivity,
        ) {
            found.push(p);
        }
        if let Some(p) =
            patterns::detect_exchange_consolidation(&address, stats.unique_senders, stats.unique_receivers, sensitivity)
        {
            found.push(p);
        }

        let assessment: RiskAssessment = risk::assess(&found);

        Ok(PatternsResponse {
            patterns: found.iter().map(PatternView::from).collect(),
            risk: RiskView::from(&assessment),
        })
    }

    async fn search_addresses(
        &self,
        caller: &str,
        query: String,
        limit: i64,
    ) -> Result<Vec<AccountView>, AppError> {
        self.limiter.admit(caller, Operation::Search)?;
        let accounts = self.store.search_accounts(&query, limit).await?;
        Ok(accounts.iter().map(AccountView::from).collect())
    }

    async fn get_account(&self, caller: &str, address: Address) -> Result<AccountView, AppError> {
        self.limiter.admit(caller, Operation::AccountFetch)?;
        let account = self.store.get_account(&address).await?.ok_or(AppError::AddressNotFound)?;
        Ok(AccountView::from(&account))
    }

    async fn get_transfers(
        &self,
        caller: &str,
        address: Address,
        direction: Option<TransferDirection>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransferView>, AppError> {
        self.limiter.admit(caller, Operation::AccountFetch)?;
        let transfers = self.store.list_transfers(&address, direction, limit, offset).await?;
        Ok(transfers
            .iter()
            .map(|t| {
                let (direction, counterparty) = if t.from == address {
                    ("sent", t.to.to_string())
                } else {
                    ("received", t.from.to_string())
                };
                TransferView {
                    block_number: t.block_number,
                    block_timestamp: t.block_timestamp,
                    from: t.from.to_string(),
                    to: t.to.to_string(),
                    amount: t.amount.to_string(),
                    transaction_hash: t.transaction_hash.clone(),
                    direction,
                    counterparty,
                }
            })
            .collect())
    }

    async fn get_relationships(
        &self,
        caller: &str,
        address: Address,
        limit: i64,
        min_volume: U256,
    ) -> Result<Vec<RelationshipView>, AppError> {
        self.limiter.admit(caller, Operation::AccountFetch)?;
        let stats = self.store.counterparty_stats(&address, min_volume, limit).await?;
        Ok(stats
            .iter()
            .map(|s| {
                let (direction, counterparty) = if s.from == address {
                    ("sent", s.to.to_string())
                } else {
                    ("received", s.from.to_string())
                };
                RelationshipView {
                    counterparty,
                    direction,
                    total_amount: s.total_amount.to_string(),
                    transfer_count: s.transfer_count,
                    first_transfer_block: s.first_transfer_block,
                    last_transfer_block: s.last_transfer_block,
                }
            })
            .collect())
    }

    async fn save_investigation(
        &mut self,
        caller: &str,
        request: InvestigationRequest,
    ) -> Result<InvestigationRecordView, AppError> {
        self.limiter.admit(caller, Operation::Save)?;

        let addresses = request
            .addresses
            .iter()
            .map(|raw| Address::parse(raw))
            .collect::<Result<Vec<Address>, AppError>>()?;

        let n = self.investigation_ids.fetch_add(1, Ordering::Relaxed);
        let id = format!("inv_{n:016x}");

        let record: InvestigationRecord =
            self.store.save_investigation(id, request.title, addresses, request.notes).await?;
        Ok(InvestigationRecordView::from(&record))
    }

    async fn open_stream_session(&self, request: SubscribeGraph) -> Result<Session, AppError> {
        if self.store.get_account(&request.address).await?.is_none() {
            return Err(AppError::AddressNotFound);
        }
        let min_volume = match &request.min_volume {
            Some(raw) => crate::validation::parse_volume_filter(raw)?,
            None => U256::ZERO,
        };
        let session = Session::new(self.session_ids.next(), &request, min_volume);
        self.sessions.lock().await.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn run_stream_session(
        &self,
        session: &Session,
        emit: impl FnMut(StreamEvent) -> Result<(), AppError> + Send,
    ) -> Result<(), AppError> {
        let result = session.run(&self.assembler, emit).await;
        self.sessions.lock().await.remove(&session.id);
        result
    }

    async fn cancel_stream_session(&self, session_id: &str) -> Result<(), AppError> {
        let sessions = self.sessions.lock().await;
        match sessions.get(session_id) {
            Some(session) => {
                session.cancel().await;
                Ok(())
            },
            None => Err(AppError::InvalidParameters {
                reason: format!("no active stream session {session_id:?}"),
            }),
        }
    }
}

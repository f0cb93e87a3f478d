//! HTTP/stream boundary (§6): route definitions wiring [`state::AppState`]'s
//! [`state::GraphExplorerDataSource`] to `tide_disco`, mirroring the shape of
//! `state_signature::relay_server`'s `define_api`/`run_relay_server` pair with
//! [`AppError`] standing in for `ServerError`.

pub mod dto;
pub mod state;

use std::path::PathBuf;

use alloy_primitives::U256;
use async_lock::RwLock;
use clap::Args;
use futures::FutureExt;
use tide_disco::{
    api::ApiError,
    method::{ReadState, WriteState},
    Api, App,
};
use url::Url;
use vbs::version::StaticVersionType;

use crate::config::Config;
use crate::cursor::GraphCursor;
use crate::error::AppError;
use crate::model::Address;
use crate::security::{anonymize_json, CorsPolicy, BASE_HEADERS, CACHE_CONTROL_NO_STORE};
use crate::store::transfers::TransferDirection;
use crate::validation;

use self::dto::InvestigationRequest;
use self::state::{AppState, GraphExplorerDataSource, PathAlgorithm};

/// The service speaks a single, frozen API version, the same convention the
/// upstream indexer's own client binds to in `upstream::client`.
pub type ApiVer = vbs::version::StaticVersion<0, 1>;

/// Configurability options for the web server, mirroring the teacher's
/// `state_signature::relay_server::Options`.
#[derive(Args, Default)]
pub struct Options {
    #[arg(long = "graph-explorer-api-path", env = "GRAPH_EXPLORER_API_PATH")]
    pub api_path: Option<PathBuf>,
}

/// Pulls the caller identity the cost limiter bills against and the
/// anonymizer gates on: an `apiKey` query parameter if the client sent one,
/// else the shared anonymous bucket. `tide_disco::RequestParams` exposes only
/// route-param/body accessors, not the raw request (no header or peer-address
/// lookup), so an API key is the only identity a caller can actually present.
fn caller_id(req: &tide_disco::RequestParams) -> String {
    match opt_str(req, "apiKey") {
        Some(key) => format!("key:{key}"),
        None => "anonymous".to_owned(),
    }
}

/// Callers that authenticated with an API key see response bodies as-is;
/// everyone else gets them anonymized (§6).
fn is_authorized(caller: &str) -> bool {
    caller.starts_with("key:")
}

fn require_address(req: &tide_disco::RequestParams, name: &str) -> Result<Address, AppError> {
    let raw = req.string_param(name).map_err(|e| AppError::InvalidAddress { reason: e.to_string() })?;
    validation::validate_address(raw)
}

fn opt_str<'a>(req: &'a tide_disco::RequestParams, name: &str) -> Option<&'a str> {
    req.opt_string_param(name).ok().flatten()
}

fn min_volume_param(req: &tide_disco::RequestParams, name: &str) -> Result<U256, AppError> {
    match opt_str(req, name) {
        Some(raw) => validation::parse_volume_filter(raw),
        None => Ok(U256::ZERO),
    }
}

fn direction_param(req: &tide_disco::RequestParams) -> Option<TransferDirection> {
    match opt_str(req, "direction") {
        Some("sent") => Some(TransferDirection::Sent),
        Some("received") => Some(TransferDirection::Received),
        _ => None,
    }
}

/// Serializes a handler's result and, for callers that didn't present an API
/// key, walks it through [`anonymize_json`] before it leaves the process --
/// the actual privacy-anonymization step §4/§6 require, as opposed to merely
/// having an `Anonymizer` sitting unused on `AppState`. `exempt` carries the
/// addresses the caller already supplied in the request itself, which stay
/// unmasked since the caller isn't learning anything new about them.
fn respond<T: serde::Serialize>(
    state: &(impl GraphExplorerDataSource + ?Sized),
    caller: &str,
    exempt: &[&str],
    value: T,
) -> Result<serde_json::Value, AppError> {
    let mut body = serde_json::to_value(value).map_err(|err| {
        tracing::error!(cause = %err, "failed to serialize response body");
        AppError::Internal
    })?;
    if !is_authorized(caller) {
        anonymize_json(&mut body, state.anonymizer(), exempt);
    }
    Ok(body)
}

fn define_api<State, ApiVer: StaticVersionType + 'static>(
    options: &Options,
    _: ApiVer,
) -> Result<Api<State, AppError, ApiVer>, ApiError>
where
    State: 'static + Send + Sync + ReadState + WriteState,
    <State as ReadState>::State: Send + Sync + GraphExplorerDataSource,
{
    let mut api = match &options.api_path {
        Some(path) => Api::<State, AppError, ApiVer>::from_file(path)?,
        None => {
            let toml: toml::Value = toml::from_str(include_str!("../../api/graph_explorer.toml"))
                .map_err(|err| ApiError::CannotReadToml { reason: err.to_string() })?;
            Api::<State, AppError, ApiVer>::new(toml)?
        },
    };

    api.get("getgraph", |req, state| {
        async move {
            let center = require_address(&req, "address")?;
            let caller = caller_id(&req);
            let request = crate::graph::GraphRequest {
                center: center.clone(),
                depth: validation::clamp_depth(opt_str(&req, "depth")),
                max_nodes: validation::clamp_max_nodes(opt_str(&req, "maxNodes")),
                min_volume: min_volume_param(&req, "minVolume")?,
                include_risk: opt_str(&req, "includeRisk") == Some("true"),
                enable_clustering: opt_str(&req, "enableClustering") != Some("false"),
            };
            let payload = state.get_graph(&caller, request).await?;
            respond(state, &caller, &[center.as_str()], payload)
        }
        .boxed()
    })?
    .get("expandgraph", |req, state| {
        async move {
            let cursor_param = req
                .string_param("cursor")
                .map_err(|e| AppError::InvalidCursorData { reason: e.to_string() })?;
            // Re-decoded only to find the already-known center address to exempt
            // it from anonymization; `state.expand_graph` decodes it again itself.
            let decoded = GraphCursor::decode(cursor_param).ok();
            let caller = caller_id(&req);
            let limit = validation::clamp_max_nodes(opt_str(&req, "limit"));
            let min_volume = min_volume_param(&req, "minVolume")?;
            let payload = state.expand_graph(&caller, cursor_param, limit, min_volume).await?;
            let exempt: Vec<&str> = decoded.iter().map(|c| c.center_address.as_str()).collect();
            respond(state, &caller, &exempt, payload)
        }
        .boxed()
    })?
    .get("getpath", |req, state| {
        async move {
            let from = require_address(&req, "from")?;
            let to = require_address(&req, "to")?;
            let caller = caller_id(&req);
            let max_depth = validation::clamp_depth(opt_str(&req, "maxDepth"));
            let algorithm = PathAlgorithm::parse(opt_str(&req, "algorithm"));
            let include_alternatives = opt_str(&req, "alternatives") == Some("true");
            let response = state
                .get_path(&caller, from.clone(), to.clone(), max_depth, algorithm, include_alternatives)
                .await?;
            respond(state, &caller, &[from.as_str(), to.as_str()], response)
        }
        .boxed()
    })?
    .get("getmetrics", |req, state| {
        async move {
            let address = require_address(&req, "address")?;
            let caller = caller_id(&req);
            let response = state.get_metrics(&caller, address.clone()).await?;
            respond(state, &caller, &[address.as_str()], response)
        }
        .boxed()
    })?
    .get("getpatterns", |req, state| {
        async move {
            let address = require_address(&req, "address")?;
            let caller = caller_id(&req);
            let depth = validation::clamp_depth(opt_str(&req, "depth"));
            let time_window_secs =
                validation::parse_numeric_or_default(opt_str(&req, "timeWindow"), 300).max(0) as u64;
            let sensitivity =
                validation::parse_numeric_or_default(opt_str(&req, "sensitivity"), 3).max(1) as u64;
            let response =
                state.get_patterns(&caller, address.clone(), depth, time_window_secs, sensitivity).await?;
            respond(state, &caller, &[address.as_str()], response)
        }
        .boxed()
    })?
    .get("searchaddresses", |req, state| {
        async move {
            let query = req
                .string_param("q")
                .map_err(|e| AppError::InvalidParameters { reason: e.to_string() })?
                .to_owned();
            let caller = caller_id(&req);
            let limit = validation::parse_numeric_or_default(opt_str(&req, "limit"), 20).clamp(1, 100);
            let accounts = state.search_addresses(&caller, query, limit).await?;
            // A search result is a list of counterparties the caller didn't
            // already name, so nothing here is exempt from anonymization.
            respond(state, &caller, &[], accounts)
        }
        .boxed()
    })?
    .get("getaddress", |req, state| {
        async move {
            let address = require_address(&req, "address")?;
            let caller = caller_id(&req);
            let account = state.get_account(&caller, address.clone()).await?;
            respond(state, &caller, &[address.as_str()], account)
        }
        .boxed()
    })?
    .get("gettransfers", |req, state| {
        async move {
            let address = require_address(&req, "address")?;
            let caller = caller_id(&req);
            let direction = direction_param(&req);
            let limit = validation::parse_numeric_or_default(opt_str(&req, "limit"), 50).clamp(1, 500);
            let offset = validation::parse_numeric_or_default(opt_str(&req, "offset"), 0).max(0);
            let transfers = state.get_transfers(&caller, address.clone(), direction, limit, offset).await?;
            respond(state, &caller, &[address.as_str()], transfers)
        }
        .boxed()
    })?
    .get("getrelationships", |req, state| {
        async move {
            let address = require_address(&req, "address")?;
            let caller = caller_id(&req);
            let limit = validation::parse_numeric_or_default(opt_str(&req, "limit"), 50).clamp(1, 500);
            let min_volume = min_volume_param(&req, "minVolume")?;
            let relationships = state.get_relationships(&caller, address.clone(), limit, min_volume).await?;
            respond(state, &caller, &[address.as_str()], relationships)
        }
        .boxed()
    })?
    .post("postinvestigation", |req, state| {
        async move {
            let caller = caller_id(&req);
            let body = req
                .body_auto::<InvestigationRequest, ApiVer>(ApiVer::instance())
                .map_err(|e| AppError::InvalidParameters { reason: e.to_string() })?;
            state.save_investigation(&caller, body).await
        }
        .boxed()
    })?
    .socket("subscribegraph", |req, conn, state| {
        async move {
            let raw = req
                .body_auto::<crate::streaming::SubscribeGraph, ApiVer>(ApiVer::instance())
                .map_err(|e| AppError::InvalidParameters { reason: e.to_string() })?;
            let session = state.open_stream_session(raw).await?;
            let session_id = session.id.clone();

            // `Session::run`'s emit callback is synchronous so it can be unit-tested
            // without a socket; bridge it to the connection by buffering each event
            // into an ordered queue and draining that queue after the session ends.
            let mut outbox: Vec<crate::streaming::StreamEvent> = Vec::new();
            let result = state
                .run_stream_session(&session, |event| {
                    outbox.push(event);
                    Ok(())
                })
                .await;

            for event in outbox {
                conn.send(&event).await.map_err(|e| {
                    tracing::warn!(session_id, cause = %e, "stream connection closed early");
                    AppError::Internal
                })?;
            }

            if let Err(e) = &result {
                tracing::warn!(session_id, ?e, "stream session ended with error");
            }
            result
        }
        .boxed()
    })?;

    Ok(api)
}

/// Applies the mandatory response security headers and the `Cache-Control`
/// directive (§6) to every response this service sends, and echoes back an
/// allowlisted `Origin` as `Access-Control-Allow-Origin` -- the same
/// wrap-every-response shape as `tide::security::CorsMiddleware`, but driven
/// by this service's own [`CorsPolicy`] so the allowlist and the handler
/// logic that built it stay in one place.
#[derive(Clone, Debug)]
struct SecurityHeaders {
    cors: CorsPolicy,
}

impl SecurityHeaders {
    fn new(cors: CorsPolicy) -> Self {
        Self { cors }
    }
}

#[async_trait::async_trait]
impl<S> tide::Middleware<S> for SecurityHeaders
where
    S: Clone + Send + Sync + 'static,
{
    async fn handle(&self, req: tide::Request<S>, next: tide::Next<'_, S>) -> tide::Result {
        let origin = req.header("Origin").map(|values| values.to_string());

        let mut res = next.run(req).await;

        for (name, value) in BASE_HEADERS {
            res.insert_header(*name, *value);
        }
        res.insert_header(CACHE_CONTROL_NO_STORE.0, CACHE_CONTROL_NO_STORE.1);

        if let Some(allowed) = origin.as_deref().and_then(|origin| self.cors.allow_origin_header(origin)) {
            res.insert_header("Access-Control-Allow-Origin", allowed);
            res.insert_header("Vary", "Origin");
        }

        Ok(res)
    }
}

pub async fn run_server<ApiVer: StaticVersionType + 'static>(
    config: Config,
    url: Url,
    bind_version: ApiVer,
) -> anyhow::Result<()> {
    let options = Options::default();
    let api = define_api(&options, bind_version)?;

    let app_state = AppState::new(&config).await?;
    let security_headers = SecurityHeaders::new(app_state.cors().clone());

    let state = RwLock::new(app_state);
    let mut app = App::<RwLock<AppState>, AppError>::with_state(state);
    app.register_module("api", api)?;
    app.with(security_headers);

    tracing::info!(%url, "graph explorer serving");
    app.serve(url, bind_version).await?;
    Ok(())
}

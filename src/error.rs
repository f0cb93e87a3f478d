//! Error taxonomy shared across every component.
//!
//! Validation errors and guard/limiter aborts surface with field-level detail;
//! anything unexpected is logged in full and flattened to [`AppError::Internal`]
//! before it reaches a client, per the propagation policy in the spec.

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tide_disco::{api::ApiError, StatusCode};

/// The taxonomy exposed to HTTP/stream clients, plus the internal-only variants
/// that get folded into a public one at the API boundary.
///
/// `tide_disco::Error` requires `Serialize + DeserializeOwned` (the error body
/// round-trips through `surf_disco::Client` exactly like the teacher's own
/// `ServerError`), so this derives both alongside `Snafu`.
#[derive(Debug, Snafu, Serialize, Deserialize)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("invalid address: {reason}"))]
    InvalidAddress { reason: String },

    #[snafu(display("invalid parameters: {reason}"))]
    InvalidParameters { reason: String },

    #[snafu(display("invalid cursor"))]
    InvalidCursor,

    #[snafu(display("invalid cursor data: {reason}"))]
    InvalidCursorData { reason: String },

    #[snafu(display("address not found"))]
    AddressNotFound,

    #[snafu(display("requested depth exceeds the configured limit"))]
    DepthLimitExceeded,

    #[snafu(display("query timed out"))]
    QueryTimeout,

    #[snafu(display("rate limited: retry after {retry_after_secs}s"))]
    RateLimited {
        limit: u64,
        remaining: u64,
        reset_at: i64,
        retry_after_secs: u64,
    },

    #[snafu(display("query too complex: score {score} exceeds cap {cap}"))]
    QueryTooComplex { score: f64, cap: f64 },

    #[snafu(display("upstream indexer unavailable: {reason}"))]
    UpstreamUnavailable { reason: String },

    #[snafu(display("circuit breaker is open"))]
    CircuitOpen,

    #[snafu(display("internal error"))]
    Internal,

    // Internal-only taxonomy (never returned verbatim; see `AppError::into_public`).
    #[snafu(display("a query with this id is already in flight"))]
    ConcurrentQuery,

    #[snafu(display("row limit exceeded"))]
    RowLimitExceeded,

    #[snafu(display("memory limit exceeded"))]
    MemoryLimitExceeded,
}

impl AppError {
    /// Collapse the internal-only variants into their public equivalents, logging the
    /// precise internal cause. Field-carrying public variants pass through unchanged.
    pub fn into_public(self) -> Self {
        match self {
            AppError::ConcurrentQuery | AppError::RowLimitExceeded | AppError::MemoryLimitExceeded => {
                tracing::warn!(cause = ?self, "recursive-query guard aborted, surfacing as QUERY_TIMEOUT");
                AppError::QueryTimeout
            },
            other => other,
        }
    }

    /// Stable machine-readable error code, as used in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidAddress { .. } => "INVALID_ADDRESS",
            AppError::InvalidParameters { .. } => "INVALID_PARAMETERS",
            AppError::InvalidCursor => "INVALID_CURSOR",
            AppError::InvalidCursorData { .. } => "INVALID_CURSOR_DATA",
            AppError::AddressNotFound => "ADDRESS_NOT_FOUND",
            AppError::DepthLimitExceeded => "DEPTH_LIMIT_EXCEEDED",
            AppError::QueryTimeout => "QUERY_TIMEOUT",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::QueryTooComplex { .. } => "QUERY_TOO_COMPLEX",
            AppError::UpstreamUnavailable { .. } => "UPSTREAM_UNAVAILABLE",
            AppError::CircuitOpen => "CIRCUIT_OPEN",
            AppError::Internal => "INTERNAL_ERROR",
            AppError::ConcurrentQuery => "CONCURRENT_QUERY",
            AppError::RowLimitExceeded => "ROW_LIMIT_EXCEEDED",
            AppError::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
        }
    }
}

impl tide_disco::Error for AppError {
    fn catch_all(status: StatusCode, msg: String) -> Self {
        tracing::error!(%status, %msg, "unhandled error reaching API boundary");
        match status {
            StatusCode::NOT_FOUND => AppError::AddressNotFound,
            StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited {
                limit: 0,
                remaining: 0,
                reset_at: 0,
                retry_after_secs: 1,
            },
            StatusCode::BAD_REQUEST => AppError::InvalidParameters { reason: msg },
            _ => AppError::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidAddress { .. }
            | AppError::InvalidParameters { .. }
            | AppError::InvalidCursor
            | AppError::InvalidCursorData { .. }
            | AppError::QueryTooComplex { .. } => StatusCode::BAD_REQUEST,
            AppError::AddressNotFound => StatusCode::NOT_FOUND,
            AppError::DepthLimitExceeded => StatusCode::BAD_REQUEST,
            AppError::QueryTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamUnavailable { .. } | AppError::CircuitOpen => {
                StatusCode::SERVICE_UNAVAILABLE
            },
            AppError::Internal
            | AppError::ConcurrentQuery
            | AppError::RowLimitExceeded
            | AppError::MemoryLimitExceeded => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        tracing::error!(%err, "api definition error");
        AppError::Internal
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(%err, "store error");
        AppError::Internal
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(%err, "unexpected internal error");
        AppError::Internal
    }
}

//! Service configuration, read from the environment and CLI flags.
//!
//! Loading arbitrary config *files* is explicitly out of scope; this mirrors how the
//! teacher's binaries (e.g. `state-relay-server`) take a flat `clap::Parser` struct
//! with `env = "..."` fallbacks instead.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use url::Url;

#[derive(Clone, Parser, Debug)]
#[command(name = "graph-explorer")]
pub struct Config {
    /// Address to bind the HTTP/stream API on.
    #[arg(long, env = "GRAPH_EXPLORER_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Path to the embedded SQLite database file.
    #[arg(
        long,
        env = "GRAPH_EXPLORER_DB_PATH",
        default_value = "graph-explorer.sqlite"
    )]
    pub db_path: PathBuf,

    /// Base URL of the upstream chain indexer.
    #[arg(long, env = "UPSTREAM_ENDPOINT")]
    pub upstream_endpoint: Option<Url>,

    /// API key presented to the upstream indexer.
    #[arg(long, env = "UPSTREAM_API_KEY")]
    pub upstream_api_key: Option<String>,

    /// CSV of origins allowed by CORS.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Salt mixed into the anonymization hash (§4.10/security middleware).
    #[arg(long, env = "ANONYMIZATION_SALT")]
    pub anonymization_salt: Option<String>,

    /// Webhook notified of monitoring events (circuit open, rate-limit storms, etc).
    #[arg(long, env = "MONITORING_WEBHOOK")]
    pub monitoring_webhook: Option<Url>,

    /// Skip all calls to the upstream indexer; serve purely from the store.
    #[arg(long, env = "SKIP_UPSTREAM", default_value_t = false)]
    pub skip_upstream: bool,

    /// Max number of distinct addresses visited while backfilling one collection run.
    #[arg(long, env = "MAX_COLLECT_ADDRESSES", default_value_t = 1_000)]
    pub max_collect_addresses: usize,

    /// Max number of indexer pages fetched per address during backfill.
    #[arg(long, env = "MAX_COLLECT_PAGES", default_value_t = 50)]
    pub max_collect_pages: usize,

    /// Max number of transfers retained per address during backfill.
    #[arg(long, env = "MAX_TRANSFERS_PER_ADDRESS", default_value_t = 10_000)]
    pub max_transfers_per_address: usize,

    /// Staleness threshold before an account is considered for upstream refresh.
    #[arg(long, env = "ACCOUNT_STALENESS_SECS", default_value_t = 24 * 60 * 60)]
    pub account_staleness_secs: u64,

    #[command(flatten)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn account_staleness(&self) -> Duration {
        Duration::from_secs(self.account_staleness_secs)
    }
}

#[derive(Clone, Parser, Debug)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. `info`, `graph_explorer=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub rust_log: String,
}

impl LoggingConfig {
    /// Install a global `tracing_subscriber` using this config. Call once, from `main`.
    pub fn init(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(&self.rust_log))
            .init();
    }
}

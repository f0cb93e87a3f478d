//! A single smoke test driving the real HTTP server end to end, the same
//! `portpicker` + `surf_disco::Client` harness `persistence.rs` uses for its
//! own network tests. Everything else in `tests/` exercises `AppState`
//! directly; this is the one place the wire format itself is checked.

use std::time::Duration;

use chrono::Utc;
use portpicker::pick_unused_port;
use vbs::version::StaticVersionType;

use graph_explorer::api::{run_server, ApiVer};
use graph_explorer::config::{Config, LoggingConfig};
use graph_explorer::model::{Address, Transfer};
use graph_explorer::store::Store;

fn addr(c: char) -> Address {
    Address::parse(&c.to_string().repeat(48)).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn server_serves_a_seeded_account_over_http() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("smoke.sqlite");

    let (a, b) = (addr('A'), addr('B'));
    {
        let store = Store::open(&db_path).await.unwrap();
        let transfer =
            Transfer::new(0, 1, Utc::now(), a.clone(), b, alloy_primitives::U256::from(1_000u64), None, 0)
                .unwrap();
        store.ingest_transfer(&transfer).await.unwrap();
    }

    let port = pick_unused_port().expect("a free port for the test server");
    let config = Config {
        bind: format!("127.0.0.1:{port}"),
        db_path,
        upstream_endpoint: None,
        upstream_api_key: None,
        allowed_origins: Vec::new(),
        anonymization_salt: None,
        monitoring_webhook: None,
        skip_upstream: true,
        max_collect_addresses: 1_000,
        max_collect_pages: 50,
        max_transfers_per_address: 10_000,
        account_staleness_secs: 24 * 60 * 60,
        logging: LoggingConfig { rust_log: "error".to_owned() },
    };
    let url: url::Url = format!("http://127.0.0.1:{port}").parse().unwrap();

    tokio::spawn(async move {
        run_server(config, url, ApiVer::instance()).await.ok();
    });

    let client = surf_disco::Client::<graph_explorer::AppError, ApiVer>::new(
        format!("http://127.0.0.1:{port}").parse().unwrap(),
    );
    client.connect(Some(Duration::from_secs(5))).await;

    let body: serde_json::Value = client
        .get(&format!("api/accounts/{a}"))
        .send()
        .await
        .expect("GET /api/accounts/:address succeeds");
    assert_eq!(body["address"], a.to_string());
}

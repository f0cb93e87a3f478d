//! End-to-end scenarios exercising [`AppState`] the way the HTTP layer would:
//! a seeded store, real rate limiting, and the real assembler/analysis stack
//! wired together, rather than any single module in isolation.

use std::path::PathBuf;

use alloy_primitives::U256;
use chrono::Utc;

use graph_explorer::api::state::{AppState, GraphExplorerDataSource, PathAlgorithm};
use graph_explorer::config::{Config, LoggingConfig};
use graph_explorer::graph::GraphRequest;
use graph_explorer::model::{Address, Transfer};
use graph_explorer::store::Store;

fn addr(c: char) -> Address {
    Address::parse(&c.to_string().repeat(48)).unwrap()
}

/// Base58 alphabet the address format accepts (no `0`, `O`, `I`, `l`).
const ADDRESS_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn neighbor_address(i: usize) -> Address {
    let mut suffix = [0u8; 3];
    let mut n = i;
    for slot in suffix.iter_mut().rev() {
        *slot = ADDRESS_ALPHABET[n % ADDRESS_ALPHABET.len()];
        n /= ADDRESS_ALPHABET.len();
    }
    let raw = format!("{}{}", "N".repeat(45), std::str::from_utf8(&suffix).unwrap());
    Address::parse(&raw).unwrap()
}

fn temp_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scenario.sqlite");
    (dir, path)
}

fn config_for(db_path: PathBuf) -> Config {
    Config {
        bind: "127.0.0.1:0".to_owned(),
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
    }
}

async fn ingest(store: &Store, from: Address, to: Address, amount: u64, block: u64, event_index: i64) {
    let transfer =
        Transfer::new(0, block, Utc::now(), from, to, U256::from(amount), None, event_index).unwrap();
    store.ingest_transfer(&transfer).await.unwrap();
}

#[tokio::test]
async fn circular_flow_is_detected_and_drives_risk_up() {
    let (_dir, path) = temp_db();
    let (a, b, c) = (addr('A'), addr('B'), addr('C'));

    {
        let store = Store::open(&path).await.unwrap();
        ingest(&store, a.clone(), b.clone(), 1_000, 1, 0).await;
        ingest(&store, b.clone(), c.clone(), 1_000, 2, 0).await;
        ingest(&store, c.clone(), a.clone(), 1_000, 3, 0).await;
    }

    let state = AppState::new(&config_for(path)).await.unwrap();
    let response = state.get_patterns("caller-1", a, 3, 300, 3).await.unwrap();
    assert!(response.patterns.iter().any(|p| p.kind == "circular_flow"));
    assert!(response.risk.score > 0);
}

#[tokio::test]
async fn shortest_path_prefers_fewest_hops_and_handles_equal_endpoints() {
    let (_dir, path) = temp_db();
    let (a, b, c) = (addr('A'), addr('B'), addr('C'));

    {
        let store = Store::open(&path).await.unwrap();
        ingest(&store, a.clone(), b.clone(), 10, 1, 0).await;
        ingest(&store, b.clone(), c.clone(), 10, 2, 0).await;
    }

    let state = AppState::new(&config_for(path)).await.unwrap();

    let same = state
        .get_path("caller-1", a.clone(), a.clone(), 4, PathAlgorithm::Hops, false)
        .await
        .unwrap();
    assert_eq!(same.path.unwrap().hops.len(), 0);

    let response = state.get_path("caller-2", a, c, 4, PathAlgorithm::Hops, false).await.unwrap();
    let path = response.path.expect("a path exists through B");
    assert_eq!(path.hops.len(), 2);
}

#[tokio::test]
async fn progressive_expand_covers_every_neighbor_across_pages() {
    let (_dir, path) = temp_db();
    let center = addr('A');
    let neighbors: Vec<Address> = (0..120usize).map(neighbor_address).collect();

    {
        let store = Store::open(&path).await.unwrap();
        for (i, neighbor) in neighbors.iter().enumerate() {
            ingest(&store, center.clone(), neighbor.clone(), 1_000 + i as u64, i as u64 + 1, 0).await;
        }
    }

    let state = AppState::new(&config_for(path)).await.unwrap();

    let first = state
        .get_graph(
            "caller-1",
            GraphRequest {
                center: center.clone(),
                depth: 1,
                max_nodes: 50,
                min_volume: U256::ZERO,
                include_risk: false,
                enable_clustering: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(first.nodes.len(), 50);
    assert!(first.metadata.has_more);
    let cursor = first.metadata.next_cursor.clone().expect("a cursor for the remaining neighbors");

    let second = state.expand_graph("caller-1", &cursor, 50, U256::ZERO).await.unwrap();
    assert_eq!(second.nodes.len(), 50);

    let first_addresses: std::collections::HashSet<_> = first.nodes.iter().map(|n| n.address.clone()).collect();
    let second_addresses: std::collections::HashSet<_> = second.nodes.iter().map(|n| n.address.clone()).collect();
    assert!(first_addresses.is_disjoint(&second_addresses));
}

#[tokio::test]
async fn rate_limiter_rejects_the_third_graph_query_in_the_window() {
    let (_dir, path) = temp_db();
    let state = AppState::new(&config_for(path)).await.unwrap();
    let address = addr('A');

    let request = || GraphRequest {
        center: address.clone(),
        depth: 1,
        max_nodes: 50,
        min_volume: U256::ZERO,
        include_risk: false,
        enable_clustering: false,
    };

    assert!(state.get_graph("budget-caller", request()).await.is_ok());
    assert!(state.get_graph("budget-caller", request()).await.is_ok());

    match state.get_graph("budget-caller", request()).await {
        Err(graph_explorer::AppError::RateLimited { .. }) => {},
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_address_surfaces_as_address_not_found() {
    let (_dir, path) = temp_db();
    let state = AppState::new(&config_for(path)).await.unwrap();
    let err = state.get_account("caller-1", addr('Z')).await.unwrap_err();
    assert!(matches!(err, graph_explorer::AppError::AddressNotFound));
}

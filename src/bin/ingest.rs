//! Thin offline backfill command: replays transfers for a set of seed
//! addresses (and the counterparties they lead to) from the upstream indexer
//! into the relational store. Exercises only the already-specified
//! store/upstream-client contracts; it isn't the behavioral-baseline
//! data-collection tooling the spec keeps out of scope, just enough of a
//! harness to populate a store in dev/test without a live indexer sitting in
//! front of the server binary.

use std::collections::{HashSet, VecDeque};

use clap::Parser;
use graph_explorer::model::{Address, Transfer};
use graph_explorer::upstream::client::{parse_amount, UpstreamClient};
use graph_explorer::upstream::queue::Priority;
use graph_explorer::Config;

#[derive(Parser)]
#[command(name = "graph-explorer-ingest")]
struct Args {
    #[command(flatten)]
    config: Config,

    /// Address to start the backfill crawl from. Repeatable.
    #[arg(long = "seed", required = true)]
    seeds: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    args.config.logging.init();

    if let Err(e) = run(args).await {
        tracing::error!(cause = %e, "ingest run failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let Args { config, seeds } = args;

    let Some(endpoint) = config.upstream_endpoint.clone() else {
        anyhow::bail!("UPSTREAM_ENDPOINT must be set to run the ingest binary");
    };
    let client = UpstreamClient::new(endpoint, config.upstream_api_key.clone());

    let store = graph_explorer::store::Store::open(&config.db_path).await?;
    store.begin_bulk_import().await?;
    store.begin_syncing().await?;

    let mut queued: HashSet<Address> = HashSet::new();
    let mut pending: VecDeque<Address> = VecDeque::new();
    for raw in &seeds {
        let address = Address::parse(raw)?;
        if queued.insert(address.clone()) {
            pending.push_back(address);
        }
    }

    let mut visited = 0usize;
    let mut highest_block = 0u64;

    while let Some(address) = pending.pop_front() {
        if visited >= config.max_collect_addresses {
            tracing::info!(
                max_collect_addresses = config.max_collect_addresses,
                "backfill stopped: address cap reached"
            );
            break;
        }
        visited += 1;

        if let Some(account) = client.get_account(&address, Priority::Medium).await? {
            store.upsert_account_observed(&address, account.first_seen_block).await?;
        }

        let mut collected = 0usize;
        let mut page_token: Option<String> = None;
        for page in 0..config.max_collect_pages {
            if collected >= config.max_transfers_per_address {
                break;
            }
            let response = client
                .get_transfers(&address, page_token.as_deref(), Priority::Low)
                .await?;

            for raw in &response.transfers {
                if collected >= config.max_transfers_per_address {
                    break;
                }
                let from = Address::parse(&raw.from)?;
                let to = Address::parse(&raw.to)?;
                let amount = parse_amount(&raw.amount)?;
                let transfer = Transfer::new(
                    0,
                    raw.block_number,
                    raw.block_timestamp,
                    from.clone(),
                    to.clone(),
                    amount,
                    raw.transaction_hash.clone(),
                    raw.event_index,
                )?;
                store.ingest_transfer(&transfer).await?;
                highest_block = highest_block.max(raw.block_number);
                collected += 1;

                for counterparty in [from, to] {
                    if counterparty != address && queued.insert(counterparty.clone()) {
                        pending.push_back(counterparty);
                    }
                }
            }

            tracing::debug!(%address, page, collected, "backfilled transfer page");
            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        store.recompute_unique_counterparties(&address).await?;
        store.record_sync_progress(highest_block).await?;
    }

    store.end_syncing().await?;
    store.end_bulk_import().await?;

    tracing::info!(visited, discovered = queued.len(), highest_block, "backfill complete");
    Ok(())
}

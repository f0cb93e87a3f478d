use clap::Parser;
use graph_explorer::api::{run_server, ApiVer};
use graph_explorer::Config;
use vbs::version::StaticVersionType;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    config.logging.init();

    let url = format!("http://{}", config.bind)
        .parse()
        .expect("GRAPH_EXPLORER_BIND must be a valid host:port");

    tracing::info!(bind = %config.bind, "starting graph explorer server");

    if let Err(e) = run_server(config, url, ApiVer::instance()).await {
        tracing::error!(cause = %e, "graph explorer server exited with an error");
        std::process::exit(1);
    }
}

use std::path::PathBuf;

use clap::Parser;
use fab_store::MemoryCluster;
use fab_transport::InMemoryNetwork;
use fabricd::{config, Node};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fabricd", about = "Routing fabric node")]
struct Cli {
    /// Path to the node's TOML config file.
    #[arg(long, default_value = "/etc/fabricd/fabricd.toml")]
    config: PathBuf,

    /// Overrides the tracing env-filter (e.g. "debug", "fab_routing=trace").
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "fabricd starting");

    let cfg = match config::load_config_from_path(&cli.config) {
        Ok(cfg) => {
            info!(
                endpoint = %cfg.endpoint,
                local_address = %cfg.local_address,
                routes = cfg.routes.len(),
                registry = cfg.registry.enabled,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let cluster = MemoryCluster::new();
    let network: InMemoryNetwork<String> = InMemoryNetwork::new();

    let node = match Node::start(&cfg, &cluster, &network).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("FATAL: failed to start node: {e}");
            std::process::exit(1);
        }
    };
    info!(endpoint = %cfg.endpoint, "node ready");

    shutdown_signal().await;

    info!("shutting down");
    node.shutdown().await;
    info!("node shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}

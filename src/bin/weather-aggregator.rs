//! Aggregator: supervises one subscription per weather node and logs the
//! combined state whenever it changes.

use clap::Parser;
use log::{error, info, warn};
use std::time::Duration;
use weather_relay::aggregator::{ConnectionManager, NodeState};
use weather_relay::config::{AggregatorConfig, load_dotenv, parse_node_list};

#[derive(Parser)]
#[command(name = "weather-aggregator")]
#[command(about = "Subscribe to every weather node and track its status")]
struct Cli {
    /// Nodes as `name=ws://host:port,...`
    #[arg(long, env = "AGGREGATOR_NODES")]
    nodes: Option<String>,

    /// Heartbeat interval in seconds
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS")]
    heartbeat_secs: Option<u64>,

    /// Print the snapshot as JSON instead of one line per node
    #[arg(long)]
    json: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn describe(node: &NodeState) -> String {
    let reading = node
        .measurement
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "no data".to_string());
    format!("{} ({}): {} | {}", node.name, node.endpoint, node.status, reading)
}

fn main() {
    // environment is settled before any runtime thread starts
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cli));
}

async fn run(cli: Cli) {
    let mut config = match AggregatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(raw) = cli.nodes.as_deref() {
        match parse_node_list(raw) {
            Ok(nodes) => config.nodes = nodes,
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    if let Some(secs) = cli.heartbeat_secs {
        config.timing.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Starting weather aggregator for {} node(s)", config.nodes.len());
    for node in &config.nodes {
        info!("  {} -> {}", node.name, node.url);
    }

    let manager = ConnectionManager::with_websockets(config);
    let mut changes = manager.subscribe_changes();
    let mut transitions = manager.subscribe_transitions();
    manager.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = manager.snapshot();
                if cli.json {
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => info!("{}", json),
                        Err(e) => warn!("Failed to encode snapshot: {}", e),
                    }
                } else {
                    for node in &snapshot {
                        info!("{}", describe(node));
                    }
                }
            }
            change = transitions.recv() => {
                if let Ok(change) = change {
                    info!("[Node {}] {} -> {}", change.node, change.from, change.to);
                }
            }
        }
    }

    info!("Shutting down weather aggregator");
    manager.stop().await;
}

//! Weather node: one broadcast hub behind a WebSocket listener.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use weather_relay::config::{NodeConfig, load_dotenv};
use weather_relay::hub::{BroadcastHub, HubServer};
use weather_relay::store::{MeasurementStore, MemoryStore, SqliteStore};

#[derive(Parser)]
#[command(name = "weather-node")]
#[command(about = "Weather node hub: ingest, persist and broadcast measurements")]
struct Cli {
    /// Node name, also the database file name
    #[arg(long, env = "NODE_NAME")]
    name: Option<String>,

    /// Listen address, e.g. 0.0.0.0:5001
    #[arg(long, env = "NODE_LISTEN_ADDR")]
    listen: Option<String>,

    /// Directory holding the node database
    #[arg(long, env = "NODE_DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// Keep measurements in memory only
    #[arg(long)]
    memory: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
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
    let mut config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(name) = cli.name {
        config.node_name = name;
    }
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(path) = cli.database_path {
        config.database_path = path;
    }
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Starting weather node {}", config.node_name);
    info!("  Listen address: {}", config.listen_addr);
    info!("  Subscriber buffer: {}", config.subscriber_buffer);

    let store: Arc<dyn MeasurementStore> = if cli.memory {
        info!("  Storage: in-memory");
        Arc::new(MemoryStore::new())
    } else {
        info!("  Storage: {}", config.database_file().display());
        match SqliteStore::open(&config.database_file()) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to open database: {}", e);
                std::process::exit(1);
            }
        }
    };

    let hub = Arc::new(BroadcastHub::new(
        config.node_name.clone(),
        store,
        config.subscriber_buffer,
    ));
    let server = match HubServer::bind(&config.listen_addr, hub).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_token();
    let server_task = tokio::spawn(server.run());

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down weather node {}", config.node_name);
    shutdown.cancel();

    match server_task.await {
        Ok(Err(e)) => error!("Hub server failed: {}", e),
        Err(e) => error!("Hub server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
}

//! Simulated weather station publishing to one hub.

use clap::Parser;
use log::{error, info};
use weather_relay::config::{SimulatorConfig, load_dotenv};
use weather_relay::simulation::{IngestClient, RandomWeatherSource, SimulationClock, Simulator};

#[derive(Parser)]
#[command(name = "weather-simulator")]
#[command(about = "Accelerated 24-hour weather station simulation")]
struct Cli {
    /// Hub URL, e.g. ws://localhost:5001
    #[arg(long, env = "SIMULATOR_HUB_URL")]
    hub: Option<String>,

    /// Producer id sent to the hub
    #[arg(long, env = "SIMULATOR_ID")]
    id: Option<String>,

    /// Simulation speed factor
    #[arg(long, env = "SIMULATION_SPEED_FACTOR")]
    speed: Option<u32>,
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
    let mut config = match SimulatorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(hub) = cli.hub {
        config.hub_url = hub;
    }
    if let Some(id) = cli.id {
        config.simulator_id = id;
    }
    if let Some(speed) = cli.speed {
        config.speed_factor = speed;
    }
    if let Err(e) = config.validate() {
        error!("{}", e);
        std::process::exit(1);
    }

    let simulator_id = config.effective_simulator_id();
    info!("Starting weather simulator {}", simulator_id);
    info!("  Hub: {}", config.hub_url);
    info!(
        "  Interval: {} min, speed factor {}",
        config.measurement_interval_minutes, config.speed_factor
    );

    let simulator = Simulator::new(
        SimulationClock::from_midnight(config.measurement_interval_minutes, config.speed_factor),
        RandomWeatherSource::from_entropy(),
        IngestClient::new(config.hub_url.clone(), simulator_id),
    );

    let shutdown = tokio_util::sync::CancellationToken::new();
    let task = tokio::spawn(simulator.run(shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    shutdown.cancel();
    if let Err(e) = task.await {
        error!("Simulator task panicked: {}", e);
    }
}

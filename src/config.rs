use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(&key).is_err() {
            // SAFETY: binaries call this before starting the tokio runtime
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            pairs.push((key.to_string(), value.to_string()));
        }
    }
    pairs
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| RelayError::Config(format!("{} has an invalid value: {}", key, raw))),
        Err(_) => Ok(None),
    }
}

/// Settings of one hub process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_name: String,
    pub listen_addr: String,
    /// Directory holding `<node_name>.db`.
    pub database_path: PathBuf,
    /// Outbound frames buffered per subscriber before it counts as stalled.
    pub subscriber_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: "DefaultNode".to_string(),
            listen_addr: "0.0.0.0:5001".to_string(),
            database_path: default_database_dir(),
            subscriber_buffer: 64,
        }
    }
}

fn default_database_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("weather-relay"))
        .unwrap_or_else(|| PathBuf::from("./Data"))
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("NODE_NAME") {
            config.node_name = name;
        }
        if let Ok(addr) = std::env::var("NODE_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(path) = std::env::var("NODE_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(buffer) = env_parse("NODE_SUBSCRIBER_BUFFER")? {
            config.subscriber_buffer = buffer;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(RelayError::Config("node name must not be empty".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(RelayError::Config(
                "subscriber buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_file(&self) -> PathBuf {
        self.database_path.join(format!("{}.db", self.node_name))
    }
}

/// A hub the aggregator subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    pub name: String,
    /// Base WebSocket URL, e.g. `ws://localhost:5001`.
    pub url: String,
}

impl NodeEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Parse `name=url,name=url`.
pub fn parse_node_list(raw: &str) -> Result<Vec<NodeEndpoint>> {
    let mut nodes: Vec<NodeEndpoint> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, url) = entry.split_once('=').ok_or_else(|| {
            RelayError::Config(format!("node entry '{}' is not name=url", entry))
        })?;
        let (name, url) = (name.trim(), url.trim());
        if name.is_empty() || url.is_empty() {
            return Err(RelayError::Config(format!(
                "node entry '{}' has an empty name or url",
                entry
            )));
        }
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(RelayError::Config(format!(
                "node url must start with ws:// or wss://, got: {}",
                url
            )));
        }
        if nodes.iter().any(|n| n.name == name) {
            return Err(RelayError::Config(format!("duplicate node name '{}'", name)));
        }
        nodes.push(NodeEndpoint::new(name, url));
    }
    if nodes.is_empty() {
        return Err(RelayError::Config("no nodes configured".to_string()));
    }
    Ok(nodes)
}

/// Retry and liveness timing of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerTiming {
    /// Period of the heartbeat loop; silence longer than twice this demotes
    /// a connected node.
    pub heartbeat_interval: Duration,
    /// Upper bound on one availability probe.
    pub probe_timeout: Duration,
    /// Wait after the node was found unavailable.
    pub retry_delay: Duration,
    /// Wait after any other connection error.
    pub error_retry_delay: Duration,
    /// How long a probe waits for an immediate error after connecting.
    pub probe_settle: Duration,
}

impl Default for ManagerTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(5),
            error_retry_delay: Duration::from_secs(10),
            probe_settle: Duration::from_millis(250),
        }
    }
}

impl ManagerTiming {
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub nodes: Vec<NodeEndpoint>,
    pub timing: ManagerTiming,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            nodes: (0..4)
                .map(|i| {
                    NodeEndpoint::new(
                        format!("WeatherNode-{}", i),
                        format!("ws://localhost:{}", 5001 + i),
                    )
                })
                .collect(),
            timing: ManagerTiming::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("AGGREGATOR_NODES") {
            config.nodes = parse_node_list(&raw)?;
        }
        if let Some(secs) = env_parse::<u64>("HEARTBEAT_INTERVAL_SECS")? {
            config.timing.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("PROBE_TIMEOUT_SECS")? {
            config.timing.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RETRY_DELAY_SECS")? {
            config.timing.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("ERROR_RETRY_DELAY_SECS")? {
            config.timing.error_retry_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("PROBE_SETTLE_MS")? {
            config.timing.probe_settle = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(RelayError::Config("no nodes configured".to_string()));
        }
        let t = &self.timing;
        if t.heartbeat_interval.is_zero() || t.probe_timeout.is_zero() {
            return Err(RelayError::Config(
                "heartbeat interval and probe timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings of one simulated producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub hub_url: String,
    /// Producer identity sent in the `simulator-id` header. Empty means
    /// `<hostname>-<pid>`.
    pub simulator_id: String,
    pub measurement_interval_minutes: u32,
    /// One simulated minute lasts `1000 / speed_factor` real milliseconds.
    pub speed_factor: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://localhost:5001".to_string(),
            simulator_id: String::new(),
            measurement_interval_minutes: 15,
            speed_factor: 10,
        }
    }
}

impl SimulatorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SIMULATOR_HUB_URL") {
            config.hub_url = url;
        }
        if let Ok(id) = std::env::var("SIMULATOR_ID") {
            config.simulator_id = id;
        }
        if let Some(minutes) = env_parse("MEASUREMENT_INTERVAL_MINUTES")? {
            config.measurement_interval_minutes = minutes;
        }
        if let Some(factor) = env_parse("SIMULATION_SPEED_FACTOR")? {
            config.speed_factor = factor;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.measurement_interval_minutes == 0 || self.speed_factor == 0 {
            return Err(RelayError::Config(
                "measurement interval and speed factor must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured id, or `<hostname>-<pid>` when none is set.
    pub fn effective_simulator_id(&self) -> String {
        if !self.simulator_id.trim().is_empty() {
            return self.simulator_id.clone();
        }
        let host = gethostname::gethostname().to_string_lossy().trim().to_string();
        let host = if host.is_empty() {
            "simulator".to_string()
        } else {
            host
        };
        format!("{}-{}", host, std::process::id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv_strips_quotes_and_comments() {
        let pairs = parse_dotenv("# comment\nNODE_NAME = \"Node A\"\n\nBAD LINE\nX='1'\n");
        assert_eq!(
            pairs,
            vec![
                ("NODE_NAME".to_string(), "Node A".to_string()),
                ("X".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_node_list() {
        let nodes = parse_node_list("A=ws://h:1, B=ws://h:2").unwrap();
        assert_eq!(
            nodes,
            vec![NodeEndpoint::new("A", "ws://h:1"), NodeEndpoint::new("B", "ws://h:2")]
        );
    }

    #[test]
    fn test_parse_node_list_rejects_bad_entries() {
        assert!(parse_node_list("").is_err());
        assert!(parse_node_list("A").is_err());
        assert!(parse_node_list("A=http://h:1").is_err());
        assert!(parse_node_list("A=ws://h:1,A=ws://h:2").is_err());
    }

    #[test]
    fn test_default_aggregator_nodes() {
        let config = AggregatorConfig::default();
        assert_eq!(config.nodes.len(), 4);
        assert_eq!(config.nodes[3], NodeEndpoint::new("WeatherNode-3", "ws://localhost:5004"));
        assert_eq!(config.timing.heartbeat_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_database_file_uses_node_name() {
        let config = NodeConfig {
            node_name: "WeatherNode-1".to_string(),
            database_path: PathBuf::from("/var/lib/wx"),
            ..NodeConfig::default()
        };
        assert_eq!(config.database_file(), PathBuf::from("/var/lib/wx/WeatherNode-1.db"));
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        let config = NodeConfig {
            subscriber_buffer: 0,
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configured_simulator_id_wins() {
        let config = SimulatorConfig {
            simulator_id: "Simulator-0".to_string(),
            ..SimulatorConfig::default()
        };
        assert_eq!(config.effective_simulator_id(), "Simulator-0");
        let fallback = SimulatorConfig::default().effective_simulator_id();
        assert!(fallback.ends_with(&format!("-{}", std::process::id())));
    }
}

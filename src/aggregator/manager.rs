//! Connection manager: one subscription loop and one heartbeat loop per
//! configured node, all feeding a shared [`NodeStateMap`].
//!
//! Node-level failures never reach the caller. They only show up as the
//! node's [`ConnectionStatus`].

use super::connector::{HubConnector, WsConnector};
use super::prober::{Prober, WsProber};
use super::state::{ConnectionStatus, NodeState, NodeStateMap, StatusChange};
use crate::config::{AggregatorConfig, ManagerTiming, NodeEndpoint};
use crate::error::{RelayError, Result};
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Subscription id used for one connection attempt to `node`.
pub fn client_id_for(node: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("aggregator-{}-{}", node, &suffix[..8])
}

pub struct ConnectionManager {
    nodes: Vec<NodeEndpoint>,
    timing: ManagerTiming,
    states: Arc<NodeStateMap>,
    prober: Arc<dyn Prober>,
    connector: Arc<dyn HubConnector>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        config: AggregatorConfig,
        prober: Arc<dyn Prober>,
        connector: Arc<dyn HubConnector>,
    ) -> Self {
        Self {
            states: Arc::new(NodeStateMap::new(&config.nodes)),
            nodes: config.nodes,
            timing: config.timing,
            prober,
            connector,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Manager talking to real hubs over WebSocket.
    pub fn with_websockets(config: AggregatorConfig) -> Self {
        let prober = Arc::new(WsProber::new(config.timing.probe_settle));
        Self::new(config, prober, Arc::new(WsConnector))
    }

    /// Spawn both loops for every node. Calling it again while running is a
    /// no-op; a stopped manager cannot be restarted.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.shutdown.is_cancelled() {
            warn!("[Aggregator] Start ignored: manager already started or stopped");
            return;
        }

        for endpoint in &self.nodes {
            let worker = NodeWorker {
                name: endpoint.name.clone(),
                url: endpoint.url.clone(),
                timing: self.timing,
                states: self.states.clone(),
                prober: self.prober.clone(),
                connector: self.connector.clone(),
                shutdown: self.shutdown.child_token(),
            };
            info!("[Node {}] Managing {}", worker.name, worker.url);
            tasks.push(tokio::spawn(worker.clone().run_subscription()));
            tasks.push(tokio::spawn(worker.run_heartbeat()));
        }
    }

    /// Signal every loop and wait until all of them have exited.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!("[Aggregator] Node task ended abnormally: {}", e);
            }
        }
        info!("[Aggregator] All node loops stopped");
    }

    pub fn snapshot(&self) -> Vec<NodeState> {
        self.states.snapshot()
    }

    pub fn get(&self, name: &str) -> Option<NodeState> {
        self.states.get(name)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.states.names()
    }

    /// Fires after every status change or new measurement. Treat it as
    /// "re-read the snapshot", not as a queue of events.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.states.subscribe_changes()
    }

    /// Discrete status transitions, for logging and diagnostics. Slow
    /// receivers may lag and miss entries.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusChange> {
        self.states.subscribe_transitions()
    }

    pub fn states(&self) -> Arc<NodeStateMap> {
        self.states.clone()
    }
}

enum StreamOutcome {
    Ended,
    Cancelled,
    Failed(RelayError),
}

#[derive(Clone)]
struct NodeWorker {
    name: String,
    url: String,
    timing: ManagerTiming,
    states: Arc<NodeStateMap>,
    prober: Arc<dyn Prober>,
    connector: Arc<dyn HubConnector>,
    shutdown: CancellationToken,
}

impl NodeWorker {
    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Probe under the cancellation token. `None` on cancellation; a probe
    /// outliving `probe_timeout` counts as unavailable.
    async fn probe(&self) -> Option<bool> {
        let limit = self.timing.probe_timeout;
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            up = tokio::time::timeout(limit, self.prober.probe(&self.url, limit)) => {
                Some(up.unwrap_or_else(|_| {
                    debug!("[Node {}] Probe exceeded {:?}", self.name, limit);
                    false
                }))
            }
        }
    }

    async fn run_subscription(self) {
        loop {
            let Some(available) = self.probe().await else {
                break;
            };
            if !available {
                self.states
                    .set_status(&self.name, ConnectionStatus::NodeUnavailable);
                if !self.pause(self.timing.retry_delay).await {
                    break;
                }
                continue;
            }

            self.states.set_status(&self.name, ConnectionStatus::Connecting);
            let client_id = client_id_for(&self.name);
            info!("[Node {}] Connecting as {}", self.name, client_id);

            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => StreamOutcome::Cancelled,
                result = self.stream_once(&client_id) => match result {
                    Ok(()) => StreamOutcome::Ended,
                    Err(e) => StreamOutcome::Failed(e),
                },
            };

            match outcome {
                StreamOutcome::Cancelled => {
                    self.states.set_status(&self.name, ConnectionStatus::Disconnected);
                    break;
                }
                StreamOutcome::Ended => {
                    info!("[Node {}] Subscription ended, reconnecting", self.name);
                    self.states.set_status(&self.name, ConnectionStatus::Disconnected);
                }
                StreamOutcome::Failed(e) if e.is_unavailable() => {
                    warn!("[Node {}] Node unavailable: {}", self.name, e);
                    self.states
                        .set_status(&self.name, ConnectionStatus::NodeUnavailable);
                    if !self.pause(self.timing.retry_delay).await {
                        break;
                    }
                }
                StreamOutcome::Failed(e) => {
                    error!("[Node {}] Connection error: {}", self.name, e);
                    self.states
                        .set_status(&self.name, ConnectionStatus::Error(e.to_string()));
                    if !self.pause(self.timing.error_retry_delay).await {
                        break;
                    }
                }
            }
        }
        info!("[Node {}] Subscription loop stopped", self.name);
    }

    /// One subscription call, read until it ends.
    async fn stream_once(&self, client_id: &str) -> Result<()> {
        let mut measurements = self.connector.subscribe(&self.url, client_id).await?;
        self.states.set_status(&self.name, ConnectionStatus::Connected);
        self.states.stamp_heartbeat(&self.name);

        while let Some(item) = measurements.next().await {
            let measurement = item?;
            self.states.record_measurement(&self.name, measurement);
        }
        Ok(())
    }

    async fn run_heartbeat(self) {
        loop {
            if !self.pause(self.timing.heartbeat_interval).await {
                break;
            }

            if self
                .states
                .expire_stale(&self.name, self.timing.heartbeat_timeout(), Utc::now())
            {
                warn!(
                    "[Node {}] No heartbeat for {:?}, marking unavailable",
                    self.name,
                    self.timing.heartbeat_timeout()
                );
            }

            // only connecting and incoming data refresh the heartbeat, so a
            // reachable hub with a stalled stream still expires above
            let Some(up) = self.probe().await else {
                break;
            };
            if !up && self.states.demote_if_connected(&self.name) {
                warn!("[Node {}] Heartbeat probe failed", self.name);
            }
        }
    }
}

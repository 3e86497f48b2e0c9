//! Per-node connectivity state held by the aggregator.

use super::notifier::ChangeNotifier;
use crate::config::NodeEndpoint;
use crate::measurement::Measurement;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

const TRANSITION_BUFFER: usize = 256;

/// Connection status of one node, as seen by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Connected,
    NodeUnavailable,
    Error(String),
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::NotConnected => write!(f, "Not Connected"),
            ConnectionStatus::Connecting => write!(f, "Connecting..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::NodeUnavailable => write!(f, "Node Unavailable"),
            ConnectionStatus::Error(detail) => write!(f, "Error: {}", detail),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Snapshot of one node. `is_connected` always mirrors `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub name: String,
    pub endpoint: String,
    pub measurement: Option<Measurement>,
    pub status: ConnectionStatus,
    pub is_connected: bool,
    pub last_updated: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl NodeState {
    fn new(endpoint: &NodeEndpoint, now: DateTime<Utc>) -> Self {
        Self {
            name: endpoint.name.clone(),
            endpoint: endpoint.url.clone(),
            measurement: None,
            status: ConnectionStatus::NotConnected,
            is_connected: false,
            last_updated: now,
            last_heartbeat: None,
        }
    }

    fn set_status(&mut self, status: ConnectionStatus, now: DateTime<Utc>) -> Option<StatusChange> {
        self.last_updated = now;
        if self.status == status {
            return None;
        }
        let change = StatusChange {
            node: self.name.clone(),
            from: self.status.clone(),
            to: status.clone(),
        };
        self.is_connected = status.is_connected();
        self.status = status;
        Some(change)
    }
}

/// One discrete status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub node: String,
    pub from: ConnectionStatus,
    pub to: ConnectionStatus,
}

/// Shared node-state map. Every mutation takes the write lock only long
/// enough to update one entry; reads clone under the read lock. No lock is
/// ever held across an await.
pub struct NodeStateMap {
    nodes: RwLock<BTreeMap<String, NodeState>>,
    notifier: ChangeNotifier,
    transitions: broadcast::Sender<StatusChange>,
}

impl NodeStateMap {
    pub fn new(endpoints: &[NodeEndpoint]) -> Self {
        let now = Utc::now();
        let nodes = endpoints
            .iter()
            .map(|e| (e.name.clone(), NodeState::new(e, now)))
            .collect();
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            nodes: RwLock::new(nodes),
            notifier: ChangeNotifier::new(),
            transitions,
        }
    }

    /// Apply `f` to one entry, then fire the change signal. Returns `None`
    /// for unknown nodes.
    fn mutate<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut NodeState) -> (T, Option<StatusChange>),
    ) -> Option<T> {
        let (out, change) = {
            let mut nodes = self.nodes.write();
            let state = nodes.get_mut(name)?;
            f(state)
        };
        if let Some(change) = change {
            // no receivers is fine
            let _ = self.transitions.send(change);
        }
        self.notifier.notify();
        Some(out)
    }

    pub fn set_status(&self, name: &str, status: ConnectionStatus) {
        let now = Utc::now();
        self.mutate(name, |state| ((), state.set_status(status, now)));
    }

    /// Store a new measurement: overwrite the last one, stamp the heartbeat
    /// and mark the node connected.
    pub fn record_measurement(&self, name: &str, measurement: Measurement) {
        let now = Utc::now();
        self.mutate(name, |state| {
            state.measurement = Some(measurement);
            state.last_heartbeat = Some(now);
            ((), state.set_status(ConnectionStatus::Connected, now))
        });
    }

    pub fn stamp_heartbeat(&self, name: &str) {
        self.stamp_heartbeat_at(name, Utc::now());
    }

    pub fn stamp_heartbeat_at(&self, name: &str, at: DateTime<Utc>) {
        self.mutate(name, |state| {
            state.last_heartbeat = Some(at);
            ((), None)
        });
    }

    /// Demote a connected node whose last heartbeat is older than
    /// `max_silence` at `now`. Returns whether it was demoted.
    pub fn expire_stale(&self, name: &str, max_silence: Duration, now: DateTime<Utc>) -> bool {
        let Ok(max_silence) = chrono::Duration::from_std(max_silence) else {
            return false;
        };
        let stale = {
            let nodes = self.nodes.read();
            match nodes.get(name) {
                Some(state) if state.is_connected => state
                    .last_heartbeat
                    .is_some_and(|beat| now.signed_duration_since(beat) > max_silence),
                _ => false,
            }
        };
        stale && self.demote_if_connected(name)
    }

    /// Move a connected node to `NodeUnavailable`. Other states are left
    /// alone; reconnecting is the subscription loop's job.
    pub fn demote_if_connected(&self, name: &str) -> bool {
        let now = Utc::now();
        self.mutate(name, |state| {
            if state.is_connected {
                (true, state.set_status(ConnectionStatus::NodeUnavailable, now))
            } else {
                (false, None)
            }
        })
        .unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<NodeState> {
        self.nodes.read().get(name).cloned()
    }

    /// All nodes, ordered by name.
    pub fn snapshot(&self) -> Vec<NodeState> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.read().keys().cloned().collect()
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusChange> {
        self.transitions.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.notifier.version()
    }
}

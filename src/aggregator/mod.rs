//! Aggregator side: keeps one live subscription per configured hub and
//! exposes the combined node state.

pub mod connector;
pub mod manager;
pub mod notifier;
pub mod prober;
pub mod state;

pub use connector::{HubConnector, WsConnector};
pub use manager::ConnectionManager;
pub use notifier::ChangeNotifier;
pub use prober::{Prober, WsProber};
pub use state::{ConnectionStatus, NodeState, NodeStateMap, StatusChange};

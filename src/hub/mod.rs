//! Broadcast hub of one weather node.
//!
//! [`BroadcastHub`] holds the per-node state (store, subscriber registry,
//! last-measurement cache). [`HubServer`] exposes it over WebSocket.

pub mod producer;
pub mod registry;
pub mod server;
pub mod service;

pub use producer::ProducerInfo;
pub use registry::{Delivery, SubscriberRegistry, Subscription};
pub use server::HubServer;
pub use service::BroadcastHub;

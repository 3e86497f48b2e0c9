//! Weather relay library.
//!
//! Per-node broadcast hubs that ingest a weather measurement stream, persist
//! it and fan it out to live subscribers, plus the aggregator side that keeps
//! one supervised subscription per hub and a station simulator that feeds
//! them.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod hub;
pub mod measurement;
pub mod simulation;
pub mod store;
pub mod wire;

pub use error::{RelayError, Result};
pub use measurement::{DayPhase, Measurement};

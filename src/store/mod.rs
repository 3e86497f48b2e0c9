//! Row store for measurements received by a hub.
//!
//! The hub only ever calls [`MeasurementStore::save`]; the query side exists
//! for operators and tests. Time filters use the receive time recorded by
//! the hub, never the producer's display timestamp.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::measurement::{DayPhase, Measurement};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted measurement with its receive context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMeasurement {
    pub id: i64,
    pub timestamp: String,
    pub day_phase: DayPhase,
    pub temperature: f64,
    pub humidity: Option<f64>,
    pub pressure: f64,
    pub is_raining: bool,
    pub producer_id: String,
    pub node_name: String,
    pub received_at: DateTime<Utc>,
    pub peer: Option<String>,
}

impl StoredMeasurement {
    pub fn measurement(&self) -> Measurement {
        Measurement {
            timestamp: self.timestamp.clone(),
            day_phase: self.day_phase,
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            is_raining: self.is_raining,
        }
    }
}

/// Filter for [`MeasurementStore::query`]. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementQuery {
    pub producer_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl MeasurementQuery {
    pub fn for_producer(producer_id: impl Into<String>) -> Self {
        Self {
            producer_id: Some(producer_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, row: &StoredMeasurement) -> bool {
        self.producer_id
            .as_deref()
            .is_none_or(|p| p.is_empty() || row.producer_id == p)
            && self.from.is_none_or(|from| row.received_at >= from)
            && self.to.is_none_or(|to| row.received_at <= to)
    }
}

#[async_trait]
pub trait MeasurementStore: Send + Sync {
    /// Persist one measurement received from `producer_id` on `node_name`.
    async fn save(
        &self,
        measurement: &Measurement,
        producer_id: &str,
        node_name: &str,
        peer: Option<&str>,
    ) -> Result<()>;

    /// Matching rows ordered by receive time, oldest first.
    async fn query(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>>;

    /// Most recently received row, optionally for one producer.
    async fn latest(&self, producer_id: Option<&str>) -> Result<Option<StoredMeasurement>>;

    async fn count(&self, producer_id: Option<&str>) -> Result<u64>;
}

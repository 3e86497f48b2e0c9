//! In-process measurement store.

use super::{MeasurementQuery, MeasurementStore, StoredMeasurement};
use crate::error::Result;
use crate::measurement::Measurement;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

/// Keeps every row in memory. Used by tests and by nodes started without a
/// database.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredMeasurement>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Vec<StoredMeasurement> {
        self.rows.read().clone()
    }
}

#[async_trait]
impl MeasurementStore for MemoryStore {
    async fn save(
        &self,
        measurement: &Measurement,
        producer_id: &str,
        node_name: &str,
        peer: Option<&str>,
    ) -> Result<()> {
        let mut rows = self.rows.write();
        let id = rows.len() as i64 + 1;
        rows.push(StoredMeasurement {
            id,
            timestamp: measurement.timestamp.clone(),
            day_phase: measurement.day_phase,
            temperature: measurement.temperature,
            humidity: measurement.humidity,
            pressure: measurement.pressure,
            is_raining: measurement.is_raining,
            producer_id: producer_id.to_string(),
            node_name: node_name.to_string(),
            received_at: Utc::now(),
            peer: peer.map(str::to_string),
        });
        Ok(())
    }

    async fn query(&self, query: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
        let mut rows: Vec<StoredMeasurement> = self
            .rows
            .read()
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        rows.sort_by_key(|row| (row.received_at, row.id));
        Ok(rows)
    }

    async fn latest(&self, producer_id: Option<&str>) -> Result<Option<StoredMeasurement>> {
        let query = MeasurementQuery {
            producer_id: producer_id.map(str::to_string),
            ..MeasurementQuery::default()
        };
        Ok(self
            .rows
            .read()
            .iter()
            .filter(|row| query.matches(row))
            .max_by_key(|row| (row.received_at, row.id))
            .cloned())
    }

    async fn count(&self, producer_id: Option<&str>) -> Result<u64> {
        let query = MeasurementQuery {
            producer_id: producer_id.map(str::to_string),
            ..MeasurementQuery::default()
        };
        Ok(self.rows.read().iter().filter(|row| query.matches(row)).count() as u64)
    }
}

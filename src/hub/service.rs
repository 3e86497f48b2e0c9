//! Broadcast hub: ingest one measurement stream, persist, fan out.

use super::producer::ProducerInfo;
use super::registry::{SubscriberRegistry, Subscription};
use crate::error::Result;
use crate::measurement::Measurement;
use crate::store::MeasurementStore;
use crate::wire::{Acknowledgement, HealthStatus};
use futures_util::{Stream, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;

/// Hub state of one node. Cheap to share behind an `Arc`; every instance is
/// independent of every other.
pub struct BroadcastHub {
    node_name: String,
    store: Arc<dyn MeasurementStore>,
    registry: Arc<SubscriberRegistry>,
}

impl BroadcastHub {
    pub fn new(
        node_name: impl Into<String>,
        store: Arc<dyn MeasurementStore>,
        subscriber_buffer: usize,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            store,
            registry: Arc::new(SubscriberRegistry::new(subscriber_buffer)),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Consume an inbound stream until it ends or fails.
    ///
    /// Each measurement is persisted, cached and fanned out, in that order.
    /// A store failure is logged and counted but the measurement still goes
    /// out to subscribers. A stream error ends the call with a failed
    /// acknowledgement carrying the error detail.
    pub async fn ingest<S>(&self, stream: S, producer: &ProducerInfo) -> Acknowledgement
    where
        S: Stream<Item = Result<Measurement>>,
    {
        info!(
            "[Hub {}] Incoming measurement stream from {} (peer {})",
            self.node_name,
            producer.producer_id,
            producer.peer.as_deref().unwrap_or("unknown")
        );

        let mut stream = std::pin::pin!(stream);
        let mut count: u64 = 0;
        let mut store_failures: u64 = 0;

        while let Some(item) = stream.next().await {
            match item {
                Ok(measurement) => {
                    count += 1;
                    if !self.process(&measurement, producer).await {
                        store_failures += 1;
                    }
                }
                Err(e) => {
                    let message = format!(
                        "Error receiving weather stream after {} measurements: {}",
                        count, e
                    );
                    error!("[Hub {}] {}", self.node_name, message);
                    return Acknowledgement {
                        success: false,
                        message,
                        count,
                        store_failures,
                    };
                }
            }
        }

        let mut message = format!(
            "Stream completed. {} measurements from {} received on node {}.",
            count, producer.producer_id, self.node_name
        );
        if store_failures > 0 {
            message.push_str(&format!(
                " {} measurement(s) could not be persisted.",
                store_failures
            ));
        }
        info!("[Hub {}] {}", self.node_name, message);

        Acknowledgement {
            success: true,
            message,
            count,
            store_failures,
        }
    }

    /// Persist, cache and fan out one measurement. Returns `false` when the
    /// store rejected it.
    async fn process(&self, measurement: &Measurement, producer: &ProducerInfo) -> bool {
        let stored = match self
            .store
            .save(
                measurement,
                &producer.producer_id,
                &self.node_name,
                producer.peer.as_deref(),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "[Hub {}] Failed to persist measurement from {}: {}",
                    self.node_name, producer.producer_id, e
                );
                false
            }
        };

        info!("[Hub {}] [{}] {}", self.node_name, producer.producer_id, measurement);

        let delivery = self.registry.publish(measurement);
        if !delivery.dropped.is_empty() {
            warn!(
                "[Hub {}] Dropped {} subscriber(s): {}",
                self.node_name,
                delivery.dropped.len(),
                delivery.dropped.join(", ")
            );
        }
        debug!(
            "[Hub {}] Delivered to {} subscriber(s)",
            self.node_name, delivery.delivered
        );
        stored
    }

    /// Register a subscriber. A blank or missing id gets a generated one.
    /// The cached last measurement, if any, is the first queued item.
    pub fn subscribe(&self, client_id: Option<&str>) -> Subscription {
        let client_id = client_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            "[Hub {}] Client {} subscribed to weather updates",
            self.node_name, client_id
        );
        Subscription::new(self.registry.clone(), client_id)
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: true,
            message: format!("Weather node {} is running", self.node_name),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    pub fn last_measurement(&self) -> Option<Measurement> {
        self.registry.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::measurement::DayPhase;
    use crate::store::{MemoryStore, MeasurementQuery, StoredMeasurement};
    use async_trait::async_trait;
    use futures_util::stream;

    fn reading(minute: u32, temp: f64) -> Measurement {
        Measurement {
            timestamp: format!("2025-10-19 14:{:02}:00", minute),
            day_phase: DayPhase::Day,
            temperature: temp,
            humidity: Some(45.0),
            pressure: 1013.2,
            is_raining: false,
        }
    }

    fn producer() -> ProducerInfo {
        ProducerInfo::resolve(Some("Simulator-0"), Some("127.0.0.1:40000"))
    }

    /// Store that rejects every write.
    struct BrokenStore;

    #[async_trait]
    impl MeasurementStore for BrokenStore {
        async fn save(&self, _: &Measurement, _: &str, _: &str, _: Option<&str>) -> Result<()> {
            Err(RelayError::Store("disk full".to_string()))
        }
        async fn query(&self, _: &MeasurementQuery) -> Result<Vec<StoredMeasurement>> {
            Ok(Vec::new())
        }
        async fn latest(&self, _: Option<&str>) -> Result<Option<StoredMeasurement>> {
            Ok(None)
        }
        async fn count(&self, _: Option<&str>) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_ingest_without_subscribers_persists_once() {
        let store = Arc::new(MemoryStore::new());
        let hub = BroadcastHub::new("WeatherNode-0", store.clone(), 8);
        let m = Measurement {
            timestamp: "2025-10-19 14:30:00".to_string(),
            day_phase: DayPhase::Day,
            temperature: 22.5,
            humidity: Some(45.0),
            pressure: 1013.2,
            is_raining: false,
        };

        let ack = hub.ingest(stream::iter(vec![Ok(m.clone())]), &producer()).await;

        assert!(ack.success);
        assert_eq!(ack.count, 1);
        assert_eq!(ack.store_failures, 0);
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].measurement(), m);
        assert_eq!(rows[0].producer_id, "Simulator-0");
        assert_eq!(rows[0].node_name, "WeatherNode-0");
        assert_eq!(rows[0].peer.as_deref(), Some("127.0.0.1:40000"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_ingestion_order() {
        let hub = BroadcastHub::new("n", Arc::new(MemoryStore::new()), 8);
        let mut sub = hub.subscribe(Some("A"));
        let (m1, m2) = (reading(0, 20.0), reading(1, 21.0));

        hub.ingest(stream::iter(vec![Ok(m1.clone()), Ok(m2.clone())]), &producer())
            .await;

        assert_eq!(sub.recv().await, Some(m1));
        assert_eq!(sub.recv().await, Some(m2));
        assert_eq!(sub.try_recv(), None);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_block_fan_out() {
        let hub = BroadcastHub::new("n", Arc::new(BrokenStore), 8);
        let mut sub = hub.subscribe(None);
        let m = reading(5, 18.0);

        let ack = hub.ingest(stream::iter(vec![Ok(m.clone())]), &producer()).await;

        assert!(ack.success);
        assert_eq!(ack.count, 1);
        assert_eq!(ack.store_failures, 1);
        assert!(ack.message.contains("could not be persisted"));
        assert_eq!(sub.recv().await, Some(m.clone()));
        assert_eq!(hub.last_measurement(), Some(m));
    }

    #[tokio::test]
    async fn test_stream_error_returns_failed_ack() {
        let hub = BroadcastHub::new("n", Arc::new(MemoryStore::new()), 8);
        let items = vec![
            Ok(reading(0, 20.0)),
            Err(RelayError::Protocol("invalid frame".to_string())),
            Ok(reading(1, 21.0)),
        ];

        let ack = hub.ingest(stream::iter(items), &producer()).await;

        assert!(!ack.success);
        assert_eq!(ack.count, 1);
        assert!(ack.message.contains("invalid frame"));
    }

    #[tokio::test]
    async fn test_blank_client_id_is_generated() {
        let hub = BroadcastHub::new("n", Arc::new(MemoryStore::new()), 8);
        let sub = hub.subscribe(Some(""));
        assert!(uuid::Uuid::parse_str(sub.client_id()).is_ok());
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_health_is_constant() {
        let hub = BroadcastHub::new("WeatherNode-3", Arc::new(MemoryStore::new()), 8);
        let health = hub.health();
        assert!(health.status);
        assert!(health.message.contains("WeatherNode-3"));
        assert_eq!(hub.health(), health);
    }
}

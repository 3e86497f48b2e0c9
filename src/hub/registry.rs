//! Subscriber registry and last-measurement cache of one hub.
//!
//! Each subscriber owns a bounded outbound queue. Fan-out uses `try_send`
//! only, so a full or closed queue counts as a write failure and the
//! subscriber is dropped; ingestion never waits on a subscriber.
//!
//! Lock order is always `subscribers` then `last`. Registration holds the
//! write lock while it reads the cache, and fan-out holds the read lock
//! while it updates the cache, so a new subscriber sees every measurement
//! exactly once: either as its cached first message or through fan-out.

use crate::measurement::Measurement;
use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

struct Entry {
    token: u64,
    sender: mpsc::Sender<Measurement>,
}

pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<String, Entry>>,
    last: RwLock<Option<Measurement>>,
    next_token: AtomicU64,
    buffer: usize,
}

/// Outcome of fanning one measurement out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Client ids removed because their queue was full or closed.
    pub dropped: Vec<String>,
}

impl SubscriberRegistry {
    /// `buffer` is the per-subscriber queue depth; clamped to at least 1.
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            last: RwLock::new(None),
            next_token: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register `client_id` and return its registration token and queue.
    ///
    /// The cached last measurement, if any, is queued first. Registering an
    /// id that is already present replaces the previous registration, whose
    /// queue then closes.
    pub fn register(&self, client_id: &str) -> (u64, mpsc::Receiver<Measurement>) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.write();
        if let Some(cached) = self.last.read().clone() {
            // fresh queue with capacity >= 1 and a live receiver
            let _ = sender.try_send(cached);
        }
        if subscribers
            .insert(client_id.to_string(), Entry { token, sender })
            .is_some()
        {
            debug!("[Hub] Replaced existing registration for {}", client_id);
        }
        (token, receiver)
    }

    /// Remove the registration of `client_id` if it still carries `token`.
    /// Returns whether an entry was removed; repeated calls are no-ops.
    pub fn remove(&self, client_id: &str, token: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        match subscribers.get(client_id) {
            Some(entry) if entry.token == token => {
                subscribers.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Update the cache and queue `measurement` for every subscriber.
    pub fn publish(&self, measurement: &Measurement) -> Delivery {
        let mut delivery = Delivery::default();
        let mut failed: Vec<(String, u64)> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            *self.last.write() = Some(measurement.clone());

            for (client_id, entry) in subscribers.iter() {
                match entry.sender.try_send(measurement.clone()) {
                    Ok(()) => delivery.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!("[Hub] Subscriber {} is not keeping up, dropping it", client_id);
                        failed.push((client_id.clone(), entry.token));
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("[Hub] Subscriber {} has gone away, dropping it", client_id);
                        failed.push((client_id.clone(), entry.token));
                    }
                }
            }
        }

        for (client_id, token) in failed {
            if self.remove(&client_id, token) {
                delivery.dropped.push(client_id);
            }
        }
        delivery
    }

    pub fn last(&self) -> Option<Measurement> {
        self.last.read().clone()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.subscribers.read().contains_key(client_id)
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.subscribers.read().keys().cloned().collect()
    }
}

/// A live registration. Dropping it unregisters the subscriber, which is how
/// cancellation of a subscribe call is handled.
pub struct Subscription {
    client_id: String,
    token: u64,
    receiver: mpsc::Receiver<Measurement>,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub(crate) fn new(registry: Arc<SubscriberRegistry>, client_id: String) -> Self {
        let (token, receiver) = registry.register(&client_id);
        Self {
            client_id,
            token,
            receiver,
            registry,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Next measurement for this subscriber. `None` once the hub dropped
    /// the registration (write failure or replacement) and the queue drained.
    pub async fn recv(&mut self) -> Option<Measurement> {
        self.receiver.recv().await
    }

    /// Non-waiting variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Measurement> {
        self.receiver.try_recv().ok()
    }

    /// Unregister now. Returns whether this call removed the entry.
    pub fn cancel(&mut self) -> bool {
        self.receiver.close();
        self.registry.remove(&self.client_id, self.token)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.registry.remove(&self.client_id, self.token) {
            debug!("[Hub] Subscription {} ended", self.client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::DayPhase;

    fn reading(temp: f64) -> Measurement {
        Measurement {
            timestamp: format!("2025-10-19 14:{:02}:00", temp as u32 % 60),
            day_phase: DayPhase::Day,
            temperature: temp,
            humidity: Some(50.0),
            pressure: 1000.0,
            is_raining: false,
        }
    }

    #[test]
    fn test_publish_without_subscribers_updates_cache() {
        let registry = SubscriberRegistry::new(4);
        let delivery = registry.publish(&reading(1.0));
        assert_eq!(delivery, Delivery::default());
        assert_eq!(registry.last(), Some(reading(1.0)));
    }

    #[test]
    fn test_late_joiner_gets_cached_value_first() {
        let registry = SubscriberRegistry::new(4);
        registry.publish(&reading(1.0));
        registry.publish(&reading(2.0));

        let (_, mut rx) = registry.register("late");
        registry.publish(&reading(3.0));

        assert_eq!(rx.try_recv().unwrap(), reading(2.0));
        assert_eq!(rx.try_recv().unwrap(), reading(3.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_joiner_without_cache_gets_nothing() {
        let registry = SubscriberRegistry::new(4);
        let (_, mut rx) = registry.register("first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_only_that_subscriber() {
        let registry = SubscriberRegistry::new(1);
        let (_, mut fast) = registry.register("fast");
        let (_, _slow) = registry.register("slow");

        let first = registry.publish(&reading(1.0));
        assert_eq!(first.delivered, 2);
        assert_eq!(fast.try_recv().unwrap(), reading(1.0));

        // slow never drained its single slot
        let second = registry.publish(&reading(2.0));
        assert_eq!(second.delivered, 1);
        assert_eq!(second.dropped, vec!["slow".to_string()]);
        assert!(!registry.contains("slow"));
        assert_eq!(fast.try_recv().unwrap(), reading(2.0));
    }

    #[test]
    fn test_closed_receiver_is_removed() {
        let registry = SubscriberRegistry::new(4);
        let (_, rx) = registry.register("gone");
        drop(rx);
        let delivery = registry.publish(&reading(1.0));
        assert_eq!(delivery.dropped, vec!["gone".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent_and_token_checked() {
        let registry = SubscriberRegistry::new(4);
        let (old_token, _old_rx) = registry.register("client");
        let (new_token, _new_rx) = registry.register("client");
        assert_eq!(registry.len(), 1);

        assert!(!registry.remove("client", old_token));
        assert!(registry.contains("client"));
        assert!(registry.remove("client", new_token));
        assert!(!registry.remove("client", new_token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_subscription_drop_unregisters() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let subscription = Subscription::new(registry.clone(), "dash".to_string());
        assert_eq!(subscription.client_id(), "dash");
        assert!(registry.contains("dash"));
        drop(subscription);
        assert!(!registry.contains("dash"));
    }

    #[test]
    fn test_cancel_then_drop_removes_once() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let mut subscription = Subscription::new(registry.clone(), "dash".to_string());
        assert!(subscription.cancel());
        assert!(!subscription.cancel());
        drop(subscription);
        assert!(registry.is_empty());
    }
}

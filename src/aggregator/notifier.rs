//! Change notifier for the aggregator's node-state map.
//!
//! Every status change or new measurement bumps a version counter carried
//! on a tokio watch channel. Observers wake up, re-read the snapshot and go
//! back to waiting; bursts may coalesce into fewer wakeups or produce more
//! than strictly needed.

use tokio::sync::watch;

/// Broadcasts "something changed, re-read" to any number of observers.
///
/// # Usage
/// ```ignore
/// let mut changes = manager.subscribe_changes();
/// while changes.changed().await.is_ok() {
///     render(manager.snapshot());
/// }
/// ```
#[derive(Debug)]
pub struct ChangeNotifier {
    version: watch::Sender<u64>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { version }
    }

    /// Signal observers. Never blocks and works with zero observers.
    pub fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// New observer. Its first `changed()` fires on the next `notify()`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Number of notifications sent so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

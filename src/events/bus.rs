//! # Notification bus.
//!
//! ```text
//!   DependencyTracker ──┐
//!   Orchestrator      ──┼──► Bus ──┬──► subscriber listener ──► SubscriberSet
//!   ExtenderController──┘          └──► Bus::subscribe() (tests, embedders)
//! ```
//!
//! Publishing never blocks, so it is safe from synchronous registry callbacks on any
//! thread. One ring buffer of `capacity` entries is shared by all receivers; a receiver
//! that falls behind gets `RecvError::Lagged(n)` and skips the `n` oldest entries.
//! Notifications published while nobody listens are discarded.

use tokio::sync::broadcast;

use super::event::Event;

/// Fire-and-forget broadcast of [`Event`]s.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus buffering up to `capacity` notifications (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, ev: Event) {
        if self.tx.send(ev).is_err() {
            tracing::trace!("notification discarded: no receivers");
        }
    }

    /// New receiver; it observes only notifications published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use tokio::sync::broadcast::error::RecvError;

    #[test]
    fn publish_without_receivers_is_silent() {
        let bus = Bus::new(0);
        assert_eq!(bus.receiver_count(), 0);
        bus.publish(Event::new(EventKind::ShutdownRequested));
    }

    #[tokio::test]
    async fn slow_receiver_observes_lag() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..4 {
            bus.publish(Event::new(EventKind::ModuleSubmitted));
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::ModuleSubmitted);
    }
}

//! # Fan-out of bus notifications to user subscribers.
//!
//! [`SubscriberSet`] owns one bounded queue and one worker per [`Subscribe`]
//! implementation. The bus listener hands every notification to [`SubscriberSet::emit`],
//! which never waits on a subscriber.
//!
//! ```text
//! emit(Arc<Event>)
//!     ├──► queue "log"     ──► worker ──► on_event()
//!     ├──► queue "metrics" ──► worker ──► on_event()   panic → SubscriberPanicked
//!     └──► queue "audit"   ──► worker ──► on_event()   full  → SubscriberOverflow
//! ```
//!
//! Each subscriber sees notifications in publish order. Nothing is promised across
//! subscribers. Panics are caught with `AssertUnwindSafe`, so a subscriber that panics
//! while holding a lock may leave its own state inconsistent.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

/// Delivery counters of one subscriber.
#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of a subscriber's delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryStats {
    /// Notifications handled by `on_event` without panicking.
    pub delivered: u64,
    /// Notifications dropped because the queue was full or closed.
    pub dropped: u64,
    /// Notifications whose handler panicked.
    pub panicked: u64,
}

struct Lane {
    name: &'static str,
    sub: Arc<dyn Subscribe>,
    tx: mpsc::Sender<Arc<Event>>,
    counters: Arc<Counters>,
}

/// Per-subscriber queues and workers behind the bus listener.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber on `runtime`.
    #[must_use]
    pub fn new(subscribers: Vec<Arc<dyn Subscribe>>, bus: Bus, runtime: &Handle) -> Self {
        let mut lanes = Vec::with_capacity(subscribers.len());
        let mut workers = Vec::with_capacity(subscribers.len());

        for sub in subscribers {
            let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
            let counters = Arc::new(Counters::default());
            lanes.push(Lane {
                name: sub.name(),
                sub: Arc::clone(&sub),
                tx,
                counters: Arc::clone(&counters),
            });
            workers.push(runtime.spawn(drain(sub, rx, counters, bus.clone())));
        }
        Self {
            lanes,
            workers,
            bus,
        }
    }

    /// Queues `event` for every subscriber that accepts its kind.
    ///
    /// A subscriber whose queue is full loses this notification only; the loss is
    /// reported as `SubscriberOverflow` unless the notification is itself an overflow report.
    pub fn emit(&self, event: Arc<Event>) {
        let reportable = event.kind != EventKind::SubscriberOverflow;

        for lane in &self.lanes {
            if !lane.sub.accepts(event.kind) {
                continue;
            }
            let reason = match lane.tx.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(TrySendError::Full(_)) => "full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            lane.counters.dropped.fetch_add(1, Ordering::Relaxed);
            if reportable {
                tracing::warn!(subscriber = lane.name, reason, kind = ?event.kind, "notification dropped");
                self.bus.publish(Event::subscriber_overflow(lane.name, reason));
            }
        }
    }

    /// Delivery counters per subscriber, in registration order.
    pub fn stats(&self) -> Vec<(&'static str, DeliveryStats)> {
        self.lanes
            .iter()
            .map(|lane| {
                let c = &lane.counters;
                let stats = DeliveryStats {
                    delivered: c.delivered.load(Ordering::Relaxed),
                    dropped: c.dropped.load(Ordering::Relaxed),
                    panicked: c.panicked.load(Ordering::Relaxed),
                };
                (lane.name, stats)
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Closes every queue and waits for the workers to finish what was already queued.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

async fn drain(
    sub: Arc<dyn Subscribe>,
    mut rx: mpsc::Receiver<Arc<Event>>,
    counters: Arc<Counters>,
    bus: Bus,
) {
    while let Some(event) = rx.recv().await {
        match std::panic::AssertUnwindSafe(sub.on_event(&event))
            .catch_unwind()
            .await
        {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                let info = panic_message(payload.as_ref());
                tracing::warn!(subscriber = sub.name(), %info, "subscriber panicked");
                bus.publish(Event::subscriber_panicked(sub.name(), info));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct Gate {
        open: Arc<Notify>,
    }

    #[async_trait]
    impl Subscribe for Gate {
        async fn on_event(&self, _event: &Event) {
            self.open.notified().await;
        }
        fn name(&self) -> &'static str {
            "gate"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    struct Faulty;

    #[async_trait]
    impl Subscribe for Faulty {
        async fn on_event(&self, event: &Event) {
            if event.kind == EventKind::ModuleStarted {
                panic!("boom");
            }
        }
        fn name(&self) -> &'static str {
            "faulty"
        }
    }

    #[tokio::test]
    async fn full_queue_drops_for_that_subscriber_only() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let open = Arc::new(Notify::new());
        let subs: Vec<Arc<dyn Subscribe>> = vec![
            Arc::new(Gate {
                open: Arc::clone(&open),
            }),
            Arc::new(Faulty),
        ];
        let set = SubscriberSet::new(subs, bus.clone(), &Handle::current());

        // First one is taken by the gate worker, second fills the queue, third is dropped.
        set.emit(Arc::new(Event::new(EventKind::ModuleSubmitted)));
        tokio::task::yield_now().await;
        set.emit(Arc::new(Event::new(EventKind::ModuleSubmitted)));
        set.emit(Arc::new(Event::new(EventKind::ModuleSubmitted)));

        let overflow = rx.recv().await.unwrap();
        assert_eq!(overflow.kind, EventKind::SubscriberOverflow);
        assert_eq!(overflow.module.as_deref(), Some("gate"));

        let stats = set.stats();
        assert_eq!(stats[0].0, "gate");
        assert_eq!(stats[0].1.dropped, 1);
        assert_eq!(stats[1].1.dropped, 0);

        open.notify_one();
        open.notify_one();
        set.shutdown().await;
    }

    #[tokio::test]
    async fn panic_is_reported_and_worker_keeps_going() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(Faulty)];
        let set = SubscriberSet::new(subs, bus.clone(), &Handle::current());

        set.emit(Arc::new(Event::new(EventKind::ModuleStarted)));
        set.emit(Arc::new(Event::new(EventKind::ModuleStopped)));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.reason.as_deref(), Some("boom"));

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while set.stats()[0].1.delivered < 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("worker stopped after a panic");
        assert_eq!(set.stats()[0].1.panicked, 1);
        set.shutdown().await;
    }

    struct OutcomesOnly;

    #[async_trait]
    impl Subscribe for OutcomesOnly {
        async fn on_event(&self, _event: &Event) {}
        fn name(&self) -> &'static str {
            "outcomes"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
        fn accepts(&self, kind: EventKind) -> bool {
            kind.is_module_outcome()
        }
    }

    #[tokio::test]
    async fn rejected_kinds_take_no_queue_space() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(OutcomesOnly)];
        let set = SubscriberSet::new(subs, bus.clone(), &Handle::current());

        for _ in 0..8 {
            set.emit(Arc::new(Event::new(EventKind::DependencyWaitStarted)));
        }
        set.emit(Arc::new(Event::new(EventKind::ModuleStarted)));

        assert!(rx.try_recv().is_err());
        assert_eq!(set.stats()[0].1.dropped, 0);
        set.shutdown().await;
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}

//! Bus listener that forwards notifications into a [`SubscriberSet`].
//!
//! The extender keeps the feed so a completed shutdown can flush it: stop the
//! listener once the bus is drained, then let every worker finish its queue.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::Bus;
use crate::subscribers::{DeliveryStats, SubscriberSet};

pub(crate) struct SubscriberFeed {
    set: Arc<SubscriberSet>,
    stop: CancellationToken,
    listener: JoinHandle<()>,
}

impl SubscriberFeed {
    /// Subscribes to `bus` now and forwards every later notification to `set`.
    pub(crate) fn spawn(runtime: &Handle, bus: &Bus, set: SubscriberSet) -> Self {
        let set = Arc::new(set);
        let stop = CancellationToken::new();
        let mut rx = bus.subscribe();
        let (fwd, token) = (Arc::clone(&set), stop.clone());

        let listener = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => fwd.emit(Arc::new(ev)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    // Only reached once nothing is buffered for this receiver.
                    _ = token.cancelled() => break,
                }
            }
        });
        Self { set, stop, listener }
    }

    pub(crate) fn stats(&self) -> Vec<(&'static str, DeliveryStats)> {
        self.set.stats()
    }

    /// Forwards what is already on the bus, then waits for every subscriber queue to empty.
    pub(crate) async fn flush(self) {
        self.stop.cancel();
        let _ = self.listener.await;
        match Arc::try_unwrap(self.set) {
            Ok(set) => set.shutdown().await,
            Err(_) => tracing::warn!("subscriber set still shared; queues not flushed"),
        }
    }
}

//! # LogWriter: structured event logger
//!
//! A minimal subscriber that renders every [`Event`] as a `tracing` record under the
//! `modvisor::events` target. Use it for demos, or as a starting point for your own.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO modvisor::events: module submitted module="billing" id=7
//! INFO modvisor::events: waiting for dependency module="billing" dependency="log(kind=Logger)"
//! INFO modvisor::events: dependency satisfied module="billing" dependency="log(kind=Logger)"
//! INFO modvisor::events: module started module="billing"
//! WARN modvisor::events: module interrupted module="audit" label="bootstrap_dependency_timeout"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let module = e.module.as_deref().unwrap_or("-");
        let dependency = e.dependency.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ModuleSubmitted => {
                info!(target: "modvisor::events", module, id = ?e.module_id, "module submitted");
            }
            EventKind::DependencyWaitStarted => {
                info!(target: "modvisor::events", module, dependency, "waiting for dependency");
            }
            EventKind::DependencyWaitEnded => {
                info!(target: "modvisor::events", module, dependency, "dependency satisfied");
            }
            EventKind::DependencyLost => {
                warn!(target: "modvisor::events", module, dependency, "dependency lost");
            }
            EventKind::ModuleStarted => {
                info!(target: "modvisor::events", module, "module started");
            }
            EventKind::ModuleInterrupted => {
                if e.label == Some("bootstrap_race_aborted") {
                    debug!(target: "modvisor::events", module, reason, "module interrupted");
                } else {
                    warn!(target: "modvisor::events", module, label = ?e.label, reason, "module interrupted");
                }
            }
            EventKind::ModuleStopped => {
                info!(target: "modvisor::events", module, reason, "module stopped");
            }
            EventKind::ShutdownRequested => {
                info!(target: "modvisor::events", "shutdown requested");
            }
            EventKind::AllClosedWithinGrace => {
                info!(target: "modvisor::events", "all modules closed within grace");
            }
            EventKind::GraceExceeded => {
                warn!(target: "modvisor::events", stuck = reason, "grace exceeded");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "modvisor::events", subscriber = module, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                warn!(target: "modvisor::events", subscriber = module, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

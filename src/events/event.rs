//! # Notifications emitted by the extender, orchestrator and trackers.
//!
//! The [`EventKind`] enum classifies notifications across four categories:
//! - **Dependency events**: per-descriptor wait started / ended / lost
//! - **Module events**: submitted, started, interrupted, stopped (one terminal outcome per module)
//! - **Shutdown events**: requested, all closed within grace, grace exceeded
//! - **Subscriber events**: overflow and panic in subscriber workers
//!
//! The [`Event`] struct carries optional metadata such as module name, descriptor,
//! error label and reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use modvisor::{Event, EventKind, ModuleRef};
//!
//! let ev = Event::new(EventKind::DependencyWaitStarted)
//!     .with_module(&ModuleRef::new(3, "billing"))
//!     .with_dependency("log(kind=Logger)");
//!
//! assert_eq!(ev.kind, EventKind::DependencyWaitStarted);
//! assert_eq!(ev.module.as_deref(), Some("billing"));
//! assert_eq!(ev.module_id, Some(3));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::error::BootstrapError;
use crate::modules::ModuleRef;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `module`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `module`: subscriber name
    /// - `reason`: "full" or "closed"
    SubscriberOverflow,

    // === Shutdown events ===
    /// Extender shutdown requested.
    ShutdownRequested,

    /// Every tracked module closed within the configured grace period.
    AllClosedWithinGrace,

    /// Grace period exceeded; some modules did not close in time.
    ///
    /// Sets:
    /// - `reason`: names of the stuck modules
    GraceExceeded,

    // === Dependency events ===
    /// A mandatory descriptor is unsatisfied and the module starts waiting on it.
    ///
    /// Sets:
    /// - `module`, `module_id`
    /// - `dependency`: rendered descriptor
    DependencyWaitStarted,

    /// A mandatory descriptor became satisfied (match count 0 → 1).
    ///
    /// Sets:
    /// - `module`, `module_id`
    /// - `dependency`: rendered descriptor
    DependencyWaitEnded,

    /// A satisfied mandatory descriptor lost its last match (match count → 0).
    ///
    /// Sets:
    /// - `module`, `module_id`
    /// - `dependency`: rendered descriptor
    DependencyLost,

    // === Module events ===
    /// Module accepted for bootstrap.
    ModuleSubmitted,

    /// Module init hook completed; module is `STARTED`.
    ModuleStarted,

    /// Module reached `INTERRUPTED`.
    ///
    /// Sets:
    /// - `module`, `module_id`
    /// - `label`: stable error label
    /// - `reason`: error message
    /// - `timeout_ms`: only for dependency timeouts
    ModuleInterrupted,

    /// Module teardown ran; module is `STOPPED`.
    ///
    /// Sets:
    /// - `reason`: teardown error message, if the hook failed
    ModuleStopped,
}

impl EventKind {
    /// True for the three terminal-outcome notifications of a module.
    pub fn is_module_outcome(&self) -> bool {
        matches!(
            self,
            EventKind::ModuleStarted | EventKind::ModuleInterrupted | EventKind::ModuleStopped
        )
    }
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Module symbolic name (or subscriber name for subscriber events).
    pub module: Option<Arc<str>>,
    /// Module id.
    pub module_id: Option<u64>,
    /// Rendered dependency descriptor.
    pub dependency: Option<Arc<str>>,
    /// Stable error label.
    pub label: Option<&'static str>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Dependency timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            module: None,
            module_id: None,
            dependency: None,
            label: None,
            reason: None,
            timeout_ms: None,
        }
    }

    /// Attaches module name and id.
    #[inline]
    pub fn with_module(mut self, module: &ModuleRef) -> Self {
        self.module = Some(module.name_arc());
        self.module_id = Some(module.id().0);
        self
    }

    /// Attaches a rendered dependency descriptor.
    #[inline]
    pub fn with_dependency(mut self, dependency: impl Into<Arc<str>>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches label and message of a bootstrap failure.
    #[inline]
    pub fn with_error(mut self, err: &BootstrapError) -> Self {
        self.label = Some(err.as_label());
        self.reason = Some(err.to_string().into());
        if let BootstrapError::DependencyTimeout { timeout, .. } = err {
            self = self.with_timeout(*timeout);
        }
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow).with_reason(reason);
        ev.module = Some(subscriber.into());
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.module = Some(subscriber.into());
        ev
    }

    /// True if this event concerns module `id`.
    #[inline]
    pub fn is_for(&self, id: u64) -> bool {
        self.module_id == Some(id)
    }
}

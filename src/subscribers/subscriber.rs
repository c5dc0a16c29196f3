//! # Subscriber contract.
//!
//! A [`Subscribe`] implementation observes extender notifications: submitted modules,
//! dependency waits, started/interrupted/stopped outcomes and shutdown progress.
//! It runs on its own worker behind a bounded queue owned by the
//! [`SubscriberSet`](crate::SubscriberSet), so a slow or panicking subscriber never
//! delays a bootstrap.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use modvisor::{Event, EventKind, Subscribe};
//!
//! struct Outcomes;
//!
//! #[async_trait]
//! impl Subscribe for Outcomes {
//!     async fn on_event(&self, ev: &Event) {
//!         // forward ev.module / ev.label to an audit log...
//!         let _ = ev;
//!     }
//!     fn name(&self) -> &'static str { "outcomes" }
//!     fn accepts(&self, kind: EventKind) -> bool { kind.is_module_outcome() }
//! }
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Observer of extender notifications.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one notification. Called sequentially, in publish order.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and in overflow/panic notifications.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Capacity of this subscriber's queue (at least 1).
    fn queue_capacity(&self) -> usize {
        1024
    }

    /// Whether notifications of `kind` should be queued for this subscriber.
    ///
    /// Rejected kinds never take queue space.
    fn accepts(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }
}

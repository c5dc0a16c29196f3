//! Runtime notifications: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] notification classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `DependencyTracker` (per-descriptor wait events),
//!   `BootstrapOrchestrator` (module outcomes), `ExtenderController` (shutdown),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the extender's subscriber listener (fans out to
//!   `SubscriberSet`) and any receiver obtained from `Bus::subscribe`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

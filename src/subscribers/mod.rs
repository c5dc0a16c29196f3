//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out used
//! by the extender to deliver notifications published on the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Orchestrator ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                                      │
//!                                                          ┌───────────┼──────────┐
//!                                                          ▼           ▼          ▼
//!                                                      LogWriter    Metrics    Custom
//! ```

mod feed;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
mod embedded;

pub(crate) use feed::SubscriberFeed;
pub use subscriber::Subscribe;
pub use subscriber_set::{DeliveryStats, SubscriberSet};

#[cfg(feature = "logging")]
pub use embedded::LogWriter;

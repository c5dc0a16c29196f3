//! Capability registry contract.
//!
//! The registry is an external collaborator: the extender only depends on the
//! [`CapabilityRegistry`] trait. [`MemoryRegistry`] is an in-process
//! implementation suitable for embedding and for tests.
//!
//! ## Contents
//! - [`Filter`] boolean attribute predicate (equality / presence / and / or / not)
//! - [`CapabilityRef`], [`CapabilityEvent`] value types
//! - [`CapabilityListener`] callback for change events
//! - [`MemoryRegistry`] reference implementation

mod capability;
mod filter;
mod memory;

use std::sync::Arc;

pub use capability::{
    Attributes, CapabilityEvent, CapabilityEventKind, CapabilityId, CapabilityListener,
    CapabilityRef, SubscriptionId,
};
pub use filter::Filter;
pub use memory::MemoryRegistry;

use crate::modules::ModuleId;

/// Shared, dynamic, queryable and subscribable registry of published capabilities.
pub trait CapabilityRegistry: Send + Sync + 'static {
    /// Publishes a capability on behalf of `exporter`.
    fn register(&self, exporter: ModuleId, attributes: Attributes, ranking: i32) -> CapabilityId;

    /// Withdraws a capability. Returns `false` if it was not registered.
    fn unregister(&self, id: CapabilityId) -> bool;

    /// Replaces a capability's attributes. Returns `false` if it was not registered.
    fn modify(&self, id: CapabilityId, attributes: Attributes) -> bool;

    /// Capabilities matching `filter`, ordered by ranking (desc) then id (asc).
    fn query(&self, filter: &Filter) -> Vec<CapabilityRef>;

    /// Every registered capability, in the same order as [`query`](Self::query).
    fn snapshot(&self) -> Vec<CapabilityRef> {
        self.query(&Filter::any())
    }

    /// Installs a listener for changes to capabilities matching `filter`.
    fn subscribe(&self, filter: Filter, listener: Arc<dyn CapabilityListener>) -> SubscriptionId;

    /// Removes a listener. Returns `false` if the handle was unknown.
    fn unsubscribe(&self, handle: SubscriptionId) -> bool;

    /// Records that `user` is using capability `id`.
    fn acquire(&self, id: CapabilityId, user: ModuleId) -> bool;

    /// Drops one use of capability `id` by `user`.
    fn release(&self, id: CapabilityId, user: ModuleId) -> bool;

    /// Drops every use held by `user`.
    fn release_all(&self, user: ModuleId);
}

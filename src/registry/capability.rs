//! Capability value types shared by the registry, the tracker and the sequencer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::modules::ModuleId;

/// Attribute map published with a capability.
pub type Attributes = BTreeMap<String, String>;

/// Registry-assigned capability identity (unique for the registry's lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityId(pub u64);

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cap#{}", self.0)
    }
}

/// Handle returned by [`CapabilityRegistry::subscribe`](super::CapabilityRegistry::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Read-only view of one published capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityRef {
    /// Registry-assigned id.
    pub id: CapabilityId,
    /// Ranking (higher is preferred).
    pub ranking: i32,
    /// Module that published the capability.
    pub exporter: ModuleId,
    /// Published attributes.
    pub attributes: Arc<Attributes>,
    /// Modules currently using the capability.
    pub using: BTreeSet<ModuleId>,
}

/// Kind of registry change delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityEventKind {
    /// A capability was published.
    Registered,
    /// A capability's attributes changed and it still matches the listener's filter.
    Modified,
    /// A capability's attributes changed and it no longer matches the listener's filter.
    ModifiedEndMatch,
    /// A capability is about to be withdrawn.
    Unregistering,
}

/// One registry change.
#[derive(Debug, Clone)]
pub struct CapabilityEvent {
    pub kind: CapabilityEventKind,
    pub capability: CapabilityRef,
}

impl CapabilityEvent {
    /// True for events after which the capability is (still) available.
    pub fn is_arrival(&self) -> bool {
        matches!(
            self.kind,
            CapabilityEventKind::Registered | CapabilityEventKind::Modified
        )
    }
}

/// Receiver of registry change events.
///
/// Called synchronously from the thread that mutated the registry. Implementations
/// must not block and must not mutate the registry from inside the callback
/// (except `unsubscribe`).
pub trait CapabilityListener: Send + Sync + 'static {
    fn on_capability_event(&self, event: &CapabilityEvent);
}

impl<F> CapabilityListener for F
where
    F: Fn(&CapabilityEvent) + Send + Sync + 'static,
{
    fn on_capability_event(&self, event: &CapabilityEvent) {
        (self)(event)
    }
}

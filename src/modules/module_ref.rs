//! Host-provided module identity and lifecycle events.

use std::fmt;
use std::sync::Arc;

/// Stable module identity for the module's lifetime in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Module identity plus its symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    id: ModuleId,
    name: Arc<str>,
}

impl ModuleRef {
    pub fn new(id: u64, name: impl Into<Arc<str>>) -> Self {
        Self {
            id: ModuleId(id),
            name: name.into(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.id)
    }
}

/// Lifecycle transitions reported by the host's module watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Installed,
    Resolved,
    Started,
    Stopping,
    Unresolved,
}

/// One host lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub module: ModuleRef,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, module: ModuleRef) -> Self {
        Self { kind, module }
    }
}

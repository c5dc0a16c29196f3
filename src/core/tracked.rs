//! # TrackedModules: the extender's owned set of live module bootstraps.
//!
//! One entry per submitted module, keyed by [`ModuleId`]. Created by the builder,
//! emptied as shutdown closes each module. All operations are synchronous so host lifecycle callbacks
//! can use them without a runtime context.
//!
//! ## Rules
//! - At most one entry per module id; a second insert is rejected.
//! - Removing a module does not close it; the caller owns the returned handle.
//! - Listings are sorted by module id.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::core::ModuleHandle;
use crate::error::ExtenderError;
use crate::modules::{ModuleId, ModuleRef};

/// Registry of modules currently tracked by the extender.
#[derive(Default)]
pub struct TrackedModules {
    modules: RwLock<BTreeMap<ModuleId, ModuleHandle>>,
}

impl TrackedModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle; fails if its module id is already tracked.
    pub fn insert(&self, handle: ModuleHandle) -> Result<(), ExtenderError> {
        let mut modules = self.modules.write().unwrap_or_else(PoisonError::into_inner);
        let id = handle.id();
        if modules.contains_key(&id) {
            return Err(ExtenderError::AlreadyTracked {
                module: handle.module().name().to_string(),
                id: id.0,
            });
        }
        modules.insert(id, handle);
        Ok(())
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.read(|m| m.contains_key(&id))
    }

    pub fn get(&self, id: ModuleId) -> Option<ModuleHandle> {
        self.read(|m| m.get(&id).cloned())
    }

    /// Atomically removes and returns the handle of `id`.
    pub fn remove(&self, id: ModuleId) -> Option<ModuleHandle> {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Sorted ids of tracked modules.
    pub fn ids(&self) -> Vec<ModuleId> {
        self.read(|m| m.keys().copied().collect())
    }

    /// Identities of tracked modules, sorted by id.
    pub fn modules(&self) -> Vec<ModuleRef> {
        self.read(|m| m.values().map(|h| h.module().clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.read(BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read(BTreeMap::is_empty)
    }

    fn read<R>(&self, f: impl FnOnce(&BTreeMap<ModuleId, ModuleHandle>) -> R) -> R {
        f(&self.modules.read().unwrap_or_else(PoisonError::into_inner))
    }
}

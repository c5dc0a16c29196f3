//! # Module model.
//!
//! This module provides the value types describing a deployable module:
//! - [`ModuleRef`] / [`ModuleId`] - host-provided identity
//! - [`DependencyDescriptor`] - one required capability
//! - [`ModuleSpec`] - descriptors plus typed init/teardown hooks
//! - [`HookContext`] - explicit call context handed to hooks
//! - [`ModuleSource`] - configuration-loader contract
//! - [`LifecycleEvent`] - host lifecycle notifications

mod descriptor;
mod hook;
mod module_ref;
mod spec;

pub use descriptor::DependencyDescriptor;
pub use hook::{BoxHookFuture, Hook, HookContext};
pub use module_ref::{LifecycleEvent, LifecycleKind, ModuleId, ModuleRef};
pub use spec::{ModuleSpec, ModuleSpecBuilder};

pub(crate) use hook::Resources;

use crate::error::ConfigurationError;

/// Configuration loader: turns a started host module into a [`ModuleSpec`].
///
/// Returns `Ok(None)` for modules the extender should ignore.
pub trait ModuleSource: Send + Sync + 'static {
    fn load(&self, module: &ModuleRef) -> Result<Option<ModuleSpec>, ConfigurationError>;
}

impl<F> ModuleSource for F
where
    F: Fn(&ModuleRef) -> Result<Option<ModuleSpec>, ConfigurationError> + Send + Sync + 'static,
{
    fn load(&self, module: &ModuleRef) -> Result<Option<ModuleSpec>, ConfigurationError> {
        (self)(module)
    }
}

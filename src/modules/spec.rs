//! # Module specification.
//!
//! [`ModuleSpec`] is what the configuration loader hands to the extender for one
//! qualifying module: its identity, ordered dependency descriptors, typed
//! init/teardown hooks and an optional per-module dependency timeout.
//!
//! ## Example
//! ```rust
//! use modvisor::{DependencyDescriptor, ModuleRef, ModuleSpec};
//! use std::time::Duration;
//!
//! let spec = ModuleSpec::builder(ModuleRef::new(7, "billing"))
//!     .dependency(DependencyDescriptor::mandatory("log", "(kind=Logger)").unwrap())
//!     .timeout(Duration::from_secs(30))
//!     .on_init(|ctx| async move {
//!         ctx.register([("kind".to_string(), "Billing".to_string())].into(), 0);
//!         Ok(())
//!     })
//!     .build();
//!
//! assert_eq!(spec.module().name(), "billing");
//! assert_eq!(spec.mandatory_count(), 1);
//! ```

use std::future::Future;
use std::time::Duration;

use crate::error::{ConfigurationError, ModuleError};
use crate::modules::descriptor::{self, DependencyDescriptor};
use crate::modules::hook::{self, Hook, HookContext};
use crate::modules::ModuleRef;

/// Everything the extender needs to bootstrap one module.
#[derive(Clone)]
pub struct ModuleSpec {
    module: ModuleRef,
    descriptors: Vec<DependencyDescriptor>,
    timeout: Option<Duration>,
    wait_for_dependencies: bool,
    init: Hook,
    teardown: Hook,
}

impl ModuleSpec {
    /// Starts building a spec for `module`.
    pub fn builder(module: ModuleRef) -> ModuleSpecBuilder {
        ModuleSpecBuilder::new(module)
    }

    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// Declared descriptors, in declaration order.
    pub fn descriptors(&self) -> &[DependencyDescriptor] {
        &self.descriptors
    }

    /// Number of mandatory descriptors.
    pub fn mandatory_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.is_mandatory()).count()
    }

    /// Module-declared dependency timeout (overrides the extender default).
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the module waits for missing mandatory dependencies.
    pub fn waits_for_dependencies(&self) -> bool {
        self.wait_for_dependencies
    }

    pub(crate) fn init_hook(&self) -> &Hook {
        &self.init
    }

    pub(crate) fn teardown_hook(&self) -> &Hook {
        &self.teardown
    }

    /// Validates the descriptor list.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        descriptor::validate(self.module.name(), &self.descriptors)
    }
}

/// Fluent builder for [`ModuleSpec`].
pub struct ModuleSpecBuilder {
    module: ModuleRef,
    descriptors: Vec<DependencyDescriptor>,
    timeout: Option<Duration>,
    wait_for_dependencies: bool,
    init: Option<Hook>,
    teardown: Option<Hook>,
}

impl ModuleSpecBuilder {
    pub fn new(module: ModuleRef) -> Self {
        Self {
            module,
            descriptors: Vec::new(),
            timeout: None,
            wait_for_dependencies: true,
            init: None,
            teardown: None,
        }
    }

    pub fn dependency(mut self, descriptor: DependencyDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn dependencies(mut self, descriptors: impl IntoIterator<Item = DependencyDescriptor>) -> Self {
        self.descriptors.extend(descriptors);
        self
    }

    /// Per-module dependency timeout. `0s` waits forever.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// When `false`, unsatisfied mandatory dependencies at submit time interrupt the
    /// module immediately instead of waiting for them.
    pub fn wait_for_dependencies(mut self, wait: bool) -> Self {
        self.wait_for_dependencies = wait;
        self
    }

    pub fn on_init<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
    {
        self.init = Some(hook::hook(f));
        self
    }

    pub fn on_teardown<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
    {
        self.teardown = Some(hook::hook(f));
        self
    }

    pub fn build(self) -> ModuleSpec {
        ModuleSpec {
            module: self.module,
            descriptors: self.descriptors,
            timeout: self.timeout,
            wait_for_dependencies: self.wait_for_dependencies,
            init: self.init.unwrap_or_else(hook::noop),
            teardown: self.teardown.unwrap_or_else(hook::noop),
        }
    }
}

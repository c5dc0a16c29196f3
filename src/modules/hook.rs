//! # Typed lifecycle hooks.
//!
//! A module supplies its init and teardown logic as closures
//! `Fn(HookContext) -> Future<Output = Result<(), ModuleError>>`. Each invocation
//! creates a fresh future, the same way a function-backed task does.
//!
//! [`HookContext`] is the explicit call context handed to a hook: the module's
//! identity, a [`CancellationToken`] signalled when the extender wants the hook to
//! stop early, and registry helpers that record what the module publishes and uses
//! so that those resources are released when the module is interrupted or stopped.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::ModuleError;
use crate::modules::ModuleRef;
use crate::registry::{Attributes, CapabilityId, CapabilityRegistry};

/// Boxed future returned by a hook.
pub type BoxHookFuture = Pin<Box<dyn Future<Output = Result<(), ModuleError>> + Send + 'static>>;

/// Shared hook closure.
pub type Hook = Arc<dyn Fn(HookContext) -> BoxHookFuture + Send + Sync + 'static>;

/// Wraps a closure into a [`Hook`].
pub(crate) fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
{
    Arc::new(move |ctx: HookContext| -> BoxHookFuture { Box::pin(f(ctx)) })
}

/// Hook that does nothing.
pub(crate) fn noop() -> Hook {
    hook(|_ctx| async { Ok(()) })
}

/// Registry resources held by one module.
#[derive(Default)]
pub(crate) struct Resources {
    exported: Mutex<Vec<CapabilityId>>,
    acquired: Mutex<Vec<CapabilityId>>,
}

impl Resources {
    pub(crate) fn exported(&self) -> Vec<CapabilityId> {
        self.exported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unregisters exported capabilities and drops every use held by `module`.
    pub(crate) fn release(&self, registry: &dyn CapabilityRegistry, module: &ModuleRef) {
        let exported = std::mem::take(&mut *self.exported.lock().unwrap_or_else(PoisonError::into_inner));
        let acquired = std::mem::take(&mut *self.acquired.lock().unwrap_or_else(PoisonError::into_inner));
        for id in acquired {
            registry.release(id, module.id());
        }
        for id in exported {
            registry.unregister(id);
        }
    }
}

/// Call context passed to init and teardown hooks.
#[derive(Clone)]
pub struct HookContext {
    module: ModuleRef,
    token: CancellationToken,
    registry: Arc<dyn CapabilityRegistry>,
    resources: Arc<Resources>,
}

impl HookContext {
    pub(crate) fn new(
        module: ModuleRef,
        token: CancellationToken,
        registry: Arc<dyn CapabilityRegistry>,
        resources: Arc<Resources>,
    ) -> Self {
        Self {
            module,
            token,
            registry,
            resources,
        }
    }

    /// Identity of the module being initialized or torn down.
    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// Token cancelled when the extender interrupts this hook.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Direct access to the registry (untracked).
    pub fn registry(&self) -> &Arc<dyn CapabilityRegistry> {
        &self.registry
    }

    /// Publishes a capability exported by this module.
    ///
    /// The capability is withdrawn automatically when the module is interrupted or stopped.
    pub fn register(&self, attributes: Attributes, ranking: i32) -> CapabilityId {
        let id = self.registry.register(self.module.id(), attributes, ranking);
        self.resources
            .exported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        id
    }

    /// Marks this module as a user of capability `id`.
    ///
    /// The use is dropped automatically when the module is interrupted or stopped.
    pub fn acquire(&self, id: CapabilityId) -> bool {
        if !self.registry.acquire(id, self.module.id()) {
            return false;
        }
        self.resources
            .acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        true
    }
}

//! # ExtenderController: host-facing glue.
//!
//! The controller reacts to host lifecycle events, keeps the [`TrackedModules`]
//! registry, submits modules to the [`BootstrapOrchestrator`] and closes them in the
//! order computed by the [`ShutdownSequencer`].
//!
//! ## Architecture
//! ```text
//! host watcher ── handle(LifecycleEvent) ──► ExtenderController
//!                    │ Started  → ModuleSource::load → submit → TrackedModules
//!                    │ Stopping → TrackedModules::remove → close (background)
//!                    └ others   → ignored
//!
//! shutdown():
//!   reject submits ─► ShutdownRequested
//!   loop until TrackedModules is empty (bounded by cfg.grace):
//!     order = sequencer.compute(tracked)
//!     close each module strictly in order, awaiting in-flight init
//!   ├─ done    → AllClosedWithinGrace, flush subscriber queues
//!   └─ timeout → GraceExceeded + ExtenderError::GraceExceeded { stuck }
//!                (stuck modules stay tracked and keep closing in the background)
//! ```
//!
//! ## Rules
//! - `handle` is synchronous, never blocks and never surfaces an error to the host.
//! - After `shutdown` begins every `submit` fails with `ExtenderError::ShuttingDown`;
//!   a submit that raced past the check is closed again before it returns.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use modvisor::{
//!     ConfigurationError, DependencyDescriptor, ExtenderBuilder, ExtenderConfig, LifecycleEvent, LifecycleKind,
//!     MemoryRegistry, ModuleRef, ModuleSpec, ModuleState,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MemoryRegistry::shared();
//!     let ext = ExtenderBuilder::new(ExtenderConfig::default())
//!         .with_registry(registry.clone())
//!         .with_source(|m: &ModuleRef| -> Result<Option<ModuleSpec>, ConfigurationError> {
//!             let spec = ModuleSpec::builder(m.clone())
//!                 .dependency(DependencyDescriptor::mandatory("log", "(kind=Logger)")?)
//!                 .build();
//!             Ok(Some(spec))
//!         })
//!         .build();
//!
//!     ext.handle(LifecycleEvent::new(LifecycleKind::Started, ModuleRef::new(1, "billing")));
//!     let billing = ext.tracked().get(modvisor::ModuleId(1)).expect("tracked");
//!     assert_eq!(billing.state(), ModuleState::ResolvingDependencies);
//!
//!     ext.shutdown().await?;
//!     assert_eq!(billing.state(), ModuleState::Interrupted);
//!     Ok(())
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::core::{
    BootstrapOrchestrator, ExtenderConfig, ModuleHandle, ShutdownSequencer, TrackedModules, shutdown,
};
use crate::error::{BootstrapError, ConfigurationError, ExtenderError};
use crate::events::{Bus, Event, EventKind};
use crate::modules::{LifecycleEvent, LifecycleKind, ModuleId, ModuleRef, ModuleSource, ModuleSpec};
use crate::registry::CapabilityRegistry;
use crate::subscribers::{DeliveryStats, SubscriberFeed};

/// Process-wide coordinator of module bootstrap and shutdown.
pub struct ExtenderController {
    cfg: ExtenderConfig,
    bus: Bus,
    orchestrator: BootstrapOrchestrator,
    sequencer: ShutdownSequencer,
    tracked: TrackedModules,
    source: Option<Arc<dyn ModuleSource>>,
    feed: Mutex<Option<SubscriberFeed>>,
    shutting_down: AtomicBool,
}

impl ExtenderController {
    pub(crate) fn new_internal(
        cfg: ExtenderConfig,
        bus: Bus,
        orchestrator: BootstrapOrchestrator,
        sequencer: ShutdownSequencer,
        tracked: TrackedModules,
        source: Option<Arc<dyn ModuleSource>>,
        feed: Option<SubscriberFeed>,
    ) -> Self {
        Self {
            cfg,
            bus,
            orchestrator,
            sequencer,
            tracked,
            source,
            feed: Mutex::new(feed),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ExtenderConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &Arc<dyn CapabilityRegistry> {
        self.orchestrator.registry()
    }

    /// Receiver observing every subsequent notification.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Modules currently tracked.
    pub fn tracked(&self) -> &TrackedModules {
        &self.tracked
    }

    /// Delivery counters of the configured subscribers (empty once shutdown flushed them).
    pub fn subscriber_stats(&self) -> Vec<(&'static str, DeliveryStats)> {
        self.feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(SubscriberFeed::stats)
            .unwrap_or_default()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Host lifecycle callback.
    pub fn handle(&self, event: LifecycleEvent) {
        let module = event.module;
        match event.kind {
            LifecycleKind::Started => self.on_started(module),
            LifecycleKind::Stopping => {
                if !self.request_close(module.id()) {
                    tracing::trace!(module = %module, "stopping module is not tracked");
                }
            }
            kind => tracing::trace!(module = %module, ?kind, "lifecycle event ignored"),
        }
    }

    fn on_started(&self, module: ModuleRef) {
        if self.is_shutting_down() {
            tracing::debug!(module = %module, "module started during shutdown; ignored");
            return;
        }
        let Some(source) = &self.source else {
            tracing::trace!(module = %module, "no module source configured");
            return;
        };
        match source.load(&module) {
            Ok(Some(spec)) => {
                if let Err(e) = self.submit(spec) {
                    tracing::debug!(module = %module, error = %e, "module not submitted");
                }
            }
            Ok(None) => tracing::trace!(module = %module, "module has no dependency configuration"),
            Err(e) => self.report_configuration(&module, e),
        }
    }

    /// Submits a module for bootstrap and tracks it.
    pub fn submit(&self, spec: ModuleSpec) -> Result<ModuleHandle, ExtenderError> {
        if self.is_shutting_down() {
            return Err(ExtenderError::ShuttingDown);
        }
        let module = spec.module().clone();
        if self.tracked.contains(module.id()) {
            return Err(ExtenderError::AlreadyTracked {
                module: module.name().to_string(),
                id: module.id().0,
            });
        }

        let handle = match self.orchestrator.submit(spec) {
            Ok(h) => h,
            Err(e) => {
                self.report_configuration(&module, e.clone());
                return Err(e.into());
            }
        };
        self.track(handle)
    }

    fn track(&self, handle: ModuleHandle) -> Result<ModuleHandle, ExtenderError> {
        if let Err(e) = self.tracked.insert(handle.clone()) {
            self.orchestrator.request_close(&handle);
            return Err(e);
        }
        // Shutdown may have swept the tracked set between the first check and the insert.
        if self.is_shutting_down() {
            if let Some(h) = self.tracked.remove(handle.id()) {
                self.orchestrator.request_close(&h);
            }
            return Err(ExtenderError::ShuttingDown);
        }
        Ok(handle)
    }

    /// Stops tracking `id` and closes it in the background.
    ///
    /// Returns `false` if the module was not tracked.
    pub fn request_close(&self, id: ModuleId) -> bool {
        match self.tracked.remove(id) {
            Some(handle) => {
                self.orchestrator.request_close(&handle);
                true
            }
            None => false,
        }
    }

    /// Stops tracking `id` and closes it, returning once the module is terminal.
    pub async fn close(&self, id: ModuleId) -> bool {
        match self.tracked.remove(id) {
            Some(handle) => {
                self.orchestrator.close(&handle).await;
                true
            }
            None => false,
        }
    }

    /// Close order over `ids`. Untracked ids are ordered as modules with no relations.
    pub fn compute_shutdown_order(&self, ids: &[ModuleId]) -> Vec<ModuleId> {
        let modules: Vec<ModuleRef> = ids
            .iter()
            .map(|&id| match self.tracked.get(id) {
                Some(h) => h.module().clone(),
                None => ModuleRef::new(id.0, ""),
            })
            .collect();
        self.sequencer.compute(&modules)
    }

    /// Closes every tracked module in dependency order, bounded by `cfg.grace`.
    pub async fn shutdown(&self) -> Result<(), ExtenderError> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown already in progress");
        }
        tracing::info!(tracked = self.tracked.len(), grace = ?self.cfg.grace, "extender shutting down");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));

        let grace = self.cfg.grace;
        match tokio::time::timeout(grace, self.close_all()).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllClosedWithinGrace));
                tracing::info!("all modules closed within grace");
                let feed = self.feed.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(feed) = feed {
                    feed.flush().await;
                }
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<String> = self
                    .tracked
                    .modules()
                    .iter()
                    .map(|m| m.name().to_string())
                    .collect();
                tracing::warn!(?stuck, "shutdown grace exceeded");
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(",")));
                Err(ExtenderError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Waits for an OS termination signal, then runs [`shutdown`](Self::shutdown).
    pub async fn run_until_signal(&self) -> Result<(), ExtenderError> {
        match shutdown::wait_for_termination().await {
            Ok(signal) => tracing::info!(signal, "termination signal received"),
            Err(e) => tracing::warn!(error = %e, "failed to listen for termination signals"),
        }
        self.shutdown().await
    }

    /// Closes modules one at a time in sequencer order until none are tracked.
    ///
    /// A module leaves the tracked set only after it is terminal, so an overrun reports it
    /// as stuck.
    async fn close_all(&self) {
        loop {
            let modules = self.tracked.modules();
            if modules.is_empty() {
                return;
            }
            for id in self.sequencer.compute(&modules) {
                let Some(handle) = self.tracked.get(id) else {
                    continue;
                };
                self.orchestrator.close(&handle).await;
                self.tracked.remove(id);
            }
        }
    }

    fn report_configuration(&self, module: &ModuleRef, err: ConfigurationError) {
        let err = BootstrapError::Configuration(err);
        tracing::error!(module = %module, error = %err, "module configuration rejected");
        self.bus
            .publish(Event::new(EventKind::ModuleInterrupted).with_module(module).with_error(&err));
    }
}

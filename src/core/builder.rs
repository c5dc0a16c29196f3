use std::sync::Arc;

use tokio::runtime::Handle;

use crate::core::{
    BootstrapOrchestrator, ExtenderConfig, ExtenderController, ShutdownSequencer, TrackedModules,
};
use crate::events::Bus;
use crate::modules::ModuleSource;
use crate::registry::{CapabilityRegistry, MemoryRegistry};
use crate::subscribers::{Subscribe, SubscriberFeed, SubscriberSet};

/// Builder for an [`ExtenderController`].
pub struct ExtenderBuilder {
    cfg: ExtenderConfig,
    registry: Option<Arc<dyn CapabilityRegistry>>,
    source: Option<Arc<dyn ModuleSource>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl ExtenderBuilder {
    pub fn new(cfg: ExtenderConfig) -> Self {
        Self {
            cfg,
            registry: None,
            source: None,
            subscribers: Vec::new(),
        }
    }

    /// Capability registry shared with the modules.
    ///
    /// Defaults to a fresh [`MemoryRegistry`].
    pub fn with_registry(mut self, registry: Arc<dyn CapabilityRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Configuration loader consulted when the host reports a started module.
    pub fn with_source(mut self, source: impl ModuleSource) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive every bus event through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the extender.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime; the runtime handle is stored and used
    /// for all background work started from host callbacks.
    pub fn build(self) -> Arc<ExtenderController> {
        let runtime = Handle::current();
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let registry: Arc<dyn CapabilityRegistry> = match self.registry {
            Some(registry) => registry,
            None => MemoryRegistry::shared(),
        };

        let feed = (!self.subscribers.is_empty()).then(|| {
            let set = SubscriberSet::new(self.subscribers, bus.clone(), &runtime);
            SubscriberFeed::spawn(&runtime, &bus, set)
        });

        let orchestrator = BootstrapOrchestrator::new(Arc::clone(&registry), bus.clone(), runtime, &self.cfg);
        let sequencer = ShutdownSequencer::new(registry);

        Arc::new(ExtenderController::new_internal(
            self.cfg,
            bus,
            orchestrator,
            sequencer,
            TrackedModules::new(),
            self.source,
            feed,
        ))
    }
}

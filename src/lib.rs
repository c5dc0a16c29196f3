//! # modvisor
//!
//! **Modvisor** coordinates the bootstrap and shutdown of modules in a modular runtime.
//!
//! When the host reports that a module started, the extender loads the module's
//! declared dependencies, waits until matching capabilities exist in a shared
//! [`CapabilityRegistry`] (or a deadline expires), and only then runs the module's
//! init callable. On shutdown it closes the active modules in a deterministic order
//! in which consumers close before the providers they use.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  host lifecycle watcher                 configuration loader
//!  (Started / Stopping / ...)             (ModuleSource → ModuleSpec)
//!            │                                      │
//!            ▼                                      ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ExtenderController                                               │
//! │  - TrackedModules (owned registry of live bootstraps)             │
//! │  - BootstrapOrchestrator (submit / close)                         │
//! │  - ShutdownSequencer (close order from a registry snapshot)       │
//! │  - Bus (broadcast notifications)                                  │
//! └──────┬──────────────────────────────┬─────────────────────────────┘
//!        ▼                              ▼
//! ┌──────────────────┐        ┌────────────────────┐
//! │ DependencyTracker│◄──────►│ CapabilityRegistry │  query / subscribe
//! │  (per module)    │ events │  (MemoryRegistry)  │  register / acquire
//! └────────┬─────────┘        └────────────────────┘
//!          │ completion (exactly once)
//!          ▼
//! ┌──────────────────┐  CAS transitions   ┌─────────────────────┐
//! │ModuleStateMachine│◄───────────────────│ completion / timer /│
//! │  (per module)    │                    │ close (racing)      │
//! └────────┬─────────┘                    └─────────────────────┘
//!          ▼
//!   init / teardown hooks (HookContext)
//! ```
//!
//! ### Lifecycle
//! ```text
//! INITIALIZED ─┬─► RESOLVING_DEPENDENCIES ─┬─► DEPENDENCIES_RESOLVED ─┬─► STARTED ─► STOPPED
//!              │                           │                          │
//!              └─► DEPENDENCIES_RESOLVED   └─► INTERRUPTED            └─► INTERRUPTED
//!                  (nothing to wait for)       (timeout / close)          (init error / close)
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                                 |
//! |-------------------|----------------------------------------------------------------|----------------------------------------------------|
//! | **Extender**      | Host glue, tracked modules, ordered shutdown.                  | [`ExtenderController`], [`ExtenderBuilder`]        |
//! | **Bootstrap**     | Dependency waits, deadlines, init/teardown, close races.       | [`BootstrapOrchestrator`], [`ModuleHandle`]        |
//! | **Dependencies**  | Per-module tracking of mandatory capabilities.                 | [`DependencyTracker`], [`DependencyDescriptor`]    |
//! | **Shutdown order**| Deterministic order over a possibly cyclic usage graph.        | [`ShutdownSequencer`]                              |
//! | **Registry**      | Capability registry contract and in-memory implementation.     | [`CapabilityRegistry`], [`MemoryRegistry`], [`Filter`] |
//! | **Subscriber API**| Observe notifications (logging, metrics, tests).               | [`Subscribe`], [`Event`], [`EventKind`]            |
//! | **Errors**        | Typed errors for configuration, bootstrap and the extender.    | [`BootstrapError`], [`ExtenderError`]              |
//! | **Configuration** | Centralized runtime settings.                                  | [`ExtenderConfig`]                                 |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use modvisor::{
//!     DependencyDescriptor, ExtenderBuilder, ExtenderConfig, MemoryRegistry, ModuleId,
//!     ModuleRef, ModuleSpec, ModuleState,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MemoryRegistry::shared();
//!     let ext = ExtenderBuilder::new(ExtenderConfig::default())
//!         .with_registry(registry.clone())
//!         .build();
//!
//!     // A module that needs a logger before it can start.
//!     let billing = ext.submit(
//!         ModuleSpec::builder(ModuleRef::new(2, "billing"))
//!             .dependency(DependencyDescriptor::mandatory("log", "(kind=Logger)")?)
//!             .build(),
//!     )?;
//!     assert_eq!(billing.state(), ModuleState::ResolvingDependencies);
//!
//!     // The logger module publishes its capability from its init hook.
//!     let logger = ext.submit(
//!         ModuleSpec::builder(ModuleRef::new(1, "logger"))
//!             .on_init(|ctx| async move {
//!                 ctx.register([("kind".to_string(), "Logger".to_string())].into(), 5);
//!                 Ok(())
//!             })
//!             .build(),
//!     )?;
//!
//!     billing.wait_until(|s| s == ModuleState::Started).await;
//!     logger.wait_until(|s| s == ModuleState::Started).await;
//!
//!     let order = ext.compute_shutdown_order(&[ModuleId(1), ModuleId(2)]);
//!     assert_eq!(order.len(), 2);
//!
//!     ext.shutdown().await?;
//!     assert_eq!(billing.state(), ModuleState::Stopped);
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod modules;
mod registry;
mod subscribers;

// ---- Public re-exports ----

pub use crate::core::{
    BootstrapOrchestrator, DependencyTracker, ExtenderBuilder, ExtenderConfig, ExtenderController,
    ModuleHandle, ModuleState, ModuleStateMachine, ShutdownSequencer, TrackedModules,
    wait_for_termination,
};
pub use error::{BootstrapError, ConfigurationError, ExtenderError, ModuleError};
pub use events::{Bus, Event, EventKind};
pub use modules::{
    BoxHookFuture, DependencyDescriptor, Hook, HookContext, LifecycleEvent, LifecycleKind, ModuleId,
    ModuleRef, ModuleSource, ModuleSpec, ModuleSpecBuilder,
};
pub use registry::{
    Attributes, CapabilityEvent, CapabilityEventKind, CapabilityId, CapabilityListener,
    CapabilityRef, CapabilityRegistry, Filter, MemoryRegistry, SubscriptionId,
};
pub use subscribers::{DeliveryStats, Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;

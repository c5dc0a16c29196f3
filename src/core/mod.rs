//! Runtime core: dependency tracking, bootstrap and shutdown ordering.
//!
//! Public entry point is [`ExtenderController`], built with [`ExtenderBuilder`].
//! The building blocks are public as well so embedders can drive them directly.
//!
//! Modules:
//! - [`state`]: module state machine with compare-and-set transitions;
//! - [`tracker`]: per-module dependency tracking against the capability registry;
//! - [`orchestrator`]: drives one module to `STARTED` or to a reported failure;
//! - [`sequencer`]: deterministic close order over active modules;
//! - [`tracked`]: owned registry of tracked modules;
//! - [`extender`]: host lifecycle glue and whole-extender shutdown;
//! - [`shutdown`]: cross-platform termination signal handling.

mod builder;
mod config;
mod extender;
mod orchestrator;
mod sequencer;
mod shutdown;
mod state;
mod tracked;
mod tracker;

pub use builder::ExtenderBuilder;
pub use config::ExtenderConfig;
pub use extender::ExtenderController;
pub use orchestrator::{BootstrapOrchestrator, ModuleHandle};
pub use sequencer::ShutdownSequencer;
pub use shutdown::wait_for_termination;
pub use state::{ModuleState, ModuleStateMachine};
pub use tracked::TrackedModules;
pub use tracker::DependencyTracker;

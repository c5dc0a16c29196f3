//! # BootstrapOrchestrator: drives one module from submission to a terminal outcome.
//!
//! ```text
//! submit(spec)
//!   ├─ validate descriptors ───────────────────────────────► Err(ConfigurationError)
//!   ├─ no mandatory descriptors ─► DEPENDENCIES_RESOLVED ─► spawn init
//!   ├─ tracker.start() == true ──► DEPENDENCIES_RESOLVED ─► spawn init
//!   ├─ !wait_for_dependencies ───► INTERRUPTED (DependencyTimeout, 0s)
//!   └─ otherwise ────────────────► RESOLVING_DEPENDENCIES
//!                                     ├─ tracker completion ─► DEPENDENCIES_RESOLVED ─► spawn init
//!                                     └─ deadline timer ─────► INTERRUPTED (DependencyTimeout)
//!
//! init task: select!(init hook, token.cancelled())
//!   ├─ Ok  ─► STARTED      (ModuleStarted)
//!   └─ Err ─► INTERRUPTED  (Initialization)
//!
//! request_close(handle)                                   (close = request + await settled)
//!   ├─ before STARTED ─► INTERRUPTED (RaceAborted), cancel tracker/timer/init
//!   │                    └─ task: await in-flight init ─► ModuleInterrupted ─► settled
//!   └─ STARTED ───────► task: teardown hook ─► STOPPED ─► settled
//! ```
//!
//! ## Rules
//! - Completion, timeout and close race to leave `RESOLVING_DEPENDENCIES`; the state
//!   machine's compare-and-set picks the single winner, the others are no-ops.
//! - `submit` never waits: init callables and timers run on the stored runtime handle,
//!   so it is safe to call from synchronous host callbacks on any thread.
//! - Every failure is recorded on the [`ModuleHandle`] and published on the bus; none
//!   escapes to the caller of `submit`.
//! - Registry resources recorded through [`HookContext`] are released whenever the
//!   module reaches a terminal state.
//! - The init hook never starts once the module token is cancelled, and a close
//!   publishes `ModuleInterrupted` only after any in-flight init has returned.
//! - Close work runs on the runtime; dropping a `close` future never abandons it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{DependencyTracker, ExtenderConfig, ModuleState, ModuleStateMachine};
use crate::error::{BootstrapError, ConfigurationError, ModuleError};
use crate::events::{Bus, Event, EventKind};
use crate::modules::{DependencyDescriptor, HookContext, ModuleId, ModuleRef, ModuleSpec, Resources};
use crate::registry::CapabilityRegistry;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-module bootstrap record.
struct ModuleCell {
    spec: ModuleSpec,
    machine: ModuleStateMachine,
    timeout: Option<Duration>,
    tracker: Mutex<Option<Arc<DependencyTracker>>>,
    /// Cancelled when the module is interrupted or stopped.
    token: CancellationToken,
    /// Child of `token`; cancelled when dependencies resolve.
    timer: CancellationToken,
    /// Written while the lock is held across the spawn.
    init_join: Mutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
    /// Cancelled once the terminal notification has been published.
    settled: CancellationToken,
    failure: OnceLock<BootstrapError>,
    resources: Arc<Resources>,
}

impl ModuleCell {
    fn module(&self) -> &ModuleRef {
        self.spec.module()
    }

    fn tracker(&self) -> Option<Arc<DependencyTracker>> {
        lock(&self.tracker).clone()
    }

    fn cancel_tracker(&self) {
        if let Some(t) = self.tracker() {
            t.cancel();
        }
    }

    fn may_init(&self) -> bool {
        !self.token.is_cancelled() && self.machine.current() == ModuleState::DependenciesResolved
    }
}

/// Observer handle to one submitted module.
#[derive(Clone)]
pub struct ModuleHandle {
    cell: Arc<ModuleCell>,
}

impl ModuleHandle {
    pub fn module(&self) -> &ModuleRef {
        self.cell.module()
    }

    pub fn id(&self) -> ModuleId {
        self.cell.module().id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.cell.machine.current()
    }

    /// Effective dependency deadline (`None` = wait forever).
    pub fn timeout(&self) -> Option<Duration> {
        self.cell.timeout
    }

    /// Waits until the module is `INTERRUPTED` or `STOPPED`.
    pub async fn wait_for_terminal(&self) -> ModuleState {
        self.cell.machine.wait_until(ModuleState::is_terminal).await
    }

    /// Waits until the state satisfies `pred`.
    pub async fn wait_until(&self, pred: impl FnMut(ModuleState) -> bool) -> ModuleState {
        self.cell.machine.wait_until(pred).await
    }

    /// The failure that interrupted the module, if any.
    ///
    /// Recorded before `ModuleInterrupted` is published.
    pub fn failure(&self) -> Option<BootstrapError> {
        self.cell.failure.get().cloned()
    }

    /// Mandatory descriptors currently without a match.
    pub fn unsatisfied(&self) -> Vec<DependencyDescriptor> {
        self.cell.tracker().map(|t| t.unsatisfied()).unwrap_or_default()
    }

    /// True if a dependency tracker was created for this module.
    pub fn is_tracking_dependencies(&self) -> bool {
        self.cell.tracker().is_some()
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module", self.module())
            .field("state", &self.state())
            .finish()
    }
}

/// Drives module bootstraps against a capability registry.
#[derive(Clone)]
pub struct BootstrapOrchestrator {
    registry: Arc<dyn CapabilityRegistry>,
    bus: Bus,
    runtime: Handle,
    default_timeout: Option<Duration>,
    semaphore: Option<Arc<Semaphore>>,
}

impl BootstrapOrchestrator {
    /// Creates an orchestrator that runs background work on `runtime`.
    pub fn new(registry: Arc<dyn CapabilityRegistry>, bus: Bus, runtime: Handle, cfg: &ExtenderConfig) -> Self {
        Self {
            registry,
            bus,
            runtime,
            default_timeout: cfg.default_dependency_timeout(),
            semaphore: cfg.init_concurrency_limit().map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    pub fn registry(&self) -> &Arc<dyn CapabilityRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Starts bootstrapping `spec` and returns immediately.
    pub fn submit(&self, spec: ModuleSpec) -> Result<ModuleHandle, ConfigurationError> {
        spec.validate()?;

        let timeout = match spec.timeout() {
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
            None => self.default_timeout,
        };
        let token = CancellationToken::new();
        let cell = Arc::new(ModuleCell {
            machine: ModuleStateMachine::new(),
            timeout,
            tracker: Mutex::new(None),
            timer: token.child_token(),
            token,
            init_join: Mutex::new(None),
            closing: AtomicBool::new(false),
            settled: CancellationToken::new(),
            failure: OnceLock::new(),
            resources: Arc::new(Resources::default()),
            spec,
        });
        let handle = ModuleHandle { cell: Arc::clone(&cell) };
        let module = cell.module().clone();
        self.bus.publish(Event::new(EventKind::ModuleSubmitted).with_module(&module));

        if cell.spec.mandatory_count() == 0 {
            if cell.machine.transition(ModuleState::Initialized, ModuleState::DependenciesResolved) {
                self.spawn_init(&cell);
            }
            return Ok(handle);
        }

        let tracker = DependencyTracker::new(
            module.clone(),
            cell.spec.descriptors().to_vec(),
            Arc::clone(&self.registry),
            self.bus.clone(),
        );
        *lock(&cell.tracker) = Some(Arc::clone(&tracker));

        if tracker.start() {
            tracker.cancel();
            if cell.machine.transition(ModuleState::Initialized, ModuleState::DependenciesResolved) {
                self.spawn_init(&cell);
            }
            return Ok(handle);
        }

        if !cell.spec.waits_for_dependencies() {
            if cell.machine.transition(ModuleState::Initialized, ModuleState::Interrupted) {
                self.interrupt_for_timeout(&cell, Duration::ZERO);
            }
            return Ok(handle);
        }

        if !cell.machine.transition(ModuleState::Initialized, ModuleState::ResolvingDependencies) {
            tracker.cancel();
            return Ok(handle);
        }
        for d in tracker.unsatisfied() {
            self.bus.publish(
                Event::new(EventKind::DependencyWaitStarted)
                    .with_module(&module)
                    .with_dependency(d.to_string()),
            );
        }
        tracing::debug!(module = %module, timeout = ?timeout, "waiting for dependencies");

        if let Some(timeout) = timeout {
            self.arm_timer(&cell, timeout);
        }
        let this = self.clone();
        let c = Arc::clone(&cell);
        tracker.on_complete(move || this.on_resolved(&c));
        Ok(handle)
    }

    /// Closes a module: interrupts an in-flight bootstrap or tears a started module down.
    ///
    /// Idempotent; returns once the module's terminal notification has been published.
    pub async fn close(&self, handle: &ModuleHandle) {
        self.request_close(handle);
        handle.cell.settled.cancelled().await;
    }

    /// Starts closing a module without waiting for it.
    pub fn request_close(&self, handle: &ModuleHandle) {
        let cell = &handle.cell;
        loop {
            let state = cell.machine.current();
            match state {
                ModuleState::Initialized
                | ModuleState::ResolvingDependencies
                | ModuleState::DependenciesResolved => {
                    if !cell.machine.transition(state, ModuleState::Interrupted) {
                        continue;
                    }
                    let err = BootstrapError::RaceAborted {
                        module: cell.module().name().to_string(),
                    };
                    let _ = cell.failure.set(err.clone());
                    cell.token.cancel();
                    cell.cancel_tracker();

                    let this = self.clone();
                    let c = Arc::clone(cell);
                    self.runtime.spawn(async move {
                        let join = lock(&c.init_join).take();
                        if let Some(join) = join {
                            let _ = join.await;
                        }
                        this.finish_interrupted(&c, err);
                    });
                    return;
                }
                ModuleState::Started => {
                    if !cell.closing.swap(true, Ordering::SeqCst) {
                        let this = self.clone();
                        let c = Arc::clone(cell);
                        self.runtime.spawn(async move { this.teardown(&c).await });
                    }
                    return;
                }
                ModuleState::Interrupted | ModuleState::Stopped => return,
            }
        }
    }

    fn on_resolved(&self, cell: &Arc<ModuleCell>) {
        if !cell
            .machine
            .transition(ModuleState::ResolvingDependencies, ModuleState::DependenciesResolved)
        {
            tracing::debug!(module = %cell.module(), "late dependency completion ignored");
            return;
        }
        cell.timer.cancel();
        self.spawn_init(cell);
    }

    fn arm_timer(&self, cell: &Arc<ModuleCell>, timeout: Duration) {
        let this = self.clone();
        let c = Arc::clone(cell);
        let timer = cell.timer.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if c.machine.transition(ModuleState::ResolvingDependencies, ModuleState::Interrupted) {
                        this.interrupt_for_timeout(&c, timeout);
                    }
                }
            }
        });
    }

    fn spawn_init(&self, cell: &Arc<ModuleCell>) {
        let this = self.clone();
        let c = Arc::clone(cell);
        let mut slot = lock(&cell.init_join);
        *slot = Some(self.runtime.spawn(async move { this.run_init(c).await }));
    }

    async fn run_init(self, cell: Arc<ModuleCell>) {
        if !cell.may_init() {
            return;
        }
        let _permit = match &self.semaphore {
            Some(sem) => tokio::select! {
                biased;
                _ = cell.token.cancelled() => return,
                permit = Arc::clone(sem).acquire_owned() => permit.ok(),
            },
            None => None,
        };
        if !cell.may_init() {
            tracing::debug!(module = %cell.module(), "init skipped: module closed");
            return;
        }

        let ctx = HookContext::new(
            cell.module().clone(),
            cell.token.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&cell.resources),
        );
        let init = (cell.spec.init_hook())(ctx);
        let result = tokio::select! {
            biased;
            _ = cell.token.cancelled() => Err(ModuleError::Canceled),
            res = init => res,
        };

        let module = cell.module();
        match result {
            Ok(()) if cell.machine.transition(ModuleState::DependenciesResolved, ModuleState::Started) => {
                tracing::info!(module = %module, "module started");
                self.bus.publish(Event::new(EventKind::ModuleStarted).with_module(module));
            }
            Err(source) if cell.machine.transition(ModuleState::DependenciesResolved, ModuleState::Interrupted) => {
                let err = BootstrapError::Initialization {
                    module: module.name().to_string(),
                    source,
                };
                self.finish_interrupted(&cell, err);
            }
            _ => {
                // Close won the race; drop whatever the hook published after it.
                cell.resources.release(self.registry.as_ref(), module);
                tracing::debug!(module = %module, "init finished after close");
            }
        }
    }

    async fn teardown(&self, cell: &Arc<ModuleCell>) {
        let module = cell.module();
        let ctx = HookContext::new(
            module.clone(),
            cell.token.child_token(),
            Arc::clone(&self.registry),
            Arc::clone(&cell.resources),
        );
        let result = (cell.spec.teardown_hook())(ctx).await;
        cell.token.cancel();
        cell.cancel_tracker();
        cell.resources.release(self.registry.as_ref(), module);

        if cell.machine.transition(ModuleState::Started, ModuleState::Stopped) {
            let mut ev = Event::new(EventKind::ModuleStopped).with_module(module);
            match result {
                Ok(()) => tracing::info!(module = %module, "module stopped"),
                Err(e) => {
                    tracing::warn!(module = %module, error = %e, "module teardown failed");
                    ev.label = Some(e.as_label());
                    ev = ev.with_reason(e.to_string());
                }
            }
            self.bus.publish(ev);
        }
        cell.settled.cancel();
    }

    fn interrupt_for_timeout(&self, cell: &Arc<ModuleCell>, timeout: Duration) {
        cell.cancel_tracker();
        let unsatisfied = cell
            .tracker()
            .map(|t| t.unsatisfied())
            .unwrap_or_default()
            .iter()
            .map(|d| d.filter().to_string())
            .collect();
        let err = BootstrapError::DependencyTimeout {
            module: cell.module().name().to_string(),
            timeout,
            unsatisfied,
        };
        self.finish_interrupted(cell, err);
    }

    /// Records the failure, releases resources and publishes `ModuleInterrupted`.
    /// Caller must have won the transition into `INTERRUPTED`.
    fn finish_interrupted(&self, cell: &Arc<ModuleCell>, err: BootstrapError) {
        let module = cell.module();
        let _ = cell.failure.set(err.clone());
        cell.token.cancel();
        cell.cancel_tracker();
        cell.resources.release(self.registry.as_ref(), module);

        match &err {
            BootstrapError::RaceAborted { .. } => {
                tracing::debug!(module = %module, "bootstrap aborted by close")
            }
            BootstrapError::DependencyTimeout { .. } => {
                tracing::warn!(module = %module, error = %err, "dependency timeout")
            }
            _ => tracing::error!(module = %module, error = %err, "module interrupted"),
        }
        self.bus
            .publish(Event::new(EventKind::ModuleInterrupted).with_module(module).with_error(&err));
        cell.settled.cancel();
    }
}

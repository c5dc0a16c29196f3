//! # Module state machine.
//!
//! ```text
//!                     ┌──────────────────────────────┐
//!  INITIALIZED ──┬──► RESOLVING_DEPENDENCIES ──┬──► DEPENDENCIES_RESOLVED ──┬──► STARTED ──► STOPPED
//!                │                             │           ▲                │
//!                └─────────────────────────────┼───────────┘                │
//!                                              ▼                            ▼
//!                                         INTERRUPTED ◄─────────────────────┘
//! ```
//! `INITIALIZED` may also move straight to `INTERRUPTED` when a close arrives
//! before the module was handed to the orchestrator.
//!
//! ## Rules
//! - Transitions are monotonic; `INTERRUPTED` and `STOPPED` are terminal.
//! - [`ModuleStateMachine::transition`] is a compare-and-set: it succeeds only if the
//!   current state equals `from` and `from → to` is a legal edge. When several
//!   producers (dependency completion, timeout, close) race, exactly one wins.
//! - Observers may await state changes without polling.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of one tracked module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Initialized,
    ResolvingDependencies,
    DependenciesResolved,
    Started,
    Interrupted,
    Stopped,
}

impl ModuleState {
    /// True for `INTERRUPTED` and `STOPPED`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleState::Interrupted | ModuleState::Stopped)
    }

    /// Whether `self → to` is an edge of the state machine.
    pub fn can_transition_to(self, to: ModuleState) -> bool {
        use ModuleState::*;
        matches!(
            (self, to),
            (Initialized, ResolvingDependencies)
                | (Initialized, DependenciesResolved)
                | (Initialized, Interrupted)
                | (ResolvingDependencies, DependenciesResolved)
                | (ResolvingDependencies, Interrupted)
                | (DependenciesResolved, Started)
                | (DependenciesResolved, Interrupted)
                | (Started, Stopped)
        )
    }

    /// Stable snake_case label.
    pub fn as_label(self) -> &'static str {
        match self {
            ModuleState::Initialized => "initialized",
            ModuleState::ResolvingDependencies => "resolving_dependencies",
            ModuleState::DependenciesResolved => "dependencies_resolved",
            ModuleState::Started => "started",
            ModuleState::Interrupted => "interrupted",
            ModuleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Atomic arbiter of a module's lifecycle state.
#[derive(Debug)]
pub struct ModuleStateMachine {
    tx: watch::Sender<ModuleState>,
}

impl Default for ModuleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleStateMachine {
    /// Creates a machine in `INITIALIZED`.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ModuleState::Initialized);
        Self { tx }
    }

    /// Current state.
    pub fn current(&self) -> ModuleState {
        *self.tx.borrow()
    }

    /// Moves `from → to` if the machine is in `from` and the edge is legal.
    ///
    /// Returns `true` only for the caller that performed the transition.
    pub fn transition(&self, from: ModuleState, to: ModuleState) -> bool {
        if !from.can_transition_to(to) {
            return false;
        }
        self.tx.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Receiver observing every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<ModuleState> {
        self.tx.subscribe()
    }

    /// Waits until the state satisfies `pred` and returns that state.
    pub async fn wait_until(&self, mut pred: impl FnMut(ModuleState) -> bool) -> ModuleState {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => self.current(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ModuleState::*;
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn legal_path_to_started_and_stopped() {
        let m = ModuleStateMachine::new();
        assert_eq!(m.current(), Initialized);
        assert!(m.transition(Initialized, ResolvingDependencies));
        assert!(m.transition(ResolvingDependencies, DependenciesResolved));
        assert!(m.transition(DependenciesResolved, Started));
        assert!(m.transition(Started, Stopped));
        assert!(m.current().is_terminal());
    }

    #[test]
    fn rejects_illegal_edges_and_stale_sources() {
        let m = ModuleStateMachine::new();
        assert!(!m.transition(Initialized, Started));
        assert!(!m.transition(Started, Stopped));
        assert!(!m.transition(ResolvingDependencies, DependenciesResolved));
        assert_eq!(m.current(), Initialized);

        assert!(m.transition(Initialized, DependenciesResolved));
        assert!(!m.transition(Initialized, ResolvingDependencies));
        assert!(m.transition(DependenciesResolved, Interrupted));
        assert!(!m.transition(Interrupted, Stopped));
        assert!(!m.transition(DependenciesResolved, Started));
        assert_eq!(m.current(), Interrupted);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for to in [
            Initialized,
            ResolvingDependencies,
            DependenciesResolved,
            Started,
            Interrupted,
            Stopped,
        ] {
            assert!(!Interrupted.can_transition_to(to));
            assert!(!Stopped.can_transition_to(to));
        }
    }

    #[test]
    fn racing_producers_have_exactly_one_winner() {
        for _ in 0..200 {
            let m = Arc::new(ModuleStateMachine::new());
            assert!(m.transition(Initialized, ResolvingDependencies));
            let wins = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..3)
                .map(|i| {
                    let m = Arc::clone(&m);
                    let wins = Arc::clone(&wins);
                    std::thread::spawn(move || {
                        let to = if i == 0 { DependenciesResolved } else { Interrupted };
                        if m.transition(ResolvingDependencies, to) {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert_ne!(m.current(), ResolvingDependencies);
        }
    }

    #[tokio::test]
    async fn wait_until_observes_later_transition() {
        let m = Arc::new(ModuleStateMachine::new());
        let waiter = {
            let m = Arc::clone(&m);
            tokio::spawn(async move { m.wait_until(ModuleState::is_terminal).await })
        };
        tokio::task::yield_now().await;
        assert!(m.transition(Initialized, Interrupted));
        assert_eq!(waiter.await.unwrap(), Interrupted);
    }
}

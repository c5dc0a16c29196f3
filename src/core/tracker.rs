//! # DependencyTracker: waits for a module's mandatory capabilities.
//!
//! One tracker per module. It keeps, for every declared descriptor, the set of
//! matching capability ids (the descriptor's match counter is the size of that set),
//! and derives the set of **unsatisfied** mandatory descriptors.
//!
//! ## Start-up without losing events
//! ```text
//! start():
//!   seeding = true
//!   subscribe(OR of all descriptor filters) ──► events arriving now are buffered
//!   query(filter) per descriptor            ──► seed the id sets
//!   replay buffered events (same path)      ──► set semantics make replay idempotent
//!   seeding = false
//!   return unsatisfied.is_empty()
//! ```
//!
//! ## Event handling
//! ```text
//! Registered / Modified      → insert id into every matching descriptor's set,
//!                              remove it from the sets it no longer matches
//! Unregistering / EndMatch   → remove id from every set
//! mandatory set 0 → 1        → DependencyWaitEnded, descriptor leaves `unsatisfied`
//! mandatory set 1 → 0        → DependencyLost, descriptor re-enters `unsatisfied`
//! unsatisfied becomes empty  → completion callback (at most once), then unsubscribe
//! ```
//!
//! ## Rules
//! - A mandatory descriptor is unsatisfied **iff** its id set is empty.
//! - Duplicate delivery of a capability id never double-counts.
//! - The completion callback fires at most once, ever; after [`cancel`](DependencyTracker::cancel) never.
//! - No tracker lock is held while calling into the registry or the callback.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::events::{Bus, Event, EventKind};
use crate::modules::{DependencyDescriptor, ModuleRef};
use crate::registry::{
    CapabilityEvent, CapabilityId, CapabilityListener, CapabilityRegistry, Filter, SubscriptionId,
};

type Completion = Box<dyn FnOnce() + Send + 'static>;

struct TrackerState {
    /// Events delivered while the initial snapshot is being taken.
    seeding: bool,
    buffered: Vec<CapabilityEvent>,
    /// Matching capability ids per descriptor.
    matches: Vec<BTreeSet<CapabilityId>>,
    /// Indices of mandatory descriptors with no match.
    unsatisfied: BTreeSet<usize>,
}

enum Change {
    Satisfied(usize),
    Lost(usize),
}

/// Tracks which mandatory descriptors of one module are currently unsatisfied.
pub struct DependencyTracker {
    module: ModuleRef,
    descriptors: Vec<DependencyDescriptor>,
    registry: Arc<dyn CapabilityRegistry>,
    bus: Bus,
    state: Mutex<TrackerState>,
    subscription: Mutex<Option<SubscriptionId>>,
    on_complete: Mutex<Option<Completion>>,
    completed: AtomicBool,
    cancelled: AtomicBool,
}

impl DependencyTracker {
    /// Creates an idle tracker; call [`start`](Self::start) to seed and subscribe.
    pub fn new(
        module: ModuleRef,
        descriptors: Vec<DependencyDescriptor>,
        registry: Arc<dyn CapabilityRegistry>,
        bus: Bus,
    ) -> Arc<Self> {
        let unsatisfied = descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_mandatory())
            .map(|(i, _)| i)
            .collect();
        let matches = vec![BTreeSet::new(); descriptors.len()];
        Arc::new(Self {
            module,
            descriptors,
            registry,
            bus,
            state: Mutex::new(TrackerState {
                seeding: false,
                buffered: Vec::new(),
                matches,
                unsatisfied,
            }),
            subscription: Mutex::new(None),
            on_complete: Mutex::new(None),
            completed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Seeds counters from a registry snapshot and subscribes for changes.
    ///
    /// Returns `true` if every mandatory descriptor is already satisfied.
    pub fn start(self: &Arc<Self>) -> bool {
        self.lock_state().seeding = true;

        let filter = Filter::or(self.descriptors.iter().map(|d| d.filter().clone()));
        let listener: Arc<dyn CapabilityListener> = Arc::new(TrackerListener(Arc::downgrade(self)));
        let sid = self.registry.subscribe(filter, listener);
        *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(sid);
        if self.is_cancelled() {
            self.unsubscribe();
        }

        let seeds: Vec<Vec<CapabilityId>> = self
            .descriptors
            .iter()
            .map(|d| self.registry.query(d.filter()).into_iter().map(|c| c.id).collect())
            .collect();

        let mut st = self.lock_state();
        for (i, ids) in seeds.into_iter().enumerate() {
            if ids.is_empty() {
                continue;
            }
            st.matches[i].extend(ids);
            st.unsatisfied.remove(&i);
        }
        let buffered = std::mem::take(&mut st.buffered);
        for ev in &buffered {
            self.apply(&mut st, ev);
        }
        st.seeding = false;

        tracing::debug!(
            module = %self.module,
            unsatisfied = st.unsatisfied.len(),
            replayed = buffered.len(),
            "dependency tracker started"
        );
        st.unsatisfied.is_empty()
    }

    /// Applies one registry change.
    pub fn on_event(&self, event: &CapabilityEvent) {
        if self.is_cancelled() || self.is_completed() {
            return;
        }
        let (changes, all_satisfied) = {
            let mut st = self.lock_state();
            if st.seeding {
                st.buffered.push(event.clone());
                return;
            }
            let changes = self.apply(&mut st, event);
            (changes, st.unsatisfied.is_empty())
        };

        for change in changes {
            let (kind, idx) = match change {
                Change::Satisfied(i) => (EventKind::DependencyWaitEnded, i),
                Change::Lost(i) => (EventKind::DependencyLost, i),
            };
            let descriptor = &self.descriptors[idx];
            tracing::debug!(module = %self.module, dependency = %descriptor, ?kind, "dependency changed");
            self.bus.publish(
                Event::new(kind)
                    .with_module(&self.module)
                    .with_dependency(descriptor.to_string()),
            );
        }

        if all_satisfied {
            self.try_complete();
        }
    }

    /// Registers the completion callback.
    ///
    /// If every mandatory descriptor is already satisfied the callback runs immediately
    /// on the calling thread.
    pub fn on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_cancelled() {
            return;
        }
        *self.on_complete.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self.try_complete();
    }

    /// Unsubscribes and turns any later completion into a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        drop(self.on_complete.lock().unwrap_or_else(PoisonError::into_inner).take());
        self.unsubscribe();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the completion callback has fired.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// True if every mandatory descriptor has at least one match.
    pub fn is_satisfied(&self) -> bool {
        self.lock_state().unsatisfied.is_empty()
    }

    /// Mandatory descriptors without a match, in declaration order.
    pub fn unsatisfied(&self) -> Vec<DependencyDescriptor> {
        self.lock_state()
            .unsatisfied
            .iter()
            .map(|&i| self.descriptors[i].clone())
            .collect()
    }

    /// Live match counter of descriptor `index`.
    pub fn match_count(&self, index: usize) -> usize {
        self.lock_state().matches.get(index).map_or(0, BTreeSet::len)
    }

    pub fn descriptors(&self) -> &[DependencyDescriptor] {
        &self.descriptors
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, st: &mut TrackerState, event: &CapabilityEvent) -> Vec<Change> {
        let id = event.capability.id;
        let mut changes = Vec::new();
        for (i, d) in self.descriptors.iter().enumerate() {
            let hit = event.is_arrival() && d.filter().matches(&event.capability.attributes);
            let set = &mut st.matches[i];
            if hit {
                if set.insert(id) && set.len() == 1 && d.is_mandatory() {
                    st.unsatisfied.remove(&i);
                    changes.push(Change::Satisfied(i));
                }
            } else if set.remove(&id) && set.is_empty() && d.is_mandatory() {
                st.unsatisfied.insert(i);
                changes.push(Change::Lost(i));
            }
        }
        changes
    }

    /// Fires the completion callback if it is registered and every mandatory
    /// descriptor is satisfied. The callback slot is emptied exactly once.
    fn try_complete(&self) {
        if self.is_cancelled() || !self.is_satisfied() {
            return;
        }
        let Some(callback) = self.on_complete.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        if self
            .completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.unsubscribe();
        callback();
    }

    fn unsubscribe(&self) {
        let sid = self.subscription.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sid) = sid {
            self.registry.unsubscribe(sid);
        }
    }
}

impl Drop for DependencyTracker {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Registry listener holding the tracker weakly so the registry never keeps it alive.
struct TrackerListener(Weak<DependencyTracker>);

impl CapabilityListener for TrackerListener {
    fn on_capability_event(&self, event: &CapabilityEvent) {
        if let Some(tracker) = self.0.upgrade() {
            tracker.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::ModuleId;
    use crate::registry::{Attributes, CapabilityEventKind, CapabilityRef, MemoryRegistry};
    use std::sync::atomic::AtomicUsize;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn logger_tracker(registry: &Arc<MemoryRegistry>) -> Arc<DependencyTracker> {
        DependencyTracker::new(
            ModuleRef::new(1, "m"),
            vec![
                DependencyDescriptor::mandatory("log", "(kind=Logger)").unwrap(),
                DependencyDescriptor::optional("metrics", "(kind=Metrics)").unwrap(),
            ],
            registry.clone(),
            Bus::new(64),
        )
    }

    fn counter_callback(tracker: &DependencyTracker) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        tracker.on_complete(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }

    #[test]
    fn start_seeds_from_snapshot() {
        let reg = MemoryRegistry::shared();
        reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 0);
        let t = logger_tracker(&reg);
        assert!(t.start());
        assert_eq!(t.match_count(0), 1);
        assert_eq!(t.match_count(1), 0);
        assert!(t.unsatisfied().is_empty());
    }

    #[test]
    fn completes_once_when_last_mandatory_arrives() {
        let reg = MemoryRegistry::shared();
        let t = logger_tracker(&reg);
        assert!(!t.start());
        assert_eq!(reg.subscription_count(), 1);
        let fired = counter_callback(&t);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 5);
        reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(t.is_completed());
        assert_eq!(reg.subscription_count(), 0);
    }

    #[test]
    fn duplicate_registration_event_is_idempotent() {
        let reg = MemoryRegistry::shared();
        let t = logger_tracker(&reg);
        assert!(!t.start());

        let cap = CapabilityRef {
            id: CapabilityId(42),
            ranking: 5,
            exporter: ModuleId(9),
            attributes: Arc::new(attrs(&[("kind", "Metrics")])),
            using: Default::default(),
        };
        let ev = CapabilityEvent {
            kind: CapabilityEventKind::Registered,
            capability: cap,
        };
        t.on_event(&ev);
        t.on_event(&ev);
        assert_eq!(t.match_count(1), 1);

        let mut unreg = ev.clone();
        unreg.kind = CapabilityEventKind::Unregistering;
        t.on_event(&unreg);
        assert_eq!(t.match_count(1), 0);
        t.on_event(&unreg);
        assert_eq!(t.match_count(1), 0);
    }

    #[test]
    fn duplicate_event_does_not_change_unsatisfied_twice() {
        let reg = MemoryRegistry::shared();
        let t = DependencyTracker::new(
            ModuleRef::new(1, "m"),
            vec![
                DependencyDescriptor::mandatory("log", "(kind=Logger)").unwrap(),
                DependencyDescriptor::mandatory("sink", "(kind=Sink)").unwrap(),
            ],
            reg.clone(),
            Bus::new(64),
        );
        let mut rx = t.bus.subscribe();
        assert!(!t.start());

        let ev = CapabilityEvent {
            kind: CapabilityEventKind::Registered,
            capability: CapabilityRef {
                id: CapabilityId(42),
                ranking: 5,
                exporter: ModuleId(9),
                attributes: Arc::new(attrs(&[("kind", "Logger")])),
                using: Default::default(),
            },
        };
        t.on_event(&ev);
        t.on_event(&ev);

        assert_eq!(t.unsatisfied().len(), 1);
        assert_eq!(t.unsatisfied()[0].component(), "sink");
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::DependencyWaitEnded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn losing_last_match_reports_unsatisfied() {
        let reg = MemoryRegistry::shared();
        let sink = reg.register(ModuleId(9), attrs(&[("kind", "Sink")]), 0);
        let t = DependencyTracker::new(
            ModuleRef::new(1, "m"),
            vec![
                DependencyDescriptor::mandatory("log", "(kind=Logger)").unwrap(),
                DependencyDescriptor::mandatory("sink", "(kind=Sink)").unwrap(),
            ],
            reg.clone(),
            Bus::new(64),
        );
        let mut rx = t.bus.subscribe();
        assert!(!t.start());

        reg.unregister(sink);
        assert_eq!(t.unsatisfied().len(), 2);
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::DependencyLost);
        assert_eq!(ev.dependency.as_deref(), Some("sink(kind=Sink)"));
    }

    #[test]
    fn modification_moves_capability_between_descriptors() {
        let reg = MemoryRegistry::shared();
        let id = reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 0);
        let t = logger_tracker(&reg);
        assert!(t.start());

        // Tracker is satisfied at start; it keeps counting until completion is armed.
        reg.modify(id, attrs(&[("kind", "Metrics")]));
        assert_eq!(t.match_count(0), 0);
        assert_eq!(t.match_count(1), 1);
        assert_eq!(t.unsatisfied().len(), 1);
    }

    #[test]
    fn cancel_prevents_completion_and_unsubscribes() {
        let reg = MemoryRegistry::shared();
        let t = logger_tracker(&reg);
        assert!(!t.start());
        let fired = counter_callback(&t);

        t.cancel();
        assert_eq!(reg.subscription_count(), 0);
        reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!t.is_completed());
    }

    #[test]
    fn callback_registered_late_fires_immediately() {
        let reg = MemoryRegistry::shared();
        let t = logger_tracker(&reg);
        assert!(!t.start());
        reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 0);
        assert!(t.is_satisfied());

        let fired = counter_callback(&t);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let again = counter_callback(&t);
        assert_eq!(again.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_registrations_complete_exactly_once() {
        for _ in 0..50 {
            let reg = MemoryRegistry::shared();
            let t = logger_tracker(&reg);
            assert!(!t.start());
            let fired = counter_callback(&t);

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let reg = Arc::clone(&reg);
                    std::thread::spawn(move || {
                        reg.register(ModuleId(9), attrs(&[("kind", "Logger")]), 0);
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }
}

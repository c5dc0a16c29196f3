//! # In-memory capability registry.
//!
//! [`MemoryRegistry`] keeps capabilities and listeners behind a single mutex and
//! delivers change events synchronously, in mutation order, **outside** that mutex.
//!
//! ## Delivery scheme
//! ```text
//! register/unregister/modify:
//!   lock state ─► mutate ─► enqueue (listener, event) pairs ─► unlock
//!   drain():
//!     ├─ another thread already draining? → return (it will deliver our events)
//!     └─ loop { lock; pop next; unlock; listener.on_capability_event(&ev) }
//! ```
//! A single drainer at a time gives every listener a serialized, globally ordered
//! stream. Listeners may call back into the registry: nested mutations are enqueued
//! and delivered by the same drain loop after the current callback returns.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::modules::ModuleId;

use super::{
    Attributes, CapabilityEvent, CapabilityEventKind, CapabilityId, CapabilityListener,
    CapabilityRef, CapabilityRegistry, Filter, SubscriptionId,
};

struct Entry {
    exporter: ModuleId,
    ranking: i32,
    attributes: Arc<Attributes>,
    /// Use counts per module.
    using: BTreeMap<ModuleId, usize>,
}

impl Entry {
    fn to_ref(&self, id: CapabilityId) -> CapabilityRef {
        CapabilityRef {
            id,
            ranking: self.ranking,
            exporter: self.exporter,
            attributes: Arc::clone(&self.attributes),
            using: self.using.keys().copied().collect(),
        }
    }
}

struct Subscription {
    filter: Filter,
    listener: Arc<dyn CapabilityListener>,
}

struct Pending {
    subscription: SubscriptionId,
    listener: Arc<dyn CapabilityListener>,
    event: CapabilityEvent,
}

#[derive(Default)]
struct State {
    next_capability: u64,
    next_subscription: u64,
    capabilities: BTreeMap<CapabilityId, Entry>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    pending: VecDeque<Pending>,
    draining: bool,
}

impl State {
    fn enqueue_matching(&mut self, kind: CapabilityEventKind, capability: &CapabilityRef) {
        for (sid, sub) in &self.subscriptions {
            if sub.filter.matches(&capability.attributes) {
                self.pending.push_back(Pending {
                    subscription: *sid,
                    listener: Arc::clone(&sub.listener),
                    event: CapabilityEvent {
                        kind,
                        capability: capability.clone(),
                    },
                });
            }
        }
    }
}

/// Thread-safe in-memory [`CapabilityRegistry`].
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.lock().capabilities.len()
    }

    /// True if no capability is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().capabilities.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers queued events unless another thread is already doing so.
    fn drain(&self) {
        {
            let mut st = self.lock();
            if st.draining {
                return;
            }
            st.draining = true;
        }
        loop {
            let next = {
                let mut st = self.lock();
                loop {
                    match st.pending.pop_front() {
                        Some(p) if st.subscriptions.contains_key(&p.subscription) => break Some(p),
                        Some(_) => continue,
                        None => {
                            st.draining = false;
                            break None;
                        }
                    }
                }
            };
            match next {
                Some(p) => p.listener.on_capability_event(&p.event),
                None => return,
            }
        }
    }
}

impl CapabilityRegistry for MemoryRegistry {
    fn register(&self, exporter: ModuleId, attributes: Attributes, ranking: i32) -> CapabilityId {
        let id = {
            let mut st = self.lock();
            st.next_capability += 1;
            let id = CapabilityId(st.next_capability);
            let entry = Entry {
                exporter,
                ranking,
                attributes: Arc::new(attributes),
                using: BTreeMap::new(),
            };
            let cap = entry.to_ref(id);
            st.capabilities.insert(id, entry);
            st.enqueue_matching(CapabilityEventKind::Registered, &cap);
            id
        };
        self.drain();
        id
    }

    fn unregister(&self, id: CapabilityId) -> bool {
        {
            let mut st = self.lock();
            let Some(entry) = st.capabilities.remove(&id) else {
                return false;
            };
            let cap = entry.to_ref(id);
            st.enqueue_matching(CapabilityEventKind::Unregistering, &cap);
        }
        self.drain();
        true
    }

    fn modify(&self, id: CapabilityId, attributes: Attributes) -> bool {
        {
            let mut st = self.lock();
            let State {
                capabilities,
                subscriptions,
                pending,
                ..
            } = &mut *st;
            let Some(entry) = capabilities.get_mut(&id) else {
                return false;
            };
            let old = std::mem::replace(&mut entry.attributes, Arc::new(attributes));
            let cap = entry.to_ref(id);
            for (sid, sub) in subscriptions.iter() {
                let kind = match (sub.filter.matches(&old), sub.filter.matches(&cap.attributes)) {
                    (_, true) => CapabilityEventKind::Modified,
                    (true, false) => CapabilityEventKind::ModifiedEndMatch,
                    (false, false) => continue,
                };
                pending.push_back(Pending {
                    subscription: *sid,
                    listener: Arc::clone(&sub.listener),
                    event: CapabilityEvent {
                        kind,
                        capability: cap.clone(),
                    },
                });
            }
        }
        self.drain();
        true
    }

    fn query(&self, filter: &Filter) -> Vec<CapabilityRef> {
        let st = self.lock();
        let mut out: Vec<CapabilityRef> = st
            .capabilities
            .iter()
            .filter(|(_, e)| filter.matches(&e.attributes))
            .map(|(id, e)| e.to_ref(*id))
            .collect();
        out.sort_by(|a, b| b.ranking.cmp(&a.ranking).then(a.id.cmp(&b.id)));
        out
    }

    fn subscribe(&self, filter: Filter, listener: Arc<dyn CapabilityListener>) -> SubscriptionId {
        let mut st = self.lock();
        st.next_subscription += 1;
        let id = SubscriptionId(st.next_subscription);
        st.subscriptions.insert(id, Subscription { filter, listener });
        id
    }

    fn unsubscribe(&self, handle: SubscriptionId) -> bool {
        self.lock().subscriptions.remove(&handle).is_some()
    }

    fn acquire(&self, id: CapabilityId, user: ModuleId) -> bool {
        let mut st = self.lock();
        match st.capabilities.get_mut(&id) {
            Some(entry) => {
                *entry.using.entry(user).or_insert(0) += 1;
                true
            }
            None => false,
        }
    }

    fn release(&self, id: CapabilityId, user: ModuleId) -> bool {
        let mut st = self.lock();
        let Some(entry) = st.capabilities.get_mut(&id) else {
            return false;
        };
        match entry.using.get_mut(&user) {
            Some(n) if *n > 1 => {
                *n -= 1;
                true
            }
            Some(_) => {
                entry.using.remove(&user);
                true
            }
            None => false,
        }
    }

    fn release_all(&self, user: ModuleId) {
        let mut st = self.lock();
        for entry in st.capabilities.values_mut() {
            entry.using.remove(&user);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn recorder() -> (Arc<StdMutex<Vec<(CapabilityEventKind, CapabilityId)>>>, Arc<dyn CapabilityListener>) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let listener: Arc<dyn CapabilityListener> = Arc::new(move |ev: &CapabilityEvent| {
            sink.lock().unwrap().push((ev.kind, ev.capability.id));
        });
        (log, listener)
    }

    #[test]
    fn query_orders_by_ranking_then_id() {
        let reg = MemoryRegistry::new();
        let a = reg.register(ModuleId(1), attrs(&[("kind", "Logger")]), 1);
        let b = reg.register(ModuleId(2), attrs(&[("kind", "Logger")]), 5);
        let c = reg.register(ModuleId(3), attrs(&[("kind", "Logger")]), 5);
        reg.register(ModuleId(3), attrs(&[("kind", "Sink")]), 9);

        let ids: Vec<_> = reg
            .query(&Filter::equals("kind", "Logger"))
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![b, c, a]);
        assert_eq!(reg.snapshot().len(), 4);
    }

    #[test]
    fn listeners_see_matching_events_only() {
        let reg = MemoryRegistry::new();
        let (log, listener) = recorder();
        reg.subscribe(Filter::equals("kind", "Logger"), listener);

        let logger = reg.register(ModuleId(1), attrs(&[("kind", "Logger")]), 0);
        let sink = reg.register(ModuleId(1), attrs(&[("kind", "Sink")]), 0);
        assert!(reg.unregister(logger));
        assert!(reg.unregister(sink));
        assert!(!reg.unregister(sink));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (CapabilityEventKind::Registered, logger),
                (CapabilityEventKind::Unregistering, logger),
            ]
        );
    }

    #[test]
    fn modify_reports_end_of_match() {
        let reg = MemoryRegistry::new();
        let (log, listener) = recorder();
        reg.subscribe(Filter::equals("kind", "Logger"), listener);

        let id = reg.register(ModuleId(1), attrs(&[("kind", "Sink")]), 0);
        assert!(reg.modify(id, attrs(&[("kind", "Logger")])));
        assert!(reg.modify(id, attrs(&[("kind", "Logger"), ("v", "2")])));
        assert!(reg.modify(id, attrs(&[("kind", "Sink")])));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                (CapabilityEventKind::Modified, id),
                (CapabilityEventKind::Modified, id),
                (CapabilityEventKind::ModifiedEndMatch, id),
            ]
        );
    }

    #[test]
    fn unsubscribed_listener_is_silent() {
        let reg = MemoryRegistry::new();
        let (log, listener) = recorder();
        let sid = reg.subscribe(Filter::any(), listener);
        assert_eq!(reg.subscription_count(), 1);
        assert!(reg.unsubscribe(sid));
        assert!(!reg.unsubscribe(sid));
        reg.register(ModuleId(1), Attributes::new(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_may_reenter_registry() {
        let reg = Arc::new(MemoryRegistry::new());
        let inner = Arc::clone(&reg);
        let (log, rec) = recorder();
        reg.subscribe(Filter::equals("kind", "Echo"), rec);
        reg.subscribe(
            Filter::equals("kind", "Ping"),
            Arc::new(move |ev: &CapabilityEvent| {
                if ev.kind == CapabilityEventKind::Registered {
                    inner.register(ModuleId(9), attrs(&[("kind", "Echo")]), 0);
                }
            }),
        );

        reg.register(ModuleId(1), attrs(&[("kind", "Ping")]), 0);
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn usage_is_counted_per_module() {
        let reg = MemoryRegistry::new();
        let id = reg.register(ModuleId(1), Attributes::new(), 0);
        assert!(reg.acquire(id, ModuleId(2)));
        assert!(reg.acquire(id, ModuleId(2)));
        assert!(reg.acquire(id, ModuleId(3)));
        assert!(reg.release(id, ModuleId(2)));
        let using = &reg.snapshot()[0].using;
        assert!(using.contains(&ModuleId(2)) && using.contains(&ModuleId(3)));

        reg.release_all(ModuleId(2));
        assert!(!reg.release(id, ModuleId(2)));
        let using = &reg.snapshot()[0].using;
        assert_eq!(using.len(), 1);
        assert!(!reg.acquire(CapabilityId(999), ModuleId(2)));
    }
}

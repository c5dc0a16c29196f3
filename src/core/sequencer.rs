//! # ShutdownSequencer: close order over the active module set.
//!
//! The graph is ephemeral: one registry snapshot is taken per call, and an edge
//! `A → B` exists when module `A` uses a capability exported by module `B`
//! (both active, `A != B`). Consumers close before the providers they use.
//!
//! ## Algorithm
//! ```text
//! pending(B) = number of still-open consumers of B
//! loop:
//!   ready = { m | pending(m) == 0 }
//!   pick  = min(ready) by tie-break key          (acyclic part)
//!        or min(remaining) by tie-break key      (cycle: every module still has a consumer)
//!   emit pick; decrement pending(p) for every provider p used by pick
//! ```
//!
//! ## Tie-break key (total)
//! 1. modules exporting nothing first
//! 2. highest ranking among the module's exported capabilities (descending)
//! 3. id of that capability (ascending)
//! 4. module name (lexicographic)
//! 5. module id
//!
//! The result is a permutation of the distinct input modules and does not depend on
//! the input order. A stale snapshot only affects the quality of the order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::modules::{ModuleId, ModuleRef};
use crate::registry::CapabilityRegistry;

type Key = (bool, Reverse<i32>, u64, Arc<str>, ModuleId);

/// Computes deterministic shutdown orders from registry snapshots.
#[derive(Clone)]
pub struct ShutdownSequencer {
    registry: Arc<dyn CapabilityRegistry>,
}

impl ShutdownSequencer {
    pub fn new(registry: Arc<dyn CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the ids of `active` in the order they should be closed.
    pub fn compute(&self, active: &[ModuleRef]) -> Vec<ModuleId> {
        let modules: BTreeMap<ModuleId, &ModuleRef> = active.iter().map(|m| (m.id(), m)).collect();
        if modules.len() <= 1 {
            return modules.into_keys().collect();
        }

        let snapshot = self.registry.snapshot();

        // Best exported capability per module: highest ranking, then lowest id.
        let mut best: BTreeMap<ModuleId, (i32, u64)> = BTreeMap::new();
        // providers[A] = modules whose capabilities A uses.
        let mut providers: BTreeMap<ModuleId, BTreeSet<ModuleId>> = BTreeMap::new();
        let mut consumers: BTreeMap<ModuleId, BTreeSet<ModuleId>> = BTreeMap::new();

        for cap in &snapshot {
            let exporter = cap.exporter;
            if !modules.contains_key(&exporter) {
                continue;
            }
            let candidate = (cap.ranking, cap.id.0);
            best.entry(exporter)
                .and_modify(|b| {
                    if (candidate.0, Reverse(candidate.1)) > (b.0, Reverse(b.1)) {
                        *b = candidate;
                    }
                })
                .or_insert(candidate);

            for user in &cap.using {
                if *user == exporter || !modules.contains_key(user) {
                    continue;
                }
                providers.entry(*user).or_default().insert(exporter);
                consumers.entry(exporter).or_default().insert(*user);
            }
        }

        let keys: BTreeMap<ModuleId, Key> = modules
            .iter()
            .map(|(&id, m)| {
                let key = match best.get(&id) {
                    Some(&(ranking, cap)) => (true, Reverse(ranking), cap, m.name_arc(), id),
                    None => (false, Reverse(i32::MAX), 0, m.name_arc(), id),
                };
                (id, key)
            })
            .collect();

        let mut pending: BTreeMap<ModuleId, usize> = modules
            .keys()
            .map(|id| (*id, consumers.get(id).map_or(0, BTreeSet::len)))
            .collect();
        let mut remaining: BTreeSet<Key> = keys.values().cloned().collect();
        let mut ready: BTreeSet<Key> = keys
            .iter()
            .filter(|(id, _)| pending[*id] == 0)
            .map(|(_, k)| k.clone())
            .collect();

        let mut order = Vec::with_capacity(modules.len());
        while let Some(pick) = ready.pop_first().or_else(|| remaining.first().cloned()) {
            remaining.remove(&pick);
            let id = pick.4;
            order.push(id);

            for p in providers.get(&id).into_iter().flatten() {
                let Some(n) = pending.get_mut(p) else { continue };
                *n = n.saturating_sub(1);
                let key = &keys[p];
                if *n == 0 && remaining.contains(key) {
                    ready.insert(key.clone());
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Attributes, MemoryRegistry};

    fn attrs(kind: &str) -> Attributes {
        [("kind".to_string(), kind.to_string())].into()
    }

    fn ids(order: &[ModuleId]) -> Vec<u64> {
        order.iter().map(|id| id.0).collect()
    }

    /// A uses B, B uses C, C uses A.
    fn cycle() -> (Arc<MemoryRegistry>, Vec<ModuleRef>) {
        let reg = MemoryRegistry::shared();
        let a = ModuleRef::new(1, "a");
        let b = ModuleRef::new(2, "b");
        let c = ModuleRef::new(3, "c");
        let ca = reg.register(a.id(), attrs("A"), 1);
        let cb = reg.register(b.id(), attrs("B"), 2);
        let cc = reg.register(c.id(), attrs("C"), 3);
        assert!(reg.acquire(cb, a.id()));
        assert!(reg.acquire(cc, b.id()));
        assert!(reg.acquire(ca, c.id()));
        (reg, vec![a, b, c])
    }

    #[test]
    fn consumer_closes_before_provider() {
        let reg = MemoryRegistry::shared();
        let provider = ModuleRef::new(1, "provider");
        let consumer = ModuleRef::new(2, "consumer");
        let cap = reg.register(provider.id(), attrs("Logger"), 0);
        reg.register(consumer.id(), attrs("Web"), 10);
        reg.acquire(cap, consumer.id());

        let seq = ShutdownSequencer::new(reg);
        assert_eq!(ids(&seq.compute(&[provider.clone(), consumer.clone()])), vec![2, 1]);
        assert_eq!(ids(&seq.compute(&[consumer, provider])), vec![2, 1]);
    }

    #[test]
    fn cycle_order_is_independent_of_input_order() {
        let (reg, mods) = cycle();
        let seq = ShutdownSequencer::new(reg);
        let expected = seq.compute(&mods);
        // Highest-ranked exporter (c) breaks the cycle; then a (uses b), then b.
        assert_eq!(ids(&expected), vec![3, 1, 2]);

        let perms = [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for p in perms {
            let input: Vec<ModuleRef> = p.iter().map(|&i| mods[i].clone()).collect();
            assert_eq!(seq.compute(&input), expected);
        }
        assert_eq!(seq.compute(&mods), expected);
    }

    #[test]
    fn unrelated_modules_follow_tie_break() {
        let reg = MemoryRegistry::shared();
        let quiet = ModuleRef::new(7, "quiet");
        let low = ModuleRef::new(1, "low");
        let high = ModuleRef::new(2, "high");
        let twin = ModuleRef::new(3, "twin");
        reg.register(low.id(), attrs("X"), 1);
        let first = reg.register(high.id(), attrs("Y"), 9);
        let second = reg.register(twin.id(), attrs("Y"), 9);
        assert!(first < second);

        let seq = ShutdownSequencer::new(reg);
        let order = seq.compute(&[low, twin, quiet, high]);
        assert_eq!(ids(&order), vec![7, 2, 3, 1]);
    }

    #[test]
    fn ties_without_exports_fall_back_to_name() {
        let reg = MemoryRegistry::shared();
        let seq = ShutdownSequencer::new(reg);
        let order = seq.compute(&[ModuleRef::new(1, "zeta"), ModuleRef::new(2, "alpha")]);
        assert_eq!(ids(&order), vec![2, 1]);
    }

    #[test]
    fn result_is_a_permutation_of_distinct_inputs() {
        let (reg, mut mods) = cycle();
        mods.push(ModuleRef::new(4, "d"));
        mods.push(mods[0].clone());
        let seq = ShutdownSequencer::new(reg);
        let mut order = ids(&seq.compute(&mods));
        order.sort_unstable();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(seq.compute(&[]).is_empty());
    }

    #[test]
    fn self_use_and_inactive_users_are_ignored() {
        let reg = MemoryRegistry::shared();
        let a = ModuleRef::new(1, "a");
        let b = ModuleRef::new(2, "b");
        let ca = reg.register(a.id(), attrs("A"), 0);
        let cb = reg.register(b.id(), attrs("B"), 5);
        reg.acquire(ca, a.id());
        reg.acquire(cb, ModuleId(99));

        let seq = ShutdownSequencer::new(reg);
        assert_eq!(ids(&seq.compute(&[a, b])), vec![2, 1]);
    }
}

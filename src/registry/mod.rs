use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::{Pair, PairCounters};

/// Immutable snapshot swapped in wholesale on reload.
struct Snapshot {
    pairs: HashMap<i64, Pair>,
    /// Secondary index: source chat id -> pair ids routed from it.
    source_to_pairs: HashMap<i64, Vec<i64>>,
}

impl Snapshot {
    fn build(pairs: Vec<Pair>) -> Self {
        let mut by_id = HashMap::with_capacity(pairs.len());
        let mut source_to_pairs: HashMap<i64, Vec<i64>> = HashMap::new();
        for pair in pairs {
            source_to_pairs.entry(pair.source_chat_id).or_default().push(pair.id);
            by_id.insert(pair.id, pair);
        }
        Self {
            pairs: by_id,
            source_to_pairs,
        }
    }
}

/// Read-mostly, atomically-reloadable view of all configured replication
/// pairs.
///
/// Grounded on `original_source/bot_manager.py`'s `self.pairs` +
/// `self.source_to_pairs` dicts, rebuilt wholesale on `reload()` the way
/// the original reloads its in-memory pair table from the database.
/// Uses `arc-swap` for the atomic-swap semantics spec.md §5 requires —
/// readers never block on a writer rebuilding the secondary index.
pub struct PairRegistry {
    snapshot: ArcSwap<Snapshot>,
}

impl PairRegistry {
    pub fn new(pairs: Vec<Pair>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::build(pairs)),
        }
    }

    /// Atomically replaces the entire pair set, e.g. after the control
    /// plane persists a mutation to the store.
    pub fn reload(&self, pairs: Vec<Pair>) {
        self.snapshot.store(Arc::new(Snapshot::build(pairs)));
    }

    pub fn get(&self, pair_id: i64) -> Option<Pair> {
        self.snapshot.load().pairs.get(&pair_id).cloned()
    }

    /// All pairs routed from a given source chat, active or not — callers
    /// filter on `Pair::is_active` themselves.
    pub fn pairs_for_source(&self, source_chat_id: i64) -> Vec<Pair> {
        let snapshot = self.snapshot.load();
        match snapshot.source_to_pairs.get(&source_chat_id) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| snapshot.pairs.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn all(&self) -> Vec<Pair> {
        self.snapshot.load().pairs.values().cloned().collect()
    }

    /// In-memory-only bot reassignment, used by the control plane's
    /// rebalance mutation. Per spec.md §9 this is explicitly *not*
    /// persisted — a subsequent `reload()` from the store will revert it.
    pub fn reassign_bot(&self, pair_id: i64, new_bot_index: usize) -> bool {
        let snapshot = self.snapshot.load();
        let mut pairs: Vec<Pair> = snapshot.pairs.values().cloned().collect();
        let Some(pair) = pairs.iter_mut().find(|p| p.id == pair_id) else {
            return false;
        };
        pair.bot_index = new_bot_index;
        self.snapshot.store(Arc::new(Snapshot::build(pairs)));
        true
    }

    /// Applies `f` to a single pair's counters and republishes the
    /// snapshot, mirroring `reassign_bot`'s clone-mutate-swap shape. Used
    /// by `WorkerPool` after every send/edit/delete/filter outcome so
    /// `Pair::counters` stays current for the control plane's status
    /// queries — counters are in-memory-only the same way bot
    /// reassignment is, so a `reload()` from the store resets them.
    pub fn update_counters(&self, pair_id: i64, f: impl FnOnce(&mut PairCounters)) -> bool {
        let snapshot = self.snapshot.load();
        let mut pairs: Vec<Pair> = snapshot.pairs.values().cloned().collect();
        let Some(pair) = pairs.iter_mut().find(|p| p.id == pair_id) else {
            return false;
        };
        f(&mut pair.counters);
        self.snapshot.store(Arc::new(Snapshot::build(pairs)));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FilterConfig, PairCounters, PairStatus};

    fn pair(id: i64, source: i64) -> Pair {
        Pair {
            id,
            source_chat_id: source,
            dest_chat_id: 100 + id,
            bot_index: 0,
            status: PairStatus::Active,
            filters: FilterConfig::default(),
            counters: PairCounters::default(),
        }
    }

    #[test]
    fn indexes_pairs_by_source_chat() {
        let registry = PairRegistry::new(vec![pair(1, 10), pair(2, 10), pair(3, 20)]);
        assert_eq!(registry.pairs_for_source(10).len(), 2);
        assert_eq!(registry.pairs_for_source(20).len(), 1);
        assert!(registry.pairs_for_source(99).is_empty());
    }

    #[test]
    fn reload_replaces_the_whole_snapshot() {
        let registry = PairRegistry::new(vec![pair(1, 10)]);
        registry.reload(vec![pair(2, 20)]);
        assert!(registry.get(1).is_none());
        assert!(registry.get(2).is_some());
    }

    #[test]
    fn reassign_bot_is_visible_but_in_memory_only() {
        let registry = PairRegistry::new(vec![pair(1, 10)]);
        assert!(registry.reassign_bot(1, 3));
        assert_eq!(registry.get(1).unwrap().bot_index, 3);

        registry.reload(vec![pair(1, 10)]);
        assert_eq!(registry.get(1).unwrap().bot_index, 0);
    }

    #[test]
    fn update_counters_mutates_in_place_and_is_reset_on_reload() {
        let registry = PairRegistry::new(vec![pair(1, 10)]);
        assert!(registry.update_counters(1, |c| c.messages_copied += 1));
        assert_eq!(registry.get(1).unwrap().counters.messages_copied, 1);

        registry.reload(vec![pair(1, 10)]);
        assert_eq!(registry.get(1).unwrap().counters.messages_copied, 0);
    }

    #[test]
    fn update_counters_on_unknown_pair_returns_false() {
        let registry = PairRegistry::new(vec![pair(1, 10)]);
        assert!(!registry.update_counters(99, |c| c.messages_copied += 1));
    }
}

// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Instant;

use cache_types::{BindingKey, ContextId, ObjectId, Parameters};
use dashmap::DashMap;
use parking_lot::RwLock;
use prometheus::Registry;
use tracing::debug;

use crate::entry::Entry;
use crate::metrics::CacheMetrics;
use crate::state::EntryState;

/// An entry caching one object's value.
pub type ObjectEntry<V> = Entry<ObjectId, V>;

/// An entry caching one name binding; the value is the bound object id.
pub type BindingEntry = Entry<BindingKey, ObjectId>;

/// Node-local cache of object values and name bindings.
///
/// The container owns the entry indexes; all lifecycle state lives in the
/// entries themselves (see [`Entry`]). Bindings are kept ordered so the
/// namespace can be probed past a given key, up to the sentinel last
/// binding which sorts after every name.
pub struct EntryCache<V> {
    parameters: Parameters,
    objects: DashMap<ObjectId, Arc<ObjectEntry<V>>>,
    bindings: RwLock<BTreeMap<BindingKey, Arc<BindingEntry>>>,
    metrics: Arc<CacheMetrics>,
}

impl<V> EntryCache<V> {
    pub fn new(parameters: Parameters, registry: &Registry) -> Self {
        Self {
            parameters,
            objects: DashMap::new(),
            bindings: RwLock::new(BTreeMap::new()),
            metrics: CacheMetrics::new(registry),
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Number of entries across both indexes.
    pub fn len(&self) -> usize {
        self.objects.len() + self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the cache is at or above its configured capacity and
    /// evictions should be requested.
    pub fn is_full(&self) -> bool {
        self.len() >= self.parameters.cache_size
    }

    /// The deadline for waits issued on behalf of a transaction starting
    /// to block now.
    pub fn wait_deadline(&self) -> Instant {
        Instant::now() + self.parameters.lock_timeout
    }

    /// Inserts a new entry for `id`, constructed in `initial_state`.
    /// Inserting an object that is already cached is a caller bug.
    pub fn insert_object(
        &self,
        id: ObjectId,
        context_id: ContextId,
        initial_state: EntryState,
    ) -> Arc<ObjectEntry<V>> {
        let entry = Arc::new(Entry::new(id, context_id, initial_state));
        let previous = self.objects.insert(id, entry.clone());
        assert!(previous.is_none(), "object {id} is already cached");
        debug!(%id, state = ?initial_state, "object entry cached");
        entry
    }

    /// Looks up the entry caching `id`.
    pub fn object(&self, id: &ObjectId) -> Option<Arc<ObjectEntry<V>>> {
        let found = self.objects.get(id).map(|entry| entry.value().clone());
        if found.is_some() {
            self.metrics.object_hits.inc();
        } else {
            self.metrics.object_misses.inc();
        }
        found
    }

    /// Drops the entry for `id` from the index. Only decached entries may
    /// leave the cache; anything else is a caller bug. Removing an object
    /// that is not cached is a no-op.
    pub fn remove_object(&self, id: &ObjectId) {
        let Some(entry) = self.objects.get(id).map(|entry| entry.value().clone()) else {
            return;
        };
        assert!(
            entry.lock().is_decached(),
            "removing object {id} before it was decached"
        );
        self.objects.remove(id);
        self.metrics.evicted_entries.inc();
        debug!(%id, "object entry removed");
    }

    /// Inserts a new entry for the binding `key`, constructed in
    /// `initial_state`. Inserting a binding that is already cached is a
    /// caller bug.
    pub fn insert_binding(
        &self,
        key: BindingKey,
        context_id: ContextId,
        initial_state: EntryState,
    ) -> Arc<BindingEntry> {
        let entry = Arc::new(Entry::new(key.clone(), context_id, initial_state));
        let previous = self.bindings.write().insert(key.clone(), entry.clone());
        assert!(previous.is_none(), "binding {key} is already cached");
        debug!(%key, state = ?initial_state, "binding entry cached");
        entry
    }

    /// Looks up the entry caching the binding `key`.
    pub fn binding(&self, key: &BindingKey) -> Option<Arc<BindingEntry>> {
        let found = self.bindings.read().get(key).cloned();
        if found.is_some() {
            self.metrics.binding_hits.inc();
        } else {
            self.metrics.binding_misses.inc();
        }
        found
    }

    /// The first cached binding strictly after `key` in namespace order.
    /// The sentinel last binding sorts after every name, so a probe that
    /// runs off the end of the bound names lands on it when it is cached.
    pub fn next_binding(&self, key: &BindingKey) -> Option<Arc<BindingEntry>> {
        self.bindings
            .read()
            .range((Bound::Excluded(key.clone()), Bound::Unbounded))
            .next()
            .map(|(_, entry)| entry.clone())
    }

    /// Drops the entry for the binding `key` from the index. Only decached
    /// entries may leave the cache. Removing a binding that is not cached
    /// is a no-op.
    pub fn remove_binding(&self, key: &BindingKey) {
        let Some(entry) = self.bindings.read().get(key).cloned() else {
            return;
        };
        assert!(
            entry.lock().is_decached(),
            "removing binding {key} before it was decached"
        );
        self.bindings.write().remove(key);
        self.metrics.evicted_entries.inc();
        debug!(%key, "binding entry removed");
    }

    /// Up to `count` object entries that look cheapest to evict: settled in
    /// a cached state, least recently used first, judged by the monotone
    /// access stamp. Entries whose lock is contended are skipped rather
    /// than waited on; the eviction worker will see them again next round.
    pub fn eviction_candidates(&self, count: usize) -> Vec<Arc<ObjectEntry<V>>> {
        let mut candidates: Vec<(ContextId, Arc<ObjectEntry<V>>)> = Vec::new();
        for item in self.objects.iter() {
            let entry = item.value();
            let Some(guard) = entry.try_lock() else {
                continue;
            };
            // Entries mid-transition or already on their way out are not
            // candidates.
            if guard.is_reading()
                || guard.is_upgrading()
                || guard.is_downgrading()
                || guard.is_decaching()
                || guard.is_decached()
            {
                continue;
            }
            candidates.push((guard.context_id(), entry.clone()));
        }
        candidates.sort_by_key(|(context_id, _)| *context_id);
        candidates.truncate(count);
        debug!(candidates = candidates.len(), "collected eviction candidates");
        candidates.into_iter().map(|(_, entry)| entry).collect()
    }

    /// [`EntryCache::eviction_candidates`] sized by the configured
    /// eviction batch.
    pub fn eviction_batch(&self) -> Vec<Arc<ObjectEntry<V>>> {
        self.eviction_candidates(self.parameters.eviction_batch_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_cache() -> EntryCache<u64> {
        EntryCache::new(Parameters::default(), &Registry::new())
    }

    #[test]
    fn object_lookup_counts_hits_and_misses() {
        let cache = test_cache();
        cache.insert_object(ObjectId::new(1), 1, EntryState::FetchingRead);

        assert!(cache.object(&ObjectId::new(1)).is_some());
        assert!(cache.object(&ObjectId::new(2)).is_none());
        assert_eq!(cache.metrics().object_hits.get(), 1);
        assert_eq!(cache.metrics().object_misses.get(), 1);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn remove_requires_decached() {
        let cache = test_cache();
        let id = ObjectId::new(3);
        let entry = cache.insert_object(id, 1, EntryState::CachedRead);

        entry.lock().set_evicted_immediate().unwrap();
        cache.remove_object(&id);
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().evicted_entries.get(), 1);

        // Removing again is a no-op.
        cache.remove_object(&id);
        assert_eq!(cache.metrics().evicted_entries.get(), 1);
    }

    #[test]
    #[should_panic(expected = "before it was decached")]
    fn remove_of_live_entry_panics() {
        let cache = test_cache();
        let id = ObjectId::new(4);
        cache.insert_object(id, 1, EntryState::CachedRead);
        cache.remove_object(&id);
    }

    #[test]
    #[should_panic(expected = "already cached")]
    fn duplicate_insert_panics() {
        let cache = test_cache();
        cache.insert_object(ObjectId::new(5), 1, EntryState::FetchingRead);
        cache.insert_object(ObjectId::new(5), 2, EntryState::FetchingRead);
    }

    #[test]
    fn binding_namespace_probe() {
        let cache = test_cache();
        cache.insert_binding(BindingKey::name("alpha"), 1, EntryState::CachedRead);
        cache.insert_binding(BindingKey::name("gamma"), 1, EntryState::CachedRead);
        cache.insert_binding(BindingKey::Last, 1, EntryState::CachedRead);

        let next = cache.next_binding(&BindingKey::name("alpha")).unwrap();
        assert_eq!(next.key(), &BindingKey::name("gamma"));

        // Past the last bound name the probe lands on the sentinel.
        let next = cache.next_binding(&BindingKey::name("gamma")).unwrap();
        assert!(next.key().is_last());

        // Nothing sorts after the sentinel.
        assert!(cache.next_binding(&BindingKey::Last).is_none());

        assert!(cache.binding(&BindingKey::name("alpha")).is_some());
        assert!(cache.binding(&BindingKey::name("beta")).is_none());
        assert_eq!(cache.metrics().binding_hits.get(), 1);
        assert_eq!(cache.metrics().binding_misses.get(), 1);
    }

    #[test]
    fn eviction_candidates_prefer_least_recently_used() {
        let cache = test_cache();
        cache.insert_object(ObjectId::new(1), 30, EntryState::CachedRead);
        cache.insert_object(ObjectId::new(2), 10, EntryState::CachedRead);
        cache.insert_object(ObjectId::new(3), 20, EntryState::CachedWrite);
        // Mid-fetch and decached entries are never candidates.
        cache.insert_object(ObjectId::new(4), 1, EntryState::FetchingRead);
        let gone = cache.insert_object(ObjectId::new(5), 1, EntryState::CachedRead);
        gone.lock().set_evicted_immediate().unwrap();

        let candidates = cache.eviction_candidates(2);
        let ids = candidates
            .iter()
            .map(|entry| entry.key().value())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 3]);

        // The configured batch size is larger than the candidate pool here.
        assert_eq!(cache.eviction_batch().len(), 3);

        // A contended entry lock disqualifies the entry for this round.
        let held = cache.object(&ObjectId::new(2)).unwrap();
        let _guard = held.lock();
        let candidates = cache.eviction_candidates(2);
        let ids = candidates
            .iter()
            .map(|entry| entry.key().value())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn capacity_accounting() {
        let parameters = Parameters {
            cache_size: 2,
            ..Parameters::default()
        };
        let cache: EntryCache<u64> = EntryCache::new(parameters, &Registry::new());
        assert!(!cache.is_full());
        cache.insert_object(ObjectId::new(1), 1, EntryState::FetchingRead);
        cache.insert_binding(BindingKey::name("a"), 1, EntryState::FetchingRead);
        assert!(cache.is_full());
    }
}

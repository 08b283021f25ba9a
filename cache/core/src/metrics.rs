// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use prometheus::{register_int_counter_with_registry, IntCounter, Registry};

/// Counters for the cache container. The entry state machine itself is
/// metrics-free; only index lookups and removals are counted.
pub struct CacheMetrics {
    /// Object lookups served from the cache.
    pub object_hits: IntCounter,
    /// Object lookups that missed the cache.
    pub object_misses: IntCounter,
    /// Binding lookups served from the cache.
    pub binding_hits: IntCounter,
    /// Binding lookups that missed the cache.
    pub binding_misses: IntCounter,
    /// Decached entries removed from the indexes.
    pub evicted_entries: IntCounter,
}

impl CacheMetrics {
    pub fn new(registry: &Registry) -> Arc<Self> {
        Arc::new(Self {
            object_hits: register_int_counter_with_registry!(
                "cache_object_hits",
                "Object lookups served from the cache",
                registry
            )
            .unwrap(),
            object_misses: register_int_counter_with_registry!(
                "cache_object_misses",
                "Object lookups that missed the cache",
                registry
            )
            .unwrap(),
            binding_hits: register_int_counter_with_registry!(
                "cache_binding_hits",
                "Binding lookups served from the cache",
                registry
            )
            .unwrap(),
            binding_misses: register_int_counter_with_registry!(
                "cache_binding_misses",
                "Binding lookups that missed the cache",
                registry
            )
            .unwrap(),
            evicted_entries: register_int_counter_with_registry!(
                "cache_evicted_entries",
                "Decached entries removed from the indexes",
                registry
            )
            .unwrap(),
        })
    }

    pub fn new_for_tests() -> Arc<Self> {
        Self::new(&Registry::new())
    }
}

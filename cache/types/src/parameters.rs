// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operational configuration of a node-local entry cache.
///
/// All fields only affect this node's resource usage and latency, never
/// the correctness of the store.
///
/// NOTE: default values should make sense, so most operators should not need to specify any field.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Parameters {
    /// Maximum number of entries held across the object and binding
    /// indexes before the cache asks for evictions.
    #[serde(default = "Parameters::default_cache_size")]
    pub cache_size: usize,

    /// How many eviction candidates to collect per eviction round.
    #[serde(default = "Parameters::default_eviction_batch_size")]
    pub eviction_batch_size: usize,

    /// Budget a transaction gets when blocking on an entry transition.
    /// Deadlines handed to the wait operations are derived from this.
    #[serde(default = "Parameters::default_lock_timeout")]
    pub lock_timeout: Duration,
}

impl Parameters {
    pub fn default_cache_size() -> usize {
        5000
    }

    pub fn default_eviction_batch_size() -> usize {
        64
    }

    pub fn default_lock_timeout() -> Duration {
        Duration::from_millis(100)
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            cache_size: Parameters::default_cache_size(),
            eviction_batch_size: Parameters::default_eviction_batch_size(),
            lock_timeout: Parameters::default_lock_timeout(),
        }
    }
}

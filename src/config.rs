//! Hub configuration
//!
//! All tunables for the hub live here: debounce coalescing, cache sizing
//! and expiry, and the liveness sweep that reaps unresponsive connections.

use std::time::Duration;

/// Configuration for the hub coordinator and its supporting stores
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Debounce window applied when no subscription requests its own
    pub default_debounce: Duration,
    /// TTL for every cache entry (no caller may request an unbounded entry)
    pub cache_ttl: Duration,
    /// Maximum number of live cache entries before LRU eviction kicks in
    pub cache_max_entries: usize,
    /// Number of cache shards (reduces lock contention under load)
    pub cache_shards: usize,
    /// How often the background sweep evicts expired cache entries
    pub cache_sweep_interval: Duration,
    /// How often the liveness sweep looks for stale connections
    pub liveness_sweep_interval: Duration,
    /// A connection with no activity for this long is forcibly closed
    pub liveness_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_debounce: Duration::from_millis(300),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            cache_shards: 8,
            cache_sweep_interval: Duration::from_secs(60),
            liveness_sweep_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(90),
        }
    }
}

//! Sharded result cache with TTL and tag-based invalidation
//!
//! Stores previously computed analysis/search/pattern results keyed by a
//! deterministic fingerprint of their inputs. Each entry carries a mandatory
//! TTL and a set of tags; `invalidate_tag` drops every entry carrying a tag
//! through an inverted tag index, so a file edit can evict all results for
//! that file without scanning the whole store.
//!
//! Expiry is checked lazily on `get` (an expired entry reads as a miss and is
//! evicted on access) and eagerly by `sweep_expired`, which the hub runs on a
//! timer to bound memory. When a shard exceeds its capacity the
//! least-recently-used entry is evicted; every `get` hit counts as a use.
//!
//! The store is sharded by fingerprint hash. Reads and writes lock one shard
//! at a time and never hold a lock across an await point, so request paths
//! can hit the cache concurrently with fan-out and timer work.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

// FNV-1a constants for 64-bit hashing. A fixed-seed hash keeps fingerprints
// reproducible across processes, unlike the randomly seeded std hasher.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Compute a deterministic, order-sensitive fingerprint over input parts.
///
/// Each part is hashed with its length prefix so `["ab", "c"]` and
/// `["a", "bc"]` produce different keys.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hash = FNV_OFFSET;
    for part in parts {
        for &byte in part.len().to_le_bytes().iter() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        for &byte in part.as_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    format!("{:016x}", hash)
}

/// A single cached result
struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
    ttl: Duration,
    tags: Vec<String>,
    last_used: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// One shard: primary map plus the inverted tag index
#[derive(Default)]
struct Shard {
    entries: HashMap<String, CacheEntry>,
    by_tag: HashMap<String, HashSet<String>>,
}

impl Shard {
    fn unlink_tags(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(tag);
                }
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        let tags = entry.tags.clone();
        self.unlink_tags(key, &tags);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone())?;
        self.remove(&victim);
        Some(victim)
    }
}

/// Statistics snapshot for the cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Sharded, TTL-bounded, tag-invalidated result cache
pub struct ResultCache {
    shards: Vec<Mutex<Shard>>,
    max_per_shard: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    /// Create a cache with the given shard count and total capacity
    pub fn new(shards: usize, max_entries: usize) -> Self {
        let shards = shards.max(1);
        let max_per_shard = (max_entries / shards).max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            max_per_shard,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &str) -> &Mutex<Shard> {
        let idx = (fnv1a_hash(key.as_bytes()) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Look up a fingerprint. Expired entries read as misses and are evicted
    /// on access; a hit refreshes the entry's LRU position.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut shard = self.shard_for(key).lock();

        let expired = match shard.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            shard.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = shard.entries.get_mut(key)?;
        entry.last_used = now;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert a value under a fingerprint. The TTL is mandatory; a fingerprint
    /// maps to at most one live entry, so re-inserting replaces. Overflowing
    /// the shard capacity evicts the least-recently-used entry.
    pub fn put(&self, key: &str, value: serde_json::Value, ttl: Duration, tags: &[String]) {
        let now = Instant::now();
        let mut shard = self.shard_for(key).lock();

        shard.remove(key);
        if shard.entries.len() >= self.max_per_shard {
            if shard.evict_lru().is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        for tag in tags {
            shard
                .by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        shard.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                ttl,
                tags: tags.to_vec(),
                last_used: now,
            },
        );
    }

    /// Remove every entry carrying the given tag. Returns the number removed.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let keys: Vec<String> = shard
                .by_tag
                .get(tag)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            for key in keys {
                if shard.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::debug!("Invalidated {} cache entries for tag {}", removed, tag);
        }
        removed
    }

    /// Eagerly evict expired entries across all shards. Returns the count.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let expired: Vec<String> = shard
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                shard.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("Cache sweep evicted {} expired entries", removed);
        }
        removed
    }

    /// Number of live entries (including not-yet-swept expired ones)
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint(&["function h(){}", "typescript", "f.ts"]);
        let b = fingerprint(&["function h(){}", "typescript", "f.ts"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_order_sensitive() {
        let a = fingerprint(&["x", "y"]);
        let b = fingerprint(&["y", "x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_boundary_sensitive() {
        let a = fingerprint(&["ab", "c"]);
        let b = fingerprint(&["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ResultCache::new(4, 100);
        let key = fingerprint(&["code", "rust"]);
        cache.put(&key, json!({"symbols": 3}), TTL, &["rust".to_string()]);

        assert_eq!(cache.get(&key), Some(json!({"symbols": 3})));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_reinsert_replaces() {
        let cache = ResultCache::new(1, 100);
        cache.put("k", json!(1), TTL, &[]);
        cache.put("k", json!(2), TTL, &[]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), Some(json!(2)));
    }

    #[test]
    fn test_ttl_expiry_is_lazy_miss() {
        let cache = ResultCache::new(1, 100);
        cache.put("k", json!("v"), Duration::from_millis(10), &[]);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.get("k"), None);
        // Expired entry was evicted on access
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_tag_removes_exactly_tagged() {
        let cache = ResultCache::new(4, 100);
        for i in 0..3 {
            cache.put(
                &format!("py_{}", i),
                json!(i),
                TTL,
                &["python".to_string()],
            );
        }
        for i in 0..2 {
            cache.put(&format!("rs_{}", i), json!(i), TTL, &["rust".to_string()]);
        }

        assert_eq!(cache.invalidate_tag("python"), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("rs_0").is_some());
        assert!(cache.get("rs_1").is_some());
        assert!(cache.get("py_0").is_none());
    }

    #[test]
    fn test_invalidate_tag_by_file_id() {
        let cache = ResultCache::new(4, 100);
        cache.put(
            "a",
            json!("a"),
            TTL,
            &["typescript".to_string(), "f.ts".to_string()],
        );
        cache.put(
            "b",
            json!("b"),
            TTL,
            &["typescript".to_string(), "g.ts".to_string()],
        );

        assert_eq!(cache.invalidate_tag("f.ts"), 1);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        // Tag index no longer references the removed entry
        assert_eq!(cache.invalidate_tag("typescript"), 1);
    }

    #[test]
    fn test_lru_eviction_on_overflow() {
        // Single shard with room for two entries
        let cache = ResultCache::new(1, 2);
        cache.put("old", json!(1), TTL, &[]);
        std::thread::sleep(Duration::from_millis(5));
        cache.put("fresh", json!(2), TTL, &[]);

        // Touch "old" so "fresh" becomes the LRU victim
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("old").is_some());

        cache.put("new", json!(3), TTL, &[]);
        assert!(cache.get("old").is_some());
        assert!(cache.get("fresh").is_none());
        assert!(cache.get("new").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_sweep_expired() {
        let cache = ResultCache::new(2, 100);
        cache.put("short", json!(1), Duration::from_millis(10), &[]);
        cache.put("long", json!(2), TTL, &[]);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
    }
}

//! Load result caching
//!
//! Raw store responses are memoized by a fingerprint of the options that actually reached
//! the store. Stages evaluated on the client never contribute to the key; they are applied
//! again on every hit.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use crate::query::LoadOptions;
use crate::store::LoadResult;

// Query fingerprinting

/// Fingerprint identifying a store-bound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryFingerprint(u64);

impl QueryFingerprint {
    /// Hash the wire form of the options, so equal requests share a key.
    pub fn from_options(options: &LoadOptions) -> Self {
        Self::from_text(&options.to_json().to_string())
    }

    pub fn from_text(text: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        QueryFingerprint(hasher.finish())
    }

    /// Get the raw fingerprint value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

// Load Cache

/// Capacity-bounded cache of store responses with LRU eviction.
pub struct LoadCache {
    cache: RwLock<HashMap<QueryFingerprint, CachedLoad>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CachedLoad {
    result: Arc<LoadResult>,
    last_used: Instant,
    hit_count: u64,
}

impl LoadCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: QueryFingerprint) -> Option<Arc<LoadResult>> {
        let mut cache = self.cache.write();
        if let Some(entry) = cache.get_mut(&key) {
            entry.last_used = Instant::now();
            entry.hit_count += 1;
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.result.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn insert(&self, key: QueryFingerprint, result: LoadResult) -> Arc<LoadResult> {
        let mut cache = self.cache.write();

        // Evict if at capacity
        if !cache.contains_key(&key) && cache.len() >= self.max_entries {
            Self::evict_one(&mut cache);
        }

        let result = Arc::new(result);
        cache.insert(
            key,
            CachedLoad {
                result: result.clone(),
                last_used: Instant::now(),
                hit_count: 0,
            },
        );
        result
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        CacheStats {
            entries: cache.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_hits: cache.values().map(|e| e.hit_count).sum(),
        }
    }

    fn evict_one(cache: &mut HashMap<QueryFingerprint, CachedLoad>) {
        // LRU eviction: remove the least recently used entry
        if let Some((&oldest, _)) = cache.iter().min_by_key(|(_, v)| v.last_used) {
            cache.remove(&oldest);
        }
    }
}

impl std::fmt::Debug for LoadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits summed over live entries only.
    pub entry_hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;
    use crate::query::SortDescriptor;
    use gridsource_common::Value;

    fn result(n: i32) -> LoadResult {
        LoadResult::new(vec![Item::Row(Value::from(n))])
    }

    #[test]
    fn equal_options_share_a_fingerprint() {
        let a = LoadOptions {
            sort: vec![SortDescriptor::new("x", false)],
            skip: Some(0),
            take: Some(10),
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(QueryFingerprint::from_options(&a), QueryFingerprint::from_options(&b));

        let c = LoadOptions {
            skip: Some(10),
            ..a.clone()
        };
        assert_ne!(QueryFingerprint::from_options(&a), QueryFingerprint::from_options(&c));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = LoadCache::new(2);
        let k1 = QueryFingerprint::from_text("1");
        let k2 = QueryFingerprint::from_text("2");
        let k3 = QueryFingerprint::from_text("3");

        cache.insert(k1, result(1));
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.insert(k2, result(2));
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(cache.get(k1).is_some());
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.insert(k3, result(3));

        assert!(cache.get(k2).is_none());
        assert!(cache.get(k1).is_some());
        assert!(cache.get(k3).is_some());

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
    }
}

//! Shared term cache: `(text, kind) → UUID`.
//!
//! One instance is shared across requests. Batch reads return only the keys
//! that are cached; the resolver fills misses from the database and writes
//! them back. Entries are immutable facts (a term's UUID never changes), so
//! there is no invalidation path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

use super::TermKey;

const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Debug)]
pub struct TermCache {
    entries: Mutex<HashMap<TermKey, Uuid>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl Default for TermCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl TermCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Non-blocking batch probe: returns the cached subset of `keys`.
    pub fn get_batch(&self, keys: &[TermKey]) -> HashMap<TermKey, Uuid> {
        let entries = self.entries.lock().expect("term cache poisoned");
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(uuid) = entries.get(key) {
                found.insert(key.clone(), *uuid);
            }
        }
        let hit_count = found.len() as u64;
        self.hits.fetch_add(hit_count, Ordering::Relaxed);
        self.misses
            .fetch_add(keys.len() as u64 - hit_count, Ordering::Relaxed);
        found
    }

    /// Record freshly resolved terms. When the cache is full, new entries are
    /// dropped rather than evicting; UUID lookups stay correct either way.
    pub fn put_batch(&self, resolved: &HashMap<TermKey, Uuid>) {
        let mut entries = self.entries.lock().expect("term cache poisoned");
        for (key, uuid) in resolved {
            if entries.len() >= self.max_entries && !entries.contains_key(key) {
                log::debug!(
                    "term cache full ({} entries), skipping insert for {:?}",
                    entries.len(),
                    key.text
                );
                continue;
            }
            entries.insert(key.clone(), *uuid);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().expect("term cache poisoned").len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(text: &str) -> TermKey {
        TermKey::uri(text)
    }

    #[test]
    fn get_batch_partitions_hits_and_misses() {
        let cache = TermCache::new(10);
        let a = key("urn:a");
        let b = key("urn:b");
        let uuid_a = Uuid::new_v4();

        let mut put = HashMap::new();
        put.insert(a.clone(), uuid_a);
        cache.put_batch(&put);

        let found = cache.get_batch(&[a.clone(), b.clone()]);
        assert_eq!(found.len(), 1);
        assert_eq!(found.get(&a), Some(&uuid_a));
        assert!(!found.contains_key(&b));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn full_cache_keeps_existing_entries() {
        let cache = TermCache::new(1);
        let a = key("urn:a");
        let b = key("urn:b");
        let uuid_a = Uuid::new_v4();
        let uuid_b = Uuid::new_v4();

        let mut put = HashMap::new();
        put.insert(a.clone(), uuid_a);
        cache.put_batch(&put);

        let mut put = HashMap::new();
        put.insert(b.clone(), uuid_b);
        cache.put_batch(&put);

        let found = cache.get_batch(&[a.clone()]);
        assert_eq!(found.get(&a), Some(&uuid_a));
        assert!(cache.get_batch(&[b]).is_empty());
    }

    #[test]
    fn literal_and_uri_keys_are_distinct() {
        let cache = TermCache::new(10);
        let uri = TermKey::uri("Alice");
        let lit = TermKey::literal("Alice");
        let uuid_uri = Uuid::new_v4();

        let mut put = HashMap::new();
        put.insert(uri.clone(), uuid_uri);
        cache.put_batch(&put);

        assert!(cache.get_batch(&[lit]).is_empty());
        assert_eq!(cache.get_batch(&[uri.clone()]).get(&uri), Some(&uuid_uri));
    }
}

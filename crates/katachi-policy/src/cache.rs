//! Process-local cache tier
//!
//! Keeps rendered policy results per Application, keyed by the spec hash
//! at render time, with a fixed TTL. Readers share the lock; writers are
//! exclusive.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::record::RenderedPolicyResult;

/// Default entry lifetime
pub const LOCAL_CACHE_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    app_spec_hash: String,
    results: Vec<RenderedPolicyResult>,
    cached_at: Instant,
}

/// Process-local rendered-result cache
pub struct PolicyResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for PolicyResultCache {
    fn default() -> Self {
        Self::new(LOCAL_CACHE_TTL)
    }
}

impl PolicyResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    /// Cached results, unless the spec hash moved or the entry aged out
    pub fn get(
        &self,
        namespace: &str,
        name: &str,
        current_hash: &str,
    ) -> Option<Vec<RenderedPolicyResult>> {
        let key = Self::key(namespace, name);
        {
            let entries = self.entries.read();
            let entry = entries.get(&key)?;
            if entry.app_spec_hash == current_hash && entry.cached_at.elapsed() < self.ttl {
                return Some(entry.results.clone());
            }
        }
        // stale entry: drop it so the next write starts clean
        self.entries.write().remove(&key);
        None
    }

    pub fn put(
        &self,
        namespace: &str,
        name: &str,
        app_spec_hash: &str,
        results: Vec<RenderedPolicyResult>,
    ) {
        self.entries.write().insert(
            Self::key(namespace, name),
            CacheEntry {
                app_spec_hash: app_spec_hash.to_string(),
                results,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for one Application
    pub fn invalidate(&self, namespace: &str, name: &str) {
        self.entries.write().remove(&Self::key(namespace, name));
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RenderedPolicyResult;

    fn results() -> Vec<RenderedPolicyResult> {
        vec![RenderedPolicyResult::skipped("p", "default", 0, "test")]
    }

    #[test]
    fn hit_requires_matching_hash() {
        let cache = PolicyResultCache::default();
        cache.put("default", "demo", "h1", results());
        assert!(cache.get("default", "demo", "h1").is_some());
        assert!(cache.get("default", "demo", "h2").is_none());
        // the mismatch evicted the entry
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = PolicyResultCache::new(Duration::from_millis(0));
        cache.put("default", "demo", "h1", results());
        assert!(cache.get("default", "demo", "h1").is_none());
    }

    #[test]
    fn invalidate_by_application_and_all() {
        let cache = PolicyResultCache::default();
        cache.put("default", "a", "h", results());
        cache.put("default", "b", "h", results());
        cache.invalidate("default", "a");
        assert!(cache.get("default", "a", "h").is_none());
        assert!(cache.get("default", "b", "h").is_some());
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}

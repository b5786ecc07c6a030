//! Generic TTL cache keyed by an arbitrary hashable key, used for realtime
//! quotes and history slices.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    inner: RwLock<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value if present and not expired. A miss or an
    /// expired entry both count as "not in cache" for callers deciding
    /// whether to issue a network call.
    pub fn get(&self, key: &K) -> Option<V> {
        let guard = self.inner.read();
        let entry = guard.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Compare-and-set on TTL: write only happens under the lock's own
    /// critical section, so concurrent writers race on the same entry
    /// but never observe a torn value.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.inner.write();
        guard.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_within_ttl_then_expires() {
        let cache: TtlCache<String, i32> = TtlCache::new();
        cache.set("a".to_string(), 1, Duration::from_millis(20));
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get(&"a".to_string()), None);
    }
}

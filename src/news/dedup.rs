//! Bounded FIFO fingerprint cache for cross-request news dedup.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

pub struct FingerprintCache {
    capacity: usize,
    order: Mutex<VecDeque<String>>,
    seen: Mutex<HashSet<String>>,
}

impl FingerprintCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Mutex::new(VecDeque::with_capacity(capacity)),
            seen: Mutex::new(HashSet::with_capacity(capacity)),
        }
    }

    /// Returns true if this fingerprint is new (and records it), false if
    /// it's a duplicate already tracked in the window.
    pub fn insert_if_new(&self, fingerprint: &str) -> bool {
        let mut seen = self.seen.lock();
        if !seen.insert(fingerprint.to_string()) {
            return false;
        }
        let mut order = self.order.lock();
        order.push_back(fingerprint.to_string());
        if order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                seen.remove(&evicted);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_fingerprint_rejected() {
        let cache = FingerprintCache::new(10);
        assert!(cache.insert_if_new("a"));
        assert!(!cache.insert_if_new("a"));
    }

    #[test]
    fn eviction_lets_old_fingerprint_reappear() {
        let cache = FingerprintCache::new(2);
        assert!(cache.insert_if_new("a"));
        assert!(cache.insert_if_new("b"));
        assert!(cache.insert_if_new("c"));
        assert!(cache.insert_if_new("a"));
    }
}

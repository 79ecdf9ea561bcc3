//! Duplicate-delivery suppression: a set-if-absent-with-expiry store.
//!
//! Webhook platforms retry on slow responses, so near-simultaneous duplicate
//! deliveries are routine. Admission must be atomic at the store level; the
//! jitter helper only thins out the race, it is not the mechanism.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Atomic admission primitive. The first caller to claim a key within its
/// ttl window gets `true`; everyone else gets `false` until the key expires.
pub trait DedupStore: Send + Sync {
    fn try_admit(&self, key: &str, ttl: Duration) -> bool;
}

/// In-process TTL map with a bounded key count. Oldest key is evicted when
/// the bound is hit, which can only widen the duplicate window under memory
/// pressure, never lose a legitimate first delivery.
#[derive(Debug)]
pub struct MemoryDedupStore {
    max_keys: usize,
    keys: Mutex<HashMap<String, Instant>>,
}

impl MemoryDedupStore {
    pub fn new(max_keys: usize) -> Self {
        Self {
            max_keys: max_keys.max(1),
            keys: Mutex::new(HashMap::new()),
        }
    }
}

impl DedupStore for MemoryDedupStore {
    fn try_admit(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock();

        keys.retain(|_, expires_at| *expires_at > now);

        if keys.contains_key(key) {
            return false;
        }

        if keys.len() >= self.max_keys {
            let evict_key = keys
                .iter()
                .min_by_key(|(_, expires_at)| *expires_at)
                .map(|(k, _)| k.clone());
            if let Some(evict_key) = evict_key {
                keys.remove(&evict_key);
            }
        }

        keys.insert(key.to_owned(), now + ttl);
        true
    }
}

/// Small random delay applied before the admission check to reduce
/// thundering-herd races between near-simultaneous duplicate deliveries.
pub fn admission_jitter() -> Duration {
    use rand::RngExt;

    let millis = rand::rng().random_range(0..=300u64);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_admit_wins_duplicates_lose() {
        let store = MemoryDedupStore::new(100);
        let ttl = Duration::from_secs(30);
        assert!(store.try_admit("cb:7:abc", ttl));
        assert!(!store.try_admit("cb:7:abc", ttl));
        assert!(!store.try_admit("cb:7:abc", ttl));
        // A different key is unaffected.
        assert!(store.try_admit("cb:7:def", ttl));
    }

    #[test]
    fn key_is_readmittable_after_ttl_expiry() {
        let store = MemoryDedupStore::new(100);
        let ttl = Duration::from_millis(10);
        assert!(store.try_admit("cb:7:abc", ttl));
        std::thread::sleep(Duration::from_millis(25));
        assert!(store.try_admit("cb:7:abc", ttl));
    }

    #[test]
    fn eviction_keeps_store_bounded() {
        let store = MemoryDedupStore::new(2);
        let ttl = Duration::from_secs(60);
        assert!(store.try_admit("k1", ttl));
        assert!(store.try_admit("k2", ttl));
        assert!(store.try_admit("k3", ttl));
        assert!(store.keys.lock().len() <= 2);
    }

    #[test]
    fn concurrent_admission_admits_exactly_one() {
        use std::sync::Arc;

        let store = Arc::new(MemoryDedupStore::new(100));
        let ttl = Duration::from_secs(30);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.try_admit("cb:7:same-fingerprint", ttl)
            }));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..32 {
            assert!(admission_jitter() <= Duration::from_millis(300));
        }
    }
}

//! TTL-bounded key-value cache.
//!
//! Backs the competitor → project resolution cache (CACHE_TTL, default 1h).
//! Expired entries are evicted lazily on read and in bulk by the
//! housekeeping sweep.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use vg_domain::model::ResolutionEntry;

struct CacheSlot<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<K, V> {
    ttl: Duration,
    inner: Mutex<HashMap<K, CacheSlot<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().insert(
            key,
            CacheSlot {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Fetch a live entry; expired entries are removed on the way out.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(slot) if slot.inserted_at.elapsed() < self.ttl => Some(slot.value.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key).map(|slot| slot.value)
    }

    /// Evict every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.len();
        inner.retain(|_, slot| slot.inserted_at.elapsed() < self.ttl);
        before - inner.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Competitor id → resolved project mapping with confidence.
pub type ResolutionCache = TtlCache<Uuid, ResolutionEntry>;

//! Bounded, time-boxed result cache.
//!
//! Best-effort and read-only consistent: nothing invalidates entries when the
//! store mutates, so results may be up to the TTL stale. That trade-off is
//! deliberate; history search is not safety-critical and the TTL (default
//! 300 s) bounds the divergence.

use fxhash::FxHasher;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use crate::search::query::SearchQuery;
use crate::store::Collection;

struct Entry<T> {
    value: T,
    inserted: Instant,
}

struct Inner<T> {
    entries: HashMap<u64, Entry<T>>,
    /// Insertion order, oldest first. Eviction is deterministic: the single
    /// oldest-inserted entry goes when the cache is full.
    order: VecDeque<u64>,
}

/// A bounded TTL cache safe for concurrent in-flight searches.
pub struct SearchCache<T> {
    inner: Mutex<Inner<T>>,
    ttl: Duration,
    capacity: usize,
}

impl<T: Clone> SearchCache<T> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Deterministic key over the collection name and every field of the
    /// query, the continuation cursor included: page 2 must never be served
    /// page 1's cached result.
    pub fn key(collection: Collection, query: &SearchQuery) -> u64 {
        let mut hasher = FxHasher::default();
        collection.name().hash(&mut hasher);
        query.hash(&mut hasher);
        hasher.finish()
    }

    /// Expired entries are evicted lazily here, not by a background sweep.
    pub fn get(&self, key: u64) -> Option<T> {
        let mut inner = self.inner.lock();
        match inner.entries.get(&key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(&key);
                inner.order.retain(|k| *k != key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: u64, value: T) {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| *k != key);
        } else if inner.entries.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
        inner.order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

//! Expiring key/value store shared by the rate limiter and the cache.
//!
//! Entries are keyed by an opaque string and carry an optional deadline in
//! clock milliseconds. Expiry is lazy: an entry past its deadline is treated as
//! absent and removed by the next operation that observes it. An optional
//! capacity cap bounds memory for unbounded keyspaces such as client
//! identities.

use crate::clock::SharedClock;
use crate::metrics::record_store_eviction;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// A stored value with its bookkeeping
#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    /// First instant at which the entry is no longer visible
    expires_at: Option<u64>,
    inserted_at: u64,
}

impl<V> Slot<V> {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Compute a deadline from a TTL. A zero TTL never expires.
pub fn deadline_after(now: u64, ttl: Option<Duration>) -> Option<u64> {
    ttl.filter(|ttl| !ttl.is_zero())
        .map(|ttl| now.saturating_add(ttl.as_millis() as u64))
}

/// Concurrent keyed store with lazy expiry
pub struct KeyedStore<V> {
    /// Store name used in logs and metrics
    name: &'static str,
    entries: DashMap<String, Slot<V>>,
    /// Soft upper bound on the number of entries
    capacity: Option<usize>,
    /// Keys in insertion order, tagged with their `inserted_at`. Only kept for
    /// bounded stores; tags that no longer match an entry are stale.
    order: Mutex<VecDeque<(String, u64)>>,
    clock: SharedClock,
}

impl<V: Clone> KeyedStore<V> {
    /// Create an unbounded store
    pub fn new(name: &'static str, clock: SharedClock) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            capacity: None,
            order: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Create a store that evicts once `capacity` entries are held
    pub fn with_capacity(name: &'static str, clock: SharedClock, capacity: usize) -> Self {
        Self {
            name,
            entries: DashMap::with_capacity(capacity.min(1024)),
            capacity: Some(capacity),
            order: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            clock,
        }
    }

    /// Current time according to the store's clock
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Get a clone of the live value under `key`
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key, V::clone)
    }

    /// Whether a live value exists under `key`
    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key, |_| ()).is_some()
    }

    fn lookup<R>(&self, key: &str, read: impl FnOnce(&V) -> R) -> Option<R> {
        let now = self.clock.now_ms();

        match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => return Some(read(&slot.value)),
            Some(_) => {}
            None => return None,
        }

        // Only drop the entry if nobody replaced it since we looked
        if self
            .entries
            .remove_if(key, |_, slot| !slot.is_live(now))
            .is_some()
        {
            debug!(store = self.name, key = %key, "Evicted expired entry");
            record_store_eviction(self.name, "expired", 1);
        }

        None
    }

    /// Store `value` under `key`, replacing any previous entry
    pub fn insert(&self, key: &str, value: V, ttl: Option<Duration>) {
        let now = self.clock.now_ms();

        if !self.entries.contains_key(key) {
            self.make_room(now);
        }

        self.entries.insert(
            key.to_string(),
            Slot {
                value,
                expires_at: deadline_after(now, ttl),
                inserted_at: now,
            },
        );
        self.track_insert(key, now);
    }

    /// Atomically read-modify-write the entry under `key`.
    ///
    /// `update` receives the current live value (`None` when the key is absent
    /// or expired) and the current time, and returns the new value, its
    /// deadline and an output handed back to the caller. The shard holding the
    /// key stays locked for the duration of `update`, so it must not block.
    pub fn upsert_with<R>(
        &self,
        key: &str,
        update: impl FnOnce(Option<V>, u64) -> (V, Option<u64>, R),
    ) -> R {
        let now = self.clock.now_ms();

        if !self.entries.contains_key(key) {
            self.make_room(now);
        }

        let (output, inserted_at) = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get();
                let (previous, inserted_at) = if slot.is_live(now) {
                    (Some(slot.value.clone()), slot.inserted_at)
                } else {
                    (None, now)
                };

                let (value, expires_at, output) = update(previous, now);
                occupied.insert(Slot {
                    value,
                    expires_at,
                    inserted_at,
                });
                (output, inserted_at)
            }
            Entry::Vacant(vacant) => {
                let (value, expires_at, output) = update(None, now);
                vacant.insert(Slot {
                    value,
                    expires_at,
                    inserted_at: now,
                });
                (output, now)
            }
        };

        // A live entry keeps its place in the eviction order
        if inserted_at == now {
            self.track_insert(key, now);
        }
        output
    }

    /// Remove the entry under `key`. Returns whether a live entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .remove(key)
            .map_or(false, |(_, slot)| slot.is_live(now))
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.clear();
        self.lock_order().clear();
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity, if any
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn lock_order(&self) -> MutexGuard<'_, VecDeque<(String, u64)>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a freshly inserted key to the eviction order
    fn track_insert(&self, key: &str, inserted_at: u64) {
        let Some(capacity) = self.capacity else {
            return;
        };

        let mut order = self.lock_order();
        order.push_back((key.to_string(), inserted_at));

        // Overwrites leave stale tags behind; drop them once they dominate
        if order.len() > capacity.saturating_mul(2).max(16) {
            order.retain(|(key, at)| {
                self.entries
                    .get(key)
                    .is_some_and(|slot| slot.inserted_at == *at)
            });
        }
    }

    /// Free a slot for a new key when the store is at capacity.
    ///
    /// Entries leave in insertion order. Ones already expired are reclaimed
    /// as expired, live ones are evicted. Each key is queued once per insert,
    /// so the cost is amortized constant. Concurrent inserts may briefly
    /// overshoot the cap by the number of racing writers.
    fn make_room(&self, now: u64) {
        let Some(capacity) = self.capacity else {
            return;
        };
        if self.entries.len() < capacity {
            return;
        }

        let mut order = self.lock_order();
        let mut expired = 0u64;
        let mut evicted = 0u64;

        while self.entries.len() >= capacity {
            let Some((key, inserted_at)) = order.pop_front() else {
                break;
            };

            if let Some((_, slot)) = self
                .entries
                .remove_if(&key, |_, slot| slot.inserted_at == inserted_at)
            {
                if slot.is_live(now) {
                    evicted += 1;
                } else {
                    expired += 1;
                }
            }
        }
        drop(order);

        if expired > 0 {
            record_store_eviction(self.name, "expired", expired);
        }
        if evicted > 0 {
            record_store_eviction(self.name, "capacity", evicted);
        }

        debug!(
            store = self.name,
            capacity,
            expired,
            evicted,
            "Made room for new entry"
        );
    }
}

//! Per-key async mutual exclusion
//!
//! Each key owns its own `tokio::sync::Mutex`. The map itself is a
//! `DashMap`, whose shard locks are only held long enough to clone the slot's
//! `Arc`, never across an await point. Distinct keys never contend.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct KeyedMutex<K, V> {
    slots: DashMap<K, Arc<Mutex<V>>>,
}

impl<K, V> KeyedMutex<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Lock the slot for `key`, creating it with `init` on first use.
    ///
    /// Waiters for the same key are served in FIFO order.
    pub async fn lock(&self, key: K, init: impl FnOnce() -> V) -> OwnedMutexGuard<V> {
        let slot = {
            let entry = self
                .slots
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(init())));
            Arc::clone(entry.value())
        };

        slot.lock_owned().await
    }

    /// Lock the slot for `key` only if it already exists
    pub async fn get(&self, key: &K) -> Option<OwnedMutexGuard<V>> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        Some(slot.lock_owned().await)
    }

    /// Snapshot of the keys that currently have a slot
    pub fn keys(&self) -> Vec<K> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<K, V> Default for KeyedMutex<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

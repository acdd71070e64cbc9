//! Concurrent keyed store of mirrored object snapshots
//!
//! The map is guarded by a single reader/writer lock. Readers clone the
//! snapshot (a cheap `Arc` clone of the payload) and render it after the
//! guard has been dropped, so JSON formatting never holds up writers.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::Value;

use crate::{cache::key::ResourceKey, errors::CacheError};

/// Last observed state of one mirrored object.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: ResourceKey,
    pub display_name: String,
    pub payload: Arc<Value>,
    /// Logical sequence number of the event that produced this snapshot.
    pub observed_at: u64,
}

impl Snapshot {
    pub fn new(
        key: ResourceKey,
        display_name: impl Into<String>,
        payload: Value,
        observed_at: u64,
    ) -> Self {
        Self {
            key,
            display_name: display_name.into(),
            payload: Arc::new(payload),
            observed_at,
        }
    }

    pub fn render(&self) -> Result<String, CacheError> {
        serde_json::to_string(self.payload.as_ref()).map_err(|source| CacheError::Serialization {
            key: self.key.to_string(),
            source,
        })
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: RwLock<HashMap<ResourceKey, Snapshot>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // A panic while holding the guard cannot leave a half-written entry:
    // every mutation is a single `insert` or `remove` on the map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceKey, Snapshot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKey, Snapshot>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `key`, returning the replaced snapshot.
    pub fn put(&self, key: ResourceKey, snapshot: Snapshot) -> Option<Snapshot> {
        self.write().insert(key, snapshot)
    }

    /// Remove the entry for `key`. Absent keys are not an error.
    pub fn remove(&self, key: &ResourceKey) -> Option<Snapshot> {
        self.write().remove(key)
    }

    pub fn get(&self, key: &ResourceKey) -> Result<Snapshot, CacheError> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound {
                key: key.to_string(),
            })
    }

    /// Current payload for `key` rendered as JSON text.
    pub fn lookup(&self, key: &ResourceKey) -> Result<String, CacheError> {
        let snapshot = self.get(key)?;
        snapshot.render()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of every entry, ordered by key.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        let mut snapshots: Vec<Snapshot> = self.read().values().cloned().collect();
        snapshots.sort_by(|left, right| left.key.cmp(&right.key));
        snapshots
    }
}

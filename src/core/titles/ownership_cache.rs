// In-memory ownership cache.
//
// This is the only read path exposed to latency-sensitive callers (display
// and placeholder rendering on the host's tick loop), so it must never touch
// storage on the calling thread. A miss reports `NotLoaded` while the host
// schedules a background load through the async boundary; callers tolerate a
// transient empty read right after a player connects.
//
// Writes arrive as deltas applied on the host execution context only, which
// keeps the cache a derived, disposable view of the store.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::title_service::OwnershipView;

/// What a non-blocking read can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRead {
    /// No data yet; a load may be in flight.
    NotLoaded,
    Loaded(OwnershipView),
}

enum CacheEntry {
    /// A background load has been scheduled and has not published yet.
    Loading,
    Ready(OwnershipView),
}

#[derive(Default)]
pub struct OwnershipCache {
    entries: DashMap<Uuid, CacheEntry>,
}

impl OwnershipCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, player_id: Uuid) -> CacheRead {
        match self.entries.get(&player_id) {
            Some(entry) => match entry.value() {
                CacheEntry::Loading => CacheRead::NotLoaded,
                CacheEntry::Ready(view) => CacheRead::Loaded(view.clone()),
            },
            None => CacheRead::NotLoaded,
        }
    }

    /// Marks a load as in flight. Returns true only for the caller that
    /// should actually run it; concurrent misses share the same load.
    pub fn begin_load(&self, player_id: Uuid) -> bool {
        match self.entries.entry(player_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::Loading);
                true
            }
        }
    }

    /// Publishes a finished load. Only upgrades a pending `Loading` marker:
    /// a disconnect that raced the load wins, and a ready entry kept
    /// coherent by deltas is not overwritten with an older snapshot.
    pub fn complete_load(&self, player_id: Uuid, view: OwnershipView) {
        if let Some(mut entry) = self.entries.get_mut(&player_id) {
            if matches!(*entry, CacheEntry::Loading) {
                *entry = CacheEntry::Ready(view);
            }
        }
    }

    /// Drops a pending load marker after a failed load so a later read can
    /// retry.
    pub fn abort_load(&self, player_id: Uuid) {
        self.entries
            .remove_if(&player_id, |_, entry| matches!(entry, CacheEntry::Loading));
    }

    /// Evicts a player entirely. Called on disconnect to bound memory.
    pub fn invalidate(&self, player_id: Uuid) {
        self.entries.remove(&player_id);
    }

    pub fn apply_grant(&self, player_id: Uuid, title_key: &str) {
        if let Some(mut entry) = self.entries.get_mut(&player_id) {
            if let CacheEntry::Ready(view) = entry.value_mut() {
                view.owned.insert(title_key.to_string());
            }
        }
    }

    pub fn apply_revoke(&self, player_id: Uuid, title_key: &str) {
        if let Some(mut entry) = self.entries.get_mut(&player_id) {
            if let CacheEntry::Ready(view) = entry.value_mut() {
                view.owned.remove(title_key);
                if view.active.as_deref() == Some(title_key) {
                    view.active = None;
                }
            }
        }
    }

    pub fn apply_active(&self, player_id: Uuid, title_key: Option<&str>) {
        if let Some(mut entry) = self.entries.get_mut(&player_id) {
            if let CacheEntry::Ready(view) = entry.value_mut() {
                view.active = title_key.map(str::to_string);
            }
        }
    }

    /// Number of players currently tracked (loading or ready).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

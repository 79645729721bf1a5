//! Generic expiring keyed store.
//!
//! One concurrency-safe map with lazy expiry, shared by every ephemeral
//! keyed concern in the service (deposit sessions, the webhook dedup log)
//! instead of a hand-rolled map per use site.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Entry<T> {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Keyed storage with a per-entry absolute expiry.
///
/// Expired entries behave exactly like absent ones: `get` on an expired key
/// returns `None` and removes the entry. Safe for concurrent access from
/// multiple in-flight requests; no cross-key atomicity is offered. Not
/// durable across restarts — production deployments that need surviving
/// sessions must back this with a persistent store.
#[derive(Debug)]
pub struct ExpiringStore<T> {
    entries: DashMap<String, Entry<T>>,
}

impl<T: Clone> ExpiringStore<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Inserts `value` under `key` with the given time-to-live.
    ///
    /// Returns `false` without overwriting when a live entry already holds
    /// the key; callers are expected to supply globally-unique keys, and the
    /// same primitive doubles as set-if-absent for idempotency tracking.
    pub fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) -> bool {
        let entry = Entry {
            value,
            expires_at: expiry_from_now(ttl),
        };
        match self.entries.entry(key.into()) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(entry);
                    true
                } else {
                    false
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Fetches a live entry; an expired entry is removed and reported as
    /// absent.
    pub fn get(&self, key: &str) -> Option<T> {
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
        }
        // Guard dropped above; lazy expiry.
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        None
    }

    /// Mutates a live entry in place. Returns `false` when the key is absent
    /// or expired. The closure runs under the map shard lock, so it must not
    /// block or perform I/O.
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                f(&mut entry.value);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of live entries. Walks the map, so intended for health
    /// reporting rather than hot paths.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eagerly drops expired entries. Lazy expiry alone is sufficient for
    /// correctness; this keeps memory bounded on long-lived processes.
    pub fn purge_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }
}

impl<T: Clone> Default for ExpiringStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Absolute expiry for a time-to-live, saturating at the far future for
/// out-of-range values instead of overflowing.
pub fn expiry_from_now(ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

//! Process-local TTL cache of permission decisions.
//!
//! Entries expire lazily on read. Grants and denials are cached alike, so a
//! mutation that bypasses the facade stays invisible until the TTL lapses.
//! Other processes never see this cache's invalidations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// `(actor, resource, action, scope-or-global)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub actor_id: Uuid,
    pub resource: String,
    pub action: String,
    pub scope: Option<Uuid>,
}

impl CacheKey {
    pub fn new(actor_id: Uuid, resource: &str, action: &str, scope: Option<Uuid>) -> Self {
        Self {
            actor_id,
            resource: resource.to_string(),
            action: action.to_string(),
            scope,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}:{}:{}:{}", self.actor_id, self.resource, self.action, scope),
            None => write!(f, "{}:{}:{}:global", self.actor_id, self.resource, self.action),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    allowed: bool,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub entries: usize,
}

#[derive(Debug)]
pub struct PermissionCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // a panic while holding the lock leaves only plain data behind, so recover it
    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `Some(decision)` for a fresh entry; stale entries read as absent.
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        let entries = self.read();
        match entries.get(key) {
            Some(entry) if !entry.is_stale(self.ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.allowed)
            }
            Some(_) => {
                self.stale.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: CacheKey, allowed: bool) {
        let entry = CacheEntry {
            allowed,
            cached_at: Instant::now(),
        };
        self.write().insert(key, entry);
    }

    /// Drops every entry of `actor_id`. Full scan under the write lock; the
    /// cache is sized by active sessions, not by grant count.
    pub fn invalidate_actor(&self, actor_id: Uuid) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|key, _| key.actor_id != actor_id);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

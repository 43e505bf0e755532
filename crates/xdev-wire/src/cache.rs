//! Per-connection prepared statement cache.
//!
//! The cache maps a structural statement fingerprint to the server-assigned
//! prepared statement id (once one exists) and bookkeeping that drives the
//! execute / prepare+execute / execute-prepared ladder. Entries are LRU
//! evicted; an evicted entry queues its server id for lazy deallocation so
//! that ids never leak even though eviction happens synchronously.
//!
//! The cache lives on the physical connection, not the session: a pooled
//! connection re-handed to a new session keeps its ids, so a recurring
//! fingerprint skips re-preparation transparently.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::link::StatementId;
use crate::message::Value;

/// Structural statement fingerprint (operation kind, target and clause
/// skeleton, excluding bound scalar values).
pub type Fingerprint = u64;

/// Default number of cached statement shapes per connection.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Cache state of one statement shape.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// Server-assigned id once the statement has been prepared.
    pub stmt_id: Option<StatementId>,
    /// How many times this fingerprint has been executed.
    pub executions: u64,
    /// Set when preparing this shape hit the server's ceiling; execution
    /// degrades to the direct path until capacity frees up.
    pub unpreparable: bool,
    /// Parameter values from the most recent execution.
    pub last_params: Vec<Value>,
}

/// LRU cache of statement shapes for one physical connection.
#[derive(Debug)]
pub struct StatementCache {
    entries: LruCache<Fingerprint, CacheEntry>,
    pending_dealloc: Vec<StatementId>,
}

impl StatementCache {
    /// Create a cache holding at most `capacity` statement shapes.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            pending_dealloc: Vec::new(),
        }
    }

    /// Look up or create the entry for a fingerprint, making room first so
    /// that an evicted entry's server id lands in the deallocation queue.
    pub fn touch(&mut self, fingerprint: Fingerprint) -> &mut CacheEntry {
        if !self.entries.contains(&fingerprint)
            && self.entries.len() == self.entries.cap().get()
        {
            if let Some((_, evicted)) = self.entries.pop_lru() {
                if let Some(id) = evicted.stmt_id {
                    tracing::trace!(stmt_id = id, "evicted cached statement, queueing deallocation");
                    self.pending_dealloc.push(id);
                }
            }
        }
        self.entries
            .get_or_insert_mut(fingerprint, CacheEntry::default)
    }

    /// Look up an entry without creating it.
    pub fn get(&mut self, fingerprint: Fingerprint) -> Option<&CacheEntry> {
        self.entries.get(&fingerprint).map(|e| &*e)
    }

    /// Server ids whose statements were evicted and still await server-side
    /// deallocation. Drained before the next wire exchange.
    pub fn take_pending_deallocations(&mut self) -> Vec<StatementId> {
        std::mem::take(&mut self.pending_dealloc)
    }

    /// Clear every "unpreparable" mark. Called after a successful
    /// deallocation freed server capacity, so later executions re-probe the
    /// prepare path.
    pub fn clear_unpreparable(&mut self) {
        for (_, entry) in self.entries.iter_mut() {
            entry.unpreparable = false;
        }
    }

    /// Drop all entries, returning every live server id (explicit cleanup
    /// when the physical connection is being torn down gracefully).
    pub fn drain_live_ids(&mut self) -> Vec<StatementId> {
        let mut ids = std::mem::take(&mut self.pending_dealloc);
        while let Some((_, entry)) = self.entries.pop_lru() {
            if let Some(id) = entry.stmt_id {
                ids.push(id);
            }
        }
        ids
    }

    /// Number of cached statement shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        // Capacity is a compile-time non-zero constant.
        #[allow(clippy::unwrap_used)]
        Self::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_creates_then_reuses_entry() {
        let mut cache = StatementCache::default();
        cache.touch(42).executions = 1;
        assert_eq!(cache.touch(42).executions, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_queues_deallocation() {
        let mut cache = StatementCache::new(NonZeroUsize::new(2).unwrap());
        cache.touch(1).stmt_id = Some(11);
        cache.touch(2).stmt_id = Some(22);
        cache.touch(3); // evicts fingerprint 1
        assert_eq!(cache.take_pending_deallocations(), vec![11]);
        assert!(cache.take_pending_deallocations().is_empty());
    }

    #[test]
    fn drain_live_ids_returns_everything() {
        let mut cache = StatementCache::new(NonZeroUsize::new(4).unwrap());
        cache.touch(1).stmt_id = Some(5);
        cache.touch(2); // never prepared
        cache.touch(3).stmt_id = Some(7);
        let mut ids = cache.drain_live_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![5, 7]);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_unpreparable_resets_marks() {
        let mut cache = StatementCache::default();
        cache.touch(9).unpreparable = true;
        cache.clear_unpreparable();
        assert!(!cache.touch(9).unpreparable);
    }
}

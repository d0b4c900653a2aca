//! TTL caches for names and attributes.
//!
//! Two independent caches back path resolution:
//!
//! - [`EntryCache`]: `(parent, name) -> (child, kind)`
//! - [`AttrCache`]: `inode -> attribute snapshot`
//!
//! Each has its own lock so name resolution and attribute refresh do not
//! contend. Neither knows about the metadata service. A record is never
//! returned after its expiry, whether or not it has been swept yet.
//!
//! Expired records are reclaimed by [`CacheSweeper`], which examines a bounded
//! number of records per cache per pass. Each cache keeps a min-heap of expiry
//! deadlines next to its map so a pass only touches records that are due.

mod attr;
mod entry;
mod sweeper;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::time::Instant;

pub use attr::{AttrCache, AttrRecord};
pub use entry::{EntryCache, EntryRecord};
pub use sweeper::CacheSweeper;

use crate::stats::CacheStats;

/// Deadlines of inserted records, earliest first.
///
/// A deadline may be stale when its record was replaced or invalidated; the
/// owner checks the map before evicting.
const COMPACTION_FLOOR: usize = 32;

#[derive(Debug)]
struct ExpiryQueue<K: Ord> {
    heap: BinaryHeap<Reverse<(Instant, K)>>,
}

impl<K: Ord> ExpiryQueue<K> {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    fn push(&mut self, expires_at: Instant, key: K) {
        self.heap.push(Reverse((expires_at, key)));
    }

    /// Pops the earliest deadline if it is due at `now`.
    fn pop_due(&mut self, now: Instant) -> Option<(Instant, K)> {
        match self.heap.peek() {
            Some(Reverse((deadline, _))) if *deadline <= now => {
                self.heap.pop().map(|Reverse(item)| item)
            }
            _ => None,
        }
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether stale deadlines outnumber the `live` records they stand for.
    fn needs_compaction(&self, live: usize) -> bool {
        self.len() > 2 * live.max(COMPACTION_FLOOR)
    }

    /// Replaces the queue with one deadline per live record.
    fn rebuild(&mut self, items: impl IntoIterator<Item = (Instant, K)>) {
        self.heap = items.into_iter().map(Reverse).collect();
    }

    fn clear(&mut self) {
        self.heap.clear();
    }
}

/// The pair of caches owned by one filesystem instance.
#[derive(Debug)]
pub struct MetaCaches {
    pub entries: EntryCache,
    pub attrs: AttrCache,
}

impl MetaCaches {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(CacheStats::new()), Arc::new(CacheStats::new()))
    }

    pub fn with_stats(entry_stats: Arc<CacheStats>, attr_stats: Arc<CacheStats>) -> Self {
        Self {
            entries: EntryCache::with_stats(entry_stats),
            attrs: AttrCache::with_stats(attr_stats),
        }
    }

    /// Evicts expired records, examining at most `budget` per cache.
    ///
    /// Returns the number of records evicted from both caches.
    pub fn sweep(&self, budget: usize) -> usize {
        let now = Instant::now();
        self.entries.sweep(now, budget) + self.attrs.sweep(now, budget)
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.attrs.clear();
    }
}

impl Default for MetaCaches {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::ExpiryQueue;
use crate::stats::CacheStats;
use crate::types::{FileKind, InodeId};

/// A cached `(parent, name)` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRecord {
    pub inode: InodeId,
    pub kind: FileKind,
    pub expires_at: Instant,
}

impl EntryRecord {
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct EntryTable {
    by_parent: HashMap<InodeId, HashMap<String, EntryRecord>>,
    expiry: ExpiryQueue<(InodeId, String)>,
}

impl EntryTable {
    fn remove(&mut self, parent: InodeId, name: &str) -> Option<EntryRecord> {
        let names = self.by_parent.get_mut(&parent)?;
        let removed = names.remove(name);
        if names.is_empty() {
            self.by_parent.remove(&parent);
        }
        removed
    }
}

/// Name cache keyed by `(parent inode, name)`.
#[derive(Debug)]
pub struct EntryCache {
    table: Mutex<EntryTable>,
    stats: Arc<CacheStats>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(CacheStats::new()))
    }

    pub fn with_stats(stats: Arc<CacheStats>) -> Self {
        Self {
            table: Mutex::new(EntryTable {
                by_parent: HashMap::new(),
                expiry: ExpiryQueue::new(),
            }),
            stats,
        }
    }

    /// Returns the live record for `(parent, name)`.
    ///
    /// An expired record is dropped on the spot and reported as absent.
    pub fn get(&self, parent: InodeId, name: &str) -> Option<EntryRecord> {
        let now = Instant::now();
        let mut table = self.table.lock();
        let record = table.by_parent.get(&parent).and_then(|names| names.get(name)).copied();
        match record {
            Some(record) if !record.is_expired_at(now) => {
                self.stats.record_hit();
                Some(record)
            }
            Some(_) => {
                table.remove(parent, name);
                self.stats.record_evictions(1);
                self.stats.record_miss();
                None
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Caches `name -> inode` for `ttl`. A zero `ttl` caches nothing.
    pub fn put(&self, parent: InodeId, name: &str, inode: InodeId, kind: FileKind, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl;
        let mut table = self.table.lock();
        table.by_parent.entry(parent).or_default().insert(
            name.to_owned(),
            EntryRecord {
                inode,
                kind,
                expires_at,
            },
        );
        table.expiry.push(expires_at, (parent, name.to_owned()));
        let table = &mut *table;
        let live = table.by_parent.values().map(HashMap::len).sum();
        if table.expiry.needs_compaction(live) {
            table.expiry.rebuild(table.by_parent.iter().flat_map(|(parent, names)| {
                names
                    .iter()
                    .map(|(name, record)| (record.expires_at, (*parent, name.clone())))
            }));
        }
    }

    /// Forgets `(parent, name)`.
    pub fn invalidate(&self, parent: InodeId, name: &str) {
        if self.table.lock().remove(parent, name).is_some() {
            trace!(parent = %parent, name, "entry invalidated");
            self.stats.record_evictions(1);
        }
    }

    /// Forgets every name cached under `parent`.
    pub fn invalidate_dir(&self, parent: InodeId) {
        if let Some(names) = self.table.lock().by_parent.remove(&parent) {
            self.stats.record_evictions(names.len() as u64);
        }
    }

    /// Evicts due records, examining at most `budget` deadlines.
    pub fn sweep(&self, now: Instant, budget: usize) -> usize {
        let mut table = self.table.lock();
        let mut evicted = 0;
        for _ in 0..budget {
            let Some((deadline, (parent, name))) = table.expiry.pop_due(now) else {
                break;
            };
            let current = table.by_parent.get(&parent).and_then(|names| names.get(&name));
            if current.is_some_and(|record| record.expires_at == deadline) {
                table.remove(parent, &name);
                evicted += 1;
            }
        }
        drop(table);
        if evicted > 0 {
            self.stats.record_evictions(evicted as u64);
        }
        evicted
    }

    /// Number of cached names, expired or not.
    pub fn len(&self) -> usize {
        self.table.lock().by_parent.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().by_parent.is_empty()
    }

    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.by_parent.clear();
        table.expiry.clear();
    }
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::ExpiryQueue;
use crate::stats::CacheStats;
use crate::types::{Attr, InodeId};

/// A cached attribute snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrRecord {
    pub attr: Attr,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct AttrTable {
    by_inode: HashMap<InodeId, AttrRecord>,
    expiry: ExpiryQueue<InodeId>,
}

/// Attribute cache keyed by inode.
#[derive(Debug)]
pub struct AttrCache {
    table: Mutex<AttrTable>,
    stats: Arc<CacheStats>,
}

impl AttrCache {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(CacheStats::new()))
    }

    pub fn with_stats(stats: Arc<CacheStats>) -> Self {
        Self {
            table: Mutex::new(AttrTable {
                by_inode: HashMap::new(),
                expiry: ExpiryQueue::new(),
            }),
            stats,
        }
    }

    /// Returns a copy of the live snapshot for `inode`.
    pub fn get(&self, inode: InodeId) -> Option<Attr> {
        let now = Instant::now();
        let mut table = self.table.lock();
        match table.by_inode.get(&inode) {
            Some(record) if now < record.expires_at => {
                self.stats.record_hit();
                Some(record.attr.clone())
            }
            Some(_) => {
                table.by_inode.remove(&inode);
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

    /// Caches `attr` for `ttl`. A zero `ttl` caches nothing.
    pub fn put(&self, inode: InodeId, attr: Attr, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl;
        let mut table = self.table.lock();
        table.by_inode.insert(inode, AttrRecord { attr, expires_at });
        table.expiry.push(expires_at, inode);
        let table = &mut *table;
        if table.expiry.needs_compaction(table.by_inode.len()) {
            table
                .expiry
                .rebuild(table.by_inode.iter().map(|(inode, record)| (record.expires_at, *inode)));
        }
    }

    pub fn invalidate(&self, inode: InodeId) {
        if self.table.lock().by_inode.remove(&inode).is_some() {
            self.stats.record_evictions(1);
        }
    }

    /// Evicts due records, examining at most `budget` deadlines.
    pub fn sweep(&self, now: Instant, budget: usize) -> usize {
        let mut table = self.table.lock();
        let mut evicted = 0;
        for _ in 0..budget {
            let Some((deadline, inode)) = table.expiry.pop_due(now) else {
                break;
            };
            if table
                .by_inode
                .get(&inode)
                .is_some_and(|record| record.expires_at == deadline)
            {
                table.by_inode.remove(&inode);
                evicted += 1;
            }
        }
        drop(table);
        if evicted > 0 {
            self.stats.record_evictions(evicted as u64);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.table.lock().by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().by_inode.is_empty()
    }

    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.by_inode.clear();
        table.expiry.clear();
    }
}

impl Default for AttrCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileKind;

    #[tokio::test(start_paused = true)]
    async fn test_expiry_and_stats() {
        let stats = Arc::new(CacheStats::new());
        let cache = AttrCache::with_stats(Arc::clone(&stats));
        let inode = InodeId::new(7);
        let mut attr = Attr::new(FileKind::File, 0o644);
        attr.length = 42;

        cache.put(inode, attr.clone(), Duration::from_millis(200));
        assert_eq!(cache.get(inode), Some(attr));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(cache.get(inode), None);
        assert_eq!(stats.hit_count(), 1);
        assert_eq!(stats.miss_count(), 1);
        assert_eq!(stats.eviction_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep() {
        let cache = AttrCache::new();
        for n in 2..52 {
            cache.put(InodeId::new(n), Attr::new(FileKind::File, 0o644), Duration::from_secs(1));
        }
        cache.invalidate(InodeId::new(2));
        tokio::time::advance(Duration::from_secs(1)).await;

        // 50 deadlines, one of which belongs to an invalidated record.
        let swept = cache.sweep(Instant::now(), 30);
        assert!(swept == 29 || swept == 30);
        cache.sweep(Instant::now(), 30);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_churn_on_one_inode_keeps_queue_bounded() {
        let cache = AttrCache::new();
        let inode = InodeId::new(9);
        for _ in 0..5 {
            for _ in 0..2_000 {
                cache.invalidate(inode);
                cache.put(inode, Attr::new(FileKind::File, 0o644), Duration::from_secs(1));
                assert!(cache.table.lock().expiry.len() <= 64);
            }
            tokio::time::advance(Duration::from_secs(1)).await;
            cache.sweep(Instant::now(), 1_000);
        }
        assert!(cache.table.lock().expiry.len() <= 64);
        assert!(cache.is_empty());
    }
}

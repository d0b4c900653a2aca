//! Statistics for the VFS layer.
//!
//! Lock-free counters injected into a [`FileSystem`](crate::FileSystem) at
//! construction. Adapters share the same `Arc<FsStats>` to export metrics
//! however they like; nothing here is process-global.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tidefs_vfs::stats::FsStats;
//!
//! let stats = Arc::new(FsStats::new());
//! stats.record_read(4096, Duration::from_micros(80));
//! stats.entry_cache().record_hit();
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.bytes_read, 4096);
//! assert_eq!(snapshot.entry_cache.hits, 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Hit/miss counters for one cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    /// Records removed by expiry sweeps or explicit invalidation.
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hit_count(),
            misses: self.miss_count(),
            evictions: self.eviction_count(),
        }
    }
}

/// Serializable copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served from the cache, 0.0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Latency accumulator.
#[derive(Debug, Default)]
pub struct LatencyStats {
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
    count: AtomicU64,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Mean latency, zero when nothing was recorded.
    pub fn average(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_nanos.load(Ordering::Relaxed) / count)
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count(),
            average: self.average(),
            max: self.max(),
        }
    }
}

/// Serializable copy of [`LatencyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub count: u64,
    #[serde(with = "humantime_serde")]
    pub average: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

/// Counters for one filesystem instance.
#[derive(Debug)]
pub struct FsStats {
    entry_cache: Arc<CacheStats>,
    attr_cache: Arc<CacheStats>,

    total_ops: AtomicU64,
    total_errors: AtomicU64,
    op_latency: LatencyStats,

    total_reads: AtomicU64,
    total_writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    read_latency: LatencyStats,
    write_latency: LatencyStats,

    open_handles: AtomicU64,
    log_dropped: AtomicU64,

    session_start: SystemTime,
}

impl Default for FsStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FsStats {
    pub fn new() -> Self {
        Self {
            entry_cache: Arc::new(CacheStats::new()),
            attr_cache: Arc::new(CacheStats::new()),
            total_ops: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            op_latency: LatencyStats::new(),
            total_reads: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            read_latency: LatencyStats::new(),
            write_latency: LatencyStats::new(),
            open_handles: AtomicU64::new(0),
            log_dropped: AtomicU64::new(0),
            session_start: SystemTime::now(),
        }
    }

    /// Counters of the name cache, shared with the cache itself.
    pub fn entry_cache(&self) -> Arc<CacheStats> {
        Arc::clone(&self.entry_cache)
    }

    /// Counters of the attribute cache, shared with the cache itself.
    pub fn attr_cache(&self) -> Arc<CacheStats> {
        Arc::clone(&self.attr_cache)
    }

    /// Records a completed facade operation.
    #[inline]
    pub fn record_op(&self, elapsed: Duration, failed: bool) {
        self.total_ops.fetch_add(1, Ordering::Relaxed);
        self.op_latency.record(elapsed);
        if failed {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_read(&self, bytes: u64, elapsed: Duration) {
        self.total_reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
        self.read_latency.record(elapsed);
    }

    #[inline]
    pub fn record_write(&self, bytes: u64, elapsed: Duration) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
        self.write_latency.record(elapsed);
    }

    pub fn record_handle_open(&self) {
        self.open_handles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handle_close(&self) {
        // Saturate so an unmatched close cannot wrap the gauge.
        let _ = self
            .open_handles
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn record_log_dropped(&self) {
        self.log_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn open_handles(&self) -> u64 {
        self.open_handles.load(Ordering::Relaxed)
    }

    pub fn log_dropped(&self) -> u64 {
        self.log_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FsStatsSnapshot {
        FsStatsSnapshot {
            total_ops: self.total_ops.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            op_latency: self.op_latency.snapshot(),
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            read_latency: self.read_latency.snapshot(),
            write_latency: self.write_latency.snapshot(),
            open_handles: self.open_handles(),
            log_dropped: self.log_dropped(),
            entry_cache: self.entry_cache.snapshot(),
            attr_cache: self.attr_cache.snapshot(),
            session_start: self.session_start,
        }
    }
}

/// Serializable copy of [`FsStats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsStatsSnapshot {
    pub total_ops: u64,
    pub total_errors: u64,
    pub op_latency: LatencySnapshot,
    pub total_reads: u64,
    pub total_writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_latency: LatencySnapshot,
    pub write_latency: LatencySnapshot,
    pub open_handles: u64,
    pub log_dropped: u64,
    pub entry_cache: CacheStatsSnapshot,
    pub attr_cache: CacheStatsSnapshot,
    #[serde(with = "humantime_serde")]
    pub session_start: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_rate() {
        let stats = CacheStats::new();
        assert!(stats.snapshot().hit_rate().abs() < f64::EPSILON);

        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.snapshot().hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_average_and_max() {
        let latency = LatencyStats::new();
        assert_eq!(latency.average(), Duration::ZERO);

        latency.record(Duration::from_millis(10));
        latency.record(Duration::from_millis(30));
        assert_eq!(latency.count(), 2);
        assert_eq!(latency.average(), Duration::from_millis(20));
        assert_eq!(latency.max(), Duration::from_millis(30));
    }

    #[test]
    fn test_handle_gauge_saturates() {
        let stats = FsStats::new();
        stats.record_handle_close();
        assert_eq!(stats.open_handles(), 0);

        stats.record_handle_open();
        stats.record_handle_open();
        stats.record_handle_close();
        assert_eq!(stats.open_handles(), 1);
    }

    #[test]
    fn test_snapshot_serialization() {
        let stats = FsStats::new();
        stats.record_op(Duration::from_micros(150), false);
        stats.record_op(Duration::from_micros(50), true);
        stats.record_write(5, Duration::from_micros(20));
        stats.attr_cache().record_miss();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_ops, 2);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.bytes_written, 5);
        assert_eq!(snapshot.attr_cache.misses, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: FsStatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.total_ops, 2);
        assert_eq!(restored.op_latency.max, Duration::from_micros(150));
    }
}

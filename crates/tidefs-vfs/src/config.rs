//! Configuration for the VFS layer.
//!
//! The timeouts and switches here are policy knobs only. A zero timeout
//! disables the matching cache.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TTL for name and attribute caches.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(1);

/// Default interval between cache sweeper passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of records a sweeper pass may examine per cache.
pub const DEFAULT_SWEEP_BUDGET: usize = 1000;

/// Default delay before a closed handle's read session is released.
pub const DEFAULT_READ_RELEASE_DELAY: Duration = Duration::from_secs(1);

/// Configuration for a [`FileSystem`](crate::FileSystem).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// TTL for cached names that point to non-directories.
    #[serde(with = "humantime_serde")]
    pub entry_timeout: Duration,

    /// TTL for cached names that point to directories.
    #[serde(with = "humantime_serde")]
    pub dir_entry_timeout: Duration,

    /// TTL for cached attribute snapshots.
    #[serde(with = "humantime_serde")]
    pub attr_timeout: Duration,

    /// Ask the metadata service to resolve whole paths in one call.
    pub fast_resolve: bool,

    /// How often expired cache records are swept.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Records examined per cache per sweep pass.
    pub sweep_budget: usize,

    /// Grace period before a closed handle's read session is released.
    #[serde(with = "humantime_serde")]
    pub read_release_delay: Duration,

    /// Access log settings, `None` to disable the log.
    pub access_log: Option<AccessLogConfig>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            entry_timeout: DEFAULT_CACHE_TTL,
            dir_entry_timeout: DEFAULT_CACHE_TTL,
            attr_timeout: DEFAULT_CACHE_TTL,
            fast_resolve: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_budget: DEFAULT_SWEEP_BUDGET,
            read_release_delay: DEFAULT_READ_RELEASE_DELAY,
            access_log: None,
        }
    }
}

impl VfsConfig {
    /// Configuration with every cache disabled.
    pub fn uncached() -> Self {
        Self {
            entry_timeout: Duration::ZERO,
            dir_entry_timeout: Duration::ZERO,
            attr_timeout: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Sets the TTL for non-directory names.
    #[must_use]
    pub fn entry_timeout(mut self, ttl: Duration) -> Self {
        self.entry_timeout = ttl;
        self
    }

    /// Sets the TTL for directory names.
    #[must_use]
    pub fn dir_entry_timeout(mut self, ttl: Duration) -> Self {
        self.dir_entry_timeout = ttl;
        self
    }

    /// Sets the TTL for attribute snapshots.
    #[must_use]
    pub fn attr_timeout(mut self, ttl: Duration) -> Self {
        self.attr_timeout = ttl;
        self
    }

    /// Enables or disables single-call path resolution.
    #[must_use]
    pub fn fast_resolve(mut self, enabled: bool) -> Self {
        self.fast_resolve = enabled;
        self
    }

    /// Sets the sweeper cadence and per-pass budget.
    #[must_use]
    pub fn sweep(mut self, interval: Duration, budget: usize) -> Self {
        self.sweep_interval = interval;
        self.sweep_budget = budget;
        self
    }

    /// Sets the grace period for read-session release on close.
    #[must_use]
    pub fn read_release_delay(mut self, delay: Duration) -> Self {
        self.read_release_delay = delay;
        self
    }

    /// Enables the access log.
    #[must_use]
    pub fn access_log(mut self, log: AccessLogConfig) -> Self {
        self.access_log = Some(log);
        self
    }

    /// TTL for a name pointing at an object of the given type.
    pub fn entry_ttl(&self, is_dir: bool) -> Duration {
        if is_dir {
            self.dir_entry_timeout
        } else {
            self.entry_timeout
        }
    }
}

/// Default size at which the access log is rotated (300 MiB).
pub const DEFAULT_ROTATE_SIZE: u64 = 300 << 20;

/// Default number of rotated generations kept.
pub const DEFAULT_KEEP: usize = 7;

/// Access log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// Live log file. Rotated generations are `<path>.1` through `<path>.<keep>`.
    pub path: PathBuf,

    /// Size in bytes past which the file is rotated.
    pub rotate_size: u64,

    /// Rotated generations retained.
    pub keep: usize,

    /// How often the file size is checked.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Lines buffered between callers and the writer before dropping.
    pub queue_depth: usize,

    /// Bytes batched per file write.
    pub batch_bytes: usize,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("access.log"),
            rotate_size: DEFAULT_ROTATE_SIZE,
            keep: DEFAULT_KEEP,
            check_interval: Duration::from_secs(60),
            queue_depth: 1024,
            batch_bytes: 128 << 10,
        }
    }
}

impl AccessLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the rotation threshold and retained generations.
    #[must_use]
    pub fn rotation(mut self, rotate_size: u64, keep: usize) -> Self {
        self.rotate_size = rotate_size;
        self.keep = keep;
        self
    }

    /// Sets how often the file size is checked.
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets the queue depth between callers and the writer.
    #[must_use]
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}

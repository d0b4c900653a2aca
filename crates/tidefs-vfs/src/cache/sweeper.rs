use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace};

use super::MetaCaches;

/// Background task that evicts expired cache records.
///
/// The task holds only a weak reference and stops once the caches are gone.
/// Dropping the sweeper aborts it.
#[derive(Debug)]
pub struct CacheSweeper {
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn spawn(caches: &Arc<MetaCaches>, interval: Duration, budget: usize) -> Self {
        let caches = Arc::downgrade(caches);
        let handle = tokio::spawn(run(caches, interval, budget));
        Self { handle }
    }

    /// Stops the sweeper.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(caches: Weak<MetaCaches>, interval: Duration, budget: usize) {
    let mut ticker = time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(caches) = caches.upgrade() else {
            debug!("caches dropped, sweeper exiting");
            return;
        };
        let evicted = caches.sweep(budget);
        if evicted > 0 {
            trace!(evicted, "swept expired cache records");
        }
    }
}

//! Caller identity passed to every operation.

use std::time::Duration;

use tokio::time::Instant;

/// Identity and timing of one operation.
///
/// Adapters build one per incoming request. The start instant feeds the
/// access-log duration column and the latency stats.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, primary group first.
    pub gids: Vec<u32>,
    pub pid: u32,
    start: Instant,
}

impl OpContext {
    pub fn new(uid: u32, gid: u32, pid: u32) -> Self {
        Self::with_groups(uid, vec![gid], pid)
    }

    /// Context with explicit group membership. An empty list means gid 0.
    pub fn with_groups(uid: u32, gids: Vec<u32>, pid: u32) -> Self {
        let gid = gids.first().copied().unwrap_or(0);
        let gids = if gids.is_empty() { vec![0] } else { gids };
        Self {
            uid,
            gid,
            gids,
            pid,
            start: Instant::now(),
        }
    }

    /// Superuser context for internal calls.
    pub fn root() -> Self {
        Self::new(0, 0, std::process::id())
    }

    /// Same identity with the clock restarted.
    #[must_use]
    pub fn restarted(&self) -> Self {
        Self {
            start: Instant::now(),
            ..self.clone()
        }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    pub fn in_group(&self, gid: u32) -> bool {
        self.gids.contains(&gid)
    }

    /// Time since the operation started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_follows_runtime_clock() {
        let ctx = OpContext::new(1000, 1000, 1);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(ctx.elapsed(), Duration::from_secs(3));

        let fresh = ctx.restarted();
        assert_eq!(fresh.elapsed(), Duration::ZERO);
        assert_eq!(fresh.uid, 1000);
    }

    #[test]
    fn test_groups() {
        let ctx = OpContext::with_groups(5, vec![20, 30], 1);
        assert_eq!(ctx.gid, 20);
        assert!(ctx.in_group(30));
        assert!(!ctx.in_group(5));
        assert_eq!(OpContext::with_groups(5, Vec::new(), 1).gids, vec![0]);
        assert!(OpContext::root().is_root());
    }
}

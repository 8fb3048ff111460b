//! Idle entries and lazy staleness checks

use std::time::Duration;

use tokio::time::Instant;

/// An idle resource together with the moment it was checked in
///
/// Staleness is evaluated when an entry is touched by checkout or by a
/// keep-alive sweep; there is no per-entry timer.
#[derive(Debug)]
pub(crate) struct PoolEntry<R> {
    pub resource: R,
    pub last_access: Instant,
}

impl<R> PoolEntry<R> {
    pub fn new(resource: R) -> Self {
        Self {
            resource,
            last_access: Instant::now(),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_access.elapsed()
    }

    /// True once the entry has been idle for `threshold` or longer
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.idle_for() >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_becomes_stale_at_threshold() {
        let entry = PoolEntry::new(7);
        assert!(!entry.is_stale(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!entry.is_stale(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(entry.is_stale(Duration::from_secs(10)));
        assert_eq!(entry.idle_for(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_threshold_is_always_stale() {
        let entry = PoolEntry::new("conn");
        assert!(entry.is_stale(Duration::ZERO));
    }
}

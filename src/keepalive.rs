//! Background keep-alive sweeper
//!
//! Every tick the sweeper examines the entries that were idle when the tick
//! started. Entries idle for less than one interval are validated and put
//! back; older ones are released without validation so the next checkout
//! builds a fresh resource.

use std::fmt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::BoxError;
use crate::pool::{PoolInner, Resource};

/// Liveness check run against idle resources
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use idlepool::{BoxError, KeepAlive};
///
/// struct Ping;
///
/// #[async_trait]
/// impl KeepAlive<String> for Ping {
///     async fn check(&self, conn: &String) -> Result<(), BoxError> {
///         if conn.is_empty() {
///             return Err("connection reset".into());
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait KeepAlive<R>: Send + Sync {
    async fn check(&self, resource: &R) -> Result<(), BoxError>;
}

/// Adapts a synchronous closure to [`KeepAlive`]
pub(crate) struct FnKeepAlive<F, R> {
    check: F,
    _resource: PhantomData<fn(&R)>,
}

impl<F, R> FnKeepAlive<F, R>
where
    F: Fn(&R) -> Result<(), BoxError>,
{
    pub fn new(check: F) -> Self {
        Self {
            check,
            _resource: PhantomData,
        }
    }
}

#[async_trait]
impl<F, R> KeepAlive<R> for FnKeepAlive<F, R>
where
    F: Fn(&R) -> Result<(), BoxError> + Send + Sync,
    R: Sync,
{
    async fn check(&self, resource: &R) -> Result<(), BoxError> {
        (self.check)(resource)
    }
}

/// How often, and with what check, idle resources are re-validated
pub struct KeepAlivePolicy<R> {
    pub interval: Duration,
    pub check: Arc<dyn KeepAlive<R>>,
}

impl<R> KeepAlivePolicy<R> {
    pub fn new(interval: Duration, check: Arc<dyn KeepAlive<R>>) -> Self {
        Self { interval, check }
    }

    pub fn is_active(&self) -> bool {
        !self.interval.is_zero()
    }
}

impl<R> Clone for KeepAlivePolicy<R> {
    fn clone(&self) -> Self {
        Self {
            interval: self.interval,
            check: Arc::clone(&self.check),
        }
    }
}

impl<R> fmt::Debug for KeepAlivePolicy<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlivePolicy")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Outcome of a single sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    /// Entries taken out of the store
    pub examined: usize,
    /// Entries that passed validation and went back into the store
    pub kept: usize,
    /// Entries released because validation failed
    pub failed: usize,
    /// Entries released without validation because they were idle too long
    pub stale: usize,
    /// Entries that passed validation but found the store full
    pub overflowed: usize,
}

impl<R: Resource> PoolInner<R> {
    /// Run one keep-alive pass over the entries present right now
    ///
    /// A check that panics counts as a failed check. Shutdown interrupts the
    /// pass and releases the entry being checked.
    pub(crate) async fn sweep(&self, policy: &KeepAlivePolicy<R>) -> SweepReport {
        let mut report = SweepReport::default();
        let pending = self.idle.len();

        for _ in 0..pending {
            let Some(entry) = self.idle.pop() else {
                continue;
            };
            report.examined += 1;

            if entry.is_stale(policy.interval) {
                report.stale += 1;
                entry.resource.release();
                continue;
            }

            // Shutdown must not wait on a check that never completes.
            let check = AssertUnwindSafe(policy.check.check(&entry.resource)).catch_unwind();
            let outcome = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => None,
                outcome = check => Some(outcome),
            };
            let Some(outcome) = outcome else {
                tracing::debug!("keep-alive sweep interrupted by shutdown");
                entry.resource.release();
                break;
            };
            let result = outcome.unwrap_or_else(|_| Err("keep-alive check panicked".into()));

            match result {
                Ok(()) => match self.idle.push(entry) {
                    Ok(()) => report.kept += 1,
                    Err(entry) => {
                        report.overflowed += 1;
                        entry.resource.release();
                    }
                },
                Err(err) => {
                    tracing::debug!(error = %err, "keep-alive check failed, releasing resource");
                    report.failed += 1;
                    entry.resource.release();
                }
            }
        }

        self.metrics.record_sweep(&report);
        tracing::debug!(
            examined = report.examined,
            kept = report.kept,
            failed = report.failed,
            stale = report.stale,
            overflowed = report.overflowed,
            "keep-alive sweep finished"
        );

        // A sweep that outlived close may have put entries back.
        if self.closed.load(Ordering::Acquire) {
            self.drain_idle();
        }
        report
    }
}

/// Spawn the sweeper for `pool`
///
/// The task holds only a weak reference, so dropping the last pool handle
/// ends it as well as cancelling `shutdown`. The first tick fires one full
/// interval after this call.
pub(crate) fn spawn_sweeper<R: Resource>(
    pool: Weak<PoolInner<R>>,
    policy: KeepAlivePolicy<R>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let start = Instant::now() + policy.interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(start, policy.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(interval = ?policy.interval, "keep-alive sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = shutdown.cancelled() => break,
            }

            let Some(pool) = pool.upgrade() else {
                break;
            };
            pool.sweep(&policy).await;
        }

        tracing::debug!("keep-alive sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Pool, PoolConfiguration};
    use std::sync::atomic::AtomicUsize;

    struct Conn {
        released: Arc<AtomicUsize>,
    }

    impl Resource for Conn {
        fn release(self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool_with_capacity(capacity: usize, released: &Arc<AtomicUsize>) -> Pool<Conn> {
        let released = Arc::clone(released);
        Pool::new(
            move || Ok(Conn { released: Arc::clone(&released) }),
            PoolConfiguration::new().with_max_pool_size(capacity),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_keeps_healthy_entries() {
        let released = Arc::new(AtomicUsize::new(0));
        let pool = pool_with_capacity(4, &released);
        pool.warmup(3).unwrap();

        let policy = KeepAlivePolicy::new(
            Duration::from_secs(30),
            Arc::new(FnKeepAlive::new(|_: &Conn| Ok(()))),
        );
        let report = pool.inner.sweep(&policy).await;

        assert_eq!(report.examined, 3);
        assert_eq!(report.kept, 3);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sweep_releases_on_overflow() {
        let released = Arc::new(AtomicUsize::new(0));
        let pool = pool_with_capacity(1, &released);
        pool.warmup(1).unwrap();

        // The check refills the slot the sweep just emptied.
        let filler = pool.clone();
        let filler_released = Arc::clone(&released);
        let policy = KeepAlivePolicy::new(
            Duration::from_secs(30),
            Arc::new(FnKeepAlive::new(move |_: &Conn| {
                filler
                    .checkin(Conn { released: Arc::clone(&filler_released) })
                    .unwrap();
                Ok(())
            })),
        );
        let report = pool.inner.sweep(&policy).await;

        assert_eq!(report.overflowed, 1);
        assert_eq!(report.kept, 0);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_only_visits_entries_present_at_start() {
        let released = Arc::new(AtomicUsize::new(0));
        let pool = pool_with_capacity(4, &released);
        pool.warmup(2).unwrap();

        // Every check adds a fresh entry behind the one being checked.
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let filler = pool.clone();
        let filler_released = Arc::clone(&released);
        let policy = KeepAlivePolicy::new(
            Duration::from_secs(30),
            Arc::new(FnKeepAlive::new(move |_: &Conn| {
                seen.fetch_add(1, Ordering::SeqCst);
                filler
                    .checkin(Conn { released: Arc::clone(&filler_released) })
                    .unwrap();
                Ok(())
            })),
        );
        let report = pool.inner.sweep(&policy).await;

        assert_eq!(report.examined, 2);
        assert_eq!(report.kept, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(pool.idle_count(), 4);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sweep_treats_panicking_check_as_failure() {
        let released = Arc::new(AtomicUsize::new(0));
        let pool = pool_with_capacity(4, &released);
        pool.warmup(2).unwrap();

        let policy = KeepAlivePolicy::new(
            Duration::from_secs(30),
            Arc::new(FnKeepAlive::new(|_: &Conn| -> Result<(), BoxError> {
                panic!("driver bug")
            })),
        );
        let report = pool.inner.sweep(&policy).await;

        assert_eq!(report.examined, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sweep_stops_on_shutdown() {
        let released = Arc::new(AtomicUsize::new(0));
        let pool = pool_with_capacity(4, &released);
        pool.warmup(3).unwrap();
        pool.inner.shutdown.cancel();

        let policy = KeepAlivePolicy::new(
            Duration::from_secs(30),
            Arc::new(FnKeepAlive::new(|_: &Conn| Ok(()))),
        );
        let report = pool.inner.sweep(&policy).await;

        assert_eq!(report.examined, 1);
        assert_eq!(report.kept, 0);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}

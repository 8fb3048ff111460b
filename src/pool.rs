//! Core pool implementation

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::eviction::PoolEntry;
use crate::keepalive;
use crate::metrics::{MetricsTracker, PoolMetrics};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A pooled resource such as a network connection
///
/// The pool calls [`release`](Resource::release) at most once per instance,
/// whenever it permanently discards that instance.
pub trait Resource: Send + Sync + 'static {
    fn release(self);
}

type Factory<R> = dyn Fn() -> Result<R, BoxError> + Send + Sync;

/// A checked-out resource that goes back to the pool when dropped
pub struct PooledResource<R: Resource> {
    resource: Option<R>,
    pool: Pool<R>,
}

impl<R: Resource> PooledResource<R> {
    /// Take the resource out without checking it back in
    pub fn detach(mut self) -> R {
        self.resource.take().expect("Resource already taken")
    }
}

impl<R: Resource> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Resource already taken")
    }
}

impl<R: Resource> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Resource already taken")
    }
}

impl<R: Resource> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take()
            && let Err(err) = self.pool.checkin(resource)
        {
            tracing::debug!(error = %err, "pooled resource was released instead of returned");
        }
    }
}

/// Shared pool state
pub(crate) struct PoolInner<R: Resource> {
    pub(crate) idle: ArrayQueue<PoolEntry<R>>,
    pub(crate) config: PoolConfiguration<R>,
    pub(crate) factory: Arc<Factory<R>>,
    pub(crate) metrics: MetricsTracker,
    pub(crate) closed: AtomicBool,
    pub(crate) shutdown: CancellationToken,
    pub(crate) sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Resource> PoolInner<R> {
    /// Release every idle entry, returning how many were released
    pub(crate) fn drain_idle(&self) -> usize {
        let mut drained = 0;
        while let Some(entry) = self.idle.pop() {
            entry.resource.release();
            drained += 1;
        }
        drained
    }
}

impl<R: Resource> Drop for PoolInner<R> {
    fn drop(&mut self) {
        // Idle entries are dropped without release, as if the process exited.
        self.shutdown.cancel();
    }
}

/// Bounded pool of reusable resources
///
/// Checkout and checkin never block. Idle resources older than the
/// configured idle timeout are discarded on checkout, and an optional
/// keep-alive sweeper re-validates idle resources in the background.
///
/// # Examples
///
/// ```
/// use idlepool::{Pool, PoolConfiguration, Resource};
///
/// struct Conn(u32);
///
/// impl Resource for Conn {
///     fn release(self) {}
/// }
///
/// let pool = Pool::new(|| Ok(Conn(1)), PoolConfiguration::new().with_max_pool_size(4)).unwrap();
///
/// let conn = pool.checkout().unwrap();
/// assert_eq!(conn.0, 1);
/// pool.checkin(conn).unwrap();
/// assert_eq!(pool.idle_count(), 1);
/// ```
pub struct Pool<R: Resource> {
    pub(crate) inner: Arc<PoolInner<R>>,
}

impl<R: Resource> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> std::fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<R: Resource> Pool<R> {
    /// Create a pool that builds new resources with `factory`
    ///
    /// Starts the keep-alive sweeper when the configuration has an active
    /// keep-alive policy, which requires a running Tokio runtime.
    pub fn new<F>(factory: F, config: PoolConfiguration<R>) -> PoolResult<Self>
    where
        F: Fn() -> Result<R, BoxError> + Send + Sync + 'static,
    {
        config.validate()?;

        let sweep_policy = config.active_keep_alive().cloned();
        if sweep_policy.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(PoolError::InvalidConfiguration(
                "keep-alive requires a running Tokio runtime".to_string(),
            ));
        }

        let warmup_size = config.warmup_size;
        let inner = Arc::new(PoolInner {
            idle: ArrayQueue::new(config.max_pool_size),
            config,
            factory: Arc::new(factory),
            metrics: MetricsTracker::new(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });
        let pool = Self { inner };

        if let Some(size) = warmup_size
            && let Err(err) = pool.warmup(size)
        {
            pool.inner.drain_idle();
            return Err(err);
        }

        if let Some(policy) = sweep_policy {
            let handle = keepalive::spawn_sweeper(
                Arc::downgrade(&pool.inner),
                policy,
                pool.inner.shutdown.clone(),
            );
            *pool.inner.sweeper.lock() = Some(handle);
        }

        Ok(pool)
    }

    /// Take an idle resource, or construct a new one if none is usable
    ///
    /// An idle resource that has been idle for the idle timeout or longer is
    /// released and replaced by a freshly constructed one. Constructor
    /// errors are returned as [`PoolError::Construction`].
    pub fn checkout(&self) -> PoolResult<R> {
        self.ensure_open()?;

        if let Some(entry) = self.inner.idle.pop() {
            if !entry.is_stale(self.inner.config.idle_timeout) {
                tracing::trace!(idle_for = ?entry.idle_for(), "reusing idle resource");
                self.inner.metrics.record_reused();
                return Ok(entry.resource);
            }

            tracing::debug!(idle_for = ?entry.idle_for(), "discarding expired idle resource");
            self.inner.metrics.record_expired();
            entry.resource.release();
        }

        self.construct()
    }

    /// Checkout wrapped in a guard that checks the resource back in on drop
    pub fn get(&self) -> PoolResult<PooledResource<R>> {
        let resource = self.checkout()?;
        Ok(PooledResource {
            resource: Some(resource),
            pool: self.clone(),
        })
    }

    /// Return a resource to the pool
    ///
    /// If the pool is full the resource is released and
    /// [`PoolError::PoolFull`] is returned; the caller no longer owns it
    /// either way. After [`close`](Pool::close) the resource is released and
    /// [`PoolError::Closed`] is returned.
    pub fn checkin(&self, resource: R) -> PoolResult<()> {
        match self.inner.idle.push(PoolEntry::new(resource)) {
            // Checked after the push so a close that lands in between still
            // drains this entry.
            Ok(()) if self.is_closed() => {
                self.inner.drain_idle();
                Err(PoolError::Closed)
            }
            Ok(()) => {
                self.inner.metrics.record_returned();
                Ok(())
            }
            Err(entry) if self.is_closed() => {
                entry.resource.release();
                Err(PoolError::Closed)
            }
            Err(entry) => {
                tracing::debug!(capacity = self.capacity(), "pool is full, releasing returned resource");
                self.inner.metrics.record_discarded();
                entry.resource.release();
                Err(PoolError::PoolFull)
            }
        }
    }

    /// Construct and store up to `count` resources, stopping once full
    ///
    /// Returns the number of resources added.
    pub fn warmup(&self, count: usize) -> PoolResult<usize> {
        self.ensure_open()?;

        let mut added = 0;
        for _ in 0..count.min(self.capacity()) {
            if self.inner.idle.is_full() {
                break;
            }
            let resource = self.construct()?;
            if let Err(entry) = self.inner.idle.push(PoolEntry::new(resource)) {
                entry.resource.release();
                break;
            }
            added += 1;
        }
        Ok(added)
    }

    /// Stop the sweeper and release every idle resource
    ///
    /// Waits for an in-flight sweep to finish. Calling it again is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();

        let handle = self.inner.sweeper.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::debug!(error = %err, "keep-alive sweeper ended abnormally");
        }

        let released = self.inner.drain_idle();
        tracing::debug!(released, "pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of idle resources currently stored
    pub fn idle_count(&self) -> usize {
        self.inner.idle.len()
    }

    /// Maximum number of idle resources
    pub fn capacity(&self) -> usize {
        self.inner.idle.capacity()
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(self.idle_count(), self.capacity())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    fn ensure_open(&self) -> PoolResult<()> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    fn construct(&self) -> PoolResult<R> {
        match (self.inner.factory)() {
            Ok(resource) => {
                tracing::debug!("constructed new resource");
                self.inner.metrics.record_created();
                Ok(resource)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to construct resource");
                self.inner.metrics.record_construction_failure();
                Err(PoolError::construction(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug)]
    struct Conn {
        id: usize,
        released: Arc<AtomicUsize>,
    }

    impl Resource for Conn {
        fn release(self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        pool: Pool<Conn>,
        created: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    fn harness(config: PoolConfiguration<Conn>) -> Harness {
        let created = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicUsize::new(0));
        let (c, r) = (Arc::clone(&created), Arc::clone(&released));
        let pool = Pool::new(
            move || {
                Ok(Conn {
                    id: c.fetch_add(1, Ordering::SeqCst),
                    released: Arc::clone(&r),
                })
            },
            config,
        )
        .unwrap();
        Harness { pool, created, released }
    }

    #[test]
    fn test_checkout_constructs_when_empty() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(2));

        let conn = h.pool.checkout().unwrap();
        assert_eq!(conn.id, 0);
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_checkin_then_checkout_reuses() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(2));

        let conn = h.pool.checkout().unwrap();
        h.pool.checkin(conn).unwrap();
        let again = h.pool.checkout().unwrap();

        assert_eq!(again.id, 0);
        assert_eq!(h.created.load(Ordering::SeqCst), 1);
        assert_eq!(h.pool.get_metrics().reused, 1);
    }

    #[test]
    fn test_checkin_full_releases_resource() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(1));

        let first = h.pool.checkout().unwrap();
        let second = h.pool.checkout().unwrap();
        h.pool.checkin(first).unwrap();

        assert!(matches!(h.pool.checkin(second), Err(PoolError::PoolFull)));
        assert_eq!(h.released.load(Ordering::SeqCst), 1);
        assert_eq!(h.pool.checkout().unwrap().id, 0);
    }

    #[test]
    fn test_guard_returns_on_drop() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(2));

        {
            let conn = h.pool.get().unwrap();
            assert_eq!(conn.id, 0);
            assert_eq!(h.pool.idle_count(), 0);
        }
        assert_eq!(h.pool.idle_count(), 1);

        let detached = h.pool.get().unwrap().detach();
        assert_eq!(detached.id, 0);
        assert_eq!(h.pool.idle_count(), 0);
    }

    #[test]
    fn test_warmup_is_clamped_to_capacity() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(3).with_warmup(10));

        assert_eq!(h.pool.idle_count(), 3);
        assert_eq!(h.created.load(Ordering::SeqCst), 3);
        assert_eq!(h.pool.warmup(5).unwrap(), 0);
        assert_eq!(h.created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failed_warmup_releases_built_resources() {
        let released = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let (r, c) = (Arc::clone(&released), Arc::clone(&calls));
        let result = Pool::new(
            move || {
                let id = c.fetch_add(1, Ordering::SeqCst);
                if id == 2 {
                    return Err("connection refused".into());
                }
                Ok(Conn {
                    id,
                    released: Arc::clone(&r),
                })
            },
            PoolConfiguration::new().with_max_pool_size(4).with_warmup(4),
        );

        assert!(matches!(result, Err(PoolError::Construction(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_checkin_after_close_is_released_not_stored() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(2));
        let conn = h.pool.checkout().unwrap();

        h.pool.close().await;

        assert!(matches!(h.pool.checkin(conn), Err(PoolError::Closed)));
        assert_eq!(h.pool.idle_count(), 0);
        assert_eq!(h.released.load(Ordering::SeqCst), 1);
        assert_eq!(h.pool.get_metrics().returned, 0);
    }

    #[test]
    fn test_keep_alive_without_runtime_is_rejected() {
        let config = PoolConfiguration::<Conn>::new().with_keep_alive(Duration::from_secs(1), |_| Ok(()));
        let err = Pool::new(|| Err("unused".into()), config).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn test_close_releases_idle_and_rejects_use() {
        let h = harness(PoolConfiguration::new().with_max_pool_size(4).with_warmup(2));

        h.pool.close().await;
        assert!(h.pool.is_closed());
        assert_eq!(h.pool.idle_count(), 0);
        assert_eq!(h.released.load(Ordering::SeqCst), 2);

        assert!(matches!(h.pool.checkout(), Err(PoolError::Closed)));

        let stray = Conn {
            id: 99,
            released: Arc::clone(&h.released),
        };
        assert!(matches!(h.pool.checkin(stray), Err(PoolError::Closed)));
        assert_eq!(h.released.load(Ordering::SeqCst), 3);

        h.pool.close().await;
    }

    #[tokio::test]
    async fn test_close_stops_sweeper() {
        let h = harness(
            PoolConfiguration::new()
                .with_max_pool_size(2)
                .with_keep_alive(Duration::from_secs(5), |_| Ok(())),
        );
        assert!(h.pool.inner.sweeper.lock().is_some());

        h.pool.close().await;
        assert!(h.pool.inner.sweeper.lock().is_none());
        assert!(h.pool.inner.shutdown.is_cancelled());
    }
}

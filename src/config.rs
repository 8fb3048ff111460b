//! Pool configuration options

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{BoxError, PoolError, PoolResult};
use crate::keepalive::{FnKeepAlive, KeepAlive, KeepAlivePolicy};

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use idlepool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<u32>::new()
///     .with_max_pool_size(16)
///     .with_idle_timeout(Duration::from_secs(60))
///     .with_keep_alive(Duration::from_secs(15), |_conn: &u32| Ok(()));
///
/// assert_eq!(config.max_pool_size, 16);
/// assert!(config.keep_alive.is_some());
/// ```
pub struct PoolConfiguration<R> {
    /// Maximum number of idle resources the pool holds
    pub max_pool_size: usize,

    /// Resources idle for this long or longer are discarded on checkout
    pub idle_timeout: Duration,

    /// Background keep-alive policy
    pub keep_alive: Option<KeepAlivePolicy<R>>,

    /// Number of resources to construct up front
    pub warmup_size: Option<usize>,
}

impl<R> Default for PoolConfiguration<R> {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            idle_timeout: Duration::from_secs(90),
            keep_alive: None,
            warmup_size: None,
        }
    }
}

impl<R> Clone for PoolConfiguration<R> {
    fn clone(&self) -> Self {
        Self {
            max_pool_size: self.max_pool_size,
            idle_timeout: self.idle_timeout,
            keep_alive: self.keep_alive.clone(),
            warmup_size: self.warmup_size,
        }
    }
}

impl<R> fmt::Debug for PoolConfiguration<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("max_pool_size", &self.max_pool_size)
            .field("idle_timeout", &self.idle_timeout)
            .field("keep_alive", &self.keep_alive)
            .field("warmup_size", &self.warmup_size)
            .finish()
    }
}

impl<R: Send + Sync + 'static> PoolConfiguration<R> {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of idle resources
    ///
    /// # Examples
    ///
    /// ```
    /// use idlepool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::<u32>::new()
    ///     .with_max_pool_size(50);
    ///
    /// assert_eq!(config.max_pool_size, 50);
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the max idle duration
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Validate idle resources every `interval` with a synchronous check
    ///
    /// A zero interval leaves the sweeper disabled.
    pub fn with_keep_alive<F>(mut self, interval: Duration, check: F) -> Self
    where
        F: Fn(&R) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.keep_alive = Some(KeepAlivePolicy::new(interval, Arc::new(FnKeepAlive::new(check))));
        self
    }

    /// Validate idle resources every `interval` with an async checker
    pub fn with_keep_alive_check(mut self, interval: Duration, check: Arc<dyn KeepAlive<R>>) -> Self {
        self.keep_alive = Some(KeepAlivePolicy::new(interval, check));
        self
    }

    /// Set warm-up size
    pub fn with_warmup(mut self, size: usize) -> Self {
        self.warmup_size = Some(size);
        self
    }
}

impl<R> PoolConfiguration<R> {
    /// Check the configuration before a pool is built from it
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_pool_size == 0 {
            return Err(PoolError::InvalidConfiguration(
                "max_pool_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// The keep-alive policy, if one is configured with a non-zero interval
    pub fn active_keep_alive(&self) -> Option<&KeepAlivePolicy<R>> {
        self.keep_alive.as_ref().filter(|policy| policy.is_active())
    }
}

//! # idlepool
//!
//! Bounded, thread-safe pool for resources that are expensive to create and
//! cheap to reuse, such as network connections.
//!
//! ## Features
//!
//! - Non-blocking checkout and checkin over a lock-free bounded queue
//! - Idle expiry evaluated lazily on checkout
//! - Optional background keep-alive sweeper with a caller-supplied check
//! - Automatic checkin via RAII guards
//! - Explicit close that stops the sweeper and releases idle resources
//! - Metrics with Prometheus export
//!
//! ## Quick Start
//!
//! ```rust
//! use idlepool::{Pool, PoolConfiguration, Resource};
//! use std::time::Duration;
//!
//! struct Conn;
//!
//! impl Resource for Conn {
//!     fn release(self) {
//!         // close the socket
//!     }
//! }
//!
//! let config = PoolConfiguration::new()
//!     .with_max_pool_size(8)
//!     .with_idle_timeout(Duration::from_secs(30));
//! let pool = Pool::new(|| Ok(Conn), config).unwrap();
//! {
//!     let _conn = pool.get().unwrap();
//!     // Checked back in when `_conn` goes out of scope
//! }
//! assert_eq!(pool.idle_count(), 1);
//! ```

mod pool;
mod config;
mod metrics;
mod eviction;
mod keepalive;
mod errors;

pub use pool::{Pool, PooledResource, Resource};
pub use config::PoolConfiguration;
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use keepalive::{KeepAlive, KeepAlivePolicy};
pub use errors::{BoxError, PoolError, PoolResult};

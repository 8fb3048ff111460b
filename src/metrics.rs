//! Metrics collection and export for pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::keepalive::SweepReport;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use idlepool::{Pool, PoolConfiguration, Resource};
///
/// struct Conn;
///
/// impl Resource for Conn {
///     fn release(self) {}
/// }
///
/// let pool = Pool::new(|| Ok(Conn), PoolConfiguration::new()).unwrap();
///
/// let conn = pool.checkout().unwrap();
/// pool.checkin(conn).unwrap();
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.created, 1);
/// assert_eq!(metrics.returned, 1);
/// assert_eq!(metrics.idle_resources, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "metrics", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources built by the constructor
    pub created: usize,

    /// Checkouts served from the idle store
    pub reused: usize,

    /// Idle resources discarded on checkout for exceeding the idle timeout
    pub expired: usize,

    pub construction_failures: usize,

    /// Checkins that were stored
    pub returned: usize,

    /// Checkins released because the pool was full
    pub discarded: usize,

    pub keep_alive_passed: usize,
    pub keep_alive_failed: usize,
    pub keep_alive_stale: usize,
    pub keep_alive_overflowed: usize,

    /// Completed keep-alive sweeps
    pub sweeps: usize,

    /// Current idle resources
    pub idle_resources: usize,

    /// Maximum idle resources
    pub capacity: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("created".to_string(), self.created.to_string());
        metrics.insert("reused".to_string(), self.reused.to_string());
        metrics.insert("expired".to_string(), self.expired.to_string());
        metrics.insert("construction_failures".to_string(), self.construction_failures.to_string());
        metrics.insert("returned".to_string(), self.returned.to_string());
        metrics.insert("discarded".to_string(), self.discarded.to_string());
        metrics.insert("keep_alive_passed".to_string(), self.keep_alive_passed.to_string());
        metrics.insert("keep_alive_failed".to_string(), self.keep_alive_failed.to_string());
        metrics.insert("keep_alive_stale".to_string(), self.keep_alive_stale.to_string());
        metrics.insert("keep_alive_overflowed".to_string(), self.keep_alive_overflowed.to_string());
        metrics.insert("sweeps".to_string(), self.sweeps.to_string());
        metrics.insert("idle_resources".to_string(), self.idle_resources.to_string());
        metrics.insert("capacity".to_string(), self.capacity.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every series carries a `pool` label plus the given tags.
    ///
    /// # Examples
    ///
    /// ```
    /// use idlepool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&PoolMetrics::default(), "db", Some(&tags)).unwrap();
    /// assert!(output.contains("idlepool_resources_idle"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());
        let registry = Registry::new_custom(Some("idlepool".to_string()), Some(labels))?;

        let gauges = [
            ("resources_idle", "Current idle resources", metrics.idle_resources),
            ("resources_capacity", "Maximum idle resources", metrics.capacity),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::new(name, help)?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let counters = [
            ("resources_created_total", "Resources constructed", metrics.created),
            ("resources_reused_total", "Checkouts served from idle resources", metrics.reused),
            ("resources_expired_total", "Idle resources expired on checkout", metrics.expired),
            ("construction_failures_total", "Failed resource constructions", metrics.construction_failures),
            ("resources_returned_total", "Resources checked in", metrics.returned),
            ("resources_discarded_total", "Checkins rejected by a full pool", metrics.discarded),
            ("keep_alive_passed_total", "Keep-alive checks passed", metrics.keep_alive_passed),
            ("keep_alive_failed_total", "Keep-alive checks failed", metrics.keep_alive_failed),
            ("keep_alive_stale_total", "Idle resources dropped by a sweep without a check", metrics.keep_alive_stale),
            ("keep_alive_overflowed_total", "Checked resources dropped because the pool filled", metrics.keep_alive_overflowed),
            ("sweeps_total", "Completed keep-alive sweeps", metrics.sweeps),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::new(name, help)?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    created: AtomicUsize,
    reused: AtomicUsize,
    expired: AtomicUsize,
    construction_failures: AtomicUsize,
    returned: AtomicUsize,
    discarded: AtomicUsize,
    keep_alive_passed: AtomicUsize,
    keep_alive_failed: AtomicUsize,
    keep_alive_stale: AtomicUsize,
    keep_alive_overflowed: AtomicUsize,
    sweeps: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expired(&self) {
        self.expired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_construction_failure(&self) {
        self.construction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_returned(&self) {
        self.returned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, report: &SweepReport) {
        self.keep_alive_passed
            .fetch_add(report.kept + report.overflowed, Ordering::Relaxed);
        self.keep_alive_failed.fetch_add(report.failed, Ordering::Relaxed);
        self.keep_alive_stale.fetch_add(report.stale, Ordering::Relaxed);
        self.keep_alive_overflowed
            .fetch_add(report.overflowed, Ordering::Relaxed);
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, idle: usize, capacity: usize) -> PoolMetrics {
        PoolMetrics {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            keep_alive_passed: self.keep_alive_passed.load(Ordering::Relaxed),
            keep_alive_failed: self.keep_alive_failed.load(Ordering::Relaxed),
            keep_alive_stale: self.keep_alive_stale.load(Ordering::Relaxed),
            keep_alive_overflowed: self.keep_alive_overflowed.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            idle_resources: idle,
            capacity,
        }
    }
}

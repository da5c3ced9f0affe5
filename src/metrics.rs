//! Metrics collection and export for resource pools

use dashmap::DashMap;
#[cfg(feature = "serde")]
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-operation transaction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct OperationStats {
    pub calls: usize,
    pub failures: usize,
}

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use checkout_pool::{OperationTable, Pool, PoolConfiguration, Resource};
///
/// struct Conn;
///
/// impl Resource for Conn {
///     fn operations() -> OperationTable<Self> {
///         OperationTable::new()
///     }
/// }
///
/// let pool = Pool::start(PoolConfiguration::new().with_capacity(3), || {
///     Ok::<_, std::io::Error>(Conn)
/// })
/// .unwrap();
///
/// {
///     let _conn = pool.check_out().unwrap();
///     let metrics = pool.get_metrics();
///     assert_eq!(metrics.total_checkouts, 1);
///     assert_eq!(metrics.in_use, 1);
/// }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct PoolMetrics {
    /// Total successful checkouts
    pub total_checkouts: usize,

    /// Total resources returned to the pool
    pub total_checkins: usize,

    /// Resources constructed, eagerly or on demand
    pub resources_created: usize,

    /// Factory failures
    pub construction_failures: usize,

    /// Checkouts that had to wait for a check-in
    pub waits: usize,

    /// Check-ins handed directly to a waiting checkout
    pub handoffs: usize,

    /// Checkouts that gave up after the acquisition timeout
    pub timeouts: usize,

    /// Transactions naming an operation the resource does not register
    pub unknown_operations: usize,

    /// Current checked-out resources
    pub in_use: usize,

    /// Current idle resources
    pub idle: usize,

    /// Resources constructed so far
    pub total: usize,

    /// Checkouts currently waiting
    pub waiting: usize,

    /// In-use share of capacity (0.0 to 1.0)
    pub utilization: f64,

    /// Maximum pool capacity
    pub max_capacity: usize,

    /// Transaction counters keyed by operation name
    pub operations: HashMap<String, OperationStats>,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_checkouts".to_string(), self.total_checkouts.to_string());
        metrics.insert("total_checkins".to_string(), self.total_checkins.to_string());
        metrics.insert("resources_created".to_string(), self.resources_created.to_string());
        metrics.insert("construction_failures".to_string(), self.construction_failures.to_string());
        metrics.insert("waits".to_string(), self.waits.to_string());
        metrics.insert("handoffs".to_string(), self.handoffs.to_string());
        metrics.insert("timeouts".to_string(), self.timeouts.to_string());
        metrics.insert("unknown_operations".to_string(), self.unknown_operations.to_string());
        metrics.insert("in_use".to_string(), self.in_use.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("total".to_string(), self.total.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        for (name, stats) in &self.operations {
            metrics.insert(format!("operation.{}.calls", name), stats.calls.to_string());
            metrics.insert(format!("operation.{}.failures", name), stats.failures.to_string());
        }
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
    /// # Examples
    ///
    /// ```
    /// use checkout_pool::{OperationTable, Pool, PoolConfiguration, Resource};
    /// use std::collections::HashMap;
    ///
    /// struct Conn;
    ///
    /// impl Resource for Conn {
    ///     fn operations() -> OperationTable<Self> {
    ///         OperationTable::new()
    ///     }
    /// }
    ///
    /// let pool = Pool::start(PoolConfiguration::new().with_capacity(3), || {
    ///     Ok::<_, std::io::Error>(Conn)
    /// })
    /// .unwrap();
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("sessions", Some(&tags)).unwrap();
    /// assert!(output.contains("resourcepool_resources_in_use"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> crate::errors::PoolResult<String> {
        Self::encode(metrics, pool_name, tags)
            .map_err(|err| crate::errors::PoolError::MetricsExport(err.to_string()))
    }

    fn encode(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> prometheus::Result<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = tags.cloned().unwrap_or_default();
        labels.insert("pool".to_string(), pool_name.to_string());
        let registry = Registry::new_custom(Some("resourcepool".to_string()), Some(labels))?;

        let gauges = [
            ("resources_in_use", "Current checked-out resources", metrics.in_use),
            ("resources_idle", "Current idle resources", metrics.idle),
            ("resources_total", "Resources constructed so far", metrics.total),
            ("resources_capacity", "Maximum pool capacity", metrics.max_capacity),
            ("checkouts_waiting", "Checkouts currently waiting", metrics.waiting),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(Opts::new(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))?;
        }

        let utilization = Gauge::with_opts(Opts::new("utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let counters = [
            ("checkouts_total", "Total checkouts", metrics.total_checkouts),
            ("checkins_total", "Total check-ins", metrics.total_checkins),
            ("resources_created_total", "Resources constructed", metrics.resources_created),
            ("construction_failures_total", "Factory failures", metrics.construction_failures),
            ("waits_total", "Checkouts that waited", metrics.waits),
            ("handoffs_total", "Check-ins handed to a waiter", metrics.handoffs),
            ("timeouts_total", "Checkouts that timed out", metrics.timeouts),
            ("unknown_operations_total", "Transactions naming no registered operation", metrics.unknown_operations),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(Opts::new(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))?;
        }

        if !metrics.operations.is_empty() {
            let calls = IntCounterVec::new(
                Opts::new("operation_calls_total", "Transactions by operation"),
                &["operation"],
            )?;
            let failures = IntCounterVec::new(
                Opts::new("operation_failures_total", "Failed transactions by operation"),
                &["operation"],
            )?;
            for (name, stats) in &metrics.operations {
                calls.with_label_values(&[name.as_str()]).inc_by(stats.calls as u64);
                failures.with_label_values(&[name.as_str()]).inc_by(stats.failures as u64);
            }
            registry.register(Box::new(calls))?;
            registry.register(Box::new(failures))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    checkouts: AtomicUsize,
    checkins: AtomicUsize,
    created: AtomicUsize,
    construction_failures: AtomicUsize,
    waits: AtomicUsize,
    handoffs: AtomicUsize,
    timeouts: AtomicUsize,
    unknown_operations: AtomicUsize,
    operations: DashMap<String, OperationStats>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            checkouts: AtomicUsize::new(0),
            checkins: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            construction_failures: AtomicUsize::new(0),
            waits: AtomicUsize::new(0),
            handoffs: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
            unknown_operations: AtomicUsize::new(0),
            operations: DashMap::new(),
        }
    }

    pub fn record_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkin(&self) {
        self.checkins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_construction_failure(&self) {
        self.construction_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wait(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handoff(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_operation(&self) {
        self.unknown_operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transaction against a registered operation. Callers must not
    /// pass unresolved names, which would make the key set caller-controlled.
    pub fn record_operation(&self, operation: &str, succeeded: bool) {
        // avoid allocating the key on the hot path once the entry exists
        if let Some(mut stats) = self.operations.get_mut(operation) {
            stats.calls += 1;
            stats.failures += usize::from(!succeeded);
            return;
        }
        let mut stats = self.operations.entry(operation.to_string()).or_default();
        stats.calls += 1;
        stats.failures += usize::from(!succeeded);
    }

    pub fn get_metrics(
        &self,
        idle: usize,
        in_use: usize,
        total: usize,
        waiting: usize,
        capacity: usize,
    ) -> PoolMetrics {
        let utilization = if capacity > 0 {
            in_use as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_checkouts: self.checkouts.load(Ordering::Relaxed),
            total_checkins: self.checkins.load(Ordering::Relaxed),
            resources_created: self.created.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unknown_operations: self.unknown_operations.load(Ordering::Relaxed),
            in_use,
            idle,
            total,
            waiting,
            utilization,
            max_capacity: capacity,
            operations: self
                .operations
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

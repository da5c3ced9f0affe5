//! Occupancy health reporting for resource pools

#[cfg(feature = "serde")]
use serde::Serialize;

/// Health status of a resource pool
///
/// Reports occupancy only; the resources themselves are never probed.
///
/// # Examples
///
/// ```
/// use checkout_pool::HealthStatus;
///
/// let health = HealthStatus::new(3, 0, 3, 0);
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_resources, 3);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0)
    pub utilization: f64,

    /// Idle resources count
    pub idle_resources: usize,

    /// Checked-out resources count
    pub in_use_resources: usize,

    /// Checkouts waiting for a resource
    pub waiting_checkouts: usize,

    /// Total capacity
    pub total_capacity: usize,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Create a new health status
    pub fn new(idle: usize, in_use: usize, capacity: usize, waiting: usize) -> Self {
        let utilization = if capacity > 0 {
            in_use as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            is_healthy = false;
        }

        if idle == 0 && in_use >= capacity && capacity > 0 {
            warnings.push("Pool is saturated".to_string());
        }

        if waiting > 0 {
            warnings.push(format!("{} checkouts waiting for a resource", waiting));
            is_healthy = false;
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_resources: idle,
            in_use_resources: in_use,
            waiting_checkouts: waiting,
            total_capacity: capacity,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}

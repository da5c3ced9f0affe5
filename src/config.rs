//! Pool configuration options

use crate::errors::{PoolError, PoolResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acquisition timeout applied when none (or zero) is configured.
pub const DEFAULT_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(20);

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use checkout_pool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_capacity(8)
///     .with_timeout(Duration::from_secs(2))
///     .with_initial_size(2);
///
/// assert_eq!(config.capacity, 8);
/// assert_eq!(config.initial_size(), 2);
/// assert_eq!(config.acquisition_timeout(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfiguration {
    /// Maximum number of resources the pool will ever construct
    pub capacity: usize,

    /// How long a checkout may wait while the pool is saturated
    pub acquisition_timeout: Option<Duration>,

    /// Resources constructed eagerly at start; defaults to `capacity`
    pub initial_size: Option<usize>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            capacity: 10,
            acquisition_timeout: None,
            initial_size: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of resources
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = Some(timeout);
        self
    }

    /// Construct only `size` resources at start and grow the rest on demand
    ///
    /// ```
    /// use checkout_pool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_capacity(4).with_initial_size(10);
    /// assert_eq!(config.initial_size(), 4);
    /// ```
    pub fn with_initial_size(mut self, size: usize) -> Self {
        self.initial_size = Some(size);
        self
    }

    /// Effective acquisition timeout; unset or zero falls back to the default.
    pub fn acquisition_timeout(&self) -> Duration {
        match self.acquisition_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_ACQUISITION_TIMEOUT,
        }
    }

    /// Effective eager fill, never above capacity.
    pub fn initial_size(&self) -> usize {
        self.initial_size.unwrap_or(self.capacity).min(self.capacity)
    }

    pub fn validate(&self) -> PoolResult<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidConfiguration(
                "capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

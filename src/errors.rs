//! Error types for the resource pool

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error accepted from factories and operations.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Shared form of an external error, so [`PoolError`] stays `Clone`.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to construct resource: {0}")]
    Construction(#[source] SharedError),

    #[error("Pool is at maximum capacity")]
    PoolFull,

    #[error("Pool exhausted - no resource became available within {0:?}")]
    PoolExhausted(Duration),

    #[error("Operation '{0}' is not registered for this resource")]
    OperationNotFound(String),

    #[error("Operation '{operation}' expects an argument of type {expected}")]
    ArgumentMismatch {
        operation: String,
        expected: &'static str,
    },

    #[error("Operation '{operation}' returned {arity} values; expected nothing, a value, or a value with an error")]
    UnsupportedSignature { operation: String, arity: usize },

    #[error("Operation '{operation}' failed: {source}")]
    Operation {
        operation: String,
        #[source]
        source: SharedError,
    },

    #[cfg(feature = "metrics")]
    #[error("Failed to export metrics: {0}")]
    MetricsExport(String),
}

impl PoolError {
    pub(crate) fn construction(err: BoxError) -> Self {
        PoolError::Construction(Arc::from(err))
    }

    pub(crate) fn operation(operation: &str, err: BoxError) -> Self {
        PoolError::Operation {
            operation: operation.to_string(),
            source: Arc::from(err),
        }
    }

    /// Whether retrying the same call may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::PoolExhausted(_))
    }

    /// The error reported by the resource itself, for [`PoolError::Operation`].
    ///
    /// ```
    /// use checkout_pool::PoolError;
    ///
    /// let err = PoolError::OperationNotFound("find".to_string());
    /// assert!(err.operation_error().is_none());
    /// ```
    pub fn operation_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            PoolError::Operation { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("duplicate key")]
    struct DuplicateKey;

    #[test]
    fn test_operation_error_is_downcastable() {
        let err = PoolError::operation("insert", Box::new(DuplicateKey));

        let inner = err.operation_error().unwrap();
        assert!(inner.downcast_ref::<DuplicateKey>().is_some());
        assert_eq!(err.to_string(), "Operation 'insert' failed: duplicate key");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_only_exhaustion_is_retryable() {
        assert!(PoolError::PoolExhausted(Duration::from_millis(5)).is_retryable());
        assert!(!PoolError::PoolFull.is_retryable());
        assert!(!PoolError::construction("refused".into()).is_retryable());
    }
}

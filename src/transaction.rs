//! By-name dispatch of operations against pooled resources
//!
//! A transaction checks a resource out, runs one registered operation on it and
//! returns the resource on every exit path, including a panicking operation
//! (the checkout guard checks in while unwinding).

use crate::errors::{PoolError, PoolResult};
use crate::operation::{Reply, Resource, Value};
use crate::pool::{Pool, PooledResource};

use async_trait::async_trait;
use std::any::Any;

/// Collapse the recognised call shapes into one result.
fn normalize(operation: &str, reply: Reply) -> PoolResult<Option<Value>> {
    match reply {
        Reply::Status(None) => Ok(None),
        Reply::Value(value) => Ok(Some(value)),
        Reply::ValueWithStatus(value, None) => Ok(value),
        Reply::Status(Some(err)) | Reply::ValueWithStatus(_, Some(err)) => {
            Err(PoolError::operation(operation, err))
        }
        Reply::Many(values) => Err(PoolError::UnsupportedSignature {
            operation: operation.to_string(),
            arity: values.len(),
        }),
    }
}

impl<R: Resource> Pool<R> {
    /// Run `operation` with `args` on whichever resource is checked out.
    ///
    /// Returns `Ok(None)` for operations that produce no value.
    ///
    /// # Examples
    ///
    /// ```
    /// use checkout_pool::{OperationTable, Pool, PoolConfiguration, Resource};
    ///
    /// struct Doubler;
    ///
    /// impl Resource for Doubler {
    ///     fn operations() -> OperationTable<Self> {
    ///         OperationTable::new().value("double", |_: &mut Doubler, n: i32| n * 2)
    ///     }
    /// }
    ///
    /// let pool = Pool::start(PoolConfiguration::new().with_capacity(1), || {
    ///     Ok::<_, std::io::Error>(Doubler)
    /// })
    /// .unwrap();
    ///
    /// let result = pool.transaction("double", 21).unwrap().unwrap();
    /// assert_eq!(result.downcast::<i32>().unwrap(), 42);
    /// assert_eq!(pool.idle_count(), 1);
    /// ```
    pub fn transaction<A: Any + Send>(&self, operation: &str, args: A) -> PoolResult<Option<Value>> {
        let mut resource = self.check_out()?;
        self.dispatch(&mut resource, operation, Value::new(args))
    }

    /// Async form of [`Pool::transaction`]; only the checkout awaits.
    pub async fn transaction_async<A: Any + Send>(
        &self,
        operation: &str,
        args: A,
    ) -> PoolResult<Option<Value>> {
        let args = Value::new(args);
        let mut resource = self.check_out_async().await?;
        self.dispatch(&mut resource, operation, args)
    }

    /// Run an operation on a resource the caller already holds.
    pub fn invoke<A: Any + Send>(
        &self,
        resource: &mut PooledResource<R>,
        operation: &str,
        args: A,
    ) -> PoolResult<Option<Value>> {
        self.dispatch(resource, operation, Value::new(args))
    }

    fn dispatch(
        &self,
        resource: &mut PooledResource<R>,
        operation: &str,
        args: Value,
    ) -> PoolResult<Option<Value>> {
        let result = self
            .shared
            .operations
            .invoke(resource, operation, args)
            .and_then(|reply| normalize(operation, reply));

        match &result {
            Err(PoolError::OperationNotFound(_)) => self.shared.metrics.record_unknown_operation(),
            _ => self.shared.metrics.record_operation(operation, result.is_ok()),
        }
        if let Err(ref err) = result {
            tracing::debug!(
                operation,
                resource = %resource.id(),
                error = %err,
                "transaction failed"
            );
        }
        result
    }
}

/// A pool seen without its resource type
///
/// # Examples
///
/// ```
/// use checkout_pool::{OperationTable, Pool, PoolConfiguration, Resource, Transact};
/// use std::sync::Arc;
///
/// struct Echo;
///
/// impl Resource for Echo {
///     fn operations() -> OperationTable<Self> {
///         OperationTable::new().value("echo", |_: &mut Echo, s: String| s)
///     }
/// }
///
/// let pool = Pool::start(PoolConfiguration::new().with_capacity(1), || {
///     Ok::<_, std::io::Error>(Echo)
/// })
/// .unwrap();
/// let erased: Arc<dyn Transact> = Arc::new(pool);
///
/// let reply = erased.transaction("echo", "hi".to_string()).unwrap().unwrap();
/// assert_eq!(reply.downcast::<String>().unwrap(), "hi");
/// assert!(!erased.supports("drop_table"));
/// ```
#[async_trait]
pub trait Transact: Send + Sync {
    fn transact(&self, operation: &str, args: Value) -> PoolResult<Option<Value>>;

    async fn transact_async(&self, operation: &str, args: Value) -> PoolResult<Option<Value>>;

    /// Whether the pooled resource type registers `operation`
    fn supports(&self, operation: &str) -> bool;
}

#[async_trait]
impl<R: Resource> Transact for Pool<R> {
    fn transact(&self, operation: &str, args: Value) -> PoolResult<Option<Value>> {
        self.transaction(operation, args)
    }

    async fn transact_async(&self, operation: &str, args: Value) -> PoolResult<Option<Value>> {
        self.transaction_async(operation, args).await
    }

    fn supports(&self, operation: &str) -> bool {
        self.operations().contains(operation)
    }
}

impl dyn Transact {
    pub fn transaction<A: Any + Send>(&self, operation: &str, args: A) -> PoolResult<Option<Value>> {
        self.transact(operation, Value::new(args))
    }

    pub async fn transaction_async<A: Any + Send>(
        &self,
        operation: &str,
        args: A,
    ) -> PoolResult<Option<Value>> {
        self.transact_async(operation, Value::new(args)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfiguration;
    use crate::errors::BoxError;
    use crate::operation::OperationTable;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::time::Duration;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("document not found")]
    struct NotFound;

    struct Stub {
        writes: usize,
    }

    impl Resource for Stub {
        fn operations() -> OperationTable<Self> {
            OperationTable::new()
                .fallible("answer", |_: &mut Stub, _: ()| Ok::<_, NotFound>(42))
                .status("touch", |stub: &mut Stub, _: ()| stub.writes += 1)
                .fallible("lookup", |_: &mut Stub, _: ()| Err::<i32, _>(NotFound))
                .status("flush", |_: &mut Stub, ok: bool| -> Result<(), BoxError> {
                    if ok { Ok(()) } else { Err("flush rejected".into()) }
                })
                .raw("split", |_: &mut Stub, _| {
                    Reply::Many(vec![Value::new(1), Value::new(2), Value::new(3)])
                })
                .status("explode", |_: &mut Stub, _: ()| -> Result<(), BoxError> {
                    panic!("resource crashed")
                })
        }
    }

    fn stub_pool(capacity: usize) -> Pool<Stub> {
        let config = PoolConfiguration::new()
            .with_capacity(capacity)
            .with_timeout(Duration::from_millis(50));
        Pool::start(config, || Ok::<_, BoxError>(Stub { writes: 0 })).unwrap()
    }

    #[test]
    fn test_value_with_no_error() {
        let pool = stub_pool(1);
        let value = pool.transaction("answer", ()).unwrap().unwrap();
        assert_eq!(value.downcast::<i32>().unwrap(), 42);
    }

    #[test]
    fn test_status_only_yields_nothing() {
        let pool = stub_pool(1);
        assert!(pool.transaction("touch", ()).unwrap().is_none());
        assert!(pool.transaction("flush", true).unwrap().is_none());

        let resource = pool.check_out().unwrap();
        assert_eq!(resource.writes, 1);
    }

    #[test]
    fn test_operation_error_passes_through() {
        let pool = stub_pool(1);

        let err = pool.transaction("lookup", ()).unwrap_err();
        assert!(err.operation_error().unwrap().is::<NotFound>());

        let err = pool.transaction("flush", false).unwrap_err();
        assert_eq!(err.operation_error().unwrap().to_string(), "flush rejected");
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_unknown_operation_still_checks_in() {
        let pool = stub_pool(1);
        let err = pool.transaction("drop_collection", ()).unwrap_err();

        assert!(matches!(err, PoolError::OperationNotFound(ref name) if name == "drop_collection"));
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn test_many_values_is_unsupported() {
        let pool = stub_pool(1);
        let err = pool.transaction("split", ()).unwrap_err();
        assert!(matches!(err, PoolError::UnsupportedSignature { arity: 3, .. }));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_argument_mismatch_still_checks_in() {
        let pool = stub_pool(1);
        let err = pool.transaction("flush", "yes").unwrap_err();
        assert!(matches!(err, PoolError::ArgumentMismatch { expected: "bool", .. }));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_panicking_operation_returns_resource() {
        let pool = stub_pool(1);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pool.transaction("explode", ())));

        assert!(outcome.is_err());
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.snapshot().check().is_ok());
        assert!(pool.transaction("answer", ()).is_ok());
    }

    #[test]
    fn test_exhausted_pool() {
        let pool = stub_pool(1);
        let _held = pool.check_out().unwrap();

        let err = pool.transaction("answer", ()).unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_operation_metrics() {
        let pool = stub_pool(1);
        pool.transaction("answer", ()).unwrap();
        pool.transaction("lookup", ()).unwrap_err();
        pool.transaction("lookup", ()).unwrap_err();

        let metrics = pool.get_metrics();
        let lookup = &metrics.operations["lookup"];
        assert_eq!((lookup.calls, lookup.failures), (2, 2));
        assert_eq!(metrics.operations["answer"].failures, 0);
    }

    #[test]
    fn test_unknown_operations_share_one_counter() {
        let pool = stub_pool(1);
        pool.transaction("answer", ()).unwrap();
        for i in 0..500 {
            let err = pool.transaction(&format!("missing_{i}"), ()).unwrap_err();
            assert!(matches!(err, PoolError::OperationNotFound(_)));
        }

        let metrics = pool.get_metrics();
        assert_eq!(metrics.unknown_operations, 500);
        assert_eq!(metrics.operations.len(), 1);
        assert!(metrics.operations.contains_key("answer"));

        let exported = pool.export_metrics();
        assert!(!exported.keys().any(|key| key.contains("missing_")));
        assert_eq!(pool.idle_count(), 1);
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_labels_only_registered_operations() {
        let pool = stub_pool(1);
        pool.transaction("lookup", ()).unwrap_err();
        pool.transaction("nonexistent", ()).unwrap_err();

        let output = pool.export_metrics_prometheus("stub", None).unwrap();
        assert!(output.contains("operation=\"lookup\""));
        assert!(!output.contains("nonexistent"));
        assert!(output.contains("resourcepool_unknown_operations_total{pool=\"stub\"} 1"));
    }

    #[tokio::test]
    async fn test_erased_async_transaction() {
        let erased: Arc<dyn Transact> = Arc::new(stub_pool(2));

        let value = erased.transaction_async("answer", ()).await.unwrap().unwrap();
        assert_eq!(value.downcast::<i32>().unwrap(), 42);
        assert!(erased.supports("lookup"));
    }
}

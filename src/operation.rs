//! Type-erased values and per-resource operation tables
//!
//! A poolable resource type declares, once, the operations it exposes by name.
//! Each handler is registered in one of the recognised call shapes and the
//! table erases it to a common form that takes a [`Value`] and yields a
//! [`Reply`].

use crate::errors::{BoxError, PoolError, PoolResult};

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;

/// An owned value whose concrete type is only known at runtime.
///
/// # Examples
///
/// ```
/// use checkout_pool::Value;
///
/// let value = Value::new(42_u32);
/// assert!(value.is::<u32>());
/// assert_eq!(value.downcast::<u32>().unwrap(), 42);
/// ```
pub struct Value(Box<dyn Any + Send>);

impl Value {
    /// Wrap a value. Wrapping a `Value` returns it unchanged.
    pub fn new<T: Any + Send>(value: T) -> Self {
        let boxed: Box<dyn Any + Send> = Box::new(value);
        match boxed.downcast::<Value>() {
            Ok(inner) => *inner,
            Err(boxed) => Value(boxed),
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Take the concrete value out, or get the `Value` back on a type mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Value> {
        self.0.downcast::<T>().map(|boxed| *boxed).map_err(Value)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Value(..)")
    }
}

/// What an operation produced, tagged by call shape
#[derive(Debug)]
pub enum Reply {
    /// Nothing, or only an error
    Status(Option<BoxError>),
    /// A value only
    Value(Value),
    /// A value and an error, either of which may be absent
    ValueWithStatus(Option<Value>, Option<BoxError>),
    /// Several values; not a recognised shape
    Many(Vec<Value>),
}

/// Return types accepted for status-only operations: `()` or `Result<(), E>`.
pub trait IntoStatus {
    fn into_status(self) -> Option<BoxError>;
}

impl IntoStatus for () {
    fn into_status(self) -> Option<BoxError> {
        None
    }
}

impl<E: Into<BoxError>> IntoStatus for Result<(), E> {
    fn into_status(self) -> Option<BoxError> {
        self.err().map(Into::into)
    }
}

type Handler<R> = Box<dyn Fn(&mut R, Value) -> PoolResult<Reply> + Send + Sync>;

/// Operations a resource type exposes, by name
///
/// Names are unique; registering one twice panics in debug builds.
pub struct OperationTable<R> {
    handlers: HashMap<String, Handler<R>>,
}

impl<R: 'static> Default for OperationTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: 'static> OperationTable<R> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register an operation that returns nothing or only an error.
    pub fn status<A, S, F>(self, name: impl Into<String>, op: F) -> Self
    where
        A: Any + Send,
        S: IntoStatus,
        F: Fn(&mut R, A) -> S + Send + Sync + 'static,
    {
        self.erased::<A, _>(name, move |resource, args| {
            Reply::Status(op(resource, args).into_status())
        })
    }

    /// Register an operation that returns a value only.
    pub fn value<A, T, F>(self, name: impl Into<String>, op: F) -> Self
    where
        A: Any + Send,
        T: Any + Send,
        F: Fn(&mut R, A) -> T + Send + Sync + 'static,
    {
        self.erased::<A, _>(name, move |resource, args| {
            Reply::Value(Value::new(op(resource, args)))
        })
    }

    /// Register an operation that returns a value or an error.
    pub fn fallible<A, T, E, F>(self, name: impl Into<String>, op: F) -> Self
    where
        A: Any + Send,
        T: Any + Send,
        E: Into<BoxError>,
        F: Fn(&mut R, A) -> Result<T, E> + Send + Sync + 'static,
    {
        self.erased::<A, _>(name, move |resource, args| match op(resource, args) {
            Ok(value) => Reply::ValueWithStatus(Some(Value::new(value)), None),
            Err(err) => Reply::ValueWithStatus(None, Some(err.into())),
        })
    }

    /// Register a handler working on erased values directly.
    pub fn raw<F>(self, name: impl Into<String>, op: F) -> Self
    where
        F: Fn(&mut R, Value) -> Reply + Send + Sync + 'static,
    {
        self.register(name.into(), Box::new(move |resource, args| Ok(op(resource, args))))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered operation names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn invoke(&self, resource: &mut R, name: &str, args: Value) -> PoolResult<Reply> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| PoolError::OperationNotFound(name.to_string()))?;
        handler(resource, args)
    }

    fn erased<A, F>(self, name: impl Into<String>, op: F) -> Self
    where
        A: Any + Send,
        F: Fn(&mut R, A) -> Reply + Send + Sync + 'static,
    {
        let name = name.into();
        let operation = name.clone();
        let handler: Handler<R> = Box::new(move |resource, args| {
            let args = args.downcast::<A>().map_err(|_| PoolError::ArgumentMismatch {
                operation: operation.clone(),
                expected: type_name::<A>(),
            })?;
            Ok(op(resource, args))
        });
        self.register(name, handler)
    }

    fn register(mut self, name: String, handler: Handler<R>) -> Self {
        let replaced = self.handlers.insert(name, handler);
        debug_assert!(replaced.is_none(), "operation registered twice");
        self
    }
}

/// A type the pool can dispatch operations to by name.
///
/// # Examples
///
/// ```
/// use checkout_pool::{OperationTable, Resource};
///
/// struct Counter(u64);
///
/// impl Resource for Counter {
///     fn operations() -> OperationTable<Self> {
///         OperationTable::new()
///             .value("add", |counter: &mut Counter, n: u64| {
///                 counter.0 += n;
///                 counter.0
///             })
///             .status("reset", |counter: &mut Counter, _: ()| counter.0 = 0)
///     }
/// }
///
/// assert_eq!(Counter::operations().names(), vec!["add", "reset"]);
/// ```
pub trait Resource: Send + Sized + 'static {
    fn operations() -> OperationTable<Self>;
}

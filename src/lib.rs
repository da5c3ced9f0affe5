//! # checkout_pool
//!
//! Bounded, thread-safe pool of reusable resources (database sessions, worker
//! handles) with lazy growth, timeout-bound checkout and by-name dispatch of
//! operations against whichever resource is checked out.
//!
//! ## Features
//!
//! - Eager fill at start, lazy growth up to capacity
//! - FIFO reuse of idle resources
//! - Checkout waits without polling; each check-in wakes exactly one waiter
//! - Automatic check-in via RAII (Drop trait), including while unwinding
//! - Blocking and async checkout with timeout and cancellation
//! - Transactions: run a named operation with type-erased arguments
//! - Metrics, Prometheus export and occupancy health
//!
//! ## Quick Start
//!
//! ```rust
//! use checkout_pool::{OperationTable, Pool, PoolConfiguration, Resource};
//!
//! struct Session {
//!     queries: u32,
//! }
//!
//! impl Resource for Session {
//!     fn operations() -> OperationTable<Self> {
//!         OperationTable::new().value("ping", |session: &mut Session, _: ()| {
//!             session.queries += 1;
//!             session.queries
//!         })
//!     }
//! }
//!
//! let pool = Pool::start(PoolConfiguration::new().with_capacity(4), || {
//!     Ok::<_, std::io::Error>(Session { queries: 0 })
//! })
//! .unwrap();
//!
//! let reply = pool.transaction("ping", ()).unwrap().unwrap();
//! assert_eq!(reply.downcast::<u32>().unwrap(), 1);
//! ```

mod pool;
mod config;
mod metrics;
mod health;
mod errors;
mod registry;
mod state;
mod operation;
mod transaction;

pub use pool::{Pool, PooledResource};
pub use config::{PoolConfiguration, DEFAULT_ACQUISITION_TIMEOUT};
pub use metrics::{OperationStats, PoolMetrics};
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use errors::{BoxError, PoolError, PoolResult, SharedError};
pub use registry::ResourceId;
pub use state::{LeaseInfo, PoolSnapshot};
pub use operation::{IntoStatus, OperationTable, Reply, Resource, Value};
pub use transaction::Transact;

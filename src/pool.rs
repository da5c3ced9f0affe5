//! Core resource pool: checkout, check-in and waiting under saturation

use crate::config::PoolConfiguration;
use crate::errors::{BoxError, PoolError, PoolResult};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::operation::{OperationTable, Resource};
use crate::registry::{Factory, ResourceId, Slot};
use crate::state::{LeaseInfo, Notifier, PoolSnapshot, PoolState, Release};

use crossbeam::channel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// A checked-out resource that automatically returns to the pool when dropped
pub struct PooledResource<R> {
    slot: Option<Slot<R>>,
    shared: Arc<Shared<R>>,
}

impl<R> PooledResource<R> {
    /// Identity of the underlying resource
    pub fn id(&self) -> ResourceId {
        self.slot().id
    }

    fn slot(&self) -> &Slot<R> {
        self.slot.as_ref().expect("resource already checked in")
    }
}

impl<R> Deref for PooledResource<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.slot().handle
    }
}

impl<R> DerefMut for PooledResource<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.slot.as_mut().expect("resource already checked in").handle
    }
}

impl<R> Drop for PooledResource<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.shared.check_in(slot);
        }
    }
}

impl<R> fmt::Debug for PooledResource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledResource")
            .field("id", &self.slot.as_ref().map(|slot| slot.id))
            .finish_non_exhaustive()
    }
}

pub(crate) struct Shared<R> {
    state: Mutex<PoolState<R>>,
    factory: Factory<R>,
    pub(crate) config: PoolConfiguration,
    pub(crate) metrics: MetricsTracker,
    pub(crate) operations: OperationTable<R>,
}

impl<R> Shared<R> {
    /// Take an idle resource, or grow if below capacity. `None` when saturated.
    fn acquire(&self, state: &mut PoolState<R>) -> PoolResult<Option<Slot<R>>> {
        if let Some(slot) = state.take_idle() {
            return Ok(Some(slot));
        }
        if state.registry.is_full() {
            return Ok(None);
        }

        // Construction stays under the lock so concurrent growth cannot overshoot capacity.
        match state.registry.grow(&self.factory) {
            Ok(slot) => {
                state.lend(&slot);
                self.metrics.record_created();
                tracing::debug!(
                    resource = %slot.id,
                    total = state.registry.len(),
                    "grew pool on demand"
                );
                Ok(Some(slot))
            }
            Err(err) => {
                self.metrics.record_construction_failure();
                tracing::warn!(error = %err, "resource construction failed during checkout");
                Err(err)
            }
        }
    }

    fn check_in(&self, slot: Slot<R>) {
        let id = slot.id;
        let mut state = self.state.lock();

        match state.release(slot) {
            Release::Idle => self.metrics.record_checkin(),
            Release::HandedOff => {
                self.metrics.record_checkin();
                self.metrics.record_handoff();
                tracing::trace!(resource = %id, "handed resource to waiting checkout");
            }
            Release::Unknown => {
                tracing::error!(
                    resource = %id,
                    "check-in of a resource that is not checked out; handle dropped"
                );
            }
        }

        debug_assert_eq!(state.snapshot().check(), Ok(()));
    }
}

/// Receiving end of a parked checkout
trait Handoff<R> {
    fn take(&mut self) -> Option<Slot<R>>;
}

impl<R> Handoff<R> for channel::Receiver<Slot<R>> {
    fn take(&mut self) -> Option<Slot<R>> {
        self.try_recv().ok()
    }
}

impl<R> Handoff<R> for oneshot::Receiver<Slot<R>> {
    fn take(&mut self) -> Option<Slot<R>> {
        self.try_recv().ok()
    }
}

/// A registered waiter. Unless completed, dropping it unregisters the waiter
/// and returns any resource that was handed over in the meantime.
struct Waiting<'a, R, H: Handoff<R>> {
    shared: &'a Shared<R>,
    waiter: u64,
    handoff: H,
    done: bool,
}

impl<'a, R, H: Handoff<R>> Waiting<'a, R, H> {
    fn new(shared: &'a Shared<R>, waiter: u64, handoff: H) -> Self {
        Self {
            shared,
            waiter,
            handoff,
            done: false,
        }
    }

    fn complete(&mut self) {
        self.done = true;
    }

    /// Give up waiting. Returns the resource if one was handed over before
    /// the waiter could be unregistered.
    fn withdraw(&mut self) -> Option<Slot<R>> {
        self.done = true;
        let mut state = self.shared.state.lock();
        if state.unpark(self.waiter) {
            return None;
        }
        self.handoff.take()
    }
}

impl<R, H: Handoff<R>> Drop for Waiting<'_, R, H> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(slot) = self.withdraw() {
                self.shared.check_in(slot);
            }
        }
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

/// Bounded pool of resources constructed by a factory
///
/// # Examples
///
/// ```
/// use checkout_pool::{OperationTable, Pool, PoolConfiguration, Resource};
///
/// struct Session {
///     queries: usize,
/// }
///
/// impl Resource for Session {
///     fn operations() -> OperationTable<Self> {
///         OperationTable::new()
///     }
/// }
///
/// let config = PoolConfiguration::new().with_capacity(2);
/// let pool = Pool::start(config, || Ok::<_, std::io::Error>(Session { queries: 0 })).unwrap();
///
/// {
///     let mut session = pool.check_out().unwrap();
///     session.queries += 1;
///     assert_eq!(pool.in_use_count(), 1);
/// }
///
/// assert_eq!(pool.idle_count(), 2);
/// ```
pub struct Pool<R> {
    pub(crate) shared: Arc<Shared<R>>,
}

impl<R> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Resource> Pool<R> {
    /// Create a pool and construct its initial resources.
    ///
    /// Call once per pool; clone the returned handle to share it. A factory
    /// failure during the initial fill aborts startup.
    pub fn start<F, E>(config: PoolConfiguration, make: F) -> PoolResult<Self>
    where
        F: Fn() -> Result<R, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        config.validate()?;

        let factory: Factory<R> = Box::new(move || make().map_err(Into::into));
        let metrics = MetricsTracker::new();
        let mut state = PoolState::new(config.capacity);

        for _ in 0..config.initial_size() {
            let slot = state.registry.grow(&factory).inspect_err(|err| {
                metrics.record_construction_failure();
                tracing::error!(error = %err, "resource pool failed to start");
            })?;
            metrics.record_created();
            state.push_idle(slot);
        }

        tracing::info!(
            capacity = config.capacity,
            initial = state.registry.len(),
            timeout = ?config.acquisition_timeout(),
            "resource pool started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                factory,
                config,
                metrics,
                operations: R::operations(),
            }),
        })
    }
}

impl<R> Pool<R> {
    /// Check out a resource, waiting up to the configured acquisition timeout
    pub fn check_out(&self) -> PoolResult<PooledResource<R>> {
        self.check_out_timeout(self.shared.config.acquisition_timeout())
    }

    /// Check out a resource, waiting up to `timeout` while the pool is saturated.
    ///
    /// The timeout bounds only the wait; constructing a new resource below
    /// capacity is not bounded by it.
    pub fn check_out_timeout(&self, timeout: Duration) -> PoolResult<PooledResource<R>> {
        let deadline = deadline_after(timeout);
        let mut waiting = {
            let mut state = self.shared.state.lock();
            if let Some(slot) = self.shared.acquire(&mut state)? {
                return Ok(self.lease(slot));
            }
            let (tx, rx) = channel::bounded(1);
            let waiter = state.park(Notifier::Thread(tx));
            Waiting::new(&*self.shared, waiter, rx)
        };
        self.shared.metrics.record_wait();

        match waiting.handoff.recv_deadline(deadline) {
            Ok(slot) => {
                waiting.complete();
                Ok(self.lease(slot))
            }
            Err(_) => self.expire(waiting, timeout),
        }
    }

    /// Check out a resource without waiting; `None` when saturated.
    pub fn try_check_out(&self) -> PoolResult<Option<PooledResource<R>>> {
        let mut state = self.shared.state.lock();
        let slot = self.shared.acquire(&mut state)?;
        drop(state);
        Ok(slot.map(|slot| self.lease(slot)))
    }

    /// Check out a resource asynchronously with the configured timeout
    pub async fn check_out_async(&self) -> PoolResult<PooledResource<R>> {
        self.check_out_async_timeout(self.shared.config.acquisition_timeout())
            .await
    }

    /// Check out a resource asynchronously, waiting up to `timeout`.
    ///
    /// Dropping the future while it waits unregisters it; a resource handed
    /// over in that window goes straight back to the pool.
    pub async fn check_out_async_timeout(&self, timeout: Duration) -> PoolResult<PooledResource<R>> {
        let deadline = deadline_after(timeout);
        let mut waiting = {
            let mut state = self.shared.state.lock();
            if let Some(slot) = self.shared.acquire(&mut state)? {
                return Ok(self.lease(slot));
            }
            let (tx, rx) = oneshot::channel();
            let waiter = state.park(Notifier::Task(tx));
            Waiting::new(&*self.shared, waiter, rx)
        };
        self.shared.metrics.record_wait();

        match tokio::time::timeout_at(deadline.into(), &mut waiting.handoff).await {
            Ok(Ok(slot)) => {
                waiting.complete();
                Ok(self.lease(slot))
            }
            _ => self.expire(waiting, timeout),
        }
    }

    /// Return a resource to the pool. Dropping the guard does the same.
    pub fn check_in(&self, resource: PooledResource<R>) {
        drop(resource);
    }

    fn lease(&self, slot: Slot<R>) -> PooledResource<R> {
        self.shared.metrics.record_checkout();
        PooledResource {
            slot: Some(slot),
            shared: Arc::clone(&self.shared),
        }
    }

    fn expire<H: Handoff<R>>(
        &self,
        mut waiting: Waiting<'_, R, H>,
        timeout: Duration,
    ) -> PoolResult<PooledResource<R>> {
        match waiting.withdraw() {
            Some(slot) => Ok(self.lease(slot)),
            None => {
                self.shared.metrics.record_timeout();
                tracing::debug!(?timeout, "checkout timed out");
                Err(PoolError::PoolExhausted(timeout))
            }
        }
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    pub fn operations(&self) -> &OperationTable<R> {
        &self.shared.operations
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    /// Number of resources constructed so far
    pub fn total_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle_count()
    }

    pub fn in_use_count(&self) -> usize {
        self.shared.state.lock().in_use_count()
    }

    /// Checkouts currently parked waiting for a resource
    pub fn waiting_count(&self) -> usize {
        self.shared.state.lock().waiting_count()
    }

    /// Consistent view of the pool's accounting
    pub fn snapshot(&self) -> PoolSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Checked-out resources ordered by id, with how long each has been held
    pub fn leases(&self) -> Vec<LeaseInfo> {
        self.shared.state.lock().leases()
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let state = self.shared.state.lock();
        HealthStatus::new(
            state.idle_count(),
            state.in_use_count(),
            state.registry.capacity(),
            state.waiting_count(),
        )
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let state = self.shared.state.lock();
        let (idle, in_use, total, waiting) = (
            state.idle_count(),
            state.in_use_count(),
            state.registry.len(),
            state.waiting_count(),
        );
        drop(state);

        self.shared
            .metrics
            .get_metrics(idle, in_use, total, waiting, self.capacity())
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }
}

impl<R> fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug)]
    struct Session {
        serial: usize,
    }

    impl Resource for Session {
        fn operations() -> OperationTable<Self> {
            OperationTable::new()
        }
    }

    fn pool_with(config: PoolConfiguration) -> Pool<Session> {
        let serial = AtomicUsize::new(0);
        Pool::start(config, move || {
            Ok::<_, BoxError>(Session {
                serial: serial.fetch_add(1, Ordering::SeqCst),
            })
        })
        .unwrap()
    }

    #[test]
    fn test_start_fills_eagerly() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(3));

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.all.len(), 3);
        assert_eq!(snapshot.idle.len(), 3);
        assert!(snapshot.check().is_ok());
    }

    #[test]
    fn test_start_propagates_construction_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = Pool::<Session>::start(PoolConfiguration::new().with_capacity(4), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 2 {
                Err("server unreachable")
            } else {
                Ok(Session { serial: 0 })
            }
        });

        assert!(matches!(result, Err(PoolError::Construction(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_start_rejects_zero_capacity() {
        let result = Pool::start(PoolConfiguration::new().with_capacity(0), || {
            Ok::<_, BoxError>(Session { serial: 0 })
        });
        assert!(matches!(result, Err(PoolError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_lazy_growth_stops_at_capacity() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(2).with_initial_size(0));
        assert_eq!(pool.total_count(), 0);

        let first = pool.check_out().unwrap();
        let second = pool.check_out().unwrap();
        assert_eq!((first.id().get(), second.id().get()), (1, 2));
        assert_eq!(pool.idle_count(), 0);

        assert!(pool.try_check_out().unwrap().is_none());
        assert_eq!(pool.total_count(), 2);
    }

    #[test]
    fn test_lazy_growth_failure_leaves_pool_unchanged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let config = PoolConfiguration::new().with_capacity(3).with_initial_size(1);
        let pool = Pool::start(config, move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                Err("connection reset")
            } else {
                Ok(Session { serial: 7 })
            }
        })
        .unwrap();

        let held = pool.check_out().unwrap();
        let before = pool.snapshot();

        let err = pool.check_out().unwrap_err();
        assert!(matches!(err, PoolError::Construction(_)));
        assert_eq!(pool.snapshot(), before);

        let grown = pool.check_out().unwrap();
        assert_eq!(grown.id().get(), 2);
        drop(held);
        assert!(pool.snapshot().check().is_ok());
    }

    #[test]
    fn test_idle_resources_reused_in_fifo_order() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(2));
        let a = pool.check_out().unwrap();
        let b = pool.check_out().unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        pool.check_in(a);
        pool.check_in(b);

        let first = pool.check_out().unwrap();
        let second = pool.check_out().unwrap();
        assert_eq!((first.id(), second.id()), (a_id, b_id));
    }

    #[test]
    fn test_timeout_consumes_no_resource() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let _held = pool.check_out().unwrap();

        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let err = pool.check_out_timeout(timeout).unwrap_err();

        assert!(matches!(err, PoolError::PoolExhausted(t) if t == timeout));
        assert!(started.elapsed() >= timeout);
        assert_eq!(pool.total_count(), 1);
        assert_eq!(pool.waiting_count(), 0);
        assert_eq!(pool.get_metrics().timeouts, 1);
    }

    #[test]
    fn test_waiter_receives_checked_in_resource() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let held = pool.check_out().unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.check_out_timeout(Duration::from_secs(5)).map(|r| r.id()))
        };

        while pool.waiting_count() == 0 {
            thread::yield_now();
        }
        drop(held);

        assert_eq!(waiter.join().unwrap().unwrap(), held_id);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.get_metrics().handoffs, 1);
    }

    #[test]
    fn test_concurrent_checkouts_never_share_a_resource() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(4));
        let outstanding = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let outstanding = Arc::clone(&outstanding);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let resource = pool.check_out().unwrap();
                        assert!(outstanding.lock().insert(resource.id()));
                        thread::yield_now();
                        assert!(outstanding.lock().remove(&resource.id()));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.idle.len(), 4);
        assert!(snapshot.check().is_ok());
    }

    #[test]
    fn test_leases_are_ordered_by_id() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(3));
        let a = pool.check_out().unwrap();
        let b = pool.check_out().unwrap();
        drop(a);
        let c = pool.check_out().unwrap();
        let d = pool.check_out().unwrap();

        let ids: Vec<u64> = pool.leases().iter().map(|l| l.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!((d.id().get(), d.serial), (1, 0));
        drop((b, c, d));
    }

    #[test]
    fn test_expired_waiter_keeps_resource_handed_over_in_time() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let held = pool.check_out().unwrap();
        let held_id = held.id();

        let (tx, rx) = channel::bounded(1);
        let waiter = pool.shared.state.lock().park(Notifier::Thread(tx));
        let waiting = Waiting::new(&*pool.shared, waiter, rx);

        // the check-in lands after the deadline passed but before the waiter withdraws
        drop(held);
        assert_eq!(pool.waiting_count(), 0);

        let resource = pool.expire(waiting, Duration::from_millis(1)).unwrap();
        assert_eq!(resource.id(), held_id);
        assert_eq!(pool.in_use_count(), 1);

        let metrics = pool.get_metrics();
        assert_eq!((metrics.timeouts, metrics.handoffs), (0, 1));
        assert!(pool.snapshot().check().is_ok());

        drop(resource);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_dropped_waiter_returns_resource_handed_over() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let held = pool.check_out().unwrap();

        let (tx, rx) = oneshot::channel();
        let waiter = pool.shared.state.lock().park(Notifier::Task(tx));
        let waiting = Waiting::new(&*pool.shared, waiter, rx);

        drop(held);
        assert_eq!(pool.in_use_count(), 1);

        drop(waiting);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.snapshot().check().is_ok());
    }

    #[tokio::test]
    async fn test_async_checkout_waits_for_check_in() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let held = pool.check_out_async().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.check_out_async_timeout(Duration::from_secs(5))
                    .await
                    .map(|r| r.id())
            })
        };

        while pool.waiting_count() == 0 {
            tokio::task::yield_now().await;
        }
        let held_id = held.id();
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_async_timeout() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let _held = pool.check_out_async().await.unwrap();

        let err = pool
            .check_out_async_timeout(Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted(_)));
        assert_eq!(pool.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_async_checkout_unregisters() {
        let pool = pool_with(PoolConfiguration::new().with_capacity(1));
        let held = pool.check_out().unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            pool.check_out_async_timeout(Duration::from_secs(5)),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(pool.waiting_count(), 0);

        drop(held);
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.snapshot().check().is_ok());
    }
}

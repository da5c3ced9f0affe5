//! Lock-protected pool state: registry, idle queue, in-use set and parked waiters

use crate::registry::{Registry, ResourceId, Slot};

use crossbeam::channel;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Checkout bookkeeping for a resource currently in use
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lease {
    pub checked_out_at: Instant,
}

impl Lease {
    fn now() -> Self {
        Self {
            checked_out_at: Instant::now(),
        }
    }
}

/// Checked-out resource as reported by [`Pool::leases`](crate::Pool::leases)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseInfo {
    pub id: ResourceId,
    pub held_for: Duration,
}

/// Atomic view of the pool's accounting, taken under the lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Every constructed resource, in construction order
    pub all: Vec<ResourceId>,
    /// Idle resources, front of the queue first
    pub idle: Vec<ResourceId>,
    /// Checked-out resources, ordered by id
    pub in_use: Vec<ResourceId>,
    /// Checkouts parked while the pool is saturated
    pub waiting: usize,
    pub capacity: usize,
}

impl PoolSnapshot {
    /// Verify the accounting invariants, describing the first violation found.
    pub fn check(&self) -> Result<(), String> {
        if self.all.len() > self.capacity {
            return Err(format!(
                "{} resources constructed with capacity {}",
                self.all.len(),
                self.capacity
            ));
        }
        if self.all.len() != self.idle.len() + self.in_use.len() {
            return Err(format!(
                "{} resources but {} idle and {} in use",
                self.all.len(),
                self.idle.len(),
                self.in_use.len()
            ));
        }

        let mut seen = HashSet::with_capacity(self.all.len());
        for id in self.idle.iter().chain(&self.in_use) {
            if !seen.insert(*id) {
                return Err(format!("resource {} is tracked twice", id));
            }
        }
        if let Some(missing) = self.all.iter().find(|id| !seen.contains(id)) {
            return Err(format!("resource {} is neither idle nor in use", missing));
        }

        if self.waiting > 0 && !self.idle.is_empty() {
            return Err(format!(
                "{} checkouts waiting while {} resources are idle",
                self.waiting,
                self.idle.len()
            ));
        }
        Ok(())
    }
}

/// How a parked checkout is handed its resource
pub(crate) enum Notifier<R> {
    Thread(channel::Sender<Slot<R>>),
    Task(oneshot::Sender<Slot<R>>),
}

impl<R> Notifier<R> {
    /// Hand over the slot, giving it back if the receiving side is gone.
    fn deliver(self, slot: Slot<R>) -> Result<(), Slot<R>> {
        match self {
            Notifier::Thread(tx) => tx.try_send(slot).map_err(|err| err.into_inner()),
            Notifier::Task(tx) => tx.send(slot),
        }
    }
}

struct Waiter<R> {
    id: u64,
    notifier: Notifier<R>,
}

/// Outcome of returning a resource
pub(crate) enum Release {
    Idle,
    HandedOff,
    Unknown,
}

pub(crate) struct PoolState<R> {
    pub registry: Registry,
    idle: VecDeque<Slot<R>>,
    in_use: BTreeMap<ResourceId, Lease>,
    waiters: VecDeque<Waiter<R>>,
    next_waiter: u64,
}

impl<R> PoolState<R> {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Registry::new(capacity),
            idle: VecDeque::with_capacity(capacity),
            in_use: BTreeMap::new(),
            waiters: VecDeque::new(),
            next_waiter: 0,
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiters.len()
    }

    /// Add a freshly constructed resource to the back of the idle queue.
    pub fn push_idle(&mut self, slot: Slot<R>) {
        self.idle.push_back(slot);
    }

    /// Pop the longest-idle resource and mark it in use.
    pub fn take_idle(&mut self) -> Option<Slot<R>> {
        let slot = self.idle.pop_front()?;
        self.in_use.insert(slot.id, Lease::now());
        Some(slot)
    }

    /// Mark a resource that skipped the idle queue as in use.
    pub fn lend(&mut self, slot: &Slot<R>) {
        self.in_use.insert(slot.id, Lease::now());
    }

    pub fn park(&mut self, notifier: Notifier<R>) -> u64 {
        let id = self.next_waiter;
        self.next_waiter += 1;
        self.waiters.push_back(Waiter { id, notifier });
        id
    }

    /// Remove a parked waiter; `false` means it was already handed a slot.
    pub fn unpark(&mut self, waiter: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == waiter) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Return a checked-out resource: to the oldest live waiter if any,
    /// otherwise to the back of the idle queue.
    ///
    /// A slot whose id is not in use is dropped and reported as `Unknown`.
    pub fn release(&mut self, slot: Slot<R>) -> Release {
        if self.in_use.remove(&slot.id).is_none() {
            return Release::Unknown;
        }

        let mut slot = slot;
        while let Some(waiter) = self.waiters.pop_front() {
            let id = slot.id;
            self.in_use.insert(id, Lease::now());
            match waiter.notifier.deliver(slot) {
                Ok(()) => return Release::HandedOff,
                Err(returned) => {
                    self.in_use.remove(&id);
                    slot = returned;
                }
            }
        }

        self.idle.push_back(slot);
        Release::Idle
    }

    pub fn leases(&self) -> Vec<LeaseInfo> {
        self.in_use
            .iter()
            .map(|(id, lease)| LeaseInfo {
                id: *id,
                held_for: lease.checked_out_at.elapsed(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            all: self.registry.records().to_vec(),
            idle: self.idle.iter().map(|s| s.id).collect(),
            in_use: self.in_use.keys().copied().collect(),
            waiting: self.waiters.len(),
            capacity: self.registry.capacity(),
        }
    }
}

//! Resource construction and identity accounting

use crate::errors::{BoxError, PoolError, PoolResult};

use std::fmt;

/// Factory producing one resource per call.
pub(crate) type Factory<R> = Box<dyn Fn() -> Result<R, BoxError> + Send + Sync>;

/// Identity of a constructed resource. Assigned from 1 upward, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A resource handle together with its identity
pub(crate) struct Slot<R> {
    pub id: ResourceId,
    pub handle: R,
}

/// Append-only list of constructed resources, bounded by capacity
pub(crate) struct Registry {
    records: Vec<ResourceId>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Every constructed resource, in construction order
    pub fn records(&self) -> &[ResourceId] {
        &self.records
    }

    /// Construct one resource. Must be called under the pool lock.
    ///
    /// A failing factory leaves the registry untouched, so no id is consumed.
    pub fn grow<R>(&mut self, factory: &Factory<R>) -> PoolResult<Slot<R>> {
        if self.is_full() {
            return Err(PoolError::PoolFull);
        }

        let handle = factory().map_err(PoolError::construction)?;
        let id = ResourceId(self.records.len() as u64 + 1);
        self.records.push(id);

        Ok(Slot { id, handle })
    }
}

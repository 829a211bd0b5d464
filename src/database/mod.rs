//! Per-process accounting databases
//!
//! This module provides:
//! - [`Counter`] and [`CounterSet`]: current/peak/lifetime byte accounting
//! - [`RecordStore`]: the hashed record table each process owns
//! - [`HandleTable`]: the per-process integer handle allocator
//! - [`Registry`]: the process-keyed table of databases
//!
//! Three lock domains are involved. The registry's structure lock guards
//! bucket chains, free lists and every record store. Each database then
//! has its own counters lock and its own handle lock, reachable through a
//! [`DatabaseRef`] without touching the structure lock.

pub mod counters;
pub mod handles;
pub mod records;
pub mod registry;

pub use counters::{Counter, CounterSet};
pub use handles::HandleTable;
pub use records::{RecordStore, ResourceRecord};
pub use registry::{DatabaseState, Registry};

use crate::error::{poisoned, NotFound, TrackerError, TrackerResult};
use crate::kinds::{ResourceKind, VidMemClass};
use std::sync::{Arc, Mutex, MutexGuard};

/// A value stamped with the generation of the database that owns it
#[derive(Debug, Default)]
pub(crate) struct Generational<T> {
    pub(crate) generation: u64,
    pub(crate) value: T,
}

/// State that outlives a single structure-lock critical section
#[derive(Debug, Default)]
pub(crate) struct DatabaseShared {
    pub(crate) counters: Mutex<Generational<CounterSet>>,
    pub(crate) handles: Mutex<Generational<HandleTable>>,
}

impl DatabaseShared {
    /// Re-initialise for a new owner
    pub(crate) fn reset(&self, generation: u64) -> TrackerResult<()> {
        {
            let mut counters = self.counters.lock().map_err(poisoned("counters"))?;
            counters.generation = generation;
            counters.value.reset();
        }
        let mut handles = self.handles.lock().map_err(poisoned("handles"))?;
        handles.generation = generation;
        handles.value.clear();
        Ok(())
    }
}

/// Handle to one process database
///
/// A `DatabaseRef` stays cheap to clone and never keeps the database alive
/// on its own: once the registry recycles the slot, every operation through
/// an old handle fails with `NotFound`.
#[derive(Debug, Clone)]
pub struct DatabaseRef {
    pub(crate) index: usize,
    pub(crate) generation: u64,
    pub(crate) process_id: u32,
    pub(crate) shared: Arc<DatabaseShared>,
}

impl DatabaseRef {
    /// Process this database accounts for
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Generation stamp assigned when the database was created
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Snapshot of every counter
    pub fn counters(&self) -> TrackerResult<CounterSet> {
        Ok(self.lock_counters()?.value.clone())
    }

    pub(crate) fn account(
        &self,
        kind: ResourceKind,
        class: Option<VidMemClass>,
        bytes: u64,
    ) -> TrackerResult<()> {
        self.lock_counters()?.value.account(kind, class, bytes)
    }

    pub(crate) fn unaccount(
        &self,
        kind: ResourceKind,
        class: Option<VidMemClass>,
        bytes: u64,
    ) -> TrackerResult<()> {
        self.lock_counters()?.value.unaccount(kind, class, bytes)
    }

    /// File `value` in the handle table
    pub fn allocate_handle(&self, value: u64) -> TrackerResult<u32> {
        Ok(self.lock_handles()?.value.allocate(value))
    }

    /// Value behind `handle`
    pub fn query_handle(&self, handle: u32) -> TrackerResult<u64> {
        self.lock_handles()?.value.query(handle)
    }

    /// Release `handle`
    pub fn free_handle(&self, handle: u32) -> TrackerResult<u64> {
        self.lock_handles()?.value.free(handle)
    }

    /// Number of live handles
    pub fn handle_count(&self) -> TrackerResult<usize> {
        Ok(self.lock_handles()?.value.len())
    }

    pub(crate) fn clear_handles(&self) -> TrackerResult<usize> {
        let mut handles = self.lock_handles()?;
        let released = handles.value.len();
        handles.value.clear();
        Ok(released)
    }

    fn lock_counters(&self) -> TrackerResult<MutexGuard<'_, Generational<CounterSet>>> {
        let guard = self.shared.counters.lock().map_err(poisoned("counters"))?;
        self.check(guard.generation)?;
        Ok(guard)
    }

    fn lock_handles(&self) -> TrackerResult<MutexGuard<'_, Generational<HandleTable>>> {
        let guard = self.shared.handles.lock().map_err(poisoned("handles"))?;
        self.check(guard.generation)?;
        Ok(guard)
    }

    fn check(&self, generation: u64) -> TrackerResult<()> {
        if generation != self.generation {
            return Err(TrackerError::NotFound(NotFound::Process(self.process_id)));
        }
        Ok(())
    }
}

//! Integer handle table
//!
//! Maps small `u32` ids handed out to user space onto opaque `u64` values
//! owned by the driver. Id 0 is never issued.

use crate::error::{TrackerError, TrackerResult};

/// Per-process handle allocator
#[derive(Debug, Clone, Default)]
pub struct HandleTable {
    slots: Vec<Option<u64>>,
    free: Vec<u32>,
    live: usize,
}

impl HandleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` and return the id it was filed under
    pub fn allocate(&mut self, value: u64) -> u32 {
        self.live += 1;
        if let Some(id) = self.free.pop() {
            self.slots[(id - 1) as usize] = Some(value);
            return id;
        }
        self.slots.push(Some(value));
        self.slots.len() as u32
    }

    /// Value filed under `id`
    pub fn query(&self, id: u32) -> TrackerResult<u64> {
        self.slot(id)
            .copied()
            .flatten()
            .ok_or_else(|| TrackerError::InvalidArgument(format!("unknown handle {}", id)))
    }

    /// Release `id` and return the value it held
    pub fn free(&mut self, id: u32) -> TrackerResult<u64> {
        let value = self.query(id)?;
        self.slots[(id - 1) as usize] = None;
        self.free.push(id);
        self.live -= 1;
        Ok(value)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check whether no handle is live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Drop every handle, keeping the backing storage
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.live = 0;
    }

    fn slot(&self, id: u32) -> Option<&Option<u64>> {
        id.checked_sub(1).and_then(|i| self.slots.get(i as usize))
    }
}

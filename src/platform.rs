//! Contracts for the collaborators the surrounding driver supplies
//!
//! The accounting core never reads a clock or frees a resource itself. It
//! asks a [`TickSource`] for timestamps and hands every record that is
//! still alive at process teardown to a [`ResourceFinalizer`].

use crate::database::ResourceRecord;
use crate::error::TrackerResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic tick source
///
/// Successive calls must never go backwards.
#[cfg_attr(test, mockall::automock)]
pub trait TickSource: Send + Sync {
    /// Current tick
    fn now(&self) -> u64;
}

/// Type-specific release routine invoked for every record still alive when
/// a process database is torn down
#[cfg_attr(test, mockall::automock)]
pub trait ResourceFinalizer: Send + Sync {
    /// Free the resource behind `record`
    fn release(&self, process_id: u32, record: &ResourceRecord) -> TrackerResult<()>;
}

/// Microsecond clock anchored at construction
///
/// Ticks start at 1 so that a valid timestamp is never confused with the
/// profiler's "no sample" zero.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock at tick 1
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64 + 1
    }
}

/// Hand-driven clock for replays and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    tick: AtomicU64,
}

impl ManualClock {
    /// Clock reading `start`
    pub fn new(start: u64) -> Self {
        Self {
            tick: AtomicU64::new(start),
        }
    }

    /// Jump to `tick`; earlier values are ignored to stay monotonic
    pub fn set(&self, tick: u64) {
        self.tick.fetch_max(tick, Ordering::AcqRel);
    }

    /// Move forward by `ticks`
    pub fn advance(&self, ticks: u64) -> u64 {
        self.tick.fetch_add(ticks, Ordering::AcqRel) + ticks
    }
}

impl TickSource for ManualClock {
    fn now(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }
}

/// Finalizer that only logs; used when the driver owns cleanup elsewhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFinalizer;

impl ResourceFinalizer for NoopFinalizer {
    fn release(&self, process_id: u32, record: &ResourceRecord) -> TrackerResult<()> {
        log::trace!(
            "DB({}): {} 0x{:x} bytes={} left to driver",
            process_id,
            record.kind,
            record.owner_key,
            record.bytes
        );
        Ok(())
    }
}

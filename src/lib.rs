//! # GPUDB - Per-process GPU resource accounting
//!
//! Bookkeeping core of a GPU kernel driver: it tracks every live
//! allocation made on behalf of every client process and measures how long
//! each hardware core spends idle.
//!
//! ## Features
//!
//! - **Process registry** hashed by process id, with move-to-front lookups
//!   and a one-deep deferred free on teardown
//! - **Record stores** with recycled nodes, so allocation churn stays off
//!   the heap
//! - **Byte counters** (current, peak, lifetime) per resource kind, video
//!   memory surface type and memory pool
//! - **Idle profiler** rebuilding the idle share of any recent window from
//!   a ring of transitions, plus duty-cycle measurement
//! - **Usage reports** as fixed-layout text or timestamped JSON
//! - **Trace replay** for examining captured workloads offline
//!
//! ## Quick Start
//!
//! ```rust
//! use gpudb::prelude::*;
//!
//! fn main() -> Result<(), TrackerError> {
//!     let tracker = ProcessTracker::new(TrackerConfig::default())?;
//!
//!     tracker.create_database(42)?;
//!     tracker.register_resource(42, ResourceRecord::new(ResourceKind::NonPaged, 0x1000, 4096))?;
//!
//!     let counter = tracker.query_counters(
//!         QueryTarget::Process(42),
//!         ResourceKind::NonPaged,
//!         MemoryPool::Unknown,
//!     )?;
//!     assert_eq!(counter.current_bytes, 4096);
//!
//!     tracker.destroy_database(42)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod kinds;
pub mod platform;
pub mod profiler;
pub mod replay;
pub mod report;

// Re-export main API for easy access
pub use api::{ProcessTracker, QueryTarget, TeardownSummary};
pub use config::{ProfilerConfig, RegistryConfig, TrackerConfig};
pub use database::{Counter, CounterSet, DatabaseRef, Registry, ResourceRecord};
pub use error::{NotFound, TrackerError, TrackerResult};
pub use kinds::{MemoryPool, ResourceKind, SurfaceType, VidMemClass};
pub use platform::{ManualClock, MonotonicClock, NoopFinalizer, ResourceFinalizer, TickSource};
pub use profiler::{Core, IdleMarker, IdleProfiler, IdleWindow, PowerDecision};
pub use replay::{replay, Trace, TraceEvent};
pub use report::{SurfaceSelector, UsageSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
///
/// # Example
///
/// ```no_run
/// println!("Using gpudb v{}", gpudb::version());
/// ```
pub fn version() -> &'static str {
    VERSION
}


/// Prelude module for convenient imports
///
/// # Example
///
/// ```no_run
/// use gpudb::prelude::*;
///
/// let tracker = ProcessTracker::new(TrackerConfig::compact())?;
/// # Ok::<(), TrackerError>(())
/// ```
pub mod prelude {
    pub use crate::api::{ProcessTracker, QueryTarget, TeardownSummary};
    pub use crate::config::TrackerConfig;
    pub use crate::database::{Counter, ResourceRecord};
    pub use crate::error::{TrackerError, TrackerResult};
    pub use crate::kinds::{MemoryPool, ResourceKind, SurfaceType, VidMemClass};
    pub use crate::profiler::{Core, IdleMarker};
    pub use crate::report::SurfaceSelector;
    pub use crate::version;
}

//! Resource classification tables
//!
//! Every accounted allocation carries a [`ResourceKind`]. Video memory is
//! further split by the surface it backs ([`SurfaceType`]) and by the pool
//! it was carved from ([`MemoryPool`]).

pub mod pool;
pub mod surface;

pub use pool::MemoryPool;
pub use surface::{SurfaceType, SURFACE_TYPE_NAMES};

use serde::{Deserialize, Serialize};

/// Category of a tracked allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Video memory node handle
    VideoMemory,
    /// Video memory still locked by the process
    VideoMemoryLocked,
    /// Non-paged system memory
    NonPaged,
    /// Physically contiguous memory
    Contiguous,
    /// Kernel memory mapped into the process
    MapMemory,
    /// User memory mapped into the GPU
    MapUserMemory,
    /// Virtual command buffer
    CommandBuffer,
    /// Context buffer
    Context,
    /// User signal
    Signal,
    /// Native fence sync point
    SyncPoint,
    /// Shared buffer
    SharedBuffer,
    /// Reserved: idle/busy notification, never stored as a record
    Idle,
}

impl ResourceKind {
    /// Kinds that own a byte counter, in counter-set order
    pub const COUNTED: [ResourceKind; 7] = [
        ResourceKind::VideoMemory,
        ResourceKind::NonPaged,
        ResourceKind::Contiguous,
        ResourceKind::MapMemory,
        ResourceKind::MapUserMemory,
        ResourceKind::CommandBuffer,
        ResourceKind::Context,
    ];

    /// Every kind that can be stored as a record
    pub const RECORDED: [ResourceKind; 11] = [
        ResourceKind::VideoMemory,
        ResourceKind::VideoMemoryLocked,
        ResourceKind::NonPaged,
        ResourceKind::Contiguous,
        ResourceKind::MapMemory,
        ResourceKind::MapUserMemory,
        ResourceKind::CommandBuffer,
        ResourceKind::Context,
        ResourceKind::Signal,
        ResourceKind::SyncPoint,
        ResourceKind::SharedBuffer,
    ];

    /// Slot of this kind's counter, `None` for kinds without byte accounting
    pub fn counter_index(self) -> Option<usize> {
        Self::COUNTED.iter().position(|&k| k == self)
    }

    /// Check whether this kind is the reserved idle marker
    pub fn is_idle(self) -> bool {
        self == ResourceKind::Idle
    }

    /// Upper-case name used in teardown and report output
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::VideoMemory => "VIDEO_MEMORY",
            ResourceKind::VideoMemoryLocked => "VIDEO_MEMORY_LOCKED",
            ResourceKind::NonPaged => "NON_PAGED",
            ResourceKind::Contiguous => "CONTIGUOUS",
            ResourceKind::MapMemory => "MAP_MEMORY",
            ResourceKind::MapUserMemory => "MAP_USER_MEMORY",
            ResourceKind::CommandBuffer => "COMMAND_BUFFER",
            ResourceKind::Context => "CONTEXT",
            ResourceKind::Signal => "SIGNAL",
            ResourceKind::SyncPoint => "SYNC_POINT",
            ResourceKind::SharedBuffer => "SHBUF",
            ResourceKind::Idle => "IDLE",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sub-classification of a video memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VidMemClass {
    /// Surface the allocation backs
    pub surface: SurfaceType,
    /// Pool the allocation was carved from
    pub pool: MemoryPool,
}

impl VidMemClass {
    /// Create a classification
    pub fn new(surface: SurfaceType, pool: MemoryPool) -> Self {
        Self { surface, pool }
    }
}

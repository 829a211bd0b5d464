//! Video memory backing pools

use serde::{Deserialize, Serialize};

/// Backing store a video memory node was allocated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum MemoryPool {
    /// Pool not specified; kind-level queries use this
    #[default]
    Unknown,
    /// Driver default pool
    Default,
    /// Local memory
    Local,
    /// Internal local memory
    LocalInternal,
    /// External local memory
    LocalExternal,
    /// Unified memory
    Unified,
    /// System memory
    System,
    /// Virtual (MMU-mapped) memory
    Virtual,
    /// User-supplied memory
    User,
    /// Contiguous system memory
    Contiguous,
}

impl MemoryPool {
    /// Number of pools
    pub const COUNT: usize = 10;

    /// All pools in index order
    pub const ALL: [MemoryPool; MemoryPool::COUNT] = [
        MemoryPool::Unknown,
        MemoryPool::Default,
        MemoryPool::Local,
        MemoryPool::LocalInternal,
        MemoryPool::LocalExternal,
        MemoryPool::Unified,
        MemoryPool::System,
        MemoryPool::Virtual,
        MemoryPool::User,
        MemoryPool::Contiguous,
    ];

    /// Counter slot of this pool
    pub fn index(self) -> usize {
        self as usize
    }

    /// Look up a pool by raw index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MemoryPool::Unknown => "UNKNOWN",
            MemoryPool::Default => "DEFAULT",
            MemoryPool::Local => "LOCAL",
            MemoryPool::LocalInternal => "LOCAL_INTERNAL",
            MemoryPool::LocalExternal => "LOCAL_EXTERNAL",
            MemoryPool::Unified => "UNIFIED",
            MemoryPool::System => "SYSTEM",
            MemoryPool::Virtual => "VIRTUAL",
            MemoryPool::User => "USER",
            MemoryPool::Contiguous => "CONTIGUOUS",
        };
        f.write_str(name)
    }
}

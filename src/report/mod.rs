//! Read-only usage reports
//!
//! Reports work on plain data gathered from the registry ([`ProcessUsage`])
//! so they never hold a lock while formatting. [`text`] renders the
//! fixed-layout tables; [`UsageSnapshot`] is the machine-readable form.

pub mod text;

pub use text::{
    format_size, render_counter_dump, render_process_list, render_process_usage,
    render_usage_by_pid, render_usage_by_type,
};

use crate::database::{CounterSet, ResourceRecord};
use crate::error::TrackerResult;
use crate::kinds::{ResourceKind, SurfaceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// Everything one database holds at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessUsage {
    /// Process the database accounts for
    pub process_id: u32,
    /// Counter snapshot
    pub counters: CounterSet,
    /// Live records
    pub records: Vec<ResourceRecord>,
}

impl ProcessUsage {
    /// Video memory bytes held in live records, per surface type
    pub fn video_memory_by_surface(&self) -> [u64; SurfaceType::COUNT] {
        let mut sizes = [0u64; SurfaceType::COUNT];
        for record in self.records.iter().filter(|r| r.kind == ResourceKind::VideoMemory) {
            let surface = record.class.unwrap_or_default().surface;
            sizes[surface.index()] += record.bytes;
        }
        sizes
    }

    /// Current bytes across the kinds that make up a process' footprint
    pub fn footprint_bytes(&self) -> u64 {
        [
            ResourceKind::VideoMemory,
            ResourceKind::Contiguous,
            ResourceKind::NonPaged,
            ResourceKind::CommandBuffer,
            ResourceKind::Context,
        ]
        .iter()
        .filter_map(|&kind| self.counters.kind(kind))
        .map(|c| c.current_bytes)
        .sum()
    }
}

/// Which surface types a by-type report covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceSelector {
    /// One surface type, broken down per process
    Type(SurfaceType),
    /// All types summed over every process
    Sum,
    /// Every type in turn, each broken down per process
    All,
}

impl SurfaceSelector {
    /// Map a raw selector value: a type index, `COUNT` for the sum, anything
    /// else for all types
    pub fn from_raw(value: i64) -> Self {
        match usize::try_from(value) {
            Ok(index) if index == SurfaceType::COUNT => SurfaceSelector::Sum,
            Ok(index) => SurfaceType::from_index(index)
                .map(SurfaceSelector::Type)
                .unwrap_or(SurfaceSelector::All),
            Err(_) => SurfaceSelector::All,
        }
    }
}

/// Serializable snapshot of every live database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// One entry per live database
    pub processes: Vec<ProcessUsage>,
}

impl UsageSnapshot {
    /// Stamp `processes` with the current time
    pub fn new(processes: Vec<ProcessUsage>) -> Self {
        Self {
            taken_at: Utc::now(),
            processes,
        }
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> TrackerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the snapshot to `path` as JSON
    pub fn export_json(&self, path: impl AsRef<Path>) -> TrackerResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Current bytes across all processes
    pub fn total_current_bytes(&self) -> u64 {
        self.processes
            .iter()
            .map(|p| p.counters.total_current_bytes())
            .sum()
    }
}

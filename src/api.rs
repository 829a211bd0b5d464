//! High-level tracker API
//!
//! [`ProcessTracker`] is what the surrounding driver talks to. It wires the
//! [`Registry`], the per-database counters and the [`IdleProfiler`]
//! together and exposes process lifecycle hooks, per-allocation hooks,
//! counter queries, idle profiling and the usage reports.

use crate::config::TrackerConfig;
use crate::database::{Counter, DatabaseRef, Registry, ResourceRecord};
use crate::error::{TrackerError, TrackerResult};
use crate::kinds::{MemoryPool, ResourceKind, SurfaceType};
use crate::platform::{MonotonicClock, NoopFinalizer, ResourceFinalizer, TickSource};
use crate::profiler::{Core, IdleMarker, IdleProfiler, IdleWindow, PowerDecision};
use crate::report::{self, ProcessUsage, SurfaceSelector, UsageSnapshot};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(feature = "calibration")]
use crate::profiler::CalibrationSink;

/// Which database a counter query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryTarget {
    /// The live database of this process
    Process(u32),
    /// The database last looked up or destroyed
    MostRecent,
}

/// What tearing down one database reclaimed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownSummary {
    /// Process whose database was destroyed
    pub process_id: u32,
    /// Records handed to the finalizer, per kind
    pub reclaimed: Vec<(ResourceKind, usize)>,
    /// Records whose finalizer reported an error
    pub finalizer_failures: usize,
    /// Handles still open at teardown
    pub handles_released: usize,
}

impl TeardownSummary {
    /// Total records reclaimed
    pub fn total_records(&self) -> usize {
        self.reclaimed.iter().map(|(_, n)| n).sum()
    }

    /// Records reclaimed of one kind
    pub fn reclaimed_of(&self, kind: ResourceKind) -> usize {
        self.reclaimed
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, n)| *n)
    }

    fn count(&mut self, kind: ResourceKind) {
        match self.reclaimed.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, n)) => *n += 1,
            None => self.reclaimed.push((kind, 1)),
        }
    }
}

/// Per-process resource tracker
pub struct ProcessTracker {
    config: TrackerConfig,
    registry: Registry,
    profiler: IdleProfiler,
    clock: Arc<dyn TickSource>,
    finalizer: Arc<dyn ResourceFinalizer>,
    core: Core,
}

impl std::fmt::Debug for ProcessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTracker")
            .field("config", &self.config)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl ProcessTracker {
    /// Create a tracker on the monotonic clock with a logging-only finalizer
    pub fn new(config: TrackerConfig) -> TrackerResult<Self> {
        config.validate()?;
        Ok(Self {
            registry: Registry::new(config.registry.clone())?,
            profiler: IdleProfiler::new(config.profiler.clone())?,
            config,
            clock: Arc::new(MonotonicClock::new()),
            finalizer: Arc::new(NoopFinalizer),
            core: Core::Major,
        })
    }

    /// Read timestamps from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn TickSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Release leftover records through `finalizer` at teardown
    pub fn with_finalizer(mut self, finalizer: Arc<dyn ResourceFinalizer>) -> Self {
        self.finalizer = finalizer;
        self
    }

    /// Core that idle records registered through
    /// [`register_resource`](Self::register_resource) are routed to
    pub fn with_core(mut self, core: Core) -> Self {
        self.core = core;
        self
    }

    /// Route speed calibration samples to `sink`
    #[cfg(feature = "calibration")]
    pub fn with_calibration_sink(mut self, sink: Arc<dyn CalibrationSink>) -> Self {
        self.profiler = self.profiler.with_calibration_sink(sink);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Underlying registry, for diagnostics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Underlying profiler, for diagnostics
    pub fn profiler(&self) -> &IdleProfiler {
        &self.profiler
    }

    /// Current tick of the tracker's clock
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    // ---- process lifecycle ------------------------------------------------

    /// Register a database for `process_id`
    pub fn create_database(&self, process_id: u32) -> TrackerResult<DatabaseRef> {
        let db = self.registry.create(process_id)?;
        info!("DB({}): created", process_id);
        Ok(db)
    }

    /// Tear down the database of `process_id`.
    ///
    /// Every record still present goes to the finalizer; a finalizer error is
    /// logged and teardown carries on with the next record.
    pub fn destroy_database(&self, process_id: u32) -> TrackerResult<TeardownSummary> {
        let db = self.registry.find(process_id, false)?;
        let counters = db.counters()?;

        for kind in [
            ResourceKind::VideoMemory,
            ResourceKind::NonPaged,
            ResourceKind::Contiguous,
            ResourceKind::MapMemory,
            ResourceKind::MapUserMemory,
        ] {
            if let Some(counter) = counters.kind(kind) {
                info!(
                    "DB({}): {}: total={} max={}",
                    process_id, kind, counter.lifetime_bytes, counter.peak_bytes
                );
            }
        }
        info!(
            "DB({}): Idle time={}",
            process_id,
            self.profiler.idle_time(self.core)?
        );

        let records = self.registry.drain_records(&db)?;
        if !records.is_empty() {
            warn!(
                "Process {} has {} entries in its database",
                process_id,
                records.len()
            );
        }

        let mut summary = TeardownSummary {
            process_id,
            ..TeardownSummary::default()
        };
        self.reclaim(&db, records, &mut summary);

        summary.handles_released = db.clear_handles()?;
        let late = self.registry.destroy(&db)?;
        if !late.is_empty() {
            warn!(
                "DB({}): {} records registered during teardown",
                process_id,
                late.len()
            );
            self.reclaim(&db, late, &mut summary);
        }

        info!(
            "DB({}): destroyed, {} records reclaimed",
            process_id,
            summary.total_records()
        );
        Ok(summary)
    }

    /// Finalize and unaccount records already unlinked from `db`
    fn reclaim(&self, db: &DatabaseRef, records: Vec<ResourceRecord>, summary: &mut TeardownSummary) {
        let process_id = db.process_id();
        for record in records {
            if let Err(e) = self.finalizer.release(process_id, &record) {
                warn!(
                    "DB({}): {} 0x{:x} release failed: {}",
                    process_id, record.kind, record.owner_key, e
                );
                summary.finalizer_failures += 1;
            }

            if let Err(e) = db.unaccount(record.kind, record.class, record.bytes) {
                warn!("DB({}): {} counters out of step: {}", process_id, record.kind, e);
            }
            summary.count(record.kind);
        }
    }

    // ---- per-allocation hooks ---------------------------------------------

    /// Record an allocation made on behalf of `process_id`.
    ///
    /// The process database is created on first use. An `Idle` record is
    /// not stored: `process_id` is read as an idle marker (0 idle, 1 awake)
    /// for the tracker's core, stamped with the current tick.
    pub fn register_resource(&self, process_id: u32, record: ResourceRecord) -> TrackerResult<()> {
        if record.kind.is_idle() {
            let marker = IdleMarker::try_from(process_id)?;
            self.profiler.notify(self.core, marker, self.clock.now())?;
            return Ok(());
        }

        if record.owner_key == 0 {
            return Err(TrackerError::InvalidArgument(format!(
                "{} record without owner key",
                record.kind
            )));
        }

        let mut record = record;
        record.class = match record.kind {
            ResourceKind::VideoMemory => Some(record.class.unwrap_or_default()),
            _ => None,
        };

        let (db, created) = self.registry.find_or_create(process_id)?;
        if created {
            info!("DB({}): created on first registration", process_id);
        }

        self.registry.insert_record(&db, record)?;
        if let Err(e) = db.account(record.kind, record.class, record.bytes) {
            let _ = self.registry.delete_record(&db, record.kind, record.owner_key);
            return Err(e);
        }
        Ok(())
    }

    /// Forget an allocation and return what it accounted
    pub fn release_resource(
        &self,
        process_id: u32,
        kind: ResourceKind,
        owner_key: u64,
    ) -> TrackerResult<ResourceRecord> {
        let db = self.registry.find(process_id, false)?;
        let record = self.registry.delete_record(&db, kind, owner_key)?;
        db.unaccount(record.kind, record.class, record.bytes)?;
        Ok(record)
    }

    /// Copy of a live record
    pub fn lookup_resource(
        &self,
        process_id: u32,
        kind: ResourceKind,
        owner_key: u64,
    ) -> TrackerResult<ResourceRecord> {
        let db = self.registry.find(process_id, false)?;
        self.registry.find_record(&db, kind, owner_key)
    }

    // ---- counter queries --------------------------------------------------

    /// Counter of `kind` for `target`.
    ///
    /// Video memory with a pool other than `Unknown` reads that pool's
    /// counter.
    pub fn query_counters(
        &self,
        target: QueryTarget,
        kind: ResourceKind,
        pool: MemoryPool,
    ) -> TrackerResult<Counter> {
        if kind.is_idle() {
            return Err(TrackerError::InvalidArgument(
                "idle time is read through take_idle_time".to_string(),
            ));
        }

        let db = match target {
            QueryTarget::Process(pid) => self.registry.find(pid, false)?,
            QueryTarget::MostRecent => self.registry.find(0, true)?,
        };
        let counters = db.counters()?;

        if kind == ResourceKind::VideoMemory && pool != MemoryPool::Unknown {
            return Ok(counters.pool(pool));
        }
        counters
            .kind(kind)
            .ok_or_else(|| TrackerError::InvalidArgument(format!("{} has no byte counter", kind)))
    }

    /// Video memory counter of one surface type
    pub fn query_surface_counters(&self, process_id: u32, surface: SurfaceType) -> TrackerResult<Counter> {
        let db = self.registry.find(process_id, false)?;
        Ok(db.counters()?.surface(surface))
    }

    // ---- idle profiling ---------------------------------------------------

    /// Feed an idle notification for `core`
    pub fn notify_idle_transition(&self, core: Core, marker: IdleMarker, timestamp: u64) -> TrackerResult<bool> {
        self.profiler.notify(core, marker, timestamp)
    }

    /// Idle ticks in the `window` ticks ending at `now`
    pub fn query_idle_window(&self, core: Core, now: u64, window: u64) -> TrackerResult<IdleWindow> {
        self.profiler.query_idle_window(core, now, window)
    }

    /// Open or close a duty-cycle measurement; see
    /// [`IdleProfiler::query_duty_cycle`]
    pub fn query_duty_cycle(&self, core: Core, starting: bool, now: u64) -> TrackerResult<Option<u32>> {
        self.profiler.query_duty_cycle(core, starting, now)
    }

    /// Return and reset the accumulated idle time of `core`
    pub fn take_idle_time(&self, core: Core) -> TrackerResult<u64> {
        self.profiler.take_idle_time(core)
    }

    /// Power-off decision for `core`
    pub fn idle_power_policy(
        &self,
        core: Core,
        now: u64,
        slice: u64,
        tail_slice: u64,
    ) -> TrackerResult<PowerDecision> {
        self.profiler.idle_power_policy(core, now, slice, tail_slice)
    }

    // ---- handle table -----------------------------------------------------

    /// File `value` in the handle table of `process_id`
    pub fn allocate_handle(&self, process_id: u32, value: u64) -> TrackerResult<u32> {
        self.registry.find(process_id, false)?.allocate_handle(value)
    }

    /// Value behind `handle`
    pub fn query_handle(&self, process_id: u32, handle: u32) -> TrackerResult<u64> {
        self.registry.find(process_id, false)?.query_handle(handle)
    }

    /// Release `handle`
    pub fn free_handle(&self, process_id: u32, handle: u32) -> TrackerResult<u64> {
        self.registry.find(process_id, false)?.free_handle(handle)
    }

    /// Live handles of `process_id`
    pub fn handle_count(&self, process_id: u32) -> TrackerResult<usize> {
        self.registry.find(process_id, false)?.handle_count()
    }

    // ---- reports ----------------------------------------------------------

    fn usage_of(&self, db: &DatabaseRef) -> TrackerResult<ProcessUsage> {
        Ok(ProcessUsage {
            process_id: db.process_id(),
            counters: db.counters()?,
            records: self.registry.records(db)?,
        })
    }

    /// Usage of every live database
    pub fn usages(&self) -> TrackerResult<Vec<ProcessUsage>> {
        self.registry
            .live_databases()?
            .iter()
            .map(|db| self.usage_of(db))
            .collect()
    }

    /// Per-surface usage of one process
    pub fn render_process_usage(&self, process_id: u32) -> TrackerResult<String> {
        let counters = match self.registry.peek(process_id) {
            Ok(db) => Some(db.counters()?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        Ok(report::render_process_usage(process_id, counters.as_ref()))
    }

    /// Video memory detail per process, or for one process
    pub fn render_usage_by_pid(&self, process_id: Option<u32>) -> TrackerResult<String> {
        Ok(report::render_usage_by_pid(&self.usages()?, process_id))
    }

    /// Video memory usage by surface type
    pub fn render_usage_by_type(&self, selector: SurfaceSelector) -> TrackerResult<String> {
        Ok(report::render_usage_by_type(&self.usages()?, selector))
    }

    /// Table of live processes
    pub fn render_process_list(&self) -> TrackerResult<String> {
        Ok(report::render_process_list(&self.usages()?))
    }

    /// Counter dump of one process
    pub fn render_counter_dump(&self, process_id: u32) -> TrackerResult<String> {
        let db = self.registry.peek(process_id)?;
        Ok(report::render_counter_dump(process_id, &db.counters()?))
    }

    /// Timestamped snapshot of every live database
    pub fn usage_snapshot(&self) -> TrackerResult<UsageSnapshot> {
        Ok(UsageSnapshot::new(self.usages()?))
    }
}

//! Workload traces
//!
//! A [`Trace`] is a JSON list of driver events. [`replay`] feeds them to a
//! fresh [`ProcessTracker`] running on a [`ManualClock`] and records what
//! each event returned, so a captured workload can be re-examined offline.

use crate::api::{ProcessTracker, TeardownSummary};
use crate::config::TrackerConfig;
use crate::database::ResourceRecord;
use crate::error::TrackerResult;
use crate::kinds::{MemoryPool, ResourceKind, SurfaceType, VidMemClass};
use crate::platform::{ManualClock, TickSource};
use crate::profiler::{Core, IdleMarker, IdleWindow};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One recorded driver event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Move the clock to `at`
    Tick {
        /// New tick
        at: u64,
    },
    /// Process attached
    Create {
        /// Process id
        pid: u32,
    },
    /// Process exited
    Destroy {
        /// Process id
        pid: u32,
    },
    /// Allocation
    Register {
        /// Process id
        pid: u32,
        /// Resource kind
        kind: ResourceKind,
        /// Owner key
        key: u64,
        /// Size in bytes
        bytes: u64,
        /// Physical address token
        #[serde(default)]
        physical: u64,
        /// Surface type (video memory only)
        #[serde(default)]
        surface: Option<SurfaceType>,
        /// Backing pool (video memory only)
        #[serde(default)]
        pool: Option<MemoryPool>,
    },
    /// Deallocation
    Release {
        /// Process id
        pid: u32,
        /// Resource kind
        kind: ResourceKind,
        /// Owner key
        key: u64,
    },
    /// Idle notification at the current tick
    Idle {
        /// Core notified
        core: Core,
        /// Transition marker
        marker: IdleMarker,
    },
    /// Open or close a duty-cycle window at the current tick
    DutyCycle {
        /// Core measured
        core: Core,
        /// `true` to open the window
        starting: bool,
    },
    /// Idle share of the window ending at the current tick
    IdleWindow {
        /// Core measured
        core: Core,
        /// Window length
        window: u64,
    },
}

/// A recorded workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Tracker configuration; defaults when absent
    #[serde(default)]
    pub config: Option<TrackerConfig>,
    /// Events in order
    pub events: Vec<TraceEvent>,
}

impl Trace {
    /// Parse a trace from JSON text
    pub fn from_json(text: &str) -> TrackerResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a trace from a JSON file
    pub fn load(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// What one event produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Completed with nothing to report
    Done,
    /// A database was torn down
    Teardown(TeardownSummary),
    /// A record was released
    Released(ResourceRecord),
    /// Whether an idle notification changed the core state
    Transition(bool),
    /// Duty cycle percentage, `None` when unavailable
    DutyCycle(Option<u32>),
    /// Window query result
    Window(IdleWindow),
    /// The event failed
    Failed(String),
}

/// Event paired with its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    /// Position in the trace
    pub index: usize,
    /// Clock tick when the event ran
    pub tick: u64,
    /// The event
    pub event: TraceEvent,
    /// What it produced
    pub outcome: Outcome,
}

/// Tracker state after a replay
#[derive(Debug)]
pub struct Replay {
    /// Tracker the events were applied to
    pub tracker: ProcessTracker,
    /// Clock driving the tracker
    pub clock: Arc<ManualClock>,
    /// One entry per event
    pub outcomes: Vec<EventOutcome>,
}

impl Replay {
    /// Events that failed
    pub fn failures(&self) -> impl Iterator<Item = &EventOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed(_)))
    }
}

/// Apply every event of `trace` to a new tracker.
///
/// Event failures are recorded, not propagated; only an invalid
/// configuration aborts the replay.
pub fn replay(trace: &Trace) -> TrackerResult<Replay> {
    let config = trace.config.clone().unwrap_or_default();
    let clock = Arc::new(ManualClock::new(1));
    let tracker = ProcessTracker::new(config)?.with_clock(clock.clone());

    let mut outcomes = Vec::with_capacity(trace.events.len());
    for (index, event) in trace.events.iter().enumerate() {
        let outcome = match apply(&tracker, &clock, event) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e.to_string()),
        };
        debug!("replay[{}] {:?} -> {:?}", index, event, outcome);
        outcomes.push(EventOutcome {
            index,
            tick: clock.now(),
            event: event.clone(),
            outcome,
        });
    }

    Ok(Replay {
        tracker,
        clock,
        outcomes,
    })
}

fn apply(tracker: &ProcessTracker, clock: &ManualClock, event: &TraceEvent) -> TrackerResult<Outcome> {
    let now = clock.now();
    let outcome = match *event {
        TraceEvent::Tick { at } => {
            clock.set(at);
            Outcome::Done
        }
        TraceEvent::Create { pid } => {
            tracker.create_database(pid)?;
            Outcome::Done
        }
        TraceEvent::Destroy { pid } => Outcome::Teardown(tracker.destroy_database(pid)?),
        TraceEvent::Register {
            pid,
            kind,
            key,
            bytes,
            physical,
            surface,
            pool,
        } => {
            let mut record = ResourceRecord::new(kind, key, bytes).with_physical(physical);
            if surface.is_some() || pool.is_some() {
                record = record.with_class(VidMemClass::new(
                    surface.unwrap_or_default(),
                    pool.unwrap_or_default(),
                ));
            }
            tracker.register_resource(pid, record)?;
            Outcome::Done
        }
        TraceEvent::Release { pid, kind, key } => {
            Outcome::Released(tracker.release_resource(pid, kind, key)?)
        }
        TraceEvent::Idle { core, marker } => {
            Outcome::Transition(tracker.notify_idle_transition(core, marker, now)?)
        }
        TraceEvent::DutyCycle { core, starting } => {
            Outcome::DutyCycle(tracker.query_duty_cycle(core, starting, now)?)
        }
        TraceEvent::IdleWindow { core, window } => {
            Outcome::Window(tracker.query_idle_window(core, now, window)?)
        }
    };
    Ok(outcome)
}

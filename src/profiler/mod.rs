//! Idle and duty-cycle profiling
//!
//! Every hardware core runs a two-state machine (busy, idle) driven by
//! [`IdleProfiler::notify`]. Transitions are recorded in a per-core
//! [`SampleRing`] from which the idle share of any recent window can be
//! rebuilt, and they feed a running idle accumulator used for duty-cycle
//! measurements.
//!
//! All cores share one lock. Calls are short and never block on anything
//! else.

pub mod window;

pub use window::{IdleWindow, ProfileSample, SampleRing, WindowCase};

use crate::config::ProfilerConfig;
use crate::error::{poisoned, TrackerError, TrackerResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

#[cfg(feature = "calibration")]
use std::sync::Arc;

/// Hardware engine core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Core {
    /// 3D core
    Major,
    /// 2D core
    TwoD,
    /// Vector graphics core
    Vg,
}

impl Core {
    /// Number of cores
    pub const COUNT: usize = 3;

    /// All cores in index order
    pub const ALL: [Core; Core::COUNT] = [Core::Major, Core::TwoD, Core::Vg];

    /// State slot of this core
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Core::Major => write!(f, "3D"),
            Core::TwoD => write!(f, "2D"),
            Core::Vg => write!(f, "VG"),
        }
    }
}

/// Idle notification marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdleMarker {
    /// Pending work drained; the core may go idle
    Idle,
    /// The core was woken up
    Awake,
}

impl TryFrom<u32> for IdleMarker {
    type Error = TrackerError;

    fn try_from(value: u32) -> TrackerResult<Self> {
        match value {
            0 => Ok(IdleMarker::Idle),
            1 => Ok(IdleMarker::Awake),
            other => Err(TrackerError::InvalidArgument(format!(
                "idle marker must be 0 or 1, got {}",
                other
            ))),
        }
    }
}

impl From<IdleMarker> for u32 {
    fn from(marker: IdleMarker) -> u32 {
        match marker {
            IdleMarker::Idle => 0,
            IdleMarker::Awake => 1,
        }
    }
}

/// Outcome of the idle power policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerDecision {
    /// Idle ticks in the long window
    pub idle_time: u64,
    /// Long window actually covered
    pub window: u64,
    /// Idle ticks in the tail window
    pub tail_idle_time: u64,
    /// Tail window actually covered
    pub tail_window: u64,
    /// Whether the core may be powered off
    pub power_off: bool,
}

/// Idle/elapsed pair for one calibration period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Core measured
    pub core: Core,
    /// Idle ticks accumulated during the period
    pub idle_ticks: u64,
    /// Length of the period
    pub elapsed_ticks: u64,
}

/// Receiver for speed calibration samples
#[cfg(feature = "calibration")]
#[cfg_attr(test, mockall::automock)]
pub trait CalibrationSink: Send + Sync {
    /// Adjust clocks according to `sample`
    fn calibrate(&self, sample: CalibrationSample);
}

#[derive(Debug, Clone, Copy)]
struct CalibrationPoint {
    tick: u64,
    idle_time: u64,
}

#[derive(Debug, Clone)]
struct CoreState {
    idle: bool,
    idle_since: Option<u64>,
    idle_time: u64,
    switch_count: u64,
    ring: SampleRing,
    window_begin: Option<u64>,
    window_end: Option<u64>,
    calibration: Option<CalibrationPoint>,
}

impl CoreState {
    fn new(idle: bool, ring_capacity: usize) -> Self {
        Self {
            idle,
            idle_since: None,
            idle_time: 0,
            switch_count: 0,
            ring: SampleRing::new(ring_capacity),
            window_begin: None,
            window_end: None,
            calibration: None,
        }
    }

    fn calibrate(&mut self, core: Core, now: u64, period: u64) -> Option<CalibrationSample> {
        let point = match self.calibration {
            Some(point) => point,
            None => {
                self.calibration = Some(CalibrationPoint {
                    tick: now,
                    idle_time: self.idle_time,
                });
                return None;
            }
        };

        let elapsed = now.saturating_sub(point.tick);
        if elapsed < period {
            return None;
        }

        self.calibration = Some(CalibrationPoint {
            tick: now,
            idle_time: self.idle_time,
        });
        Some(CalibrationSample {
            core,
            idle_ticks: self.idle_time.saturating_sub(point.idle_time),
            elapsed_ticks: elapsed,
        })
    }
}

/// Per-core idle tracking
pub struct IdleProfiler {
    config: ProfilerConfig,
    cores: Mutex<Vec<CoreState>>,
    #[cfg(feature = "calibration")]
    sink: Option<Arc<dyn CalibrationSink>>,
}

impl std::fmt::Debug for IdleProfiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleProfiler")
            .field("config", &self.config)
            .field("cores", &self.cores)
            .finish()
    }
}

impl IdleProfiler {
    /// Create a profiler with every core in its configured start state
    pub fn new(config: ProfilerConfig) -> TrackerResult<Self> {
        config.validate()?;
        let cores = Core::ALL
            .iter()
            .map(|&core| CoreState::new(config.starts_idle(core), config.ring_capacity))
            .collect();
        Ok(Self {
            config,
            cores: Mutex::new(cores),
            #[cfg(feature = "calibration")]
            sink: None,
        })
    }

    /// Route calibration samples to `sink`
    #[cfg(feature = "calibration")]
    pub fn with_calibration_sink(mut self, sink: Arc<dyn CalibrationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Settings this profiler was built with
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    fn lock(&self) -> TrackerResult<MutexGuard<'_, Vec<CoreState>>> {
        self.cores.lock().map_err(poisoned("profiler"))
    }

    /// Feed an idle notification for `core` observed at `now`.
    ///
    /// Returns whether the core changed state. Notifications that match the
    /// current state are ignored.
    pub fn notify(&self, core: Core, marker: IdleMarker, now: u64) -> TrackerResult<bool> {
        let (changed, calibration) = {
            let mut cores = self.lock()?;
            let state = &mut cores[core.index()];

            if let Some(last) = state.ring.last() {
                if now < last.tick {
                    return Err(TrackerError::InvalidArgument(format!(
                        "[{}] timestamp {} precedes last transition at {}",
                        core, now, last.tick
                    )));
                }
            }

            let changed = match (marker, state.idle) {
                (IdleMarker::Idle, false) => {
                    state.idle = true;
                    state.idle_since = Some(now);
                    true
                }
                (IdleMarker::Awake, true) => {
                    if let Some(since) = state.idle_since.take() {
                        state.idle_time += now.saturating_sub(since);
                    }
                    state.idle = false;
                    true
                }
                _ => false,
            };

            if changed {
                state.switch_count += 1;
                state.ring.push(ProfileSample {
                    idle: state.idle,
                    tick: now,
                    core,
                });
                debug!(
                    "[{}][{}] {} at {}",
                    core,
                    state.switch_count,
                    if state.idle { "idle" } else { "busy" },
                    now
                );
            }

            let calibration = match self.config.calibration_period {
                Some(period) => state.calibrate(core, now, period),
                None => None,
            };

            (changed, calibration)
        };

        if let Some(sample) = calibration {
            self.emit(sample);
        }

        Ok(changed)
    }

    #[cfg(feature = "calibration")]
    fn emit(&self, sample: CalibrationSample) {
        if let Some(sink) = &self.sink {
            sink.calibrate(sample);
        }
    }

    #[cfg(not(feature = "calibration"))]
    fn emit(&self, _sample: CalibrationSample) {}

    /// Idle ticks in the `window` ticks ending at `now`, rebuilt from the
    /// sample ring alone
    pub fn query_idle_window(&self, core: Core, now: u64, window: u64) -> TrackerResult<IdleWindow> {
        let cores = self.lock()?;
        let state = &cores[core.index()];
        Ok(state.ring.idle_in_window(state.idle, now, window))
    }

    /// Open (`starting`) or close a duty-cycle measurement.
    ///
    /// Closing returns the busy percentage of the measured window, or `None`
    /// when no complete window exists or the idle bookkeeping exceeds the
    /// elapsed time.
    pub fn query_duty_cycle(&self, core: Core, starting: bool, now: u64) -> TrackerResult<Option<u32>> {
        let mut cores = self.lock()?;
        let state = &mut cores[core.index()];
        let mut idle = state.idle_time;

        if starting {
            state.idle_time = 0;
            // An idle span already in progress only counts from here on.
            if state.idle {
                state.idle_since = Some(now);
            }
            state.window_begin = Some(now);
            state.window_end = None;
        } else {
            if state.idle {
                idle += state.idle_since.map_or(0, |since| now.saturating_sub(since));
            }
            state.window_end = Some(now);
        }

        let (begin, end) = match (state.window_begin, state.window_end) {
            (Some(begin), Some(end)) => (begin, end),
            _ => return Ok(None),
        };

        if begin > end {
            warn!("[{}] duty cycle window closed at {} before it opened at {}", core, end, begin);
            return Ok(None);
        }

        let elapsed = end - begin;
        if idle > elapsed || elapsed == 0 {
            warn!("[{}] idle {} exceeds window {}", core, idle, elapsed);
            return Ok(None);
        }

        Ok(Some((100 - idle * 100 / elapsed) as u32))
    }

    /// Return the accumulated idle time and reset it to zero
    pub fn take_idle_time(&self, core: Core) -> TrackerResult<u64> {
        let mut cores = self.lock()?;
        Ok(std::mem::take(&mut cores[core.index()].idle_time))
    }

    /// Accumulated idle time without resetting it
    pub fn idle_time(&self, core: Core) -> TrackerResult<u64> {
        Ok(self.lock()?[core.index()].idle_time)
    }

    /// Decide whether `core` has idled long enough to be switched off.
    ///
    /// The long window must be idle for more than the configured threshold
    /// and the tail window must be idle throughout.
    pub fn idle_power_policy(
        &self,
        core: Core,
        now: u64,
        slice: u64,
        tail_slice: u64,
    ) -> TrackerResult<PowerDecision> {
        let cores = self.lock()?;
        let state = &cores[core.index()];
        let long = state.ring.idle_in_window(state.idle, now, slice);
        let tail = state.ring.idle_in_window(state.idle, now, tail_slice);

        let threshold = u64::from(self.config.idle_threshold_percent);
        let power_off = long.idle_time.saturating_mul(100) > long.window.saturating_mul(threshold)
            && tail.idle_time == tail.window;

        Ok(PowerDecision {
            idle_time: long.idle_time,
            window: long.window,
            tail_idle_time: tail.idle_time,
            tail_window: tail.window,
            power_off,
        })
    }

    /// Transitions recorded since start
    pub fn switch_count(&self, core: Core) -> TrackerResult<u64> {
        Ok(self.lock()?[core.index()].switch_count)
    }

    /// Whether `core` is currently idle
    pub fn is_idle(&self, core: Core) -> TrackerResult<bool> {
        Ok(self.lock()?[core.index()].idle)
    }

    /// Retained samples of `core`, oldest first
    pub fn samples(&self, core: Core) -> TrackerResult<Vec<ProfileSample>> {
        Ok(self.lock()?[core.index()].ring.iter().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiler() -> IdleProfiler {
        IdleProfiler::new(ProfilerConfig::default()).unwrap()
    }

    #[test]
    fn test_idle_accumulation() {
        let profiler = profiler();
        profiler.notify(Core::Major, IdleMarker::Awake, 0).unwrap();
        profiler.notify(Core::Major, IdleMarker::Idle, 100).unwrap();
        profiler.notify(Core::Major, IdleMarker::Awake, 150).unwrap();

        assert_eq!(profiler.idle_time(Core::Major).unwrap(), 50);
        assert_eq!(profiler.switch_count(Core::Major).unwrap(), 2);
        assert!(!profiler.is_idle(Core::Major).unwrap());
    }

    #[test]
    fn test_duty_cycle() {
        let profiler = profiler();
        assert_eq!(profiler.query_duty_cycle(Core::Major, true, 0).unwrap(), None);
        profiler.notify(Core::Major, IdleMarker::Awake, 0).unwrap();
        profiler.notify(Core::Major, IdleMarker::Idle, 100).unwrap();
        profiler.notify(Core::Major, IdleMarker::Awake, 150).unwrap();
        assert_eq!(profiler.query_duty_cycle(Core::Major, false, 150).unwrap(), Some(67));
    }

    #[test]
    fn test_duty_cycle_counts_open_idle_span() {
        let profiler = profiler();
        profiler.query_duty_cycle(Core::Major, true, 0).unwrap();
        profiler.notify(Core::Major, IdleMarker::Idle, 50).unwrap();
        // Still idle when the window closes: 50 of 100 ticks idle.
        assert_eq!(profiler.query_duty_cycle(Core::Major, false, 100).unwrap(), Some(50));
    }

    #[test]
    fn test_duty_cycle_excludes_idle_before_start() {
        let profiler = profiler();
        profiler.notify(Core::Major, IdleMarker::Idle, 10).unwrap();
        profiler.query_duty_cycle(Core::Major, true, 100).unwrap();
        profiler.notify(Core::Major, IdleMarker::Awake, 150).unwrap();
        assert_eq!(profiler.query_duty_cycle(Core::Major, false, 200).unwrap(), Some(50));
    }

    #[test]
    fn test_duty_cycle_unavailable_without_start() {
        let profiler = profiler();
        assert_eq!(profiler.query_duty_cycle(Core::TwoD, false, 100).unwrap(), None);
    }

    #[test]
    fn test_start_states() {
        let profiler = profiler();
        assert!(!profiler.is_idle(Core::Major).unwrap());
        assert!(profiler.is_idle(Core::TwoD).unwrap());
        assert!(profiler.is_idle(Core::Vg).unwrap());
    }

    #[test]
    fn test_no_history_window() {
        let profiler = profiler();
        let major = profiler.query_idle_window(Core::Major, 1000, 100).unwrap();
        assert_eq!(major, IdleWindow { idle_time: 0, window: 100 });
        let two_d = profiler.query_idle_window(Core::TwoD, 1000, 100).unwrap();
        assert_eq!(two_d.idle_time, 100);
    }

    #[test]
    fn test_out_of_range_window() {
        let profiler = profiler();
        profiler.notify(Core::Major, IdleMarker::Idle, 500).unwrap();
        profiler.notify(Core::Major, IdleMarker::Awake, 600).unwrap();
        assert_eq!(
            profiler.query_idle_window(Core::Major, 400, 50).unwrap(),
            IdleWindow { idle_time: 0, window: 0 }
        );
    }

    #[test]
    fn test_window_older_than_ring() {
        let config = ProfilerConfig {
            ring_capacity: 4,
            ..ProfilerConfig::default()
        };
        let profiler = IdleProfiler::new(config).unwrap();
        for i in 1..=6u64 {
            let marker = if i % 2 == 1 { IdleMarker::Idle } else { IdleMarker::Awake };
            assert!(profiler.notify(Core::Major, marker, i * 100).unwrap());
        }

        assert_eq!(profiler.samples(Core::Major).unwrap().len(), 4);
        assert_eq!(
            profiler.query_idle_window(Core::Major, 250, 50).unwrap(),
            IdleWindow { idle_time: 0, window: 0 }
        );
    }

    #[test]
    fn test_take_idle_time_resets() {
        let profiler = profiler();
        profiler.notify(Core::Major, IdleMarker::Idle, 10).unwrap();
        profiler.notify(Core::Major, IdleMarker::Awake, 40).unwrap();
        assert_eq!(profiler.take_idle_time(Core::Major).unwrap(), 30);
        assert_eq!(profiler.take_idle_time(Core::Major).unwrap(), 0);
    }

    #[test]
    fn test_backwards_timestamp_rejected() {
        let profiler = profiler();
        profiler.notify(Core::Major, IdleMarker::Idle, 100).unwrap();
        assert!(profiler.notify(Core::Major, IdleMarker::Awake, 50).is_err());
    }

    #[test]
    fn test_marker_conversion() {
        assert_eq!(IdleMarker::try_from(0).unwrap(), IdleMarker::Idle);
        assert_eq!(IdleMarker::try_from(1).unwrap(), IdleMarker::Awake);
        assert!(IdleMarker::try_from(2).is_err());
    }

    #[test]
    fn test_power_policy() {
        let profiler = profiler();
        profiler.notify(Core::Major, IdleMarker::Idle, 100).unwrap();

        let decision = profiler.idle_power_policy(Core::Major, 200, 200, 50).unwrap();
        assert_eq!(decision.idle_time, 100);
        assert_eq!(decision.tail_idle_time, 50);
        assert!(!decision.power_off);

        let decision = profiler.idle_power_policy(Core::Major, 250, 200, 50).unwrap();
        assert_eq!(decision.idle_time, 150);
        assert!(decision.power_off);
    }

    #[cfg(feature = "calibration")]
    #[test]
    fn test_calibration_samples() {
        let mut sink = MockCalibrationSink::new();
        sink.expect_calibrate()
            .withf(|s| s.core == Core::Major && s.idle_ticks == 40 && s.elapsed_ticks == 100)
            .times(1)
            .return_const(());

        let config = ProfilerConfig {
            calibration_period: Some(100),
            ..ProfilerConfig::default()
        };
        let profiler = IdleProfiler::new(config)
            .unwrap()
            .with_calibration_sink(Arc::new(sink));

        profiler.notify(Core::Major, IdleMarker::Awake, 10).unwrap();
        profiler.notify(Core::Major, IdleMarker::Idle, 50).unwrap();
        profiler.notify(Core::Major, IdleMarker::Awake, 90).unwrap();
        profiler.notify(Core::Major, IdleMarker::Idle, 110).unwrap();
    }
}

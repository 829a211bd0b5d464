//! Sample ring and sliding-window idle reconstruction
//!
//! Each sample marks a transition: `idle == true` means the core went idle
//! at `tick`, `idle == false` means it woke up. The span between an idle
//! sample and the sample after it was therefore spent idle.

use super::Core;
use serde::{Deserialize, Serialize};

/// One recorded idle/busy transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSample {
    /// State the core entered
    pub idle: bool,
    /// Tick of the transition
    pub tick: u64,
    /// Core the sample belongs to
    pub core: Core,
}

/// Fixed-capacity ring of samples; the oldest is overwritten once full
#[derive(Debug, Clone)]
pub struct SampleRing {
    slots: Vec<ProfileSample>,
    capacity: usize,
    next: usize,
}

impl SampleRing {
    /// Create an empty ring holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Append a sample, overwriting the oldest when full
    pub fn push(&mut self, sample: ProfileSample) {
        if self.slots.len() < self.capacity {
            self.slots.push(sample);
        } else {
            self.slots[self.next] = sample;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    /// Retained samples
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check whether nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sample at logical position `position`, 0 being the oldest
    pub fn get(&self, position: usize) -> Option<&ProfileSample> {
        if position >= self.slots.len() {
            return None;
        }
        let oldest = if self.slots.len() == self.capacity { self.next } else { 0 };
        self.slots.get((oldest + position) % self.slots.len())
    }

    /// Oldest retained sample
    pub fn first(&self) -> Option<&ProfileSample> {
        self.get(0)
    }

    /// Newest sample
    pub fn last(&self) -> Option<&ProfileSample> {
        self.len().checked_sub(1).and_then(|p| self.get(p))
    }

    /// Samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = &ProfileSample> + '_ {
        (0..self.len()).filter_map(move |p| self.get(p))
    }

    /// Decide how a window of `window` ticks ending at `now` intersects the
    /// retained history
    pub fn classify(&self, now: u64, window: u64) -> WindowCase {
        let (first, last) = match (self.first(), self.last()) {
            (Some(first), Some(last)) if last.tick != 0 => (first, last),
            _ => return WindowCase::NoHistory,
        };

        if now >= last.tick.saturating_add(window) {
            return WindowCase::WindowAfterLast;
        }
        if now < first.tick {
            return WindowCase::WindowBeforeFirst;
        }

        let newest = self.len() - 1;

        // First sample inside the window; clipped to the oldest one when the
        // window starts before retained history.
        let start = if now <= first.tick.saturating_add(window) {
            0
        } else {
            self.iter()
                .position(|s| now <= s.tick.saturating_add(window))
                .unwrap_or(newest)
        };

        // Last sample at or before `now`.
        let end = if now < last.tick {
            (0..=newest)
                .rev()
                .find(|&p| self.get(p).map_or(false, |s| s.tick <= now))
                .unwrap_or(0)
        } else {
            newest
        };

        WindowCase::General { start, end }
    }

    /// Idle ticks inside the window of `window` ticks ending at `now`.
    ///
    /// `currently_idle` answers the query when no history exists yet.
    pub fn idle_in_window(&self, currently_idle: bool, now: u64, window: u64) -> IdleWindow {
        let idle_time = match self.classify(now, window) {
            WindowCase::NoHistory => {
                if currently_idle {
                    window
                } else {
                    0
                }
            }
            WindowCase::WindowAfterLast => match self.last() {
                Some(last) if last.idle => window,
                _ => 0,
            },
            WindowCase::WindowBeforeFirst => {
                return IdleWindow {
                    idle_time: 0,
                    window: 0,
                }
            }
            WindowCase::General { start, end } => self.idle_between(start, end, now, window),
        };

        IdleWindow { idle_time, window }
    }

    fn idle_between(&self, start: usize, end: usize, now: u64, window: u64) -> u64 {
        let (first, last) = match (self.get(start), self.get(end)) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0,
        };

        // No transition inside the window: it sits between two adjacent
        // samples and takes the state of the earlier one.
        if start > end {
            return if last.idle { window } else { 0 };
        }

        let mut idle = 0;

        // Window start up to the first transition inside it.
        if !first.idle {
            idle += first.tick.saturating_add(window).saturating_sub(now);
        }

        // Last transition up to `now`.
        if last.idle {
            idle += now - last.tick;
        }

        for position in start..end {
            if let (Some(current), Some(next)) = (self.get(position), self.get(position + 1)) {
                if current.idle {
                    idle += next.tick - current.tick;
                }
            }
        }

        idle
    }
}

/// How a query window lines up with the retained samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCase {
    /// Nothing recorded yet
    NoHistory,
    /// No transition since before the window began
    WindowAfterLast,
    /// The window ended before the oldest retained sample
    WindowBeforeFirst,
    /// Samples `start..=end` bound the window
    General {
        /// Position of the first sample inside the window
        start: usize,
        /// Position of the last sample at or before the window end
        end: usize,
    },
}

/// Result of a window query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleWindow {
    /// Idle ticks inside the window
    pub idle_time: u64,
    /// Window length the result covers; 0 when history was unavailable
    pub window: u64,
}

//! Byte counters
//!
//! A [`Counter`] tracks how many bytes of one category a process holds right
//! now, the most it ever held at once, and the total it ever allocated. A
//! [`CounterSet`] holds one counter per accounted [`ResourceKind`], one per
//! video memory [`SurfaceType`] and one per [`MemoryPool`].

use crate::error::{corrupted, TrackerError, TrackerResult};
use crate::kinds::{MemoryPool, ResourceKind, SurfaceType, VidMemClass};
use serde::{Deserialize, Serialize};

/// Current/peak/lifetime byte accumulator
///
/// `current_bytes <= peak_bytes` always holds; `peak_bytes` and
/// `lifetime_bytes` never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Bytes currently allocated
    pub current_bytes: u64,
    /// Highest value `current_bytes` has reached
    pub peak_bytes: u64,
    /// Sum of every accounted allocation
    pub lifetime_bytes: u64,
}

impl Counter {
    fn add(&mut self, bytes: u64) {
        self.current_bytes = self.current_bytes.saturating_add(bytes);
        self.lifetime_bytes = self.lifetime_bytes.saturating_add(bytes);
        self.peak_bytes = self.peak_bytes.max(self.current_bytes);
    }

    fn can_sub(&self, bytes: u64) -> bool {
        self.current_bytes >= bytes
    }

    fn sub(&mut self, bytes: u64) {
        self.current_bytes -= bytes;
    }

    /// Zero all three fields
    pub fn reset(&mut self) {
        *self = Counter::default();
    }
}

/// Every counter owned by one process database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    kinds: [Counter; ResourceKind::COUNTED.len()],
    surfaces: [Counter; SurfaceType::COUNT],
    pools: [Counter; MemoryPool::COUNT],
}

impl CounterSet {
    /// Add `bytes` to the counter of `kind`; video memory also feeds the
    /// surface and pool counters named by `class`.
    ///
    /// Kinds without a counter are accepted and ignored.
    pub fn account(
        &mut self,
        kind: ResourceKind,
        class: Option<VidMemClass>,
        bytes: u64,
    ) -> TrackerResult<()> {
        if kind.is_idle() {
            return Err(TrackerError::InvalidArgument(
                "idle notifications carry no byte count".to_string(),
            ));
        }

        if let Some(index) = kind.counter_index() {
            self.kinds[index].add(bytes);
        }

        if kind == ResourceKind::VideoMemory {
            let class = class.unwrap_or_default();
            self.surfaces[class.surface.index()].add(bytes);
            self.pools[class.pool.index()].add(bytes);
        }

        Ok(())
    }

    /// Remove `bytes` from the counters `account` fed.
    ///
    /// Only `current_bytes` moves. Going below zero means an accounting
    /// event was lost or duplicated upstream; that is reported as
    /// corruption and no counter is touched.
    pub fn unaccount(
        &mut self,
        kind: ResourceKind,
        class: Option<VidMemClass>,
        bytes: u64,
    ) -> TrackerResult<()> {
        if kind.is_idle() {
            return Err(TrackerError::InvalidArgument(
                "idle notifications carry no byte count".to_string(),
            ));
        }

        let index = kind.counter_index();
        let class = class.unwrap_or_default();
        let video = kind == ResourceKind::VideoMemory;

        if let Some(index) = index {
            if !self.kinds[index].can_sub(bytes) {
                return Err(corrupted(format!(
                    "{} counter underflow: current={} release={}",
                    kind, self.kinds[index].current_bytes, bytes
                )));
            }
        }
        if video {
            let surface = &self.surfaces[class.surface.index()];
            let pool = &self.pools[class.pool.index()];
            if !surface.can_sub(bytes) || !pool.can_sub(bytes) {
                return Err(corrupted(format!(
                    "video memory {}/{} counter underflow: surface={} pool={} release={}",
                    class.surface, class.pool, surface.current_bytes, pool.current_bytes, bytes
                )));
            }
        }

        if let Some(index) = index {
            self.kinds[index].sub(bytes);
        }
        if video {
            self.surfaces[class.surface.index()].sub(bytes);
            self.pools[class.pool.index()].sub(bytes);
        }

        Ok(())
    }

    /// Counter of `kind`, `None` for kinds without byte accounting
    pub fn kind(&self, kind: ResourceKind) -> Option<Counter> {
        kind.counter_index().map(|i| self.kinds[i])
    }

    /// Video memory counter for one surface type
    pub fn surface(&self, surface: SurfaceType) -> Counter {
        self.surfaces[surface.index()]
    }

    /// Video memory counter for one pool
    pub fn pool(&self, pool: MemoryPool) -> Counter {
        self.pools[pool.index()]
    }

    /// Current bytes across all counted kinds
    pub fn total_current_bytes(&self) -> u64 {
        self.kinds.iter().map(|c| c.current_bytes).sum()
    }

    /// Zero every counter
    pub fn reset(&mut self) {
        self.kinds.iter_mut().for_each(Counter::reset);
        self.surfaces.iter_mut().for_each(Counter::reset);
        self.pools.iter_mut().for_each(Counter::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn texture_in(pool: MemoryPool) -> Option<VidMemClass> {
        Some(VidMemClass::new(SurfaceType::Texture, pool))
    }

    #[test]
    fn test_peak_and_lifetime() {
        let mut set = CounterSet::default();
        set.account(ResourceKind::NonPaged, None, 1000).unwrap();
        set.account(ResourceKind::NonPaged, None, 2000).unwrap();
        set.unaccount(ResourceKind::NonPaged, None, 1000).unwrap();
        set.account(ResourceKind::NonPaged, None, 500).unwrap();

        let counter = set.kind(ResourceKind::NonPaged).unwrap();
        assert_eq!(counter.current_bytes, 2500);
        assert_eq!(counter.peak_bytes, 3000);
        assert_eq!(counter.lifetime_bytes, 3500);
    }

    #[test]
    fn test_video_memory_feeds_surface_and_pool() {
        let mut set = CounterSet::default();
        set.account(ResourceKind::VideoMemory, texture_in(MemoryPool::System), 4096)
            .unwrap();

        assert_eq!(set.kind(ResourceKind::VideoMemory).unwrap().current_bytes, 4096);
        assert_eq!(set.surface(SurfaceType::Texture).current_bytes, 4096);
        assert_eq!(set.pool(MemoryPool::System).current_bytes, 4096);
        assert_eq!(set.pool(MemoryPool::Local).current_bytes, 0);
    }

    #[test]
    fn test_non_video_kind_skips_surface_counters() {
        let mut set = CounterSet::default();
        set.account(ResourceKind::Contiguous, texture_in(MemoryPool::System), 64)
            .unwrap();
        assert_eq!(set.surface(SurfaceType::Texture), Counter::default());
    }

    #[cfg(not(feature = "strict-integrity"))]
    #[test]
    fn test_underflow_is_corruption_and_changes_nothing() {
        let mut set = CounterSet::default();
        set.account(ResourceKind::VideoMemory, texture_in(MemoryPool::Local), 100)
            .unwrap();
        let before = set.clone();

        // Kind counter has room, but the pool counter does not.
        let err = set
            .unaccount(ResourceKind::VideoMemory, texture_in(MemoryPool::System), 50)
            .unwrap_err();
        assert!(err.is_corrupted());
        assert_eq!(set, before);
    }

    #[rstest]
    #[case(ResourceKind::Signal)]
    #[case(ResourceKind::SyncPoint)]
    #[case(ResourceKind::VideoMemoryLocked)]
    fn test_uncounted_kinds_are_ignored(#[case] kind: ResourceKind) {
        let mut set = CounterSet::default();
        set.account(kind, None, 10).unwrap();
        set.unaccount(kind, None, 10).unwrap();
        assert_eq!(set, CounterSet::default());
    }

    #[test]
    fn test_idle_rejected() {
        let mut set = CounterSet::default();
        assert!(matches!(
            set.account(ResourceKind::Idle, None, 0),
            Err(TrackerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reset() {
        let mut set = CounterSet::default();
        set.account(ResourceKind::VideoMemory, None, 10).unwrap();
        set.account(ResourceKind::Context, None, 10).unwrap();
        assert_eq!(set.total_current_bytes(), 20);
        set.reset();
        assert_eq!(set, CounterSet::default());
    }
}

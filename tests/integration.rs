#[cfg(test)]
mod integration_tests {
    use gpudb::database::DatabaseState;
    use gpudb::prelude::*;
    use gpudb::replay::{Outcome, Trace};
    use gpudb::{ManualClock, ResourceFinalizer};
    use mockall::mock;
    use std::sync::{Arc, Barrier};
    use std::thread;

    mock! {
        Finalizer {}
        impl ResourceFinalizer for Finalizer {
            fn release(&self, process_id: u32, record: &ResourceRecord) -> TrackerResult<()>;
        }
    }

    fn tracker() -> ProcessTracker {
        ProcessTracker::new(TrackerConfig::default()).unwrap()
    }

    fn current(tracker: &ProcessTracker, pid: u32, kind: ResourceKind) -> u64 {
        tracker
            .query_counters(QueryTarget::Process(pid), kind, MemoryPool::Unknown)
            .unwrap()
            .current_bytes
    }

    #[test]
    fn test_library_version() {
        assert!(!gpudb::version().is_empty());
    }

    #[test]
    fn test_registration_round_trip() {
        let tracker = tracker();
        tracker.create_database(100).unwrap();

        let record = ResourceRecord::new(ResourceKind::VideoMemory, 0xdead_0000, 65536)
            .with_physical(0x8000_0000)
            .with_class(VidMemClass::new(SurfaceType::Texture, MemoryPool::Local));
        tracker.register_resource(100, record).unwrap();

        let found = tracker
            .lookup_resource(100, ResourceKind::VideoMemory, 0xdead_0000)
            .unwrap();
        assert_eq!(found, record);
        assert_eq!(current(&tracker, 100, ResourceKind::VideoMemory), 65536);

        let released = tracker
            .release_resource(100, ResourceKind::VideoMemory, 0xdead_0000)
            .unwrap();
        assert_eq!(released, record);
        assert_eq!(current(&tracker, 100, ResourceKind::VideoMemory), 0);
        assert!(tracker
            .lookup_resource(100, ResourceKind::VideoMemory, 0xdead_0000)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_counters_never_shrink_peak_or_lifetime() {
        let tracker = tracker();
        let sizes = [4096u64, 1024, 8192, 512];
        let mut peak = 0;
        let mut live = 0;

        for (i, &bytes) in sizes.iter().enumerate() {
            tracker
                .register_resource(1, ResourceRecord::new(ResourceKind::Contiguous, i as u64 + 1, bytes))
                .unwrap();
            live += bytes;
            peak = peak.max(live);
            if i % 2 == 1 {
                let freed = tracker
                    .release_resource(1, ResourceKind::Contiguous, i as u64)
                    .unwrap();
                live -= freed.bytes;
            }

            let counter = tracker
                .query_counters(QueryTarget::Process(1), ResourceKind::Contiguous, MemoryPool::Unknown)
                .unwrap();
            assert_eq!(counter.current_bytes, live);
            assert_eq!(counter.peak_bytes, peak);
            assert!(counter.current_bytes <= counter.peak_bytes);
            assert!(counter.peak_bytes <= counter.lifetime_bytes);
        }

        let counter = tracker
            .query_counters(QueryTarget::Process(1), ResourceKind::Contiguous, MemoryPool::Unknown)
            .unwrap();
        assert_eq!(counter.lifetime_bytes, sizes.iter().sum::<u64>());
    }

    #[test]
    fn test_records_unique_per_process_by_default() {
        let tracker = tracker();

        let record = ResourceRecord::new(ResourceKind::Signal, 0x42, 0);
        tracker.register_resource(9, record).unwrap();
        let err = tracker.register_resource(9, record).unwrap_err();
        assert!(matches!(err, TrackerError::AlreadyExists { process_id: 9 }));

        // Same key under another kind is a different record.
        tracker
            .register_resource(9, ResourceRecord::new(ResourceKind::Context, 0x42, 128))
            .unwrap();
        assert_eq!(tracker.usages().unwrap()[0].records.len(), 2);

        // Uniqueness is per process.
        tracker.register_resource(10, record).unwrap();
    }

    #[test]
    fn test_duplicates_allowed_when_not_strict() {
        let mut config = TrackerConfig::default();
        config.registry.strict_duplicates = false;
        let tracker = ProcessTracker::new(config).unwrap();

        let record = ResourceRecord::new(ResourceKind::NonPaged, 0x10, 64);
        tracker.register_resource(1, record).unwrap();
        tracker.register_resource(1, record).unwrap();
        assert_eq!(current(&tracker, 1, ResourceKind::NonPaged), 128);
    }

    #[test]
    fn test_deferred_free_is_one_deep() {
        let tracker = tracker();
        let first = tracker.create_database(1).unwrap();
        let second = tracker.create_database(2).unwrap();
        let registry = tracker.registry();

        tracker.destroy_database(1).unwrap();
        assert_eq!(registry.state(&first).unwrap(), Some(DatabaseState::Pending));
        assert_eq!(registry.pending_process().unwrap(), Some(1));
        assert_eq!(registry.free_databases().unwrap(), 0);

        tracker.destroy_database(2).unwrap();
        assert_eq!(registry.pending_process().unwrap(), Some(2));
        assert_eq!(registry.state(&second).unwrap(), Some(DatabaseState::Pending));
        assert_eq!(registry.free_databases().unwrap(), 1);

        // The recycled slot serves the next process without growing.
        let capacity = registry.capacity().unwrap();
        tracker.create_database(3).unwrap();
        assert_eq!(registry.capacity().unwrap(), capacity);
        assert!(first.counters().unwrap_err().is_not_found());
    }

    #[test]
    fn test_most_recent_survives_teardown() {
        let tracker = tracker();
        tracker
            .register_resource(77, ResourceRecord::new(ResourceKind::NonPaged, 0x1, 2048))
            .unwrap();
        tracker.destroy_database(77).unwrap();

        let counter = tracker
            .query_counters(QueryTarget::MostRecent, ResourceKind::NonPaged, MemoryPool::Unknown)
            .unwrap();
        assert_eq!(counter.current_bytes, 0);
        assert_eq!(counter.peak_bytes, 2048);
        assert!(tracker
            .query_counters(QueryTarget::Process(77), ResourceKind::NonPaged, MemoryPool::Unknown)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_teardown_hands_leftovers_to_finalizer() {
        let mut finalizer = MockFinalizer::new();
        finalizer
            .expect_release()
            .withf(|pid, _| *pid == 12)
            .times(3)
            .returning(|_, _| Ok(()));

        let tracker = tracker().with_finalizer(Arc::new(finalizer));
        for key in 1..=3u64 {
            tracker
                .register_resource(12, ResourceRecord::new(ResourceKind::MapMemory, key, 4096))
                .unwrap();
        }

        let summary = tracker.destroy_database(12).unwrap();
        assert_eq!(summary.reclaimed_of(ResourceKind::MapMemory), 3);
        assert_eq!(summary.finalizer_failures, 0);
    }

    #[test]
    fn test_idle_window_and_duty_cycle() {
        let clock = Arc::new(ManualClock::new(0));
        let tracker = tracker().with_clock(clock.clone());

        tracker.query_duty_cycle(Core::Major, true, 0).unwrap();
        tracker.notify_idle_transition(Core::Major, IdleMarker::Awake, 0).unwrap();
        tracker.notify_idle_transition(Core::Major, IdleMarker::Idle, 100).unwrap();
        tracker.notify_idle_transition(Core::Major, IdleMarker::Awake, 150).unwrap();

        let window = tracker.query_idle_window(Core::Major, 200, 100).unwrap();
        assert_eq!(window.idle_time, 50);
        assert_eq!(window.window, 100);

        assert_eq!(tracker.query_duty_cycle(Core::Major, false, 150).unwrap(), Some(67));
    }

    #[test]
    fn test_idle_window_edges() {
        let tracker = tracker();

        // Busy core without history: nothing idle, full window reported.
        let window = tracker.query_idle_window(Core::Major, 1000, 100).unwrap();
        assert_eq!(window.idle_time, 0);
        assert_eq!(window.window, 100);

        tracker.notify_idle_transition(Core::Major, IdleMarker::Idle, 500).unwrap();
        tracker.notify_idle_transition(Core::Major, IdleMarker::Awake, 600).unwrap();
        let window = tracker.query_idle_window(Core::Major, 400, 50).unwrap();
        assert_eq!((window.idle_time, window.window), (0, 0));
    }

    #[test]
    fn test_power_policy_through_tracker() {
        let tracker = tracker();
        tracker.notify_idle_transition(Core::TwoD, IdleMarker::Awake, 10).unwrap();
        tracker.notify_idle_transition(Core::TwoD, IdleMarker::Idle, 20).unwrap();

        let decision = tracker.idle_power_policy(Core::TwoD, 220, 200, 50).unwrap();
        assert!(decision.power_off);

        tracker.notify_idle_transition(Core::TwoD, IdleMarker::Awake, 230).unwrap();
        let decision = tracker.idle_power_policy(Core::TwoD, 240, 200, 50).unwrap();
        assert!(!decision.power_off);
    }

    #[test]
    fn test_replay_trace_file() {
        let trace = r#"{
            "config": { "registry": { "database_buckets": 4, "record_buckets": 8, "strict_duplicates": false } },
            "events": [
                { "op": "register", "pid": 3, "kind": "VideoMemory", "key": 16, "bytes": 2048,
                  "surface": "RenderTarget", "pool": "Local" },
                { "op": "register", "pid": 4, "kind": "NonPaged", "key": 32, "bytes": 512 },
                { "op": "tick", "at": 100 },
                { "op": "duty_cycle", "core": "Major", "starting": true },
                { "op": "idle", "core": "Major", "marker": "Idle" },
                { "op": "tick", "at": 200 },
                { "op": "idle_window", "core": "Major", "window": 100 },
                { "op": "destroy", "pid": 4 }
            ]
        }"#;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workload.json");
        std::fs::write(&path, trace).unwrap();

        let replay = gpudb::replay(&Trace::load(&path).unwrap()).unwrap();
        assert_eq!(replay.failures().count(), 0);
        assert!(matches!(replay.outcomes[6].outcome, Outcome::Window(w) if w.idle_time == 100));

        let list = replay.tracker.render_process_list().unwrap();
        assert!(list.contains("3       1\n"));
        assert!(!list.contains("4       "));

        let snapshot = replay.tracker.usage_snapshot().unwrap();
        assert_eq!(snapshot.total_current_bytes(), 2048);
    }

    #[test]
    fn test_concurrent_processes() {
        let tracker = Arc::new(tracker());

        let workers: Vec<_> = (1..=8u32)
            .map(|pid| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for key in 1..=64u64 {
                        tracker
                            .register_resource(pid, ResourceRecord::new(ResourceKind::CommandBuffer, key, 64))
                            .unwrap();
                    }
                    for key in (1..=64u64).step_by(2) {
                        tracker
                            .release_resource(pid, ResourceKind::CommandBuffer, key)
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        for pid in 1..=8u32 {
            assert_eq!(current(&tracker, pid, ResourceKind::CommandBuffer), 32 * 64);
        }
        assert_eq!(tracker.usage_snapshot().unwrap().total_current_bytes(), 8 * 32 * 64);
    }

    #[test]
    fn test_concurrent_first_registration_same_process() {
        const THREADS: usize = 8;

        for round in 0..200u32 {
            let tracker = Arc::new(tracker());
            let barrier = Arc::new(Barrier::new(THREADS));
            let pid = 1000 + round;

            let workers: Vec<_> = (0..THREADS as u64)
                .map(|i| {
                    let tracker = Arc::clone(&tracker);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        tracker.register_resource(pid, ResourceRecord::new(ResourceKind::Context, i + 1, 32))
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap().unwrap();
            }
            assert_eq!(tracker.registry().live_databases().unwrap().len(), 1);
            assert_eq!(current(&tracker, pid, ResourceKind::Context), THREADS as u64 * 32);
        }
    }
}

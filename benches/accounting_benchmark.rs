use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gpudb::prelude::*;

fn populated_tracker(processes: u32, records: u64) -> ProcessTracker {
    let tracker = ProcessTracker::new(TrackerConfig::default()).unwrap();
    for pid in 1..=processes {
        for key in 1..=records {
            tracker
                .register_resource(pid, ResourceRecord::new(ResourceKind::NonPaged, key, 4096))
                .unwrap();
        }
    }
    tracker
}

pub fn bench_register_release(c: &mut Criterion) {
    let tracker = populated_tracker(16, 64);
    c.bench_function("register_release_churn", |b| {
        b.iter(|| {
            tracker
                .register_resource(8, ResourceRecord::new(ResourceKind::Context, 0xbeef, 256))
                .unwrap();
            tracker
                .release_resource(8, ResourceKind::Context, black_box(0xbeef))
                .unwrap()
        })
    });
}

pub fn bench_lookup(c: &mut Criterion) {
    let tracker = populated_tracker(64, 16);
    c.bench_function("lookup_resource", |b| {
        b.iter(|| tracker.lookup_resource(black_box(37), ResourceKind::NonPaged, black_box(9)))
    });
}

pub fn bench_idle_window(c: &mut Criterion) {
    let tracker = ProcessTracker::new(TrackerConfig::default()).unwrap();
    for i in 0..256u64 {
        let marker = if i % 2 == 0 { IdleMarker::Idle } else { IdleMarker::Awake };
        tracker
            .notify_idle_transition(Core::Major, marker, 100 + i * 10)
            .unwrap();
    }
    c.bench_function("query_idle_window", |b| {
        b.iter(|| tracker.query_idle_window(Core::Major, black_box(2600), black_box(1500)))
    });
}

criterion_group!(benches, bench_register_release, bench_lookup, bench_idle_window);
criterion_main!(benches);

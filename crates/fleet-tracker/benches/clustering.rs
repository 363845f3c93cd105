//! Clustering and render tick benchmarks.
//!
//! Run with: cargo bench --package fleet-tracker

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use fleet_core::{Coordinates, EntityId, PositionSample};
use fleet_tracker::{ClusterIndex, FleetTracker, TrackerConfig};

/// Deterministic spread of points around Kabul
fn fleet_points(count: usize) -> Vec<(EntityId, Coordinates)> {
    (0..count)
        .map(|i| {
            let step = i as f64;
            (
                EntityId::new(format!("IMEI-{i:06}")),
                Coordinates::new(69.0 + (step * 0.137).sin() * 0.8, 34.5 + (step * 0.071).cos() * 0.6),
            )
        })
        .collect()
}

fn bench_cluster_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_compute");
    let index = ClusterIndex::default();

    for count in [100, 1_000, 10_000] {
        let points = fleet_points(count);
        group.throughput(Throughput::Elements(count as u64));

        for zoom in [6u8, 12] {
            group.bench_with_input(
                BenchmarkId::new(format!("zoom_{zoom}"), count),
                &points,
                |b, points| b.iter(|| index.compute(black_box(points), zoom)),
            );
        }
    }

    group.finish();
}

fn bench_render_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_tick");

    for count in [100, 1_000] {
        let tracker = FleetTracker::new(TrackerConfig::default()).expect("valid config");
        let now = Utc::now();
        for (id, coords) in fleet_points(count) {
            tracker.apply_at(id, PositionSample::new(coords, 40.0, 90.0, now), now);
        }

        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::from_parameter(count), |b| {
            b.iter(|| black_box(tracker.tick_at(now)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cluster_compute, bench_render_tick);
criterion_main!(benches);

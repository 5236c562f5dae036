//! Benchmarks for visit detection over synthetic location history.
//!
//! Run with: `cargo bench --bench detection`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use dwelldetect::synthetic::{transit_points, DwellScenario};
use dwelldetect::{DetectionEngine, GpsPoint, LocationPoint, MemoryStore, Place};

/// A day of alternating dwells and transits between `spots` locations.
fn day_of_history(spots: usize, seed: u64) -> Vec<LocationPoint> {
    let origin = GpsPoint::new(47.37, 8.55);
    let mut points = Vec::new();
    let mut t = 1_700_000_000;

    for i in 0..spots {
        let center = GpsPoint::new(origin.latitude + i as f64 * 0.01, origin.longitude);
        let dwell = DwellScenario {
            center,
            start_at: t,
            duration_secs: 3600,
            interval_secs: 60,
            jitter_m: 10.0,
            seed: seed + i as u64,
        };
        points.extend(dwell.generate());
        t += 3600 + 60;

        let next = GpsPoint::new(origin.latitude + (i + 1) as f64 * 0.01, origin.longitude);
        points.extend(transit_points(center, next, t, 900, 30));
        t += 900 + 60;
    }
    points
}

fn store_with_history(spots: usize, places: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.add_points(day_of_history(spots, 42));
    for i in 0..places {
        store.add_place(Place::new(
            i as i64 + 1,
            &format!("place-{i}"),
            47.37 + i as f64 * 0.01,
            8.55,
            75.0,
        ));
    }
    store
}

fn bench_all_places_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("all_places_detection");
    for spots in [4usize, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(spots), &spots, |b, &spots| {
            b.iter(|| {
                let mut engine = DetectionEngine::new(store_with_history(spots, spots));
                engine.detect_visits_for_all_places(None).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_unknown_clustering(c: &mut Criterion) {
    let mut group = c.benchmark_group("unknown_clustering");
    for spots in [4usize, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(spots), &spots, |b, &spots| {
            b.iter(|| {
                let mut engine = DetectionEngine::new(store_with_history(spots, 0));
                engine.detect_unknown_visits(None).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_all_places_detection, bench_unknown_clustering);
criterion_main!(benches);

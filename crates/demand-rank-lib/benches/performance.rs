//! Performance benchmarks for demand-rank-lib
//!
//! Run with: cargo bench --package demand-rank-lib
//!
//! Covers the per-event pipeline stages on a synthetic statewide dataset.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use demand_rank_lib::{
    Chunk, ChunkStore, Config, FactorScores, FeatureRecord, FilterCriteria, Geometry, Preset,
    ScoreTable, Session, ViewportState, WeightVector, budget_for_zoom, select_active_chunks,
};
use geo::{Coord, LineString};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;

/// A short road segment with deterministic pseudo-random scores
fn generate_segment(i: usize, base_lon: f64, base_lat: f64) -> FeatureRecord {
    let t = i as f64;
    let lon = base_lon + (t * 0.37).sin() * 0.05;
    let lat = base_lat + (t * 0.23).cos() * 0.05;
    let line = LineString::from(vec![(lon, lat), (lon + 0.0005, lat + 0.0003)]);
    let mut record = FeatureRecord::new(Geometry::LineString(line)).unwrap();

    let mut factors = [0.0; 7];
    for (k, value) in factors.iter_mut().enumerate() {
        *value = ((i * (k + 3)) % 11) as f64;
    }
    record.factors = FactorScores::new(factors);
    record.pedestrian_feasible = i % 3 != 0;
    record.urban_context = i % 4 == 0;
    record.has_sidewalk = i % 5 == 0;
    record
}

/// A grid of chunks, each a cluster of segments around its own center
fn generate_store(num_chunks: usize, records_per_chunk: usize) -> ChunkStore {
    let mut store = ChunkStore::new();
    for c in 0..num_chunks {
        let base_lon = -73.6 + (c % 10) as f64 * 0.18;
        let base_lat = 41.0 + (c / 10) as f64 * 0.1;
        let records = (0..records_per_chunk)
            .map(|i| generate_segment(c * records_per_chunk + i, base_lon, base_lat))
            .collect();
        store.push(Chunk::new(c, records));
    }
    store
}

fn statewide_view(zoom: f64) -> ViewportState {
    ViewportState::from_center_zoom(Coord { x: -72.7, y: 41.6 }, zoom, (1920, 1080))
}

// ============================================================================
// Core Benchmarks - Key performance indicators
// ============================================================================

fn bench_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("scoring");
    group.sample_size(20);

    let store = generate_store(100, 2_000);
    let mut table = ScoreTable::seeded(&store);
    let weights = WeightVector::default();

    group.throughput(Throughput::Elements(store.total_records() as u64));
    group.bench_function("recompute_200k", |b| {
        b.iter(|| table.recompute(&weights, &store));
    });

    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    let store = generate_store(100, 500);
    let thresholds = Config::default().zoom_thresholds;

    for zoom in [8.0, 12.0, 16.0] {
        let view = statewide_view(zoom);
        let budget = budget_for_zoom(&thresholds, zoom);
        group.bench_with_input(BenchmarkId::new("select_active_chunks", zoom), &view, |b, view| {
            b.iter(|| select_active_chunks(&store, view, budget));
        });
    }

    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame");
    group.sample_size(20);

    let store = Arc::new(generate_store(100, 1_000));
    let config = Config {
        render_ceiling: 10_000,
        ..Default::default()
    };
    let mut session = Session::new(store, config, statewide_view(10.0)).unwrap();
    let mut rng = StdRng::seed_from_u64(42);

    group.bench_function("default_criteria", |b| {
        b.iter(|| session.frame(1, &mut rng));
    });

    session.set_criteria(FilterCriteria {
        pedestrian_feasible_only: true,
        preset: Some(Preset::MissingSidewalks),
        ..Default::default()
    });
    group.bench_function("missing_sidewalks_preset", |b| {
        b.iter(|| session.frame(1, &mut rng));
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(benches, bench_recompute, bench_selection, bench_frame);

criterion_main!(benches);

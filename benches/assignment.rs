//! Assignment resolver benchmarks
//!
//! Benchmarks for the per-request hot path:
//! - Session bucketing (SHA-256 of experiment id and session key)
//! - Weighted walk over 2..8 variants
//! - Resolution against a published snapshot

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pagesplit::assignment::{assign, bucket};
use pagesplit::experiment::{Experiment, ExperimentStatus, Variant};
use pagesplit::registry::VariantRegistry;
use pagesplit::snapshot::ContentSnapshot;

/// Equal-weight variants summing to 100
#[allow(clippy::cast_precision_loss)]
fn equal_variants(experiment_id: &str, n: usize) -> Vec<Variant> {
    let base = (100.0 / n as f64 * 100.0).floor() / 100.0;
    let mut variants: Vec<Variant> = (0..n)
        .map(|i| {
            if i == 0 {
                Variant::control(format!("v{i}"), experiment_id, base)
            } else {
                Variant::new(format!("v{i}"), experiment_id, base)
            }
        })
        .collect();
    let remainder = 100.0 - base * n as f64;
    variants[0] = Variant::control("v0", experiment_id, base + remainder);
    variants
}

fn bench_bucket(c: &mut Criterion) {
    let sessions: Vec<String> = (0..1_000).map(|i| format!("session-{i:08}")).collect();

    c.bench_function("bucket_1k_sessions", |b| {
        b.iter(|| {
            for session in &sessions {
                black_box(bucket("exp-bench", session));
            }
        });
    });
}

fn bench_assign(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign");

    for n in [2usize, 4, 8] {
        let variants = equal_variants("exp-bench", n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &variants, |b, variants| {
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let session = format!("session-{i}");
                black_box(assign("exp-bench", variants, &session).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_snapshot_assign(c: &mut Criterion) {
    let registry = VariantRegistry::new();
    for e in 0..10 {
        let id = format!("exp-{e}");
        registry
            .create(Experiment::new(id.as_str(), "Bench", "home"), equal_variants(&id, 3))
            .unwrap();
        registry.transition(&id, ExperimentStatus::Running).unwrap();
    }
    let snapshot = ContentSnapshot::build("home", &registry.experiments_for_unit("home"))
        .unwrap()
        .unwrap();

    c.bench_function("snapshot_assign_10_experiments", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let session = format!("session-{i}");
            for entry in &snapshot.experiments {
                black_box(entry.assign(&session).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_bucket, bench_assign, bench_snapshot_assign);
criterion_main!(benches);

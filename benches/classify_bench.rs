//! Training and classification throughput.
//!
//! Run with `cargo bench --bench classify_bench`.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use latency_engine::{classify_batch, train, ClusteringConfig, ModelArtifact, Sample};

/// Deterministic three-band latency series around 20ms, 150ms and 600ms.
fn synthetic_samples(count: usize) -> Vec<Sample> {
    let bands = [20.0, 150.0, 600.0];
    (0..count)
        .map(|i| {
            let base = bands[i % bands.len()];
            let wobble = ((i as f64) * 0.37).sin() * base * 0.1;
            Sample::new(Utc::now(), Some(base + wobble))
        })
        .collect()
}

fn trained_model() -> ModelArtifact {
    train(&synthetic_samples(300), &ClusteringConfig::default())
        .expect("synthetic training set is valid")
}

fn bench_train(c: &mut Criterion) {
    let samples = synthetic_samples(300);
    let config = ClusteringConfig::default();

    c.bench_function("train_300_samples", |b| {
        b.iter(|| train(black_box(&samples), black_box(&config)))
    });
}

fn bench_classify(c: &mut Criterion) {
    let artifact = trained_model();
    let mut group = c.benchmark_group("classify_batch");

    for size in [10usize, 60, 1_000] {
        let batch = synthetic_samples(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| classify_batch(black_box(batch), black_box(&artifact)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_train, bench_classify);
criterion_main!(benches);

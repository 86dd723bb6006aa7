use baseline_rs::store::MemoryModelStore;
use baseline_rs::{
    AnomalyDetector, AnomalyService, DataPoint, StatisticalModel, TrainingDataRequest,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Deterministic pseudo-random training matrix
fn training_rows(rows: usize, dims: usize) -> Vec<Vec<f64>> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..rows)
        .map(|_| {
            (0..dims)
                .map(|j| {
                    state ^= state << 13;
                    state ^= state >> 7;
                    state ^= state << 17;
                    (state % 1000) as f64 / 100.0 + j as f64 * 10.0
                })
                .collect()
        })
        .collect()
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");

    for rows in [100, 1_000, 10_000].iter() {
        let data = training_rows(*rows, 8);
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::new("rows_x8", rows), &data, |b, data| {
            b.iter(|| StatisticalModel::fit(data).unwrap())
        });
    }

    group.finish();
}

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    let detector = AnomalyDetector::default();

    for dims in [2, 8, 32].iter() {
        let model = StatisticalModel::fit(&training_rows(500, *dims)).unwrap();
        let query: Vec<f64> = model.means.iter().map(|m| m + 1.5).collect();

        group.bench_with_input(BenchmarkId::new("dims", dims), &query, |b, query| {
            b.iter(|| detector.detect(&model, query).unwrap())
        });
    }

    group.finish();
}

fn bench_service_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let service = AnomalyService::new(
        Arc::new(MemoryModelStore::new()),
        AnomalyDetector::default(),
    );
    rt.block_on(service.fit(&TrainingDataRequest {
        user_token: 1,
        run_id: Some("bench".to_string()),
        training_data: training_rows(1_000, 4),
    }))
    .unwrap();

    let point = DataPoint {
        user_token: 1,
        run_id: "bench".to_string(),
        values: vec![5.0, 15.0, 25.0, 35.0],
    };

    c.bench_function("service_detect_memory", |b| {
        b.to_async(&rt)
            .iter(|| async { service.detect(&point).await.unwrap() })
    });
}

criterion_group!(benches, bench_fit, bench_detect, bench_service_round_trip);
criterion_main!(benches);

//! Performance benchmarks for format detection and the pipeline executor

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use dataforge_core::format::detect;
use dataforge_core::pipeline::PipelineExecutor;
use dataforge_core::progress::NullProvider;
use dataforge_core::stages::StageRegistry;
use dataforge_core::{StageConfig, StageKind};
use dataforge_test_utils::TestDataBuilder;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const ROW_COUNTS: [(usize, &str); 3] = [(1_000, "1k"), (10_000, "10k"), (50_000, "50k")];

fn bench_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("detect");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for (rows, label) in ROW_COUNTS {
        let builder = TestDataBuilder::new().with_unique_rows(rows);
        let csv = builder.to_csv().unwrap();
        let jsonl = builder.to_jsonl().unwrap();

        group.throughput(Throughput::Bytes(csv.len() as u64));
        group.bench_with_input(BenchmarkId::new("csv", label), &csv, |b, bytes| {
            b.iter(|| detect(black_box(bytes), "bench.csv", None).unwrap())
        });
        group.throughput(Throughput::Bytes(jsonl.len() as u64));
        group.bench_with_input(BenchmarkId::new("jsonl", label), &jsonl, |b, bytes| {
            b.iter(|| detect(black_box(bytes), "bench.jsonl", None).unwrap())
        });
    }

    group.finish();
}

fn bench_stages(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("stages");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    let registry = StageRegistry::builtin();
    let executor = PipelineExecutor::new();

    for (rows, label) in ROW_COUNTS {
        let table = TestDataBuilder::new()
            .with_unique_rows(rows * 9 / 10)
            .with_duplicates(rows / 10)
            .build_text_only();
        group.throughput(Throughput::Elements(rows as u64));

        for kind in StageKind::ALL {
            let plan = registry.plan(&[StageConfig::new(kind)]).unwrap();
            group.bench_with_input(BenchmarkId::new(kind.id(), label), &table, |b, table| {
                b.iter(|| {
                    rt.block_on(executor.run(
                        black_box(table),
                        &plan,
                        Arc::new(NullProvider),
                        &CancellationToken::new(),
                    ))
                })
            });
        }
    }

    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("full_pipeline");
    group.measurement_time(Duration::from_secs(15));
    group.sample_size(10);

    let configs: Vec<StageConfig> = StageKind::ALL.into_iter().map(StageConfig::new).collect();
    let plan = StageRegistry::builtin().plan(&configs).unwrap();
    let executor = PipelineExecutor::new();

    for (rows, label) in ROW_COUNTS {
        let table = TestDataBuilder::new()
            .with_unique_rows(rows)
            .with_text("Contact ops@example.com or 555-123-4567 for <b>access</b>.")
            .build_text_only();
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::new("all_stages", label), &table, |b, table| {
            b.iter(|| {
                rt.block_on(executor.run(
                    black_box(table),
                    &plan,
                    Arc::new(NullProvider),
                    &CancellationToken::new(),
                ))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_detect, bench_stages, bench_full_pipeline);
criterion_main!(benches);

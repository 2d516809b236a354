//! Benchmarks for record draws, in-batch assembly and skip-ahead restore

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use sampling::{
    BatchwiseSampler, PairwiseDatasetTripletBasedSampler, PairwiseInBatchNegativesSampler,
    PairwiseSampler, RandomSerializableIterator, RandomStream, Sampler, SerializableIterator,
    TripletBasedSampler,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use train_core::memory::{MemoryPairwiseSamples, MemoryTriplets};
use train_core::{Document, PairwiseSample, Query, Triplet};

fn samples(count: usize) -> Arc<MemoryPairwiseSamples> {
    let samples = (0..count)
        .map(|i| PairwiseSample {
            query: Query::new(Some(format!("q{}", i)), Some(format!("query {}", i))),
            positives: vec![Document::from_text(format!("positive {}", i))],
            negatives: BTreeMap::from([(
                "bm25".to_string(),
                (0..8)
                    .map(|j| Document::from_text(format!("negative {} {}", i, j)))
                    .collect(),
            )]),
        })
        .collect();
    Arc::new(MemoryPairwiseSamples::new(samples))
}

fn triplets(count: usize) -> Arc<MemoryTriplets> {
    let triplets = (0..count)
        .map(|i| Triplet {
            query: format!("query {}", i),
            positive: format!("positive {}", i),
            negative: format!("negative {}", i),
        })
        .collect();
    Arc::new(MemoryTriplets::new(triplets, false))
}

fn bench_draws(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("draws");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("random_stream", |b| {
        let mut draws =
            RandomSerializableIterator::new(RandomStream::from_seed(7), |random| {
                Some(random.below(1000))
            });
        b.iter(|| draws.by_ref().take(10_000).sum::<usize>());
    });

    group.bench_function("pairwise_samples", |b| {
        let mut sampler = PairwiseDatasetTripletBasedSampler::new(samples(1000));
        rt.block_on(sampler.initialize(RandomStream::from_seed(7)))
            .unwrap();
        let mut records = sampler.pairwise_iter().unwrap();
        b.iter(|| records.by_ref().take(10_000).count());
    });

    group.finish();
}

fn bench_in_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("in_batch_assembly");

    for batch_size in [16usize, 64, 256] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let pairwise = TripletBasedSampler::new(triplets(4096), None).unwrap();
                let mut sampler = PairwiseInBatchNegativesSampler::new(Box::new(pairwise));
                rt.block_on(sampler.initialize(RandomStream::from_seed(7)))
                    .unwrap();
                let mut batches = sampler.batchwise_iter(batch_size).unwrap();
                b.iter(|| batches.next().unwrap());
            },
        );
    }

    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("skip_ahead_restore");

    let mut sampler = PairwiseDatasetTripletBasedSampler::new(samples(1000));
    rt.block_on(sampler.initialize(RandomStream::from_seed(7)))
        .unwrap();

    for position in [1_000usize, 10_000, 100_000] {
        let mut records = sampler.pairwise_iter().unwrap();
        records.by_ref().take(position).for_each(drop);
        let state = records.state();

        group.throughput(Throughput::Elements(position as u64));
        group.bench_with_input(BenchmarkId::from_parameter(position), &state, |b, state| {
            b.iter_batched(
                || sampler.pairwise_iter().unwrap(),
                |mut fresh| fresh.restore(state).unwrap(),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_draws, bench_in_batch, bench_restore);
criterion_main!(benches);

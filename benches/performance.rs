//! Performance benchmarks for the broadcast engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use herald::{
    BroadcastFilter, Broadcaster, BroadcasterCache, BroadcasterConfig, CacheConfig, Canonical,
    Envelope, FilterAction, FilterPipeline, FnFilter, MemoryCache, Payload, ReplayBound, Sequence,
    Sink, SinkError, Subscriber, SubscriberId, Timestamp, TrackMessageSize, TRACK_MESSAGE_SIZE,
};
use std::sync::Arc;

/// Sink that discards everything.
struct Discard;

impl Sink for Discard {
    fn on_message(&self, _subscriber: &Subscriber, message: &Payload) -> Result<(), SinkError> {
        black_box(message);
        Ok(())
    }
}

fn appender(n: usize) -> impl BroadcastFilter {
    FnFilter::new(format!("append-{}", n), |_, message| {
        Ok(FilterAction::Continue(message.concat("x")))
    })
}

/// Benchmark broadcast fan-out with varying subscriber counts
fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for subscribers in [1, 10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &count| {
                let broadcaster =
                    Broadcaster::new("bench", BroadcasterConfig::default(), Arc::new(Discard))
                        .unwrap();
                for id in 0..count {
                    broadcaster
                        .add_subscriber(Subscriber::new(SubscriberId(id)))
                        .unwrap()
                        .wait();
                }

                b.iter(|| {
                    black_box(broadcaster.broadcast("payload").unwrap().wait());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the canonical fold with varying filter counts
fn bench_canonical_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonical_fold");

    for filters in [1, 5, 20] {
        group.bench_with_input(BenchmarkId::new("filters", filters), &filters, |b, &count| {
            let pipeline = FilterPipeline::new();
            for n in 0..count {
                pipeline.add(Arc::new(appender(n)));
            }
            let original = Payload::from("payload");

            b.iter(|| {
                let snapshot = pipeline.snapshot();
                black_box(snapshot.canonical(&original).unwrap());
            });
        });
    }

    group.finish();
}

/// Benchmark per-subscriber personalization
fn bench_personalize(c: &mut Criterion) {
    let pipeline = FilterPipeline::new();
    pipeline.add(Arc::new(appender(0)));
    pipeline.add(Arc::new(TrackMessageSize::new()));
    let snapshot = pipeline.snapshot();

    let original = Payload::from("payload");
    let canonical = match snapshot.canonical(&original).unwrap() {
        Canonical::Message(message) => message,
        Canonical::Aborted { .. } => unreachable!("no filter aborts"),
    };
    let plain = Subscriber::new(SubscriberId(1));
    let tracked = Subscriber::new(SubscriberId(2)).with_attribute(TRACK_MESSAGE_SIZE, "true");

    let mut group = c.benchmark_group("personalize");
    group.bench_function("fallback", |b| {
        b.iter(|| black_box(snapshot.personalize(&plain, &original, &canonical).unwrap()));
    });
    group.bench_function("customized", |b| {
        b.iter(|| black_box(snapshot.personalize(&tracked, &original, &canonical).unwrap()));
    });
    group.finish();
}

/// Benchmark replay queries against a full cache
fn bench_cache_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_query");

    for size in [100, 1000, 10000] {
        let cache = MemoryCache::new(CacheConfig {
            max_entries: Some(size),
            max_age: None,
        });
        for n in 1..=size as u64 {
            let payload = Payload::from(format!("message {}", n));
            cache
                .append(Arc::new(Envelope {
                    broadcaster: "bench".into(),
                    sequence: Sequence(n),
                    timestamp: Timestamp(n as i64),
                    original: payload.clone(),
                    message: payload,
                }))
                .unwrap();
        }

        group.bench_with_input(BenchmarkId::new("tail_10", size), &size, |b, &size| {
            let bound = ReplayBound::FromSequence(Sequence(size as u64 - 9));
            b.iter(|| black_box(cache.query(bound)));
        });
        group.bench_with_input(BenchmarkId::new("beginning", size), &size, |b, _| {
            b.iter(|| black_box(cache.query(ReplayBound::Beginning)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_fan_out,
    bench_canonical_fold,
    bench_personalize,
    bench_cache_query,
);
criterion_main!(benches);

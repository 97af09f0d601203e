//! Dispatch benchmarks for switchyard-core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use switchyard_core::{EventEmitter, InMemoryTransport, Message, Publisher, Subscriber, Topic, Transport};

/// Benchmark emit fan-out across listener counts.
fn bench_emit_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_fan_out");

    for listeners in [1usize, 10, 100] {
        let emitter: EventEmitter<u64> = EventEmitter::new();
        for _ in 0..listeners {
            emitter.on("event:bench", |v| {
                black_box(v);
                Ok(())
            });
        }

        group.bench_with_input(BenchmarkId::from_parameter(listeners), &emitter, |b, e| {
            b.iter(|| e.emit(black_box("event:bench"), black_box(&42)))
        });
    }

    group.finish();
}

/// Benchmark publish through the façades, including parse on receive.
fn bench_publish_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_in_memory");

    for subscribers in [1usize, 10] {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let topic: Topic = Topic::new("bench").unwrap();
        let subs: Vec<_> = (0..subscribers)
            .map(|_| {
                let sub = Subscriber::with_transport(
                    topic.clone(),
                    |m: Message| {
                        black_box(m);
                    },
                    transport.clone(),
                );
                sub.subscribe().unwrap();
                sub
            })
            .collect();
        let publisher = Publisher::with_transport(topic, transport);
        let message = Message::new().with("text", "hello").with("seq", 1);

        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &message, |b, m| {
            b.iter(|| publisher.publish(black_box(m)).unwrap())
        });
        drop(subs);
    }

    group.finish();
}

criterion_group!(benches, bench_emit_fan_out, bench_publish_in_memory);
criterion_main!(benches);

//! # Message Bus Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | publish | fan-out to N handlers, waiting for all |
//! | query | cache hit vs handler call |
//! | send | single command round-trip through the timeout race |

#![allow(clippy::excessive_nesting)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use layer_bus::{BusConfig, Command, Event, HandlerResult, Layer, MessageBus, Query};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::Runtime;

#[derive(Debug, Clone, Serialize)]
struct Tick(u64);

#[derive(Debug, Clone, Serialize)]
struct Lookup(u64);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn bus() -> MessageBus {
    MessageBus::builder()
        .config(BusConfig {
            enable_tracing: false,
            ..BusConfig::default()
        })
        .build()
        .expect("valid config")
}

// ============================================================================
// EVENTS
// ============================================================================

fn bench_publish_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish");
    group.measurement_time(Duration::from_secs(5));

    for handlers in [1usize, 8, 64] {
        let bus = bus();
        for _ in 0..handlers {
            let _sub = bus.subscribe_fn(|event: Event<Tick>| async move {
                black_box(event.payload.0);
                HandlerResult::Ok(())
            });
        }

        group.throughput(Throughput::Elements(handlers as u64));
        group.bench_with_input(BenchmarkId::new("fan_out", handlers), &bus, |b, bus| {
            b.iter(|| rt.block_on(bus.publish(Event::new(Layer::Domain, Tick(1)))))
        });
    }

    group.finish();
}

// ============================================================================
// QUERIES
// ============================================================================

fn bench_query_cache(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("query");

    let bus = bus();
    bus.handle_query_fn(|q: Query<Lookup, u64>| async move { HandlerResult::Ok(q.payload.0 * 2) })
        .expect("register query handler");

    group.bench_function("cache_hit", |b| {
        b.iter(|| {
            rt.block_on(bus.query(
                Query::<Lookup, u64>::new(Layer::Application, Lookup(7)).with_cache_key("hot"),
            ))
        })
    });

    group.bench_function("cache_hit_derived_key", |b| {
        b.iter(|| {
            rt.block_on(bus.query(
                Query::<Lookup, u64>::new(Layer::Application, Lookup(7)).cacheable(),
            ))
        })
    });

    let mut rng = rand::thread_rng();
    group.bench_function("uncached", |b| {
        b.iter(|| {
            let id = rng.gen::<u64>() >> 2;
            rt.block_on(bus.query(Query::<Lookup, u64>::new(Layer::Application, Lookup(id))))
        })
    });

    group.finish();
}

// ============================================================================
// COMMANDS
// ============================================================================

fn bench_command_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("send");

    let bus = bus();
    bus.handle_command_fn(|cmd: Command<Tick>| async move { HandlerResult::Ok(cmd.payload.0 + 1) })
        .expect("register command handler");

    group.bench_function("round_trip", |b| {
        b.iter(|| {
            let reply: u64 = rt
                .block_on(bus.send(Command::new(Layer::Application, Tick(1)).to(Layer::Domain)))
                .expect("command succeeds");
            black_box(reply)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_publish_fan_out,
    bench_query_cache,
    bench_command_round_trip
);
criterion_main!(benches);

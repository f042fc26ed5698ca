use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use stackrt::prelude::{
    DispatchCtx, Direction, Engine, EngineConfig, Event, EventType, Handler, HandlerRef, Message,
    Pipeline, ProtocolUnit, UnitContract, kinds,
};

static BENCH_DATA: EventType = EventType::derived("BenchData", &kinds::SENDABLE);

struct Relay {
    seen: Arc<AtomicU64>,
}

impl Handler for Relay {
    #[inline(always)]
    fn handle(&mut self, mut event: Event, ctx: &mut DispatchCtx<'_>) -> anyhow::Result<()> {
        if let Some(msg) = event.message_mut() {
            let hop = msg.pop_u32()?;
            msg.push_u32(black_box(hop + 1));
        }
        self.seen.fetch_add(1, Ordering::Relaxed);
        event.go(ctx)?;
        Ok(())
    }
}

struct RelayUnit {
    contract: UnitContract,
    seen: Arc<AtomicU64>,
}

impl ProtocolUnit for RelayUnit {
    fn contract(&self) -> &UnitContract {
        &self.contract
    }

    fn create_handler(&self) -> HandlerRef {
        HandlerRef::for_unit(
            &self.contract,
            Relay {
                seen: self.seen.clone(),
            },
        )
    }
}

fn run_dispatch(depth: usize, events: u64) -> Duration {
    let engine = Engine::spawn(EngineConfig::default()).unwrap();
    let seen = Arc::new(AtomicU64::new(0));
    let units = (0..depth)
        .map(|i| {
            Arc::new(RelayUnit {
                contract: UnitContract::new(format!("relay{i}")).accepts(&BENCH_DATA),
                seen: seen.clone(),
            }) as Arc<dyn ProtocolUnit>
        })
        .collect();
    let pipeline = Pipeline::new("bench", units).unwrap();
    let channel = pipeline.create_channel("bench", engine.handle());
    channel.start().unwrap();
    channel.wait_open(Duration::from_secs(5)).unwrap();
    // Every relay also saw the channel open.
    seen.store(0, Ordering::Relaxed);

    let start = Instant::now();
    for _ in 0..events {
        let mut msg = Message::new();
        msg.push_u32(0);
        Event::sendable(&BENCH_DATA, msg)
            .async_go(&channel, Direction::Up)
            .unwrap();
    }
    engine.handle().wait_idle(Duration::from_secs(60));
    let elapsed = start.elapsed();

    assert_eq!(seen.load(Ordering::Relaxed), events * depth as u64);
    engine.shutdown().unwrap();
    elapsed
}

pub fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_hot_loop");

    for &depth in &[1usize, 4, 8] {
        group.bench_function(BenchmarkId::from_parameter(depth), |b| {
            b.iter_custom(|n| {
                let mut total = Duration::ZERO;
                for _ in 0..n {
                    total += run_dispatch(depth, 10_000);
                }
                total
            });
        });
    }

    group.finish();
}

pub fn bench_codec(c: &mut Criterion) {
    c.bench_function("message_codec", |b| {
        b.iter(|| {
            let mut msg = Message::new();
            msg.push_u64(black_box(42));
            msg.push_f64(black_box(1.5));
            msg.push_string(black_box("header")).unwrap();
            let mut copy = msg.clone();
            black_box(copy.pop_string().unwrap());
            black_box(copy.pop_f64().unwrap());
            black_box(copy.pop_u64().unwrap());
            msg
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(12);
    targets = bench_dispatch, bench_codec
}
criterion_main!(benches);

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use quarry_lanes::{AcquireRing, BackoffPolicy, ReleaseRing, exchange_lanes};
use quarry_net::Transport;
use quarry_perf::{LoopbackTransport, generated_buffer};
use quarry_store::StateStore;
use quarry_wire::{PacketSlotBuffer, UniShape};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use receiver_engine::{Handler, HandlerMetrics, HandlerSettings, Receiver, ReceiverMetrics};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const SLOTS: usize = 64;
const SLOT_SIZE: usize = 1024;

/// Receiver poll followed by handler poll over one lane, validation only.
fn bench_receive_cycle(c: &mut Criterion) {
    let mut rng = SmallRng::seed_from_u64(9);
    let source = generated_buffer(SLOTS, SLOT_SIZE, &UniShape::new(4, 16, 1024), 20, &mut rng);
    let stop = Arc::new(AtomicBool::new(false));
    let (filler, mut drainers) = exchange_lanes(1, 4, |_| PacketSlotBuffer::allocate(SLOTS, SLOT_SIZE));
    let ends = drainers.remove(0);

    let rx = Arc::new(ReceiverMetrics::default());
    let mut receiver = Receiver::new(
        LoopbackTransport::new(source),
        AcquireRing::new(filler.free, BackoffPolicy::RECEIVER, rx.lanes.clone(), stop.clone()),
        ReleaseRing::new(filler.used, rx.lanes.clone()),
        SLOTS,
        rx,
    );
    let hx = Arc::new(HandlerMetrics::default());
    let mut handler: Handler<Box<dyn StateStore>, Box<dyn Transport>> = Handler::new(
        0,
        AcquireRing::new(vec![ends.used], BackoffPolicy::HANDLER, hx.lanes.clone(), stop),
        ReleaseRing::new(vec![ends.free], hx.lanes.clone()),
        HandlerSettings {
            store_percent: 0.0,
            reply_percent: 0.0,
            workload_iterations: 0,
        },
        None,
        None,
        1,
        hx,
    );

    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(SLOTS as u64));
    group.bench_function("receive_handle_64", |b| {
        b.iter(|| {
            receiver.poll();
            handler.poll();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_receive_cycle);
criterion_main!(benches);

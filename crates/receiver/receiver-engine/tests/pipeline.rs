use quarry_core::{NoAffinity, spawn_worker};
use quarry_lanes::{AcquireRing, BackoffPolicy, ReleaseRing, exchange_lanes};
use quarry_net::{Transport, TransportError};
use quarry_store::{StateStore, StoreError};
use quarry_wire::{PacketSlotBuffer, PacketType, Uni, UniShape};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use receiver_config::ReceiverConfig;
use receiver_engine::{
    Handler, HandlerMetrics, HandlerSettings, Poll, ReceivePipeline, Receiver, ReceiverMetrics, ReplyPath,
    SingleThreadReceiver, reply_buffer,
};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

const SLOT_SIZE: usize = 256;
const ENOBUFS: i32 = 105;

/// Each receive call delivers the next scripted batch of packet types.
struct ScriptedTransport {
    batches: VecDeque<Vec<PacketType>>,
    shape: UniShape,
    rng: SmallRng,
}

impl ScriptedTransport {
    fn repeat(batch: Vec<PacketType>, times: usize) -> Self {
        Self {
            batches: std::iter::repeat_n(batch, times).collect(),
            shape: UniShape::new(2, 2, 16),
            rng: SmallRng::seed_from_u64(7),
        }
    }
}

impl Transport for ScriptedTransport {
    fn recv_batch(&mut self, buf: &mut PacketSlotBuffer, max: usize) -> Result<usize, TransportError> {
        let Some(batch) = self.batches.pop_front() else {
            return Ok(0);
        };
        let n = batch.len().min(max);
        for (slot, ty) in batch.into_iter().take(n).enumerate() {
            buf.write_ext_header_template(slot);
            buf.write_packet_data(slot, ty, &self.shape, true, &mut self.rng);
        }
        Ok(n)
    }

    fn send_batch(&mut self, _buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        Ok(count)
    }
}

#[derive(Clone, Default)]
struct RecordingStore {
    saved: Arc<Mutex<Vec<Uni>>>,
}

impl StateStore for RecordingStore {
    fn save(&mut self, uni: &Uni) -> Result<(), StoreError> {
        self.saved.lock().unwrap().push(*uni);
        Ok(())
    }
}

struct FailingStore;

impl StateStore for FailingStore {
    fn save(&mut self, uni: &Uni) -> Result<(), StoreError> {
        Err(StoreError::OutOfRange { uni: *uni })
    }
}

/// Panics on the first save, then records like [`RecordingStore`].
#[derive(Clone, Default)]
struct PanicOnceStore {
    panicked: Arc<AtomicBool>,
    inner: RecordingStore,
}

impl StateStore for PanicOnceStore {
    fn save(&mut self, uni: &Uni) -> Result<(), StoreError> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("state file vanished");
        }
        self.inner.save(uni)
    }
}

enum Step {
    Fail(i32),
    Panic,
    Deliver(Vec<PacketType>),
}

/// Plays a fixed sequence of receive outcomes and notes which buffer each
/// call was handed.
struct SteppedTransport {
    steps: VecDeque<Step>,
    seen: Arc<Mutex<Vec<usize>>>,
    shape: UniShape,
    rng: SmallRng,
}

impl SteppedTransport {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            seen: Arc::default(),
            shape: UniShape::new(2, 2, 16),
            rng: SmallRng::seed_from_u64(11),
        }
    }
}

impl Transport for SteppedTransport {
    fn recv_batch(&mut self, buf: &mut PacketSlotBuffer, max: usize) -> Result<usize, TransportError> {
        self.seen.lock().unwrap().push(buf.as_ptr() as usize);
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Step::Fail(code)) => Err(TransportError::Os { op: "recvmmsg", code }),
            Some(Step::Panic) => panic!("driver fault"),
            Some(Step::Deliver(batch)) => {
                let n = batch.len().min(max);
                for (slot, ty) in batch.into_iter().take(n).enumerate() {
                    buf.write_ext_header_template(slot);
                    buf.write_packet_data(slot, ty, &self.shape, true, &mut self.rng);
                }
                Ok(n)
            }
        }
    }

    fn send_batch(&mut self, _buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        Ok(count)
    }
}

/// Records (type code, length) of every reply sent; optionally fails.
#[derive(Clone, Default)]
struct ReplySink {
    sent: Arc<Mutex<Vec<(u8, i32)>>>,
    calls: Arc<AtomicU64>,
    fail_with: Option<i32>,
}

impl Transport for ReplySink {
    fn recv_batch(&mut self, _buf: &mut PacketSlotBuffer, _max: usize) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn send_batch(&mut self, buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(code) = self.fail_with {
            return Err(TransportError::Os { op: "sendmmsg", code });
        }
        let mut sent = self.sent.lock().unwrap();
        for slot in 0..count {
            sent.push((buf.read_type_code(slot), buf.read_length(slot)));
        }
        Ok(count)
    }
}

struct Rig<R: Transport, S: StateStore, T: Transport> {
    receiver: Receiver<R>,
    handler: Handler<S, T>,
    rx: Arc<ReceiverMetrics>,
    hx: Arc<HandlerMetrics>,
    stop: Arc<AtomicBool>,
}

fn rig<R: Transport, S: StateStore, T: Transport>(
    transport: R,
    settings: HandlerSettings,
    store: Option<S>,
    reply: Option<ReplyPath<T>>,
) -> Rig<R, S, T> {
    rig_with_pool(transport, 4, settings, store, reply)
}

fn rig_with_pool<R: Transport, S: StateStore, T: Transport>(
    transport: R,
    buffers: usize,
    settings: HandlerSettings,
    store: Option<S>,
    reply: Option<ReplyPath<T>>,
) -> Rig<R, S, T> {
    let stop = Arc::new(AtomicBool::new(false));
    let (filler, mut drainers) = exchange_lanes(1, buffers, |_| PacketSlotBuffer::allocate(8, SLOT_SIZE));
    let ends = drainers.remove(0);

    let rx = Arc::new(ReceiverMetrics::default());
    let receiver = Receiver::new(
        transport,
        AcquireRing::new(filler.free, BackoffPolicy::RECEIVER, rx.lanes.clone(), stop.clone()),
        ReleaseRing::new(filler.used, rx.lanes.clone()),
        8,
        rx.clone(),
    );

    let hx = Arc::new(HandlerMetrics::default());
    let handler = Handler::new(
        0,
        AcquireRing::new(vec![ends.used], BackoffPolicy::HANDLER, hx.lanes.clone(), stop.clone()),
        ReleaseRing::new(vec![ends.free], hx.lanes.clone()),
        settings,
        store,
        reply,
        42,
        hx.clone(),
    );
    Rig {
        receiver,
        handler,
        rx,
        hx,
        stop,
    }
}

fn settings(store_percent: f64, reply_percent: f64) -> HandlerSettings {
    with_workload(store_percent, reply_percent, 0)
}

fn with_workload(store_percent: f64, reply_percent: f64, workload_iterations: u64) -> HandlerSettings {
    HandlerSettings {
        store_percent,
        reply_percent,
        workload_iterations,
    }
}

fn reply_path(sink: ReplySink) -> ReplyPath<ReplySink> {
    ReplyPath {
        transport: sink,
        buffer: reply_buffer(8, SLOT_SIZE, &"fd00::2".parse().unwrap()),
    }
}

#[test]
fn thousand_valid_minimal_packets_pass_cleanly() {
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal], 1000);
    let mut r = rig::<_, RecordingStore, ReplySink>(transport, settings(0.0, 0.0), None, None);

    for _ in 0..1000 {
        assert_eq!(r.receiver.poll(), Poll::Received(1));
        assert!(r.handler.poll());
    }

    let rx = r.rx.snapshot();
    let hx = r.hx.snapshot();
    assert_eq!(rx.packets, 1000);
    assert_eq!(rx.iterations, 1000);
    assert_eq!(rx.errors, 0);
    assert_eq!(hx.buffers, 1000);
    assert_eq!(hx.packet_errors, 0);
    assert_eq!(hx.stores, 0);
    assert_eq!(hx.replies, 0);
}

#[test]
fn idle_receive_keeps_the_buffer() {
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal], 0);
    let mut r = rig::<_, RecordingStore, ReplySink>(transport, settings(0.0, 0.0), None, None);
    for _ in 0..10 {
        assert_eq!(r.receiver.poll(), Poll::Idle);
    }
    // One buffer taken on the first poll and held since.
    assert_eq!(r.rx.snapshot().lanes.acquired, 1);
    assert_eq!(r.rx.snapshot().packets, 0);
}

#[test]
fn failed_receive_retries_into_the_same_buffer() {
    let transport = SteppedTransport::new(vec![
        Step::Fail(ENOBUFS),
        Step::Deliver(vec![PacketType::Minimal, PacketType::Attribute]),
    ]);
    let seen = transport.seen.clone();
    let mut r = rig::<_, RecordingStore, ReplySink>(transport, settings(0.0, 0.0), None, None);

    assert_eq!(r.receiver.poll(), Poll::Failed);
    let rx = r.rx.snapshot();
    assert_eq!(rx.errors, 1);
    assert_eq!(rx.last_errno, Some(ENOBUFS));
    assert_eq!(rx.lanes.acquired, 1);
    assert_eq!(rx.packets, 0);

    assert_eq!(r.receiver.poll(), Poll::Received(2));
    let rx = r.rx.snapshot();
    assert_eq!(rx.errors, 1);
    assert_eq!(rx.packets, 2);
    assert_eq!(rx.lanes.acquired, 1);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);

    assert!(r.handler.poll());
    let hx = r.hx.snapshot();
    assert_eq!(hx.buffers, 1);
    assert_eq!(hx.packet_errors, 0);
}

#[test]
fn receiver_keeps_its_buffer_across_a_transport_panic() {
    let transport = SteppedTransport::new(vec![Step::Panic, Step::Deliver(vec![PacketType::Minimal])]);
    let seen = transport.seen.clone();
    let mut r = rig_with_pool::<_, RecordingStore, ReplySink>(transport, 1, settings(0.0, 0.0), None, None);

    assert!(catch_unwind(AssertUnwindSafe(|| r.receiver.poll())).is_err());
    assert_eq!(r.receiver.poll(), Poll::Received(1));
    assert_eq!(r.rx.snapshot().lanes.acquired, 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], seen[1]);

    assert!(r.handler.poll());
    assert_eq!(r.hx.snapshot().buffers, 1);
}

#[test]
fn handler_panic_returns_its_buffer_to_the_pool() {
    let store = PanicOnceStore::default();
    let saved = store.inner.saved.clone();
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal], 2);
    let Rig {
        mut receiver,
        handler,
        rx,
        hx,
        stop,
    } = rig_with_pool::<_, _, ReplySink>(transport, 1, settings(100.0, 0.0), Some(store), None);

    // The only buffer goes to the handler, whose first save panics.
    assert_eq!(receiver.poll(), Poll::Received(1));
    let worker = spawn_worker(handler, 0, Arc::new(NoAffinity), stop.clone()).unwrap();

    // A lost buffer would leave the receiver waiting forever; bound it.
    let (done, watchdog) = mpsc::channel::<()>();
    let guard_stop = stop.clone();
    let guard = std::thread::spawn(move || {
        if watchdog.recv_timeout(Duration::from_secs(10)).is_err() {
            guard_stop.store(true, Ordering::Release);
        }
    });

    assert_eq!(receiver.poll(), Poll::Received(1));
    let deadline = Instant::now() + Duration::from_secs(10);
    while hx.snapshot().buffers < 2 {
        assert!(Instant::now() < deadline, "second buffer never handled");
        std::thread::sleep(Duration::from_millis(2));
    }
    let _ = done.send(());
    guard.join().unwrap();
    stop.store(true, Ordering::Release);
    worker.join().unwrap();

    assert_eq!(rx.snapshot().lanes.acquired, 2);
    let hx = hx.snapshot();
    assert_eq!(hx.buffers, 2);
    assert_eq!(hx.stores, 1);
    assert_eq!(saved.lock().unwrap().len(), 1);
}

#[test]
fn workload_runs_once_per_reply() {
    let sink = ReplySink::default();
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal, PacketType::Error, PacketType::Attribute], 4);
    let mut r = rig::<_, RecordingStore, _>(transport, with_workload(0.0, 100.0, 1000), None, Some(reply_path(sink)));

    for _ in 0..4 {
        assert_eq!(r.receiver.poll(), Poll::Received(3));
        assert!(r.handler.poll());
    }
    let hx = r.hx.snapshot();
    assert_eq!(hx.replies, 8);
    assert_eq!(hx.workloads, hx.replies);
    assert_eq!(r.handler.accumulator(), 499_500);
}

#[test]
fn workload_is_skipped_without_replies() {
    let sink = ReplySink::default();
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal; 4], 4);
    let mut r = rig::<_, RecordingStore, _>(transport, with_workload(0.0, 0.0, 1000), None, Some(reply_path(sink)));

    for _ in 0..4 {
        assert_eq!(r.receiver.poll(), Poll::Received(4));
        assert!(r.handler.poll());
    }
    let hx = r.hx.snapshot();
    assert_eq!(hx.replies, 0);
    assert_eq!(hx.workloads, 0);
    assert_eq!(r.handler.accumulator(), 0);
}

#[test]
fn error_packet_is_counted_and_never_stored_or_answered() {
    let store = RecordingStore::default();
    let sink = ReplySink::default();
    let transport = ScriptedTransport::repeat(vec![PacketType::Error], 1);
    let mut r = rig(transport, settings(100.0, 100.0), Some(store.clone()), Some(reply_path(sink.clone())));

    assert_eq!(r.receiver.poll(), Poll::Received(1));
    assert!(r.handler.poll());

    let hx = r.hx.snapshot();
    assert_eq!(hx.packet_errors, 1);
    assert_eq!(hx.stores, 0);
    assert_eq!(hx.replies, 0);
    assert!(store.saved.lock().unwrap().is_empty());
    assert_eq!(sink.calls.load(Ordering::Relaxed), 0);
}

#[test]
fn full_store_and_reply_percentages_hit_every_valid_packet() {
    let store = RecordingStore::default();
    let sink = ReplySink::default();
    let batch = vec![PacketType::Minimal, PacketType::Attribute, PacketType::AttributeGroup, PacketType::Error];
    let transport = ScriptedTransport::repeat(batch, 5);
    let mut r = rig(transport, settings(100.0, 100.0), Some(store.clone()), Some(reply_path(sink.clone())));

    for _ in 0..5 {
        assert_eq!(r.receiver.poll(), Poll::Received(4));
        assert!(r.handler.poll());
    }

    let hx = r.hx.snapshot();
    assert_eq!(hx.packet_errors, 5);
    assert_eq!(hx.stores, 15);
    assert_eq!(hx.replies, 15);
    assert_eq!(store.saved.lock().unwrap().len(), 15);
    // One send per buffer, replies echo type and canonical length.
    assert_eq!(sink.calls.load(Ordering::Relaxed), 5);
    let sent = sink.sent.lock().unwrap();
    assert_eq!(&sent[..3], &[(1, 32), (2, 48), (3, 96)]);
    for uni in store.saved.lock().unwrap().iter() {
        assert_eq!(uni.0[0], 0xFC);
    }
}

#[test]
fn zero_percentages_never_touch_store_or_reply() {
    let store = RecordingStore::default();
    let sink = ReplySink::default();
    let transport = ScriptedTransport::repeat(vec![PacketType::Attribute; 8], 50);
    let mut r = rig(transport, settings(0.0, 0.0), Some(store.clone()), Some(reply_path(sink.clone())));

    for _ in 0..50 {
        r.receiver.poll();
        r.handler.poll();
    }
    assert_eq!(r.hx.snapshot().stores, 0);
    assert!(store.saved.lock().unwrap().is_empty());
    assert_eq!(sink.calls.load(Ordering::Relaxed), 0);
}

#[test]
fn store_failures_are_counted_and_processing_continues() {
    let sink = ReplySink::default();
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal; 4], 3);
    let mut r = rig(transport, settings(100.0, 100.0), Some(FailingStore), Some(reply_path(sink.clone())));

    for _ in 0..3 {
        r.receiver.poll();
        r.handler.poll();
    }
    let hx = r.hx.snapshot();
    assert_eq!(hx.stores, 12);
    assert_eq!(hx.store_errors, 12);
    assert_eq!(hx.replies, 12);
    assert_eq!(sink.sent.lock().unwrap().len(), 12);
}

#[test]
fn reply_send_failure_records_errno() {
    let sink = ReplySink {
        fail_with: Some(ENOBUFS),
        ..ReplySink::default()
    };
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal; 2], 2);
    let mut r = rig::<_, RecordingStore, _>(transport, settings(0.0, 100.0), None, Some(reply_path(sink.clone())));

    for _ in 0..2 {
        r.receiver.poll();
        r.handler.poll();
    }
    let hx = r.hx.snapshot();
    assert_eq!(hx.replies, 4);
    assert_eq!(hx.tx_errors, 2);
    assert_eq!(hx.tx_errno, Some(ENOBUFS));
}

#[test]
fn single_thread_receiver_counts_malformed_packets() {
    let batch = vec![PacketType::Minimal, PacketType::Error, PacketType::Attribute];
    let transport = ScriptedTransport::repeat(batch, 10);
    let metrics = Arc::new(ReceiverMetrics::default());
    let mut rx = SingleThreadReceiver::new(transport, PacketSlotBuffer::allocate(8, SLOT_SIZE), 8, metrics.clone());

    let mut total = 0;
    for _ in 0..12 {
        total += rx.poll();
    }
    assert_eq!(total, 30);
    let snap = metrics.snapshot();
    assert_eq!(snap.packets, 30);
    assert_eq!(snap.iterations, 10);
    assert_eq!(snap.packet_errors, 10);
}

#[test]
fn threaded_pipeline_drains_every_packet() {
    let cfg = ReceiverConfig {
        handler_threads: 3,
        buffers_per_lane: 4,
        slots_per_buffer: 8,
        slot_size: SLOT_SIZE,
        max_batch: 8,
        store_percent: 50.0,
        ..ReceiverConfig::default()
    };
    cfg.validate().unwrap();

    let saved = Arc::new(Mutex::new(Vec::new()));
    let store_log = saved.clone();
    let transport = ScriptedTransport::repeat(vec![PacketType::Minimal; 8], 625);
    let mut pipeline = ReceivePipeline::start(
        &cfg,
        transport,
        move |_lane| -> Result<Box<dyn StateStore>, StoreError> {
            Ok(Box::new(RecordingStore {
                saved: store_log.clone(),
            }))
        },
        |_lane| -> Result<Box<dyn Transport>, TransportError> { panic!("replies are disabled") },
        Arc::new(NoAffinity),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let rx = pipeline.receiver_metrics().snapshot();
        let buffers: u64 = pipeline.handler_metrics().iter().map(|h| h.snapshot().buffers).sum();
        if rx.packets == 5000 && buffers == rx.iterations {
            break;
        }
        assert!(Instant::now() < deadline, "pipeline stalled: {rx:?}, {buffers} buffers handled");
        std::thread::sleep(Duration::from_millis(5));
    }
    pipeline.shutdown();

    let handlers = pipeline.take_handlers();
    assert_eq!(handlers.buffers, 625);
    assert_eq!(handlers.packet_errors, 0);
    assert_eq!(handlers.store_errors, 0);
    assert_eq!(handlers.stores, saved.lock().unwrap().len() as u64);
    assert!(handlers.stores > 0 && handlers.stores < 5000);
}

use quarry_core::{Clock, MonotonicClock, NoAffinity};
use quarry_lanes::{AcquireRing, BackoffPolicy, ReleaseRing, exchange_lanes};
use quarry_net::{Transport, TransportError};
use quarry_perf::report::{handler_bottleneck, print_receive_report, print_send_report, stage_results};
use quarry_perf::*;
use quarry_store::{MmapStateStore, StateStore, StoreError, StoreOptions};
use quarry_wire::{PacketSlotBuffer, UniShape};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use receiver_engine::{
    Handler, HandlerMetrics, HandlerSettings, ReceivePipeline, Receiver, ReceiverMetrics, ReplyPath, reply_buffer,
};
use sender_engine::{DistributionTable, Sender, SenderMetrics, SenderSettings};
use std::hint::black_box;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

const SLOT_SIZE: usize = 1024;
const SLOTS: usize = 64;
const SHAPE: UniShape = UniShape::new(4, 16, 1024);

fn main() {
    let rusage_start = capture_rusage();
    let host = host_info();
    let mut results: Vec<BenchResult> = Vec::new();

    print_banner(&host);
    section_clock(&mut results);
    section_codec(&mut results);
    section_receive_path(&mut results);
    let throughput = section_pipeline_throughput();
    section_send_path(&mut results);

    let rusage_end = capture_rusage();
    section_resources(&rusage_start, &rusage_end);
    save_results(&results, &host, throughput, &rusage_start, &rusage_end);
}

fn print_banner(host: &HostInfo) {
    let bar = "\u{2550}".repeat(90);
    println!("\n{bar}");
    println!("  QUARRY PERFORMANCE REPORT");
    println!("  codec micro + in-process receive/send paths + threaded pipeline");
    println!("{bar}\n");
    println!("  CPU:        {}  ({} cores)", host.cpu_model, host.ncpu);
    if host.l1d_bytes > 0 {
        println!("  L1 Data:    {} / core", format_bytes(host.l1d_bytes));
    }
    if host.l2_bytes > 0 {
        println!("  L2:         {}", format_bytes(host.l2_bytes));
    }
    println!("  Cache line: {} B", host.line_size);
    println!(
        "  Buffer:     {} slots x {} B = {}",
        SLOTS,
        SLOT_SIZE,
        format_bytes((SLOTS * SLOT_SIZE) as u64)
    );
}

fn section_clock(results: &mut Vec<BenchResult>) {
    section_header("CLOCK CALIBRATION");
    print_table_header();

    let clock = MonotonicClock;
    let r = measure_batched("MonotonicClock::now_ns", 1000, 10_000, 100, || {
        black_box(clock.now_ns());
    });
    print_result_row(&r);
    results.push(r);

    let r = measure_batched("Instant::now", 1000, 10_000, 100, || {
        black_box(Instant::now());
    });
    print_result_row(&r);
    results.push(r);
}

fn section_codec(results: &mut Vec<BenchResult>) {
    section_header("PACKET CODEC");
    print_table_header();

    let mut rng = SmallRng::seed_from_u64(11);
    let mut buf = generated_buffer(SLOTS, SLOT_SIZE, &SHAPE, 10, &mut rng);

    let mut slot = 0;
    let r = measure_batched("validate", 1000, 10_000, 100, || {
        black_box(buf.validate(slot % SLOTS));
        slot += 1;
    });
    print_result_row(&r);
    results.push(r);

    let mut slot = 0;
    let r = measure_batched("read_uni + node_index", 1000, 10_000, 100, || {
        let uni = buf.read_uni(slot % SLOTS);
        black_box(SHAPE.node_index(&uni));
        slot += 1;
    });
    print_result_row(&r);
    results.push(r);

    let table = match DistributionTable::new([70, 20, 5, 5]) {
        Ok(t) => t,
        Err(e) => panic!("bad distribution: {e}"),
    };
    let r = measure_batched("distribution draw", 1000, 10_000, 100, || {
        black_box(table.draw(&mut rng));
    });
    print_result_row(&r);
    results.push(r);

    let mut slot = 0;
    let r = measure_batched("draw + write_packet_data", 1000, 10_000, 100, || {
        let (ty, ok) = table.draw(&mut rng);
        buf.write_packet_data(slot % SLOTS, ty, &SHAPE, ok, &mut rng);
        slot += 1;
    });
    print_result_row(&r);
    results.push(r);
}

fn temp_store_root() -> PathBuf {
    std::env::temp_dir().join(format!("quarry_perf_{}", std::process::id()))
}

fn section_receive_path(results: &mut Vec<BenchResult>) {
    section_header("RECEIVE PATH (in-process, one lane)");

    let stop = Arc::new(AtomicBool::new(false));
    let mut rng = SmallRng::seed_from_u64(21);
    let source = generated_buffer(SLOTS, SLOT_SIZE, &SHAPE, 20, &mut rng);

    let (filler, mut drainers) = exchange_lanes(1, 8, |_| PacketSlotBuffer::allocate(SLOTS, SLOT_SIZE));
    let ends = drainers.remove(0);
    let rx = Arc::new(ReceiverMetrics::default());
    let mut receiver = Receiver::new(
        LoopbackTransport::new(source),
        AcquireRing::new(filler.free, BackoffPolicy::RECEIVER, rx.lanes.clone(), stop.clone()),
        ReleaseRing::new(filler.used, rx.lanes.clone()),
        SLOTS,
        rx.clone(),
    );

    let root = temp_store_root();
    let store = StoreOptions {
        root: root.clone(),
        file: "state.dat".into(),
        state_size: 256,
        shape: SHAPE,
        sync: false,
    };
    let store = match MmapStateStore::open(&store, 0) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("  [skipping receive path: {e}]");
            return;
        }
    };
    let hx = Arc::new(HandlerMetrics::default());
    let mut handler = Handler::new(
        0,
        AcquireRing::new(vec![ends.used], BackoffPolicy::HANDLER, hx.lanes.clone(), stop),
        ReleaseRing::new(vec![ends.free], hx.lanes.clone()),
        HandlerSettings {
            store_percent: 10.0,
            reply_percent: 10.0,
            workload_iterations: 100,
        },
        Some(store),
        Some(ReplyPath {
            transport: LoopbackTransport::new(PacketSlotBuffer::allocate(1, SLOT_SIZE)),
            buffer: reply_buffer(SLOTS, SLOT_SIZE, &Ipv6Addr::LOCALHOST),
        }),
        7,
        hx.clone(),
    );

    let iterations = 20_000;
    let start = Instant::now();
    for _ in 0..iterations {
        receiver.poll();
        handler.poll();
    }
    let elapsed = start.elapsed();

    let rxs = rx.snapshot();
    let hxs = hx.snapshot();
    println!(
        "  {} packets in {:.2?} ({}), packet errors {}, stores {}, replies {}",
        rxs.packets,
        elapsed,
        format_rate(rxs.packets as f64 / elapsed.as_secs_f64()),
        hxs.packet_errors,
        hxs.stores,
        hxs.replies
    );

    print_receive_report(receiver.recorder(), handler.recorder());
    if let Some((stage, pct)) = handler_bottleneck(handler.recorder()) {
        println!("\n  -> handler bottleneck: {stage} ({pct:.0}% of a buffer pass at p50)");
    }
    results.extend(stage_results("receiver", receiver.recorder()));
    results.extend(stage_results("handler", handler.recorder()));

    drop(handler);
    let _ = std::fs::remove_dir_all(&root);
}

/// Threaded receive pipeline fed from memory for one second.
fn section_pipeline_throughput() -> f64 {
    section_header("THREADED RECEIVE PIPELINE (loopback source, 1 s)");

    let mut rng = SmallRng::seed_from_u64(31);
    let source = generated_buffer(SLOTS, SLOT_SIZE, &SHAPE, 0, &mut rng);
    let cfg = receiver_config_for_perf();

    let pipeline = ReceivePipeline::start(
        &cfg,
        LoopbackTransport::new(source),
        |_| -> Result<Box<dyn StateStore>, StoreError> { unreachable!("store disabled") },
        |_| -> Result<Box<dyn Transport>, TransportError> { unreachable!("replies disabled") },
        Arc::new(NoAffinity),
    );
    let mut pipeline = match pipeline {
        Ok(p) => p,
        Err(e) => {
            eprintln!("  [pipeline failed to start: {e}]");
            return 0.0;
        }
    };

    let window = Duration::from_secs(1);
    std::thread::sleep(window);
    let rx = pipeline.take_receiver();
    let handlers = pipeline.take_handlers();
    pipeline.shutdown();

    let pps = rx.packets as f64 / window.as_secs_f64();
    println!("  handlers:           {}", cfg.handler_threads);
    println!("  receive rate:       {}", format_rate(pps));
    println!("  buffers handled:    {}", handlers.buffers);
    println!("  no free buffer:     {}", rx.lanes.empty);
    println!("  receiver long wait: {}", rx.lanes.long_waits);
    println!("  handler long wait:  {}", handlers.lanes.long_waits);
    pps
}

fn receiver_config_for_perf() -> receiver_config::ReceiverConfig {
    receiver_config::ReceiverConfig {
        handler_threads: 2,
        buffers_per_lane: 16,
        slots_per_buffer: SLOTS,
        slot_size: SLOT_SIZE,
        max_batch: SLOTS,
        ..Default::default()
    }
}

fn section_send_path(results: &mut Vec<BenchResult>) {
    section_header("SEND PATH (in-process, loopback transport)");

    let table = match DistributionTable::new([70, 20, 5, 5]) {
        Ok(t) => t,
        Err(e) => panic!("bad distribution: {e}"),
    };
    let metrics = Arc::new(SenderMetrics::default());
    let mut sender = Sender::new(
        0,
        LoopbackTransport::new(PacketSlotBuffer::allocate(1, SLOT_SIZE)),
        PacketSlotBuffer::allocate(16, SLOT_SIZE),
        SenderSettings {
            destination: Ipv6Addr::LOCALHOST,
            table,
            shape: SHAPE,
            batch: 16,
            packets: 1_600_000,
            pps: -1,
        },
        5,
        metrics.clone(),
    );

    let start = Instant::now();
    while sender.step() != sender_engine::Step::Done {}
    let elapsed = start.elapsed();
    let sent = metrics.snapshot().packets;
    println!(
        "  {} packets in {:.2?} ({})",
        sent,
        elapsed,
        format_rate(sent as f64 / elapsed.as_secs_f64())
    );

    print_send_report(sender.recorder());
    results.extend(stage_results("sender", sender.recorder()));
}

fn section_resources(start: &ResourceSnapshot, end: &ResourceSnapshot) {
    section_header("RESOURCE USAGE");
    println!("  Peak RSS:                 {}", format_bytes(end.max_rss_bytes as u64));
    println!("  Minor page faults:        {}", end.minor_faults - start.minor_faults);
    println!("  Major page faults:        {}", end.major_faults - start.major_faults);
    println!("  Voluntary ctx switches:   {}", end.vol_ctx_switches - start.vol_ctx_switches);
    println!("  Involuntary ctx switches: {}", end.invol_ctx_switches - start.invol_ctx_switches);
    println!("  User CPU time:            {:.3}s", (end.user_time_us - start.user_time_us) as f64 / 1e6);
    println!("  System CPU time:          {:.3}s", (end.sys_time_us - start.sys_time_us) as f64 / 1e6);
}

fn save_results(
    results: &[BenchResult],
    host: &HostInfo,
    pipeline_pps: f64,
    rusage_start: &ResourceSnapshot,
    rusage_end: &ResourceSnapshot,
) {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let results_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/results");
    let _ = std::fs::create_dir_all(results_dir);
    let json_path = format!("{results_dir}/{timestamp}_report.json");

    let output = serde_json::json!({
        "timestamp": timestamp,
        "host": host,
        "benchmarks": results,
        "pipeline_pps": pipeline_pps,
        "resources": { "start": rusage_start, "end": rusage_end },
    });

    let written = serde_json::to_string_pretty(&output)
        .map_err(std::io::Error::other)
        .and_then(|json| std::fs::write(&json_path, json));
    match written {
        Ok(()) => println!("\n  Results saved to: {json_path}\n"),
        Err(e) => eprintln!("\n  [failed to save results: {e}]\n"),
    }
}

//! Receives the synthetic protocol on a raw IPv6 socket and hands batches to
//! handler threads that validate, store and reply.

use anyhow::{Context, Result, bail};
use clap::Parser;
use quarry_core::{AffinitySetter, CpuAffinity, spawn_worker};
use quarry_net::{RawSocket6, Transport, TransportError};
use quarry_store::{MmapStateStore, StateStore, StoreError, StoreOptions};
use quarry_wire::PacketSlotBuffer;
use receiver_config::ReceiverConfig;
use receiver_engine::{ReceivePipeline, ReceiverMetrics, ReceiverSnapshot, SingleThreadReceiver};
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "receiver", about = "Receives and handles synthetic IPv6 protocol traffic")]
struct Args {
    /// TOML configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Datagrams per receive call.
    #[arg(long)]
    mmsg: Option<usize>,
    #[arg(long)]
    handlers: Option<usize>,
    #[arg(long)]
    receiver_cpu: Option<usize>,
    /// Handler CPUs, e.g. "2,3,4".
    #[arg(long, value_delimiter = ',')]
    handler_cpus: Option<Vec<usize>>,

    /// Percent of valid packets persisted to the state store.
    #[arg(long)]
    store: Option<f64>,
    /// Percent of valid packets answered.
    #[arg(long)]
    reply: Option<f64>,
    #[arg(long)]
    reply_address: Option<Ipv6Addr>,
    /// Busy-loop iterations per reply.
    #[arg(long)]
    workload: Option<u64>,

    #[arg(long)]
    uni_volumes: Option<u32>,
    #[arg(long)]
    uni_segments: Option<u32>,
    #[arg(long)]
    uni_addresses: Option<u32>,

    #[arg(long)]
    store_root: Option<PathBuf>,
    #[arg(long)]
    store_file: Option<String>,
    #[arg(long)]
    state_size: Option<usize>,

    #[arg(long)]
    stats_period_ms: Option<u64>,
    /// Receive and validate on one thread, no handlers.
    #[arg(long)]
    single_thread: bool,
    /// Log every received slot.
    #[arg(long)]
    dump: bool,
    /// Stop after this many seconds instead of running until killed.
    #[arg(long)]
    run_for_secs: Option<u64>,
}

impl Args {
    fn apply(&self, cfg: &mut ReceiverConfig) {
        if let Some(v) = self.mmsg {
            cfg.max_batch = v;
        }
        if let Some(v) = self.handlers {
            cfg.handler_threads = v;
        }
        if let Some(v) = self.receiver_cpu {
            cfg.receiver_cpu = v;
        }
        if let Some(v) = &self.handler_cpus {
            cfg.handler_cpus = v.clone();
        }
        if let Some(v) = self.store {
            cfg.store_percent = v;
        }
        if let Some(v) = self.reply {
            cfg.reply_percent = v;
        }
        if self.reply_address.is_some() {
            cfg.reply_address = self.reply_address;
        }
        if let Some(v) = self.workload {
            cfg.workload_iterations = v;
        }
        if let Some(v) = self.uni_volumes {
            cfg.uni_volumes = v;
        }
        if let Some(v) = self.uni_segments {
            cfg.uni_segments = v;
        }
        if let Some(v) = self.uni_addresses {
            cfg.uni_addresses = v;
        }
        if let Some(v) = &self.store_root {
            cfg.store.root = v.clone();
        }
        if let Some(v) = &self.store_file {
            cfg.store.file = v.clone();
        }
        if let Some(v) = self.state_size {
            cfg.store.state_size = v;
        }
        if let Some(v) = self.stats_period_ms {
            cfg.stats_period_ms = v;
        }
        cfg.single_thread |= self.single_thread;
        cfg.dump |= self.dump;
    }
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(env_filter).with_thread_names(true).try_init();
}

fn receive_socket(cfg: &ReceiverConfig) -> Result<RawSocket6> {
    let socket = RawSocket6::open(cfg.protocol, cfg.max_batch).context("opening receive socket")?;
    if let Some(bytes) = cfg.receive_buffer_bytes {
        socket.set_receive_buffer_size(bytes)?;
    }
    socket.set_receive_timeout(Duration::from_millis(cfg.receive_timeout_ms))?;
    Ok(socket)
}

/// Reply sockets only send; their receive buffer is shrunk to nothing.
fn reply_socket(cfg: &ReceiverConfig) -> Result<Box<dyn Transport>, TransportError> {
    let socket = RawSocket6::open(cfg.protocol, cfg.slots_per_buffer)?;
    socket.set_receive_buffer_size(0)?;
    if let Some(bytes) = cfg.send_buffer_bytes {
        socket.set_send_buffer_size(bytes)?;
    }
    Ok(Box::new(socket))
}

fn per_sec(count: u64, elapsed: Duration) -> u64 {
    let ms = elapsed.as_millis().max(1) as u64;
    count * 1000 / ms
}

fn log_receiver(rx: &ReceiverSnapshot, elapsed: Duration) {
    info!(
        pps = per_sec(rx.packets, elapsed),
        packets = rx.packets,
        iterations = rx.iterations,
        errors = rx.errors,
        last_errno = ?rx.last_errno,
        packet_errors = rx.packet_errors,
        no_free = rx.lanes.empty,
        long_waits = rx.lanes.long_waits,
        overflows = rx.lanes.overflows,
        "receiver"
    );
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => ReceiverConfig::load(path.display().to_string())
            .with_context(|| format!("loading {}", path.display()))?,
        None => ReceiverConfig::default(),
    };
    args.apply(&mut cfg);
    init_tracing(&cfg.log_level);
    cfg.validate().context("invalid receiver configuration")?;
    info!(?cfg, "receiver starting");

    let affinity: Arc<dyn AffinitySetter> = Arc::new(CpuAffinity);
    let period = Duration::from_millis(cfg.stats_period_ms.max(1));
    let deadline = args.run_for_secs.map(|s| Instant::now() + Duration::from_secs(s));
    let expired = || deadline.is_some_and(|d| Instant::now() >= d);

    if cfg.single_thread {
        let metrics = Arc::new(ReceiverMetrics::default());
        let worker = SingleThreadReceiver::new(
            receive_socket(&cfg)?,
            PacketSlotBuffer::allocate(cfg.slots_per_buffer, cfg.slot_size),
            cfg.max_batch,
            metrics.clone(),
        )
        .with_dump(cfg.dump);
        let stop = Arc::new(AtomicBool::new(false));
        let thread = spawn_worker(worker, cfg.receiver_cpu, affinity, stop.clone())?;

        let mut last = Instant::now();
        while !expired() {
            std::thread::sleep(period);
            let elapsed = last.elapsed();
            last = Instant::now();
            log_receiver(&metrics.take(), elapsed);
        }
        stop.store(true, Ordering::Release);
        if thread.join().is_err() {
            bail!("receiver thread panicked");
        }
        return Ok(());
    }

    let store_opts = StoreOptions {
        root: cfg.store.root.clone(),
        file: cfg.store.file.clone(),
        state_size: cfg.store.state_size,
        shape: cfg.uni_shape(),
        sync: cfg.store.sync,
    };
    let mut pipeline = ReceivePipeline::start(
        &cfg,
        receive_socket(&cfg)?,
        |lane| -> Result<Box<dyn StateStore>, StoreError> { Ok(Box::new(MmapStateStore::open(&store_opts, lane)?)) },
        |_lane| reply_socket(&cfg),
        affinity,
    )
    .context("starting receive pipeline")?;

    let mut last = Instant::now();
    while !expired() {
        std::thread::sleep(period);
        let elapsed = last.elapsed();
        last = Instant::now();
        log_receiver(&pipeline.take_receiver(), elapsed);
        for (lane, h) in pipeline.handler_metrics().iter().enumerate() {
            let h = h.take();
            info!(
                lane,
                buffers = h.buffers,
                packet_errors = h.packet_errors,
                stores = h.stores,
                store_errors = h.store_errors,
                replies = h.replies,
                reply_pps = per_sec(h.replies, elapsed),
                workloads = h.workloads,
                tx_errors = h.tx_errors,
                tx_errno = ?h.tx_errno,
                no_used = h.lanes.empty,
                long_waits = h.lanes.long_waits,
                "handler"
            );
        }
    }
    pipeline.shutdown();
    info!("receiver stopped");
    Ok(())
}

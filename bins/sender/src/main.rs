//! Generates synthetic protocol traffic with a weighted type mix at a
//! target rate.

use anyhow::{Context, Result};
use clap::Parser;
use quarry_core::{AffinitySetter, CpuAffinity};
use quarry_net::{DumpTransport, RawSocket6, Transport, TransportError};
use sender_config::{SenderConfig, parse_distribution};
use sender_engine::SendPipeline;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "sender", about = "Produces synthetic IPv6 protocol load")]
struct Args {
    /// Destination address.
    destination: Option<Ipv6Addr>,

    /// TOML configuration; flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Type mix MINIMAL:ATTRIBUTE:ATTRIBUTE_GROUP:ERROR, summing to 100.
    #[arg(long)]
    types: Option<String>,
    /// Total packets to send, -1 for unbounded.
    #[arg(long, allow_hyphen_values = true)]
    packets: Option<i64>,
    /// Target packets per second across all senders, -1 for unpaced.
    #[arg(long, allow_hyphen_values = true)]
    pps: Option<i64>,
    #[arg(long)]
    threads: Option<usize>,
    /// Datagrams per send call.
    #[arg(long)]
    mmsg: Option<usize>,
    #[arg(long, value_delimiter = ',')]
    sender_cpus: Option<Vec<usize>>,

    #[arg(long)]
    uni_volumes: Option<u32>,
    #[arg(long)]
    uni_segments: Option<u32>,
    #[arg(long)]
    uni_addresses: Option<u32>,

    #[arg(long)]
    stats_period_ms: Option<u64>,
    /// Log packets instead of sending them.
    #[arg(long)]
    dump: bool,
}

impl Args {
    fn apply(&self, cfg: &mut SenderConfig) -> Result<()> {
        if self.destination.is_some() {
            cfg.destination = self.destination;
        }
        if let Some(types) = &self.types {
            cfg.distribution = parse_distribution(types)?;
        }
        if let Some(v) = self.packets {
            cfg.packets = v;
        }
        if let Some(v) = self.pps {
            cfg.pps = v;
        }
        if let Some(v) = self.threads {
            cfg.threads = v;
        }
        if let Some(v) = self.mmsg {
            cfg.batch = v;
        }
        if let Some(v) = &self.sender_cpus {
            cfg.sender_cpus = v.clone();
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
        if let Some(v) = self.stats_period_ms {
            cfg.stats_period_ms = v;
        }
        cfg.dump |= self.dump;
        Ok(())
    }
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(env_filter).with_thread_names(true).try_init();
}

fn open_transport(cfg: &SenderConfig) -> Result<Box<dyn Transport>, TransportError> {
    if cfg.dump {
        return Ok(Box::new(DumpTransport::default()));
    }
    let socket = RawSocket6::open(cfg.protocol, cfg.batch)?;
    if let Some(bytes) = cfg.send_buffer_bytes {
        socket.set_send_buffer_size(bytes)?;
    }
    Ok(Box::new(socket))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => SenderConfig::load(path.display().to_string())
            .with_context(|| format!("loading {}", path.display()))?,
        None => SenderConfig::default(),
    };
    args.apply(&mut cfg)?;
    init_tracing(&cfg.log_level);
    cfg.validate().context("invalid sender configuration")?;
    info!(?cfg, "sender starting");

    let affinity: Arc<dyn AffinitySetter> = Arc::new(CpuAffinity);
    let mut pipeline =
        SendPipeline::start(&cfg, |_id| open_transport(&cfg), affinity).context("starting senders")?;

    // Short polling step so a finished run exits promptly.
    let period = Duration::from_millis(cfg.stats_period_ms.max(1));
    let mut last = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(100).min(period));
        let finished = pipeline.is_finished();
        if last.elapsed() < period && !finished {
            continue;
        }
        let elapsed_ms = last.elapsed().as_millis().max(1) as u64;
        last = Instant::now();

        let snaps = pipeline.take();
        let total: u64 = snaps.iter().map(|s| s.packets).sum();
        info!(pps = total * 1000 / elapsed_ms, packets = total, "senders");
        for ((id, s), running) in snaps.iter().enumerate().zip(pipeline.running()) {
            info!(
                sender = id,
                running,
                pps = s.packets * 1000 / elapsed_ms,
                batches = s.batches,
                errors = s.errors,
                last_errno = ?s.last_errno,
                "sender"
            );
        }
        if finished {
            break;
        }
    }
    pipeline.join();
    info!("all senders finished");
    Ok(())
}

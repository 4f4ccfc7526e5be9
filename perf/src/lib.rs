pub mod report;

use quarry_net::{Transport, TransportError};
use quarry_wire::{PacketSlotBuffer, PacketType, UniShape};
use rand::Rng;
use std::time::Instant;

// ─── Statistics ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BenchResult {
    pub name: String,
    pub unit: String,
    pub stats: Stats,
}

/// Sorts `samples` in place. Returns `None` for an empty slice.
pub fn compute_stats(samples: &mut [u64]) -> Option<Stats> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();

    let count = samples.len();
    let mean = samples.iter().sum::<u64>() as f64 / count as f64;
    let variance = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;

    Some(Stats {
        min: samples[0],
        max: samples[count - 1],
        mean,
        stddev: variance.sqrt(),
        p50: percentile_sorted(samples, 50.0),
        p90: percentile_sorted(samples, 90.0),
        p99: percentile_sorted(samples, 99.0),
        p999: percentile_sorted(samples, 99.9),
        count,
    })
}

/// Nearest-rank percentile of an ascending, non-empty slice.
pub fn percentile_sorted(sorted: &[u64], pct: f64) -> u64 {
    let len = sorted.len();
    let rank = (pct / 100.0 * len as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(len - 1)]
}

// ─── Measurement ────────────────────────────────────────────────────────────

/// Times `batches` runs of `batch_size` calls and reports the per-call cost.
pub fn measure_batched<F: FnMut()>(name: &str, batches: usize, batch_size: usize, warmup: usize, mut f: F) -> BenchResult {
    for _ in 0..warmup * batch_size {
        f();
    }

    let mut samples = Vec::with_capacity(batches);
    for _ in 0..batches {
        let start = Instant::now();
        for _ in 0..batch_size {
            f();
        }
        let total = start.elapsed().as_nanos();
        let per_op = ((total + (batch_size as u128 / 2)) / batch_size as u128) as u64;
        samples.push(per_op.max(1));
    }

    BenchResult {
        name: name.to_string(),
        unit: "ns/op".to_string(),
        stats: compute_stats(&mut samples).unwrap_or_else(|| unreachable!("batches > 0")),
    }
}

// ─── Host ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize)]
pub struct HostInfo {
    pub cpu_model: String,
    pub ncpu: u64,
    pub l1d_bytes: u64,
    pub l2_bytes: u64,
    pub line_size: u64,
}

pub fn host_info() -> HostInfo {
    HostInfo {
        cpu_model: cpu_model().unwrap_or_else(|| "unknown".into()),
        ncpu: std::thread::available_parallelism().map(|n| n.get() as u64).unwrap_or(0),
        l1d_bytes: sysconf(libc::_SC_LEVEL1_DCACHE_SIZE),
        l2_bytes: sysconf(libc::_SC_LEVEL2_CACHE_SIZE),
        line_size: match sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) {
            0 => 64,
            n => n,
        },
    }
}

fn sysconf(name: libc::c_int) -> u64 {
    // SAFETY: sysconf has no memory-safety preconditions.
    let v = unsafe { libc::sysconf(name) };
    if v > 0 { v as u64 } else { 0 }
}

fn cpu_model() -> Option<String> {
    let info = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    info.lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ResourceSnapshot {
    pub max_rss_bytes: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub vol_ctx_switches: i64,
    pub invol_ctx_switches: i64,
    pub user_time_us: i64,
    pub sys_time_us: i64,
}

pub fn capture_rusage() -> ResourceSnapshot {
    // SAFETY: rusage is plain data and getrusage only writes into it.
    let usage = unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
        usage
    };
    ResourceSnapshot {
        max_rss_bytes: usage.ru_maxrss * 1024,
        minor_faults: usage.ru_minflt,
        major_faults: usage.ru_majflt,
        vol_ctx_switches: usage.ru_nvcsw,
        invol_ctx_switches: usage.ru_nivcsw,
        user_time_us: usage.ru_utime.tv_sec * 1_000_000 + usage.ru_utime.tv_usec,
        sys_time_us: usage.ru_stime.tv_sec * 1_000_000 + usage.ru_stime.tv_usec,
    }
}

// ─── Synthetic traffic ──────────────────────────────────────────────────────

/// Buffer of `slots` generated packets cycling through the valid types,
/// every `error_every`-th slot malformed (0 for none).
pub fn generated_buffer<R: Rng>(slots: usize, slot_size: usize, shape: &UniShape, error_every: usize, rng: &mut R) -> PacketSlotBuffer {
    let mut buf = PacketSlotBuffer::allocate(slots, slot_size);
    for slot in 0..slots {
        let ty = PacketType::ALL[slot % 3];
        let well_formed = error_every == 0 || (slot + 1) % error_every != 0;
        buf.write_ext_header_template(slot);
        buf.write_payload_template(slot, slot_size);
        buf.write_packet_data(slot, ty, shape, well_formed, rng);
    }
    buf.set_packets(slots);
    buf
}

/// Hands out copies of one pre-generated buffer and swallows sends. Slot
/// sizes of source and destination must match.
pub struct LoopbackTransport {
    source: PacketSlotBuffer,
    pub received: u64,
    pub sent: u64,
}

impl LoopbackTransport {
    pub fn new(source: PacketSlotBuffer) -> Self {
        Self {
            source,
            received: 0,
            sent: 0,
        }
    }
}

impl Transport for LoopbackTransport {
    fn recv_batch(&mut self, buf: &mut PacketSlotBuffer, max: usize) -> Result<usize, TransportError> {
        let n = max.min(self.source.packets()).min(buf.slots());
        for slot in 0..n {
            buf.slot_mut(slot).copy_from_slice(self.source.slot(slot));
        }
        self.received += n as u64;
        Ok(n)
    }

    fn send_batch(&mut self, _buf: &PacketSlotBuffer, count: usize) -> Result<usize, TransportError> {
        self.sent += count as u64;
        Ok(count)
    }
}

// ─── Formatting ─────────────────────────────────────────────────────────────

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}

pub fn format_rate(per_sec: f64) -> String {
    if per_sec >= 1_000_000.0 {
        format!("{:.2}M/s", per_sec / 1_000_000.0)
    } else if per_sec >= 1_000.0 {
        format!("{:.1}K/s", per_sec / 1_000.0)
    } else {
        format!("{per_sec:.0}/s")
    }
}

pub fn print_table_header() {
    println!(
        "  {:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  unit",
        "Benchmark", "min", "p50", "p90", "p99", "p99.9", "max",
    );
    println!("  {}", "─".repeat(92));
}

pub fn print_result_row(r: &BenchResult) {
    println!(
        "  {:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}  {}",
        r.name, r.stats.min, r.stats.p50, r.stats.p90, r.stats.p99, r.stats.p999, r.stats.max, r.unit,
    );
}

pub fn section_header(title: &str) {
    println!("\n{}", "─".repeat(90));
    println!("  {title}");
    println!("{}\n", "─".repeat(90));
}

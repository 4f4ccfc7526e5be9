//! Generator worker: fills a pre-templated buffer with weighted-random
//! packets and pushes it through the transport.
//!
//! A batch is generated once and resent until the transport accepts it, so a
//! failed send never consumes random draws or the pacing budget twice.

use crate::distribution::DistributionTable;
use crate::metrics::SenderMetrics;
use crate::pacer::RatePacer;
use quarry_core::{Clock, MonotonicClock, Worker};
use quarry_net::Transport;
use quarry_perf_recorder::{PerfRecorder, PerfStage};
use quarry_wire::{PacketSlotBuffer, UniShape};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct SenderSettings {
    pub destination: Ipv6Addr,
    pub table: DistributionTable,
    pub shape: UniShape,
    /// Datagrams per send call.
    pub batch: usize,
    /// Packet budget for this sender; -1 is unbounded.
    pub packets: i64,
    /// Rate for this sender; -1 is unpaced.
    pub pps: i64,
}

/// Outcome of one send iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Sent(usize),
    /// The send failed; the same batch goes out next time.
    Failed,
    /// Budget exhausted.
    Done,
}

pub struct Sender<T: Transport, C: Clock = MonotonicClock> {
    id: usize,
    transport: T,
    buffer: PacketSlotBuffer,
    settings: SenderSettings,
    rng: SmallRng,
    pacer: RatePacer<C>,
    fresh: bool,
    sent: u64,
    metrics: Arc<SenderMetrics>,
    recorder: PerfRecorder,
}

impl<T: Transport> Sender<T, MonotonicClock> {
    pub fn new(
        id: usize,
        transport: T,
        buffer: PacketSlotBuffer,
        settings: SenderSettings,
        seed: u64,
        metrics: Arc<SenderMetrics>,
    ) -> Self {
        let pacer = RatePacer::new(settings.pps, settings.batch);
        Self::with_pacer(id, transport, buffer, settings, seed, pacer, metrics)
    }
}

impl<T: Transport, C: Clock> Sender<T, C> {
    /// Templates the first `settings.batch` slots of `buffer` for the destination.
    pub fn with_pacer(
        id: usize,
        transport: T,
        mut buffer: PacketSlotBuffer,
        settings: SenderSettings,
        seed: u64,
        pacer: RatePacer<C>,
        metrics: Arc<SenderMetrics>,
    ) -> Self {
        assert!(
            settings.batch > 0 && settings.batch <= buffer.slots(),
            "batch must fit the buffer"
        );
        let slot_size = buffer.slot_size();
        for slot in 0..settings.batch {
            buffer.write_destination(slot, &settings.destination);
            buffer.write_ext_header_template(slot);
            buffer.write_payload_template(slot, slot_size);
        }
        Self {
            id,
            transport,
            buffer,
            settings,
            rng: SmallRng::seed_from_u64(seed),
            pacer,
            fresh: false,
            sent: 0,
            metrics,
            recorder: PerfRecorder::new(),
        }
    }

    pub fn metrics(&self) -> &Arc<SenderMetrics> {
        &self.metrics
    }

    pub fn recorder(&self) -> &PerfRecorder {
        &self.recorder
    }

    pub fn buffer(&self) -> &PacketSlotBuffer {
        &self.buffer
    }

    /// Packets sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn remaining(&self) -> Option<u64> {
        (self.settings.packets >= 0).then(|| (self.settings.packets as u64).saturating_sub(self.sent))
    }

    /// Fills the batch with freshly drawn packets.
    pub fn generate(&mut self) {
        self.recorder.begin(PerfStage::Generate);
        let s = &self.settings;
        for slot in 0..s.batch {
            let (ty, well_formed) = s.table.draw(&mut self.rng);
            self.buffer
                .write_packet_data(slot, ty, &s.shape, well_formed, &mut self.rng);
        }
        self.buffer.set_packets(s.batch);
        self.fresh = true;
        self.recorder.end(PerfStage::Generate);
    }

    /// Generates a batch if the previous one went out, sends it, and paces.
    pub fn step(&mut self) -> Step {
        let count = match self.remaining() {
            Some(0) => return Step::Done,
            Some(left) => self.settings.batch.min(left as usize),
            None => self.settings.batch,
        };

        if !self.fresh {
            self.pacer.mark();
            self.generate();
        }

        self.recorder.begin(PerfStage::SendBatch);
        let result = self.transport.send_batch(&self.buffer, count);
        self.recorder.end(PerfStage::SendBatch);

        match result {
            Ok(n) => {
                self.fresh = false;
                self.sent += n as u64;
                self.metrics.packets.add(n as u64);
                self.metrics.batches.incr();
                self.pacer.wait();
                Step::Sent(n)
            }
            Err(e) => {
                self.metrics.errors.incr();
                if let Some(code) = e.code() {
                    self.metrics.last_errno.set(code);
                }
                Step::Failed
            }
        }
    }
}

impl<T: Transport + 'static, C: Clock + 'static> Worker for Sender<T, C> {
    fn name(&self) -> String {
        format!("tx-sender-{}", self.id)
    }

    fn run(&mut self, stop: &AtomicBool) {
        info!(
            sender = self.id,
            packets = self.settings.packets,
            pps = self.settings.pps,
            batch = self.settings.batch,
            prefix = ?self.settings.table.prefix(),
            "sender running"
        );
        while !stop.load(Ordering::Acquire) {
            match self.step() {
                Step::Sent(_) => {}
                Step::Failed => std::thread::yield_now(),
                Step::Done => break,
            }
        }
        info!(sender = self.id, sent = self.sent, "sender finished");
    }
}

//! Handler worker: validates, stores and replies to the packets of one lane.
//!
//! Routing uses two independent fixed-point coins per valid packet, each a
//! uniform draw in `0..PERCENT_SCALE` compared against the configured
//! percentage scaled to the same range. Store and reply are not exclusive.

use crate::metrics::HandlerMetrics;
use quarry_core::Worker;
use quarry_lanes::{AcquireRing, ReleaseRing, ThreadWaiter, Waiter};
use quarry_net::Transport;
use quarry_perf_recorder::{PerfRecorder, PerfStage};
use quarry_store::StateStore;
use quarry_wire::{PacketSlotBuffer, PacketType};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Fixed-point range percentages are scaled into.
pub const PERCENT_SCALE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandlerSettings {
    pub store_percent: f64,
    pub reply_percent: f64,
    pub workload_iterations: u64,
}

fn scale_percent(pct: f64) -> u32 {
    (PERCENT_SCALE as f64 * pct.clamp(0.0, 100.0) / 100.0) as u32
}

/// Pre-templated outgoing buffer addressed to `addr`.
pub fn reply_buffer(slots: usize, slot_size: usize, addr: &Ipv6Addr) -> PacketSlotBuffer {
    let mut buf = PacketSlotBuffer::allocate(slots, slot_size);
    for slot in 0..slots {
        buf.write_destination(slot, addr);
        buf.write_ext_header_template(slot);
        buf.write_payload_template(slot, slot_size);
    }
    buf
}

/// Reply transport plus the buffer replies accumulate in.
pub struct ReplyPath<T> {
    pub transport: T,
    pub buffer: PacketSlotBuffer,
}

pub struct Handler<
    S: StateStore = Box<dyn StateStore>,
    T: Transport = Box<dyn Transport>,
    W: Waiter = ThreadWaiter,
> {
    lane: usize,
    used: AcquireRing<PacketSlotBuffer, W>,
    free: ReleaseRing<PacketSlotBuffer>,
    /// Buffer being processed. Kept out of the stack frame so a panic in
    /// `process` leaves it here for the next `poll` to hand back.
    in_flight: Option<PacketSlotBuffer>,
    routing: Routing<S, T>,
}

/// Per-packet routing state, split from the lane ends so a buffer parked in
/// `Handler::in_flight` can be processed while borrowed.
struct Routing<S, T> {
    lane: usize,
    store: Option<S>,
    reply: Option<ReplyPath<T>>,
    store_threshold: u32,
    reply_threshold: u32,
    workload_iterations: u64,
    accumulator: u64,
    rng: SmallRng,
    metrics: Arc<HandlerMetrics>,
    recorder: PerfRecorder,
}

impl<S: StateStore, T: Transport, W: Waiter> Handler<S, T, W> {
    /// A missing store or reply path turns the matching coin off.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lane: usize,
        used: AcquireRing<PacketSlotBuffer, W>,
        free: ReleaseRing<PacketSlotBuffer>,
        settings: HandlerSettings,
        store: Option<S>,
        reply: Option<ReplyPath<T>>,
        seed: u64,
        metrics: Arc<HandlerMetrics>,
    ) -> Self {
        let store_threshold = if store.is_some() {
            scale_percent(settings.store_percent)
        } else {
            0
        };
        let reply_threshold = if reply.is_some() {
            scale_percent(settings.reply_percent)
        } else {
            0
        };
        Self {
            lane,
            used,
            free,
            in_flight: None,
            routing: Routing {
                lane,
                store,
                reply,
                store_threshold,
                reply_threshold,
                workload_iterations: settings.workload_iterations,
                accumulator: 0,
                rng: SmallRng::seed_from_u64(seed),
                metrics,
                recorder: PerfRecorder::new(),
            },
        }
    }

    pub fn metrics(&self) -> &Arc<HandlerMetrics> {
        &self.routing.metrics
    }

    pub fn recorder(&self) -> &PerfRecorder {
        &self.routing.recorder
    }

    /// Takes one used buffer, processes it and hands it back. `false` once
    /// stop was observed while waiting.
    pub fn poll(&mut self) -> bool {
        if let Some(buf) = self.in_flight.take() {
            warn!(lane = self.lane, "returning buffer abandoned by an interrupted batch");
            self.free.release(0, buf);
        }

        let Some((_, buf)) = self.used.acquire() else {
            return false;
        };
        self.routing.metrics.buffers.incr();
        let buf = self.in_flight.insert(buf);
        self.routing.process(buf);
        if let Some(buf) = self.in_flight.take() {
            self.free.release(0, buf);
        }
        true
    }

    /// Runs every populated slot of `buf` through validation and routing,
    /// then sends accumulated replies in one batch.
    pub fn process(&mut self, buf: &PacketSlotBuffer) {
        self.routing.process(buf);
    }

    /// Last synthetic workload result, kept so the loop cannot be elided.
    pub fn accumulator(&self) -> u64 {
        self.routing.accumulator
    }
}

impl<S: StateStore, T: Transport> Routing<S, T> {
    fn process(&mut self, buf: &PacketSlotBuffer) {
        self.recorder.begin(PerfStage::HandleBatch);
        let mut replies = 0usize;

        for slot in 0..buf.packets() {
            self.recorder.begin(PerfStage::Validate);
            let valid = buf.validate(slot);
            self.recorder.end(PerfStage::Validate);
            if !valid {
                self.metrics.packet_errors.incr();
                continue;
            }

            if self.rng.gen_range(0..PERCENT_SCALE) < self.store_threshold {
                self.store_slot(buf, slot);
            }

            if self.rng.gen_range(0..PERCENT_SCALE) < self.reply_threshold
                && let Some(reply) = self.reply.as_mut()
                && replies < reply.buffer.slots()
            {
                let code = buf.read_type_code(slot);
                reply.buffer.write_type_code(replies, code);
                reply
                    .buffer
                    .write_length(replies, PacketType::from_code(code).length() as i32);
                replies += 1;
                self.metrics.replies.incr();

                if self.workload_iterations > 0 {
                    self.accumulator = black_box(workload(self.workload_iterations));
                    self.metrics.workloads.incr();
                }
            }
        }

        if replies > 0 {
            self.send_replies(replies);
        }
        self.recorder.end(PerfStage::HandleBatch);
    }

    fn store_slot(&mut self, buf: &PacketSlotBuffer, slot: usize) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let uni = buf.read_uni(slot);
        self.recorder.begin(PerfStage::Store);
        let result = store.save(&uni);
        self.recorder.end(PerfStage::Store);
        self.metrics.stores.incr();
        if let Err(e) = result {
            self.metrics.store_errors.incr();
            let n = self.metrics.store_errors.get();
            if n.is_power_of_two() {
                warn!(lane = self.lane, %uni, error = %e, failures = n, "state store save failed");
            }
        }
    }

    fn send_replies(&mut self, count: usize) {
        let Some(reply) = self.reply.as_mut() else {
            return;
        };
        reply.buffer.set_packets(count);
        self.recorder.begin(PerfStage::ReplySend);
        let result = reply.transport.send_batch(&reply.buffer, count);
        self.recorder.end(PerfStage::ReplySend);
        if let Err(e) = result {
            self.metrics.tx_errors.incr();
            if let Some(code) = e.code() {
                self.metrics.tx_errno.set(code);
            }
        }
    }
}

/// Pure busy accumulation standing in for per-packet processing cost.
#[inline(never)]
fn workload(iterations: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = acc.wrapping_add(black_box(i));
    }
    acc
}

impl<S, T, W> Worker for Handler<S, T, W>
where
    S: StateStore + 'static,
    T: Transport + 'static,
    W: Waiter + 'static,
{
    fn name(&self) -> String {
        format!("rx-handler-{}", self.lane)
    }

    fn run(&mut self, stop: &AtomicBool) {
        info!(
            lane = self.lane,
            store = self.routing.store_threshold,
            reply = self.routing.reply_threshold,
            workload = self.routing.workload_iterations,
            "handler running"
        );
        while !stop.load(Ordering::Acquire) {
            if !self.poll() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_scaling_truncates_like_fixed_point() {
        assert_eq!(scale_percent(0.0), 0);
        assert_eq!(scale_percent(12.5), 125);
        assert_eq!(scale_percent(100.0), PERCENT_SCALE);
        assert_eq!(scale_percent(250.0), PERCENT_SCALE);
    }

    #[test]
    fn workload_sums_the_range() {
        assert_eq!(workload(0), 0);
        assert_eq!(workload(101), 5050);
    }

    #[test]
    fn reply_buffer_is_addressed_and_templated() {
        let addr: Ipv6Addr = "fd00::7".parse().unwrap();
        let buf = reply_buffer(4, 256, &addr);
        for slot in 0..4 {
            assert_eq!(buf.read_address(slot), addr);
            assert_eq!(buf.read_uni(slot).0[0], 0xFC);
        }
    }
}

use crate::metrics::ReceiverMetrics;
use quarry_core::Worker;
use quarry_lanes::{AcquireRing, ReleaseRing, ThreadWaiter, Waiter};
use quarry_net::Transport;
use quarry_perf_recorder::{PerfRecorder, PerfStage};
use quarry_wire::PacketSlotBuffer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Outcome of one receive iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// A batch of `n` datagrams was handed to a handler lane.
    Received(usize),
    /// The transport timed out with nothing queued.
    Idle,
    /// The transport call failed; the buffer is kept for the next try.
    Failed,
    /// Stop was raised while waiting for a free buffer.
    Stopped,
}

/// Fills free buffers from the transport and publishes them to handler lanes.
///
/// A buffer goes back out on the lane it came from, so buffer and lane stay
/// paired unless a free queue ran dry and the acquire rotated.
pub struct Receiver<T: Transport, W: Waiter = ThreadWaiter> {
    transport: T,
    free: AcquireRing<PacketSlotBuffer, W>,
    used: ReleaseRing<PacketSlotBuffer>,
    max_batch: usize,
    dump: bool,
    held: Option<(usize, PacketSlotBuffer)>,
    metrics: Arc<ReceiverMetrics>,
    recorder: PerfRecorder,
}

impl<T: Transport, W: Waiter> Receiver<T, W> {
    pub fn new(
        transport: T,
        free: AcquireRing<PacketSlotBuffer, W>,
        used: ReleaseRing<PacketSlotBuffer>,
        max_batch: usize,
        metrics: Arc<ReceiverMetrics>,
    ) -> Self {
        Self {
            transport,
            free,
            used,
            max_batch,
            dump: false,
            held: None,
            metrics,
            recorder: PerfRecorder::new(),
        }
    }

    /// Logs every received slot. Slow; for inspecting traffic only.
    pub fn with_dump(mut self, dump: bool) -> Self {
        self.dump = dump;
        self
    }

    pub fn metrics(&self) -> &Arc<ReceiverMetrics> {
        &self.metrics
    }

    pub fn recorder(&self) -> &PerfRecorder {
        &self.recorder
    }

    /// One iteration: hold a free buffer, receive into it, publish it.
    ///
    /// The buffer stays in `held` until it is published, so an idle poll,
    /// a failed call or an unwinding transport all leave it for the next try.
    pub fn poll(&mut self) -> Poll {
        if self.held.is_none() {
            let Some(hit) = self.free.acquire() else {
                return Poll::Stopped;
            };
            self.held = Some(hit);
        }
        let Some((lane, buf)) = self.held.as_mut() else {
            return Poll::Stopped;
        };
        let lane = *lane;

        self.recorder.begin(PerfStage::ReceiveBatch);
        let result = self.transport.recv_batch(buf, self.max_batch);
        self.recorder.end(PerfStage::ReceiveBatch);

        match result {
            Ok(0) => Poll::Idle,
            Ok(n) => {
                buf.set_packets(n);
                self.metrics.packets.add(n as u64);
                self.metrics.iterations.incr();
                if self.dump {
                    for slot in 0..n {
                        info!(lane, slot, "{}", buf.dump(slot));
                    }
                }
                if let Some((lane, buf)) = self.held.take() {
                    self.used.release(lane, buf);
                }
                Poll::Received(n)
            }
            Err(e) => {
                self.metrics.errors.incr();
                if let Some(code) = e.code() {
                    self.metrics.last_errno.set(code);
                }
                Poll::Failed
            }
        }
    }
}

impl<T: Transport + 'static, W: Waiter + 'static> Worker for Receiver<T, W> {
    fn name(&self) -> String {
        "rx-receiver".into()
    }

    fn run(&mut self, stop: &AtomicBool) {
        info!(lanes = self.free.lanes(), max_batch = self.max_batch, "receiver running");
        while !stop.load(Ordering::Acquire) {
            if self.poll() == Poll::Stopped {
                break;
            }
        }
    }
}

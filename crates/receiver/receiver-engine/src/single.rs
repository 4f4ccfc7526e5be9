use crate::metrics::ReceiverMetrics;
use quarry_core::Worker;
use quarry_net::Transport;
use quarry_perf_recorder::{PerfRecorder, PerfStage};
use quarry_wire::PacketSlotBuffer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Receive-and-validate loop on one thread with one buffer. No lanes, no
/// store, no replies; useful as a baseline for the multi-threaded pipeline.
pub struct SingleThreadReceiver<T: Transport> {
    transport: T,
    buffer: PacketSlotBuffer,
    max_batch: usize,
    dump: bool,
    metrics: Arc<ReceiverMetrics>,
    recorder: PerfRecorder,
}

impl<T: Transport> SingleThreadReceiver<T> {
    pub fn new(transport: T, buffer: PacketSlotBuffer, max_batch: usize, metrics: Arc<ReceiverMetrics>) -> Self {
        let max_batch = max_batch.min(buffer.slots());
        Self {
            transport,
            buffer,
            max_batch,
            dump: false,
            metrics,
            recorder: PerfRecorder::new(),
        }
    }

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

    /// One receive call followed by validation of every slot it filled.
    /// Returns the number of datagrams received.
    pub fn poll(&mut self) -> usize {
        self.recorder.begin(PerfStage::ReceiveBatch);
        let result = self.transport.recv_batch(&mut self.buffer, self.max_batch);
        self.recorder.end(PerfStage::ReceiveBatch);

        let n = match result {
            Ok(n) => n,
            Err(e) => {
                self.metrics.errors.incr();
                if let Some(code) = e.code() {
                    self.metrics.last_errno.set(code);
                }
                return 0;
            }
        };
        if n == 0 {
            return 0;
        }

        self.buffer.set_packets(n);
        self.metrics.iterations.incr();
        self.metrics.packets.add(n as u64);
        for slot in 0..n {
            if self.dump {
                info!(slot, "{}", self.buffer.dump(slot));
            }
            self.recorder.begin(PerfStage::Validate);
            let valid = self.buffer.validate(slot);
            self.recorder.end(PerfStage::Validate);
            if !valid {
                self.metrics.packet_errors.incr();
            }
        }
        n
    }
}

impl<T: Transport + 'static> Worker for SingleThreadReceiver<T> {
    fn name(&self) -> String {
        "rx-single".into()
    }

    fn run(&mut self, stop: &AtomicBool) {
        info!(max_batch = self.max_batch, "single-thread receiver running");
        while !stop.load(Ordering::Acquire) {
            self.poll();
        }
    }
}

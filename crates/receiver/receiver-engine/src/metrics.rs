use quarry_core::{Counter, ErrnoCell};
use quarry_lanes::{LaneMetrics, LaneMetricsSnapshot};
use std::sync::Arc;

/// Receiver-side counters. Lane counters (no free buffer, long waits, used
/// queue overflows) live in `lanes`, shared with the receiver's rings.
#[derive(Debug, Default)]
pub struct ReceiverMetrics {
    /// Successful receive calls that returned at least one datagram.
    pub iterations: Counter,
    pub packets: Counter,
    /// Receive calls that failed.
    pub errors: Counter,
    pub last_errno: ErrnoCell,
    /// Malformed packets; only counted in single-thread mode.
    pub packet_errors: Counter,
    pub lanes: Arc<LaneMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub iterations: u64,
    pub packets: u64,
    pub errors: u64,
    pub last_errno: Option<i32>,
    pub packet_errors: u64,
    pub lanes: LaneMetricsSnapshot,
}

impl ReceiverMetrics {
    pub fn take(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            iterations: self.iterations.take(),
            packets: self.packets.take(),
            errors: self.errors.take(),
            last_errno: self.last_errno.take(),
            packet_errors: self.packet_errors.take(),
            lanes: self.lanes.take(),
        }
    }

    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            iterations: self.iterations.get(),
            packets: self.packets.get(),
            errors: self.errors.get(),
            last_errno: self.last_errno.get(),
            packet_errors: self.packet_errors.get(),
            lanes: self.lanes.snapshot(),
        }
    }
}

/// Per-handler counters.
#[derive(Debug, Default)]
pub struct HandlerMetrics {
    /// Buffers processed.
    pub buffers: Counter,
    pub packet_errors: Counter,
    pub stores: Counter,
    pub store_errors: Counter,
    pub replies: Counter,
    pub workloads: Counter,
    pub tx_errors: Counter,
    pub tx_errno: ErrnoCell,
    pub lanes: Arc<LaneMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerSnapshot {
    pub buffers: u64,
    pub packet_errors: u64,
    pub stores: u64,
    pub store_errors: u64,
    pub replies: u64,
    pub workloads: u64,
    pub tx_errors: u64,
    pub tx_errno: Option<i32>,
    pub lanes: LaneMetricsSnapshot,
}

impl HandlerMetrics {
    pub fn take(&self) -> HandlerSnapshot {
        HandlerSnapshot {
            buffers: self.buffers.take(),
            packet_errors: self.packet_errors.take(),
            stores: self.stores.take(),
            store_errors: self.store_errors.take(),
            replies: self.replies.take(),
            workloads: self.workloads.take(),
            tx_errors: self.tx_errors.take(),
            tx_errno: self.tx_errno.take(),
            lanes: self.lanes.take(),
        }
    }

    pub fn snapshot(&self) -> HandlerSnapshot {
        HandlerSnapshot {
            buffers: self.buffers.get(),
            packet_errors: self.packet_errors.get(),
            stores: self.stores.get(),
            store_errors: self.store_errors.get(),
            replies: self.replies.get(),
            workloads: self.workloads.get(),
            tx_errors: self.tx_errors.get(),
            tx_errno: self.tx_errno.get(),
            lanes: self.lanes.snapshot(),
        }
    }
}

impl std::ops::AddAssign for HandlerSnapshot {
    fn add_assign(&mut self, o: Self) {
        self.buffers += o.buffers;
        self.packet_errors += o.packet_errors;
        self.stores += o.stores;
        self.store_errors += o.store_errors;
        self.replies += o.replies;
        self.workloads += o.workloads;
        self.tx_errors += o.tx_errors;
        self.tx_errno = o.tx_errno.or(self.tx_errno);
        self.lanes.acquired += o.lanes.acquired;
        self.lanes.empty += o.lanes.empty;
        self.lanes.long_waits += o.lanes.long_waits;
        self.lanes.overflows += o.lanes.overflows;
    }
}

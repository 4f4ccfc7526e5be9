use quarry_core::{Counter, ErrnoCell};

/// Per-sender counters.
#[derive(Debug, Default)]
pub struct SenderMetrics {
    pub packets: Counter,
    /// Successful send calls.
    pub batches: Counter,
    /// Failed send calls; each is retried with the same batch.
    pub errors: Counter,
    pub last_errno: ErrnoCell,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderSnapshot {
    pub packets: u64,
    pub batches: u64,
    pub errors: u64,
    pub last_errno: Option<i32>,
}

impl SenderMetrics {
    pub fn take(&self) -> SenderSnapshot {
        SenderSnapshot {
            packets: self.packets.take(),
            batches: self.batches.take(),
            errors: self.errors.take(),
            last_errno: self.last_errno.take(),
        }
    }

    pub fn snapshot(&self) -> SenderSnapshot {
        SenderSnapshot {
            packets: self.packets.get(),
            batches: self.batches.get(),
            errors: self.errors.get(),
            last_errno: self.last_errno.get(),
        }
    }
}

//! Lightweight per-stage latency recorder for the packet pipelines.
//!
//! Builds without `record` get a zero-sized `PerfRecorder` whose methods all
//! compile away, so the engines can call it unconditionally on hot paths.
//!
//! When `record` is **on**, each stage gets a pre-allocated sample buffer of
//! `MAX_SAMPLES` entries and `begin`/`end` pairs store elapsed nanoseconds read
//! from the monotonic clock. Samples past the buffer size are dropped.

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PerfStage {
    /// One batched receive call.
    ReceiveBatch = 0,
    /// One handler pass over a whole buffer, replies included.
    HandleBatch = 1,
    Validate = 2,
    Store = 3,
    ReplySend = 4,
    /// Repopulating every slot of a sender buffer.
    Generate = 5,
    SendBatch = 6,
}

pub const NUM_STAGES: usize = 7;
pub const MAX_SAMPLES: usize = 1 << 18;

pub const ALL_STAGES: [PerfStage; NUM_STAGES] = [
    PerfStage::ReceiveBatch,
    PerfStage::HandleBatch,
    PerfStage::Validate,
    PerfStage::Store,
    PerfStage::ReplySend,
    PerfStage::Generate,
    PerfStage::SendBatch,
];

impl PerfStage {
    pub const fn name(self) -> &'static str {
        match self {
            PerfStage::ReceiveBatch => "ReceiveBatch",
            PerfStage::HandleBatch => "HandleBatch",
            PerfStage::Validate => "Validate",
            PerfStage::Store => "Store",
            PerfStage::ReplySend => "ReplySend",
            PerfStage::Generate => "Generate",
            PerfStage::SendBatch => "SendBatch",
        }
    }
}

// ─── Sampling build ─────────────────────────────────────────────────────────

#[cfg(feature = "record")]
mod inner {
    use super::*;
    use quarry_core::{Clock, MonotonicClock};

    #[inline(always)]
    pub fn now_ns() -> u64 {
        MonotonicClock.now_ns()
    }

    struct StageBuf {
        samples: Vec<u64>,
        pending: u64,
    }

    impl StageBuf {
        fn new() -> Self {
            Self {
                samples: Vec::with_capacity(MAX_SAMPLES),
                pending: 0,
            }
        }

        #[inline(always)]
        fn push(&mut self, sample: u64) {
            if self.samples.len() < MAX_SAMPLES {
                self.samples.push(sample);
            }
        }
    }

    pub struct PerfRecorder {
        stages: Box<[StageBuf]>,
    }

    impl PerfRecorder {
        pub fn new() -> Self {
            Self {
                stages: (0..NUM_STAGES).map(|_| StageBuf::new()).collect(),
            }
        }

        #[inline(always)]
        pub fn begin(&mut self, stage: PerfStage) {
            self.stages[stage as usize].pending = now_ns();
        }

        #[inline(always)]
        pub fn end(&mut self, stage: PerfStage) {
            let buf = &mut self.stages[stage as usize];
            let elapsed = now_ns().saturating_sub(buf.pending);
            buf.push(elapsed);
        }

        #[inline(always)]
        pub fn record(&mut self, stage: PerfStage, duration_ns: u64) {
            self.stages[stage as usize].push(duration_ns);
        }

        pub fn samples(&self, stage: PerfStage) -> &[u64] {
            &self.stages[stage as usize].samples
        }

        pub fn count(&self, stage: PerfStage) -> usize {
            self.stages[stage as usize].samples.len()
        }

        pub fn drain(&mut self, stage: PerfStage) {
            self.stages[stage as usize].samples.clear();
        }

        pub fn reset(&mut self) {
            for buf in self.stages.iter_mut() {
                buf.samples.clear();
            }
        }
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self::new()
        }
    }
}

// ─── Release build ──────────────────────────────────────────────────────────

#[cfg(not(feature = "record"))]
mod inner {
    use super::*;

    #[inline(always)]
    pub fn now_ns() -> u64 {
        0
    }

    pub struct PerfRecorder;

    impl PerfRecorder {
        #[inline(always)]
        pub fn new() -> Self {
            Self
        }
        #[inline(always)]
        pub fn begin(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn end(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn record(&mut self, _stage: PerfStage, _duration_ns: u64) {}
        #[inline(always)]
        pub fn samples(&self, _stage: PerfStage) -> &[u64] {
            &[]
        }
        #[inline(always)]
        pub fn count(&self, _stage: PerfStage) -> usize {
            0
        }
        #[inline(always)]
        pub fn drain(&mut self, _stage: PerfStage) {}
        #[inline(always)]
        pub fn reset(&mut self) {}
    }

    impl Default for PerfRecorder {
        fn default() -> Self {
            Self
        }
    }
}

pub use inner::{PerfRecorder, now_ns};

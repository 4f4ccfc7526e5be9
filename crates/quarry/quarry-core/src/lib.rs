//! Shared runtime pieces for the quarry packet pipelines: counters, clocks,
//! CPU pinning and supervised worker threads.

pub mod affinity;
pub mod clock;
pub mod metrics;
pub mod worker;

pub use affinity::{AffinitySetter, CpuAffinity, NoAffinity};
pub use clock::{Clock, MonotonicClock};
pub use metrics::{Counter, ErrnoCell};
pub use worker::{Worker, spawn_worker};

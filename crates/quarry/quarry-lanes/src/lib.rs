mod backoff;
mod lanes;
mod ring;
mod spsc;

pub use backoff::{Backoff, BackoffPolicy, Stage, ThreadWaiter, Waiter};
pub use lanes::{
    AcquireRing, DrainerEnds, FillerEnds, LaneMetrics, LaneMetricsSnapshot, ReleaseRing,
    exchange_lanes,
};
pub use ring::{CachePadded, RingConfig};
pub use spsc::{Consumer, Producer, channel};

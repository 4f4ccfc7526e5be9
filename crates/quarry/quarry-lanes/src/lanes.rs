//! Exchange lanes: paired free/used queues moving buffers between a filling
//! thread and the draining threads.
//!
//! ```text
//!              free[0] ◄──────────── drainer 0 ──┐
//!  filler ──►  used[0] ──────────────►           │ one lane per drainer,
//!              free[1] ◄──────────── drainer 1   │ each queue SPSC
//!         ──►  used[1] ──────────────►          ─┘
//! ```
//!
//! Every buffer is in exactly one of: a free queue, a used queue, or held
//! by one thread. Acquiring takes it out of a queue, releasing puts it into
//! the counterpart queue; there is no path that drops it.
//!
//! Acquire policy (both sides):
//! 1. Try the current lane once. This is the fast path.
//! 2. On a miss count `empty`, then keep rotating forward through the lanes,
//!    waiting one [`Backoff`] step between attempts.
//! 3. The first time the backoff leaves the spin tier, count `long_waits`.
//! 4. The sleep tier retries forever; it only gives up when the stop flag is
//!    raised, and only while the caller holds nothing.
//!
//! Release policy: put into the requested lane; if full, count `overflows`
//! and try the next lane. Queues are sized to hold the whole pool so this
//! path is cold.

use crate::backoff::{Backoff, BackoffPolicy, Stage, ThreadWaiter, Waiter};
use crate::ring::RingConfig;
use crate::spsc::{Consumer, Producer, channel};
use quarry_core::Counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Counters for one side of a lane set.
#[derive(Debug, Default)]
pub struct LaneMetrics {
    pub acquired: Counter,
    /// Fast-path misses ("no free" / "no used" buffer).
    pub empty: Counter,
    /// Acquires that escalated past the spin tier.
    pub long_waits: Counter,
    /// Releases that found their queue full.
    pub overflows: Counter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneMetricsSnapshot {
    pub acquired: u64,
    pub empty: u64,
    pub long_waits: u64,
    pub overflows: u64,
}

impl LaneMetrics {
    /// Reads and resets every counter.
    pub fn take(&self) -> LaneMetricsSnapshot {
        LaneMetricsSnapshot {
            acquired: self.acquired.take(),
            empty: self.empty.take(),
            long_waits: self.long_waits.take(),
            overflows: self.overflows.take(),
        }
    }

    pub fn snapshot(&self) -> LaneMetricsSnapshot {
        LaneMetricsSnapshot {
            acquired: self.acquired.get(),
            empty: self.empty.get(),
            long_waits: self.long_waits.get(),
            overflows: self.overflows.get(),
        }
    }
}

/// Queue ends held by the filling thread (the receiver).
pub struct FillerEnds<T> {
    pub free: Vec<Consumer<T>>,
    pub used: Vec<Producer<T>>,
}

/// Queue ends held by one draining thread (a handler).
pub struct DrainerEnds<T> {
    pub used: Consumer<T>,
    pub free: Producer<T>,
}

/// Builds `lanes` lanes and pre-fills each free queue with `per_lane` items.
///
/// `make(lane)` is called once per item at start-up; nothing is allocated
/// afterwards.
pub fn exchange_lanes<T, F>(lanes: usize, per_lane: usize, mut make: F) -> (FillerEnds<T>, Vec<DrainerEnds<T>>)
where
    F: FnMut(usize) -> T,
{
    assert!(lanes > 0, "at least one lane is required");
    let cfg = RingConfig::holding(lanes * per_lane);

    let mut filler = FillerEnds {
        free: Vec::with_capacity(lanes),
        used: Vec::with_capacity(lanes),
    };
    let mut drainers = Vec::with_capacity(lanes);

    for lane in 0..lanes {
        let (mut free_tx, free_rx) = channel(cfg);
        let (used_tx, used_rx) = channel(cfg);
        for _ in 0..per_lane {
            if free_tx.push(make(lane)).is_err() {
                unreachable!("free queue sized to hold the whole pool");
            }
        }
        filler.free.push(free_rx);
        filler.used.push(used_tx);
        drainers.push(DrainerEnds {
            used: used_rx,
            free: free_tx,
        });
    }
    (filler, drainers)
}

/// Acquire side over one or more lanes.
pub struct AcquireRing<T, W: Waiter = ThreadWaiter> {
    lanes: Vec<Consumer<T>>,
    index: usize,
    backoff: Backoff<W>,
    metrics: Arc<LaneMetrics>,
    stop: Arc<AtomicBool>,
}

impl<T> AcquireRing<T, ThreadWaiter> {
    pub fn new(
        lanes: Vec<Consumer<T>>,
        policy: BackoffPolicy,
        metrics: Arc<LaneMetrics>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self::with_waiter(lanes, policy, ThreadWaiter::default(), metrics, stop)
    }
}

impl<T, W: Waiter> AcquireRing<T, W> {
    pub fn with_waiter(
        lanes: Vec<Consumer<T>>,
        policy: BackoffPolicy,
        waiter: W,
        metrics: Arc<LaneMetrics>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        assert!(!lanes.is_empty(), "acquire ring needs at least one lane");
        Self {
            lanes,
            index: 0,
            backoff: Backoff::new(policy, waiter),
            metrics,
            stop,
        }
    }

    /// Lane the next acquire starts from.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Single non-blocking attempt on the current lane, without counting a miss.
    #[inline]
    pub fn try_acquire(&mut self) -> Option<(usize, T)> {
        let item = self.lanes[self.index].pop()?;
        self.metrics.acquired.incr();
        Some((self.index, item))
    }

    /// Takes a buffer, escalating the wait until one shows up.
    ///
    /// Returns the lane it came from. `None` only when the stop flag was
    /// observed while waiting past the spin tier.
    pub fn acquire(&mut self) -> Option<(usize, T)> {
        if let Some(hit) = self.try_acquire() {
            return Some(hit);
        }
        self.metrics.empty.incr();
        self.backoff.reset();

        let n = self.lanes.len();
        let mut long = false;
        loop {
            self.index = (self.index + 1) % n;
            if let Some(hit) = self.try_acquire() {
                return Some(hit);
            }
            if self.backoff.stage() != Stage::Spin {
                if !long {
                    self.metrics.long_waits.incr();
                    long = true;
                }
                if self.stop.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.backoff.snooze();
        }
    }

    pub fn metrics(&self) -> &Arc<LaneMetrics> {
        &self.metrics
    }

    pub fn waiter_mut(&mut self) -> &mut W {
        self.backoff.waiter_mut()
    }

    /// Total items queued across all lanes. Approximate while producers run.
    pub fn queued(&self) -> usize {
        self.lanes.iter().map(Consumer::len).sum()
    }

    /// Pops everything currently queued. Used on shutdown.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        for lane in &mut self.lanes {
            while let Some(item) = lane.pop() {
                out.push(item);
            }
        }
        out
    }
}

/// Release side over one or more lanes.
pub struct ReleaseRing<T> {
    lanes: Vec<Producer<T>>,
    metrics: Arc<LaneMetrics>,
}

impl<T> ReleaseRing<T> {
    pub fn new(lanes: Vec<Producer<T>>, metrics: Arc<LaneMetrics>) -> Self {
        assert!(!lanes.is_empty(), "release ring needs at least one lane");
        Self { lanes, metrics }
    }

    /// Puts `item` into `lane`, moving forward past full lanes. Returns the
    /// lane it landed in. Never drops the item.
    pub fn release(&mut self, lane: usize, item: T) -> usize {
        let n = self.lanes.len();
        let mut lane = lane % n;
        let mut item = item;
        loop {
            match self.lanes[lane].push(item) {
                Ok(()) => return lane,
                Err(back) => {
                    item = back;
                    self.metrics.overflows.incr();
                    lane = (lane + 1) % n;
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Items released and not yet taken, across all lanes. Approximate while
    /// consumers run.
    pub fn queued(&self) -> usize {
        self.lanes.iter().map(Producer::len).sum()
    }

    pub fn metrics(&self) -> &Arc<LaneMetrics> {
        &self.metrics
    }
}

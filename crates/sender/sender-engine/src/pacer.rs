use quarry_core::{Clock, MonotonicClock};

/// Busy-wait rate limiter: each batch gets `batch / pps` seconds measured
/// from the moment its generation started.
pub struct RatePacer<C: Clock = MonotonicClock> {
    clock: C,
    period_ns: Option<u64>,
    started_ns: u64,
}

impl RatePacer<MonotonicClock> {
    pub fn new(pps: i64, batch: usize) -> Self {
        Self::with_clock(MonotonicClock, pps, batch)
    }
}

impl<C: Clock> RatePacer<C> {
    /// `pps <= 0` disables pacing.
    pub fn with_clock(clock: C, pps: i64, batch: usize) -> Self {
        let period_ns = (pps > 0).then(|| 1_000_000_000u64 * batch as u64 / pps as u64);
        Self {
            clock,
            period_ns,
            started_ns: 0,
        }
    }

    pub fn period_ns(&self) -> Option<u64> {
        self.period_ns
    }

    /// Marks the start of a batch. Not called again while the batch is retried.
    #[inline]
    pub fn mark(&mut self) {
        if self.period_ns.is_some() {
            self.started_ns = self.clock.now_ns();
        }
    }

    /// Spins until the current batch's period has elapsed. Returns the
    /// number of clock reads spent waiting.
    pub fn wait(&self) -> u64 {
        let Some(period) = self.period_ns else {
            return 0;
        };
        let until = self.started_ns + period;
        let mut spins = 0;
        while self.clock.now_ns() < until {
            std::hint::spin_loop();
            spins += 1;
        }
        spins
    }
}

//! Monotonic time source used by rate pacing.
//!
//! Pacing code takes a `Clock` instead of calling the OS directly so tests can
//! drive it with a scripted clock.

pub trait Clock: Send {
    /// Nanoseconds from an arbitrary but fixed origin. Must never go backwards.
    fn now_ns(&self) -> u64;
}

/// `CLOCK_MONOTONIC` via `clock_gettime`, avoiding the `Instant` wrapper on the
/// pacing busy-wait.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline(always)]
    fn now_ns(&self) -> u64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        unsafe {
            libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
        }
        (ts.tv_sec as u64) * 1_000_000_000 + ts.tv_nsec as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock;
        let mut last = clock.now_ns();
        for _ in 0..1_000 {
            let now = clock.now_ns();
            assert!(now >= last);
            last = now;
        }
    }
}

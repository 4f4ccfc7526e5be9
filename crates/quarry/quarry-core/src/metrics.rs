//! Lock-free counters shared between a worker thread and the reporting loop.
//!
//! A worker owns an `Arc` to its metrics struct and bumps counters with
//! relaxed fetch-and-add; the reporting loop drains them with `take`, which
//! swaps the value back to zero. Counters never feed back into control flow.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// Monotonic event counter padded to its own cache line.
///
/// Padding keeps two counters bumped by different threads (e.g. the receiver's
/// packet count and a handler's error count living in adjacent structs) from
/// sharing a line and bouncing it between cores.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn incr(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reads the current value and resets it to zero in one atomic step.
    #[inline]
    pub fn take(&self) -> u64 {
        self.value.swap(0, Ordering::Relaxed)
    }
}

/// Last OS error code reported by a transport call.
///
/// Holds [`ErrnoCell::NONE`] until an error is recorded; only the most recent
/// code is kept.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct ErrnoCell {
    code: AtomicI32,
}

impl ErrnoCell {
    pub const NONE: i32 = -1;

    pub const fn new() -> Self {
        Self {
            code: AtomicI32::new(Self::NONE),
        }
    }

    #[inline]
    pub fn set(&self, code: i32) {
        self.code.store(code, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> Option<i32> {
        match self.code.load(Ordering::Relaxed) {
            Self::NONE => None,
            code => Some(code),
        }
    }

    /// Returns the last recorded code (if any) and clears the cell.
    #[inline]
    pub fn take(&self) -> Option<i32> {
        match self.code.swap(Self::NONE, Ordering::Relaxed) {
            Self::NONE => None,
            code => Some(code),
        }
    }
}

impl Default for ErrnoCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};
    use std::sync::Arc;

    #[test]
    fn counter_occupies_a_full_cache_line() {
        assert_eq!(align_of::<Counter>(), 64);
        assert_eq!(size_of::<Counter>(), 64);
    }

    #[test]
    fn take_resets_to_zero() {
        let c = Counter::new();
        c.incr();
        c.add(41);
        assert_eq!(c.get(), 42);
        assert_eq!(c.take(), 42);
        assert_eq!(c.get(), 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let c = Arc::new(Counter::new());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        c.incr();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(c.get(), 40_000);
    }

    #[test]
    fn errno_cell_keeps_last_code_until_taken() {
        let e = ErrnoCell::new();
        assert_eq!(e.get(), None);
        e.set(11);
        e.set(105);
        assert_eq!(e.take(), Some(105));
        assert_eq!(e.take(), None);
    }
}

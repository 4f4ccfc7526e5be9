//! Sizing and cursor layout shared by the lane queues.

use std::ops::Deref;

/// Slot count of one queue. Always a power of two so a cursor maps to a
/// slot with a single AND.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingConfig {
    pub capacity: usize,
}

impl RingConfig {
    /// # Panics
    /// If `capacity` is zero or not a power of two.
    ///
    /// ```
    /// use quarry_lanes::RingConfig;
    /// assert_eq!(RingConfig::new(64).capacity, 64);
    /// ```
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "queue capacity {capacity} is not a power of 2"
        );
        Self { capacity }
    }

    /// Smallest queue that can hold `items` entries at once.
    ///
    /// Lane queues are sized from the whole buffer pool, so a release can
    /// only find a queue full if the pool was mis-sized.
    ///
    /// ```
    /// use quarry_lanes::RingConfig;
    /// assert_eq!(RingConfig::holding(1000).capacity, 1024);
    /// assert_eq!(RingConfig::holding(0).capacity, 1);
    /// ```
    pub fn holding(items: usize) -> Self {
        Self::new(items.max(1).next_power_of_two())
    }

    #[inline(always)]
    pub fn mask(&self) -> u64 {
        self.capacity as u64 - 1
    }
}

/// Slot position of a monotonically increasing cursor.
#[inline(always)]
pub(crate) fn seq_to_index(seq: u64, mask: u64) -> usize {
    (seq & mask) as usize
}

/// Gives a value a 64-byte line of its own.
///
/// The producer cursor and the consumer cursor of a queue are written by
/// different threads; sharing one line between them would turn every push
/// and pop into a cross-core invalidation.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T>(pub T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    #[should_panic(expected = "power of 2")]
    fn non_power_of_two_is_rejected() {
        RingConfig::new(1000);
    }

    #[test]
    fn index_wraps_with_mask() {
        let cfg = RingConfig::new(8);
        assert_eq!(seq_to_index(15, cfg.mask()), 7);
        assert_eq!(seq_to_index(16, cfg.mask()), 0);
    }

    #[test]
    fn padded_cursor_fills_a_line() {
        assert_eq!(std::mem::size_of::<CachePadded<AtomicU64>>(), 64);
        assert_eq!(std::mem::align_of::<CachePadded<AtomicU64>>(), 64);
    }
}

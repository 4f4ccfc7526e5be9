//! Bounded single-producer, single-consumer queue.
//!
//! The queue is split into a [`Producer`] and a [`Consumer`] handle at
//! creation, so the single-writer rule on each cursor is enforced by
//! ownership rather than by convention.
//!
//! # Protocol
//! - `tail` is written only by the producer, `head` only by the consumer.
//! - The producer writes the slot, then publishes with a `Release` store to
//!   `tail`; the consumer observes it with an `Acquire` load before reading.
//! - Symmetrically, the consumer frees a slot with a `Release` store to
//!   `head`, which the producer `Acquire`s before overwriting it.
//!
//! Each side caches the other side's cursor and only reloads it when the
//! cached value says the queue is full (producer) or empty (consumer), so
//! the common case touches no shared cache line besides the slot itself.

use crate::ring::{CachePadded, RingConfig, seq_to_index};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Shared<T> {
    /// Sequence of the next slot to pop.
    head: CachePadded<AtomicU64>,
    /// Sequence of the next slot to push.
    tail: CachePadded<AtomicU64>,
    mask: u64,
    capacity: u64,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: a slot is only touched by the side that currently owns it per the
// head/tail protocol above, so sharing `Shared` between the two handles is
// sound as long as `T` itself can move between threads.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.0.get_mut();
        let tail = *self.tail.0.get_mut();
        for seq in head..tail {
            let idx = seq_to_index(seq, self.mask);
            // SAFETY: slots in [head, tail) were written by push and never popped.
            unsafe { (*self.slots[idx].get()).assume_init_drop() };
        }
    }
}

/// Writing half of an SPSC queue.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    tail: u64,
    cached_head: u64,
}

/// Reading half of an SPSC queue.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    head: u64,
    cached_tail: u64,
}

/// Creates a bounded queue with `cfg.capacity` slots.
pub fn channel<T>(cfg: RingConfig) -> (Producer<T>, Consumer<T>) {
    let slots = (0..cfg.capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        head: CachePadded(AtomicU64::new(0)),
        tail: CachePadded(AtomicU64::new(0)),
        mask: cfg.mask(),
        capacity: cfg.capacity as u64,
        slots,
    });
    (
        Producer {
            shared: Arc::clone(&shared),
            tail: 0,
            cached_head: 0,
        },
        Consumer {
            shared,
            head: 0,
            cached_tail: 0,
        },
    )
}

impl<T> Producer<T> {
    /// Non-blocking put. Hands the item back when the queue is full.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let s = &*self.shared;
        if self.tail - self.cached_head == s.capacity {
            self.cached_head = s.head.load(Ordering::Acquire);
            if self.tail - self.cached_head == s.capacity {
                return Err(item);
            }
        }
        let idx = seq_to_index(self.tail, s.mask);
        // SAFETY: the slot at `tail` is outside [head, tail) so the consumer
        // does not read it until the Release store below.
        unsafe { (*s.slots[idx].get()).write(item) };
        self.tail += 1;
        s.tail.store(self.tail, Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        (self.tail - self.shared.head.load(Ordering::Acquire)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }
}

impl<T> Consumer<T> {
    /// Non-blocking take.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let s = &*self.shared;
        if self.head == self.cached_tail {
            self.cached_tail = s.tail.load(Ordering::Acquire);
            if self.head == self.cached_tail {
                return None;
            }
        }
        let idx = seq_to_index(self.head, s.mask);
        // SAFETY: `head < tail`, so the producer published this slot and will
        // not overwrite it until the Release store below.
        let item = unsafe { (*s.slots[idx].get()).assume_init_read() };
        self.head += 1;
        s.head.store(self.head, Ordering::Release);
        Some(item)
    }

    pub fn len(&self) -> usize {
        (self.shared.tail.load(Ordering::Acquire) - self.head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }
}

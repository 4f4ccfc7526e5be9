//! Three-tier wait escalation: spin, then park, then sleep.
//!
//! The policy ([`BackoffPolicy`]) only counts steps and names the current
//! tier; the actual waiting is delegated to a [`Waiter`], so tests can swap
//! in a waiter that records or injects events instead of touching the OS.
//!
//! ```text
//! step:  0 .. spin_limit          spin_limit .. +park_limit        beyond
//!        [ Spin: spin_loop hint ] [ Park: park_timeout(park) ]     [ Sleep: sleep(sleep) ]
//! ```
//!
//! The sleep tier is unbounded: an empty queue stalls its waiter rather than
//! giving up on the buffer it is waiting for.

use std::time::Duration;

/// Escalation tier of a wait step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Spin,
    Park,
    Sleep,
}

/// Performs one wait step of the given tier.
pub trait Waiter: Send {
    fn wait(&mut self, stage: Stage);
}

/// Step thresholds for the escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Number of spin steps before escalating.
    pub spin_limit: u32,
    /// Number of park steps after spinning, before falling back to sleep.
    pub park_limit: u32,
}

impl BackoffPolicy {
    /// The receiver polls every lane for a while, then goes straight to sleep.
    pub const RECEIVER: BackoffPolicy = BackoffPolicy {
        spin_limit: 1000,
        park_limit: 0,
    };

    /// A handler spins briefly on its own lane, parks, then sleeps.
    pub const HANDLER: BackoffPolicy = BackoffPolicy {
        spin_limit: 100,
        park_limit: 10,
    };
}

/// Real waiter backed by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct ThreadWaiter {
    pub park: Duration,
    pub sleep: Duration,
}

impl Default for ThreadWaiter {
    fn default() -> Self {
        Self {
            park: Duration::from_micros(1),
            sleep: Duration::from_millis(1),
        }
    }
}

impl Waiter for ThreadWaiter {
    #[inline]
    fn wait(&mut self, stage: Stage) {
        match stage {
            Stage::Spin => std::hint::spin_loop(),
            Stage::Park => std::thread::park_timeout(self.park),
            Stage::Sleep => std::thread::sleep(self.sleep),
        }
    }
}

/// Escalation state for one waiting loop.
pub struct Backoff<W: Waiter = ThreadWaiter> {
    policy: BackoffPolicy,
    step: u32,
    waiter: W,
}

impl<W: Waiter> Backoff<W> {
    pub fn new(policy: BackoffPolicy, waiter: W) -> Self {
        Self {
            policy,
            step: 0,
            waiter,
        }
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.step = 0;
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        if self.step < self.policy.spin_limit {
            Stage::Spin
        } else if self.step - self.policy.spin_limit < self.policy.park_limit {
            Stage::Park
        } else {
            Stage::Sleep
        }
    }

    /// Waits one step of the current tier and advances. Returns the tier waited in.
    #[inline]
    pub fn snooze(&mut self) -> Stage {
        let stage = self.stage();
        self.waiter.wait(stage);
        self.step = self.step.saturating_add(1);
        stage
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    pub fn waiter_mut(&mut self) -> &mut W {
        &mut self.waiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording(Vec<Stage>);

    impl Waiter for Recording {
        fn wait(&mut self, stage: Stage) {
            self.0.push(stage);
        }
    }

    #[test]
    fn escalates_through_each_tier_in_order() {
        let policy = BackoffPolicy {
            spin_limit: 3,
            park_limit: 2,
        };
        let mut b = Backoff::new(policy, Recording::default());
        for _ in 0..8 {
            b.snooze();
        }
        use Stage::*;
        assert_eq!(
            b.waiter_mut().0,
            vec![Spin, Spin, Spin, Park, Park, Sleep, Sleep, Sleep]
        );
        b.reset();
        assert_eq!(b.stage(), Spin);
    }

    #[test]
    fn zero_park_limit_goes_straight_to_sleep() {
        let mut b = Backoff::new(BackoffPolicy::RECEIVER, Recording::default());
        for _ in 0..1000 {
            assert_eq!(b.snooze(), Stage::Spin);
        }
        assert_eq!(b.snooze(), Stage::Sleep);
    }
}

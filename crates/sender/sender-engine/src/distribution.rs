//! Weighted packet-type selection.
//!
//! The four weights (MINIMAL, ATTRIBUTE, ATTRIBUTE_GROUP, ERROR) sum to
//! [`DistributionTable::TOTAL`] and are kept as running prefix sums. A draw
//! `r` in `0..TOTAL` selects the first index whose prefix sum is non-zero and
//! at least `r`; zero-weight leading types can never be picked.
//!
//! An ERROR pick produces a malformed packet of some other type. The type is
//! redrawn over the non-error weights only (`0..prefix[ATTRIBUTE_GROUP]`),
//! or falls back to MINIMAL when every non-error weight is zero.

use quarry_wire::PacketType;
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("distribution sums to {sum}, expected {}", DistributionTable::TOTAL)]
    Sum { sum: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionTable {
    prefix: [u32; 4],
}

const ERROR_INDEX: usize = 3;

impl DistributionTable {
    pub const TOTAL: u32 = 100;

    pub fn new(weights: [u32; 4]) -> Result<Self, DistributionError> {
        let sum: u64 = weights.iter().map(|w| *w as u64).sum();
        if sum != Self::TOTAL as u64 {
            return Err(DistributionError::Sum { sum });
        }
        let mut prefix = weights;
        for i in 1..prefix.len() {
            prefix[i] += prefix[i - 1];
        }
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &[u32; 4] {
        &self.prefix
    }

    /// Index selected by draw `r`. Callers keep `r` below the last non-zero
    /// prefix they draw against.
    fn pick(&self, r: u32) -> usize {
        self.prefix
            .iter()
            .position(|&p| p != 0 && p >= r)
            .unwrap_or(ERROR_INDEX)
    }

    /// Draws a packet type and whether it is well formed.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> (PacketType, bool) {
        let index = self.pick(rng.gen_range(0..Self::TOTAL));
        if index != ERROR_INDEX {
            return (PacketType::ALL[index], true);
        }

        let valid_total = self.prefix[ERROR_INDEX - 1];
        if valid_total == 0 {
            return (PacketType::Minimal, false);
        }
        let index = self.pick(rng.gen_range(0..valid_total));
        (PacketType::ALL[index], false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn rejects_weights_not_summing_to_total() {
        assert_eq!(DistributionTable::new([50, 40, 0, 0]), Err(DistributionError::Sum { sum: 90 }));
        assert!(DistributionTable::new([25, 25, 25, 25]).is_ok());
    }

    #[test]
    fn prefix_sums_accumulate() {
        let t = DistributionTable::new([10, 10, 20, 60]).unwrap();
        assert_eq!(t.prefix(), &[10, 20, 40, 100]);
    }

    #[test]
    fn pick_skips_leading_zero_weights() {
        let t = DistributionTable::new([0, 70, 0, 30]).unwrap();
        assert_eq!(t.prefix(), &[0, 70, 70, 100]);
        assert_eq!(t.pick(0), 1);
        assert_eq!(t.pick(70), 1);
        assert_eq!(t.pick(71), 3);
    }

    #[test]
    fn pick_takes_the_first_equal_prefix() {
        // ATTRIBUTE and ATTRIBUTE_GROUP share prefix 50; the earlier wins.
        let t = DistributionTable::new([20, 30, 0, 50]).unwrap();
        assert_eq!(t.pick(50), 1);
        assert_eq!(t.pick(20), 0);
        assert_eq!(t.pick(21), 1);
    }

    #[test]
    fn error_remaps_over_valid_weights_only() {
        let t = DistributionTable::new([0, 70, 0, 30]).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut malformed = 0;
        for _ in 0..10_000 {
            let (ty, ok) = t.draw(&mut rng);
            assert_eq!(ty, PacketType::Attribute);
            if !ok {
                malformed += 1;
            }
        }
        assert!((2_000..4_000).contains(&malformed), "{malformed}");
    }

    #[test]
    fn all_error_falls_back_to_minimal() {
        let t = DistributionTable::new([0, 0, 0, 100]).unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..1_000 {
            assert_eq!(t.draw(&mut rng), (PacketType::Minimal, false));
        }
    }
}

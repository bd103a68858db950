//! Injected randomness.
//!
//! Every probabilistic decision in the graph and the generator goes through
//! [`RandomSource`], so tests can substitute a scripted sequence for a
//! seeded RNG.

use rand::Rng;
use std::collections::VecDeque;

/// Source of the draws consumed by the procedure graph and event generator.
pub trait RandomSource {
    /// Uniform draw in `[0, 1)`.
    fn unit(&mut self) -> f64;

    /// Uniform integer in `[low, high]`. Returns `low` when `high <= low`.
    fn range_inclusive(&mut self, low: u64, high: u64) -> u64;

    /// Uniform index in `[0, len)`. Returns 0 when `len == 0`.
    fn index(&mut self, len: usize) -> usize;
}

impl<R: Rng + ?Sized> RandomSource for R {
    fn unit(&mut self) -> f64 {
        self.gen::<f64>()
    }

    fn range_inclusive(&mut self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        self.gen_range(low..=high)
    }

    fn index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.gen_range(0..len)
    }
}

/// Scripted draw sequence for deterministic tests.
///
/// Integer draws are derived from the next unit value, so a script like
/// `[0.39, 0.0]` reads as "take the 40% fork, then the smallest decrease".
/// The script repeats once exhausted.
#[derive(Debug, Clone)]
pub struct FixedDraws {
    script: Vec<f64>,
    pending: VecDeque<f64>,
    consumed: usize,
}

impl FixedDraws {
    pub fn new(script: impl IntoIterator<Item = f64>) -> Self {
        let script: Vec<f64> = script
            .into_iter()
            .map(|value| value.clamp(0.0, 1.0 - f64::EPSILON))
            .collect();
        Self {
            pending: script.iter().copied().collect(),
            script,
            consumed: 0,
        }
    }

    /// Number of unit values consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    fn next_value(&mut self) -> f64 {
        if self.pending.is_empty() {
            self.pending.extend(self.script.iter().copied());
        }
        self.consumed += 1;
        self.pending.pop_front().unwrap_or(0.0)
    }
}

impl RandomSource for FixedDraws {
    fn unit(&mut self) -> f64 {
        self.next_value()
    }

    fn range_inclusive(&mut self, low: u64, high: u64) -> u64 {
        if high <= low {
            return low;
        }
        let span = (high - low + 1) as f64;
        let offset = (self.next_value() * span).floor() as u64;
        low + offset.min(high - low)
    }

    fn index(&mut self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let offset = (self.next_value() * len as f64).floor() as usize;
        offset.min(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_fixed_draws_map_units_to_ranges() {
        let mut draws = FixedDraws::new([0.0, 0.999, 0.5]);
        assert_eq!(draws.range_inclusive(1, 300), 1);
        assert_eq!(draws.range_inclusive(1, 300), 300);
        assert_eq!(draws.index(4), 2);
        assert_eq!(draws.consumed(), 3);
    }

    #[test]
    fn test_fixed_draws_repeat_script() {
        let mut draws = FixedDraws::new([0.25]);
        assert_eq!(draws.unit(), 0.25);
        assert_eq!(draws.unit(), 0.25);
    }

    #[test]
    fn test_degenerate_ranges_do_not_consume() {
        let mut draws = FixedDraws::new([0.7]);
        assert_eq!(draws.range_inclusive(5, 5), 5);
        assert_eq!(draws.index(0), 0);
        assert_eq!(draws.consumed(), 0);
    }

    #[test]
    fn test_seeded_rng_is_a_random_source() {
        let mut a = ChaCha8Rng::seed_from_u64(42);
        let mut b = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..100 {
            let x = RandomSource::range_inclusive(&mut a, 1, 500);
            assert_eq!(x, RandomSource::range_inclusive(&mut b, 1, 500));
            assert!((1..=500).contains(&x));
        }
    }
}

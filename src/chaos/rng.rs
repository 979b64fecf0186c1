//! Seeded, reproducible random primitives for chaos decisions
//!
//! Every random choice in the chaos pipeline flows through
//! [`DeterministicRng`], a thin wrapper over [`rand_pcg::Pcg64`]. PCG is a
//! fixed algorithm, so the same seed and call sequence produce bitwise
//! identical outputs across runs and platforms. Plugins obtain their own
//! independent stream via [`DeterministicRng::fork`] so that adding a
//! plugin never perturbs the draws of another.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64;

/// Deterministic random source backed by PCG-64.
///
/// # Examples
///
/// ```
/// use mcprobe::chaos::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_f64(), b.next_f64());
/// ```
#[derive(Debug)]
pub struct DeterministicRng {
    rng: Pcg64,
    seed: u64,
}

impl DeterministicRng {
    /// Create a new generator from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Pcg64::seed_from_u64(seed),
            seed,
        }
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive an independent child generator from this generator's seed and
    /// a stable tag.
    ///
    /// Forking does not consume entropy from `self`: the child seed is a
    /// pure function of `(seed, tag)`, so plugins initialized from the same
    /// master seed always receive the same streams regardless of
    /// registration order.
    pub fn fork(&self, tag: &str) -> Self {
        Self::new(self.seed ^ fnv1a(tag.as_bytes()))
    }

    /// Next float uniformly distributed in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        // 53 high bits of the raw draw give a uniform double in [0, 1).
        (self.rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Next integer uniformly distributed in the half-open range `[lo, hi)`.
    ///
    /// `lo >= hi` is a programmer error: debug builds panic, release builds
    /// clamp to `lo`.
    pub fn next_range(&mut self, lo: u64, hi: u64) -> u64 {
        debug_assert!(lo < hi, "next_range requires lo < hi, got {lo}..{hi}");
        if lo >= hi {
            return lo;
        }
        lo + self.rng.next_u64() % (hi - lo)
    }

    /// Next float uniformly distributed in `[lo, hi)`.
    pub fn next_f64_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.next_f64() * (hi - lo)
    }

    /// `true` with probability `p`; out-of-range `p` is clamped to `[0, 1]`.
    pub fn next_bool(&mut self, p: f64) -> bool {
        let p = p.clamp(0.0, 1.0);
        self.next_f64() < p
    }

    /// Shuffle a slice in place (Fisher-Yates), stable for equal seeds.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(0, i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}

/// 64-bit FNV-1a over a byte string; used to turn plugin names into stable
/// seed perturbations.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = DeterministicRng::new(42);
        let mut b = DeterministicRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_f64().to_bits(), b.next_f64().to_bits());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = DeterministicRng::new(1);
        let mut b = DeterministicRng::new(2);
        let same = (0..100).filter(|_| a.next_f64() == b.next_f64()).count();
        assert!(same < 100, "distinct seeds should produce distinct streams");
    }

    #[test]
    fn test_mixed_call_sequence_reproducible() {
        let run = |seed: u64| {
            let mut rng = DeterministicRng::new(seed);
            let mut trace = Vec::new();
            for i in 0..50 {
                if i % 3 == 0 {
                    trace.push(format!("{}", rng.next_range(0, 1000)));
                } else if i % 3 == 1 {
                    trace.push(format!("{:.17}", rng.next_f64()));
                } else {
                    trace.push(format!("{}", rng.next_bool(0.5)));
                }
            }
            trace
        };
        assert_eq!(run(777), run(777));
    }

    #[test]
    fn test_next_f64_within_unit_interval() {
        let mut rng = DeterministicRng::new(9);
        for _ in 0..1000 {
            let x = rng.next_f64();
            assert!((0.0..1.0).contains(&x), "out of range: {x}");
        }
    }

    #[test]
    fn test_next_range_bounds() {
        let mut rng = DeterministicRng::new(3);
        for _ in 0..1000 {
            let x = rng.next_range(10, 20);
            assert!((10..20).contains(&x), "out of range: {x}");
        }
    }

    #[test]
    fn test_next_bool_extremes() {
        let mut rng = DeterministicRng::new(5);
        assert!(!(0..100).any(|_| rng.next_bool(0.0)));
        assert!((0..100).all(|_| rng.next_bool(1.0)));
        // Out-of-range probabilities clamp rather than panic.
        assert!(rng.next_bool(7.5));
        assert!(!rng.next_bool(-1.0));
    }

    #[test]
    fn test_shuffle_stable_for_equal_seeds() {
        let mut a = DeterministicRng::new(11);
        let mut b = DeterministicRng::new(11);
        let mut xs: Vec<u32> = (0..32).collect();
        let mut ys = xs.clone();
        a.shuffle(&mut xs);
        b.shuffle(&mut ys);
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = DeterministicRng::new(13);
        let mut xs: Vec<u32> = (0..64).collect();
        rng.shuffle(&mut xs);
        let mut sorted = xs.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..64).collect::<Vec<u32>>());
    }

    #[test]
    fn test_fork_independent_of_call_order() {
        let master = DeterministicRng::new(12345);
        let mut first = master.fork("network");
        let mut second = master.fork("network");
        assert_eq!(first.next_f64(), second.next_f64());

        let mut other = master.fork("timing");
        assert_ne!(other.seed(), first.seed());
    }
}

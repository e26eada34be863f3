//! Deterministic random number generation for the demo data set.
//!
//! RULE: nothing in the crate calls a platform RNG. The demo generator
//! draws every random value from a DemoRng derived from one seed, so the
//! same seed always produces the same accounts, budgets and statements.
//!
//! Each part of the data set gets its own stream, seeded from
//! (seed XOR stream index). Adding a stream never changes the others.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct DemoRng {
    pub stream: DemoStream,
    inner: Pcg64Mcg,
}

impl DemoRng {
    pub fn new(seed: u64, stream: DemoStream) -> Self {
        let derived_seed = seed ^ (stream as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            stream,
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n). Returns 0 when n is 0.
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            return 0;
        }
        self.inner.next_u64() % n
    }

    /// Roll an integer in [lo, hi].
    pub fn range_i64(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        lo + self.next_u64_below((hi - lo + 1) as u64) as i64
    }

    /// Bernoulli trial: true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// Stable stream assignments. Append only; reordering reseeds everything.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum DemoStream {
    Hierarchy = 0,
    Budgets = 1,
    Settings = 2,
    Statements = 3,
}

//! Deterministic RNG streams for parallel stages.
//!
//! Every randomized stage draws from a `SmallRng` seeded by mixing
//! `(seed, worker, iteration, purpose)` through splitmix64, so draws are
//! reproducible regardless of how rayon schedules the work items.

use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Stream tag: projection-tree construction.
pub(crate) const PURPOSE_TREE: u64 = 0xA1;
/// Stream tag: neighbor-list reservoir sampling.
pub(crate) const PURPOSE_SAMPLE: u64 = 0xA2;
/// Stream tag: reverse-neighbor reservoir sampling.
pub(crate) const PURPOSE_REVERSE: u64 = 0xA3;
/// Stream tag: query seed padding and routing tie coins.
pub(crate) const PURPOSE_QUERY: u64 = 0xA4;

/// splitmix64 finalizer (Steele, Lea & Flood 2014).
#[inline]
pub(crate) fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Collapse a stream key to a single 64-bit seed.
#[inline]
pub(crate) fn mix(seed: u64, worker: u64, iter: u64, purpose: u64) -> u64 {
    splitmix64(seed ^ splitmix64(worker ^ splitmix64(iter ^ splitmix64(purpose))))
}

/// A generator for the stream keyed by `(seed, worker, iter, purpose)`.
#[inline]
pub(crate) fn stream(seed: u64, worker: u64, iter: u64, purpose: u64) -> SmallRng {
    SmallRng::seed_from_u64(mix(seed, worker, iter, purpose))
}

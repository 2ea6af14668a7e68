//! Stateless hash-based random numbers for simulated maps and masks.
//!
//! Every value is a pure function of `(seed, stream, index)`, so a pixel's
//! draw does not depend on the order pixels are visited in. Simulations are
//! reproducible regardless of how the work is split across threads.
//!
//! The mixer is SplitMix64; Gaussian draws use Box-Muller.

use std::f64::consts::PI;

/// SplitMix64 finalizer.
#[inline]
pub fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Mix a seed with a stream id and an element index.
///
/// The two indices are spread with different odd multipliers so that
/// `(stream, index)` pairs do not collide.
#[inline]
pub fn combine_indices(seed: u64, stream: u32, index: u64) -> u64 {
    seed ^ (stream as u64).wrapping_mul(0x517cc1b727220a95)
        ^ index.wrapping_mul(0x5851f42d4c957f2d)
}

/// Uniform f64 in `[0, 1)`.
///
/// ```
/// use lenspix_core::rng::uniform;
///
/// let value = uniform(42, 0, 7);
/// assert!((0.0..1.0).contains(&value));
/// assert_eq!(uniform(42, 0, 7), value);
/// ```
#[inline]
pub fn uniform(seed: u64, stream: u32, index: u64) -> f64 {
    let hash = splitmix64(combine_indices(seed, stream, index));
    // upper 53 bits fill the mantissa
    (hash >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Standard normal draw.
#[inline]
pub fn gaussian(seed: u64, stream: u32, index: u64) -> f64 {
    let u1 = uniform(seed, stream, index.wrapping_mul(2)).max(1e-300);
    let u2 = uniform(seed, stream, index.wrapping_mul(2).wrapping_add(1));
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

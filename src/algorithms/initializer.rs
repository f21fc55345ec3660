use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

/// Seeded generator for parameter initialization. Each model derives its
/// own stream from the configured seed so the two parameter sets differ.
pub fn seeded_rng(seed: u64, stream: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(stream))
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // Box-Muller; u1 is kept away from zero so ln stays finite.
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

pub fn normal<R: Rng + ?Sized>(rng: &mut R, shape: (usize, usize), mean: f32, std_dev: f32) -> Array2<f32> {
    Array2::from_shape_simple_fn(shape, || standard_normal(rng) * std_dev + mean)
}

/// Glorot/Xavier uniform for a `[fan_in, fan_out]` weight matrix.
pub fn xavier_uniform<R: Rng + ?Sized>(rng: &mut R, fan_in: usize, fan_out: usize) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array2::from_shape_simple_fn((fan_in, fan_out), || rng.gen_range(-limit..limit))
}

pub fn zeros(size: usize) -> Array1<f32> {
    Array1::zeros(size)
}

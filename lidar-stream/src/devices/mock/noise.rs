//! Seeded noise for the synthetic depth source

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal, StandardNormal, Uniform};

/// Noise source with a reproducible seed
#[derive(Clone)]
pub struct SampleNoise {
    rng: SmallRng,
    unit: Uniform<f32>,
}

impl SampleNoise {
    /// Seed 0 draws from entropy; anything else is reproducible
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self {
            rng,
            unit: Uniform::new(0.0f32, 1.0),
        }
    }

    #[inline]
    pub fn gaussian(&mut self, stddev: f32) -> f32 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * stddev
    }

    /// Range sample around `truth`, clamped to the non-zero u16 range
    ///
    /// Zero is reserved for "no return", so a noisy sample never lands there.
    #[inline]
    pub fn range(&mut self, truth: f32, stddev: f32) -> u16 {
        (truth + self.gaussian(stddev)).clamp(1.0, u16::MAX as f32) as u16
    }

    /// Non-negative sample from N(mean, stddev)
    pub fn level(&mut self, mean: f32, stddev: f32) -> u16 {
        let v = match Normal::new(mean, stddev.max(f32::EPSILON)) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean,
        };
        v.clamp(0.0, u16::MAX as f32) as u16
    }

    /// True with the given probability
    #[inline]
    pub fn chance(&mut self, probability: f32) -> bool {
        self.unit.sample(&mut self.rng) < probability
    }

    /// Fill `buf` with random bytes
    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_seed() {
        let mut a = SampleNoise::new(42);
        let mut b = SampleNoise::new(42);
        for _ in 0..100 {
            assert_eq!(a.range(1000.0, 5.0), b.range(1000.0, 5.0));
        }
    }

    #[test]
    fn test_range_never_zero() {
        let mut noise = SampleNoise::new(7);
        for _ in 0..1000 {
            assert!(noise.range(0.5, 10.0) >= 1);
        }
    }

    #[test]
    fn test_chance_probability() {
        let mut noise = SampleNoise::new(42);
        let trials = 10000;
        let hits = (0..trials).filter(|_| noise.chance(0.3)).count();
        let ratio = hits as f32 / trials as f32;
        assert!((ratio - 0.3).abs() < 0.05);
    }
}

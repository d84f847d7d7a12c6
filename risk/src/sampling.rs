//! Pseudo-random and quasi-random normal generators for simulation VaR

use crate::error::{Result, RiskError};
use crate::stats::inverse_normal_cdf;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Open01};
use std::f64::consts::PI;

/// Map two independent uniforms on (0, 1) to two independent standard normals
pub fn box_muller(u1: f64, u2: f64) -> (f64, f64) {
    let radius = (-2.0 * u1.ln()).sqrt();
    let angle = 2.0 * PI * u2;
    (radius * angle.cos(), radius * angle.sin())
}

/// Standard normal generator driven by Box-Muller
pub struct StandardNormalSampler {
    rng: StdRng,
    spare: Option<f64>,
}

impl StandardNormalSampler {
    /// Seeded generator, or entropy-seeded when no seed is given
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, spare: None }
    }

    pub fn sample(&mut self) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        let u1: f64 = Open01.sample(&mut self.rng);
        let u2: f64 = Open01.sample(&mut self.rng);
        let (z1, z2) = box_muller(u1, u2);
        self.spare = Some(z2);
        z1
    }

    pub fn fill(&mut self, out: &mut [f64]) {
        for slot in out.iter_mut() {
            *slot = self.sample();
        }
    }
}

/// Correlates independent standard normals through a Cholesky factor
#[derive(Debug, Clone)]
pub struct CorrelatedNormals {
    factor: DMatrix<f64>,
}

impl CorrelatedNormals {
    pub fn new(correlation: &DMatrix<f64>) -> Result<Self> {
        if !correlation.is_square() {
            return Err(RiskError::MatrixError(format!(
                "correlation matrix must be square, got {}x{}",
                correlation.nrows(),
                correlation.ncols()
            )));
        }

        let factor = correlation
            .clone()
            .cholesky()
            .ok_or_else(|| {
                RiskError::MatrixError("correlation matrix is not positive definite".to_string())
            })?
            .l();

        Ok(Self { factor })
    }

    pub fn dimension(&self) -> usize {
        self.factor.nrows()
    }

    /// Apply the lower-triangular factor to a vector of standard normals
    pub fn transform(&self, z: &[f64]) -> Vec<f64> {
        let z = DVector::from_column_slice(z);
        (&self.factor * z).iter().copied().collect()
    }

    pub fn draw(&self, sampler: &mut StandardNormalSampler) -> Vec<f64> {
        let mut z = vec![0.0; self.dimension()];
        sampler.fill(&mut z);
        self.transform(&z)
    }
}

const HALTON_PRIMES: [u64; 32] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131,
];

fn radical_inverse(mut index: u64, base: u64) -> f64 {
    let inv_base = 1.0 / base as f64;
    let mut fraction = inv_base;
    let mut result = 0.0;
    while index > 0 {
        result += (index % base) as f64 * fraction;
        index /= base;
        fraction *= inv_base;
    }
    result
}

/// Low-discrepancy Halton sequence, one prime base per dimension
#[derive(Debug, Clone)]
pub struct HaltonSequence {
    dimensions: usize,
    index: u64,
}

impl HaltonSequence {
    pub const MAX_DIMENSIONS: usize = HALTON_PRIMES.len();

    pub fn new(dimensions: usize) -> Result<Self> {
        Self::starting_at(dimensions, 1)
    }

    /// Sequence positioned at `index`; index 0 (the origin) is never emitted
    pub fn starting_at(dimensions: usize, index: u64) -> Result<Self> {
        if dimensions == 0 || dimensions > Self::MAX_DIMENSIONS {
            return Err(RiskError::InvalidParameter(format!(
                "Halton sequence supports 1..={} dimensions, got {}",
                Self::MAX_DIMENSIONS,
                dimensions
            )));
        }
        Ok(Self {
            dimensions,
            index: index.max(1),
        })
    }

    pub fn next_point(&mut self) -> Vec<f64> {
        let point = HALTON_PRIMES[..self.dimensions]
            .iter()
            .map(|&base| radical_inverse(self.index, base))
            .collect();
        self.index += 1;
        point
    }

    /// Next point mapped through the inverse normal CDF
    pub fn next_normals(&mut self) -> Result<Vec<f64>> {
        self.next_point()
            .into_iter()
            .map(inverse_normal_cdf)
            .collect()
    }
}

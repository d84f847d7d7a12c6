//! Simulation VaR over a correlated multi-asset normal model

use super::historical::{empirical_tail, weighted_tail};
use super::parametric::normal_estimate;
use super::{validate_confidence_levels, VarEngine, VarEstimate, VarMethod, VarMethodResult};
use crate::error::{Result, RiskError};
use crate::portfolio::RiskFactorEstimate;
use crate::sampling::{CorrelatedNormals, HaltonSequence, StandardNormalSampler};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Per-period asset moments and portfolio weights driving the simulation
#[derive(Debug, Clone)]
pub struct SimulationInputs {
    pub asset_ids: Vec<String>,
    pub weights: DVector<f64>,
    pub expected_returns: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

impl SimulationInputs {
    pub fn new(
        asset_ids: Vec<String>,
        weights: DVector<f64>,
        expected_returns: DVector<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<Self> {
        let n = asset_ids.len();
        if n == 0 {
            return Err(RiskError::MissingData("no assets to simulate".into()));
        }
        if weights.len() != n || expected_returns.len() != n || covariance.shape() != (n, n) {
            return Err(RiskError::MatrixError(format!(
                "dimension mismatch: {} assets, {} weights, {} means, {}x{} covariance",
                n,
                weights.len(),
                expected_returns.len(),
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if weights
            .iter()
            .chain(expected_returns.iter())
            .chain(covariance.iter())
            .any(|v| !v.is_finite())
        {
            return Err(RiskError::numerical("simulation_inputs", "non-finite input"));
        }
        for i in 0..n {
            if covariance[(i, i)] < 0.0 {
                return Err(RiskError::MatrixError(format!(
                    "negative variance for asset {}",
                    asset_ids[i]
                )));
            }
            for j in 0..i {
                if (covariance[(i, j)] - covariance[(j, i)]).abs() > 1e-12 {
                    return Err(RiskError::MatrixError("covariance matrix is not symmetric".into()));
                }
            }
        }

        Ok(Self {
            asset_ids,
            weights,
            expected_returns,
            covariance,
        })
    }

    /// Align portfolio weights with an estimate; assets without a weight get zero
    pub fn from_estimate(
        estimate: &RiskFactorEstimate,
        weights: &BTreeMap<String, f64>,
    ) -> Result<Self> {
        let aligned: Vec<f64> = estimate
            .asset_ids
            .iter()
            .map(|id| weights.get(id).copied().unwrap_or(0.0))
            .collect();
        let total: f64 = aligned.iter().sum();
        if total <= 0.0 {
            return Err(RiskError::MissingData(
                "no weighted position has a return history".into(),
            ));
        }

        Self::new(
            estimate.asset_ids.clone(),
            DVector::from_iterator(aligned.len(), aligned.iter().map(|w| w / total)),
            estimate.expected_returns.clone(),
            estimate.covariance.clone(),
        )
    }

    pub fn dimension(&self) -> usize {
        self.asset_ids.len()
    }

    pub fn portfolio_mean(&self) -> f64 {
        self.weights.dot(&self.expected_returns)
    }

    pub fn portfolio_variance(&self) -> f64 {
        (&self.covariance * &self.weights).dot(&self.weights).max(0.0)
    }

    pub fn volatilities(&self) -> DVector<f64> {
        self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
    }

    /// Correlation implied by the covariance, `None` when an asset has no variance
    pub fn correlation(&self) -> Option<DMatrix<f64>> {
        let vols = self.volatilities();
        if vols.iter().any(|v| *v <= 0.0) {
            return None;
        }
        let n = self.dimension();
        Some(DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                1.0
            } else {
                self.covariance[(i, j)] / (vols[i] * vols[j])
            }
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum PathGenerator {
    Pseudo,
    Halton,
}

/// Seed for chunk `index` derived from the base seed
fn chunk_seed(base: u64, index: usize) -> u64 {
    base.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

impl VarEngine {
    /// Monte Carlo VaR from correlated pseudo-random normal draws
    pub fn monte_carlo(
        &self,
        inputs: &SimulationInputs,
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        self.simulate_method(inputs, confidence_levels, horizon_days, PathGenerator::Pseudo)
    }

    /// Monte Carlo VaR driven by a Halton sequence instead of pseudo-random draws
    pub fn quasi_monte_carlo(
        &self,
        inputs: &SimulationInputs,
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        self.simulate_method(inputs, confidence_levels, horizon_days, PathGenerator::Halton)
    }

    /// Portfolio-level simulation with the mean shifted into the loss tail,
    /// reweighted by the likelihood ratio of the original to the shifted density
    pub fn importance_sampling(
        &self,
        inputs: &SimulationInputs,
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        validate_simulation_args(confidence_levels, horizon_days)?;

        let h = horizon_days as f64;
        let mean = inputs.portfolio_mean() * h;
        let sigma = (inputs.portfolio_variance() * h).sqrt();
        if sigma <= 0.0 {
            return Err(RiskError::numerical(
                "importance_sampling",
                "portfolio has zero variance",
            ));
        }

        let k = self.config.importance_shift_sigmas;
        let base = self.base_seed();
        let chunk = self.config.simulation_chunk_size;

        let chunks: Vec<Vec<(f64, f64)>> = chunk_ranges(self.config.simulations, chunk)
            .into_par_iter()
            .map(|(index, len)| {
                let mut sampler = StandardNormalSampler::new(Some(chunk_seed(base, index)));
                (0..len)
                    .map(|_| {
                        let z = sampler.sample();
                        // x = μ − kσ + σz; likelihood ratio φ(z − k)/φ(z)
                        let value = mean + sigma * (z - k);
                        let ratio = (k * z - 0.5 * k * k).exp();
                        (value, ratio)
                    })
                    .collect()
            })
            .collect();

        let mut pairs: Vec<(f64, f64)> = chunks.into_iter().flatten().collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let estimates = confidence_levels
            .iter()
            .map(|&c| {
                let (var, cvar) = weighted_tail(&pairs, c);
                VarEstimate {
                    confidence: c,
                    var,
                    cvar,
                }
            })
            .collect();

        debug!(paths = pairs.len(), shift_sigmas = k, "importance sampling complete");

        Ok(VarMethodResult {
            method: VarMethod::ImportanceSampling,
            estimates,
            low_confidence: false,
            horizon_days,
        })
    }

    fn simulate_method(
        &self,
        inputs: &SimulationInputs,
        confidence_levels: &[f64],
        horizon_days: u32,
        generator: PathGenerator,
    ) -> Result<VarMethodResult> {
        validate_simulation_args(confidence_levels, horizon_days)?;

        let Some(factor) = self.correlation_factor(inputs) else {
            return self.portfolio_normal_fallback(inputs, confidence_levels, horizon_days);
        };

        let paths = self.simulate_paths(inputs, &factor, horizon_days, generator)?;
        let estimates = confidence_levels
            .iter()
            .map(|&c| {
                let (var, cvar) = empirical_tail(&paths, c);
                VarEstimate {
                    confidence: c,
                    var,
                    cvar,
                }
            })
            .collect();

        let method = match generator {
            PathGenerator::Pseudo => VarMethod::MonteCarlo,
            PathGenerator::Halton => VarMethod::QuasiMonteCarlo,
        };
        debug!(?method, paths = paths.len(), assets = inputs.dimension(), "simulation complete");

        Ok(VarMethodResult {
            method,
            estimates,
            low_confidence: false,
            horizon_days,
        })
    }

    /// Cholesky factor of the asset correlation, or `None` when the model is
    /// single-asset or degenerate
    fn correlation_factor(&self, inputs: &SimulationInputs) -> Option<CorrelatedNormals> {
        if inputs.dimension() < 2 {
            debug!("single asset, using parametric normal");
            return None;
        }
        let correlation = inputs.correlation()?;
        match CorrelatedNormals::new(&correlation) {
            Ok(factor) => Some(factor),
            Err(e) => {
                warn!(error = %e, "degenerate covariance, using parametric normal");
                None
            }
        }
    }

    fn portfolio_normal_fallback(
        &self,
        inputs: &SimulationInputs,
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let mean = inputs.portfolio_mean();
        let std_dev = inputs.portfolio_variance().sqrt();
        let estimates = confidence_levels
            .iter()
            .map(|&c| normal_estimate(mean, std_dev, c, horizon_days))
            .collect::<Result<Vec<_>>>()?;

        Ok(VarMethodResult {
            method: VarMethod::ParametricNormal,
            estimates,
            low_confidence: false,
            horizon_days,
        })
    }

    /// Simulated horizon portfolio returns, sorted ascending
    fn simulate_paths(
        &self,
        inputs: &SimulationInputs,
        factor: &CorrelatedNormals,
        horizon_days: u32,
        generator: PathGenerator,
    ) -> Result<Vec<f64>> {
        let h = horizon_days as f64;
        let drift: Vec<f64> = inputs.expected_returns.iter().map(|m| m * h).collect();
        let scale: Vec<f64> = inputs.volatilities().iter().map(|s| s * h.sqrt()).collect();
        let weights: Vec<f64> = inputs.weights.iter().copied().collect();
        let dims = inputs.dimension();

        let portfolio_return = |z: &[f64]| -> f64 {
            factor
                .transform(z)
                .iter()
                .enumerate()
                .map(|(i, x)| weights[i] * (drift[i] + scale[i] * x))
                .sum()
        };

        let base = self.base_seed();
        let chunk = self.config.simulation_chunk_size;

        let chunks = chunk_ranges(self.config.simulations, chunk)
            .into_par_iter()
            .map(|(index, len)| -> Result<Vec<f64>> {
                let mut out = Vec::with_capacity(len);
                match generator {
                    PathGenerator::Pseudo => {
                        let mut sampler = StandardNormalSampler::new(Some(chunk_seed(base, index)));
                        let mut z = vec![0.0; dims];
                        for _ in 0..len {
                            sampler.fill(&mut z);
                            out.push(portfolio_return(&z));
                        }
                    }
                    PathGenerator::Halton => {
                        let start = (index * chunk) as u64 + 1;
                        let mut halton = HaltonSequence::starting_at(dims, start)?;
                        for _ in 0..len {
                            let z = halton.next_normals()?;
                            out.push(portfolio_return(&z));
                        }
                    }
                }
                Ok(out)
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let mut paths: Vec<f64> = chunks.into_iter().flatten().collect();
        paths.sort_by(|a, b| a.total_cmp(b));
        Ok(paths)
    }

    fn base_seed(&self) -> u64 {
        self.config.random_seed.unwrap_or_else(rand::random)
    }
}

fn validate_simulation_args(confidence_levels: &[f64], horizon_days: u32) -> Result<()> {
    validate_confidence_levels(confidence_levels)?;
    if horizon_days == 0 {
        return Err(RiskError::InvalidTimeHorizon(horizon_days));
    }
    Ok(())
}

/// (chunk index, path count) pairs covering `total` paths
fn chunk_ranges(total: usize, chunk: usize) -> Vec<(usize, usize)> {
    let chunk = chunk.max(1);
    (0..total.div_ceil(chunk))
        .map(|index| (index, chunk.min(total - index * chunk)))
        .collect()
}

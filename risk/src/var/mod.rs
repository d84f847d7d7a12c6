//! Value at Risk (VaR) and Conditional VaR engines
//!
//! Implements three families of estimators over a daily return series:
//! - Parametric: normal, Student-t and Cornish-Fisher adjusted quantiles
//! - Historical: plain, exponentially weighted and GARCH-filtered empirical quantiles
//! - Simulation: Monte Carlo, importance sampling and quasi-Monte Carlo over a
//!   correlated multi-asset model
//!
//! VaR values are lower-tail returns: more negative means a larger loss. CVaR
//! (expected shortfall) is always at or below the matching VaR.

mod decomposition;
mod historical;
mod parametric;
mod simulation;

pub use decomposition::{parametric_portfolio_var, PositionVar, VarDecomposition};
pub use simulation::SimulationInputs;

pub(crate) use parametric::normal_estimate;

use crate::error::{Result, RiskError};
use crate::stats::{self, SampleMoments, StatsConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// VaR estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarMethod {
    ParametricNormal,
    StudentT,
    CornishFisher,
    Historical,
    WeightedHistorical,
    FilteredHistorical,
    MonteCarlo,
    ImportanceSampling,
    QuasiMonteCarlo,
}

/// Fewest simulated paths a validated configuration accepts
pub const MIN_SIMULATIONS: usize = 10_000;

/// VaR engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarConfig {
    #[serde(default = "default_confidence_levels")]
    pub confidence_levels: Vec<f64>,

    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    /// Number of simulated paths for simulation methods
    #[serde(default = "default_simulations")]
    pub simulations: usize,

    /// Paths generated per parallel chunk
    #[serde(default = "default_simulation_chunk_size")]
    pub simulation_chunk_size: usize,

    /// Below this many observations results are flagged low-confidence
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Random seed for reproducible simulation (None = random)
    #[serde(default)]
    pub random_seed: Option<u64>,

    #[serde(default = "default_student_t_dof")]
    pub student_t_dof: f64,

    /// Decay factor for weighted historical simulation
    #[serde(default = "default_ewma_lambda")]
    pub ewma_lambda: f64,

    /// Importance-sampling mean shift, in portfolio standard deviations
    #[serde(default = "default_importance_shift_sigmas")]
    pub importance_shift_sigmas: f64,

    /// Weight bump for finite-difference marginal VaR
    #[serde(default = "default_marginal_bump")]
    pub marginal_bump: f64,
}

fn default_confidence_levels() -> Vec<f64> {
    vec![0.90, 0.95, 0.99]
}

fn default_horizon_days() -> u32 {
    1
}

fn default_simulations() -> usize {
    10_000
}

fn default_simulation_chunk_size() -> usize {
    1_000
}

fn default_min_observations() -> usize {
    30
}

fn default_student_t_dof() -> f64 {
    5.0
}

fn default_ewma_lambda() -> f64 {
    0.94
}

fn default_importance_shift_sigmas() -> f64 {
    2.0
}

fn default_marginal_bump() -> f64 {
    1e-4
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            confidence_levels: default_confidence_levels(),
            horizon_days: default_horizon_days(),
            simulations: default_simulations(),
            simulation_chunk_size: default_simulation_chunk_size(),
            min_observations: default_min_observations(),
            random_seed: None,
            student_t_dof: default_student_t_dof(),
            ewma_lambda: default_ewma_lambda(),
            importance_shift_sigmas: default_importance_shift_sigmas(),
            marginal_bump: default_marginal_bump(),
        }
    }
}

impl VarConfig {
    pub fn validate(&self) -> Result<()> {
        if self.confidence_levels.is_empty() {
            return Err(RiskError::Config("at least one confidence level is required".into()));
        }
        validate_confidence_levels(&self.confidence_levels)?;
        if self.horizon_days == 0 {
            return Err(RiskError::InvalidTimeHorizon(self.horizon_days));
        }
        if self.simulations < MIN_SIMULATIONS {
            return Err(RiskError::Config(format!(
                "at least {} simulated paths are required, got {}",
                MIN_SIMULATIONS, self.simulations
            )));
        }
        if self.simulation_chunk_size == 0 {
            return Err(RiskError::Config("simulation chunk size must be positive".into()));
        }
        if self.student_t_dof <= 2.0 {
            return Err(RiskError::Config(format!(
                "Student-t degrees of freedom must exceed 2, got {}",
                self.student_t_dof
            )));
        }
        if !(self.ewma_lambda > 0.0 && self.ewma_lambda < 1.0) {
            return Err(RiskError::Config(format!(
                "EWMA lambda must be in (0, 1), got {}",
                self.ewma_lambda
            )));
        }
        if self.importance_shift_sigmas < 0.0 || self.marginal_bump <= 0.0 {
            return Err(RiskError::Config(
                "importance shift must be non-negative and marginal bump positive".into(),
            ));
        }
        Ok(())
    }
}

/// VaR and CVaR at one confidence level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarEstimate {
    pub confidence: f64,
    pub var: f64,
    pub cvar: f64,
}

/// Estimates of a single method across confidence levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarMethodResult {
    pub method: VarMethod,
    pub estimates: Vec<VarEstimate>,
    /// Fewer observations than `min_observations`
    pub low_confidence: bool,
    pub horizon_days: u32,
}

impl VarMethodResult {
    pub fn at(&self, confidence: f64) -> Option<&VarEstimate> {
        self.estimates
            .iter()
            .find(|e| (e.confidence - confidence).abs() < 1e-9)
    }
}

/// Every VaR family run over the same inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarReport {
    pub moments: SampleMoments,
    pub methods: Vec<VarMethodResult>,
    /// Methods ordered from most to least conservative 95% VaR
    pub conservatism_ranking: Vec<(VarMethod, f64)>,
}

impl VarReport {
    pub fn method(&self, method: VarMethod) -> Option<&VarMethodResult> {
        self.methods.iter().find(|m| m.method == method)
    }
}

/// VaR calculation engine
#[derive(Debug, Clone, Default)]
pub struct VarEngine {
    config: VarConfig,
    stats: StatsConfig,
}

impl VarEngine {
    pub fn new(config: VarConfig) -> Self {
        Self {
            config,
            stats: StatsConfig::default(),
        }
    }

    /// Engine with explicit GARCH settings for filtered historical VaR
    pub fn with_stats_config(config: VarConfig, stats: StatsConfig) -> Self {
        Self { config, stats }
    }

    pub fn config(&self) -> &VarConfig {
        &self.config
    }

    /// Run every applicable method and rank them by conservatism at 95%
    ///
    /// Methods that fail on these inputs are logged and left out of the
    /// report; simulation methods only run when `simulation` is given.
    pub fn full_report(
        &self,
        returns: &[f64],
        simulation: Option<&SimulationInputs>,
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarReport> {
        let moments = self.moments(returns, confidence_levels, horizon_days)?;

        let mut attempts = vec![
            self.parametric_normal(returns, confidence_levels, horizon_days),
            self.student_t(returns, confidence_levels, horizon_days),
            self.cornish_fisher(returns, confidence_levels, horizon_days),
            self.historical(returns, confidence_levels, horizon_days),
            self.weighted_historical(returns, confidence_levels, horizon_days),
            self.filtered_historical(returns, confidence_levels, horizon_days),
        ];
        if let Some(inputs) = simulation {
            attempts.push(self.monte_carlo(inputs, confidence_levels, horizon_days));
            attempts.push(self.importance_sampling(inputs, confidence_levels, horizon_days));
            attempts.push(self.quasi_monte_carlo(inputs, confidence_levels, horizon_days));
        }

        let mut methods = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            match attempt {
                Ok(result) => methods.push(result),
                Err(e) => warn!(error = %e, "VaR method skipped"),
            }
        }

        let mut conservatism_ranking: Vec<(VarMethod, f64)> = methods
            .iter()
            .filter_map(|m| m.at(0.95).map(|e| (m.method, e.var)))
            .collect();
        conservatism_ranking.sort_by(|a, b| a.1.total_cmp(&b.1));

        debug!(
            methods = methods.len(),
            observations = moments.n,
            "VaR report complete"
        );

        Ok(VarReport {
            moments,
            methods,
            conservatism_ranking,
        })
    }

    /// Validate inputs and compute moments of the return series
    fn moments(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<SampleMoments> {
        self.validate_returns(returns, confidence_levels, horizon_days)?;
        stats::sample_moments(returns)
    }

    /// Input checks shared by every method; returns the observation count
    ///
    /// Empirical methods stop here and need no minimum sample.
    fn validate_returns(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<usize> {
        validate_confidence_levels(confidence_levels)?;
        if horizon_days == 0 {
            return Err(RiskError::InvalidTimeHorizon(horizon_days));
        }
        if returns.is_empty() {
            return Err(RiskError::MissingData("return series is empty".into()));
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(RiskError::numerical(
                "var",
                "return series contains non-finite values",
            ));
        }
        Ok(returns.len())
    }

    fn is_low_confidence(&self, observations: usize) -> bool {
        observations < self.config.min_observations
    }
}

pub(crate) fn validate_confidence_levels(levels: &[f64]) -> Result<()> {
    for &level in levels {
        if !(level > 0.0 && level < 1.0) {
            return Err(RiskError::InvalidConfidenceLevel(level));
        }
    }
    Ok(())
}

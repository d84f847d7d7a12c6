//! Portfolio construction
//!
//! Every objective returns an [`OptimizationResult`] through the same
//! contract. Long-only problems are solved by projected gradient ascent on
//! the probability simplex with a backtracking line search; otherwise the
//! projection is onto the budget hyperplane Σw = 1 only.

use crate::error::{Result, RiskError};
use crate::portfolio::RiskFactorEstimate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationObjective {
    MeanVariance,
    MinimumVariance,
    MaximumSharpe,
    RiskParity,
    BlackLitterman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewDirection {
    Overweight,
    Underweight,
}

impl ViewDirection {
    fn sign(&self) -> f64 {
        match self {
            ViewDirection::Overweight => 1.0,
            ViewDirection::Underweight => -1.0,
        }
    }
}

/// Qualitative investor view on a single asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorView {
    pub asset_id: String,
    pub direction: ViewDirection,
    /// In [0, 1]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub objective: OptimizationObjective,
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub expected_return: f64,
    pub risk: f64,
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalMarketLine {
    /// Sharpe ratio of the tangency portfolio
    pub slope: f64,
    /// Risk-free rate
    pub intercept: f64,
    pub tangency_return: f64,
    pub tangency_risk: f64,
}

impl CapitalMarketLine {
    pub fn expected_return_at(&self, risk: f64) -> f64 {
        self.intercept + self.slope * risk
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_long_only")]
    pub long_only: bool,

    /// γ in wᵀμ − (γ/2)wᵀΣw
    #[serde(default = "default_risk_aversion")]
    pub risk_aversion: f64,

    #[serde(default = "default_iterations")]
    pub iterations: usize,

    /// Stop when successive iterates move less than this
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    #[serde(default = "default_frontier_points")]
    pub frontier_points: usize,

    /// Relative weight change per unit of view confidence
    #[serde(default = "default_view_tilt")]
    pub view_tilt: f64,
}

fn default_long_only() -> bool {
    true
}

fn default_risk_aversion() -> f64 {
    3.0
}

fn default_iterations() -> usize {
    2000
}

fn default_tolerance() -> f64 {
    1e-10
}

fn default_frontier_points() -> usize {
    20
}

fn default_view_tilt() -> f64 {
    0.5
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            long_only: default_long_only(),
            risk_aversion: default_risk_aversion(),
            iterations: default_iterations(),
            tolerance: default_tolerance(),
            frontier_points: default_frontier_points(),
            view_tilt: default_view_tilt(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.risk_aversion <= 0.0 || !self.risk_aversion.is_finite() {
            return Err(RiskError::Config(format!(
                "risk aversion must be positive, got {}",
                self.risk_aversion
            )));
        }
        if self.iterations == 0 || self.frontier_points < 2 {
            return Err(RiskError::Config(
                "optimizer needs at least one iteration and two frontier points".into(),
            ));
        }
        if self.view_tilt < 0.0 {
            return Err(RiskError::Config("view tilt must be non-negative".into()));
        }
        Ok(())
    }
}

/// Euclidean projection onto {w ≥ 0, Σw = 1}
pub fn project_onto_simplex(v: &DVector<f64>) -> DVector<f64> {
    let mut sorted: Vec<f64> = v.iter().copied().collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, u) in sorted.iter().enumerate() {
        cumulative += u;
        let candidate = (cumulative - 1.0) / (j + 1) as f64;
        if u - candidate > 0.0 {
            theta = candidate;
        }
    }

    v.map(|x| (x - theta).max(0.0))
}

fn project_onto_budget(v: &DVector<f64>) -> DVector<f64> {
    let shift = (v.sum() - 1.0) / v.len() as f64;
    v.add_scalar(-shift)
}

pub struct Optimizer {
    config: OptimizerConfig,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Maximize wᵀμ − (γ/2)wᵀΣw
    pub fn mean_variance(&self, estimate: &RiskFactorEstimate, risk_free_rate: f64) -> Result<OptimizationResult> {
        validate_estimate(estimate)?;
        let mu = &estimate.expected_returns;
        let sigma = &estimate.covariance;
        let gamma = self.config.risk_aversion;

        let weights = self.solve(
            estimate.dimension(),
            |w| w.dot(mu) - 0.5 * gamma * quad(sigma, w),
            |w| mu - (sigma * w) * gamma,
        );
        self.finish(OptimizationObjective::MeanVariance, estimate, weights, risk_free_rate)
    }

    /// Minimize wᵀΣw
    pub fn minimum_variance(&self, estimate: &RiskFactorEstimate, risk_free_rate: f64) -> Result<OptimizationResult> {
        validate_estimate(estimate)?;
        let sigma = &estimate.covariance;

        let weights = self.solve(
            estimate.dimension(),
            |w| -quad(sigma, w),
            |w| (sigma * w) * -2.0,
        );
        self.finish(OptimizationObjective::MinimumVariance, estimate, weights, risk_free_rate)
    }

    /// Maximize (wᵀμ − rf)/√(wᵀΣw)
    pub fn maximum_sharpe(&self, estimate: &RiskFactorEstimate, risk_free_rate: f64) -> Result<OptimizationResult> {
        validate_estimate(estimate)?;
        let mu = &estimate.expected_returns;
        let sigma = &estimate.covariance;
        let rf = risk_free_rate;

        let sharpe = |w: &DVector<f64>| {
            let vol = quad(sigma, w).sqrt();
            if vol > 0.0 {
                (w.dot(mu) - rf) / vol
            } else {
                f64::NEG_INFINITY
            }
        };
        let gradient = |w: &DVector<f64>| {
            let sigma_w = sigma * w;
            let vol = sigma_w.dot(w).sqrt();
            if vol > 0.0 {
                mu / vol - sigma_w * ((w.dot(mu) - rf) / vol.powi(3))
            } else {
                mu.clone()
            }
        };

        let weights = self.solve(estimate.dimension(), sharpe, gradient);
        self.finish(OptimizationObjective::MaximumSharpe, estimate, weights, risk_free_rate)
    }

    /// Inverse-volatility weights
    pub fn risk_parity(&self, estimate: &RiskFactorEstimate, risk_free_rate: f64) -> Result<OptimizationResult> {
        validate_estimate(estimate)?;
        let vols = estimate.covariance.diagonal().map(|v| v.max(0.0).sqrt());
        if let Some(i) = vols.iter().position(|v| *v <= 0.0) {
            return Err(RiskError::numerical(
                "risk_parity",
                format!("asset {} has zero volatility", estimate.asset_ids[i]),
            ));
        }

        let inverse = vols.map(|v| 1.0 / v);
        let weights = &inverse / inverse.sum();
        self.finish(OptimizationObjective::RiskParity, estimate, weights, risk_free_rate)
    }

    /// Equilibrium weights tilted by investor views
    ///
    /// Each view scales its asset's weight by (1 ± confidence·view_tilt);
    /// without `market_weights` the equilibrium is equal-weighted.
    pub fn black_litterman(
        &self,
        estimate: &RiskFactorEstimate,
        market_weights: Option<&BTreeMap<String, f64>>,
        views: &[InvestorView],
        risk_free_rate: f64,
    ) -> Result<OptimizationResult> {
        validate_estimate(estimate)?;
        let n = estimate.dimension();

        let mut weights = match market_weights {
            Some(map) => {
                let w = estimate.weight_vector(map);
                if w.iter().any(|x| *x < 0.0) || w.sum() <= 0.0 {
                    return Err(RiskError::InvalidParameter(
                        "market weights must be non-negative with a positive sum".into(),
                    ));
                }
                &w / w.sum()
            }
            None => DVector::from_element(n, 1.0 / n as f64),
        };

        for view in views {
            if !(0.0..=1.0).contains(&view.confidence) {
                return Err(RiskError::InvalidParameter(format!(
                    "view confidence for {} must be in [0, 1], got {}",
                    view.asset_id, view.confidence
                )));
            }
            let index = estimate.index_of(&view.asset_id).ok_or_else(|| {
                RiskError::InvalidParameter(format!("view on unknown asset {}", view.asset_id))
            })?;
            weights[index] *= 1.0 + view.direction.sign() * view.confidence * self.config.view_tilt;
        }

        if self.config.long_only {
            weights.apply(|w| *w = w.max(0.0));
        }
        let total = weights.sum();
        if total <= 0.0 {
            return Err(RiskError::numerical(
                "black_litterman",
                "views removed every position",
            ));
        }

        self.finish(OptimizationObjective::BlackLitterman, estimate, weights / total, risk_free_rate)
    }

    /// Every objective, views applied to the Black-Litterman tilt
    pub fn optimize_all(
        &self,
        estimate: &RiskFactorEstimate,
        market_weights: Option<&BTreeMap<String, f64>>,
        views: &[InvestorView],
        risk_free_rate: f64,
    ) -> Result<Vec<OptimizationResult>> {
        Ok(vec![
            self.mean_variance(estimate, risk_free_rate)?,
            self.minimum_variance(estimate, risk_free_rate)?,
            self.maximum_sharpe(estimate, risk_free_rate)?,
            self.risk_parity(estimate, risk_free_rate)?,
            self.black_litterman(estimate, market_weights, views, risk_free_rate)?,
        ])
    }

    /// Weights interpolated between the minimum-variance and maximum-Sharpe portfolios
    pub fn efficient_frontier(&self, estimate: &RiskFactorEstimate, risk_free_rate: f64) -> Result<Vec<FrontierPoint>> {
        let low = self.minimum_variance(estimate, risk_free_rate)?;
        let high = self.maximum_sharpe(estimate, risk_free_rate)?;
        let w_low = estimate.weight_vector(&low.weights);
        let w_high = estimate.weight_vector(&high.weights);
        let points = self.config.frontier_points;

        Ok((0..points)
            .map(|k| {
                let t = k as f64 / (points - 1) as f64;
                let w = &w_low * (1.0 - t) + &w_high * t;
                FrontierPoint {
                    expected_return: w.dot(&estimate.expected_returns),
                    risk: quad(&estimate.covariance, &w).sqrt(),
                    weights: weight_map(estimate, &w),
                }
            })
            .collect())
    }

    /// Line from the risk-free rate through the tangency portfolio
    pub fn capital_market_line(&self, estimate: &RiskFactorEstimate, risk_free_rate: f64) -> Result<CapitalMarketLine> {
        let tangency = self.maximum_sharpe(estimate, risk_free_rate)?;
        if tangency.risk <= 0.0 {
            return Err(RiskError::numerical(
                "capital_market_line",
                "tangency portfolio has zero risk",
            ));
        }

        Ok(CapitalMarketLine {
            slope: (tangency.expected_return - risk_free_rate) / tangency.risk,
            intercept: risk_free_rate,
            tangency_return: tangency.expected_return,
            tangency_risk: tangency.risk,
        })
    }

    /// Projected gradient ascent from equal weights with Armijo backtracking
    fn solve<F, G>(&self, n: usize, objective: F, gradient: G) -> DVector<f64>
    where
        F: Fn(&DVector<f64>) -> f64,
        G: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let project = |v: &DVector<f64>| {
            if self.config.long_only {
                project_onto_simplex(v)
            } else {
                project_onto_budget(v)
            }
        };

        let mut w = DVector::from_element(n, 1.0 / n as f64);
        let mut value = objective(&w);
        let mut step = 1.0;

        for iteration in 0..self.config.iterations {
            let grad = gradient(&w);
            let scale = grad.amax();
            if scale == 0.0 || !scale.is_finite() {
                break;
            }

            let mut accepted = None;
            let mut trial_step = step;
            for _ in 0..60 {
                let candidate = project(&(&w + &grad * (trial_step / scale)));
                let candidate_value = objective(&candidate);
                let ascent = grad.dot(&(&candidate - &w));
                if candidate_value >= value + 1e-4 * ascent && candidate_value.is_finite() {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                trial_step *= 0.5;
            }

            let Some((next, next_value)) = accepted else {
                debug!(iteration, "line search exhausted");
                break;
            };

            let moved = (&next - &w).amax();
            w = next;
            value = next_value;
            step = (trial_step * 2.0).min(1e6);

            if moved < self.config.tolerance {
                debug!(iteration, "optimizer converged");
                break;
            }
        }

        w
    }

    fn finish(
        &self,
        objective: OptimizationObjective,
        estimate: &RiskFactorEstimate,
        weights: DVector<f64>,
        risk_free_rate: f64,
    ) -> Result<OptimizationResult> {
        let mut weights = weights;
        if self.config.long_only {
            weights.apply(|w| *w = w.max(0.0));
        }
        let total = weights.sum();
        if !total.is_finite() || total.abs() < 1e-12 {
            return Err(RiskError::numerical(
                "optimizer",
                format!("{:?} produced degenerate weights", objective),
            ));
        }
        let weights = weights / total;

        let expected_return = weights.dot(&estimate.expected_returns);
        let risk = quad(&estimate.covariance, &weights).max(0.0).sqrt();
        let sharpe_ratio = if risk > 0.0 {
            (expected_return - risk_free_rate) / risk
        } else {
            warn!(?objective, "zero-risk portfolio, Sharpe ratio undefined");
            0.0
        };

        Ok(OptimizationResult {
            objective,
            weights: weight_map(estimate, &weights),
            expected_return,
            risk,
            sharpe_ratio,
        })
    }
}

/// The result with the highest Sharpe ratio
pub fn select_optimal(results: &[OptimizationResult]) -> Option<&OptimizationResult> {
    results
        .iter()
        .filter(|r| r.sharpe_ratio.is_finite())
        .max_by(|a, b| a.sharpe_ratio.total_cmp(&b.sharpe_ratio))
}

fn quad(sigma: &DMatrix<f64>, w: &DVector<f64>) -> f64 {
    (sigma * w).dot(w)
}

fn weight_map(estimate: &RiskFactorEstimate, w: &DVector<f64>) -> BTreeMap<String, f64> {
    estimate
        .asset_ids
        .iter()
        .cloned()
        .zip(w.iter().copied())
        .collect()
}

fn validate_estimate(estimate: &RiskFactorEstimate) -> Result<()> {
    let n = estimate.dimension();
    if n == 0 {
        return Err(RiskError::MissingData("no assets to optimize".into()));
    }
    if estimate.expected_returns.len() != n || estimate.covariance.shape() != (n, n) {
        return Err(RiskError::MatrixError(
            "estimate dimensions are inconsistent".into(),
        ));
    }
    if estimate
        .expected_returns
        .iter()
        .chain(estimate.covariance.iter())
        .any(|v| !v.is_finite())
    {
        return Err(RiskError::numerical("optimizer", "non-finite estimate"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimate() -> RiskFactorEstimate {
        // Annual moments: bonds, equity, gold
        let vols = [0.05, 0.20, 0.15];
        let corr = [[1.0, 0.1, 0.0], [0.1, 1.0, 0.2], [0.0, 0.2, 1.0]];
        let covariance = DMatrix::from_fn(3, 3, |i, j| corr[i][j] * vols[i] * vols[j]);
        RiskFactorEstimate {
            asset_ids: vec!["BOND".into(), "EQUITY".into(), "GOLD".into()],
            expected_returns: DVector::from_vec(vec![0.04, 0.09, 0.06]),
            volatilities: DVector::from_vec(vols.to_vec()),
            covariance,
            observations: 250,
        }
    }

    fn assert_valid_weights(result: &OptimizationResult) {
        let total: f64 = result.weights.values().sum();
        assert!((total - 1.0).abs() < 1e-6, "{:?} sums to {}", result.objective, total);
        assert!(result.weights.values().all(|w| *w >= 0.0));
    }

    #[test]
    fn test_simplex_projection() {
        let projected = project_onto_simplex(&DVector::from_vec(vec![0.5, 0.5, 0.5]));
        assert_relative_eq!(projected.sum(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(projected[0], 1.0 / 3.0, epsilon = 1e-12);

        let corner = project_onto_simplex(&DVector::from_vec(vec![2.0, -1.0, 0.0]));
        assert_eq!(corner.as_slice(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_all_objectives_produce_valid_weights() {
        let optimizer = Optimizer::default();
        let results = optimizer.optimize_all(&estimate(), None, &[], 0.02).unwrap();
        assert_eq!(results.len(), 5);
        for result in &results {
            assert_valid_weights(result);
        }
    }

    #[test]
    fn test_minimum_variance_two_asset_closed_form() {
        let covariance = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01]);
        let estimate = RiskFactorEstimate {
            asset_ids: vec!["A".into(), "B".into()],
            expected_returns: DVector::from_vec(vec![0.08, 0.03]),
            volatilities: DVector::from_vec(vec![0.2, 0.1]),
            covariance,
            observations: 100,
        };

        let result = Optimizer::default().minimum_variance(&estimate, 0.0).unwrap();
        // w_A = σ_B² / (σ_A² + σ_B²) = 0.2
        assert_relative_eq!(result.weights["A"], 0.2, epsilon = 1e-6);
        assert_relative_eq!(result.weights["B"], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_max_sharpe_dominates_other_objectives() {
        let optimizer = Optimizer::default();
        let estimate = estimate();
        let results = optimizer.optimize_all(&estimate, None, &[], 0.02).unwrap();
        let tangency = optimizer.maximum_sharpe(&estimate, 0.02).unwrap();

        for result in &results {
            assert!(tangency.sharpe_ratio >= result.sharpe_ratio - 1e-6);
        }
        let best = select_optimal(&results).unwrap();
        assert!(results.iter().all(|r| r.sharpe_ratio <= best.sharpe_ratio));
        assert!((best.sharpe_ratio - tangency.sharpe_ratio).abs() < 1e-6);
    }

    #[test]
    fn test_risk_parity_inverse_volatility() {
        let result = Optimizer::default().risk_parity(&estimate(), 0.02).unwrap();
        let inv = [1.0 / 0.05, 1.0 / 0.20, 1.0 / 0.15];
        let total: f64 = inv.iter().sum();
        assert_relative_eq!(result.weights["EQUITY"], inv[1] / total, epsilon = 1e-12);
    }

    #[test]
    fn test_black_litterman_tilts_toward_views() {
        let optimizer = Optimizer::default();
        let views = vec![
            InvestorView {
                asset_id: "GOLD".into(),
                direction: ViewDirection::Overweight,
                confidence: 0.8,
            },
            InvestorView {
                asset_id: "BOND".into(),
                direction: ViewDirection::Underweight,
                confidence: 0.5,
            },
        ];
        let result = optimizer.black_litterman(&estimate(), None, &views, 0.02).unwrap();
        assert_valid_weights(&result);
        assert!(result.weights["GOLD"] > 1.0 / 3.0);
        assert!(result.weights["BOND"] < 1.0 / 3.0);

        let unknown = vec![InvestorView {
            asset_id: "OIL".into(),
            direction: ViewDirection::Overweight,
            confidence: 0.5,
        }];
        assert!(optimizer.black_litterman(&estimate(), None, &unknown, 0.02).is_err());
    }

    #[test]
    fn test_efficient_frontier_and_cml() {
        let optimizer = Optimizer::default();
        let estimate = estimate();
        let frontier = optimizer.efficient_frontier(&estimate, 0.02).unwrap();
        assert_eq!(frontier.len(), 20);
        assert!(frontier[0].expected_return <= frontier[19].expected_return + 1e-12);
        for point in &frontier {
            let total: f64 = point.weights.values().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-6);
        }

        let cml = optimizer.capital_market_line(&estimate, 0.02).unwrap();
        assert_relative_eq!(cml.intercept, 0.02);
        assert_relative_eq!(
            cml.expected_return_at(cml.tangency_risk),
            cml.tangency_return,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_unconstrained_mean_variance_matches_closed_form() {
        let optimizer = Optimizer::new(OptimizerConfig {
            long_only: false,
            iterations: 20_000,
            ..OptimizerConfig::default()
        });
        let covariance = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.04]);
        let estimate = RiskFactorEstimate {
            asset_ids: vec!["A".into(), "B".into()],
            expected_returns: DVector::from_vec(vec![0.10, 0.02]),
            volatilities: DVector::from_vec(vec![0.2, 0.2]),
            covariance,
            observations: 100,
        };

        // Budget-constrained optimum: w_A − w_B = (μ_A − μ_B)/(γσ²) = 0.08/0.12
        let result = optimizer.mean_variance(&estimate, 0.0).unwrap();
        let spread = result.weights["A"] - result.weights["B"];
        assert_relative_eq!(spread, 0.08 / 0.12, epsilon = 1e-4);
    }
}

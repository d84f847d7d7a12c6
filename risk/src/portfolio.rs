//! Portfolio risk analytics
//!
//! Estimates expected returns and covariance from per-asset return
//! histories and provides portfolio-level risk measures:
//! - Portfolio volatility σₚ = √(wᵀΣw)
//! - Correlation matrix from covariance
//! - Risk contribution per position
//! - Diversification ratio and concentration (HHI)

use crate::error::{Result, RiskError};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sample moments of a set of assets, in the periodicity of the input returns
#[derive(Debug, Clone, PartialEq)]
pub struct RiskFactorEstimate {
    /// Asset identifiers in matrix order (sorted)
    pub asset_ids: Vec<String>,
    pub expected_returns: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub volatilities: DVector<f64>,
    pub observations: usize,
}

impl RiskFactorEstimate {
    /// Scale means and covariance from per-period to per-year
    pub fn annualized(&self, periods_per_year: f64) -> Self {
        Self {
            asset_ids: self.asset_ids.clone(),
            expected_returns: &self.expected_returns * periods_per_year,
            covariance: &self.covariance * periods_per_year,
            volatilities: &self.volatilities * periods_per_year.sqrt(),
            observations: self.observations,
        }
    }

    pub fn dimension(&self) -> usize {
        self.asset_ids.len()
    }

    pub fn index_of(&self, asset_id: &str) -> Option<usize> {
        self.asset_ids.iter().position(|id| id == asset_id)
    }

    /// Weight vector in matrix order from a weight map; absent assets get zero
    pub fn weight_vector(&self, weights: &BTreeMap<String, f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.dimension(),
            self.asset_ids
                .iter()
                .map(|id| weights.get(id).copied().unwrap_or(0.0)),
        )
    }
}

/// Risk contribution for a single position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskContribution {
    pub asset_id: String,

    /// wᵢ·(Σw)ᵢ
    pub variance_contribution: f64,

    /// Variance contribution divided by σₚ
    pub volatility_contribution: f64,

    /// Percentage of total portfolio risk
    pub risk_pct: f64,
}

/// Portfolio analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Minimum number of observations per asset
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Added to the covariance diagonal
    #[serde(default = "default_regularization")]
    pub regularization: f64,
}

fn default_min_observations() -> usize {
    30
}

fn default_regularization() -> f64 {
    1e-10
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            min_observations: default_min_observations(),
            regularization: default_regularization(),
        }
    }
}

/// Portfolio risk analyzer
#[derive(Debug, Clone, Default)]
pub struct PortfolioAnalyzer {
    config: PortfolioConfig,
}

impl PortfolioAnalyzer {
    pub fn new(config: PortfolioConfig) -> Self {
        Self { config }
    }

    /// Sample means and covariance (divisor n−1) of aligned return series
    ///
    /// Assets are ordered by id. Every series must have the same length of at
    /// least `min_observations`.
    pub fn estimate(&self, returns: &BTreeMap<String, Vec<f64>>) -> Result<RiskFactorEstimate> {
        let Some(first) = returns.values().next() else {
            return Err(RiskError::MissingData("no asset return histories".to_string()));
        };

        let num_obs = first.len();
        if num_obs < self.config.min_observations.max(2) {
            return Err(RiskError::InsufficientData(format!(
                "Need at least {} observations, got {}",
                self.config.min_observations.max(2),
                num_obs
            )));
        }

        for (asset, data) in returns {
            if data.len() != num_obs {
                return Err(RiskError::InsufficientData(format!(
                    "Asset {} has {} observations, expected {}",
                    asset,
                    data.len(),
                    num_obs
                )));
            }
            if data.iter().any(|r| !r.is_finite()) {
                return Err(RiskError::numerical(
                    "covariance_estimate",
                    format!("asset {} has non-finite returns", asset),
                ));
            }
        }

        // BTreeMap iteration is already sorted by id
        let asset_ids: Vec<String> = returns.keys().cloned().collect();
        let series: Vec<&Vec<f64>> = returns.values().collect();
        let n = asset_ids.len();

        let means: Vec<f64> = series
            .iter()
            .map(|data| data.iter().sum::<f64>() / num_obs as f64)
            .collect();

        let mut covariance = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let cov: f64 = series[i]
                    .iter()
                    .zip(series[j].iter())
                    .map(|(r_i, r_j)| (r_i - means[i]) * (r_j - means[j]))
                    .sum::<f64>()
                    / (num_obs - 1) as f64;
                covariance[(i, j)] = cov;
                covariance[(j, i)] = cov;
            }
            covariance[(i, i)] += self.config.regularization;
        }

        let volatilities = covariance.diagonal().map(|v| v.sqrt());

        Ok(RiskFactorEstimate {
            asset_ids,
            expected_returns: DVector::from_vec(means),
            covariance,
            volatilities,
            observations: num_obs,
        })
    }

    /// Correlation matrix implied by a covariance matrix
    pub fn correlation_from_covariance(&self, covariance: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let n = covariance.nrows();
        if !covariance.is_square() {
            return Err(RiskError::MatrixError("covariance matrix must be square".to_string()));
        }

        let std: Vec<f64> = (0..n).map(|i| covariance[(i, i)].sqrt()).collect();
        if let Some(i) = std.iter().position(|s| s.is_nan() || *s <= 0.0) {
            return Err(RiskError::numerical(
                "correlation",
                format!("zero standard deviation for asset index {}", i),
            ));
        }

        Ok(DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                1.0
            } else {
                covariance[(i, j)] / (std[i] * std[j])
            }
        }))
    }

    /// Portfolio volatility σₚ = √(wᵀΣw)
    pub fn portfolio_volatility(&self, weights: &DVector<f64>, covariance: &DMatrix<f64>) -> Result<f64> {
        if weights.is_empty() {
            return Err(RiskError::MissingData("No positions provided".to_string()));
        }
        if covariance.nrows() != weights.len() || covariance.ncols() != weights.len() {
            return Err(RiskError::MatrixError(
                "Covariance matrix dimensions don't match positions".to_string(),
            ));
        }

        let variance = (covariance * weights).dot(weights);
        if variance < -1e-15 {
            return Err(RiskError::numerical(
                "portfolio_volatility",
                format!("negative portfolio variance: {}", variance),
            ));
        }

        Ok(variance.max(0.0).sqrt())
    }

    /// Risk contribution = wᵢ·(Σw)ᵢ / σₚ
    pub fn risk_contributions(
        &self,
        asset_ids: &[String],
        weights: &DVector<f64>,
        covariance: &DMatrix<f64>,
    ) -> Result<Vec<RiskContribution>> {
        let portfolio_volatility = self.portfolio_volatility(weights, covariance)?;
        if portfolio_volatility == 0.0 {
            return Err(RiskError::numerical(
                "risk_contributions",
                "portfolio volatility is zero",
            ));
        }
        if asset_ids.len() != weights.len() {
            return Err(RiskError::MatrixError(
                "asset ids don't match weight vector".to_string(),
            ));
        }

        let marginal_risk = covariance * weights;
        let mut contributions: Vec<RiskContribution> = asset_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let variance_contribution = weights[i] * marginal_risk[i];
                RiskContribution {
                    asset_id: id.clone(),
                    variance_contribution,
                    volatility_contribution: variance_contribution / portfolio_volatility,
                    risk_pct: 0.0,
                }
            })
            .collect();

        let total: f64 = contributions.iter().map(|c| c.volatility_contribution).sum();
        for contrib in &mut contributions {
            contrib.risk_pct = if total != 0.0 {
                contrib.volatility_contribution / total * 100.0
            } else {
                0.0
            };
        }

        Ok(contributions)
    }

    /// Diversification ratio (Σ wᵢσᵢ) / σₚ
    pub fn diversification_ratio(&self, weights: &DVector<f64>, covariance: &DMatrix<f64>) -> Result<f64> {
        let portfolio_volatility = self.portfolio_volatility(weights, covariance)?;
        if portfolio_volatility == 0.0 {
            return Err(RiskError::numerical(
                "diversification_ratio",
                "portfolio volatility is zero",
            ));
        }

        let weighted_vol: f64 = weights
            .iter()
            .enumerate()
            .map(|(i, w)| w * covariance[(i, i)].max(0.0).sqrt())
            .sum();

        Ok(weighted_vol / portfolio_volatility)
    }

    /// Herfindahl-Hirschman index Σwᵢ² of normalized weights
    pub fn concentration_hhi<'a, I>(&self, weights: I) -> Result<f64>
    where
        I: IntoIterator<Item = &'a f64>,
    {
        let weights: Vec<f64> = weights.into_iter().copied().collect();
        let total: f64 = weights.iter().sum();
        if weights.is_empty() || total <= 0.0 {
            return Err(RiskError::InvalidParameter(
                "weights must sum to a positive value".to_string(),
            ));
        }
        Ok(weights.iter().map(|w| (w / total).powi(2)).sum())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Three deterministic, imperfectly correlated daily return series
    pub(crate) fn sample_asset_returns() -> BTreeMap<String, Vec<f64>> {
        let n = 60;
        let equity: Vec<f64> = (0..n)
            .map(|i| 0.0008 + 0.015 * ((i as f64) * 0.9).sin())
            .collect();
        let bond: Vec<f64> = (0..n)
            .map(|i| 0.0003 + 0.004 * ((i as f64) * 1.7).cos())
            .collect();
        let gold: Vec<f64> = (0..n)
            .map(|i| 0.0004 + 0.009 * ((i as f64) * 0.4 + 1.0).sin() * ((i as f64) * 2.3).cos())
            .collect();

        let mut returns = BTreeMap::new();
        returns.insert("EQUITY".to_string(), equity);
        returns.insert("BOND".to_string(), bond);
        returns.insert("GOLD".to_string(), gold);
        returns
    }

    #[test]
    fn test_estimate_is_sorted_and_symmetric() {
        let analyzer = PortfolioAnalyzer::default();
        let estimate = analyzer.estimate(&sample_asset_returns()).unwrap();

        assert_eq!(estimate.asset_ids, vec!["BOND", "EQUITY", "GOLD"]);
        assert_eq!(estimate.observations, 60);
        for i in 0..3 {
            assert!(estimate.covariance[(i, i)] > 0.0);
            for j in 0..3 {
                assert_eq!(estimate.covariance[(i, j)], estimate.covariance[(j, i)]);
            }
        }
        assert_relative_eq!(
            estimate.volatilities[1],
            estimate.covariance[(1, 1)].sqrt(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_estimate_rejects_short_or_ragged_series() {
        let analyzer = PortfolioAnalyzer::default();

        let mut short = BTreeMap::new();
        short.insert("A".to_string(), vec![0.01; 10]);
        assert!(matches!(
            analyzer.estimate(&short),
            Err(RiskError::InsufficientData(_))
        ));

        let mut ragged = sample_asset_returns();
        ragged.get_mut("GOLD").unwrap().pop();
        assert!(analyzer.estimate(&ragged).is_err());

        assert!(matches!(
            analyzer.estimate(&BTreeMap::new()),
            Err(RiskError::MissingData(_))
        ));
    }

    #[test]
    fn test_portfolio_volatility() {
        let analyzer = PortfolioAnalyzer::default();
        let weights = DVector::from_vec(vec![0.6, 0.4]);
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.0225]);

        let vol = analyzer.portfolio_volatility(&weights, &cov).unwrap();
        let expected = (0.36 * 0.04 + 0.16 * 0.0225 + 2.0 * 0.24 * 0.01_f64).sqrt();
        assert_relative_eq!(vol, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_correlation_from_covariance() {
        let analyzer = PortfolioAnalyzer::default();
        let cov = DMatrix::from_row_slice(2, 2, &[0.04, 0.01, 0.01, 0.0225]);
        let corr = analyzer.correlation_from_covariance(&cov).unwrap();

        assert_eq!(corr[(0, 0)], 1.0);
        assert_relative_eq!(corr[(0, 1)], 0.01 / (0.2 * 0.15), epsilon = 1e-12);

        let singular = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 0.01]);
        assert!(analyzer.correlation_from_covariance(&singular).is_err());
    }

    #[test]
    fn test_risk_contributions_sum_to_volatility() {
        let analyzer = PortfolioAnalyzer::default();
        let weights = DVector::from_vec(vec![0.5, 0.3, 0.2]);
        let cov = DMatrix::from_row_slice(
            3,
            3,
            &[0.04, 0.006, 0.0, 0.006, 0.01, 0.0, 0.0, 0.0, 0.0225],
        );
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let contributions = analyzer.risk_contributions(&ids, &weights, &cov).unwrap();
        let vol = analyzer.portfolio_volatility(&weights, &cov).unwrap();

        let total: f64 = contributions.iter().map(|c| c.volatility_contribution).sum();
        assert_relative_eq!(total, vol, epsilon = 1e-12);
        let pct: f64 = contributions.iter().map(|c| c.risk_pct).sum();
        assert_relative_eq!(pct, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_diversification_and_concentration() {
        let analyzer = PortfolioAnalyzer::default();
        let weights = DVector::from_vec(vec![0.5, 0.5]);
        let uncorrelated = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.04]);

        let ratio = analyzer.diversification_ratio(&weights, &uncorrelated).unwrap();
        assert_relative_eq!(ratio, 2.0_f64.sqrt(), epsilon = 1e-12);

        assert_relative_eq!(analyzer.concentration_hhi(&[0.5, 0.5]).unwrap(), 0.5);
        assert_relative_eq!(analyzer.concentration_hhi(&[1.0]).unwrap(), 1.0);
        assert!(analyzer.concentration_hhi(&Vec::<f64>::new()).is_err());
    }

    #[test]
    fn test_annualized_estimate() {
        let estimate = PortfolioAnalyzer::default()
            .estimate(&sample_asset_returns())
            .unwrap();
        let annual = estimate.annualized(252.0);

        assert_relative_eq!(annual.expected_returns[0], estimate.expected_returns[0] * 252.0);
        assert_relative_eq!(annual.covariance[(0, 0)], estimate.covariance[(0, 0)] * 252.0);

        let mut weights = BTreeMap::new();
        weights.insert("GOLD".to_string(), 1.0);
        let w = estimate.weight_vector(&weights);
        assert_eq!(w.as_slice(), &[0.0, 0.0, 1.0]);
    }
}

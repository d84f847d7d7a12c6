//! Risk-adjusted performance metrics
//!
//! Implements:
//! - Sharpe Ratio: (Return - Risk-Free Rate) / Volatility
//! - Sortino Ratio: Uses downside deviation instead of total volatility
//! - Calmar Ratio: Return / Maximum Drawdown
//! - Maximum Drawdown: Largest peak-to-trough decline
//! - Beta, Jensen's alpha and Treynor ratio against a market series
//! - Tracking error and information ratio against a benchmark series
//!
//! Inputs are per-period returns; ratios are annualized with
//! `periods_per_year` (252 trading days by default).

use crate::error::{Result, RiskError};
use crate::stats::{mean, sample_variance};
use serde::{Deserialize, Serialize};

pub const TRADING_DAYS: f64 = 252.0;

/// Performance metrics over a borrowed return series
#[derive(Debug, Clone, Copy)]
pub struct PerformanceMetrics<'a> {
    returns: &'a [f64],

    /// Annual risk-free rate
    risk_free_rate: f64,

    periods_per_year: f64,
}

/// Every metric that could be computed for a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub max_drawdown: f64,
    pub calmar_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub jensen_alpha: Option<f64>,
    pub treynor_ratio: Option<f64>,
    pub tracking_error: Option<f64>,
    pub information_ratio: Option<f64>,
}

impl<'a> PerformanceMetrics<'a> {
    pub fn new(returns: &'a [f64], risk_free_rate: f64) -> Self {
        Self {
            returns,
            risk_free_rate,
            periods_per_year: TRADING_DAYS,
        }
    }

    pub fn with_periods_per_year(mut self, periods_per_year: f64) -> Self {
        self.periods_per_year = periods_per_year;
        self
    }

    /// Sharpe = (mean − rf) / σ, annualized by √periods
    pub fn sharpe_ratio(&self) -> Result<f64> {
        self.require_returns()?;
        let std_dev = self.standard_deviation()?;
        if std_dev == 0.0 {
            return Err(RiskError::numerical("sharpe_ratio", "standard deviation is zero"));
        }

        let period_rf = self.risk_free_rate / self.periods_per_year;
        Ok((mean(self.returns) - period_rf) / std_dev * self.periods_per_year.sqrt())
    }

    /// Sortino = (mean − MAR) / downside deviation; MAR is annual
    pub fn sortino_ratio(&self, minimum_acceptable_return: f64) -> Result<f64> {
        self.require_returns()?;
        let period_mar = minimum_acceptable_return / self.periods_per_year;
        let downside = self.downside_deviation(period_mar);
        if downside == 0.0 {
            return Err(RiskError::numerical("sortino_ratio", "no returns below target"));
        }
        Ok((mean(self.returns) - period_mar) / downside * self.periods_per_year.sqrt())
    }

    /// Largest peak-to-trough decline of compounded wealth, as a negative fraction
    pub fn max_drawdown(&self) -> Result<f64> {
        self.require_returns()?;

        let mut wealth = 1.0;
        let mut peak = 1.0;
        let mut max_dd: f64 = 0.0;
        for r in self.returns {
            wealth *= 1.0 + r;
            peak = f64::max(peak, wealth);
            max_dd = max_dd.min((wealth - peak) / peak);
        }
        Ok(max_dd)
    }

    /// Calmar = annualized return / |max drawdown|
    pub fn calmar_ratio(&self) -> Result<f64> {
        let max_dd = self.max_drawdown()?.abs();
        if max_dd == 0.0 {
            return Err(RiskError::numerical("calmar_ratio", "maximum drawdown is zero"));
        }
        Ok(self.annualized_return() / max_dd)
    }

    /// Cov(portfolio, market) / Var(market)
    pub fn beta(&self, market_returns: &[f64]) -> Result<f64> {
        self.require_aligned(market_returns)?;

        let port_mean = mean(self.returns);
        let market_mean = mean(market_returns);
        let covariance = self
            .returns
            .iter()
            .zip(market_returns)
            .map(|(p, m)| (p - port_mean) * (m - market_mean))
            .sum::<f64>()
            / (self.returns.len() - 1) as f64;

        let market_variance = sample_variance(market_returns);
        if market_variance == 0.0 {
            return Err(RiskError::numerical("beta", "market variance is zero"));
        }
        Ok(covariance / market_variance)
    }

    /// Jensen's alpha: realized return over the CAPM expectation, annualized
    pub fn jensen_alpha(&self, market_returns: &[f64]) -> Result<f64> {
        let beta = self.beta(market_returns)?;
        let market_return = self.annualize(mean(market_returns));
        let expected = self.risk_free_rate + beta * (market_return - self.risk_free_rate);
        Ok(self.annualized_return() - expected)
    }

    /// Excess return per unit of systematic risk
    pub fn treynor_ratio(&self, market_returns: &[f64]) -> Result<f64> {
        let beta = self.beta(market_returns)?;
        if beta == 0.0 {
            return Err(RiskError::numerical("treynor_ratio", "beta is zero"));
        }
        Ok((self.annualized_return() - self.risk_free_rate) / beta)
    }

    /// Annualized standard deviation of active returns
    pub fn tracking_error(&self, benchmark_returns: &[f64]) -> Result<f64> {
        self.require_aligned(benchmark_returns)?;
        let active = self.active_returns(benchmark_returns);
        Ok(sample_variance(&active).sqrt() * self.periods_per_year.sqrt())
    }

    /// Annualized active return over tracking error
    pub fn information_ratio(&self, benchmark_returns: &[f64]) -> Result<f64> {
        let tracking_error = self.tracking_error(benchmark_returns)?;
        if tracking_error == 0.0 {
            return Err(RiskError::numerical("information_ratio", "tracking error is zero"));
        }
        let active_mean = mean(&self.active_returns(benchmark_returns));
        Ok(active_mean * self.periods_per_year / tracking_error)
    }

    /// Geometric annualization of the mean period return
    pub fn annualized_return(&self) -> f64 {
        self.annualize(mean(self.returns))
    }

    pub fn annualized_volatility(&self) -> Result<f64> {
        Ok(self.standard_deviation()? * self.periods_per_year.sqrt())
    }

    /// All metrics; market- and benchmark-relative ones are `None` when the
    /// series is missing or misaligned
    pub fn summary(&self, market_returns: &[f64], benchmark_returns: &[f64]) -> Result<PerformanceSummary> {
        Ok(PerformanceSummary {
            annualized_return: self.annualized_return(),
            annualized_volatility: self.annualized_volatility()?,
            sharpe_ratio: self.sharpe_ratio().ok(),
            sortino_ratio: self.sortino_ratio(0.0).ok(),
            max_drawdown: self.max_drawdown()?,
            calmar_ratio: self.calmar_ratio().ok(),
            beta: self.beta(market_returns).ok(),
            jensen_alpha: self.jensen_alpha(market_returns).ok(),
            treynor_ratio: self.treynor_ratio(market_returns).ok(),
            tracking_error: self.tracking_error(benchmark_returns).ok(),
            information_ratio: self.information_ratio(benchmark_returns).ok(),
        })
    }

    fn annualize(&self, period_return: f64) -> f64 {
        (1.0 + period_return).powf(self.periods_per_year) - 1.0
    }

    fn active_returns(&self, benchmark_returns: &[f64]) -> Vec<f64> {
        self.returns
            .iter()
            .zip(benchmark_returns)
            .map(|(p, b)| p - b)
            .collect()
    }

    fn standard_deviation(&self) -> Result<f64> {
        if self.returns.len() < 2 {
            return Err(RiskError::InsufficientData(
                "Need at least 2 returns for standard deviation".to_string(),
            ));
        }
        Ok(sample_variance(self.returns).sqrt())
    }

    /// Root mean square shortfall below `target` over the whole sample
    fn downside_deviation(&self, target: f64) -> f64 {
        let shortfall: f64 = self
            .returns
            .iter()
            .filter(|&&r| r < target)
            .map(|r| (r - target).powi(2))
            .sum();
        (shortfall / self.returns.len() as f64).sqrt()
    }

    fn require_returns(&self) -> Result<()> {
        if self.returns.is_empty() {
            return Err(RiskError::InsufficientData("No returns data".to_string()));
        }
        Ok(())
    }

    fn require_aligned(&self, other: &[f64]) -> Result<()> {
        if other.is_empty() {
            return Err(RiskError::MissingData("comparison return series".to_string()));
        }
        if self.returns.len() != other.len() {
            return Err(RiskError::InvalidParameter(format!(
                "return series lengths differ: {} vs {}",
                self.returns.len(),
                other.len()
            )));
        }
        if self.returns.len() < 2 {
            return Err(RiskError::InsufficientData(
                "Need at least 2 aligned returns".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_returns() -> Vec<f64> {
        vec![
            0.01, 0.02, -0.01, 0.015, -0.005, 0.03, -0.02, 0.01, 0.005, -0.01, 0.02, 0.01, -0.015,
            0.025, 0.01, -0.005, 0.015, 0.02, -0.01, 0.005,
        ]
    }

    fn create_market_returns() -> Vec<f64> {
        vec![
            0.008, 0.015, -0.012, 0.01, -0.008, 0.025, -0.018, 0.012, 0.003, -0.015, 0.018, 0.009,
            -0.02, 0.022, 0.012, -0.007, 0.013, 0.017, -0.012, 0.004,
        ]
    }

    #[test]
    fn test_sharpe_and_sortino() {
        let returns = create_test_returns();
        let metrics = PerformanceMetrics::new(&returns, 0.02);

        let sharpe = metrics.sharpe_ratio().unwrap();
        assert!(sharpe > 0.0);

        // Only downside moves are penalized
        let sortino = metrics.sortino_ratio(0.0).unwrap();
        assert!(sortino >= sharpe);
    }

    #[test]
    fn test_max_drawdown() {
        let returns = vec![0.10, 0.05, -0.20, -0.10, 0.15, 0.05];
        let metrics = PerformanceMetrics::new(&returns, 0.02);

        // Peak 1.155, trough 1.155 × 0.8 × 0.9
        let max_dd = metrics.max_drawdown().unwrap();
        assert_relative_eq!(max_dd, 0.8 * 0.9 - 1.0, epsilon = 1e-12);
        assert!(metrics.calmar_ratio().is_ok());
    }

    #[test]
    fn test_max_drawdown_monotone_gains() {
        let returns = vec![0.01; 10];
        let metrics = PerformanceMetrics::new(&returns, 0.0);
        assert_eq!(metrics.max_drawdown().unwrap(), 0.0);
        assert!(metrics.calmar_ratio().is_err());
    }

    #[test]
    fn test_beta_and_alpha() {
        let portfolio = create_test_returns();
        let market = create_market_returns();
        let metrics = PerformanceMetrics::new(&portfolio, 0.02);

        let beta = metrics.beta(&market).unwrap();
        assert!(beta > 0.5 && beta < 2.0);
        assert!(metrics.jensen_alpha(&market).unwrap().is_finite());
        assert!(metrics.treynor_ratio(&market).unwrap().is_finite());

        // A series regressed on itself
        let self_metrics = PerformanceMetrics::new(&market, 0.02);
        assert_relative_eq!(self_metrics.beta(&market).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(self_metrics.jensen_alpha(&market).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tracking_error_and_information_ratio() {
        let portfolio = create_test_returns();
        let benchmark = create_market_returns();
        let metrics = PerformanceMetrics::new(&portfolio, 0.02);

        let te = metrics.tracking_error(&benchmark).unwrap();
        assert!(te > 0.0 && te < 1.0);

        let active: Vec<f64> = portfolio.iter().zip(&benchmark).map(|(p, b)| p - b).collect();
        let ir = metrics.information_ratio(&benchmark).unwrap();
        assert_relative_eq!(ir, mean(&active) * 252.0 / te, epsilon = 1e-12);
    }

    #[test]
    fn test_misaligned_series() {
        let portfolio = create_test_returns();
        let metrics = PerformanceMetrics::new(&portfolio, 0.02);
        assert!(matches!(
            metrics.beta(&[0.01, 0.02]),
            Err(RiskError::InvalidParameter(_))
        ));
        assert!(matches!(metrics.tracking_error(&[]), Err(RiskError::MissingData(_))));

        let summary = metrics.summary(&[], &[]).unwrap();
        assert!(summary.beta.is_none());
        assert!(summary.sharpe_ratio.is_some());
    }

    #[test]
    fn test_insufficient_data() {
        let metrics = PerformanceMetrics::new(&[], 0.02);
        assert!(metrics.sharpe_ratio().is_err());
        assert!(metrics.max_drawdown().is_err());
    }

    #[test]
    fn test_zero_volatility() {
        let returns = vec![0.01; 20];
        let metrics = PerformanceMetrics::new(&returns, 0.02);
        assert!(metrics.sharpe_ratio().is_err());
    }
}

//! Historical-simulation VaR: plain, exponentially weighted and GARCH-filtered

use super::{VarEngine, VarEstimate, VarMethod, VarMethodResult};
use crate::error::Result;
use crate::stats::{garch11, mean};
use tracing::debug;

pub(crate) fn sorted_returns(returns: &[f64]) -> Vec<f64> {
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Index of the empirical lower-tail quantile: ⌊(1−α)·n⌋ clamped to n−1
pub(crate) fn quantile_index(n: usize, confidence: f64) -> usize {
    let raw = ((1.0 - confidence) * n as f64 + 1e-9).floor() as usize;
    raw.min(n.saturating_sub(1))
}

/// Empirical VaR and the mean of observations at or below it
pub(crate) fn empirical_tail(sorted: &[f64], confidence: f64) -> (f64, f64) {
    let index = quantile_index(sorted.len(), confidence);
    (sorted[index], mean(&sorted[..=index]))
}

/// Quantile of weighted observations sorted ascending by value
///
/// VaR is the first value whose cumulative normalized weight reaches 1−α;
/// CVaR is the weighted mean of values up to and including it.
pub(crate) fn weighted_tail(sorted_pairs: &[(f64, f64)], confidence: f64) -> (f64, f64) {
    let total: f64 = sorted_pairs.iter().map(|(_, w)| w).sum();
    let threshold = 1.0 - confidence;

    let mut cumulative = 0.0;
    let mut index = sorted_pairs.len() - 1;
    for (i, (_, weight)) in sorted_pairs.iter().enumerate() {
        cumulative += weight / total;
        if cumulative >= threshold {
            index = i;
            break;
        }
    }

    let (weighted_sum, weight_sum) = sorted_pairs[..=index]
        .iter()
        .fold((0.0, 0.0), |(s, w), (value, weight)| (s + value * weight, w + weight));
    let cvar = if weight_sum > 0.0 {
        weighted_sum / weight_sum
    } else {
        sorted_pairs[index].0
    };

    (sorted_pairs[index].0, cvar.min(sorted_pairs[index].0))
}

impl VarEngine {
    /// Empirical percentile of historical returns
    pub fn historical(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let n = self.validate_returns(returns, confidence_levels, horizon_days)?;
        let sorted = sorted_returns(returns);

        Ok(VarMethodResult {
            method: VarMethod::Historical,
            estimates: scaled_estimates(&sorted, confidence_levels, horizon_days),
            low_confidence: self.is_low_confidence(n),
            horizon_days,
        })
    }

    /// Historical VaR with weights λ^(n−1−i), most recent observation heaviest
    pub fn weighted_historical(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let n = self.validate_returns(returns, confidence_levels, horizon_days)?;
        let lambda = self.config.ewma_lambda;
        let sqrt_h = (horizon_days as f64).sqrt();

        let mut pairs: Vec<(f64, f64)> = returns
            .iter()
            .enumerate()
            .map(|(i, &r)| (r, lambda.powi((n - 1 - i) as i32)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let estimates = confidence_levels
            .iter()
            .map(|&c| {
                let (var, cvar) = weighted_tail(&pairs, c);
                VarEstimate {
                    confidence: c,
                    var: var * sqrt_h,
                    cvar: cvar * sqrt_h,
                }
            })
            .collect();

        Ok(VarMethodResult {
            method: VarMethod::WeightedHistorical,
            estimates,
            low_confidence: self.is_low_confidence(n),
            horizon_days,
        })
    }

    /// Historical VaR on returns standardized by GARCH(1,1) volatility and
    /// rescaled to the one-step-ahead volatility forecast
    pub fn filtered_historical(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let moments = self.moments(returns, confidence_levels, horizon_days)?;
        let fit = garch11(returns, &self.stats)?;
        let forecast = fit.forecast_volatility();

        let rescaled: Vec<f64> = returns
            .iter()
            .zip(&fit.conditional_volatility)
            .map(|(r, sigma)| r / sigma * forecast)
            .collect();

        debug!(
            forecast_volatility = forecast,
            long_run_volatility = fit.long_run_variance.sqrt(),
            "GARCH filter applied"
        );

        let sorted = sorted_returns(&rescaled);
        Ok(VarMethodResult {
            method: VarMethod::FilteredHistorical,
            estimates: scaled_estimates(&sorted, confidence_levels, horizon_days),
            low_confidence: self.is_low_confidence(moments.n),
            horizon_days,
        })
    }
}

fn scaled_estimates(sorted: &[f64], confidence_levels: &[f64], horizon_days: u32) -> Vec<VarEstimate> {
    let sqrt_h = (horizon_days as f64).sqrt();
    confidence_levels
        .iter()
        .map(|&c| {
            let (var, cvar) = empirical_tail(sorted, c);
            VarEstimate {
                confidence: c,
                var: var * sqrt_h,
                cvar: cvar * sqrt_h,
            }
        })
        .collect()
}

//! Distributional VaR: normal, Student-t and Cornish-Fisher

use super::historical::sorted_returns;
use super::{VarEngine, VarEstimate, VarMethod, VarMethodResult};
use crate::error::Result;
use crate::stats::{inverse_normal_cdf, mean, normal_pdf, student_t_pdf, student_t_quantile};

/// Normal VaR and expected shortfall for a given mean and volatility
///
/// VaR = μh − zσ√h, CVaR = μh − σ√h·φ(z)/(1−α)
pub(crate) fn normal_estimate(
    mean: f64,
    std_dev: f64,
    confidence: f64,
    horizon_days: u32,
) -> Result<VarEstimate> {
    let h = horizon_days as f64;
    let z = inverse_normal_cdf(confidence)?;
    let scaled_sigma = std_dev * h.sqrt();

    Ok(VarEstimate {
        confidence,
        var: mean * h - z * scaled_sigma,
        cvar: mean * h - scaled_sigma * normal_pdf(z) / (1.0 - confidence),
    })
}

impl VarEngine {
    /// Parametric VaR assuming normally distributed returns
    pub fn parametric_normal(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let moments = self.moments(returns, confidence_levels, horizon_days)?;

        let estimates = confidence_levels
            .iter()
            .map(|&c| normal_estimate(moments.mean, moments.std_dev, c, horizon_days))
            .collect::<Result<Vec<_>>>()?;

        Ok(VarMethodResult {
            method: VarMethod::ParametricNormal,
            estimates,
            low_confidence: self.is_low_confidence(moments.n),
            horizon_days,
        })
    }

    /// Parametric VaR with Student-t quantiles for fat tails
    pub fn student_t(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let moments = self.moments(returns, confidence_levels, horizon_days)?;
        let dof = self.config.student_t_dof;
        let h = horizon_days as f64;
        let scaled_sigma = moments.std_dev * h.sqrt();

        let estimates = confidence_levels
            .iter()
            .map(|&c| -> Result<VarEstimate> {
                let t = student_t_quantile(c, dof)?;
                // Closed-form expected shortfall of the standard t
                let shortfall = student_t_pdf(t, dof)? * (dof + t * t) / ((dof - 1.0) * (1.0 - c));
                Ok(VarEstimate {
                    confidence: c,
                    var: moments.mean * h - t * scaled_sigma,
                    cvar: moments.mean * h - shortfall * scaled_sigma,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(VarMethodResult {
            method: VarMethod::StudentT,
            estimates,
            low_confidence: self.is_low_confidence(moments.n),
            horizon_days,
        })
    }

    /// Normal VaR with the quantile adjusted for sample skewness and kurtosis
    ///
    /// The expansion is taken around the lower-tail quantile z = Φ⁻¹(1−α):
    /// z_cf = z + (z²−1)S/6 + (z³−3z)K/24 − (2z³−5z)S²/36 and VaR = μ + z_cf·σ.
    /// Negative skew therefore deepens the loss quantile.
    pub fn cornish_fisher(
        &self,
        returns: &[f64],
        confidence_levels: &[f64],
        horizon_days: u32,
    ) -> Result<VarMethodResult> {
        let moments = self.moments(returns, confidence_levels, horizon_days)?;
        let sorted = sorted_returns(returns);
        let s = moments.skewness;
        let k = moments.excess_kurtosis;
        let sqrt_h = (horizon_days as f64).sqrt();

        let estimates = confidence_levels
            .iter()
            .map(|&c| -> Result<VarEstimate> {
                let z = -inverse_normal_cdf(c)?;
                let z_cf = z + (z * z - 1.0) * s / 6.0 + (z.powi(3) - 3.0 * z) * k / 24.0
                    - (2.0 * z.powi(3) - 5.0 * z) * s * s / 36.0;

                let cutoff = moments.mean + z_cf * moments.std_dev;
                let var = moments.mean * horizon_days as f64 + z_cf * moments.std_dev * sqrt_h;

                // Average empirical excess beyond the adjusted cutoff
                let tail_len = sorted.partition_point(|&r| r <= cutoff);
                let excess = if tail_len == 0 {
                    0.0
                } else {
                    mean(&sorted[..tail_len]) - cutoff
                };

                Ok(VarEstimate {
                    confidence: c,
                    var,
                    cvar: var + excess.min(0.0) * sqrt_h,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(VarMethodResult {
            method: VarMethod::CornishFisher,
            estimates,
            low_confidence: self.is_low_confidence(moments.n),
            horizon_days,
        })
    }
}

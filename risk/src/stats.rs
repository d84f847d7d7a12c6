//! Statistical primitives shared by the risk engines
//!
//! Closed-form normal approximations (Abramowitz-Stegun for the CDF, Acklam
//! for the quantile), sample moments, and a GARCH(1,1) volatility filter.

use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, StudentsT};

const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Standard normal density
pub fn normal_pdf(x: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal CDF, Abramowitz-Stegun 26.2.17 (|error| < 7.5e-8)
pub fn normal_cdf(x: f64) -> f64 {
    if x.is_nan() {
        return f64::NAN;
    }
    if x == f64::INFINITY {
        return 1.0;
    }
    if x == f64::NEG_INFINITY {
        return 0.0;
    }

    const P: f64 = 0.231_641_9;
    const B: [f64; 5] = [
        0.319_381_530,
        -0.356_563_782,
        1.781_477_937,
        -1.821_255_978,
        1.330_274_429,
    ];

    let t = 1.0 / (1.0 + P * x.abs());
    let poly = t * (B[0] + t * (B[1] + t * (B[2] + t * (B[3] + t * B[4]))));
    let tail = normal_pdf(x.abs()) * poly;

    if x >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Inverse standard normal CDF (Acklam's rational approximation)
pub fn inverse_normal_cdf(p: f64) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(RiskError::numerical(
            "inverse_normal_cdf",
            format!("probability {} outside (0, 1)", p),
        ));
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    let x = if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    };

    Ok(x)
}

fn students_t(df: f64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| RiskError::InvalidParameter(format!("Student-t with {} dof: {}", df, e)))
}

/// Quantile of the standard Student-t distribution
pub fn student_t_quantile(p: f64, df: f64) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(RiskError::numerical(
            "student_t_quantile",
            format!("probability {} outside (0, 1)", p),
        ));
    }
    let quantile = students_t(df)?.inverse_cdf(p);
    if !quantile.is_finite() {
        return Err(RiskError::numerical(
            "student_t_quantile",
            format!("non-finite quantile for p={}, df={}", p, df),
        ));
    }
    Ok(quantile)
}

/// Density of the standard Student-t distribution
pub fn student_t_pdf(x: f64, df: f64) -> Result<f64> {
    Ok(students_t(df)?.pdf(x))
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance with divisor n
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Variance with divisor n - 1
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// First four moments of a return sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleMoments {
    pub n: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
}

/// Mean, standard deviation, bias-adjusted skewness and excess kurtosis
pub fn sample_moments(returns: &[f64]) -> Result<SampleMoments> {
    let n = returns.len();
    if n < 4 {
        return Err(RiskError::InsufficientData(format!(
            "Need at least 4 observations for higher moments, got {}",
            n
        )));
    }

    let m = mean(returns);
    let std_dev = population_variance(returns).sqrt();

    if std_dev <= f64::EPSILON {
        return Ok(SampleMoments {
            n,
            mean: m,
            std_dev: 0.0,
            skewness: 0.0,
            excess_kurtosis: 0.0,
        });
    }

    let nf = n as f64;
    let (sum_cubed, sum_fourth) = returns.iter().fold((0.0, 0.0), |(s3, s4), r| {
        let z = (r - m) / std_dev;
        (s3 + z.powi(3), s4 + z.powi(4))
    });

    let skewness = nf / ((nf - 1.0) * (nf - 2.0)) * sum_cubed;
    let excess_kurtosis = nf * (nf + 1.0) / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0)) * sum_fourth
        - 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0));

    Ok(SampleMoments {
        n,
        mean: m,
        std_dev,
        skewness,
        excess_kurtosis,
    })
}

/// GARCH(1,1) parameters: σ²ₜ = ω + α r²ₜ₋₁ + β σ²ₜ₋₁
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Garch11Params {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Default for Garch11Params {
    fn default() -> Self {
        Self {
            omega: 1e-5,
            alpha: 0.10,
            beta: 0.85,
        }
    }
}

impl Garch11Params {
    pub fn validate(&self) -> Result<()> {
        if self.omega.is_nan() || self.omega <= 0.0 {
            return Err(RiskError::InvalidParameter(format!(
                "GARCH omega must be positive, got {}",
                self.omega
            )));
        }
        if self.alpha < 0.0 || self.beta < 0.0 {
            return Err(RiskError::InvalidParameter(
                "GARCH alpha and beta must be non-negative".to_string(),
            ));
        }
        if self.alpha + self.beta >= 1.0 {
            return Err(RiskError::InvalidParameter(format!(
                "GARCH process is not stationary: alpha + beta = {}",
                self.alpha + self.beta
            )));
        }
        Ok(())
    }

    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.alpha - self.beta)
    }
}

/// Settings for the statistical primitives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default)]
    pub garch: Garch11Params,

    /// Minimum series length for the GARCH filter
    #[serde(default = "default_min_garch_observations")]
    pub min_garch_observations: usize,
}

fn default_min_garch_observations() -> usize {
    10
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            garch: Garch11Params::default(),
            min_garch_observations: default_min_garch_observations(),
        }
    }
}

/// Filtered conditional volatility path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GarchFit {
    pub params: Garch11Params,
    /// σₜ for every observation, aligned with the input series
    pub conditional_volatility: Vec<f64>,
    pub long_run_variance: f64,
    last_return: f64,
}

impl GarchFit {
    /// One-step-ahead volatility after the last observation
    pub fn forecast_volatility(&self) -> f64 {
        let last_sigma = self.conditional_volatility.last().copied().unwrap_or(0.0);
        (self.params.omega
            + self.params.alpha * self.last_return.powi(2)
            + self.params.beta * last_sigma.powi(2))
        .sqrt()
    }
}

/// Run the GARCH(1,1) recursion seeded with the sample variance
pub fn garch11(returns: &[f64], config: &StatsConfig) -> Result<GarchFit> {
    let params = config.garch;
    params.validate()?;

    if returns.len() < config.min_garch_observations {
        return Err(RiskError::InsufficientData(format!(
            "GARCH filter needs at least {} observations, got {}",
            config.min_garch_observations,
            returns.len()
        )));
    }

    let initial_variance = sample_variance(returns);
    if initial_variance <= 0.0 || !initial_variance.is_finite() {
        return Err(RiskError::numerical(
            "garch11",
            "return series has zero variance",
        ));
    }

    let mut conditional_volatility = Vec::with_capacity(returns.len());
    let mut variance = initial_variance;
    conditional_volatility.push(variance.sqrt());

    for window in returns.windows(2) {
        variance = params.omega + params.alpha * window[0].powi(2) + params.beta * variance;
        conditional_volatility.push(variance.sqrt());
    }

    Ok(GarchFit {
        params,
        conditional_volatility,
        long_run_variance: params.long_run_variance(),
        last_return: returns[returns.len() - 1],
    })
}

/// Annualize a per-period volatility
pub fn annualize_volatility(volatility: f64, periods_per_year: f64) -> f64 {
    volatility * periods_per_year.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normal_cdf_reference_points() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-7);
        assert!(normal_cdf(3.0) > 0.998);
        assert_relative_eq!(normal_cdf(1.96), 0.975, epsilon = 1e-4);
        assert_relative_eq!(normal_cdf(-1.96), 0.025, epsilon = 1e-4);
        assert_eq!(normal_cdf(f64::INFINITY), 1.0);
        assert_eq!(normal_cdf(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_normal_cdf_is_monotone() {
        let mut previous = 0.0;
        for i in -80..=80 {
            let value = normal_cdf(i as f64 * 0.1);
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_inverse_normal_known_quantiles() {
        assert_relative_eq!(inverse_normal_cdf(0.5).unwrap(), 0.0, epsilon = 1e-9);
        assert_relative_eq!(inverse_normal_cdf(0.95).unwrap(), 1.644_853_6, epsilon = 1e-6);
        assert_relative_eq!(inverse_normal_cdf(0.99).unwrap(), 2.326_347_9, epsilon = 1e-6);
        assert_relative_eq!(inverse_normal_cdf(0.01).unwrap(), -2.326_347_9, epsilon = 1e-6);
    }

    #[test]
    fn test_inverse_normal_rejects_boundaries() {
        assert!(inverse_normal_cdf(0.0).is_err());
        assert!(inverse_normal_cdf(1.0).is_err());
        assert!(inverse_normal_cdf(f64::NAN).is_err());
    }

    #[test]
    fn test_inverse_roundtrip() {
        for i in -39..=39 {
            let x = i as f64 * 0.1;
            let recovered = inverse_normal_cdf(normal_cdf(x)).unwrap();
            assert!((recovered - x).abs() < 1e-3, "x={} recovered={}", x, recovered);
        }
    }

    #[test]
    fn test_student_t_quantile_matches_tables() {
        // t(0.95, 5) = 2.015, t(0.99, 5) = 3.365
        assert_relative_eq!(student_t_quantile(0.95, 5.0).unwrap(), 2.015, epsilon = 1e-3);
        assert_relative_eq!(student_t_quantile(0.99, 5.0).unwrap(), 3.365, epsilon = 1e-3);
        assert!(student_t_quantile(0.95, -1.0).is_err());
    }

    #[test]
    fn test_sample_moments_symmetric_sample() {
        let returns = vec![-0.02, -0.01, 0.0, 0.01, 0.02];
        let moments = sample_moments(&returns).unwrap();
        assert_eq!(moments.n, 5);
        assert_relative_eq!(moments.mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(moments.std_dev, (0.0002_f64).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(moments.skewness, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_moments_degenerate() {
        assert!(sample_moments(&[0.01, 0.02, 0.03]).is_err());

        let flat = sample_moments(&[0.01; 6]).unwrap();
        assert_eq!(flat.std_dev, 0.0);
        assert_eq!(flat.skewness, 0.0);
        assert_eq!(flat.excess_kurtosis, 0.0);
    }

    #[test]
    fn test_garch_recursion() {
        let returns = vec![0.01, -0.02, 0.015, -0.005, 0.02, -0.01, 0.005, 0.0, -0.015, 0.01];
        let fit = garch11(&returns, &StatsConfig::default()).unwrap();

        assert_eq!(fit.conditional_volatility.len(), returns.len());
        let s0 = sample_variance(&returns);
        let expected_s1 = 1e-5 + 0.10 * 0.01_f64.powi(2) + 0.85 * s0;
        assert_relative_eq!(fit.conditional_volatility[1].powi(2), expected_s1, epsilon = 1e-15);
        assert_relative_eq!(fit.long_run_variance, 1e-5 / 0.05, epsilon = 1e-15);
        assert!(fit.forecast_volatility() > 0.0);
    }

    #[test]
    fn test_garch_rejects_short_and_nonstationary() {
        assert!(matches!(
            garch11(&[0.01, 0.02], &StatsConfig::default()),
            Err(RiskError::InsufficientData(_))
        ));

        let config = StatsConfig {
            garch: Garch11Params {
                omega: 1e-5,
                alpha: 0.5,
                beta: 0.6,
            },
            ..StatsConfig::default()
        };
        let returns = vec![0.01; 12];
        assert!(matches!(
            garch11(&returns, &config),
            Err(RiskError::InvalidParameter(_))
        ));
    }
}

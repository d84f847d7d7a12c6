//! VaR backtesting
//!
//! A violation is a realized return below the VaR threshold. Coverage is
//! checked with likelihood-ratio tests (Kupiec unconditional coverage,
//! Christoffersen independence, and their sum for conditional coverage) and
//! with the Basel traffic-light classification over a 250-day window.

use crate::error::{Result, RiskError};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::debug;

/// χ²(1) critical value at 95%
pub const CHI2_1DF_95: f64 = 3.84;
/// χ²(2) critical value at 95%
pub const CHI2_2DF_95: f64 = 5.99;

const BASEL_WINDOW: usize = 250;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Observations used for the traffic-light classification
    #[serde(default = "default_traffic_light_window")]
    pub traffic_light_window: usize,
}

fn default_min_observations() -> usize {
    20
}

fn default_traffic_light_window() -> usize {
    BASEL_WINDOW
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            min_observations: default_min_observations(),
            traffic_light_window: default_traffic_light_window(),
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_observations == 0 || self.traffic_light_window == 0 {
            return Err(RiskError::Config(
                "backtest observation counts must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Likelihood-ratio test outcome
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageTest {
    pub statistic: f64,
    pub p_value: f64,
    pub reject: bool,
}

impl CoverageTest {
    fn from_statistic(statistic: f64, degrees_of_freedom: f64, critical: f64) -> Self {
        let statistic = statistic.max(0.0);
        let p_value = ChiSquared::new(degrees_of_freedom)
            .map(|chi2| 1.0 - chi2.cdf(statistic))
            .unwrap_or(f64::NAN);
        Self {
            statistic,
            p_value,
            reject: statistic > critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrafficLightZone {
    Green,
    Yellow,
    Red,
}

impl TrafficLightZone {
    /// Increase of the capital multiplier for this zone
    pub fn capital_addon(&self) -> f64 {
        match self {
            TrafficLightZone::Green => 0.0,
            TrafficLightZone::Yellow => 0.2,
            TrafficLightZone::Red => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrafficLight {
    pub zone: TrafficLightZone,
    /// Violations rescaled to a 250-observation window
    pub scaled_violations: usize,
    pub capital_addon: f64,
}

/// Runs of consecutive violations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViolationClustering {
    pub clusters: usize,
    pub max_cluster_length: usize,
    pub mean_cluster_length: f64,
}

/// Size of realized returns on violation days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViolationMagnitude {
    pub mean_violation: f64,
    pub worst_violation: f64,
    /// Mean shortfall of violating returns below the threshold
    pub mean_excess: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub confidence: f64,
    pub observations: usize,
    pub violations: usize,
    pub violation_rate: f64,
    pub expected_rate: f64,
    pub kupiec: CoverageTest,
    pub christoffersen: CoverageTest,
    pub conditional_coverage: CoverageTest,
    pub traffic_light: TrafficLight,
    pub clustering: ViolationClustering,
    pub magnitude: Option<ViolationMagnitude>,
}

impl BacktestReport {
    /// The model passes when no coverage test rejects
    pub fn is_accepted(&self) -> bool {
        !(self.kupiec.reject || self.christoffersen.reject || self.conditional_coverage.reject)
    }
}

/// x·ln(y) with 0·ln(0) = 0
fn xlny(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x * y.ln()
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Kupiec proportion-of-failures test
///
/// LR = −2 ln[(1−p)^(N−x) p^x / ((1−x/N)^(N−x) (x/N)^x)], p = 1 − confidence
pub fn kupiec_test(violations: usize, observations: usize, confidence: f64) -> Result<CoverageTest> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(RiskError::InvalidConfidenceLevel(confidence));
    }
    if observations == 0 || violations > observations {
        return Err(RiskError::InvalidParameter(format!(
            "{} violations out of {} observations",
            violations, observations
        )));
    }

    let n = observations as f64;
    let x = violations as f64;
    let p = 1.0 - confidence;
    let observed = x / n;

    let null = xlny(n - x, 1.0 - p) + xlny(x, p);
    let alternative = xlny(n - x, 1.0 - observed) + xlny(x, observed);

    Ok(CoverageTest::from_statistic(-2.0 * (null - alternative), 1.0, CHI2_1DF_95))
}

/// Christoffersen independence test on the 2×2 transition counts of a hit sequence
pub fn christoffersen_test(hits: &[bool]) -> Result<CoverageTest> {
    if hits.len() < 2 {
        return Err(RiskError::InsufficientData(
            "independence test needs at least two observations".into(),
        ));
    }

    let (mut n00, mut n01, mut n10, mut n11) = (0.0, 0.0, 0.0, 0.0);
    for pair in hits.windows(2) {
        match (pair[0], pair[1]) {
            (false, false) => n00 += 1.0,
            (false, true) => n01 += 1.0,
            (true, false) => n10 += 1.0,
            (true, true) => n11 += 1.0,
        }
    }

    let pi01 = ratio(n01, n00 + n01);
    let pi11 = ratio(n11, n10 + n11);
    let pi = ratio(n01 + n11, n00 + n01 + n10 + n11);

    let null = xlny(n00 + n10, 1.0 - pi) + xlny(n01 + n11, pi);
    let alternative =
        xlny(n00, 1.0 - pi01) + xlny(n01, pi01) + xlny(n10, 1.0 - pi11) + xlny(n11, pi11);

    Ok(CoverageTest::from_statistic(-2.0 * (null - alternative), 1.0, CHI2_1DF_95))
}

/// Joint test LR_uc + LR_ind against χ²(2)
pub fn conditional_coverage_test(kupiec: &CoverageTest, christoffersen: &CoverageTest) -> CoverageTest {
    CoverageTest::from_statistic(
        kupiec.statistic + christoffersen.statistic,
        2.0,
        CHI2_2DF_95,
    )
}

/// Basel traffic light for 99% VaR violations
pub fn traffic_light(violations_99: usize, observations: usize) -> Result<TrafficLight> {
    if observations == 0 {
        return Err(RiskError::InsufficientData(
            "traffic light needs at least one observation".into(),
        ));
    }

    let scaled = if observations == BASEL_WINDOW {
        violations_99
    } else {
        (violations_99 as f64 * BASEL_WINDOW as f64 / observations as f64).round() as usize
    };

    let zone = match scaled {
        0..=4 => TrafficLightZone::Green,
        5..=9 => TrafficLightZone::Yellow,
        _ => TrafficLightZone::Red,
    };

    Ok(TrafficLight {
        zone,
        scaled_violations: scaled,
        capital_addon: zone.capital_addon(),
    })
}

/// Count, longest and mean length of runs of consecutive violations
pub fn violation_clustering(hits: &[bool]) -> ViolationClustering {
    let mut runs = Vec::new();
    let mut current = 0usize;
    for &hit in hits {
        if hit {
            current += 1;
        } else if current > 0 {
            runs.push(current);
            current = 0;
        }
    }
    if current > 0 {
        runs.push(current);
    }

    ViolationClustering {
        clusters: runs.len(),
        max_cluster_length: runs.iter().copied().max().unwrap_or(0),
        mean_cluster_length: if runs.is_empty() {
            0.0
        } else {
            runs.iter().sum::<usize>() as f64 / runs.len() as f64
        },
    }
}

/// VaR backtester
#[derive(Debug, Clone, Default)]
pub struct VarBacktester {
    config: BacktestConfig,
}

impl VarBacktester {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Backtest a constant VaR threshold against realized returns
    pub fn run(&self, realized: &[f64], var_threshold: f64, confidence: f64) -> Result<BacktestReport> {
        let thresholds = vec![var_threshold; realized.len()];
        self.run_with_thresholds(realized, &thresholds, confidence)
    }

    /// Backtest a time-varying VaR forecast aligned with realized returns
    pub fn run_with_thresholds(
        &self,
        realized: &[f64],
        thresholds: &[f64],
        confidence: f64,
    ) -> Result<BacktestReport> {
        if realized.len() != thresholds.len() {
            return Err(RiskError::InvalidParameter(format!(
                "{} realized returns but {} VaR forecasts",
                realized.len(),
                thresholds.len()
            )));
        }
        if realized.len() < self.config.min_observations {
            return Err(RiskError::InsufficientData(format!(
                "Need at least {} observations for backtesting, got {}",
                self.config.min_observations,
                realized.len()
            )));
        }
        if realized.iter().chain(thresholds).any(|v| !v.is_finite()) {
            return Err(RiskError::numerical(
                "backtest",
                "non-finite return or VaR forecast",
            ));
        }

        let hits: Vec<bool> = realized
            .iter()
            .zip(thresholds)
            .map(|(r, var)| r < var)
            .collect();
        let observations = hits.len();
        let violations = hits.iter().filter(|h| **h).count();

        let kupiec = kupiec_test(violations, observations, confidence)?;
        let christoffersen = christoffersen_test(&hits)?;
        let conditional_coverage = conditional_coverage_test(&kupiec, &christoffersen);

        // Traffic light over the most recent window
        let window = self.config.traffic_light_window.min(observations);
        let recent_violations = hits[observations - window..].iter().filter(|h| **h).count();
        let traffic_light = traffic_light(recent_violations, window)?;

        let violating: Vec<(f64, f64)> = realized
            .iter()
            .zip(thresholds)
            .filter(|(r, var)| r < var)
            .map(|(r, var)| (*r, var - r))
            .collect();
        let magnitude = if violating.is_empty() {
            None
        } else {
            let count = violating.len() as f64;
            Some(ViolationMagnitude {
                mean_violation: violating.iter().map(|(r, _)| r).sum::<f64>() / count,
                worst_violation: violating
                    .iter()
                    .map(|(r, _)| *r)
                    .fold(f64::INFINITY, f64::min),
                mean_excess: violating.iter().map(|(_, e)| e).sum::<f64>() / count,
            })
        };

        debug!(
            observations,
            violations,
            kupiec = kupiec.statistic,
            zone = ?traffic_light.zone,
            "VaR backtest complete"
        );

        Ok(BacktestReport {
            confidence,
            observations,
            violations,
            violation_rate: violations as f64 / observations as f64,
            expected_rate: 1.0 - confidence,
            kupiec,
            christoffersen,
            conditional_coverage,
            traffic_light,
            clustering: violation_clustering(&hits),
            magnitude,
        })
    }
}

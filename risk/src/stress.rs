//! Hypothetical stress testing
//!
//! Each scenario shocks one risk factor and maps it onto positions through
//! their metadata:
//! - Rate shock: −D·Δy + ½·C·Δy² on fixed income, C = D² when not quoted
//! - Equity crash: shock × portfolio beta on equity positions
//! - Credit spread widening: −spread duration × Δs on non-AAA fixed income
//! - Currency move: −move on positions outside the base currency
//!
//! Impacts are fractions of portfolio value. Stressed VaR adds the scenario
//! impact to the unstressed parametric VaR of the portfolio return series.

use crate::error::{Result, RiskError};
use crate::stats::{mean, population_variance};
use crate::types::{AssetClass, MarketData, PortfolioData, Position};
use crate::var::normal_estimate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

const BASIS_POINT: f64 = 1e-4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default = "default_base_currency")]
    pub base_currency: String,

    /// Duration assumed for fixed income without one
    #[serde(default = "default_duration")]
    pub default_duration: f64,

    #[serde(default = "default_spread_duration")]
    pub default_spread_duration: f64,

    /// Ratings exempt from the credit spread scenario
    #[serde(default = "default_credit_exempt_ratings")]
    pub credit_exempt_ratings: Vec<String>,
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_duration() -> f64 {
    5.0
}

fn default_spread_duration() -> f64 {
    4.0
}

fn default_credit_exempt_ratings() -> Vec<String> {
    vec!["AAA".to_string()]
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            base_currency: default_base_currency(),
            default_duration: default_duration(),
            default_spread_duration: default_spread_duration(),
            credit_exempt_ratings: default_credit_exempt_ratings(),
        }
    }
}

impl StressConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_duration < 0.0 || self.default_spread_duration < 0.0 {
            return Err(RiskError::Config("durations cannot be negative".into()));
        }
        if self.base_currency.is_empty() {
            return Err(RiskError::Config("base currency is required".into()));
        }
        Ok(())
    }
}

/// Risk factor shocked by a scenario
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factor", rename_all = "snake_case")]
pub enum ScenarioShock {
    /// Parallel yield shift in basis points
    RateShock { basis_points: f64 },
    /// Equity market return, e.g. -0.30
    EquityCrash { market_move: f64 },
    /// Credit spread widening in basis points
    CreditSpread { basis_points: f64 },
    /// Appreciation of the base currency, e.g. 0.20
    Currency { base_move: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    pub description: String,
    pub shock: ScenarioShock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestResult {
    pub scenario_name: String,

    /// Portfolio return under the scenario
    pub portfolio_impact: f64,

    /// Empty when no position is hit
    pub worst_position: Option<String>,
    pub worst_position_impact: f64,

    /// Contribution of each position to the portfolio impact
    pub position_impacts: BTreeMap<String, f64>,

    pub stressed_var_95: Option<f64>,
    pub stressed_var_99: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestReport {
    pub results: Vec<StressTestResult>,
    pub worst_scenario: String,
    pub max_loss: f64,
    pub best_scenario: String,
    pub max_gain: f64,
    pub average_impact: f64,
    pub timestamp: DateTime<Utc>,
}

impl StressTestReport {
    pub fn worst(&self) -> Option<&StressTestResult> {
        self.results
            .iter()
            .find(|r| r.scenario_name == self.worst_scenario)
    }
}

/// Stress testing engine
#[derive(Debug, Clone)]
pub struct StressTestEngine {
    config: StressConfig,
    scenarios: Vec<StressScenario>,
}

impl Default for StressTestEngine {
    fn default() -> Self {
        Self::with_hypothetical_scenarios(StressConfig::default())
    }
}

impl StressTestEngine {
    pub fn new(config: StressConfig, scenarios: Vec<StressScenario>) -> Self {
        Self { config, scenarios }
    }

    /// Rate +300bp, equities −30%, credit +200bp, base currency +20%
    pub fn with_hypothetical_scenarios(config: StressConfig) -> Self {
        let scenarios = vec![
            StressScenario {
                name: "Rate Shock +300bp".to_string(),
                description: "Parallel upward shift of the yield curve".to_string(),
                shock: ScenarioShock::RateShock {
                    basis_points: 300.0,
                },
            },
            StressScenario {
                name: "Equity Crash -30%".to_string(),
                description: "Broad equity market sell-off".to_string(),
                shock: ScenarioShock::EquityCrash { market_move: -0.30 },
            },
            StressScenario {
                name: "Credit Spread +200bp".to_string(),
                description: "Widening of corporate credit spreads".to_string(),
                shock: ScenarioShock::CreditSpread {
                    basis_points: 200.0,
                },
            },
            StressScenario {
                name: "Base Currency +20%".to_string(),
                description: "Appreciation of the reporting currency".to_string(),
                shock: ScenarioShock::Currency { base_move: 0.20 },
            },
        ];
        Self { config, scenarios }
    }

    pub fn add_scenario(&mut self, scenario: StressScenario) {
        self.scenarios.push(scenario);
    }

    pub fn scenarios(&self) -> &[StressScenario] {
        &self.scenarios
    }

    /// Return of one position under `shock`, before weighting
    fn position_return(&self, position: &Position, shock: &ScenarioShock, beta: f64) -> f64 {
        let meta = &position.metadata;
        let is_fixed_income = position.asset_class == AssetClass::FixedIncome;
        match *shock {
            ScenarioShock::RateShock { basis_points } if is_fixed_income => {
                let dy = basis_points * BASIS_POINT;
                let duration = meta.duration.unwrap_or(self.config.default_duration);
                let convexity = duration * duration;
                -duration * dy + 0.5 * convexity * dy * dy
            }
            ScenarioShock::EquityCrash { market_move } if position.asset_class == AssetClass::Equity => {
                market_move * beta
            }
            ScenarioShock::CreditSpread { basis_points } if is_fixed_income => {
                let exempt = meta
                    .credit_rating
                    .as_ref()
                    .map(|r| self.config.credit_exempt_ratings.iter().any(|e| e == r))
                    .unwrap_or(false);
                if exempt {
                    0.0
                } else {
                    let spread_duration = meta.duration.unwrap_or(self.config.default_spread_duration);
                    -spread_duration * basis_points * BASIS_POINT
                }
            }
            ScenarioShock::Currency { base_move } => match &meta.currency {
                Some(currency) if *currency != self.config.base_currency => -base_move,
                _ => 0.0,
            },
            _ => 0.0,
        }
    }

    pub fn run_stress_test(
        &self,
        portfolio: &PortfolioData,
        market: &MarketData,
        scenario: &StressScenario,
    ) -> Result<StressTestResult> {
        let weights = portfolio.normalized_weights()?;

        let mut position_impacts = BTreeMap::new();
        let mut total_impact = 0.0;
        let mut worst_position = None;
        let mut worst_position_impact = 0.0;

        for position in &portfolio.positions {
            let weight = weights.get(&position.id).copied().unwrap_or(0.0);
            let impact = weight * self.position_return(position, &scenario.shock, market.beta);
            total_impact += impact;

            if impact < worst_position_impact {
                worst_position = Some(position.id.clone());
                worst_position_impact = impact;
            }
            *position_impacts.entry(position.id.clone()).or_insert(0.0) += impact;
        }

        let base_var = |confidence: f64| -> Option<f64> {
            let returns = &market.portfolio_returns;
            if returns.len() < 2 {
                return None;
            }
            let sigma = population_variance(returns).sqrt();
            normal_estimate(mean(returns), sigma, confidence, 1)
                .ok()
                .map(|estimate| estimate.var)
        };

        debug!(
            scenario = %scenario.name,
            impact = total_impact,
            "Stress scenario evaluated"
        );

        Ok(StressTestResult {
            scenario_name: scenario.name.clone(),
            portfolio_impact: total_impact,
            worst_position,
            worst_position_impact,
            position_impacts,
            stressed_var_95: base_var(0.95).map(|v| v + total_impact),
            stressed_var_99: base_var(0.99).map(|v| v + total_impact),
        })
    }

    pub fn run_all_scenarios(
        &self,
        portfolio: &PortfolioData,
        market: &MarketData,
    ) -> Result<Vec<StressTestResult>> {
        self.scenarios
            .iter()
            .map(|scenario| self.run_stress_test(portfolio, market, scenario))
            .collect()
    }

    pub fn generate_report(&self, results: &[StressTestResult]) -> Result<StressTestReport> {
        let first = results.first().ok_or_else(|| {
            RiskError::InsufficientData("No stress test results provided".to_string())
        })?;

        let mut worst = first;
        let mut best = first;
        let mut total_impact = 0.0;
        for result in results {
            total_impact += result.portfolio_impact;
            if result.portfolio_impact < worst.portfolio_impact {
                worst = result;
            }
            if result.portfolio_impact > best.portfolio_impact {
                best = result;
            }
        }

        Ok(StressTestReport {
            results: results.to_vec(),
            worst_scenario: worst.scenario_name.clone(),
            max_loss: worst.portfolio_impact,
            best_scenario: best.scenario_name.clone(),
            max_gain: best.portfolio_impact,
            average_impact: total_impact / results.len() as f64,
            timestamp: Utc::now(),
        })
    }

    /// Run every scenario and summarize
    pub fn run_report(&self, portfolio: &PortfolioData, market: &MarketData) -> Result<StressTestReport> {
        let results = self.run_all_scenarios(portfolio, market)?;
        self.generate_report(&results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionMetadata;
    use approx::assert_relative_eq;

    fn create_test_portfolio() -> PortfolioData {
        let position = |id: &str, class, weight, metadata| Position {
            id: id.to_string(),
            asset_class: class,
            weight,
            value: 0.0,
            metadata,
        };
        PortfolioData {
            positions: vec![
                position(
                    "SPY",
                    AssetClass::Equity,
                    0.6,
                    PositionMetadata {
                        currency: Some("USD".into()),
                        ..Default::default()
                    },
                ),
                position(
                    "UST",
                    AssetClass::FixedIncome,
                    0.2,
                    PositionMetadata {
                        credit_rating: Some("AAA".into()),
                        duration: Some(5.0),
                        currency: Some("USD".into()),
                        ..Default::default()
                    },
                ),
                position(
                    "CORP",
                    AssetClass::FixedIncome,
                    0.1,
                    PositionMetadata {
                        credit_rating: Some("BBB".into()),
                        duration: Some(4.0),
                        currency: Some("USD".into()),
                        ..Default::default()
                    },
                ),
                position(
                    "EWJ",
                    AssetClass::Equity,
                    0.1,
                    PositionMetadata {
                        currency: Some("JPY".into()),
                        ..Default::default()
                    },
                ),
            ],
            ..Default::default()
        }
    }

    fn market() -> MarketData {
        MarketData {
            beta: 1.1,
            ..Default::default()
        }
    }

    fn scenario<'a>(engine: &'a StressTestEngine, prefix: &str) -> &'a StressScenario {
        engine
            .scenarios()
            .iter()
            .find(|s| s.name.starts_with(prefix))
            .unwrap()
    }

    #[test]
    fn test_rate_shock_uses_duration_and_convexity() {
        let engine = StressTestEngine::default();
        let result = engine
            .run_stress_test(&create_test_portfolio(), &market(), scenario(&engine, "Rate"))
            .unwrap();

        let dy = 0.03;
        let ust = 0.2 * (-5.0 * dy + 0.5 * 25.0 * dy * dy);
        let corp = 0.1 * (-4.0 * dy + 0.5 * 16.0 * dy * dy);
        assert_relative_eq!(result.position_impacts["UST"], ust, epsilon = 1e-12);
        assert_relative_eq!(result.portfolio_impact, ust + corp, epsilon = 1e-12);
        assert_eq!(result.position_impacts["SPY"], 0.0);
        assert_eq!(result.worst_position.as_deref(), Some("UST"));
    }

    #[test]
    fn test_equity_crash_scales_with_beta() {
        let engine = StressTestEngine::default();
        let result = engine
            .run_stress_test(&create_test_portfolio(), &market(), scenario(&engine, "Equity"))
            .unwrap();
        assert_relative_eq!(result.portfolio_impact, 0.7 * 1.1 * -0.30, epsilon = 1e-12);
    }

    #[test]
    fn test_credit_spread_skips_aaa() {
        let engine = StressTestEngine::default();
        let result = engine
            .run_stress_test(&create_test_portfolio(), &market(), scenario(&engine, "Credit"))
            .unwrap();
        assert_eq!(result.position_impacts["UST"], 0.0);
        assert_relative_eq!(result.portfolio_impact, -0.1 * 4.0 * 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_currency_hits_foreign_exposure() {
        let engine = StressTestEngine::default();
        let result = engine
            .run_stress_test(&create_test_portfolio(), &market(), scenario(&engine, "Base"))
            .unwrap();
        assert_relative_eq!(result.portfolio_impact, -0.1 * 0.20, epsilon = 1e-12);
        assert_eq!(result.worst_position.as_deref(), Some("EWJ"));
    }

    #[test]
    fn test_report_identifies_worst_case() {
        let engine = StressTestEngine::default();
        let mut market = market();
        market.portfolio_returns = vec![0.01, -0.02, 0.015, -0.005, 0.0, 0.02, -0.01];

        let report = engine.run_report(&create_test_portfolio(), &market).unwrap();
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.worst_scenario, "Equity Crash -30%");
        assert!(report.max_loss < report.average_impact);

        let worst = report.worst().unwrap();
        assert!(worst.stressed_var_99.unwrap() < worst.stressed_var_95.unwrap());
        assert!(worst.stressed_var_95.unwrap() < worst.portfolio_impact);
    }

    #[test]
    fn test_stressed_var_matches_parametric_engine() {
        use crate::var::VarEngine;

        let engine = StressTestEngine::default();
        let mut market = market();
        market.portfolio_returns = vec![0.01, -0.02, 0.015, -0.005, 0.0, 0.02, -0.01];

        let result = engine
            .run_stress_test(&create_test_portfolio(), &market, scenario(&engine, "Rate"))
            .unwrap();
        let base = VarEngine::default()
            .parametric_normal(&market.portfolio_returns, &[0.95, 0.99], 1)
            .unwrap();

        assert_relative_eq!(
            result.stressed_var_95.unwrap(),
            base.at(0.95).unwrap().var + result.portfolio_impact,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            result.stressed_var_99.unwrap(),
            base.at(0.99).unwrap().var + result.portfolio_impact,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_custom_scenario_and_empty_report() {
        let mut engine = StressTestEngine::new(StressConfig::default(), vec![]);
        assert!(engine.generate_report(&[]).is_err());

        engine.add_scenario(StressScenario {
            name: "Mild Correction".to_string(),
            description: "Normal market pullback".to_string(),
            shock: ScenarioShock::EquityCrash { market_move: -0.05 },
        });
        let results = engine.run_all_scenarios(&create_test_portfolio(), &market()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].stressed_var_95.is_none());
    }
}

//! Engine configuration
//!
//! Every section has defaults, so a partial YAML document only needs to name
//! the values it overrides.

use crate::backtest::BacktestConfig;
use crate::error::{Result, RiskError};
use crate::greeks::GreeksConfig;
use crate::optimization::OptimizerConfig;
use crate::portfolio::PortfolioConfig;
use crate::stats::StatsConfig;
use crate::stress::StressConfig;
use crate::valuation::ValuationConfig;
use crate::var::VarConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub var: VarConfig,

    #[serde(default)]
    pub backtest: BacktestConfig,

    #[serde(default)]
    pub greeks: GreeksConfig,

    #[serde(default)]
    pub portfolio: PortfolioConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub valuation: ValuationConfig,

    #[serde(default)]
    pub stress: StressConfig,
}

impl EngineConfig {
    /// Load configuration from a YAML string
    ///
    /// # Example
    ///
    /// ```
    /// use quant_risk::EngineConfig;
    ///
    /// let yaml = r#"
    /// var:
    ///   simulations: 20000
    ///   random_seed: 7
    /// "#;
    ///
    /// let config = EngineConfig::from_yaml(yaml).unwrap();
    /// assert_eq!(config.var.simulations, 20000);
    /// assert_eq!(config.backtest.min_observations, 20);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RiskError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.stats
            .garch
            .validate()
            .map_err(|e| RiskError::Config(e.to_string()))?;
        if self.stats.min_garch_observations < 2 {
            return Err(RiskError::Config(
                "min_garch_observations must be at least 2".into(),
            ));
        }

        self.var.validate()?;
        self.backtest.validate()?;
        self.optimizer.validate()?;
        self.valuation.validate()?;
        self.stress.validate()?;

        if !(self.greeks.days_per_year > 0.0) || self.greeks.min_time_to_expiry_hours < 0.0 {
            return Err(RiskError::Config(
                "greeks days_per_year must be positive and min_time_to_expiry_hours non-negative"
                    .into(),
            ));
        }
        if self.portfolio.min_observations < 2 || self.portfolio.regularization < 0.0 {
            return Err(RiskError::Config(
                "portfolio min_observations must be at least 2 and regularization non-negative"
                    .into(),
            ));
        }
        Ok(())
    }
}

//! Input and output records exchanged with the engine

use crate::error::{Result, RiskError};
use crate::greeks::OptionPosition;
use crate::optimization::InvestorView;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One reporting period of financial statement data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub period: NaiveDate,
    pub revenue: f64,
    pub operating_income: f64,
    pub net_income: f64,
    pub income_before_tax: f64,
    #[serde(default)]
    pub interest_expense: f64,
    #[serde(default)]
    pub tax_expense: f64,
    #[serde(default)]
    pub cash_taxes_paid: f64,
    #[serde(default)]
    pub research_development: f64,
    /// One-off items already included in operating income
    #[serde(default)]
    pub unusual_items: f64,
    #[serde(default)]
    pub depreciation_amortization: f64,
    #[serde(default)]
    pub operating_cash_flow: f64,
    #[serde(default)]
    pub capital_expenditures: f64,
    pub total_assets: f64,
    #[serde(default)]
    pub total_debt: f64,
    #[serde(default)]
    pub cash: f64,
    pub total_equity: f64,
    #[serde(default)]
    pub goodwill: f64,
    #[serde(default)]
    pub goodwill_impairment: f64,
    #[serde(default)]
    pub accumulated_amortization: f64,
    #[serde(default)]
    pub operating_lease_payments: f64,
    #[serde(default)]
    pub shares_outstanding: f64,
}

impl FinancialStatement {
    /// Operating cash flow less capital expenditure
    pub fn free_cash_flow(&self) -> f64 {
        self.operating_cash_flow - self.capital_expenditures.abs()
    }

    pub fn net_debt(&self) -> f64 {
        self.total_debt - self.cash
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssetClass {
    Equity,
    FixedIncome,
    Commodity,
    Alternative,
    Cash,
}

impl AssetClass {
    pub fn label(&self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::FixedIncome => "fixed_income",
            AssetClass::Commodity => "commodity",
            AssetClass::Alternative => "alternative",
            AssetClass::Cash => "cash",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionMetadata {
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub credit_rating: Option<String>,
    /// Modified duration in years, fixed income only
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub instrument_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub asset_class: AssetClass,
    pub weight: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub metadata: PositionMetadata,
}

/// Portfolio composition and per-position history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioData {
    pub positions: Vec<Position>,
    /// Historical return series keyed by position id
    #[serde(default)]
    pub asset_returns: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub option_positions: Vec<OptionPosition>,
    #[serde(default)]
    pub views: Vec<InvestorView>,
}

impl PortfolioData {
    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    /// Position weights rescaled to sum to one
    pub fn normalized_weights(&self) -> Result<BTreeMap<String, f64>> {
        if self.positions.is_empty() {
            return Err(RiskError::MissingData("portfolio has no positions".to_string()));
        }
        let total: f64 = self.positions.iter().map(|p| p.weight).sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(RiskError::InvalidParameter(format!(
                "position weights must sum to a positive value, got {}",
                total
            )));
        }
        Ok(self
            .positions
            .iter()
            .map(|p| (p.id.clone(), p.weight / total))
            .collect())
    }

    /// Sum of normalized weights for positions matching `predicate`
    pub fn exposure<F>(&self, predicate: F) -> Result<f64>
    where
        F: Fn(&Position) -> bool,
    {
        let weights = self.normalized_weights()?;
        Ok(self
            .positions
            .iter()
            .filter(|p| predicate(p))
            .filter_map(|p| weights.get(&p.id))
            .sum())
    }
}

/// Market inputs shared by the risk and valuation components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Daily portfolio return series, oldest first
    #[serde(default)]
    pub portfolio_returns: Vec<f64>,
    /// Daily benchmark index returns aligned with `portfolio_returns`
    #[serde(default)]
    pub market_returns: Vec<f64>,
    /// Annual risk-free rate
    pub risk_free_rate: f64,
    pub market_risk_premium: f64,
    pub beta: f64,
    /// Market value of equity, when quoted
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub implied_volatility: BTreeMap<String, f64>,
    #[serde(default)]
    pub underlying_prices: BTreeMap<String, f64>,
    /// Realized returns matched against VaR forecasts
    #[serde(default)]
    pub backtest_returns: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkData {
    #[serde(default)]
    pub industry_wacc: Option<f64>,
    #[serde(default)]
    pub industry_roic: Option<f64>,
    #[serde(default)]
    pub benchmark_returns: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rating {
    Poor,
    Average,
    Good,
    Excellent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Completed,
    Error,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    /// Relative change below this magnitude counts as stable
    pub const STABLE_BAND: f64 = 0.05;

    /// Direction of the last move in a series, `None` with fewer than two points
    pub fn from_series(values: &[f64]) -> Option<Trend> {
        if values.len() < 2 {
            return None;
        }
        let current = values[values.len() - 1];
        let previous = values[values.len() - 2];
        if !current.is_finite() || !previous.is_finite() {
            return None;
        }

        let change = if previous != 0.0 {
            (current - previous) / previous.abs()
        } else {
            current - previous
        };

        Some(if change.abs() < Self::STABLE_BAND {
            Trend::Stable
        } else if change > 0.0 {
            Trend::Up
        } else {
            Trend::Down
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricCategory {
    MarketRisk,
    Backtesting,
    Derivatives,
    PortfolioConstruction,
    Valuation,
    Performance,
    StressTesting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub benchmark_value: f64,
    pub difference: f64,
    pub outperforms: bool,
}

/// One rated indicator in the output catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub name: String,
    pub category: MetricCategory,
    pub current_value: f64,
    pub rating: Rating,
    pub trend: Option<Trend>,
    pub interpretation: String,
    pub recommendations: Vec<String>,
    pub benchmark: Option<BenchmarkComparison>,
    pub status: Status,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(id: &str, class: AssetClass, weight: f64) -> Position {
        Position {
            id: id.to_string(),
            asset_class: class,
            weight,
            value: 0.0,
            metadata: PositionMetadata::default(),
        }
    }

    #[test]
    fn test_normalized_weights() {
        let portfolio = PortfolioData {
            positions: vec![
                position("A", AssetClass::Equity, 2.0),
                position("B", AssetClass::FixedIncome, 6.0),
            ],
            ..Default::default()
        };

        let weights = portfolio.normalized_weights().unwrap();
        assert!((weights["A"] - 0.25).abs() < 1e-12);
        assert!((weights["B"] - 0.75).abs() < 1e-12);

        let equity = portfolio
            .exposure(|p| p.asset_class == AssetClass::Equity)
            .unwrap();
        assert!((equity - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_normalized_weights_rejects_empty_and_zero() {
        assert!(PortfolioData::default().normalized_weights().is_err());

        let zero = PortfolioData {
            positions: vec![position("A", AssetClass::Cash, 0.0)],
            ..Default::default()
        };
        assert!(zero.normalized_weights().is_err());
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(Trend::from_series(&[1.0]), None);
        assert_eq!(Trend::from_series(&[100.0, 102.0]), Some(Trend::Stable));
        assert_eq!(Trend::from_series(&[100.0, 110.0]), Some(Trend::Up));
        assert_eq!(Trend::from_series(&[-100.0, -120.0]), Some(Trend::Down));
    }

    #[test]
    fn test_rating_ordering() {
        assert!(Rating::Excellent > Rating::Good);
        assert!(Rating::Average > Rating::Poor);
    }

    #[test]
    fn test_statement_deserializes_with_defaults() {
        let json = r#"{
            "period": "2023-12-31",
            "revenue": 1000.0,
            "operating_income": 150.0,
            "net_income": 100.0,
            "income_before_tax": 130.0,
            "total_assets": 2000.0,
            "total_equity": 900.0
        }"#;
        let statement: FinancialStatement = serde_json::from_str(json).unwrap();
        assert_eq!(statement.total_debt, 0.0);
        assert_eq!(statement.free_cash_flow(), 0.0);
    }
}

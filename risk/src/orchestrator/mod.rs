//! Catalogue evaluation
//!
//! Each indicator is a [`MetricSpec`]: an identifier, display name,
//! category, rating thresholds and a compute function. The orchestrator
//! evaluates the registry in parallel and turns every outcome, failed or
//! not, into an [`AnalysisResult`] in registry order.

pub mod catalogue;

use crate::backtest::VarBacktester;
use crate::config::EngineConfig;
use crate::error::{Result, RiskError};
use crate::greeks::GreeksEngine;
use crate::optimization::Optimizer;
use crate::portfolio::{PortfolioAnalyzer, RiskFactorEstimate};
use crate::rating::RatingThresholds;
use crate::stress::StressTestEngine;
use crate::types::{
    AnalysisResult, BenchmarkComparison, BenchmarkData, FinancialStatement, MarketData,
    MetricCategory, PortfolioData, Rating, Status, Trend,
};
use crate::valuation::ValuationEngine;
use crate::var::{SimulationInputs, VarEngine};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::borrow::Cow;
use tracing::{info, warn};

/// Computed value of one indicator before rating
#[derive(Debug, Clone, PartialEq)]
pub struct MetricOutcome {
    pub value: f64,
    /// Rated instead of `value` when set
    pub rating_basis: Option<f64>,
    pub trend: Option<Trend>,
    pub interpretation: String,
    pub recommendations: Vec<String>,
    pub benchmark: Option<BenchmarkComparison>,
}

impl MetricOutcome {
    pub fn new(value: f64, interpretation: impl Into<String>) -> Self {
        Self {
            value,
            rating_basis: None,
            trend: None,
            interpretation: interpretation.into(),
            recommendations: Vec::new(),
            benchmark: None,
        }
    }

    pub fn rated_on(mut self, basis: f64) -> Self {
        self.rating_basis = Some(basis);
        self
    }

    pub fn with_trend(mut self, trend: Option<Trend>) -> Self {
        self.trend = trend;
        self
    }

    pub fn recommend(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }

    /// Compare against a benchmark; `higher_is_better` decides who outperforms
    pub fn against(mut self, benchmark_value: f64, higher_is_better: bool) -> Self {
        let difference = self.value - benchmark_value;
        self.benchmark = Some(BenchmarkComparison {
            benchmark_value,
            difference,
            outperforms: if higher_is_better {
                difference > 0.0
            } else {
                difference < 0.0
            },
        });
        self
    }
}

pub type ComputeFn = fn(&AnalysisContext<'_>) -> Result<MetricOutcome>;

/// Registry entry for one indicator
#[derive(Clone)]
pub struct MetricSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub category: MetricCategory,
    pub thresholds: RatingThresholds,
    pub compute: ComputeFn,
}

impl std::fmt::Debug for MetricSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSpec")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

/// Inputs and engines shared by every compute function
pub struct AnalysisContext<'a> {
    pub statements: &'a [FinancialStatement],
    pub portfolio: &'a PortfolioData,
    pub market: &'a MarketData,
    pub benchmark: Option<&'a BenchmarkData>,
    pub config: &'a EngineConfig,
    pub var: VarEngine,
    pub backtester: VarBacktester,
    pub greeks: GreeksEngine,
    pub analyzer: PortfolioAnalyzer,
    pub optimizer: Optimizer,
    pub valuation: ValuationEngine,
    pub stress: StressTestEngine,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(
        statements: &'a [FinancialStatement],
        portfolio: &'a PortfolioData,
        market: &'a MarketData,
        benchmark: Option<&'a BenchmarkData>,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            statements,
            portfolio,
            market,
            benchmark,
            config,
            var: VarEngine::with_stats_config(config.var.clone(), config.stats.clone()),
            backtester: VarBacktester::new(config.backtest.clone()),
            greeks: GreeksEngine::new(config.greeks.clone()),
            analyzer: PortfolioAnalyzer::new(config.portfolio.clone()),
            optimizer: Optimizer::new(config.optimizer.clone()),
            valuation: ValuationEngine::new(config.valuation.clone()),
            stress: StressTestEngine::with_hypothetical_scenarios(config.stress.clone()),
        }
    }

    /// Most recent statement
    pub fn latest_statement(&self) -> Result<&'a FinancialStatement> {
        self.statements.last().ok_or(RiskError::EmptyStatementHistory)
    }

    /// Portfolio return series, or the weighted sum of the position
    /// histories when no series is supplied
    pub fn portfolio_returns(&self) -> Result<Cow<'a, [f64]>> {
        let market: &'a MarketData = self.market;
        if !market.portfolio_returns.is_empty() {
            return Ok(Cow::Borrowed(market.portfolio_returns.as_slice()));
        }

        let weights = self.portfolio.normalized_weights()?;
        let series: Vec<(&Vec<f64>, f64)> = weights
            .iter()
            .filter_map(|(id, w)| self.portfolio.asset_returns.get(id).map(|r| (r, *w)))
            .collect();
        let length = series.iter().map(|(r, _)| r.len()).min().unwrap_or(0);
        if length == 0 {
            return Err(RiskError::MissingData("portfolio return series".into()));
        }

        let combined: Vec<f64> = (0..length)
            .map(|t| series.iter().map(|(r, w)| r[t] * w).sum::<f64>())
            .collect();
        Ok(Cow::Owned(combined))
    }

    /// Per-period moments of the position return histories
    pub fn risk_estimate(&self) -> Result<RiskFactorEstimate> {
        if self.portfolio.asset_returns.is_empty() {
            return Err(RiskError::MissingData("position return histories".into()));
        }
        self.analyzer.estimate(&self.portfolio.asset_returns)
    }

    pub fn simulation_inputs(&self) -> Result<SimulationInputs> {
        let estimate = self.risk_estimate()?;
        SimulationInputs::from_estimate(&estimate, &self.portfolio.normalized_weights()?)
    }
}

/// Evaluates a metric registry over one set of inputs
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: EngineConfig,
    registry: Vec<MetricSpec>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Default configuration with the full catalogue
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: catalogue::default_registry(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: catalogue::default_registry(),
        })
    }

    /// Replace the catalogue
    pub fn with_registry(mut self, registry: Vec<MetricSpec>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &[MetricSpec] {
        &self.registry
    }

    pub fn compute(
        &self,
        statements: &[FinancialStatement],
        portfolio: &PortfolioData,
        market: &MarketData,
        benchmark: Option<&BenchmarkData>,
    ) -> Result<Vec<AnalysisResult>> {
        if statements.is_empty() {
            return Err(RiskError::EmptyStatementHistory);
        }

        let ctx = AnalysisContext::new(statements, portfolio, market, benchmark, &self.config);
        let computed_at = Utc::now();

        let results: Vec<AnalysisResult> = self
            .registry
            .par_iter()
            .map(|spec| evaluate(spec, &ctx, computed_at))
            .collect();

        let completed = results
            .iter()
            .filter(|r| r.status == Status::Completed)
            .count();
        info!(
            metrics = results.len(),
            completed,
            "Analysis catalogue computed"
        );

        Ok(results)
    }
}

fn evaluate(spec: &MetricSpec, ctx: &AnalysisContext<'_>, computed_at: DateTime<Utc>) -> AnalysisResult {
    let base = |status: Status, current_value: f64, rating: Rating, interpretation: String| AnalysisResult {
        id: spec.id.to_string(),
        name: spec.name.to_string(),
        category: spec.category,
        current_value,
        rating,
        trend: None,
        interpretation,
        recommendations: Vec::new(),
        benchmark: None,
        status,
        computed_at,
    };

    match (spec.compute)(ctx) {
        Ok(outcome) if !outcome.value.is_nan() => {
            let rating = spec
                .thresholds
                .rate(outcome.rating_basis.unwrap_or(outcome.value));
            AnalysisResult {
                trend: outcome.trend,
                recommendations: outcome.recommendations,
                benchmark: outcome.benchmark,
                ..base(Status::Completed, outcome.value, rating, outcome.interpretation)
            }
        }
        Ok(_) => {
            warn!(metric = spec.id, "Metric produced NaN");
            base(
                Status::Error,
                0.0,
                Rating::Poor,
                "Calculation produced an undefined value".to_string(),
            )
        }
        Err(e) => {
            let status = if e.is_data_shortage() {
                Status::InsufficientData
            } else {
                Status::Error
            };
            warn!(metric = spec.id, error = %e, "Metric not computed");
            base(status, 0.0, Rating::Poor, e.to_string())
        }
    }
}

/// Evaluate the default catalogue with the default configuration
pub fn compute_analyses(
    statements: &[FinancialStatement],
    portfolio: &PortfolioData,
    market: &MarketData,
    benchmark: Option<&BenchmarkData>,
) -> Result<Vec<AnalysisResult>> {
    Orchestrator::new().compute(statements, portfolio, market, benchmark)
}

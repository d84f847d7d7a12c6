//! # quant-risk: Quantitative Risk and Valuation Engine
//!
//! Turns financial statements, market data and portfolio composition into a
//! catalogue of rated financial indicators.
//!
//! ## Core Components
//!
//! - **VarEngine**: parametric, historical and simulated VaR/CVaR with
//!   position-level decomposition
//! - **VarBacktester**: Kupiec, Christoffersen and Basel traffic-light tests
//! - **GreeksEngine**: Black-Scholes pricing and portfolio sensitivities
//! - **Optimizer**: mean-variance, minimum variance, maximum Sharpe, risk
//!   parity and Black-Litterman allocations
//! - **ValuationEngine**: WACC, NOPAT, EVA and DCF
//! - **Orchestrator**: evaluates the indicator registry and rates each result
//!
//! ## Example Usage
//!
//! ```rust
//! use quant_risk::{VarConfig, VarEngine};
//!
//! let returns = vec![
//!     0.012, -0.008, 0.004, -0.015, 0.009, 0.002, -0.021, 0.011, -0.003, 0.006,
//! ];
//!
//! let engine = VarEngine::new(VarConfig::default());
//! let result = engine.parametric_normal(&returns, &[0.95, 0.99], 1).unwrap();
//!
//! let var_95 = result.at(0.95).unwrap();
//! let var_99 = result.at(0.99).unwrap();
//! assert!(var_99.var < var_95.var);
//! assert!(var_95.cvar <= var_95.var);
//! assert!(result.low_confidence); // fewer than 30 observations
//! ```

pub mod backtest;
pub mod config;
pub mod error;
pub mod greeks;
pub mod metrics;
pub mod optimization;
pub mod orchestrator;
pub mod portfolio;
pub mod rating;
pub mod sampling;
pub mod stats;
pub mod stress;
pub mod types;
pub mod valuation;
pub mod var;

pub use backtest::{BacktestConfig, BacktestReport, TrafficLightZone, VarBacktester};
pub use config::EngineConfig;
pub use error::{Result, RiskError};
pub use greeks::{GreeksConfig, GreeksEngine, OptionContract, OptionPosition, OptionType};
pub use metrics::PerformanceMetrics;
pub use optimization::{OptimizationResult, Optimizer, OptimizerConfig};
pub use orchestrator::{compute_analyses, AnalysisContext, MetricOutcome, MetricSpec, Orchestrator};
pub use portfolio::{PortfolioAnalyzer, PortfolioConfig, RiskFactorEstimate};
pub use rating::{RatingDirection, RatingThresholds};
pub use stress::{StressConfig, StressTestEngine, StressTestReport};
pub use types::{
    AnalysisResult, AssetClass, BenchmarkData, FinancialStatement, MarketData, MetricCategory,
    PortfolioData, Position, PositionMetadata, Rating, Status, Trend,
};
pub use valuation::{ValuationConfig, ValuationEngine};
pub use var::{SimulationInputs, VarConfig, VarEngine, VarMethod, VarMethodResult, VarReport};

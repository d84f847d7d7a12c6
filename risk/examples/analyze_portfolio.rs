//! Full indicator catalogue over the bundled sample data
//!
//! Run with: cargo run --example analyze_portfolio [config.yaml]
//!
//! Set RUST_LOG=quant_risk=debug to see per-method diagnostics.

use quant_risk::{
    AnalysisResult, BenchmarkData, EngineConfig, FinancialStatement, MarketData, Orchestrator,
    PortfolioData, Status,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn load<T: DeserializeOwned>(name: &str) -> Result<T, Box<dyn std::error::Error>> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    let json = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&json)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("quant_risk=info".parse()?))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::from_yaml_file(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.yaml"),
        )?,
    };

    let statements: Vec<FinancialStatement> = load("statements.json")?;
    let portfolio: PortfolioData = load("portfolio.json")?;
    let market: MarketData = load("market.json")?;
    let benchmark: BenchmarkData = load("benchmark.json")?;

    let orchestrator = Orchestrator::with_config(config)?;
    let results = orchestrator.compute(&statements, &portfolio, &market, Some(&benchmark))?;

    println!("=== Risk and Valuation Summary ===\n");
    for result in &results {
        print_result(result);
    }

    println!("\n=== JSON ===\n");
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

fn print_result(result: &AnalysisResult) {
    match result.status {
        Status::Completed => {
            println!(
                "{:<32} {:>14.4}  {:?}{}",
                result.name,
                result.current_value,
                result.rating,
                result
                    .trend
                    .map(|t| format!(" ({:?})", t))
                    .unwrap_or_default()
            );
            println!("    {}", result.interpretation);
            for recommendation in &result.recommendations {
                println!("    -> {}", recommendation);
            }
        }
        status => println!("{:<32} {:?}: {}", result.name, status, result.interpretation),
    }
}

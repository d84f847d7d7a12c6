//! Default indicator catalogue

use super::{AnalysisContext, MetricOutcome, MetricSpec};
use crate::error::{Result, RiskError};
use crate::metrics::{PerformanceMetrics, TRADING_DAYS};
use crate::optimization::{select_optimal, OptimizationObjective};
use crate::rating::RatingThresholds;
use crate::types::{BenchmarkComparison, MetricCategory, Trend};
use crate::var::{VarEstimate, VarMethodResult};

/// Every indicator in output order
pub fn default_registry() -> Vec<MetricSpec> {
    vec![
        MetricSpec {
            id: "var_parametric_95",
            name: "Parametric VaR (95%)",
            category: MetricCategory::MarketRisk,
            thresholds: VAR_95,
            compute: var_parametric_95,
        },
        MetricSpec {
            id: "var_historical_95",
            name: "Historical VaR (95%)",
            category: MetricCategory::MarketRisk,
            thresholds: VAR_95,
            compute: var_historical_95,
        },
        MetricSpec {
            id: "var_cornish_fisher_99",
            name: "Cornish-Fisher VaR (99%)",
            category: MetricCategory::MarketRisk,
            thresholds: RatingThresholds::higher_is_better(-0.02, -0.035, -0.05),
            compute: var_cornish_fisher_99,
        },
        MetricSpec {
            id: "var_filtered_historical_95",
            name: "GARCH-Filtered Historical VaR (95%)",
            category: MetricCategory::MarketRisk,
            thresholds: VAR_95,
            compute: var_filtered_historical_95,
        },
        MetricSpec {
            id: "var_monte_carlo_95",
            name: "Monte Carlo VaR (95%)",
            category: MetricCategory::MarketRisk,
            thresholds: VAR_95,
            compute: var_monte_carlo_95,
        },
        MetricSpec {
            id: "cvar_historical_95",
            name: "Expected Shortfall (95%)",
            category: MetricCategory::MarketRisk,
            thresholds: RatingThresholds::higher_is_better(-0.015, -0.03, -0.045),
            compute: cvar_historical_95,
        },
        MetricSpec {
            id: "var_backtest_kupiec",
            name: "VaR Backtest (Kupiec POF)",
            category: MetricCategory::Backtesting,
            thresholds: RatingThresholds::lower_is_better(0.5, 2.0, 3.84),
            compute: var_backtest_kupiec,
        },
        MetricSpec {
            id: "var_traffic_light",
            name: "Basel Traffic Light",
            category: MetricCategory::Backtesting,
            thresholds: RatingThresholds::lower_is_better(2.0, 4.0, 9.0),
            compute: var_traffic_light,
        },
        MetricSpec {
            id: "portfolio_delta",
            name: "Options Portfolio Delta",
            category: MetricCategory::Derivatives,
            thresholds: RatingThresholds::lower_is_better(0.1, 0.25, 0.5),
            compute: portfolio_delta,
        },
        MetricSpec {
            id: "optimal_portfolio_sharpe",
            name: "Optimal Portfolio Sharpe Ratio",
            category: MetricCategory::PortfolioConstruction,
            thresholds: RatingThresholds::higher_is_better(1.0, 0.5, 0.0),
            compute: optimal_portfolio_sharpe,
        },
        MetricSpec {
            id: "risk_parity_concentration",
            name: "Risk Concentration vs Parity",
            category: MetricCategory::PortfolioConstruction,
            thresholds: RatingThresholds::lower_is_better(1.1, 1.5, 2.0),
            compute: risk_parity_concentration,
        },
        MetricSpec {
            id: "capital_market_line_slope",
            name: "Capital Market Line Slope",
            category: MetricCategory::PortfolioConstruction,
            thresholds: RatingThresholds::higher_is_better(1.0, 0.6, 0.3),
            compute: capital_market_line_slope,
        },
        MetricSpec {
            id: "wacc",
            name: "Weighted Average Cost of Capital",
            category: MetricCategory::Valuation,
            thresholds: RatingThresholds::lower_is_better(0.07, 0.09, 0.12),
            compute: wacc,
        },
        MetricSpec {
            id: "economic_value_added",
            name: "Economic Value Added",
            category: MetricCategory::Valuation,
            thresholds: RatingThresholds::higher_is_better(0.05, 0.02, 0.0),
            compute: economic_value_added,
        },
        MetricSpec {
            id: "dcf_enterprise_value",
            name: "DCF Enterprise Value",
            category: MetricCategory::Valuation,
            thresholds: RatingThresholds::higher_is_better(2.0, 1.5, 1.0),
            compute: dcf_enterprise_value,
        },
        MetricSpec {
            id: "sharpe_ratio",
            name: "Sharpe Ratio",
            category: MetricCategory::Performance,
            thresholds: RatingThresholds::higher_is_better(1.5, 1.0, 0.5),
            compute: sharpe_ratio,
        },
        MetricSpec {
            id: "max_drawdown",
            name: "Maximum Drawdown",
            category: MetricCategory::Performance,
            thresholds: RatingThresholds::higher_is_better(-0.10, -0.20, -0.35),
            compute: max_drawdown,
        },
        MetricSpec {
            id: "stress_worst_case",
            name: "Worst Stress Scenario",
            category: MetricCategory::StressTesting,
            thresholds: RatingThresholds::higher_is_better(-0.05, -0.10, -0.20),
            compute: stress_worst_case,
        },
    ]
}

const VAR_95: RatingThresholds = RatingThresholds::higher_is_better(-0.01, -0.02, -0.03);

fn estimate_at(result: &VarMethodResult, confidence: f64) -> Result<VarEstimate> {
    result.at(confidence).copied().ok_or_else(|| {
        RiskError::numerical("var", format!("no estimate at {:.0}% confidence", confidence * 100.0))
    })
}

fn var_outcome(result: &VarMethodResult, confidence: f64, label: &str) -> Result<MetricOutcome> {
    let estimate = estimate_at(result, confidence)?;
    let mut outcome = MetricOutcome::new(
        estimate.var,
        format!(
            "{} VaR: {:.0}% confidence that the {}-day return will not fall below {:.2}% (expected shortfall {:.2}%)",
            label,
            confidence * 100.0,
            result.horizon_days,
            estimate.var * 100.0,
            estimate.cvar * 100.0
        ),
    );
    if result.low_confidence {
        outcome = outcome.recommend("Extend the return history; the estimate rests on few observations");
    }
    if estimate.var < -0.03 {
        outcome = outcome.recommend("Reduce gross exposure or add hedges to bring the loss quantile within limits");
    }
    Ok(outcome)
}

fn horizon(ctx: &AnalysisContext<'_>) -> u32 {
    ctx.config.var.horizon_days
}

fn var_parametric_95(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let result = ctx.var.parametric_normal(&returns, &[0.95], horizon(ctx))?;
    var_outcome(&result, 0.95, "Parametric normal")
}

fn var_historical_95(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let result = ctx.var.historical(&returns, &[0.95], horizon(ctx))?;
    var_outcome(&result, 0.95, "Historical")
}

fn var_cornish_fisher_99(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let result = ctx.var.cornish_fisher(&returns, &[0.99], horizon(ctx))?;
    var_outcome(&result, 0.99, "Cornish-Fisher")
}

fn var_filtered_historical_95(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let result = ctx.var.filtered_historical(&returns, &[0.95], horizon(ctx))?;
    var_outcome(&result, 0.95, "GARCH-filtered historical")
}

fn var_monte_carlo_95(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let inputs = ctx.simulation_inputs()?;
    let result = ctx.var.monte_carlo(&inputs, &[0.95], horizon(ctx))?;
    var_outcome(&result, 0.95, "Monte Carlo")
}

fn cvar_historical_95(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let result = ctx.var.historical(&returns, &[0.95], horizon(ctx))?;
    let estimate = estimate_at(&result, 0.95)?;

    let outcome = MetricOutcome::new(
        estimate.cvar,
        format!(
            "Average return on the worst 5% of days is {:.2}%, {:.2} points beyond the VaR",
            estimate.cvar * 100.0,
            (estimate.var - estimate.cvar) * 100.0
        ),
    );
    Ok(if estimate.cvar < 1.5 * estimate.var {
        outcome.recommend("Tail losses are heavy relative to VaR; consider tail hedges")
    } else {
        outcome
    })
}

fn var_backtest_kupiec(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let realized = &ctx.market.backtest_returns;
    if realized.is_empty() {
        return Err(RiskError::MissingData("realized returns for backtesting".into()));
    }
    let returns = ctx.portfolio_returns()?;
    let forecast = estimate_at(&ctx.var.parametric_normal(&returns, &[0.95], 1)?, 0.95)?;
    let report = ctx.backtester.run(realized, forecast.var, 0.95)?;

    let outcome = MetricOutcome::new(
        report.kupiec.statistic,
        format!(
            "{} violations in {} days ({:.1}% vs {:.1}% expected), p-value {:.3}",
            report.violations,
            report.observations,
            report.violation_rate * 100.0,
            report.expected_rate * 100.0,
            report.kupiec.p_value
        ),
    );
    Ok(if report.kupiec.reject {
        outcome.recommend("Recalibrate the VaR model; violation frequency is inconsistent with its confidence level")
    } else if report.christoffersen.reject {
        outcome.recommend("Violations cluster in time; use a volatility-responsive VaR model")
    } else {
        outcome
    })
}

fn var_traffic_light(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let realized = &ctx.market.backtest_returns;
    if realized.is_empty() {
        return Err(RiskError::MissingData("realized returns for backtesting".into()));
    }
    let returns = ctx.portfolio_returns()?;
    let forecast = estimate_at(&ctx.var.parametric_normal(&returns, &[0.99], 1)?, 0.99)?;
    let light = ctx.backtester.run(realized, forecast.var, 0.99)?.traffic_light;

    let outcome = MetricOutcome::new(
        light.scaled_violations as f64,
        format!(
            "{:?} zone with {} violations per 250 days; capital multiplier add-on {:.2}",
            light.zone, light.scaled_violations, light.capital_addon
        ),
    );
    Ok(if light.capital_addon > 0.0 {
        outcome.recommend("Review the 99% VaR model before the capital add-on applies")
    } else {
        outcome
    })
}

fn portfolio_delta(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let positions = &ctx.portfolio.option_positions;
    let greeks = ctx.greeks.calculate_portfolio_greeks(positions, ctx.market)?;

    // Dollar delta against the notional of the option book
    let mut dollar_delta = 0.0;
    for (underlying, g) in &greeks.by_underlying {
        let spot = ctx.market.underlying_prices.get(underlying).copied().unwrap_or(0.0);
        dollar_delta += g.delta * spot;
    }
    let notional: f64 = positions
        .iter()
        .map(|p| {
            let spot = ctx.market.underlying_prices.get(&p.underlying).copied().unwrap_or(0.0);
            (p.quantity * p.contract.contract_size * spot).abs()
        })
        .sum();
    let directionality = if notional > 0.0 {
        dollar_delta.abs() / notional
    } else {
        0.0
    };

    let mut outcome = MetricOutcome::new(
        greeks.total_delta,
        format!(
            "Net delta {:.2} (dollar delta {:.0}, {:.0}% of option notional), gamma {:.4}, vega {:.2}",
            greeks.total_delta,
            dollar_delta,
            directionality * 100.0,
            greeks.total_gamma,
            greeks.total_vega
        ),
    )
    .rated_on(directionality);

    for hedge in ctx.greeks.suggest_delta_hedges(&greeks) {
        let side = if hedge.quantity > 0.0 { "Buy" } else { "Sell" };
        outcome = outcome.recommend(format!(
            "{} {:.2} units of {} to neutralize delta",
            side,
            hedge.quantity.abs(),
            hedge.instrument
        ));
    }
    Ok(outcome)
}

fn objective_label(objective: OptimizationObjective) -> &'static str {
    match objective {
        OptimizationObjective::MeanVariance => "mean-variance",
        OptimizationObjective::MinimumVariance => "minimum-variance",
        OptimizationObjective::MaximumSharpe => "maximum-Sharpe",
        OptimizationObjective::RiskParity => "risk-parity",
        OptimizationObjective::BlackLitterman => "Black-Litterman",
    }
}

fn optimal_portfolio_sharpe(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let estimate = ctx.risk_estimate()?.annualized(TRADING_DAYS);
    let rf = ctx.market.risk_free_rate;
    let current_weights = ctx.portfolio.normalized_weights().ok();

    let results = ctx
        .optimizer
        .optimize_all(&estimate, current_weights.as_ref(), &ctx.portfolio.views, rf)?;
    let best = select_optimal(&results)
        .ok_or_else(|| RiskError::numerical("optimization", "no objective produced a finite Sharpe ratio"))?;

    let mut outcome = MetricOutcome::new(
        best.sharpe_ratio,
        format!(
            "The {} portfolio has the best Sharpe ratio: {:.2}% expected return at {:.2}% volatility",
            objective_label(best.objective),
            best.expected_return * 100.0,
            best.risk * 100.0
        ),
    );

    if let Some(weights) = &current_weights {
        let w = estimate.weight_vector(weights);
        let risk = ctx.analyzer.portfolio_volatility(&w, &estimate.covariance)?;
        if risk > 0.0 {
            let current_sharpe = (w.dot(&estimate.expected_returns) - rf) / risk;
            outcome = outcome.against(current_sharpe, true);
        }
    }

    let mut allocation: Vec<(&String, &f64)> = best.weights.iter().collect();
    allocation.sort_by(|a, b| b.1.total_cmp(a.1));
    for (asset, weight) in allocation.into_iter().take(3).filter(|(_, w)| **w > 0.01) {
        outcome = outcome.recommend(format!("Allocate {:.1}% to {}", weight * 100.0, asset));
    }
    Ok(outcome)
}

fn risk_parity_concentration(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let estimate = ctx.risk_estimate()?;
    let weights = estimate.weight_vector(&ctx.portfolio.normalized_weights()?);
    let contributions =
        ctx.analyzer
            .risk_contributions(&estimate.asset_ids, &weights, &estimate.covariance)?;

    let shares: Vec<f64> = contributions.iter().map(|c| c.risk_pct.max(0.0)).collect();
    let hhi = ctx.analyzer.concentration_hhi(&shares)?;
    let relative = hhi * contributions.len() as f64;

    let mut outcome = MetricOutcome::new(
        hhi,
        format!(
            "Risk HHI {:.3} across {} positions, {:.2}× the equal-risk level",
            hhi,
            contributions.len(),
            relative
        ),
    )
    .rated_on(relative);

    if let Some(top) = contributions.iter().max_by(|a, b| a.risk_pct.total_cmp(&b.risk_pct)) {
        if relative > 1.5 {
            let parity = ctx.optimizer.risk_parity(&estimate, 0.0)?;
            let target = parity.weights.get(&top.asset_id).copied().unwrap_or(0.0);
            outcome = outcome.recommend(format!(
                "{} contributes {:.1}% of risk; its risk-parity weight is {:.1}%",
                top.asset_id,
                top.risk_pct,
                target * 100.0
            ));
        }
    }
    Ok(outcome)
}

fn capital_market_line_slope(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let estimate = ctx.risk_estimate()?.annualized(TRADING_DAYS);
    let cml = ctx
        .optimizer
        .capital_market_line(&estimate, ctx.market.risk_free_rate)?;

    Ok(MetricOutcome::new(
        cml.slope,
        format!(
            "Each 1% of volatility earns {:.2}% excess return along the line through the tangency portfolio ({:.2}% return, {:.2}% risk)",
            cml.slope,
            cml.tangency_return * 100.0,
            cml.tangency_risk * 100.0
        ),
    ))
}

fn wacc(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let latest = ctx.latest_statement()?;
    let breakdown = ctx.valuation.wacc(latest, ctx.market)?;

    let history: Vec<f64> = ctx
        .statements
        .iter()
        .filter_map(|s| ctx.valuation.wacc(s, ctx.market).ok().map(|b| b.wacc))
        .collect();

    let mut outcome = MetricOutcome::new(
        breakdown.wacc,
        format!(
            "Cost of equity {:.2}% at {:.0}% weight, after-tax cost of debt {:.2}% at {:.0}% weight",
            breakdown.cost_of_equity * 100.0,
            breakdown.equity_weight * 100.0,
            breakdown.cost_of_debt * 100.0,
            breakdown.debt_weight * 100.0
        ),
    )
    .with_trend(Trend::from_series(&history));

    if let Some(industry) = ctx.benchmark.and_then(|b| b.industry_wacc) {
        outcome = outcome.against(industry, false);
        if breakdown.wacc > industry {
            outcome = outcome.recommend("Cost of capital exceeds the industry; review leverage and funding mix");
        }
    }
    Ok(outcome)
}

fn economic_value_added(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let latest = ctx.latest_statement()?;
    let rate = ctx.valuation.wacc(latest, ctx.market)?.wacc;
    let config = ctx.valuation.config();

    let (current, trend, projected_pv) = if ctx.statements.len() >= 2 {
        let multi = ctx.valuation.multi_period_eva(
            ctx.statements,
            rate,
            config.eva_growth,
            config.forecast_years,
        )?;
        let series: Vec<f64> = multi.historical.iter().map(|p| p.breakdown.eva).collect();
        let current = *multi
            .latest()
            .ok_or_else(|| RiskError::numerical("eva", "empty EVA history"))?;
        (current, Trend::from_series(&series), Some(multi.present_value_of_projected))
    } else {
        (ctx.valuation.eva(ctx.statements, rate)?, None, None)
    };

    let mut interpretation = format!(
        "NOPAT {:.0} against a capital charge of {:.0}: ROIC {:.2}% vs WACC {:.2}%",
        current.nopat,
        current.capital_charge,
        current.roic * 100.0,
        current.wacc * 100.0
    );
    if let Some(pv) = projected_pv {
        interpretation.push_str(&format!("; projected EVA worth {:.0} today", pv));
    }

    let mut outcome = MetricOutcome::new(current.eva, interpretation)
        .rated_on(current.spread)
        .with_trend(trend);

    if let Some(industry) = ctx.benchmark.and_then(|b| b.industry_roic) {
        let difference = current.roic - industry;
        outcome.benchmark = Some(BenchmarkComparison {
            benchmark_value: industry,
            difference,
            outperforms: difference > 0.0,
        });
    }
    if current.eva < 0.0 {
        outcome = outcome.recommend("Returns do not cover the cost of capital; improve margins or release capital");
    }
    Ok(outcome)
}

fn dcf_enterprise_value(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let latest = ctx.latest_statement()?;
    let rate = ctx.valuation.wacc(latest, ctx.market)?.wacc;
    let config = ctx.valuation.config();

    let first = &ctx.statements[0];
    let periods = ctx.statements.len() - 1;
    let growth = if periods > 0 && first.revenue > 0.0 && latest.revenue > 0.0 {
        ((latest.revenue / first.revenue).powf(1.0 / periods as f64) - 1.0).clamp(-0.05, 0.15)
    } else {
        config.eva_growth
    };

    let base_fcf = latest.free_cash_flow();
    let valuation = ctx.valuation.dcf_projection(
        base_fcf,
        growth,
        config.forecast_years,
        rate,
        config.terminal_growth,
    )?;
    let sensitivity =
        ctx.valuation
            .dcf_sensitivity(base_fcf, growth, config.forecast_years, rate, config.terminal_growth)?;

    let book_capital = latest.total_debt + latest.total_equity;
    if book_capital <= 0.0 {
        return Err(RiskError::MissingData("book capital for DCF comparison".into()));
    }
    let multiple = valuation.enterprise_value / book_capital;

    let mut interpretation = format!(
        "Enterprise value {:.0} ({:.2}× book capital) from {:.1}% FCF growth discounted at {:.2}%; terminal value is {:.0}% of the total",
        valuation.enterprise_value,
        multiple,
        growth * 100.0,
        rate * 100.0,
        valuation.terminal_share() * 100.0
    );
    if let Some((low, high)) = sensitivity.range() {
        interpretation.push_str(&format!("; sensitivity range {:.0} to {:.0}", low, high));
    }

    let outcome = MetricOutcome::new(valuation.enterprise_value, interpretation).rated_on(multiple);
    Ok(if valuation.terminal_share() > 0.75 {
        outcome.recommend("Most of the value sits in the terminal period; stress the long-run growth assumption")
    } else {
        outcome
    })
}

fn sharpe_ratio(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let rf = ctx.market.risk_free_rate;
    let metrics = PerformanceMetrics::new(&returns, rf);
    let sharpe = metrics.sharpe_ratio()?;

    let mut outcome = MetricOutcome::new(
        sharpe,
        format!(
            "Annualized Sharpe ratio {:.2} on {:.2}% return and {:.2}% volatility",
            sharpe,
            metrics.annualized_return() * 100.0,
            metrics.annualized_volatility()? * 100.0
        ),
    );
    if let Some(benchmark) = ctx.benchmark.filter(|b| !b.benchmark_returns.is_empty()) {
        if let Ok(benchmark_sharpe) = PerformanceMetrics::new(&benchmark.benchmark_returns, rf).sharpe_ratio() {
            outcome = outcome.against(benchmark_sharpe, true);
        }
    }
    if sharpe < 0.5 {
        outcome = outcome.recommend("Risk-adjusted return is low; revisit allocation toward higher-Sharpe assets");
    }
    Ok(outcome)
}

fn max_drawdown(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let returns = ctx.portfolio_returns()?;
    let metrics = PerformanceMetrics::new(&returns, ctx.market.risk_free_rate);
    let drawdown = metrics.max_drawdown()?;

    let outcome = MetricOutcome::new(
        drawdown,
        format!("Largest peak-to-trough decline was {:.2}%", drawdown * 100.0),
    );
    Ok(if drawdown < -0.20 {
        outcome.recommend("Drawdowns are deep; add stop-loss rules or diversifying assets")
    } else {
        outcome
    })
}

fn stress_worst_case(ctx: &AnalysisContext<'_>) -> Result<MetricOutcome> {
    let report = ctx.stress.run_report(ctx.portfolio, ctx.market)?;
    let worst = report
        .worst()
        .ok_or_else(|| RiskError::numerical("stress", "worst scenario missing from report"))?;

    let mut outcome = MetricOutcome::new(
        report.max_loss,
        format!(
            "{} is the most severe scenario at {:.2}% of portfolio value; average across scenarios {:.2}%",
            report.worst_scenario,
            report.max_loss * 100.0,
            report.average_impact * 100.0
        ),
    );
    if let Some(position) = &worst.worst_position {
        outcome = outcome.recommend(format!(
            "Hedge {} which loses {:.2}% of portfolio value in this scenario",
            position,
            worst.worst_position_impact.abs() * 100.0
        ));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_ids_are_unique() {
        let registry = default_registry();
        let ids: HashSet<&str> = registry.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), registry.len());
        assert_eq!(registry.len(), 18);
    }

    #[test]
    fn test_registry_thresholds_are_ordered() {
        for spec in default_registry() {
            assert!(spec.thresholds.validate().is_ok(), "{}", spec.id);
        }
    }
}

//! Economic valuation: cost of capital, NOPAT, invested capital, EVA and DCF
//!
//! Accounting adjustments follow the usual EVA conventions:
//! - R&D is capitalized and amortized straight-line
//! - Operating leases are capitalized at the present value of their payments
//! - Unusual items are stripped out of operating profit
//! - Goodwill is removed net of impairment and past amortization is added back

use crate::error::{Result, RiskError};
use crate::types::{FinancialStatement, MarketData};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationConfig {
    /// Used when pretax income is not positive
    #[serde(default = "default_tax_rate")]
    pub default_tax_rate: f64,

    /// Share of R&D expense treated as investment
    #[serde(default = "default_rd_capitalization_rate")]
    pub rd_capitalization_rate: f64,

    #[serde(default = "default_rd_amortization_years")]
    pub rd_amortization_years: usize,

    /// Share of the annual lease payment added back to operating profit
    #[serde(default = "default_lease_capitalization_rate")]
    pub lease_capitalization_rate: f64,

    #[serde(default = "default_lease_discount_rate")]
    pub lease_discount_rate: f64,

    #[serde(default = "default_lease_term_years")]
    pub lease_term_years: u32,

    /// Book equity multiple standing in for market value when no quote exists
    #[serde(default = "default_equity_book_multiple")]
    pub equity_book_multiple: f64,

    #[serde(default = "default_terminal_growth")]
    pub terminal_growth: f64,

    #[serde(default = "default_forecast_years")]
    pub forecast_years: u32,

    /// NOPAT growth used to project EVA
    #[serde(default = "default_eva_growth")]
    pub eva_growth: f64,

    /// Capital grows this much slower than NOPAT in the EVA projection
    #[serde(default = "default_capital_efficiency_gain")]
    pub capital_efficiency_gain: f64,

    #[serde(default = "default_sensitivity_deltas")]
    pub wacc_sensitivity_deltas: Vec<f64>,

    #[serde(default = "default_sensitivity_deltas")]
    pub growth_sensitivity_deltas: Vec<f64>,
}

fn default_tax_rate() -> f64 {
    0.25
}

fn default_rd_capitalization_rate() -> f64 {
    0.8
}

fn default_rd_amortization_years() -> usize {
    5
}

fn default_lease_capitalization_rate() -> f64 {
    0.7
}

fn default_lease_discount_rate() -> f64 {
    0.05
}

fn default_lease_term_years() -> u32 {
    5
}

fn default_equity_book_multiple() -> f64 {
    1.5
}

fn default_terminal_growth() -> f64 {
    0.02
}

fn default_forecast_years() -> u32 {
    5
}

fn default_eva_growth() -> f64 {
    0.05
}

fn default_capital_efficiency_gain() -> f64 {
    0.02
}

fn default_sensitivity_deltas() -> Vec<f64> {
    vec![-0.01, 0.0, 0.01]
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            default_tax_rate: default_tax_rate(),
            rd_capitalization_rate: default_rd_capitalization_rate(),
            rd_amortization_years: default_rd_amortization_years(),
            lease_capitalization_rate: default_lease_capitalization_rate(),
            lease_discount_rate: default_lease_discount_rate(),
            lease_term_years: default_lease_term_years(),
            equity_book_multiple: default_equity_book_multiple(),
            terminal_growth: default_terminal_growth(),
            forecast_years: default_forecast_years(),
            eva_growth: default_eva_growth(),
            capital_efficiency_gain: default_capital_efficiency_gain(),
            wacc_sensitivity_deltas: default_sensitivity_deltas(),
            growth_sensitivity_deltas: default_sensitivity_deltas(),
        }
    }
}

impl ValuationConfig {
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(RiskError::Config(format!("{} must be in [0, 1], got {}", name, v)))
            }
        };
        unit("default_tax_rate", self.default_tax_rate)?;
        unit("rd_capitalization_rate", self.rd_capitalization_rate)?;
        unit("lease_capitalization_rate", self.lease_capitalization_rate)?;

        if self.rd_amortization_years == 0 || self.lease_term_years == 0 || self.forecast_years == 0 {
            return Err(RiskError::Config(
                "amortization, lease and forecast periods must be positive".into(),
            ));
        }
        if self.lease_discount_rate <= -1.0 || self.equity_book_multiple <= 0.0 {
            return Err(RiskError::Config(
                "lease discount rate must exceed -100% and equity multiple must be positive".into(),
            ));
        }
        if self.wacc_sensitivity_deltas.is_empty() || self.growth_sensitivity_deltas.is_empty() {
            return Err(RiskError::Config("sensitivity deltas cannot be empty".into()));
        }
        Ok(())
    }
}

/// CAPM: rf + β·premium
pub fn capm_cost_of_equity(risk_free_rate: f64, beta: f64, market_risk_premium: f64) -> f64 {
    risk_free_rate + beta * market_risk_premium
}

/// Interest over debt, net of the tax shield
pub fn after_tax_cost_of_debt(interest_expense: f64, total_debt: f64, tax_rate: f64) -> Result<f64> {
    if total_debt <= 0.0 {
        return Err(RiskError::MissingData(
            "cost of debt needs outstanding debt".into(),
        ));
    }
    Ok(interest_expense.abs() / total_debt * (1.0 - tax_rate))
}

/// Market-value weighted cost of capital
pub fn weighted_cost_of_capital(
    equity_value: f64,
    debt_value: f64,
    cost_of_equity: f64,
    after_tax_cost_of_debt: f64,
) -> Result<f64> {
    let total = equity_value + debt_value;
    if equity_value < 0.0 || debt_value < 0.0 || total <= 0.0 {
        return Err(RiskError::numerical(
            "wacc",
            format!("capital structure E={} D={} is not positive", equity_value, debt_value),
        ));
    }
    Ok(equity_value / total * cost_of_equity + debt_value / total * after_tax_cost_of_debt)
}

/// NOPAT less the charge for capital employed
pub fn economic_value_added(nopat: f64, invested_capital: f64, wacc: f64) -> Result<EvaBreakdown> {
    if invested_capital <= 0.0 {
        return Err(RiskError::numerical(
            "eva",
            format!("invested capital {} is not positive", invested_capital),
        ));
    }
    let capital_charge = wacc * invested_capital;
    let roic = nopat / invested_capital;
    Ok(EvaBreakdown {
        nopat,
        invested_capital,
        wacc,
        capital_charge,
        eva: nopat - capital_charge,
        roic,
        spread: roic - wacc,
    })
}

/// Present value of explicit cash flows plus a Gordon-growth terminal value
pub fn present_value_dcf(cash_flows: &[f64], wacc: f64, terminal_growth: f64) -> Result<DcfValuation> {
    if cash_flows.is_empty() {
        return Err(RiskError::InsufficientData(
            "DCF needs at least one cash flow".into(),
        ));
    }
    if wacc <= terminal_growth {
        return Err(RiskError::numerical(
            "dcf",
            format!(
                "discount rate {:.4} must exceed terminal growth {:.4}",
                wacc, terminal_growth
            ),
        ));
    }
    if wacc <= -1.0 {
        return Err(RiskError::numerical("dcf", "discount rate at or below -100%"));
    }

    let discount = |t: usize| (1.0 + wacc).powi(t as i32);
    let pv_explicit: f64 = cash_flows
        .iter()
        .enumerate()
        .map(|(i, cf)| cf / discount(i + 1))
        .sum();

    let n = cash_flows.len();
    let terminal_value = cash_flows[n - 1] * (1.0 + terminal_growth) / (wacc - terminal_growth);
    let pv_terminal = terminal_value / discount(n);

    Ok(DcfValuation {
        cash_flows: cash_flows.to_vec(),
        wacc,
        terminal_growth,
        pv_explicit,
        terminal_value,
        pv_terminal,
        enterprise_value: pv_explicit + pv_terminal,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaccBreakdown {
    pub cost_of_equity: f64,
    /// After tax; zero when the company carries no debt
    pub cost_of_debt: f64,
    pub equity_value: f64,
    pub debt_value: f64,
    pub equity_weight: f64,
    pub debt_weight: f64,
    pub tax_rate: f64,
    pub wacc: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NopatAdjustments {
    pub operating_income: f64,
    pub capitalized_rd: f64,
    pub operating_leases: f64,
    /// Subtracted from operating income
    pub unusual_items: f64,
    pub tax_rate: f64,
}

impl NopatAdjustments {
    pub fn adjusted_operating_income(&self) -> f64 {
        self.operating_income + self.capitalized_rd + self.operating_leases - self.unusual_items
    }

    pub fn nopat(&self) -> f64 {
        self.adjusted_operating_income() * (1.0 - self.tax_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvestedCapitalAdjustments {
    /// Debt plus equity less cash
    pub base_capital: f64,
    pub capitalized_rd: f64,
    pub capitalized_leases: f64,
    /// Goodwill net of impairment, taken out of the base
    pub goodwill_removed: f64,
    pub accumulated_amortization: f64,
}

impl InvestedCapitalAdjustments {
    pub fn invested_capital(&self) -> f64 {
        self.base_capital + self.capitalized_rd + self.capitalized_leases - self.goodwill_removed
            + self.accumulated_amortization
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaBreakdown {
    pub nopat: f64,
    pub invested_capital: f64,
    pub wacc: f64,
    pub capital_charge: f64,
    pub eva: f64,
    pub roic: f64,
    /// ROIC − WACC
    pub spread: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaPeriod {
    /// Reporting date for historical periods, `None` for projections
    pub period: Option<NaiveDate>,
    pub breakdown: EvaBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPeriodEva {
    pub historical: Vec<EvaPeriod>,
    pub projected: Vec<EvaPeriod>,
    /// Projected EVA discounted at WACC
    pub present_value_of_projected: f64,
}

impl MultiPeriodEva {
    pub fn latest(&self) -> Option<&EvaBreakdown> {
        self.historical.last().map(|p| &p.breakdown)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcfValuation {
    pub cash_flows: Vec<f64>,
    pub wacc: f64,
    pub terminal_growth: f64,
    pub pv_explicit: f64,
    pub terminal_value: f64,
    pub pv_terminal: f64,
    pub enterprise_value: f64,
}

impl DcfValuation {
    pub fn equity_value(&self, net_debt: f64) -> f64 {
        self.enterprise_value - net_debt
    }

    /// Share of enterprise value coming from the terminal value
    pub fn terminal_share(&self) -> f64 {
        if self.enterprise_value == 0.0 {
            0.0
        } else {
            self.pv_terminal / self.enterprise_value
        }
    }
}

/// Enterprise value over a grid of WACC and growth shifts
///
/// `values[i][j]` corresponds to `wacc_values[i]` and `growth_values[j]`;
/// cells where the discount rate does not exceed terminal growth are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityGrid {
    pub wacc_values: Vec<f64>,
    pub growth_values: Vec<f64>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl SensitivityGrid {
    pub fn range(&self) -> Option<(f64, f64)> {
        let mut cells = self.values.iter().flatten().flatten().copied();
        let first = cells.next()?;
        Some(cells.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }
}

/// Valuation engine
#[derive(Debug, Clone, Default)]
pub struct ValuationEngine {
    config: ValuationConfig,
}

impl ValuationEngine {
    pub fn new(config: ValuationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValuationConfig {
        &self.config
    }

    pub fn cost_of_equity(&self, market: &MarketData) -> f64 {
        capm_cost_of_equity(market.risk_free_rate, market.beta, market.market_risk_premium)
    }

    pub fn cost_of_debt(&self, statement: &FinancialStatement) -> Result<f64> {
        after_tax_cost_of_debt(
            statement.interest_expense,
            statement.total_debt,
            self.cash_tax_rate(statement),
        )
    }

    /// Cash taxes over pretax income, falling back to book tax expense when
    /// no cash taxes are reported
    pub fn cash_tax_rate(&self, statement: &FinancialStatement) -> f64 {
        if statement.income_before_tax <= 0.0 {
            return self.config.default_tax_rate;
        }
        let taxes = if statement.cash_taxes_paid != 0.0 {
            statement.cash_taxes_paid
        } else {
            statement.tax_expense
        };
        (taxes / statement.income_before_tax).clamp(0.0, 1.0)
    }

    /// WACC for the most recent statement; a debt-free company is discounted
    /// at its cost of equity
    pub fn wacc(&self, statement: &FinancialStatement, market: &MarketData) -> Result<WaccBreakdown> {
        let cost_of_equity = self.cost_of_equity(market);
        let tax_rate = self.cash_tax_rate(statement);
        let equity_value = match market.market_cap {
            Some(cap) if cap > 0.0 => cap,
            _ => statement.total_equity * self.config.equity_book_multiple,
        };
        let debt_value = statement.total_debt.max(0.0);

        if equity_value <= 0.0 && debt_value <= 0.0 {
            return Err(RiskError::MissingData(
                "neither equity value nor debt is available".into(),
            ));
        }

        let cost_of_debt = if debt_value > 0.0 {
            self.cost_of_debt(statement)?
        } else {
            0.0
        };
        let equity_value = equity_value.max(0.0);
        let wacc = weighted_cost_of_capital(equity_value, debt_value, cost_of_equity, cost_of_debt)?;
        let total = equity_value + debt_value;

        debug!(
            cost_of_equity,
            cost_of_debt, tax_rate, wacc, "Cost of capital computed"
        );

        Ok(WaccBreakdown {
            cost_of_equity,
            cost_of_debt,
            equity_value,
            debt_value,
            equity_weight: equity_value / total,
            debt_weight: debt_value / total,
            tax_rate,
            wacc,
        })
    }

    pub fn nopat_adjustments(&self, statement: &FinancialStatement) -> NopatAdjustments {
        NopatAdjustments {
            operating_income: statement.operating_income,
            capitalized_rd: statement.research_development.max(0.0) * self.config.rd_capitalization_rate,
            operating_leases: statement.operating_lease_payments.max(0.0)
                * self.config.lease_capitalization_rate,
            unusual_items: statement.unusual_items,
            tax_rate: self.cash_tax_rate(statement),
        }
    }

    pub fn nopat(&self, statement: &FinancialStatement) -> f64 {
        self.nopat_adjustments(statement).nopat()
    }

    /// Adjustments for the last statement of `history`, using the earlier
    /// periods to build the unamortized R&D asset
    pub fn invested_capital_adjustments(
        &self,
        history: &[FinancialStatement],
    ) -> Result<InvestedCapitalAdjustments> {
        let current = history.last().ok_or(RiskError::EmptyStatementHistory)?;

        let life = self.config.rd_amortization_years;
        let capitalized_rd: f64 = history
            .iter()
            .rev()
            .take(life)
            .enumerate()
            .map(|(age, s)| {
                let remaining = 1.0 - age as f64 / life as f64;
                s.research_development.max(0.0) * self.config.rd_capitalization_rate * remaining
            })
            .sum();

        let r = self.config.lease_discount_rate;
        let term = self.config.lease_term_years as i32;
        let annuity_factor = if r == 0.0 {
            term as f64
        } else {
            (1.0 - (1.0 + r).powi(-term)) / r
        };
        let capitalized_leases = current.operating_lease_payments.max(0.0) * annuity_factor;

        Ok(InvestedCapitalAdjustments {
            base_capital: current.total_debt + current.total_equity - current.cash,
            capitalized_rd,
            capitalized_leases,
            goodwill_removed: (current.goodwill - current.goodwill_impairment).max(0.0),
            accumulated_amortization: current.accumulated_amortization.max(0.0),
        })
    }

    pub fn invested_capital(&self, history: &[FinancialStatement]) -> Result<f64> {
        Ok(self.invested_capital_adjustments(history)?.invested_capital())
    }

    /// EVA of the latest period in `history`
    pub fn eva(&self, history: &[FinancialStatement], wacc: f64) -> Result<EvaBreakdown> {
        let current = history.last().ok_or(RiskError::EmptyStatementHistory)?;
        economic_value_added(self.nopat(current), self.invested_capital(history)?, wacc)
    }

    /// Historical EVA for every period plus a constant-growth projection
    pub fn multi_period_eva(
        &self,
        history: &[FinancialStatement],
        wacc: f64,
        growth: f64,
        years: u32,
    ) -> Result<MultiPeriodEva> {
        if history.len() < 2 {
            return Err(RiskError::InsufficientData(format!(
                "multi-period EVA needs at least 2 statements, got {}",
                history.len()
            )));
        }

        let historical = (1..=history.len())
            .map(|end| {
                let window = &history[..end];
                Ok(EvaPeriod {
                    period: Some(window[end - 1].period),
                    breakdown: self.eva(window, wacc)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let base = historical[historical.len() - 1].breakdown;
        let capital_growth = growth - self.config.capital_efficiency_gain;
        let mut projected = Vec::with_capacity(years as usize);
        let mut present_value = 0.0;
        for t in 1..=years as i32 {
            let nopat = base.nopat * (1.0 + growth).powi(t);
            let capital = base.invested_capital * (1.0 + capital_growth).powi(t);
            let breakdown = economic_value_added(nopat, capital, wacc)?;
            present_value += breakdown.eva / (1.0 + wacc).powi(t);
            projected.push(EvaPeriod {
                period: None,
                breakdown,
            });
        }

        Ok(MultiPeriodEva {
            historical,
            projected,
            present_value_of_projected: present_value,
        })
    }

    /// DCF over the free cash flows of each statement in `history`
    pub fn dcf(&self, history: &[FinancialStatement], wacc: f64) -> Result<DcfValuation> {
        if history.is_empty() {
            return Err(RiskError::EmptyStatementHistory);
        }
        let flows: Vec<f64> = history.iter().map(|s| s.free_cash_flow()).collect();
        present_value_dcf(&flows, wacc, self.config.terminal_growth)
    }

    /// Grow `base_fcf` for `years` periods and discount
    pub fn dcf_projection(
        &self,
        base_fcf: f64,
        growth: f64,
        years: u32,
        wacc: f64,
        terminal_growth: f64,
    ) -> Result<DcfValuation> {
        if years == 0 {
            return Err(RiskError::InvalidParameter(
                "projection needs at least one year".into(),
            ));
        }
        let flows: Vec<f64> = (1..=years as i32)
            .map(|t| base_fcf * (1.0 + growth).powi(t))
            .collect();
        present_value_dcf(&flows, wacc, terminal_growth)
    }

    /// Enterprise value under shifted WACC and terminal growth
    pub fn dcf_sensitivity(
        &self,
        base_fcf: f64,
        growth: f64,
        years: u32,
        wacc: f64,
        terminal_growth: f64,
    ) -> Result<SensitivityGrid> {
        let wacc_values: Vec<f64> = self
            .config
            .wacc_sensitivity_deltas
            .iter()
            .map(|d| wacc + d)
            .collect();
        let growth_values: Vec<f64> = self
            .config
            .growth_sensitivity_deltas
            .iter()
            .map(|d| terminal_growth + d)
            .collect();

        let mut values = Vec::with_capacity(wacc_values.len());
        for &w in &wacc_values {
            let mut row = Vec::with_capacity(growth_values.len());
            for &g in &growth_values {
                let cell = match self.dcf_projection(base_fcf, growth, years, w, g) {
                    Ok(valuation) => Some(valuation.enterprise_value),
                    Err(RiskError::NumericalInvalid { .. }) => None,
                    Err(e) => return Err(e),
                };
                row.push(cell);
            }
            values.push(row);
        }

        Ok(SensitivityGrid {
            wacc_values,
            growth_values,
            values,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn statement(year: i32, revenue: f64) -> FinancialStatement {
        FinancialStatement {
            period: NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
            revenue,
            operating_income: revenue * 0.15,
            net_income: revenue * 0.09,
            income_before_tax: revenue * 0.12,
            interest_expense: 20.0,
            tax_expense: revenue * 0.03,
            cash_taxes_paid: revenue * 0.03,
            research_development: revenue * 0.05,
            unusual_items: 0.0,
            depreciation_amortization: revenue * 0.04,
            operating_cash_flow: revenue * 0.14,
            capital_expenditures: revenue * 0.05,
            total_assets: revenue * 1.6,
            total_debt: 400.0,
            cash: 100.0,
            total_equity: revenue * 0.8,
            goodwill: 50.0,
            goodwill_impairment: 0.0,
            accumulated_amortization: 0.0,
            operating_lease_payments: 10.0,
            shares_outstanding: 100.0,
        }
    }

    pub(crate) fn history() -> Vec<FinancialStatement> {
        vec![
            statement(2021, 1000.0),
            statement(2022, 1100.0),
            statement(2023, 1210.0),
        ]
    }

    fn market() -> MarketData {
        MarketData {
            risk_free_rate: 0.04,
            market_risk_premium: 0.06,
            beta: 1.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_capm_and_cost_of_debt() {
        assert_relative_eq!(capm_cost_of_equity(0.04, 1.2, 0.06), 0.112, epsilon = 1e-12);
        assert_relative_eq!(after_tax_cost_of_debt(20.0, 400.0, 0.25).unwrap(), 0.0375);
        assert!(matches!(
            after_tax_cost_of_debt(20.0, 0.0, 0.25),
            Err(RiskError::MissingData(_))
        ));
    }

    #[test]
    fn test_wacc_uses_book_equity_proxy() {
        let engine = ValuationEngine::default();
        let s = statement(2023, 1000.0);
        let wacc = engine.wacc(&s, &market()).unwrap();

        // E = 800 × 1.5 = 1200, D = 400, tax = 30/120 = 0.25
        assert_relative_eq!(wacc.equity_value, 1200.0);
        assert_relative_eq!(wacc.tax_rate, 0.25);
        let expected = 0.75 * 0.112 + 0.25 * 0.0375;
        assert_relative_eq!(wacc.wacc, expected, epsilon = 1e-12);
        assert_relative_eq!(wacc.equity_weight + wacc.debt_weight, 1.0);
    }

    #[test]
    fn test_wacc_without_debt_is_cost_of_equity() {
        let engine = ValuationEngine::default();
        let mut s = statement(2023, 1000.0);
        s.total_debt = 0.0;
        let wacc = engine.wacc(&s, &market()).unwrap();
        assert_relative_eq!(wacc.wacc, wacc.cost_of_equity);
        assert_eq!(wacc.cost_of_debt, 0.0);
    }

    #[test]
    fn test_cash_tax_rate_default_on_losses() {
        let engine = ValuationEngine::default();
        let mut s = statement(2023, 1000.0);
        s.income_before_tax = -10.0;
        assert_relative_eq!(engine.cash_tax_rate(&s), 0.25);
    }

    #[test]
    fn test_nopat_adjustments() {
        let engine = ValuationEngine::default();
        let mut s = statement(2023, 1000.0);
        s.unusual_items = 10.0;
        let adj = engine.nopat_adjustments(&s);

        assert_relative_eq!(adj.capitalized_rd, 40.0);
        assert_relative_eq!(adj.operating_leases, 7.0);
        // (150 + 40 + 7 − 10) × 0.75
        assert_relative_eq!(adj.nopat(), 140.25, epsilon = 1e-10);
    }

    #[test]
    fn test_invested_capital_amortizes_rd_history() {
        let engine = ValuationEngine::default();
        let adj = engine.invested_capital_adjustments(&history()).unwrap();

        // R&D 60.5, 55, 50 at ages 0, 1, 2 with 80% capitalization
        let expected_rd = 0.8 * (60.5 + 55.0 * 0.8 + 50.0 * 0.6);
        assert_relative_eq!(adj.capitalized_rd, expected_rd, epsilon = 1e-10);

        let annuity = (1.0 - 1.05_f64.powi(-5)) / 0.05;
        assert_relative_eq!(adj.capitalized_leases, 10.0 * annuity, epsilon = 1e-10);
        assert_relative_eq!(adj.goodwill_removed, 50.0);
        assert_relative_eq!(adj.base_capital, 400.0 + 968.0 - 100.0, epsilon = 1e-10);
    }

    #[test]
    fn test_eva_sign_follows_spread() {
        let engine = ValuationEngine::default();
        let history = history();
        let base = engine.eva(&history, 0.0).unwrap();

        for step in 0..40 {
            let wacc = step as f64 * 0.01;
            let eva = engine.eva(&history, wacc).unwrap();
            assert_eq!(eva.eva > 0.0, eva.roic > wacc, "wacc = {}", wacc);
            assert_relative_eq!(eva.roic, base.roic);
        }
    }

    #[test]
    fn test_multi_period_eva() {
        let engine = ValuationEngine::default();
        let result = engine.multi_period_eva(&history(), 0.09, 0.05, 5).unwrap();
        assert_eq!(result.historical.len(), 3);
        assert_eq!(result.projected.len(), 5);
        assert!(result.projected.iter().all(|p| p.period.is_none()));

        let last = result.latest().unwrap();
        let first_projection = &result.projected[0].breakdown;
        assert_relative_eq!(first_projection.nopat, last.nopat * 1.05, epsilon = 1e-9);
        assert_relative_eq!(
            first_projection.invested_capital,
            last.invested_capital * 1.03,
            epsilon = 1e-9
        );

        assert!(matches!(
            engine.multi_period_eva(&history()[..1], 0.09, 0.05, 5),
            Err(RiskError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_dcf_closed_form() {
        let valuation = present_value_dcf(&[100.0, 110.0], 0.10, 0.02).unwrap();
        let explicit = 100.0 / 1.1 + 110.0 / 1.21;
        let terminal = 110.0 * 1.02 / 0.08;
        assert_relative_eq!(valuation.pv_explicit, explicit, epsilon = 1e-10);
        assert_relative_eq!(valuation.terminal_value, terminal, epsilon = 1e-10);
        assert_relative_eq!(valuation.enterprise_value, explicit + terminal / 1.21, epsilon = 1e-9);
        assert!(valuation.terminal_share() > 0.5);
    }

    #[test]
    fn test_dcf_rejects_wacc_below_growth() {
        assert!(matches!(
            present_value_dcf(&[100.0], 0.02, 0.02),
            Err(RiskError::NumericalInvalid { .. })
        ));
        assert!(present_value_dcf(&[], 0.1, 0.02).is_err());
    }

    #[test]
    fn test_dcf_sensitivity_grid() {
        let engine = ValuationEngine::default();
        let grid = engine.dcf_sensitivity(100.0, 0.05, 5, 0.03, 0.02).unwrap();
        assert_eq!(grid.values.len(), 3);
        assert_eq!(grid.values[0].len(), 3);

        // WACC 2% against growth 2% and 3% is undefined
        assert!(grid.values[0][1].is_none());
        assert!(grid.values[0][2].is_none());
        assert!(grid.values[2][0].is_some());

        // Higher discount rate, lower value
        let low = grid.values[1][0].unwrap();
        let high = grid.values[2][0].unwrap();
        assert!(high < low);
        assert!(grid.range().is_some());
    }
}

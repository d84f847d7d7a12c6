//! Options Greeks calculation engine
//!
//! Black-Scholes pricing and sensitivities for European options:
//! - Delta (∂V/∂S): Sensitivity to underlying price
//! - Gamma (∂²V/∂S²): Rate of change of Delta
//! - Vega (∂V/∂σ): Sensitivity to volatility
//! - Theta (∂V/∂t): Time decay
//! - Rho (∂V/∂r): Sensitivity to interest rate
//!
//! All Greeks are in raw units: per 1.0 change of the input, theta per year.

use crate::error::{Result, RiskError};
use crate::stats::{normal_cdf, normal_pdf};
use crate::types::MarketData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

/// European option contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub option_type: OptionType,

    pub strike: f64,

    /// Time to expiration in years
    pub time_to_expiry: f64,

    /// Contract size/multiplier
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
}

fn default_contract_size() -> f64 {
    1.0
}

/// Position in an option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionPosition {
    pub contract: OptionContract,

    /// Position size (positive = long, negative = short)
    pub quantity: f64,

    /// Underlying asset identifier
    pub underlying: String,
}

/// Price and sensitivities of a single option
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    pub price: f64,
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    /// Per year
    pub theta: f64,
    pub rho: f64,
}

impl Greeks {
    pub fn per_day_theta(&self, days_per_year: f64) -> f64 {
        self.theta / days_per_year
    }

    /// Vega per one volatility point
    pub fn per_percent_vega(&self) -> f64 {
        self.vega / 100.0
    }

    fn scaled(&self, factor: f64) -> Greeks {
        Greeks {
            price: self.price * factor,
            delta: self.delta * factor,
            gamma: self.gamma * factor,
            vega: self.vega * factor,
            theta: self.theta * factor,
            rho: self.rho * factor,
        }
    }

    fn accumulate(&mut self, other: &Greeks) {
        self.price += other.price;
        self.delta += other.delta;
        self.gamma += other.gamma;
        self.vega += other.vega;
        self.theta += other.theta;
        self.rho += other.rho;
    }
}

/// Portfolio-level Greeks aggregated across all positions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioGreeks {
    /// Position value (price × quantity × contract size)
    pub total_value: f64,
    pub total_delta: f64,
    pub total_gamma: f64,
    pub total_vega: f64,
    pub total_theta: f64,
    pub total_rho: f64,

    /// Greeks broken down by underlying asset
    pub by_underlying: BTreeMap<String, Greeks>,
}

/// Trade in the underlying that neutralizes delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeRecommendation {
    pub instrument: String,

    /// Units to trade (positive = buy, negative = sell)
    pub quantity: f64,

    pub target_greek: String,

    /// Portfolio delta for this underlying after the hedge
    pub residual_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreeksConfig {
    /// Minimum time to expiry to calculate Greeks (default: 1 hour)
    #[serde(default = "default_min_time_to_expiry_hours")]
    pub min_time_to_expiry_hours: f64,

    #[serde(default = "default_days_per_year")]
    pub days_per_year: f64,

    /// Absolute delta below which no hedge is suggested
    #[serde(default = "default_hedge_tolerance")]
    pub hedge_tolerance: f64,
}

fn default_min_time_to_expiry_hours() -> f64 {
    1.0
}

fn default_days_per_year() -> f64 {
    365.0
}

fn default_hedge_tolerance() -> f64 {
    0.01
}

impl Default for GreeksConfig {
    fn default() -> Self {
        Self {
            min_time_to_expiry_hours: default_min_time_to_expiry_hours(),
            days_per_year: default_days_per_year(),
            hedge_tolerance: default_hedge_tolerance(),
        }
    }
}

/// Black-Scholes model inputs for one contract
#[derive(Debug, Clone, Copy)]
pub struct BlackScholes {
    pub spot: f64,
    pub strike: f64,
    pub time_to_expiry: f64,
    pub volatility: f64,
    pub rate: f64,
}

impl BlackScholes {
    pub fn new(spot: f64, strike: f64, time_to_expiry: f64, volatility: f64, rate: f64) -> Result<Self> {
        let checks = [
            (spot, "spot price"),
            (strike, "strike"),
            (time_to_expiry, "time to expiry"),
            (volatility, "volatility"),
        ];
        for (value, name) in checks {
            if value.is_nan() || value <= 0.0 || value.is_infinite() {
                return Err(RiskError::numerical(
                    "black_scholes",
                    format!("{} must be positive and finite, got {}", name, value),
                ));
            }
        }
        if !rate.is_finite() {
            return Err(RiskError::numerical("black_scholes", "rate must be finite"));
        }

        Ok(Self {
            spot,
            strike,
            time_to_expiry,
            volatility,
            rate,
        })
    }

    pub fn d1(&self) -> f64 {
        ((self.spot / self.strike).ln()
            + (self.rate + 0.5 * self.volatility * self.volatility) * self.time_to_expiry)
            / (self.volatility * self.time_to_expiry.sqrt())
    }

    pub fn d2(&self) -> f64 {
        self.d1() - self.volatility * self.time_to_expiry.sqrt()
    }

    fn discount(&self) -> f64 {
        (-self.rate * self.time_to_expiry).exp()
    }

    pub fn price(&self, option_type: OptionType) -> f64 {
        let (d1, d2) = (self.d1(), self.d2());
        let pv_strike = self.strike * self.discount();
        match option_type {
            OptionType::Call => self.spot * normal_cdf(d1) - pv_strike * normal_cdf(d2),
            OptionType::Put => pv_strike * normal_cdf(-d2) - self.spot * normal_cdf(-d1),
        }
    }

    pub fn greeks(&self, option_type: OptionType) -> Greeks {
        let s = self.spot;
        let k = self.strike;
        let t = self.time_to_expiry;
        let sigma = self.volatility;
        let r = self.rate;
        let sqrt_t = t.sqrt();

        let d1 = self.d1();
        let d2 = d1 - sigma * sqrt_t;
        let pdf_d1 = normal_pdf(d1);
        let discount = self.discount();

        // Gamma and vega are the same for calls and puts
        let gamma = pdf_d1 / (s * sigma * sqrt_t);
        let vega = s * pdf_d1 * sqrt_t;
        let decay = -s * pdf_d1 * sigma / (2.0 * sqrt_t);

        let (delta, theta, rho) = match option_type {
            OptionType::Call => (
                normal_cdf(d1),
                decay - r * k * discount * normal_cdf(d2),
                k * t * discount * normal_cdf(d2),
            ),
            OptionType::Put => (
                normal_cdf(d1) - 1.0,
                decay + r * k * discount * normal_cdf(-d2),
                -k * t * discount * normal_cdf(-d2),
            ),
        };

        Greeks {
            price: self.price(option_type),
            delta,
            gamma,
            vega,
            theta,
            rho,
        }
    }
}

/// Greeks calculation engine
#[derive(Debug, Clone, Default)]
pub struct GreeksEngine {
    config: GreeksConfig,
}

impl GreeksEngine {
    pub fn new(config: GreeksConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GreeksConfig {
        &self.config
    }

    /// Price and Greeks for a single contract under Black-Scholes
    pub fn calculate_greeks(
        &self,
        contract: &OptionContract,
        underlying_price: f64,
        volatility: f64,
        risk_free_rate: f64,
    ) -> Result<Greeks> {
        let model = BlackScholes::new(
            underlying_price,
            contract.strike,
            contract.time_to_expiry,
            volatility,
            risk_free_rate,
        )?;

        let min_time = self.config.min_time_to_expiry_hours / (self.config.days_per_year * 24.0);
        if contract.time_to_expiry < min_time {
            return Err(RiskError::InvalidParameter(format!(
                "Time to expiry too small: {} years",
                contract.time_to_expiry
            )));
        }

        Ok(model.greeks(contract.option_type))
    }

    /// Aggregate position Greeks (quantity × contract size) in total and per underlying
    pub fn calculate_portfolio_greeks(
        &self,
        positions: &[OptionPosition],
        market: &MarketData,
    ) -> Result<PortfolioGreeks> {
        if positions.is_empty() {
            return Err(RiskError::MissingData("no option positions".to_string()));
        }

        let mut by_underlying: BTreeMap<String, Greeks> = BTreeMap::new();

        for position in positions {
            let underlying_price = market
                .underlying_prices
                .get(&position.underlying)
                .ok_or_else(|| {
                    RiskError::MissingData(format!(
                        "Missing price for underlying: {}",
                        position.underlying
                    ))
                })?;

            let volatility = market
                .implied_volatility
                .get(&position.underlying)
                .ok_or_else(|| {
                    RiskError::MissingData(format!(
                        "Missing volatility for underlying: {}",
                        position.underlying
                    ))
                })?;

            let greeks = self.calculate_greeks(
                &position.contract,
                *underlying_price,
                *volatility,
                market.risk_free_rate,
            )?;

            let scaled = greeks.scaled(position.quantity * position.contract.contract_size);
            by_underlying
                .entry(position.underlying.clone())
                .or_default()
                .accumulate(&scaled);
        }

        let mut total = Greeks::default();
        for greeks in by_underlying.values() {
            total.accumulate(greeks);
        }

        debug!(
            positions = positions.len(),
            underlyings = by_underlying.len(),
            total_delta = total.delta,
            "portfolio Greeks aggregated"
        );

        Ok(PortfolioGreeks {
            total_value: total.price,
            total_delta: total.delta,
            total_gamma: total.gamma,
            total_vega: total.vega,
            total_theta: total.theta,
            total_rho: total.rho,
            by_underlying,
        })
    }

    /// Units of each underlying to trade so that its delta becomes zero
    pub fn suggest_delta_hedges(&self, greeks: &PortfolioGreeks) -> Vec<HedgeRecommendation> {
        greeks
            .by_underlying
            .iter()
            .filter(|(_, g)| g.delta.abs() > self.config.hedge_tolerance)
            .map(|(underlying, g)| HedgeRecommendation {
                instrument: underlying.clone(),
                quantity: -g.delta,
                target_greek: "Delta".to_string(),
                residual_delta: 0.0,
            })
            .collect()
    }
}

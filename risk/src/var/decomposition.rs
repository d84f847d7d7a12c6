//! Position-level attribution of parametric portfolio VaR

use super::{SimulationInputs, VarEngine};
use crate::error::{Result, RiskError};
use crate::stats::inverse_normal_cdf;
use crate::types::PortfolioData;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const UNCLASSIFIED: &str = "unclassified";

/// Parametric VaR of a weighted portfolio: wᵀμ·h − z·√(wᵀΣw·h)
pub fn parametric_portfolio_var(
    weights: &DVector<f64>,
    expected_returns: &DVector<f64>,
    covariance: &DMatrix<f64>,
    z: f64,
    horizon_days: u32,
) -> f64 {
    let h = horizon_days as f64;
    let variance = (covariance * weights).dot(weights).max(0.0);
    weights.dot(expected_returns) * h - z * (variance * h).sqrt()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionVar {
    pub id: String,
    pub weight: f64,
    /// ∂VaR/∂wᵢ by forward difference
    pub marginal_var: f64,
    /// VaR(full) − VaR(without this position)
    pub incremental_var: f64,
    /// wᵢ·marginal, scaled so components sum to total VaR
    pub component_var: f64,
    pub contribution_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecomposition {
    pub confidence: f64,
    pub horizon_days: u32,
    pub total_var: f64,
    pub positions: Vec<PositionVar>,
    pub by_sector: BTreeMap<String, f64>,
    pub by_region: BTreeMap<String, f64>,
    pub by_asset_class: BTreeMap<String, f64>,
}

impl VarEngine {
    /// Marginal, incremental and component VaR for every position
    pub fn decompose(
        &self,
        inputs: &SimulationInputs,
        portfolio: &PortfolioData,
        confidence: f64,
        horizon_days: u32,
    ) -> Result<VarDecomposition> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(RiskError::InvalidConfidenceLevel(confidence));
        }
        if horizon_days == 0 {
            return Err(RiskError::InvalidTimeHorizon(horizon_days));
        }

        let z = inverse_normal_cdf(confidence)?;
        let mu = &inputs.expected_returns;
        let cov = &inputs.covariance;
        let var_of = |w: &DVector<f64>| parametric_portfolio_var(w, mu, cov, z, horizon_days);

        let weights = &inputs.weights;
        let total_var = var_of(weights);
        let bump = self.config.marginal_bump;
        let n = inputs.dimension();

        let mut raw = Vec::with_capacity(n);
        for i in 0..n {
            let mut bumped = weights.clone();
            bumped[i] += bump;
            let marginal = (var_of(&bumped) - total_var) / bump;

            let remaining = weights.sum() - weights[i];
            let without_var = if n > 1 && remaining > 0.0 {
                let mut reduced = weights.clone();
                reduced[i] = 0.0;
                var_of(&(reduced / remaining))
            } else {
                0.0
            };

            raw.push((marginal, total_var - without_var));
        }

        let euler_sum: f64 = raw
            .iter()
            .zip(weights.iter())
            .map(|((marginal, _), w)| w * marginal)
            .sum();
        if euler_sum.abs() < 1e-15 {
            return Err(RiskError::numerical(
                "var_decomposition",
                "component contributions sum to zero",
            ));
        }
        let scale = total_var / euler_sum;

        let positions: Vec<PositionVar> = inputs
            .asset_ids
            .iter()
            .zip(raw)
            .enumerate()
            .map(|(i, (id, (marginal, incremental)))| {
                let component = weights[i] * marginal * scale;
                PositionVar {
                    id: id.clone(),
                    weight: weights[i],
                    marginal_var: marginal,
                    incremental_var: incremental,
                    component_var: component,
                    contribution_pct: if total_var != 0.0 {
                        component / total_var
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let mut by_sector = BTreeMap::new();
        let mut by_region = BTreeMap::new();
        let mut by_asset_class = BTreeMap::new();
        for position in &positions {
            let meta = portfolio.position(&position.id);
            let sector = meta
                .and_then(|p| p.metadata.sector.clone())
                .unwrap_or_else(|| UNCLASSIFIED.to_string());
            let region = meta
                .and_then(|p| p.metadata.region.clone())
                .unwrap_or_else(|| UNCLASSIFIED.to_string());
            let class = meta
                .map(|p| p.asset_class.label().to_string())
                .unwrap_or_else(|| UNCLASSIFIED.to_string());

            *by_sector.entry(sector).or_insert(0.0) += position.component_var;
            *by_region.entry(region).or_insert(0.0) += position.component_var;
            *by_asset_class.entry(class).or_insert(0.0) += position.component_var;
        }

        Ok(VarDecomposition {
            confidence,
            horizon_days,
            total_var,
            positions,
            by_sector,
            by_region,
            by_asset_class,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetClass, Position, PositionMetadata};
    use approx::assert_relative_eq;

    fn inputs() -> SimulationInputs {
        let covariance = DMatrix::from_row_slice(
            3,
            3,
            &[
                0.0004, 0.00006, 0.0, //
                0.00006, 0.0001, 0.0, //
                0.0, 0.0, 0.000225,
            ],
        );
        SimulationInputs::new(
            vec!["AAPL".into(), "BOND".into(), "GOLD".into()],
            DVector::from_vec(vec![0.5, 0.3, 0.2]),
            DVector::from_vec(vec![0.0006, 0.0002, 0.0003]),
            covariance,
        )
        .unwrap()
    }

    fn portfolio() -> PortfolioData {
        let position = |id: &str, class, sector: &str| Position {
            id: id.to_string(),
            asset_class: class,
            weight: 1.0,
            value: 0.0,
            metadata: PositionMetadata {
                sector: Some(sector.to_string()),
                region: Some("US".to_string()),
                ..Default::default()
            },
        };
        PortfolioData {
            positions: vec![
                position("AAPL", AssetClass::Equity, "Technology"),
                position("BOND", AssetClass::FixedIncome, "Government"),
                position("GOLD", AssetClass::Commodity, "Metals"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_components_sum_to_total() {
        let engine = VarEngine::default();
        let decomposition = engine.decompose(&inputs(), &portfolio(), 0.95, 1).unwrap();

        let sum: f64 = decomposition.positions.iter().map(|p| p.component_var).sum();
        assert_relative_eq!(sum, decomposition.total_var, epsilon = 1e-12);

        let pct: f64 = decomposition.positions.iter().map(|p| p.contribution_pct).sum();
        assert_relative_eq!(pct, 1.0, epsilon = 1e-9);

        let sectors: f64 = decomposition.by_sector.values().sum();
        assert_relative_eq!(sectors, decomposition.total_var, epsilon = 1e-12);
        assert_eq!(decomposition.by_region.len(), 1);
        assert!(decomposition.by_asset_class.contains_key("equity"));
    }

    #[test]
    fn test_marginal_var_matches_analytic_gradient() {
        let inputs = inputs();
        let engine = VarEngine::default();
        let decomposition = engine.decompose(&inputs, &portfolio(), 0.99, 1).unwrap();

        let z = 2.326_347_9;
        let sigma_w = &inputs.covariance * &inputs.weights;
        let sigma_p = sigma_w.dot(&inputs.weights).sqrt();
        for (i, position) in decomposition.positions.iter().enumerate() {
            let analytic = inputs.expected_returns[i] - z * sigma_w[i] / sigma_p;
            assert!((position.marginal_var - analytic).abs() < 1e-3);
        }
    }

    #[test]
    fn test_riskiest_position_dominates() {
        let decomposition = VarEngine::default()
            .decompose(&inputs(), &portfolio(), 0.95, 1)
            .unwrap();
        let equity = &decomposition.positions[0];
        let bond = &decomposition.positions[1];
        assert!(equity.component_var < bond.component_var);
        assert!(equity.incremental_var < 0.0);
    }

    #[test]
    fn test_rejects_bad_confidence() {
        assert!(VarEngine::default()
            .decompose(&inputs(), &portfolio(), 1.2, 1)
            .is_err());
    }
}

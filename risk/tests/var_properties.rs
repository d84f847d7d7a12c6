//! Properties every VaR method must satisfy, plus a known-distribution check

use approx::assert_abs_diff_eq;
use nalgebra::{DMatrix, DVector};
use proptest::prelude::*;
use quant_risk::backtest::kupiec_test;
use quant_risk::stats::inverse_normal_cdf;
use quant_risk::{SimulationInputs, VarConfig, VarEngine, VarMethodResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const LEVELS: [f64; 3] = [0.90, 0.95, 0.99];

fn normal_returns(seed: u64, sigma: f64, n: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Normal::new(0.0005, sigma).unwrap();
    (0..n).map(|_| dist.sample(&mut rng)).collect()
}

fn check_ordering(result: &VarMethodResult) -> Result<(), TestCaseError> {
    let v90 = result.at(0.90).unwrap();
    let v95 = result.at(0.95).unwrap();
    let v99 = result.at(0.99).unwrap();

    prop_assert!(v99.var <= v95.var + 1e-12, "{:?}: 99% above 95%", result.method);
    prop_assert!(v95.var <= v90.var + 1e-12, "{:?}: 95% above 90%", result.method);
    for estimate in &result.estimates {
        prop_assert!(
            estimate.cvar <= estimate.var + 1e-12,
            "{:?}: CVaR {} above VaR {}",
            result.method,
            estimate.cvar,
            estimate.var
        );
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn var_is_ordered_across_confidence_levels(
        seed in any::<u64>(),
        sigma in 0.005f64..0.05,
        n in 100usize..250,
    ) {
        let returns = normal_returns(seed, sigma, n);
        let engine = VarEngine::default();

        check_ordering(&engine.parametric_normal(&returns, &LEVELS, 1).unwrap())?;
        check_ordering(&engine.student_t(&returns, &LEVELS, 1).unwrap())?;
        check_ordering(&engine.cornish_fisher(&returns, &LEVELS, 1).unwrap())?;
        check_ordering(&engine.historical(&returns, &LEVELS, 1).unwrap())?;
        check_ordering(&engine.weighted_historical(&returns, &LEVELS, 1).unwrap())?;
        check_ordering(&engine.filtered_historical(&returns, &LEVELS, 1).unwrap())?;
    }

    #[test]
    fn historical_var_picks_the_empirical_quantile(
        returns in prop::collection::vec(-0.1f64..0.1, 5..300),
        confidence in prop::sample::select(vec![0.90, 0.95, 0.99]),
    ) {
        let engine = VarEngine::default();
        let result = engine.historical(&returns, &[confidence], 1).unwrap();

        let mut sorted = returns.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let raw = ((1.0 - confidence) * returns.len() as f64 + 1e-9).floor() as usize;
        let index = raw.min(returns.len() - 1);

        prop_assert_eq!(result.estimates[0].var, sorted[index]);
    }

    #[test]
    fn kupiec_statistic_vanishes_at_the_expected_rate(k in 1usize..40) {
        let observations = 100 * k;
        let violations = 5 * k;
        let test = kupiec_test(violations, observations, 0.95).unwrap();

        prop_assert!(test.statistic.abs() < 1e-8);
        prop_assert!(!test.reject);
    }
}

#[test]
fn test_stratified_normal_sample() {
    // Evenly spaced quantiles of N(0, 0.02²)
    let n = 250;
    let returns: Vec<f64> = (0..n)
        .map(|i| 0.02 * inverse_normal_cdf((i as f64 + 0.5) / n as f64).unwrap())
        .collect();

    let engine = VarEngine::default();
    let parametric = engine.parametric_normal(&returns, &[0.95], 1).unwrap();
    let historical = engine.historical(&returns, &[0.95], 1).unwrap();

    let expected = -1.645 * 0.02;
    assert_abs_diff_eq!(parametric.estimates[0].var, expected, epsilon = 1e-3);
    assert!(!parametric.low_confidence);

    // Within one sample step of the parametric figure
    let mut sorted = returns.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let step = sorted[13] - sorted[12];
    assert!((historical.estimates[0].var - parametric.estimates[0].var).abs() <= step);

    assert!(parametric.estimates[0].cvar <= parametric.estimates[0].var);
    assert!(historical.estimates[0].cvar <= historical.estimates[0].var);
}

#[test]
fn test_simulated_cvar_never_exceeds_var() {
    let inputs = SimulationInputs::new(
        vec!["EQUITY".to_string(), "BOND".to_string(), "GOLD".to_string()],
        DVector::from_vec(vec![0.5, 0.35, 0.15]),
        DVector::from_vec(vec![0.0005, 0.0001, 0.0002]),
        DMatrix::from_row_slice(
            3,
            3,
            &[
                0.000225, -0.00002, 0.00001, //
                -0.00002, 0.000036, 0.000004, //
                0.00001, 0.000004, 0.0001,
            ],
        ),
    )
    .unwrap();

    for seed in [1_u64, 7, 42] {
        let config = VarConfig {
            random_seed: Some(seed),
            ..VarConfig::default()
        };
        assert!(config.validate().is_ok());
        let engine = VarEngine::new(config);

        let results = [
            engine.monte_carlo(&inputs, &LEVELS, 1).unwrap(),
            engine.importance_sampling(&inputs, &LEVELS, 1).unwrap(),
            engine.quasi_monte_carlo(&inputs, &LEVELS, 1).unwrap(),
        ];
        for result in &results {
            for &level in &LEVELS {
                let estimate = result.at(level).unwrap();
                assert!(
                    estimate.cvar <= estimate.var,
                    "{:?} at {}: CVaR {} above VaR {}",
                    result.method,
                    level,
                    estimate.cvar,
                    estimate.var
                );
            }
            assert!(result.at(0.99).unwrap().var <= result.at(0.90).unwrap().var);
        }
    }
}

#[test]
fn test_horizon_scaling() {
    let returns = normal_returns(11, 0.01, 200);
    let engine = VarEngine::default();

    let one_day = engine.parametric_normal(&returns, &[0.99], 1).unwrap();
    let ten_day = engine.parametric_normal(&returns, &[0.99], 10).unwrap();

    assert!(ten_day.estimates[0].var < one_day.estimates[0].var);
    assert_eq!(ten_day.horizon_days, 10);
}

#[test]
fn test_seeded_simulation_is_reproducible() {
    let config = VarConfig {
        random_seed: Some(99),
        ..VarConfig::default()
    };
    let engine = VarEngine::new(config);
    let inputs = SimulationInputs::new(
        vec!["A".to_string(), "B".to_string()],
        DVector::from_vec(vec![0.6, 0.4]),
        DVector::from_vec(vec![0.0004, 0.0002]),
        DMatrix::from_row_slice(2, 2, &[0.0004, 0.00005, 0.00005, 0.0001]),
    )
    .unwrap();

    let first = engine.monte_carlo(&inputs, &LEVELS, 1).unwrap();
    let second = engine.monte_carlo(&inputs, &LEVELS, 1).unwrap();
    assert_eq!(first, second);

    let qmc = engine.quasi_monte_carlo(&inputs, &LEVELS, 1).unwrap();
    let analytic = -inverse_normal_cdf(0.95).unwrap() * inputs.portfolio_variance().sqrt()
        + inputs.portfolio_mean();
    assert_abs_diff_eq!(qmc.at(0.95).unwrap().var, analytic, epsilon = 2e-3);
}

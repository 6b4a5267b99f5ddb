use approx::assert_abs_diff_eq;
use discrete_alloc_core::portfolio::weights_sharpe;
use discrete_alloc_core::solvers::{
    MipSolution, MixedIntegerProgram, MixedIntegerSolver, SolverSuite,
};
use discrete_alloc_core::strategies::two_stage::tracking_distance;
use discrete_alloc_core::{
    optimize, optimize_portfolio, optimize_with, AllocationError, AllocationResult, AssetData,
    Holding, OptimizationParameters, OptimizationRequest, PortfolioState, RoundingPolicy,
    Strategy, WeightBounds,
};
use pretty_assertions::assert_eq;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

// ===========================================================================
// Shared fixtures
// ===========================================================================

/// Four assets at price 100, μ = [0.01, 0.02, 0.01, 0.015], Σ = 0.0004·I.
fn reference_assets() -> AssetData {
    AssetData::new(
        vec!["A".into(), "B".into(), "C".into(), "D".into()],
        vec![dec!(100); 4],
        vec![0.01, 0.02, 0.01, 0.015],
        (0..4)
            .map(|i| (0..4).map(|j| if i == j { 0.0004 } else { 0.0 }).collect())
            .collect(),
    )
    .unwrap()
}

/// Five correlated assets with uneven prices.
fn market_assets() -> AssetData {
    AssetData::new(
        vec![
            "AAPL".into(),
            "MSFT".into(),
            "XOM".into(),
            "JNJ".into(),
            "TLT".into(),
        ],
        vec![dec!(189.25), dec!(415.10), dec!(118.40), dec!(152.75), dec!(91.60)],
        vec![0.0011, 0.0010, 0.0006, 0.0004, 0.0002],
        vec![
            vec![0.00032, 0.00018, 0.00006, 0.00004, -0.00002],
            vec![0.00018, 0.00032, 0.00005, 0.00004, -0.00002],
            vec![0.00006, 0.00005, 0.00035, 0.00003, -0.00001],
            vec![0.00004, 0.00004, 0.00003, 0.00014, 0.00001],
            vec![-0.00002, -0.00002, -0.00001, 0.00001, 0.00009],
        ],
    )
    .unwrap()
}

fn with_budget(budget: Decimal) -> OptimizationParameters {
    OptimizationParameters {
        budget: Some(budget),
        ..Default::default()
    }
}

fn weights(holding: &Holding) -> Vec<f64> {
    match holding {
        Holding::Weights { weights } => weights.clone(),
        other => panic!("expected weights, got {other:?}"),
    }
}

fn shares(holding: &Holding) -> Vec<i64> {
    match holding {
        Holding::Shares { shares } => shares.clone(),
        other => panic!("expected shares, got {other:?}"),
    }
}

fn cost(data: &AssetData, shares: &[i64]) -> Decimal {
    shares
        .iter()
        .zip(&data.prices)
        .map(|(s, p)| Decimal::from(*s) * *p)
        .sum()
}

/// A and B almost perfectly correlated (ρ = 1 − 2.5e-9), C independent.
fn nearly_collinear_assets() -> AssetData {
    let cov_ab = 0.0004 * (1.0 - 2.5e-9);
    AssetData::new(
        vec!["A".into(), "B".into(), "C".into()],
        vec![dec!(100), dec!(100), dec!(50)],
        vec![0.010, 0.012, 0.008],
        vec![
            vec![0.0004, cov_ab, 0.0],
            vec![cov_ab, 0.0004, 0.0],
            vec![0.0, 0.0, 0.00025],
        ],
    )
    .unwrap()
}

// ===========================================================================
// Continuous strategies
// ===========================================================================

#[test]
fn test_continuous_qp_reference_scenario() {
    let data = reference_assets();
    let alloc = optimize(Strategy::ContinuousQp, &data, &with_budget(dec!(1000000))).unwrap();
    let w = weights(&alloc.holding);
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
    let best = w
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i);
    assert_eq!(best, Some(1));
}

#[test]
fn test_continuous_qp_without_rescaling_meets_budget_plane() {
    let params = OptimizationParameters {
        scale_weights: false,
        ..Default::default()
    };
    let alloc = optimize(Strategy::ContinuousQp, &market_assets(), &params).unwrap();
    assert_abs_diff_eq!(weights(&alloc.holding).iter().sum::<f64>(), 1.0, epsilon = 1e-6);
}

#[test]
fn test_zero_gamma_rejected_by_mean_variance_strategies() {
    let params = OptimizationParameters {
        risk_aversion: 0.0,
        budget: Some(dec!(1000)),
        ..Default::default()
    };
    for strategy in [Strategy::ContinuousQp, Strategy::IntegerMiqp] {
        let err = optimize(strategy, &reference_assets(), &params).unwrap_err();
        assert!(
            matches!(err, AllocationError::InvalidParameter { ref field, .. } if field == "risk_aversion"),
            "{strategy}: {err:?}"
        );
    }
}

#[test]
fn test_nonlinear_sharpe_beats_mean_variance_on_sharpe() {
    let data = market_assets();
    let params = OptimizationParameters::default();
    let qp = optimize(Strategy::ContinuousQp, &data, &params).unwrap();
    let sharpe = optimize(Strategy::NonlinearSharpe, &data, &params).unwrap();
    let qp_ratio = weights_sharpe(&data, &weights(&qp.holding), 252.0).unwrap();
    let max_ratio = weights_sharpe(&data, &weights(&sharpe.holding), 252.0).unwrap();
    assert!(max_ratio >= qp_ratio - 1e-9, "{max_ratio} < {qp_ratio}");
}

// ===========================================================================
// Discrete strategies
// ===========================================================================

#[test]
fn test_integer_miqp_small_budget() {
    let data = reference_assets();
    let alloc = optimize(Strategy::IntegerMiqp, &data, &with_budget(dec!(300))).unwrap();
    let s = shares(&alloc.holding);
    assert!(cost(&data, &s) <= dec!(300));
}

#[test]
fn test_two_stage_never_overspends() {
    let data = market_assets();
    for strategy in [Strategy::TwoStageQp, Strategy::TwoStageSharpe] {
        let alloc = optimize(strategy, &data, &with_budget(dec!(25000))).unwrap();
        let s = shares(&alloc.holding);
        assert!(cost(&data, &s) <= dec!(25000), "{strategy} overspent");
        let target = alloc.target_weights.as_ref().expect("target retained");
        assert_eq!(target.len(), 5);
    }
}

#[test]
fn test_two_stage_tracks_target_better_than_floor() {
    let data = market_assets();
    let alloc = optimize(Strategy::TwoStageQp, &data, &with_budget(dec!(25000))).unwrap();
    let target = alloc.target_weights.clone().unwrap();
    let ours = tracking_distance(&data, &shares(&alloc.holding), &target, 25000.0).unwrap();

    let floor = PortfolioState::from_weights(&data, &target, dec!(25000), RoundingPolicy::Floor)
        .unwrap();
    let floor_shares: Vec<i64> = floor
        .shares
        .iter()
        .map(|s| s.to_i64().unwrap())
        .collect();
    let floor_distance = tracking_distance(&data, &floor_shares, &target, 25000.0).unwrap();
    assert!(ours <= floor_distance + 1e-6, "{ours} > {floor_distance}");
}

#[test]
fn test_rounding_policies_normalize_weights() {
    let data = market_assets();
    let alloc = optimize(Strategy::NonlinearSharpe, &data, &OptimizationParameters::default())
        .unwrap();
    let w = weights(&alloc.holding);
    for policy in [RoundingPolicy::Ceiling, RoundingPolicy::Floor, RoundingPolicy::Nearest] {
        let state = PortfolioState::from_weights(&data, &w, dec!(100000), policy).unwrap();
        assert_abs_diff_eq!(state.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
        assert_eq!(state.deficit, state.value - dec!(100000));
    }
}

// ===========================================================================
// Frontier search
// ===========================================================================

#[test]
fn test_frontier_qp_reference_scenario() {
    let data = reference_assets();
    let params = with_budget(dec!(1000000));
    let baseline = optimize(Strategy::ContinuousQp, &data, &params).unwrap();
    let frontier = optimize(Strategy::FrontierQp, &data, &params).unwrap();
    let trace = frontier.frontier.as_ref().unwrap();
    assert!(trace.iterations <= 20);

    let baseline_sharpe = weights_sharpe(&data, &weights(&baseline.holding), 252.0).unwrap();
    let found = weights_sharpe(&data, &weights(&frontier.holding), 252.0).unwrap();
    assert!(found >= baseline_sharpe);
    assert_abs_diff_eq!(found, trace.best_sharpe.unwrap(), epsilon = 1e-12);
}

#[test]
fn test_frontier_miqp_returns_shares_within_budget() {
    let data = reference_assets();
    let mut params = with_budget(dec!(10000));
    params.frontier.max_iterations = 4;
    let alloc = optimize(Strategy::FrontierMiqp, &data, &params).unwrap();
    assert!(cost(&data, &shares(&alloc.holding)) <= dec!(10000));
    assert!(alloc.frontier.unwrap().iterations <= 4);
}

#[test]
fn test_frontier_miqp_tolerates_empty_holding() {
    // Negative returns under long-only bounds: every γ holds no shares.
    let mut data = reference_assets();
    data.expected_returns = vec![-0.01, -0.02, -0.01, -0.015];
    let mut params = with_budget(dec!(1000));
    params.bounds = Some(WeightBounds::long_only(4));
    params.frontier.max_iterations = 3;
    let alloc = optimize(Strategy::FrontierMiqp, &data, &params).unwrap();
    assert_eq!(shares(&alloc.holding), vec![0; 4]);

    let trace = alloc.frontier.unwrap();
    assert_eq!(trace.best_sharpe, None);
    assert!(!trace.converged);
    assert_eq!(trace.iterations, 3);
    assert!(trace.steps.iter().all(|s| s.left_sharpe.is_none() && s.right_sharpe.is_none()));
}

// ===========================================================================
// Near-singular covariance
// ===========================================================================

#[test]
fn test_near_singular_long_only_strategies_succeed() {
    let data = nearly_collinear_assets();
    assert!(data.spectrum().is_near_singular());
    let mut params = with_budget(dec!(10000));
    params.bounds = Some(WeightBounds::long_only(3));

    let qp = optimize(Strategy::ContinuousQp, &data, &params).unwrap();
    let w = weights(&qp.holding);
    assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
    assert!(w.iter().all(|x| *x >= -1e-6 && *x <= 1.0 + 1e-6), "weights {w:?}");

    for strategy in [Strategy::IntegerMiqp, Strategy::TwoStageQp] {
        let alloc = optimize(strategy, &data, &params).unwrap();
        let held = shares(&alloc.holding);
        assert!(held.iter().all(|s| *s >= 0), "{strategy}: {held:?}");
        assert!(cost(&data, &held) <= dec!(10000), "{strategy}: {held:?}");
    }
}

#[test]
fn test_near_singular_unbounded_outcomes_are_typed() {
    // Shorting A against B is almost riskless, so unbounded positions can
    // grow very large; any failure must surface as a solver error kind.
    let data = nearly_collinear_assets();
    let params = with_budget(dec!(10000));
    for strategy in [Strategy::ContinuousQp, Strategy::IntegerMiqp, Strategy::TwoStageQp] {
        match optimize(strategy, &data, &params) {
            Ok(alloc) => match &alloc.holding {
                Holding::Weights { weights } => {
                    assert!(weights.iter().all(|w| w.is_finite()));
                }
                Holding::Shares { shares } => {
                    assert!(cost(&data, shares) <= dec!(10000), "{strategy}: {shares:?}");
                }
            },
            Err(e) => assert!(
                matches!(
                    e,
                    AllocationError::SolverNonConvergence { .. }
                        | AllocationError::SolverTimeout { .. }
                        | AllocationError::Unbounded(_)
                        | AllocationError::NumericalDegenerate { .. }
                ),
                "{strategy}: {e:?}"
            ),
        }
    }
}

#[test]
fn test_near_singular_report_warns() {
    let mut params = with_budget(dec!(10000));
    params.bounds = Some(WeightBounds::long_only(3));
    let request = OptimizationRequest {
        assets: nearly_collinear_assets(),
        strategy: Strategy::IntegerMiqp,
        parameters: params,
    };
    let out = optimize_portfolio(&request).unwrap();
    assert!(out
        .warnings
        .iter()
        .any(|w| w == "Covariance matrix is near-singular"));
    assert!(out.result.state.value <= dec!(10000));
}

// ===========================================================================
// Error propagation through injected backends
// ===========================================================================

struct TimesOut;

impl MixedIntegerSolver for TimesOut {
    fn solve(&self, _problem: &MixedIntegerProgram) -> AllocationResult<MipSolution> {
        Err(AllocationError::SolverTimeout {
            solver: "mock".into(),
            limit: "time limit of 0.001s".into(),
        })
    }
}

#[test]
fn test_backend_timeout_propagates_unchanged() {
    let suite = SolverSuite {
        mixed_integer: Arc::new(TimesOut),
        ..SolverSuite::default()
    };
    for strategy in [Strategy::IntegerMiqp, Strategy::TwoStageQp, Strategy::FrontierMiqp] {
        let err = optimize_with(&suite, strategy, &reference_assets(), &with_budget(dec!(1000)))
            .unwrap_err();
        assert!(
            matches!(err, AllocationError::SolverTimeout { ref solver, .. } if solver == "mock"),
            "{strategy}: {err:?}"
        );
    }
}

#[test]
fn test_invalid_data_rejected_before_solving() {
    let mut data = reference_assets();
    data.covariance_matrix[0][1] = 0.001;
    let err = optimize(Strategy::ContinuousQp, &data, &OptimizationParameters::default())
        .unwrap_err();
    assert!(matches!(err, AllocationError::InvalidParameter { .. }));
}

// ===========================================================================
// JSON boundary
// ===========================================================================

#[test]
fn test_request_with_original_optimizer_names() {
    let json = r#"{
        "assets": {
            "names": ["A", "B"],
            "prices": [50, 20],
            "expected_returns": [0.001, 0.0015],
            "covariance_matrix": [[0.0002, 0.00005], [0.00005, 0.0003]]
        },
        "strategy": "two_stage_slsqp",
        "parameters": { "budget": 10000, "rounding": "mid" }
    }"#;
    let request: OptimizationRequest = serde_json::from_str(json).unwrap();
    assert_eq!(request.strategy, Strategy::TwoStageSharpe);
    assert_eq!(request.parameters.rounding, RoundingPolicy::Nearest);

    let out = optimize_portfolio(&request).unwrap();
    assert!(out.result.state.value <= dec!(10000));
    assert!(out.result.target_weights.is_some());
    assert!(out.warnings.iter().any(|w| w.contains("Rounding policy")));
}

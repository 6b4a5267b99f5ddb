//! Property tests for allocation invariants.
//!
//! 1. Rounding normalization: rounded holdings have weights summing to 1
//! 2. Budget plane: continuous QP weights sum to 1 without rescaling
//! 3. Budget: integer share holdings never cost more than the budget

use discrete_alloc_core::{
    optimize, AssetData, Holding, OptimizationParameters, PortfolioState,
    RoundingPolicy, Strategy as AllocStrategy, WeightBounds,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

// ── Generators ───────────────────────────────────────────────────────

fn arb_prices(n: usize) -> impl Strategy<Value = Vec<Decimal>> {
    prop::collection::vec(100u32..50_000, n)
        .prop_map(|cents| cents.into_iter().map(|c| Decimal::new(c as i64, 2)).collect())
}

/// Diagonal-plus-common-factor covariance, always positive definite.
fn arb_assets(n: usize) -> impl Strategy<Value = AssetData> {
    (
        arb_prices(n),
        prop::collection::vec(-0.002f64..0.004, n),
        prop::collection::vec(0.0001f64..0.002, n),
        0.0f64..0.00005,
    )
        .prop_map(move |(prices, returns, variances, common)| {
            let covariance = (0..n)
                .map(|i| {
                    (0..n)
                        .map(|j| if i == j { variances[i] + common } else { common })
                        .collect()
                })
                .collect();
            AssetData {
                names: (0..n).map(|i| format!("asset_{i}")).collect(),
                prices,
                expected_returns: returns,
                covariance_matrix: covariance,
            }
        })
}

fn arb_weights(n: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.05f64..1.0, n).prop_map(|raw| {
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|w| w / total).collect()
    })
}

fn arb_policy() -> impl Strategy<Value = RoundingPolicy> {
    prop_oneof![
        Just(RoundingPolicy::Ceiling),
        Just(RoundingPolicy::Floor),
        Just(RoundingPolicy::Nearest),
    ]
}

// ── 1. Rounding normalization ────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whole-share rounding keeps the weights on the budget plane.
    #[test]
    fn rounding_normalizes_weights(
        data in arb_assets(4),
        weights in arb_weights(4),
        budget in 100_000u32..1_000_000,
        policy in arb_policy(),
    ) {
        let state = PortfolioState::from_weights(&data, &weights, Decimal::from(budget), policy)
            .unwrap();
        let sum: f64 = state.weights.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-6, "sum {}", sum);
        prop_assert!(state.shares.iter().all(|s| s.fract().is_zero()));
        prop_assert_eq!(state.deficit, state.value - Decimal::from(budget));
    }
}

// ── 2. Budget plane ──────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn continuous_qp_weights_sum_to_one(
        data in arb_assets(5),
        gamma in 0.5f64..20.0,
    ) {
        let params = OptimizationParameters {
            risk_aversion: gamma,
            scale_weights: false,
            ..Default::default()
        };
        let alloc = optimize(AllocStrategy::ContinuousQp, &data, &params).unwrap();
        let Holding::Weights { weights } = alloc.holding else {
            return Err(TestCaseError::fail("expected weights"));
        };
        let sum: f64 = weights.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-6, "sum {}", sum);
    }
}

// ── 3. Integer budget ────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn integer_holdings_never_overspend(
        data in arb_assets(3),
        budget in 500u32..5_000,
        two_stage in any::<bool>(),
    ) {
        let budget = Decimal::from(budget);
        let strategy = if two_stage { AllocStrategy::TwoStageQp } else { AllocStrategy::IntegerMiqp };
        let params = OptimizationParameters {
            budget: Some(budget),
            bounds: Some(WeightBounds::long_only(3)),
            ..Default::default()
        };
        match optimize(strategy, &data, &params) {
            Ok(alloc) => {
                let Holding::Shares { shares } = alloc.holding else {
                    return Err(TestCaseError::fail("expected shares"));
                };
                let cost: Decimal = shares
                    .iter()
                    .zip(&data.prices)
                    .map(|(s, p)| Decimal::from(*s) * *p)
                    .sum();
                prop_assert!(cost <= budget, "cost {} > budget {}", cost, budget);
                prop_assert!(shares.iter().all(|s| *s >= 0));
            }
            // Long-only bounds always admit the empty holding.
            Err(e) => return Err(TestCaseError::fail(format!("{e}"))),
        }
    }
}

use std::sync::Arc;

use super::{Allocation, Formulation, OptimizationParameters, Strategy};
use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::solvers::{QuadraticProgram, QuadraticSolver};
use crate::AllocationResult;

/// Weight sums below this cannot be rescaled onto the budget plane.
const MIN_WEIGHT_SUM: f64 = 1e-12;

/// Maximize `μ·w − γ·wᵀΣw` subject to `Σw = 1` and optional box bounds.
///
/// Posed for the QP backend as `min ½wᵀ(2γΣ)w − μᵀw`.
pub struct ContinuousQp {
    solver: Arc<dyn QuadraticSolver>,
}

impl ContinuousQp {
    pub fn new(solver: Arc<dyn QuadraticSolver>) -> Self {
        ContinuousQp { solver }
    }

    /// The QP for risk aversion `gamma`, exposed for callers that want to
    /// inspect or re-solve it.
    pub fn program(
        data: &AssetData,
        gamma: f64,
        params: &OptimizationParameters,
    ) -> QuadraticProgram {
        let n = data.len();
        let mut qp = QuadraticProgram::new(data.covariance() * (2.0 * gamma), -data.returns())
            .with_equality(vec![1.0; n], 1.0);
        if let Some(bounds) = &params.bounds {
            qp = qp.with_bounds(bounds.lower.clone(), bounds.upper.clone());
        }
        qp
    }
}

impl Formulation for ContinuousQp {
    fn strategy(&self) -> Strategy {
        Strategy::ContinuousQp
    }

    fn solve(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
    ) -> AllocationResult<Allocation> {
        let gamma = params.checked_risk_aversion()?;
        if let Some(bounds) = &params.bounds {
            bounds.check_budget_plane()?;
        }

        let solution = self.solver.solve(&Self::program(data, gamma, params))?;
        let mut weights = solution.x;

        if params.scale_weights {
            let sum: f64 = weights.iter().sum();
            if !(sum.abs() > MIN_WEIGHT_SUM) {
                return Err(AllocationError::degenerate(format!(
                    "weight sum {sum:e} cannot be rescaled to 1"
                )));
            }
            weights.iter_mut().for_each(|w| *w /= sum);
        }

        tracing::debug!(
            gamma,
            iterations = solution.iterations,
            objective = solution.objective,
            "continuous QP solved"
        );

        let mut allocation = Allocation::weights(Strategy::ContinuousQp, weights);
        allocation.risk_aversion = Some(gamma);
        Ok(allocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solvers::{ClarabelSolver, QpSolution};
    use crate::strategies::{Holding, WeightBounds};
    use approx::assert_abs_diff_eq;
    use rust_decimal_macros::dec;

    fn four_assets() -> AssetData {
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

    fn formulation() -> ContinuousQp {
        ContinuousQp::new(Arc::new(ClarabelSolver::default()))
    }

    fn weights_of(allocation: &Allocation) -> Vec<f64> {
        match &allocation.holding {
            Holding::Weights { weights } => weights.clone(),
            other => panic!("expected weights, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_form_solution() {
        // w = (μ − λ) / (2γσ²) with λ = 0.01335
        let alloc = formulation()
            .solve(&four_assets(), &OptimizationParameters::default())
            .unwrap();
        let w = weights_of(&alloc);
        let expected = [-2.09375, 4.15625, -2.09375, 1.03125];
        for (wi, ei) in w.iter().zip(expected) {
            assert_abs_diff_eq!(*wi, ei, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert_eq!(alloc.risk_aversion, Some(2.0));
    }

    #[test]
    fn test_long_only_bounds() {
        let params = OptimizationParameters {
            bounds: Some(WeightBounds::long_only(4)),
            ..Default::default()
        };
        let w = weights_of(&formulation().solve(&four_assets(), &params).unwrap());
        // The upper bound binds on the best asset and absorbs the budget.
        assert!(w.iter().all(|wi| *wi >= -1e-6 && *wi <= 1.0 + 1e-6));
        assert_abs_diff_eq!(w[1], 1.0, epsilon = 1e-5);
        assert_abs_diff_eq!(w[3], 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_non_positive_gamma_rejected_before_solve() {
        struct Unreachable;
        impl QuadraticSolver for Unreachable {
            fn solve(&self, _p: &QuadraticProgram) -> AllocationResult<QpSolution> {
                panic!("solver must not be called")
            }
        }
        for gamma in [0.0, -1.0, f64::NAN] {
            let params = OptimizationParameters {
                risk_aversion: gamma,
                ..Default::default()
            };
            let err = ContinuousQp::new(Arc::new(Unreachable))
                .solve(&four_assets(), &params)
                .unwrap_err();
            assert!(matches!(err, AllocationError::InvalidParameter { .. }));
        }
    }

    #[test]
    fn test_unreachable_budget_plane_infeasible() {
        let params = OptimizationParameters {
            bounds: Some(WeightBounds::uniform(4, 0.0, 0.2)),
            ..Default::default()
        };
        let err = formulation().solve(&four_assets(), &params).unwrap_err();
        assert!(matches!(err, AllocationError::Infeasible(_)));
    }
}

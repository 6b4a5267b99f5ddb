use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

use super::{Allocation, Formulation, OptimizationParameters, Strategy};
use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::solvers::{
    LinearConstraint, NonlinearOutcome, NonlinearProgram, NonlinearSolver, SmoothObjective,
};
use crate::AllocationResult;

/// Portfolio variance under which the Sharpe ratio is treated as undefined.
const MIN_VARIANCE: f64 = 1e-20;

/// Negative per-period Sharpe ratio `−μ·w / sqrt(wᵀΣw)`.
pub struct SharpeObjective {
    returns: DVector<f64>,
    covariance: DMatrix<f64>,
}

impl SharpeObjective {
    pub fn new(data: &AssetData) -> Self {
        SharpeObjective {
            returns: data.returns(),
            covariance: data.covariance(),
        }
    }

    fn moments(&self, w: &DVector<f64>) -> AllocationResult<(f64, f64, DVector<f64>)> {
        let sigma_w = &self.covariance * w;
        let variance = w.dot(&sigma_w);
        if !(variance > MIN_VARIANCE) {
            return Err(AllocationError::degenerate(format!(
                "portfolio variance {variance:e} at evaluated weights"
            )));
        }
        Ok((self.returns.dot(w), variance.sqrt(), sigma_w))
    }
}

impl SmoothObjective for SharpeObjective {
    fn value(&self, w: &DVector<f64>) -> AllocationResult<f64> {
        let (ret, sd, _) = self.moments(w)?;
        Ok(-ret / sd)
    }

    fn gradient(&self, w: &DVector<f64>) -> AllocationResult<DVector<f64>> {
        let (ret, sd, sigma_w) = self.moments(w)?;
        Ok(-&self.returns / sd + sigma_w * (ret / sd.powi(3)))
    }
}

/// Maximize the Sharpe ratio on the budget plane `Σw = 1`.
///
/// The result is a stationary point of the nonlinear solver, seeded at the
/// configured initial weights. Box bounds do not apply to this formulation.
pub struct NonlinearSharpe {
    solver: Arc<dyn NonlinearSolver>,
}

impl NonlinearSharpe {
    pub fn new(solver: Arc<dyn NonlinearSolver>) -> Self {
        NonlinearSharpe { solver }
    }
}

impl Formulation for NonlinearSharpe {
    fn strategy(&self) -> Strategy {
        Strategy::NonlinearSharpe
    }

    fn solve(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
    ) -> AllocationResult<Allocation> {
        if params.bounds.is_some() {
            tracing::warn!("weight bounds are ignored by the Sharpe formulation");
        }
        let n = data.len();
        let objective = SharpeObjective::new(data);
        let program = NonlinearProgram {
            objective: &objective,
            equalities: vec![LinearConstraint::new(vec![1.0; n], 1.0)],
            start: params
                .initial_weights
                .clone()
                .unwrap_or_else(|| data.equal_weights()),
        };

        match self.solver.minimize(&program)? {
            NonlinearOutcome::Converged(solution) => {
                tracing::debug!(
                    iterations = solution.iterations,
                    sharpe = -solution.objective,
                    "Sharpe maximization converged"
                );
                Ok(Allocation::weights(Strategy::NonlinearSharpe, solution.x))
            }
            NonlinearOutcome::NotConverged { solution, reason } => {
                tracing::warn!(%reason, iterations = solution.iterations, "Sharpe maximization did not converge");
                Err(AllocationError::SolverNonConvergence {
                    solver: "sqp".into(),
                    iterations: solution.iterations,
                    last_delta: solution.last_delta,
                })
            }
        }
    }
}

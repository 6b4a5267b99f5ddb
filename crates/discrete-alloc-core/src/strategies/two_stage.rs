use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

use super::integer_miqp::{settle, share_limits, to_share_counts};
use super::{Allocation, Formulation, Holding, OptimizationParameters, Strategy};
use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::solvers::{MixedIntegerProgram, MixedIntegerSolver, QuadraticProgram};
use crate::types::money_to_f64;
use crate::AllocationResult;

/// Tolerance when testing continuous share counts against the share limits.
const SHARE_SLACK: f64 = 1e-9;

/// Continuous target first, then the whole-share holding closest to it in
/// dollars: `min Σ (target_i·B − s_i·p_i)²` s.t. `Σ s_i·p_i <= B`.
///
/// The integer program is posed in shifted, price-normalized form
/// `z = s − round(c)` with `c = target·B/p` the continuous share counts and
/// objective weights `p²/max(p)²`. When the target lies within the share
/// limits, each `z_i` is confined to `(√Σp² + max p) / p_i` around the
/// continuous point; floor rounding of the target lies inside that box and
/// is already closer. A target outside the limits searches the full limits.
///
/// The Sharpe target ignores weight bounds, so its projection does too.
pub struct TwoStage {
    strategy: Strategy,
    target: Box<dyn Formulation>,
    solver: Arc<dyn MixedIntegerSolver>,
}

impl TwoStage {
    pub fn new(
        strategy: Strategy,
        target: Box<dyn Formulation>,
        solver: Arc<dyn MixedIntegerSolver>,
    ) -> Self {
        TwoStage {
            strategy,
            target,
            solver,
        }
    }
}

impl Formulation for TwoStage {
    fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn solve(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
    ) -> AllocationResult<Allocation> {
        let budget = params.required_budget()?;
        let budget_f64 = money_to_f64(budget, "budget")?;
        let prices = data.prices_f64()?;
        let n = data.len();
        let (share_lower, share_upper) = if self.strategy == Strategy::TwoStageSharpe {
            (vec![f64::NEG_INFINITY; n], vec![f64::INFINITY; n])
        } else {
            share_limits(data, params, budget, &prices)?
        };

        let target = self.target.solve(data, params)?;
        let Holding::Weights { weights: target_weights } = &target.holding else {
            return Err(AllocationError::invalid(
                "strategy",
                "Two-stage discretization needs a continuous target",
            ));
        };

        let p_max = prices.iter().copied().fold(0.0, f64::max);
        let radius = prices.iter().map(|p| p * p).sum::<f64>().sqrt() + p_max;

        let continuous: Vec<f64> = target_weights
            .iter()
            .zip(&prices)
            .map(|(w, p)| w * budget_f64 / p)
            .collect();
        let anchor: Vec<f64> = continuous.iter().map(|c| c.round()).collect();
        let offset: Vec<f64> = continuous.iter().zip(&anchor).map(|(c, r)| c - r).collect();
        let omega: Vec<f64> = prices.iter().map(|p| (p / p_max).powi(2)).collect();

        let within_limits = continuous
            .iter()
            .zip(share_lower.iter().zip(&share_upper))
            .all(|(c, (lo, hi))| *c >= lo - SHARE_SLACK && *c <= hi + SHARE_SLACK);
        if !within_limits {
            tracing::debug!("target outside share limits, searching the full limits");
        }

        let mut lower = Vec::with_capacity(n);
        let mut upper = Vec::with_capacity(n);
        for i in 0..n {
            let (mut lo, mut hi) = (share_lower[i] - anchor[i], share_upper[i] - anchor[i]);
            if within_limits {
                let reach = radius / prices[i];
                lo = lo.max((offset[i] - reach).floor());
                hi = hi.min((offset[i] + reach).ceil());
            }
            lower.push(lo);
            upper.push(hi);
        }

        let anchor_cost: f64 = anchor.iter().zip(&prices).map(|(r, p)| r * p).sum();
        let relaxation = QuadraticProgram::new(
            DMatrix::from_diagonal(&DVector::from_iterator(n, omega.iter().map(|w| 2.0 * w))),
            DVector::from_iterator(n, omega.iter().zip(&offset).map(|(w, d)| -2.0 * w * d)),
        )
        .with_constant(omega.iter().zip(&offset).map(|(w, d)| w * d * d).sum())
        .with_inequality(
            prices.iter().map(|p| p / p_max).collect(),
            (budget_f64 - anchor_cost) / p_max,
        )
        .with_bounds(lower, upper);

        let solution = self.solver.solve(&MixedIntegerProgram {
            relaxation,
            integer: vec![true; n],
        })?;
        let distance = solution.objective.max(0.0).sqrt() * p_max;
        tracing::debug!(nodes = solution.nodes, distance, "two-stage projection solved");

        let shifted = to_share_counts(&solution.x)?;
        let shares: Vec<i64> = shifted
            .iter()
            .zip(to_share_counts(&anchor)?)
            .map(|(z, r)| z + r)
            .collect();
        let shares = settle(data, shares, budget)?;

        let mut allocation = Allocation::shares(self.strategy, shares);
        allocation.risk_aversion = target.risk_aversion;
        allocation.target_weights = Some(target_weights.clone());
        Ok(allocation)
    }
}

/// Dollar L2 distance between a share holding and target weights.
pub fn tracking_distance(
    data: &AssetData,
    shares: &[i64],
    target_weights: &[f64],
    budget: f64,
) -> AllocationResult<f64> {
    let prices = data.prices_f64()?;
    Ok(shares
        .iter()
        .zip(target_weights)
        .zip(&prices)
        .map(|((s, w), p)| (w * budget - *s as f64 * p).powi(2))
        .sum::<f64>()
        .sqrt())
}

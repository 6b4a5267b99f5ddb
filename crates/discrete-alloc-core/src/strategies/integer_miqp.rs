use nalgebra::{DMatrix, DVector};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::{Allocation, Formulation, OptimizationParameters, Strategy};
use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::solvers::{MixedIntegerProgram, MixedIntegerSolver, QuadraticProgram};
use crate::types::{money_to_f64, Money};
use crate::AllocationResult;

/// Slack when converting weight bounds into whole-share limits.
const SHARE_LIMIT_SLACK: f64 = 1e-9;

/// Largest share count representable without loss in an f64.
const MAX_SHARES: f64 = 9.0e15;

/// Maximize `μ·w − γ·wᵀΣw` over integer shares `s` with `w = s·p / budget`,
/// subject to `Σ s·p <= budget` and the share limits implied by the weight
/// bounds. Without bounds shares are free integers (short positions allowed).
///
/// The relaxation is posed in dollars, the objective multiplied by the
/// budget: `(γ/B)·sᵀ diag(p) Σ diag(p) s − (μ∘p)·s`, with the budget row
/// normalized by the largest price.
pub struct IntegerMiqp {
    solver: Arc<dyn MixedIntegerSolver>,
}

impl IntegerMiqp {
    pub fn new(solver: Arc<dyn MixedIntegerSolver>) -> Self {
        IntegerMiqp { solver }
    }
}

impl Formulation for IntegerMiqp {
    fn strategy(&self) -> Strategy {
        Strategy::IntegerMiqp
    }

    fn solve(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
    ) -> AllocationResult<Allocation> {
        let gamma = params.checked_risk_aversion()?;
        let budget = params.required_budget()?;
        let budget_f64 = money_to_f64(budget, "budget")?;
        let prices = data.prices_f64()?;
        let (lower, upper) = share_limits(data, params, budget, &prices)?;

        let price = DVector::from_column_slice(&prices);
        let p_max = prices.iter().copied().fold(0.0, f64::max);
        let dollar_cov = DMatrix::from_diagonal(&price) * data.covariance() * DMatrix::from_diagonal(&price);
        let relaxation = QuadraticProgram::new(
            dollar_cov * (2.0 * gamma / budget_f64),
            -data.returns().component_mul(&price),
        )
        .with_inequality(price.iter().map(|p| p / p_max).collect(), budget_f64 / p_max)
        .with_bounds(lower, upper);

        let solution = self.solver.solve(&MixedIntegerProgram {
            relaxation,
            integer: vec![true; data.len()],
        })?;
        tracing::debug!(
            gamma,
            nodes = solution.nodes,
            dollar_objective = solution.objective,
            "integer MIQP solved"
        );

        let shares = settle(data, to_share_counts(&solution.x)?, budget)?;
        let mut allocation = Allocation::shares(Strategy::IntegerMiqp, shares);
        allocation.risk_aversion = Some(gamma);
        Ok(allocation)
    }
}

// ---------------------------------------------------------------------------
// Share-space helpers shared with the two-stage formulation
// ---------------------------------------------------------------------------

/// Integer share limits `[ceil(l·B/p), floor(u·B/p)]` implied by the weight
/// bounds (unbounded without them), checked for an integer point and for
/// affordability of the required minimum holding.
pub(crate) fn share_limits(
    data: &AssetData,
    params: &OptimizationParameters,
    budget: Money,
    prices: &[f64],
) -> AllocationResult<(Vec<f64>, Vec<f64>)> {
    let n = data.len();
    let Some(bounds) = &params.bounds else {
        return Ok((vec![f64::NEG_INFINITY; n], vec![f64::INFINITY; n]));
    };
    let budget_f64 = money_to_f64(budget, "budget")?;

    let mut lower = Vec::with_capacity(n);
    let mut upper = Vec::with_capacity(n);
    for i in 0..n {
        let lo = (bounds.lower[i] * budget_f64 / prices[i] - SHARE_LIMIT_SLACK).ceil();
        let hi = (bounds.upper[i] * budget_f64 / prices[i] + SHARE_LIMIT_SLACK).floor();
        if lo > hi {
            return Err(AllocationError::Infeasible(format!(
                "no whole number of shares of '{}' lies within its weight bounds",
                data.names[i]
            )));
        }
        lower.push(lo);
        upper.push(hi);
    }

    let mut minimum_cost = Money::ZERO;
    for (lo, price) in lower.iter().zip(&data.prices) {
        minimum_cost += Decimal::from(*lo as i64) * *price;
    }
    if minimum_cost > budget {
        return Err(AllocationError::Infeasible(format!(
            "required minimum holdings cost {} against a budget of {}",
            minimum_cost, budget
        )));
    }
    Ok((lower, upper))
}

/// Integral solver output as share counts.
pub(crate) fn to_share_counts(x: &[f64]) -> AllocationResult<Vec<i64>> {
    x.iter()
        .map(|v| {
            let rounded = v.round();
            if !rounded.is_finite() || rounded.abs() > MAX_SHARES {
                Err(AllocationError::degenerate(format!(
                    "share count {v} is not representable"
                )))
            } else {
                Ok(rounded as i64)
            }
        })
        .collect()
}

/// Enforce `Σ s·p <= budget` in exact decimal arithmetic, shedding shares
/// of the priciest held asset if floating-point feasibility let through a
/// sub-cent overspend.
pub(crate) fn settle(data: &AssetData, mut shares: Vec<i64>, budget: Money) -> AllocationResult<Vec<i64>> {
    let cost = |shares: &[i64]| -> Money {
        shares
            .iter()
            .zip(&data.prices)
            .map(|(s, p)| Decimal::from(*s) * *p)
            .sum()
    };
    let mut spent = cost(&shares);
    while spent > budget {
        let Some(i) = (0..shares.len())
            .filter(|&i| shares[i] > 0)
            .max_by_key(|&i| data.prices[i])
        else {
            return Err(AllocationError::degenerate(format!(
                "integer holding costs {} against a budget of {}",
                spent, budget
            )));
        };
        tracing::warn!(asset = %data.names[i], "dropping one share to stay within budget");
        shares[i] -= 1;
        spent = cost(&shares);
    }
    Ok(shares)
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::metrics::{return_and_risk, sharpe_ratio, PortfolioMetrics};
use super::rounding::{round_allocations, RoundingPolicy};
use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::strategies::{Allocation, Holding};
use crate::types::{f64_to_money, money_to_f64, Money};
use crate::AllocationResult;

/// Holding derived from a weight or share vector against a budget.
///
/// Never mutated in place: every change of weights or shares produces a
/// fresh state, so value, deficit and weights always agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub weights: Vec<f64>,
    pub allocations: Vec<Money>,
    pub shares: Vec<Decimal>,
    pub value: Money,
    pub budget: Money,
    /// `value - budget`; positive means overspend.
    pub deficit: Money,
}

/// One row of the position table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub name: String,
    pub weight: f64,
    pub allocation: Money,
    pub shares: Decimal,
}

impl PortfolioState {
    /// State for a weight vector, optionally rounded to whole shares.
    ///
    /// Without rounding the weights are kept as given. With rounding the
    /// allocations are recomputed from the whole-share counts and the
    /// weights redefined as allocation / value.
    pub fn from_weights(
        data: &AssetData,
        weights: &[f64],
        budget: Money,
        rounding: RoundingPolicy,
    ) -> AllocationResult<Self> {
        check_budget(budget)?;
        if weights.len() != data.len() {
            return Err(AllocationError::invalid(
                "weights",
                format!("Expected {} weights but got {}", data.len(), weights.len()),
            ));
        }

        let mut allocations = Vec::with_capacity(weights.len());
        for w in weights {
            allocations.push(f64_to_money(*w, "weights")? * budget);
        }

        let held = round_allocations(&allocations, &data.prices, rounding)?;
        let weights = if rounding.is_discrete() {
            normalize(&held.allocations, held.value)?
        } else {
            weights.to_vec()
        };

        Ok(PortfolioState {
            weights,
            allocations: held.allocations,
            shares: held.shares,
            value: held.value,
            budget,
            deficit: held.value - budget,
        })
    }

    /// State for whole-share counts; weights are allocation / value.
    pub fn from_shares(data: &AssetData, shares: &[i64], budget: Money) -> AllocationResult<Self> {
        check_budget(budget)?;
        if shares.len() != data.len() {
            return Err(AllocationError::invalid(
                "shares",
                format!("Expected {} share counts but got {}", data.len(), shares.len()),
            ));
        }
        let shares: Vec<Decimal> = shares.iter().map(|s| Decimal::from(*s)).collect();
        let allocations: Vec<Money> = shares
            .iter()
            .zip(&data.prices)
            .map(|(s, p)| *s * *p)
            .collect();
        let value: Money = allocations.iter().copied().sum();
        Ok(PortfolioState {
            weights: normalize(&allocations, value)?,
            allocations,
            shares,
            value,
            budget,
            deficit: value - budget,
        })
    }

    /// State for a strategy result. Share holdings are already discrete, so
    /// the rounding policy only applies to weight holdings.
    pub fn from_allocation(
        data: &AssetData,
        allocation: &Allocation,
        budget: Money,
        rounding: RoundingPolicy,
    ) -> AllocationResult<Self> {
        match &allocation.holding {
            Holding::Weights { weights } => Self::from_weights(data, weights, budget, rounding),
            Holding::Shares { shares } => Self::from_shares(data, shares, budget),
        }
    }

    pub fn positions(&self, data: &AssetData) -> Vec<Position> {
        data.names
            .iter()
            .zip(&self.weights)
            .zip(self.allocations.iter().zip(&self.shares))
            .map(|((name, weight), (allocation, shares))| Position {
                name: name.clone(),
                weight: *weight,
                allocation: *allocation,
                shares: *shares,
            })
            .collect()
    }

    pub fn metrics(&self, data: &AssetData, annualization: f64) -> AllocationResult<PortfolioMetrics> {
        let (expected_return, standard_deviation) =
            return_and_risk(data, &self.weights, annualization)?;
        Ok(PortfolioMetrics {
            expected_return,
            standard_deviation,
            sharpe: sharpe_ratio(expected_return, standard_deviation)?,
            value: self.value,
            deficit: self.deficit,
        })
    }

    /// Cash left over as a fraction of the budget (negative when overspent).
    pub fn residual_cash_ratio(&self) -> AllocationResult<f64> {
        money_to_f64(-self.deficit / self.budget, "residual cash")
    }
}

fn check_budget(budget: Money) -> AllocationResult<()> {
    if budget <= Money::ZERO {
        return Err(AllocationError::invalid(
            "budget",
            format!("Budget must be positive, got {}", budget),
        ));
    }
    Ok(())
}

/// allocation / value per asset; an empty holding reports zero weights.
fn normalize(allocations: &[Money], value: Money) -> AllocationResult<Vec<f64>> {
    if value.is_zero() {
        return Ok(vec![0.0; allocations.len()]);
    }
    allocations
        .iter()
        .map(|a| money_to_f64(*a / value, "weights"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn data() -> AssetData {
        AssetData::new(
            vec!["AAA".into(), "BBB".into(), "CCC".into()],
            vec![dec!(100), dec!(30), dec!(7)],
            vec![0.01, 0.02, 0.015],
            vec![
                vec![0.0004, 0.0, 0.0],
                vec![0.0, 0.0009, 0.0],
                vec![0.0, 0.0, 0.0001],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_continuous_state_keeps_weights() {
        let state =
            PortfolioState::from_weights(&data(), &[0.5, 0.3, 0.2], dec!(1000), RoundingPolicy::None)
                .unwrap();
        assert_eq!(state.weights, vec![0.5, 0.3, 0.2]);
        assert_eq!(state.allocations, vec![dec!(500), dec!(300), dec!(200)]);
        assert_eq!(state.shares[0], dec!(5));
        assert_eq!(state.shares[1], dec!(10));
        assert_eq!(state.value, dec!(1000));
        assert_eq!(state.deficit, Decimal::ZERO);
    }

    #[test]
    fn test_ceiling_overspend_is_positive_deficit() {
        let state = PortfolioState::from_weights(
            &data(),
            &[0.5, 0.3, 0.2],
            dec!(1000),
            RoundingPolicy::Ceiling,
        )
        .unwrap();
        // 500/100 = 5, 300/30 = 10, 200/7 = 28.57 -> 29
        assert_eq!(state.shares, vec![dec!(5), dec!(10), dec!(29)]);
        assert_eq!(state.value, dec!(1003));
        assert_eq!(state.deficit, dec!(3));
        assert_relative_eq!(state.weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(state.residual_cash_ratio().unwrap() < 0.0);
    }

    #[test]
    fn test_floor_leaves_cash() {
        let state =
            PortfolioState::from_weights(&data(), &[0.5, 0.3, 0.2], dec!(1000), RoundingPolicy::Floor)
                .unwrap();
        assert_eq!(state.value, dec!(996));
        assert_eq!(state.deficit, dec!(-4));
    }

    #[test]
    fn test_empty_share_holding_has_zero_weights() {
        let state = PortfolioState::from_shares(&data(), &[0, 0, 0], dec!(50)).unwrap();
        assert_eq!(state.weights, vec![0.0, 0.0, 0.0]);
        assert_eq!(state.deficit, dec!(-50));
        assert!(matches!(
            state.metrics(&data(), 252.0),
            Err(AllocationError::NumericalDegenerate { .. })
        ));
    }

    #[test]
    fn test_positions_table() {
        let state = PortfolioState::from_shares(&data(), &[1, 0, 10], dec!(200)).unwrap();
        let rows = state.positions(&data());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].name, "CCC");
        assert_eq!(rows[2].allocation, dec!(70));
        assert_relative_eq!(rows[0].weight, 100.0 / 170.0, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_budget_rejected() {
        let err = PortfolioState::from_shares(&data(), &[1, 1, 1], dec!(0)).unwrap_err();
        assert!(matches!(err, AllocationError::InvalidParameter { .. }));
    }
}

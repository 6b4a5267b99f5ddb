use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AllocationError;
use crate::types::Money;
use crate::AllocationResult;

/// Post-hoc conversion of continuous shares into whole shares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Keep fractional shares.
    #[default]
    None,
    #[serde(alias = "ceil")]
    Ceiling,
    Floor,
    /// Half away from zero.
    #[serde(alias = "mid")]
    Nearest,
}

impl RoundingPolicy {
    pub fn is_discrete(self) -> bool {
        !matches!(self, RoundingPolicy::None)
    }

    /// Apply the policy to one share count.
    pub fn apply(self, shares: Decimal) -> Decimal {
        match self {
            RoundingPolicy::None => shares,
            RoundingPolicy::Ceiling => shares.ceil(),
            RoundingPolicy::Floor => shares.floor(),
            RoundingPolicy::Nearest => {
                shares.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            }
        }
    }
}

impl fmt::Display for RoundingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundingPolicy::None => "none",
            RoundingPolicy::Ceiling => "ceiling",
            RoundingPolicy::Floor => "floor",
            RoundingPolicy::Nearest => "nearest",
        };
        f.write_str(s)
    }
}

impl FromStr for RoundingPolicy {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(RoundingPolicy::None),
            "ceiling" | "ceil" => Ok(RoundingPolicy::Ceiling),
            "floor" => Ok(RoundingPolicy::Floor),
            "nearest" | "mid" => Ok(RoundingPolicy::Nearest),
            other => Err(AllocationError::invalid(
                "rounding",
                format!("Unknown rounding policy '{}'", other),
            )),
        }
    }
}

/// Shares, allocations and value after rounding, reconciled against prices.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundedHolding {
    pub shares: Vec<Decimal>,
    pub allocations: Vec<Money>,
    pub value: Money,
}

/// Round continuous shares (`allocation / price`) and recompute the cash
/// ledger from the rounded counts.
pub fn round_allocations(
    allocations: &[Money],
    prices: &[Money],
    policy: RoundingPolicy,
) -> AllocationResult<RoundedHolding> {
    if allocations.len() != prices.len() {
        return Err(AllocationError::invalid(
            "allocations",
            format!(
                "Expected {} allocations but got {}",
                prices.len(),
                allocations.len()
            ),
        ));
    }
    let mut shares = Vec::with_capacity(prices.len());
    let mut realized = Vec::with_capacity(prices.len());
    for (allocation, price) in allocations.iter().zip(prices) {
        if *price <= Decimal::ZERO {
            return Err(AllocationError::invalid("prices", "Prices must be positive"));
        }
        let continuous = allocation
            .checked_div(*price)
            .ok_or_else(|| AllocationError::degenerate("share count overflow"))?;
        let rounded = policy.apply(continuous);
        let cost = if policy.is_discrete() {
            rounded * *price
        } else {
            *allocation
        };
        shares.push(rounded);
        realized.push(cost);
    }
    let value = realized.iter().copied().sum();
    Ok(RoundedHolding {
        shares,
        allocations: realized,
        value,
    })
}

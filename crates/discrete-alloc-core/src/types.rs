use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AllocationError;
use crate::AllocationResult;

/// All monetary values (prices, budgets, allocations). Wraps Decimal so the
/// cash ledger is exact.
pub type Money = Decimal;

/// Statistical quantities (weights, returns, covariances) stay in f64.
pub type Weight = f64;

/// Standard computation output envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationOutput<T: Serialize> {
    pub result: T,
    pub methodology: String,
    pub assumptions: serde_json::Value,
    pub warnings: Vec<String>,
    pub metadata: ComputationMetadata,
}

/// Metadata for every computation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationMetadata {
    pub version: String,
    pub computation_time_us: u64,
    pub precision: String,
}

/// Helper to wrap computation results with metadata
pub fn with_metadata<T: Serialize>(
    methodology: &str,
    assumptions: &impl Serialize,
    warnings: Vec<String>,
    elapsed_us: u64,
    result: T,
) -> ComputationOutput<T> {
    ComputationOutput {
        result,
        methodology: methodology.to_string(),
        assumptions: serde_json::to_value(assumptions).unwrap_or_default(),
        warnings,
        metadata: ComputationMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            computation_time_us: elapsed_us,
            precision: "ieee754_f64+rust_decimal_128bit".to_string(),
        },
    }
}

/// Convert a money amount into solver space.
pub(crate) fn money_to_f64(value: Money, context: &str) -> AllocationResult<f64> {
    value
        .to_f64()
        .ok_or_else(|| AllocationError::degenerate(format!("{context}: {value} has no f64 form")))
}

/// Convert a solver-space value back into money. NaN and infinities are rejected.
pub(crate) fn f64_to_money(value: f64, context: &str) -> AllocationResult<Money> {
    if !value.is_finite() {
        return Err(AllocationError::degenerate(format!(
            "{context}: non-finite value {value}"
        )));
    }
    Decimal::from_f64(value)
        .ok_or_else(|| AllocationError::degenerate(format!("{context}: {value} out of range")))
}

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::types::Money;
use crate::AllocationResult;

/// Standard deviation under which the Sharpe ratio is undefined.
pub const MIN_STANDARD_DEVIATION: f64 = 1e-12;

/// Annualized return/risk summary of a weight vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub expected_return: f64,
    pub standard_deviation: f64,
    pub sharpe: f64,
    pub value: Money,
    /// `value - budget`; positive means overspend.
    pub deficit: Money,
}

/// Annualized (expected return, standard deviation) of `weights`.
pub fn return_and_risk(
    data: &AssetData,
    weights: &[f64],
    annualization: f64,
) -> AllocationResult<(f64, f64)> {
    if weights.len() != data.len() {
        return Err(AllocationError::invalid(
            "weights",
            format!("Expected {} weights but got {}", data.len(), weights.len()),
        ));
    }
    let w = DVector::from_column_slice(weights);
    let expected_return = data.returns().dot(&w) * annualization;
    let variance = w.dot(&(data.covariance() * &w));
    // Round-off on a PSD matrix can leave a tiny negative variance.
    let standard_deviation = variance.max(0.0).sqrt() * annualization.sqrt();
    Ok((expected_return, standard_deviation))
}

pub fn sharpe_ratio(expected_return: f64, standard_deviation: f64) -> AllocationResult<f64> {
    if !(standard_deviation > MIN_STANDARD_DEVIATION) {
        return Err(AllocationError::degenerate(format!(
            "portfolio standard deviation {standard_deviation:e} leaves the Sharpe ratio undefined"
        )));
    }
    let sharpe = expected_return / standard_deviation;
    if !sharpe.is_finite() {
        return Err(AllocationError::degenerate("Sharpe ratio is not finite"));
    }
    Ok(sharpe)
}

/// Annualized Sharpe ratio of `weights`.
pub fn weights_sharpe(data: &AssetData, weights: &[f64], annualization: f64) -> AllocationResult<f64> {
    let (er, sd) = return_and_risk(data, weights, annualization)?;
    sharpe_ratio(er, sd)
}

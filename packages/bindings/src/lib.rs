use napi::Result as NapiResult;
use napi_derive::napi;

use discrete_alloc_core::{EvaluationRequest, OptimizationRequest, Strategy};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

#[napi]
pub fn optimize(input_json: String) -> NapiResult<String> {
    let input: OptimizationRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = discrete_alloc_core::optimize_portfolio(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn evaluate(input_json: String) -> NapiResult<String> {
    let input: EvaluationRequest = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = discrete_alloc_core::evaluate_portfolio(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

/// Names accepted in the `strategy` field of an optimization request.
#[napi]
pub fn list_strategies() -> Vec<String> {
    Strategy::ALL.iter().map(|s| s.name().to_string()).collect()
}

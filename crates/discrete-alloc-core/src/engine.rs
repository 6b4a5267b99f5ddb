use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::portfolio::{PortfolioMetrics, PortfolioState, Position, RoundingPolicy};
use crate::solvers::SolverSuite;
use crate::strategies::{
    optimize_with, Allocation, FrontierTrace, Holding, OptimizationParameters, Strategy,
};
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::AllocationResult;

/// Weight above which a position is reported as concentrated.
const CONCENTRATION_THRESHOLD: f64 = 0.40;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A complete optimization job as read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub assets: AssetData,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub parameters: OptimizationParameters,
}

/// Holding, derived state and metrics for one optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationReport {
    pub strategy: Strategy,
    pub risk_aversion: Option<f64>,
    pub positions: Vec<Position>,
    pub state: PortfolioState,
    /// Absent when the holding has no risk (e.g. an empty integer holding).
    pub metrics: Option<PortfolioMetrics>,
    /// Continuous target of a two-stage discretization.
    pub target_weights: Option<Vec<f64>>,
    pub frontier: Option<FrontierTrace>,
}

/// State and metrics of a caller-supplied holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub assets: AssetData,
    pub holding: Holding,
    pub budget: Money,
    #[serde(default = "default_annualization")]
    pub annualization: f64,
    #[serde(default)]
    pub rounding: RoundingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub positions: Vec<Position>,
    pub state: PortfolioState,
    pub metrics: Option<PortfolioMetrics>,
}

fn default_annualization() -> f64 {
    252.0
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run the requested strategy and derive the resulting portfolio.
pub fn optimize_portfolio(
    request: &OptimizationRequest,
) -> AllocationResult<ComputationOutput<AllocationReport>> {
    let params = &request.parameters;
    optimize_portfolio_with(&SolverSuite::from_settings(&params.solver), request)
}

/// As [`optimize_portfolio`], with caller-supplied solver backends.
pub fn optimize_portfolio_with(
    solvers: &SolverSuite,
    request: &OptimizationRequest,
) -> AllocationResult<ComputationOutput<AllocationReport>> {
    let start = Instant::now();
    let data = &request.assets;
    let params = &request.parameters;
    let strategy = request.strategy;
    let budget = params.required_budget()?;

    let allocation = optimize_with(solvers, strategy, data, params)?;
    let state = PortfolioState::from_allocation(data, &allocation, budget, params.rounding)?;

    let mut warnings = Vec::new();
    if strategy.is_discrete() && params.rounding.is_discrete() {
        warnings.push(format!(
            "Rounding policy '{}' ignored: {} already holds whole shares",
            params.rounding, strategy
        ));
    }
    if params.bounds.is_some()
        && matches!(strategy, Strategy::NonlinearSharpe | Strategy::TwoStageSharpe)
    {
        warnings.push("Weight bounds ignored by the Sharpe formulation".to_string());
    }
    if data.spectrum().is_near_singular() {
        warnings.push("Covariance matrix is near-singular".to_string());
    }
    if let Some(trace) = &allocation.frontier {
        if !trace.converged {
            warnings.push(format!(
                "Frontier search stopped after {} iterations without converging",
                trace.iterations
            ));
        }
    }
    let metrics = metrics_or_warn(&state, data, params.annualization, &mut warnings)?;
    holding_warnings(data, &state, &mut warnings)?;

    let report = build_report(data, allocation, state, metrics);
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        strategy.methodology(),
        &serde_json::json!({
            "strategy": strategy,
            "n_assets": data.len(),
            "risk_aversion": params.risk_aversion,
            "budget": budget.to_string(),
            "rounding": params.rounding,
            "scale_weights": params.scale_weights,
            "bounded": params.bounds.is_some(),
            "annualization": params.annualization,
            "frontier": params.frontier,
            "solver": params.solver,
        }),
        warnings,
        elapsed,
        report,
    ))
}

/// Derive state and metrics for a given weight or share holding.
pub fn evaluate_portfolio(
    request: &EvaluationRequest,
) -> AllocationResult<ComputationOutput<EvaluationReport>> {
    let start = Instant::now();
    let data = &request.assets;
    data.validate()?;
    if !(request.annualization > 0.0) || !request.annualization.is_finite() {
        return Err(AllocationError::invalid(
            "annualization",
            "Must be a positive number of periods",
        ));
    }

    let state = match &request.holding {
        Holding::Weights { weights } => {
            PortfolioState::from_weights(data, weights, request.budget, request.rounding)?
        }
        Holding::Shares { shares } => PortfolioState::from_shares(data, shares, request.budget)?,
    };

    let mut warnings = Vec::new();
    let metrics = metrics_or_warn(&state, data, request.annualization, &mut warnings)?;
    holding_warnings(data, &state, &mut warnings)?;

    let report = EvaluationReport {
        positions: state.positions(data),
        state,
        metrics,
    };
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "Portfolio evaluation",
        &serde_json::json!({
            "n_assets": data.len(),
            "budget": request.budget.to_string(),
            "annualization": request.annualization,
            "rounding": request.rounding,
        }),
        warnings,
        elapsed,
        report,
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_report(
    data: &AssetData,
    allocation: Allocation,
    state: PortfolioState,
    metrics: Option<PortfolioMetrics>,
) -> AllocationReport {
    AllocationReport {
        strategy: allocation.strategy,
        risk_aversion: allocation.risk_aversion,
        positions: state.positions(data),
        state,
        metrics,
        target_weights: allocation.target_weights,
        frontier: allocation.frontier,
    }
}

fn metrics_or_warn(
    state: &PortfolioState,
    data: &AssetData,
    annualization: f64,
    warnings: &mut Vec<String>,
) -> AllocationResult<Option<PortfolioMetrics>> {
    match state.metrics(data, annualization) {
        Ok(m) => Ok(Some(m)),
        Err(AllocationError::NumericalDegenerate { context }) => {
            warnings.push(format!("Metrics undefined: {}", context));
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn holding_warnings(
    data: &AssetData,
    state: &PortfolioState,
    warnings: &mut Vec<String>,
) -> AllocationResult<()> {
    for (name, w) in data.names.iter().zip(&state.weights) {
        if w.abs() > CONCENTRATION_THRESHOLD {
            warnings.push(format!("Concentrated position: {} has weight {:.4}", name, w));
        }
        if *w < 0.0 {
            warnings.push(format!("Short position: {} has weight {:.4}", name, w));
        }
    }
    if state.deficit > Money::ZERO {
        warnings.push(format!("Holding overspends the budget by {}", state.deficit));
    }
    if -state.deficit > state.budget * dec!(0.01) {
        warnings.push(format!(
            "Residual cash: {:.2}% of the budget is uninvested",
            state.residual_cash_ratio()? * 100.0
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use clap::Args;
use discrete_alloc_core::{optimize_portfolio, OptimizationRequest, RoundingPolicy, Strategy};
use rust_decimal::Decimal;
use serde_json::Value;

/// Arguments for portfolio optimization
#[derive(Args)]
pub struct OptimizeArgs {
    /// Path to a JSON optimization request (assets, strategy, parameters)
    #[arg(long)]
    pub input: Option<String>,

    /// Strategy: qp, slsqp, miqp, two-stage-qp, two-stage-sharpe, frontier-qp, frontier-miqp
    #[arg(long)]
    pub strategy: Option<Strategy>,

    /// Risk-aversion coefficient (overrides the request)
    #[arg(long)]
    pub gamma: Option<f64>,

    /// Cash budget in currency units (overrides the request)
    #[arg(long)]
    pub budget: Option<Decimal>,

    /// Whole-share rounding for weight strategies: none, ceiling, floor, nearest
    #[arg(long)]
    pub rounding: Option<RoundingPolicy>,
}

pub fn run_optimize(args: OptimizeArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut request: OptimizationRequest = super::read_request(args.input.as_deref())?;

    if let Some(strategy) = args.strategy {
        request.strategy = strategy;
    }
    if let Some(gamma) = args.gamma {
        request.parameters.risk_aversion = gamma;
    }
    if let Some(budget) = args.budget {
        request.parameters.budget = Some(budget);
    }
    if let Some(rounding) = args.rounding {
        request.parameters.rounding = rounding;
    }

    tracing::debug!(
        strategy = %request.strategy,
        n_assets = request.assets.len(),
        "dispatching optimization request"
    );
    let result = optimize_portfolio(&request)?;
    Ok(serde_json::to_value(result)?)
}

use clap::Args;
use discrete_alloc_core::{evaluate_portfolio, EvaluationRequest};
use serde_json::Value;

/// Arguments for evaluating an existing holding
#[derive(Args)]
pub struct EvaluateArgs {
    /// Path to a JSON evaluation request (assets, holding, budget)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_evaluate(args: EvaluateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let request: EvaluationRequest = super::read_request(args.input.as_deref())?;
    let result = evaluate_portfolio(&request)?;
    Ok(serde_json::to_value(result)?)
}

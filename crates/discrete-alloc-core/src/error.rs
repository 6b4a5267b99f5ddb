use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Invalid parameter: {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("Infeasible: {0}")]
    Infeasible(String),

    #[error("Unbounded: {0}")]
    Unbounded(String),

    #[error("Non-convergence: {solver} stopped after {iterations} iterations (delta: {last_delta:e})")]
    SolverNonConvergence {
        solver: String,
        iterations: u32,
        /// Objective change of the last step, or the duality gap for
        /// interior-point backends.
        last_delta: f64,
    },

    #[error("Numerically degenerate: {context}")]
    NumericalDegenerate { context: String },

    #[error("Solver timeout: {solver} exhausted its {limit}")]
    SolverTimeout { solver: String, limit: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AllocationError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        AllocationError::InvalidParameter {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn degenerate(context: impl Into<String>) -> Self {
        AllocationError::NumericalDegenerate {
            context: context.into(),
        }
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::Serialization(e.to_string())
    }
}

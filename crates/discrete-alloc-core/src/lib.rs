pub mod assets;
pub mod engine;
pub mod error;
pub mod portfolio;
pub mod solvers;
pub mod strategies;
pub mod types;

pub use assets::AssetData;
pub use engine::{
    evaluate_portfolio, optimize_portfolio, optimize_portfolio_with, AllocationReport,
    EvaluationReport, EvaluationRequest, OptimizationRequest,
};
pub use error::AllocationError;
pub use portfolio::{PortfolioMetrics, PortfolioState, RoundingPolicy};
pub use strategies::{
    optimize, optimize_with, Allocation, Holding, OptimizationParameters, Strategy, WeightBounds,
};
pub use types::*;

/// Standard result type for all allocation operations
pub type AllocationResult<T> = Result<T, AllocationError>;

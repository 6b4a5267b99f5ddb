pub mod metrics;
pub mod rounding;
pub mod state;

pub use metrics::{sharpe_ratio, weights_sharpe, PortfolioMetrics};
pub use rounding::{round_allocations, RoundedHolding, RoundingPolicy};
pub use state::{PortfolioState, Position};

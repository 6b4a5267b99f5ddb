//! Formulation strategies: each turns an asset snapshot and parameters into
//! a weight or share vector through one solver capability.

pub mod continuous_qp;
pub mod frontier;
pub mod integer_miqp;
pub mod nonlinear_sharpe;
pub mod two_stage;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::portfolio::RoundingPolicy;
use crate::solvers::{SolverSettings, SolverSuite};
use crate::types::{money_to_f64, Money};
use crate::AllocationResult;

pub use continuous_qp::ContinuousQp;
pub use frontier::{FrontierSearch, FrontierSettings, FrontierStep, FrontierTrace};
pub use integer_miqp::IntegerMiqp;
pub use nonlinear_sharpe::NonlinearSharpe;
pub use two_stage::TwoStage;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-asset weight limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl WeightBounds {
    pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
        WeightBounds {
            lower: vec![lower; n],
            upper: vec![upper; n],
        }
    }

    /// No short positions, no position above the whole budget.
    pub fn long_only(n: usize) -> Self {
        WeightBounds::uniform(n, 0.0, 1.0)
    }

    /// Gross exposure per asset within one budget, long or short.
    pub fn leveraged(n: usize) -> Self {
        WeightBounds::uniform(n, -1.0, 1.0)
    }

    fn validate(&self, n: usize) -> AllocationResult<()> {
        if self.lower.len() != n || self.upper.len() != n {
            return Err(AllocationError::invalid(
                "bounds",
                format!(
                    "Expected {} lower and upper bounds, got {} and {}",
                    n,
                    self.lower.len(),
                    self.upper.len()
                ),
            ));
        }
        if self
            .lower
            .iter()
            .chain(self.upper.iter())
            .any(|b| !b.is_finite())
        {
            return Err(AllocationError::invalid("bounds", "Bounds must be finite"));
        }
        Ok(())
    }

    /// Per-asset `lower <= upper` and `Σlower <= 1 <= Σupper`.
    pub(crate) fn check_budget_plane(&self) -> AllocationResult<()> {
        for (i, (l, u)) in self.lower.iter().zip(&self.upper).enumerate() {
            if l > u {
                return Err(AllocationError::Infeasible(format!(
                    "bounds of asset {} are crossed: {} > {}",
                    i, l, u
                )));
            }
        }
        let lower: f64 = self.lower.iter().sum();
        let upper: f64 = self.upper.iter().sum();
        if lower > 1.0 || upper < 1.0 {
            return Err(AllocationError::Infeasible(format!(
                "weights cannot sum to 1 within bounds (sum of lower {}, sum of upper {})",
                lower, upper
            )));
        }
        Ok(())
    }
}

/// Tunables shared by every strategy. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationParameters {
    /// Risk aversion γ in `μ·w − γ·wᵀΣw`.
    pub risk_aversion: f64,
    /// Cash to invest; required by every discrete strategy.
    pub budget: Option<Money>,
    pub bounds: Option<WeightBounds>,
    /// Starting point for the nonlinear solver (equal weights when absent).
    pub initial_weights: Option<Vec<f64>>,
    /// Post-hoc rounding of continuous results into whole shares.
    pub rounding: RoundingPolicy,
    /// Rescale continuous QP weights by their sum.
    pub scale_weights: bool,
    /// Periods per year for annualized metrics.
    pub annualization: f64,
    pub frontier: FrontierSettings,
    pub solver: SolverSettings,
}

impl Default for OptimizationParameters {
    fn default() -> Self {
        OptimizationParameters {
            risk_aversion: 2.0,
            budget: None,
            bounds: None,
            initial_weights: None,
            rounding: RoundingPolicy::None,
            scale_weights: true,
            annualization: 252.0,
            frontier: FrontierSettings::default(),
            solver: SolverSettings::default(),
        }
    }
}

impl OptimizationParameters {
    /// Shape checks that hold for every strategy. Strategy-specific checks
    /// (γ > 0, budget presence) happen in the strategy before any solve.
    pub fn validate(&self, data: &AssetData) -> AllocationResult<()> {
        let n = data.len();
        if !(self.annualization > 0.0) || !self.annualization.is_finite() {
            return Err(AllocationError::invalid(
                "annualization",
                "Must be a positive number of periods",
            ));
        }
        if let Some(budget) = self.budget {
            if budget <= Money::ZERO {
                return Err(AllocationError::invalid(
                    "budget",
                    format!("Budget must be positive, got {}", budget),
                ));
            }
        }
        if let Some(bounds) = &self.bounds {
            bounds.validate(n)?;
        }
        if let Some(w0) = &self.initial_weights {
            if w0.len() != n {
                return Err(AllocationError::invalid(
                    "initial_weights",
                    format!("Expected {} weights but got {}", n, w0.len()),
                ));
            }
            if w0.iter().any(|w| !w.is_finite()) {
                return Err(AllocationError::invalid(
                    "initial_weights",
                    "Weights must be finite",
                ));
            }
        }
        self.frontier.validate()?;
        self.solver.validate()
    }

    /// γ check for the mean-variance formulations.
    pub(crate) fn checked_risk_aversion(&self) -> AllocationResult<f64> {
        let gamma = self.risk_aversion;
        if !gamma.is_finite() || gamma <= 0.0 {
            return Err(AllocationError::invalid(
                "risk_aversion",
                format!("Must be finite and greater than zero, got {}", gamma),
            ));
        }
        Ok(gamma)
    }

    pub(crate) fn required_budget(&self) -> AllocationResult<Money> {
        self.budget.ok_or_else(|| {
            AllocationError::invalid("budget", "A budget is required to buy whole shares")
        })
    }

    pub(crate) fn with_risk_aversion(&self, gamma: f64) -> Self {
        OptimizationParameters {
            risk_aversion: gamma,
            ..self.clone()
        }
    }
}

/// The closed set of solving strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Mean-variance QP on the budget plane.
    #[default]
    #[serde(alias = "qp")]
    ContinuousQp,
    /// Sharpe-ratio maximization by SQP.
    #[serde(alias = "slsqp")]
    NonlinearSharpe,
    /// Mean-variance over whole shares.
    #[serde(alias = "miqp")]
    IntegerMiqp,
    /// Continuous QP target, then integer least-squares.
    TwoStageQp,
    /// Sharpe target, then integer least-squares.
    #[serde(alias = "two_stage_slsqp")]
    TwoStageSharpe,
    /// Bisection over γ around the continuous QP.
    #[serde(alias = "iter_qp")]
    FrontierQp,
    /// Bisection over γ around the integer MIQP.
    #[serde(alias = "iter_miqp")]
    FrontierMiqp,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::ContinuousQp,
        Strategy::NonlinearSharpe,
        Strategy::IntegerMiqp,
        Strategy::TwoStageQp,
        Strategy::TwoStageSharpe,
        Strategy::FrontierQp,
        Strategy::FrontierMiqp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::ContinuousQp => "continuous_qp",
            Strategy::NonlinearSharpe => "nonlinear_sharpe",
            Strategy::IntegerMiqp => "integer_miqp",
            Strategy::TwoStageQp => "two_stage_qp",
            Strategy::TwoStageSharpe => "two_stage_sharpe",
            Strategy::FrontierQp => "frontier_qp",
            Strategy::FrontierMiqp => "frontier_miqp",
        }
    }

    /// Strategies whose result is already a whole-share holding.
    pub fn is_discrete(self) -> bool {
        matches!(
            self,
            Strategy::IntegerMiqp
                | Strategy::TwoStageQp
                | Strategy::TwoStageSharpe
                | Strategy::FrontierMiqp
        )
    }

    pub fn methodology(self) -> &'static str {
        match self {
            Strategy::ContinuousQp => "Mean-variance quadratic program (interior point)",
            Strategy::NonlinearSharpe => "Maximum Sharpe ratio via sequential quadratic programming",
            Strategy::IntegerMiqp => "Mean-variance over integer shares (branch-and-bound)",
            Strategy::TwoStageQp => {
                "Mean-variance target discretized by integer least squares"
            }
            Strategy::TwoStageSharpe => {
                "Maximum Sharpe target discretized by integer least squares"
            }
            Strategy::FrontierQp => "Bisection over risk aversion, continuous mean-variance",
            Strategy::FrontierMiqp => "Bisection over risk aversion, integer mean-variance",
        }
    }

    /// The formulation implementing this strategy over `solvers`.
    pub fn formulation(self, solvers: &SolverSuite) -> Box<dyn Formulation> {
        match self {
            Strategy::ContinuousQp => Box::new(ContinuousQp::new(solvers.quadratic.clone())),
            Strategy::NonlinearSharpe => {
                Box::new(NonlinearSharpe::new(solvers.nonlinear.clone()))
            }
            Strategy::IntegerMiqp => Box::new(IntegerMiqp::new(solvers.mixed_integer.clone())),
            Strategy::TwoStageQp => Box::new(TwoStage::new(
                Strategy::TwoStageQp,
                Box::new(ContinuousQp::new(solvers.quadratic.clone())),
                solvers.mixed_integer.clone(),
            )),
            Strategy::TwoStageSharpe => Box::new(TwoStage::new(
                Strategy::TwoStageSharpe,
                Box::new(NonlinearSharpe::new(solvers.nonlinear.clone())),
                solvers.mixed_integer.clone(),
            )),
            Strategy::FrontierQp => Box::new(FrontierSearch::new(
                Strategy::FrontierQp,
                Box::new(ContinuousQp::new(solvers.quadratic.clone())),
            )),
            Strategy::FrontierMiqp => Box::new(FrontierSearch::new(
                Strategy::FrontierMiqp,
                Box::new(IntegerMiqp::new(solvers.mixed_integer.clone())),
            )),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        let strategy = match key.as_str() {
            "continuous_qp" | "qp" => Strategy::ContinuousQp,
            "nonlinear_sharpe" | "slsqp" => Strategy::NonlinearSharpe,
            "integer_miqp" | "miqp" => Strategy::IntegerMiqp,
            "two_stage_qp" => Strategy::TwoStageQp,
            "two_stage_sharpe" | "two_stage_slsqp" => Strategy::TwoStageSharpe,
            "frontier_qp" | "iter_qp" => Strategy::FrontierQp,
            "frontier_miqp" | "iter_miqp" => Strategy::FrontierMiqp,
            _ => {
                return Err(AllocationError::invalid(
                    "strategy",
                    format!("Unknown strategy '{}'", s),
                ))
            }
        };
        Ok(strategy)
    }
}

/// What a strategy holds: continuous weights or whole shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Holding {
    Weights { weights: Vec<f64> },
    Shares { shares: Vec<i64> },
}

/// Immutable result of one strategy invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub strategy: Strategy,
    pub holding: Holding,
    /// γ that produced the holding, for the mean-variance formulations.
    pub risk_aversion: Option<f64>,
    /// Continuous target of a two-stage discretization.
    pub target_weights: Option<Vec<f64>>,
    pub frontier: Option<FrontierTrace>,
}

impl Allocation {
    pub(crate) fn weights(strategy: Strategy, weights: Vec<f64>) -> Self {
        Allocation {
            strategy,
            holding: Holding::Weights { weights },
            risk_aversion: None,
            target_weights: None,
            frontier: None,
        }
    }

    pub(crate) fn shares(strategy: Strategy, shares: Vec<i64>) -> Self {
        Allocation {
            strategy,
            holding: Holding::Shares { shares },
            risk_aversion: None,
            target_weights: None,
            frontier: None,
        }
    }

    /// Weights actually held: as given for weight holdings, share value over
    /// total value for share holdings (zeros for an empty holding).
    pub fn realized_weights(&self, data: &AssetData) -> AllocationResult<Vec<f64>> {
        match &self.holding {
            Holding::Weights { weights } => Ok(weights.clone()),
            Holding::Shares { shares } => {
                let values: Vec<Money> = shares
                    .iter()
                    .zip(&data.prices)
                    .map(|(s, p)| Money::from(*s) * *p)
                    .collect();
                let total: Money = values.iter().copied().sum();
                if total.is_zero() {
                    return Ok(vec![0.0; values.len()]);
                }
                values
                    .iter()
                    .map(|v| money_to_f64(*v / total, "weights"))
                    .collect()
            }
        }
    }
}

/// A formulation of the allocation problem over one solver capability.
pub trait Formulation: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn solve(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
    ) -> AllocationResult<Allocation>;
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run `strategy` with the default solver backends configured from
/// `params.solver`.
pub fn optimize(
    strategy: Strategy,
    data: &AssetData,
    params: &OptimizationParameters,
) -> AllocationResult<Allocation> {
    optimize_with(&SolverSuite::from_settings(&params.solver), strategy, data, params)
}

/// Run `strategy` with caller-supplied backends.
pub fn optimize_with(
    solvers: &SolverSuite,
    strategy: Strategy,
    data: &AssetData,
    params: &OptimizationParameters,
) -> AllocationResult<Allocation> {
    data.validate()?;
    params.validate(data)?;
    let span = tracing::info_span!("optimize", %strategy, assets = data.len());
    let _guard = span.enter();
    let allocation = strategy.formulation(solvers).solve(data, params)?;
    tracing::debug!("strategy finished");
    Ok(allocation)
}

use serde::{Deserialize, Serialize};

use super::{Allocation, Formulation, OptimizationParameters, Strategy};
use crate::assets::AssetData;
use crate::error::AllocationError;
use crate::portfolio::weights_sharpe;
use crate::AllocationResult;

/// Bisection settings for the risk-aversion search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrontierSettings {
    pub gamma_low: f64,
    pub gamma_high: f64,
    /// Offset ε of the two probes around the midpoint.
    pub probe_step: f64,
    /// Stop once the Sharpe ratio moves less than this between iterations.
    pub precision: f64,
    pub max_iterations: u32,
    /// Solve the two probes of an iteration concurrently.
    pub parallel_probes: bool,
}

impl Default for FrontierSettings {
    fn default() -> Self {
        FrontierSettings {
            gamma_low: 0.0,
            gamma_high: 20.0,
            probe_step: 1e-6,
            precision: 1e-6,
            max_iterations: 20,
            parallel_probes: true,
        }
    }
}

impl FrontierSettings {
    pub fn validate(&self) -> AllocationResult<()> {
        if !self.gamma_low.is_finite() || !self.gamma_high.is_finite() || self.gamma_low < 0.0 {
            return Err(AllocationError::invalid(
                "frontier.gamma_low",
                "Interval ends must be finite and non-negative",
            ));
        }
        if self.gamma_high <= self.gamma_low {
            return Err(AllocationError::invalid(
                "frontier.gamma_high",
                format!(
                    "Upper end {} must exceed lower end {}",
                    self.gamma_high, self.gamma_low
                ),
            ));
        }
        if !(self.probe_step > 0.0) || !(self.precision > 0.0) {
            return Err(AllocationError::invalid(
                "frontier.probe_step",
                "Probe step and precision must be positive",
            ));
        }
        if self.max_iterations == 0 {
            return Err(AllocationError::invalid(
                "frontier.max_iterations",
                "Must be at least 1",
            ));
        }
        let smallest_left = self.smallest_midpoint() - self.probe_step;
        if !(smallest_left > 0.0) {
            return Err(AllocationError::invalid(
                "frontier.probe_step",
                format!(
                    "Step {} puts the left γ at {:e} near the smallest midpoint {:e}",
                    self.probe_step,
                    smallest_left,
                    self.smallest_midpoint()
                ),
            ));
        }
        Ok(())
    }

    /// Lowest midpoint the bisection can reach: `low + (high − low)/2^k`
    /// after always keeping the left half.
    fn smallest_midpoint(&self) -> f64 {
        let halvings = self.max_iterations.min(1100) as i32;
        self.gamma_low + (self.gamma_high - self.gamma_low) * 0.5f64.powi(halvings)
    }
}

/// One bisection iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierStep {
    pub iteration: u32,
    pub gamma_low: f64,
    pub gamma_high: f64,
    pub gamma_mid: f64,
    pub left_sharpe: Option<f64>,
    pub right_sharpe: Option<f64>,
}

/// Probe history of a frontier search. Sharpe ratios are annualized and
/// `None` where the holding carries no risk (for example, no shares at all).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierTrace {
    pub steps: Vec<FrontierStep>,
    pub iterations: u32,
    /// Whether the Sharpe change fell below `precision` before the cap.
    pub converged: bool,
    pub best_gamma: f64,
    pub best_sharpe: Option<f64>,
}

/// Bisection over γ around an inner mean-variance formulation.
///
/// Each iteration solves the inner formulation at `mid − ε` and `mid + ε`
/// and keeps the half of the interval on the side with the higher Sharpe
/// ratio. This assumes the Sharpe ratio is unimodal in γ; when it is not,
/// the trace shows where the search went. The best probe seen is returned.
/// A point with an undefined Sharpe ratio ranks below every defined one.
pub struct FrontierSearch {
    strategy: Strategy,
    inner: Box<dyn Formulation>,
}

struct Probe {
    gamma: f64,
    sharpe: Option<f64>,
    allocation: Allocation,
}

impl Probe {
    fn rank(&self) -> f64 {
        self.sharpe.unwrap_or(f64::NEG_INFINITY)
    }
}

impl FrontierSearch {
    pub fn new(strategy: Strategy, inner: Box<dyn Formulation>) -> Self {
        FrontierSearch { strategy, inner }
    }

    fn probe(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
        gamma: f64,
    ) -> AllocationResult<Probe> {
        let allocation = self.inner.solve(data, &params.with_risk_aversion(gamma))?;
        let weights = allocation.realized_weights(data)?;
        let sharpe = match weights_sharpe(data, &weights, params.annualization) {
            Ok(sharpe) => Some(sharpe),
            Err(AllocationError::NumericalDegenerate { context }) => {
                tracing::debug!(gamma, %context, "Sharpe ratio undefined at this γ");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(Probe {
            gamma,
            sharpe,
            allocation,
        })
    }

    fn probe_pair(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
        left: f64,
        right: f64,
    ) -> AllocationResult<(Probe, Probe)> {
        #[cfg(feature = "parallel")]
        if params.frontier.parallel_probes {
            let (l, r) = rayon::join(
                || self.probe(data, params, left),
                || self.probe(data, params, right),
            );
            return Ok((l?, r?));
        }
        Ok((
            self.probe(data, params, left)?,
            self.probe(data, params, right)?,
        ))
    }
}

impl Formulation for FrontierSearch {
    fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn solve(
        &self,
        data: &AssetData,
        params: &OptimizationParameters,
    ) -> AllocationResult<Allocation> {
        let settings = &params.frontier;
        let mut low = settings.gamma_low;
        let mut high = settings.gamma_high;
        let mut current_sharpe = 0.0;
        let mut steps = Vec::new();
        let mut converged = false;
        let mut best: Option<Probe> = None;

        for iteration in 0..settings.max_iterations {
            let mid = 0.5 * (low + high);
            let (left, right) = self.probe_pair(
                data,
                params,
                mid - settings.probe_step,
                mid + settings.probe_step,
            )?;
            steps.push(FrontierStep {
                iteration,
                gamma_low: low,
                gamma_high: high,
                gamma_mid: mid,
                left_sharpe: left.sharpe,
                right_sharpe: right.sharpe,
            });
            tracing::debug!(
                iteration,
                gamma_mid = mid,
                left = ?left.sharpe,
                right = ?right.sharpe,
                "frontier step"
            );

            let chosen = if left.rank() > right.rank() {
                high = mid;
                left
            } else {
                low = mid;
                right
            };

            let step_converged = match chosen.sharpe {
                Some(sharpe) => {
                    let previous = current_sharpe;
                    current_sharpe = sharpe;
                    (current_sharpe - previous).abs() < settings.precision
                }
                None => false,
            };
            if best.as_ref().map_or(true, |b| chosen.rank() > b.rank()) {
                best = Some(chosen);
            }
            if step_converged {
                converged = true;
                break;
            }
        }

        let Some(best) = best else {
            return Err(AllocationError::invalid(
                "frontier.max_iterations",
                "Search ran no iterations",
            ));
        };
        let trace = FrontierTrace {
            iterations: steps.len() as u32,
            steps,
            converged,
            best_gamma: best.gamma,
            best_sharpe: best.sharpe,
        };
        tracing::debug!(
            best_gamma = trace.best_gamma,
            best_sharpe = ?trace.best_sharpe,
            converged,
            "frontier search finished"
        );

        let mut allocation = best.allocation;
        allocation.strategy = self.strategy;
        allocation.risk_aversion = Some(best.gamma);
        allocation.frontier = Some(trace);
        Ok(allocation)
    }
}

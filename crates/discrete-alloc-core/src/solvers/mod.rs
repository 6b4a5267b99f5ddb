//! Solver capabilities consumed by the formulation strategies.
//!
//! Each capability is a trait so strategies never name a concrete backend.
//! The default suite pairs a Clarabel interior-point QP, a damped-BFGS SQP
//! and a best-first branch-and-bound over Clarabel relaxations.

pub mod branch_and_bound;
pub mod clarabel_qp;
pub mod sqp;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AllocationError;
use crate::AllocationResult;

pub use branch_and_bound::BranchAndBound;
pub use clarabel_qp::ClarabelSolver;
pub use sqp::SequentialQuadratic;

/// Relative tolerance for equality rows when checking integer candidates.
const EQUALITY_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Problem types
// ---------------------------------------------------------------------------

/// A single linear row `coefficients · x (= | <=) rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub coefficients: Vec<f64>,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn new(coefficients: Vec<f64>, rhs: f64) -> Self {
        LinearConstraint { coefficients, rhs }
    }

    pub fn evaluate(&self, x: &[f64]) -> f64 {
        self.coefficients.iter().zip(x).map(|(a, xi)| a * xi).sum()
    }
}

/// Convex quadratic program in minimization form:
///
/// `min ½xᵀPx + qᵀx + c  s.t.  A_eq x = b_eq,  A_in x <= b_in,  l <= x <= u`
///
/// Infinite bounds mean "no bound".
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    pub hessian: DMatrix<f64>,
    pub linear: DVector<f64>,
    pub constant: f64,
    pub equalities: Vec<LinearConstraint>,
    pub inequalities: Vec<LinearConstraint>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl QuadraticProgram {
    pub fn new(hessian: DMatrix<f64>, linear: DVector<f64>) -> Self {
        let n = linear.len();
        QuadraticProgram {
            hessian,
            linear,
            constant: 0.0,
            equalities: Vec::new(),
            inequalities: Vec::new(),
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn with_constant(mut self, constant: f64) -> Self {
        self.constant = constant;
        self
    }

    pub fn with_equality(mut self, coefficients: Vec<f64>, rhs: f64) -> Self {
        self.equalities.push(LinearConstraint::new(coefficients, rhs));
        self
    }

    pub fn with_inequality(mut self, coefficients: Vec<f64>, rhs: f64) -> Self {
        self.inequalities.push(LinearConstraint::new(coefficients, rhs));
        self
    }

    pub fn with_bounds(mut self, lower: Vec<f64>, upper: Vec<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub fn dim(&self) -> usize {
        self.linear.len()
    }

    /// Objective value including the constant offset.
    pub fn objective(&self, x: &[f64]) -> f64 {
        let v = DVector::from_column_slice(x);
        0.5 * v.dot(&(&self.hessian * &v)) + self.linear.dot(&v) + self.constant
    }

    /// Largest violation across equality, inequality and bound rows.
    pub fn max_violation(&self, x: &[f64]) -> f64 {
        let eq = self
            .equalities
            .iter()
            .map(|c| (c.evaluate(x) - c.rhs).abs());
        let ineq = self
            .inequalities
            .iter()
            .map(|c| (c.evaluate(x) - c.rhs).max(0.0));
        let bounds = x
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(xi, (l, u))| (l - xi).max(xi - u).max(0.0));
        eq.chain(ineq).chain(bounds).fold(0.0, f64::max)
    }

    /// Feasibility test used for integer candidates: inequality rows and
    /// bounds are checked exactly, equality rows with a relative tolerance.
    pub fn is_feasible(&self, x: &[f64]) -> bool {
        let bounds_ok = x
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(xi, (l, u))| xi >= l && xi <= u);
        let ineq_ok = self.inequalities.iter().all(|c| c.evaluate(x) <= c.rhs);
        let eq_ok = self.equalities.iter().all(|c| {
            (c.evaluate(x) - c.rhs).abs() <= EQUALITY_TOLERANCE * c.rhs.abs().max(1.0)
        });
        bounds_ok && ineq_ok && eq_ok
    }

    pub(crate) fn check_dimensions(&self) -> AllocationResult<()> {
        let n = self.dim();
        if self.hessian.nrows() != n || self.hessian.ncols() != n {
            return Err(AllocationError::invalid(
                "hessian",
                format!(
                    "Expected {}x{} but got {}x{}",
                    n,
                    n,
                    self.hessian.nrows(),
                    self.hessian.ncols()
                ),
            ));
        }
        if self.lower.len() != n || self.upper.len() != n {
            return Err(AllocationError::invalid(
                "bounds",
                format!("Expected {} lower and upper bounds", n),
            ));
        }
        for row in self.equalities.iter().chain(self.inequalities.iter()) {
            if row.coefficients.len() != n {
                return Err(AllocationError::invalid(
                    "constraints",
                    format!("Row has {} coefficients, expected {}", row.coefficients.len(), n),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: u32,
}

/// A smooth objective evaluated by the nonlinear optimizer. Evaluation may
/// fail (e.g. zero variance), and the failure aborts the solve.
pub trait SmoothObjective: Sync {
    fn value(&self, x: &DVector<f64>) -> AllocationResult<f64>;
    fn gradient(&self, x: &DVector<f64>) -> AllocationResult<DVector<f64>>;
}

/// `min f(x)  s.t.  A x = b`, started from `start`.
pub struct NonlinearProgram<'a> {
    pub objective: &'a dyn SmoothObjective,
    pub equalities: Vec<LinearConstraint>,
    pub start: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NlpSolution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub iterations: u32,
    /// Objective change over the final accepted step.
    pub last_delta: f64,
}

/// Result of a nonlinear solve. A point that failed the stopping test is a
/// separate variant and must not be read as an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum NonlinearOutcome {
    Converged(NlpSolution),
    NotConverged { solution: NlpSolution, reason: String },
}

/// Quadratic program whose flagged variables must take integer values.
#[derive(Debug, Clone)]
pub struct MixedIntegerProgram {
    pub relaxation: QuadraticProgram,
    pub integer: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MipSolution {
    pub x: Vec<f64>,
    pub objective: f64,
    pub nodes: u64,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Convex QP: global optimum when feasible.
pub trait QuadraticSolver: Send + Sync {
    fn solve(&self, problem: &QuadraticProgram) -> AllocationResult<QpSolution>;
}

/// Equality-constrained smooth minimization: local stationarity only.
pub trait NonlinearSolver: Send + Sync {
    fn minimize(&self, problem: &NonlinearProgram<'_>) -> AllocationResult<NonlinearOutcome>;
}

/// Mixed-integer QP: exact within its node and time budget.
pub trait MixedIntegerSolver: Send + Sync {
    fn solve(&self, problem: &MixedIntegerProgram) -> AllocationResult<MipSolution>;
}

// ---------------------------------------------------------------------------
// Settings & suite
// ---------------------------------------------------------------------------

/// Iteration, node and time budgets shared by the default backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Interior-point iteration cap per QP solve.
    pub qp_max_iterations: u32,
    /// SQP iteration cap.
    pub nlp_max_iterations: u32,
    /// SQP stops once the projected gradient falls below this.
    pub nlp_gradient_tolerance: f64,
    /// SQP also stops when the relative objective change falls below this.
    pub nlp_function_tolerance: f64,
    /// Relaxations solved before branch-and-bound gives up.
    pub node_limit: u64,
    /// Distance to the nearest integer accepted as integral.
    pub integrality_tolerance: f64,
    /// Wall-clock limit applied to each backend call.
    pub time_limit_secs: Option<f64>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            qp_max_iterations: 200,
            nlp_max_iterations: 200,
            nlp_gradient_tolerance: 1e-8,
            nlp_function_tolerance: 1e-12,
            node_limit: 100_000,
            integrality_tolerance: 1e-6,
            time_limit_secs: None,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> AllocationResult<()> {
        if self.qp_max_iterations == 0 || self.nlp_max_iterations == 0 || self.node_limit == 0 {
            return Err(AllocationError::invalid(
                "solver",
                "Iteration and node limits must be positive",
            ));
        }
        if !(self.nlp_gradient_tolerance > 0.0) || !(self.nlp_function_tolerance >= 0.0) {
            return Err(AllocationError::invalid(
                "solver.nlp_gradient_tolerance",
                "Tolerances must be positive",
            ));
        }
        if !(self.integrality_tolerance > 0.0 && self.integrality_tolerance < 0.5) {
            return Err(AllocationError::invalid(
                "solver.integrality_tolerance",
                "Must lie in (0, 0.5)",
            ));
        }
        if let Some(t) = self.time_limit_secs {
            if !(t > 0.0) || !t.is_finite() {
                return Err(AllocationError::invalid(
                    "solver.time_limit_secs",
                    "Must be a positive number of seconds",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs_f64)
    }
}

/// The three backends handed to every strategy.
#[derive(Clone)]
pub struct SolverSuite {
    pub quadratic: Arc<dyn QuadraticSolver>,
    pub nonlinear: Arc<dyn NonlinearSolver>,
    pub mixed_integer: Arc<dyn MixedIntegerSolver>,
}

impl SolverSuite {
    pub fn from_settings(settings: &SolverSettings) -> Self {
        let quadratic: Arc<dyn QuadraticSolver> = Arc::new(ClarabelSolver::from_settings(settings));
        SolverSuite {
            nonlinear: Arc::new(SequentialQuadratic::from_settings(settings)),
            mixed_integer: Arc::new(BranchAndBound::new(quadratic.clone(), settings)),
            quadratic,
        }
    }
}

impl Default for SolverSuite {
    fn default() -> Self {
        SolverSuite::from_settings(&SolverSettings::default())
    }
}

impl std::fmt::Debug for SolverSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolverSuite").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn box_qp() -> QuadraticProgram {
        QuadraticProgram::new(DMatrix::identity(2, 2), DVector::from_vec(vec![-1.0, -1.0]))
            .with_inequality(vec![1.0, 1.0], 1.0)
            .with_bounds(vec![0.0, 0.0], vec![1.0, 1.0])
    }

    #[test]
    fn test_objective_includes_constant() {
        let qp = box_qp().with_constant(2.0);
        // ½(1) - 1 + 2
        assert!((qp.objective(&[1.0, 0.0]) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_feasibility_is_exact_on_inequalities() {
        let qp = box_qp();
        assert!(qp.is_feasible(&[1.0, 0.0]));
        assert!(!qp.is_feasible(&[1.0, 1e-12]));
        assert!(qp.max_violation(&[1.0, 0.5]) > 0.49);
    }

    #[test]
    fn test_dimension_check() {
        let mut qp = box_qp();
        qp.lower.pop();
        assert!(qp.check_dimensions().is_err());
    }

    #[test]
    fn test_settings_validation() {
        assert!(SolverSettings::default().validate().is_ok());
        let bad = SolverSettings {
            integrality_tolerance: 0.7,
            ..SolverSettings::default()
        };
        assert!(bad.validate().is_err());
    }
}

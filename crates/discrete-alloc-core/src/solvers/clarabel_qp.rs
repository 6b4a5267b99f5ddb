use clarabel::algebra::*;
use clarabel::solver::*;
use nalgebra::DMatrix;

use super::{QpSolution, QuadraticProgram, QuadraticSolver, SolverSettings};
use crate::error::AllocationError;
use crate::AllocationResult;

const SOLVER_NAME: &str = "clarabel";

/// Interior-point convex QP backend.
#[derive(Debug, Clone)]
pub struct ClarabelSolver {
    pub max_iterations: u32,
    pub time_limit_secs: Option<f64>,
}

impl ClarabelSolver {
    pub fn from_settings(settings: &SolverSettings) -> Self {
        ClarabelSolver {
            max_iterations: settings.qp_max_iterations,
            time_limit_secs: settings.time_limit_secs,
        }
    }
}

impl Default for ClarabelSolver {
    fn default() -> Self {
        ClarabelSolver::from_settings(&SolverSettings::default())
    }
}

impl QuadraticSolver for ClarabelSolver {
    fn solve(&self, problem: &QuadraticProgram) -> AllocationResult<QpSolution> {
        problem.check_dimensions()?;
        let n = problem.dim();

        // Constraint rows: equalities go to the zero cone, inequalities and
        // finite bounds to the nonnegative cone (A x + s = b, s >= 0).
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut b: Vec<f64> = Vec::new();
        for eq in &problem.equalities {
            rows.push(eq.coefficients.clone());
            b.push(eq.rhs);
        }
        let n_eq = rows.len();
        for ineq in &problem.inequalities {
            rows.push(ineq.coefficients.clone());
            b.push(ineq.rhs);
        }
        for j in 0..n {
            if problem.upper[j].is_finite() {
                rows.push(unit_row(n, j, 1.0));
                b.push(problem.upper[j]);
            }
            if problem.lower[j].is_finite() {
                rows.push(unit_row(n, j, -1.0));
                b.push(-problem.lower[j]);
            }
        }
        let n_cone = rows.len() - n_eq;

        let p = upper_triangle_csc(&problem.hessian);
        let a = rows_to_csc(&rows, n);
        let q: Vec<f64> = problem.linear.iter().copied().collect();

        let mut cones = Vec::with_capacity(2);
        if n_eq > 0 {
            cones.push(ZeroConeT(n_eq));
        }
        if n_cone > 0 {
            cones.push(NonnegativeConeT(n_cone));
        }

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iterations)
            .time_limit(self.time_limit_secs.unwrap_or(f64::INFINITY))
            .verbose(false)
            .build()
            .map_err(|e| AllocationError::invalid("solver", format!("Failed to build settings: {}", e)))?;

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings).map_err(|e| {
            AllocationError::invalid("problem", format!("Failed to create solver: {:?}", e))
        })?;
        solver.solve();

        let x = solver.solution.x.clone();
        let iterations = solver.solution.iterations;
        tracing::trace!(status = ?solver.solution.status, iterations, "clarabel finished");

        match solver.solution.status {
            SolverStatus::Solved => {}
            SolverStatus::AlmostSolved => {
                tracing::warn!(
                    violation = problem.max_violation(&x),
                    "QP solved to reduced accuracy"
                );
            }
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                return Err(AllocationError::Infeasible(
                    "Constraints are jointly unsatisfiable".into(),
                ));
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                return Err(AllocationError::Unbounded(
                    "Objective has no finite optimum over the feasible set".into(),
                ));
            }
            SolverStatus::MaxTime => {
                return Err(AllocationError::SolverTimeout {
                    solver: SOLVER_NAME.into(),
                    limit: format!(
                        "time limit of {}s",
                        self.time_limit_secs.unwrap_or(f64::INFINITY)
                    ),
                });
            }
            _ => {
                return Err(AllocationError::SolverNonConvergence {
                    solver: SOLVER_NAME.into(),
                    iterations,
                    last_delta: solver.info.gap_abs,
                });
            }
        }

        if x.len() != n || x.iter().any(|v| !v.is_finite()) {
            return Err(AllocationError::degenerate(
                "QP backend returned a non-finite solution",
            ));
        }

        let objective = problem.objective(&x);
        Ok(QpSolution {
            x,
            objective,
            iterations,
        })
    }
}

// ---------------------------------------------------------------------------
// Sparse helpers
// ---------------------------------------------------------------------------

fn unit_row(n: usize, j: usize, value: f64) -> Vec<f64> {
    let mut row = vec![0.0; n];
    row[j] = value;
    row
}

/// Upper triangle of the symmetrized Hessian in compressed-column form.
fn upper_triangle_csc(h: &DMatrix<f64>) -> CscMatrix<f64> {
    let n = h.nrows();
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..n {
        for i in 0..=j {
            let v = 0.5 * (h[(i, j)] + h[(j, i)]);
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(n, n, colptr, rowval, nzval)
}

/// Dense rows (each of length `n`) in compressed-column form.
fn rows_to_csc(rows: &[Vec<f64>], n: usize) -> CscMatrix<f64> {
    let m = rows.len();
    let mut colptr = Vec::with_capacity(n + 1);
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();
    colptr.push(0);
    for j in 0..n {
        for (i, row) in rows.iter().enumerate() {
            if row[j] != 0.0 {
                rowval.push(i);
                nzval.push(row[j]);
            }
        }
        colptr.push(nzval.len());
    }
    CscMatrix::new(m, n, colptr, rowval, nzval)
}

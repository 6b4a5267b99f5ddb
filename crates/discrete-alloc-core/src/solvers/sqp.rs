use nalgebra::{DMatrix, DVector};
use std::time::{Duration, Instant};

use super::{NlpSolution, NonlinearOutcome, NonlinearProgram, NonlinearSolver, SolverSettings};
use crate::error::AllocationError;
use crate::AllocationResult;

const SOLVER_NAME: &str = "sqp";

/// Armijo sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;

/// Smallest step length tried before the line search gives up.
const MIN_STEP: f64 = 1e-12;

/// Objective noise accepted by the line search, in units of machine epsilon.
const NOISE_ULPS: f64 = 10.0;

/// Sequential quadratic programming for equality-constrained smooth problems.
///
/// Each iteration solves the KKT system of a quadratic model built from a
/// damped BFGS Hessian approximation, then backtracks along the step until
/// the Armijo condition holds. Iterates stay on the affine constraint set.
#[derive(Debug, Clone)]
pub struct SequentialQuadratic {
    pub max_iterations: u32,
    pub gradient_tolerance: f64,
    pub function_tolerance: f64,
    pub time_limit: Option<Duration>,
}

impl SequentialQuadratic {
    pub fn from_settings(settings: &SolverSettings) -> Self {
        SequentialQuadratic {
            max_iterations: settings.nlp_max_iterations,
            gradient_tolerance: settings.nlp_gradient_tolerance,
            function_tolerance: settings.nlp_function_tolerance,
            time_limit: settings.time_limit(),
        }
    }
}

impl Default for SequentialQuadratic {
    fn default() -> Self {
        SequentialQuadratic::from_settings(&SolverSettings::default())
    }
}

/// Equality rows `A x = b` with a cached inverse Gram matrix for projections.
struct AffineSet {
    a: DMatrix<f64>,
    b: DVector<f64>,
    gram_inv: DMatrix<f64>,
}

impl AffineSet {
    fn build(problem: &NonlinearProgram<'_>) -> AllocationResult<Self> {
        let n = problem.start.len();
        let m = problem.equalities.len();
        let mut a = DMatrix::zeros(m, n);
        let mut b = DVector::zeros(m);
        for (i, row) in problem.equalities.iter().enumerate() {
            if row.coefficients.len() != n {
                return Err(AllocationError::invalid(
                    "constraints",
                    format!(
                        "Row has {} coefficients, expected {}",
                        row.coefficients.len(),
                        n
                    ),
                ));
            }
            for (j, c) in row.coefficients.iter().enumerate() {
                a[(i, j)] = *c;
            }
            b[i] = row.rhs;
        }
        let gram_inv = if m == 0 {
            DMatrix::zeros(0, 0)
        } else {
            (&a * a.transpose())
                .lu()
                .try_inverse()
                .ok_or_else(|| AllocationError::degenerate("equality rows are linearly dependent"))?
        };
        Ok(AffineSet { a, b, gram_inv })
    }

    fn is_empty(&self) -> bool {
        self.a.nrows() == 0
    }

    /// Closest point of the affine set to `x`.
    fn project_point(&self, x: &DVector<f64>) -> DVector<f64> {
        if self.is_empty() {
            return x.clone();
        }
        let residual = &self.a * x - &self.b;
        x - self.a.transpose() * (&self.gram_inv * residual)
    }

    /// Component of `v` in the null space of `A`.
    fn project_direction(&self, v: &DVector<f64>) -> DVector<f64> {
        if self.is_empty() {
            return v.clone();
        }
        v - self.a.transpose() * (&self.gram_inv * (&self.a * v))
    }
}

fn finite_value(value: f64) -> AllocationResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AllocationError::degenerate(format!(
            "objective evaluated to {value}"
        )))
    }
}

fn finite_gradient(g: DVector<f64>) -> AllocationResult<DVector<f64>> {
    if g.iter().all(|v| v.is_finite()) {
        Ok(g)
    } else {
        Err(AllocationError::degenerate("gradient has non-finite entries"))
    }
}

impl NonlinearSolver for SequentialQuadratic {
    fn minimize(&self, problem: &NonlinearProgram<'_>) -> AllocationResult<NonlinearOutcome> {
        let started = Instant::now();
        let n = problem.start.len();
        if n == 0 {
            return Err(AllocationError::invalid("start", "Empty starting point"));
        }
        let affine = AffineSet::build(problem)?;
        let m = affine.a.nrows();

        let mut x = affine.project_point(&DVector::from_column_slice(&problem.start));
        let mut f = finite_value(problem.objective.value(&x)?)?;
        let mut g = finite_gradient(problem.objective.gradient(&x)?)?;
        let mut hessian = DMatrix::<f64>::identity(n, n);
        let mut scaled = false;
        let mut last_delta = f64::INFINITY;

        let snapshot = |x: &DVector<f64>, f: f64, iterations: u32, last_delta: f64| NlpSolution {
            x: x.iter().copied().collect(),
            objective: f,
            iterations,
            last_delta,
        };

        for iteration in 0..self.max_iterations {
            if let Some(limit) = self.time_limit {
                if started.elapsed() > limit {
                    return Err(AllocationError::SolverTimeout {
                        solver: SOLVER_NAME.into(),
                        limit: format!("time limit of {:.3}s", limit.as_secs_f64()),
                    });
                }
            }

            let projected = affine.project_direction(&g);
            if projected.amax() <= self.gradient_tolerance {
                return Ok(NonlinearOutcome::Converged(snapshot(
                    &x, f, iteration, last_delta,
                )));
            }

            // KKT system [[H, Aᵀ], [A, 0]] [d; λ] = [-g; -(Ax - b)].
            let mut kkt = DMatrix::<f64>::zeros(n + m, n + m);
            kkt.view_mut((0, 0), (n, n)).copy_from(&hessian);
            if m > 0 {
                kkt.view_mut((0, n), (n, m)).copy_from(&affine.a.transpose());
                kkt.view_mut((n, 0), (m, n)).copy_from(&affine.a);
            }
            let mut rhs = DVector::<f64>::zeros(n + m);
            rhs.rows_mut(0, n).copy_from(&(-&g));
            if m > 0 {
                rhs.rows_mut(n, m)
                    .copy_from(&(&affine.b - &affine.a * &x));
            }
            let mut direction = match kkt.lu().solve(&rhs) {
                Some(sol) if sol.iter().all(|v| v.is_finite()) => sol.rows(0, n).into_owned(),
                _ => -projected.clone(),
            };
            let mut slope = g.dot(&direction);
            if slope >= 0.0 {
                direction = -projected.clone();
                slope = g.dot(&direction);
            }

            // Backtracking with a small allowance for objective round-off.
            let noise = NOISE_ULPS * f64::EPSILON * (1.0 + f.abs());
            let mut alpha = 1.0;
            let mut accepted = None;
            while alpha >= MIN_STEP {
                let candidate = &x + &direction * alpha;
                let value = problem.objective.value(&candidate)?;
                if value.is_finite() && value <= f + ARMIJO_C1 * alpha * slope + noise {
                    accepted = Some((candidate, value));
                    break;
                }
                alpha *= 0.5;
            }
            let Some((x_new, f_new)) = accepted else {
                tracing::debug!(iteration, objective = f, "line search failed");
                return Ok(NonlinearOutcome::NotConverged {
                    solution: snapshot(&x, f, iteration, last_delta),
                    reason: "line search could not decrease the objective".into(),
                });
            };

            let g_new = finite_gradient(problem.objective.gradient(&x_new)?)?;
            let s = &x_new - &x;
            let y = &g_new - &g;
            update_hessian(&mut hessian, &s, &y, &mut scaled);

            last_delta = (f_new - f).abs();
            x = x_new;
            f = f_new;
            g = g_new;
            tracing::trace!(iteration, objective = f, step = alpha, "sqp step accepted");

            if last_delta <= self.function_tolerance * (1.0 + f.abs()) {
                return Ok(NonlinearOutcome::Converged(snapshot(
                    &x,
                    f,
                    iteration + 1,
                    last_delta,
                )));
            }
        }

        Ok(NonlinearOutcome::NotConverged {
            solution: snapshot(&x, f, self.max_iterations, last_delta),
            reason: format!("iteration limit of {} reached", self.max_iterations),
        })
    }
}

/// Powell-damped BFGS update, keeping the approximation positive definite.
fn update_hessian(h: &mut DMatrix<f64>, s: &DVector<f64>, y: &DVector<f64>, scaled: &mut bool) {
    let sy = s.dot(y);
    if !*scaled && sy > 0.0 {
        let yy = y.dot(y);
        if yy > 0.0 {
            *h = DMatrix::identity(h.nrows(), h.ncols()) * (yy / sy);
        }
        *scaled = true;
    }

    let hs = &*h * s;
    let shs = s.dot(&hs);
    if !(shs > f64::MIN_POSITIVE) {
        return;
    }
    let r = if sy >= 0.2 * shs {
        y.clone()
    } else {
        let theta = 0.8 * shs / (shs - sy);
        y * theta + &hs * (1.0 - theta)
    };
    let sr = s.dot(&r);
    if !(sr > f64::MIN_POSITIVE) {
        return;
    }
    *h += &r * r.transpose() / sr - &hs * hs.transpose() / shs;
}

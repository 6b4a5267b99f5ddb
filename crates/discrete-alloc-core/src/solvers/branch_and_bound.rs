use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    MipSolution, MixedIntegerProgram, MixedIntegerSolver, QuadraticProgram, QuadraticSolver,
    SolverSettings,
};
use crate::error::AllocationError;
use crate::AllocationResult;

const SOLVER_NAME: &str = "branch-and-bound";

/// Relative gap under which a node cannot improve on the incumbent.
const PRUNE_GAP: f64 = 1e-9;

/// Best-first branch-and-bound over convex QP relaxations.
pub struct BranchAndBound {
    relaxation: Arc<dyn QuadraticSolver>,
    pub node_limit: u64,
    pub time_limit: Option<Duration>,
    pub integrality_tolerance: f64,
}

impl BranchAndBound {
    pub fn new(relaxation: Arc<dyn QuadraticSolver>, settings: &SolverSettings) -> Self {
        BranchAndBound {
            relaxation,
            node_limit: settings.node_limit,
            time_limit: settings.time_limit(),
            integrality_tolerance: settings.integrality_tolerance,
        }
    }
}

// ---------------------------------------------------------------------------
// Search tree
// ---------------------------------------------------------------------------

struct Node {
    bound: OrderedFloat<f64>,
    depth: u32,
    seq: u64,
    lower: Vec<f64>,
    upper: Vec<f64>,
    x: Vec<f64>,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Node {}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Max-heap order: lowest bound first, then deepest, then oldest.
impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .bound
            .cmp(&self.bound)
            .then_with(|| self.depth.cmp(&other.depth))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Incumbent {
    x: Vec<f64>,
    objective: f64,
}

struct Search<'a> {
    problem: &'a MixedIntegerProgram,
    lower: Vec<f64>,
    upper: Vec<f64>,
    incumbent: Option<Incumbent>,
}

impl Search<'_> {
    fn can_improve(&self, bound: f64) -> bool {
        match &self.incumbent {
            Some(inc) => bound < inc.objective - (1e-12 + PRUNE_GAP * inc.objective.abs()),
            None => true,
        }
    }

    /// Round the integer coordinates, clamp to the root box and keep the
    /// point if it is feasible and better than the incumbent.
    fn offer(&mut self, x: &[f64], round: fn(f64) -> f64) {
        let candidate: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(j, v)| {
                if self.problem.integer[j] {
                    round(*v).clamp(self.lower[j], self.upper[j])
                } else {
                    *v
                }
            })
            .collect();
        let relaxation = &self.problem.relaxation;
        if !relaxation.is_feasible(&candidate) {
            return;
        }
        let objective = relaxation.objective(&candidate);
        if self.can_improve(objective) {
            tracing::trace!(objective, "new incumbent");
            self.incumbent = Some(Incumbent {
                x: candidate,
                objective,
            });
        }
    }

    /// Most fractional integer variable, if any.
    fn branching_variable(&self, x: &[f64], tolerance: f64) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (j, v) in x.iter().enumerate() {
            if !self.problem.integer[j] {
                continue;
            }
            let distance = (v - v.round()).abs();
            if distance > tolerance && best.map_or(true, |(_, d)| distance > d) {
                best = Some((j, distance));
            }
        }
        best.map(|(j, _)| j)
    }
}

fn with_bounds(base: &QuadraticProgram, lower: &[f64], upper: &[f64]) -> QuadraticProgram {
    let mut qp = base.clone();
    qp.lower = lower.to_vec();
    qp.upper = upper.to_vec();
    qp
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

impl MixedIntegerSolver for BranchAndBound {
    fn solve(&self, problem: &MixedIntegerProgram) -> AllocationResult<MipSolution> {
        let started = Instant::now();
        let base = &problem.relaxation;
        base.check_dimensions()?;
        let n = base.dim();
        if problem.integer.len() != n {
            return Err(AllocationError::invalid(
                "integer",
                format!("Expected {} integrality flags but got {}", n, problem.integer.len()),
            ));
        }

        let tol = self.integrality_tolerance;
        let mut lower = base.lower.clone();
        let mut upper = base.upper.clone();
        for j in 0..n {
            if problem.integer[j] {
                lower[j] = (lower[j] - tol).ceil();
                upper[j] = (upper[j] + tol).floor();
            }
            if lower[j] > upper[j] {
                return Err(AllocationError::Infeasible(format!(
                    "variable {} has no integer value in its bounds",
                    j
                )));
            }
        }

        let exhausted = |what: String| AllocationError::SolverTimeout {
            solver: SOLVER_NAME.into(),
            limit: what,
        };

        let root = self.relaxation.solve(&with_bounds(base, &lower, &upper))?;
        let mut search = Search {
            problem,
            lower: lower.clone(),
            upper: upper.clone(),
            incumbent: None,
        };
        search.offer(&root.x, f64::round);
        search.offer(&root.x, f64::floor);

        let mut heap = BinaryHeap::new();
        let mut nodes: u64 = 1;
        let mut seq: u64 = 0;
        heap.push(Node {
            bound: OrderedFloat(root.objective),
            depth: 0,
            seq,
            lower,
            upper,
            x: root.x,
        });

        while let Some(node) = heap.pop() {
            if !search.can_improve(node.bound.0) {
                continue;
            }
            let Some(j) = search.branching_variable(&node.x, tol) else {
                // Integral relaxation: its rounding is optimal for this subtree.
                search.offer(&node.x, f64::round);
                continue;
            };

            let value = node.x[j];
            let mut left_upper = node.upper.clone();
            left_upper[j] = value.floor();
            let mut right_lower = node.lower.clone();
            right_lower[j] = value.ceil();
            let children = [
                (node.lower.clone(), left_upper),
                (right_lower, node.upper.clone()),
            ];

            for (child_lower, child_upper) in children {
                if child_lower[j] > child_upper[j] {
                    continue;
                }
                if nodes >= self.node_limit {
                    return Err(exhausted(format!("node limit of {}", self.node_limit)));
                }
                if let Some(limit) = self.time_limit {
                    if started.elapsed() > limit {
                        return Err(exhausted(format!(
                            "time limit of {:.3}s",
                            limit.as_secs_f64()
                        )));
                    }
                }
                nodes += 1;

                let relaxed = match self
                    .relaxation
                    .solve(&with_bounds(base, &child_lower, &child_upper))
                {
                    Ok(sol) => sol,
                    Err(AllocationError::Infeasible(_)) => continue,
                    Err(e) => return Err(e),
                };
                search.offer(&relaxed.x, f64::round);
                search.offer(&relaxed.x, f64::floor);
                if search.can_improve(relaxed.objective) {
                    seq += 1;
                    heap.push(Node {
                        bound: OrderedFloat(relaxed.objective),
                        depth: node.depth + 1,
                        seq,
                        lower: child_lower,
                        upper: child_upper,
                        x: relaxed.x,
                    });
                }
            }
        }

        tracing::debug!(nodes, "branch-and-bound finished");
        match search.incumbent {
            Some(inc) => Ok(MipSolution {
                x: inc.x,
                objective: inc.objective,
                nodes,
            }),
            None => Err(AllocationError::Infeasible(
                "no integer point satisfies the constraints".into(),
            )),
        }
    }
}

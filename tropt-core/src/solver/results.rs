//! Solver results holder.

use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::problem::TrajOptProblem;
use crate::solver::workspace::{StageDims, Workspace};

/// Best iterate found by the solver, plus convergence diagnostics.
#[derive(Debug, Clone)]
pub struct Results {
    /// Inner (Newton) iterations performed across all AL cycles.
    pub num_iters: usize,
    /// Whether the combined infeasibility reached the target tolerance.
    pub conv: bool,

    /// Raw trajectory cost at the current iterate.
    pub traj_cost: f64,
    /// Merit value at the current iterate.
    pub merit_value: f64,
    /// Overall primal infeasibility (constraint violation).
    pub primal_infeasibility: f64,
    /// Overall dual infeasibility.
    pub dual_infeasibility: f64,

    /// Riccati gains: stage gains `G_0 .. G_{N-1}` (feedforward column 0,
    /// feedback columns `1..`), plus a terminal gain when a terminal
    /// constraint is present.
    pub gains: Vec<DMatrix<f64>>,
    /// States `x_0 .. x_N`.
    pub xs: Vec<DVector<f64>>,
    /// Controls `u_0 .. u_{N-1}`.
    pub us: Vec<DVector<f64>>,
    /// Lagrange multipliers: initial-state, per-stage stacks, optional
    /// terminal.
    pub lams: Vec<DVector<f64>>,
}

impl Results {
    pub fn new(problem: &TrajOptProblem) -> Self {
        let nsteps = problem.num_steps();
        let dims: Vec<StageDims> = problem
            .stages
            .iter()
            .map(|s| StageDims {
                ndx1: s.ndx1(),
                nu: s.nu(),
                ndx2: s.ndx2(),
                nprim: s.num_primal(),
                ndual: s.num_dual(),
            })
            .collect();
        let ndx0 = dims[0].ndx1;
        let ndx_term = dims[nsteps - 1].ndx2;
        let ndual_term = problem.term_constraint.as_ref().map_or(0, |c| c.func.nr());

        let mut gains: Vec<DMatrix<f64>> = dims
            .iter()
            .map(|d| DMatrix::zeros(d.nprim + d.ndual, d.ndx1 + 1))
            .collect();
        if problem.term_constraint.is_some() {
            gains.push(DMatrix::zeros(ndual_term, ndx_term + 1));
        }

        let mut xs: Vec<DVector<f64>> =
            problem.stages.iter().map(|s| s.xspace.neutral()).collect();
        xs.push(problem.stages[nsteps - 1].xspace_next.neutral());
        let us = problem.stages.iter().map(|s| s.uspace.neutral()).collect();

        let lams = Workspace::multiplier_dims(problem, &dims, ndx0, ndual_term)
            .into_iter()
            .map(DVector::zeros)
            .collect();

        Self {
            num_iters: 0,
            conv: false,
            traj_cost: 0.0,
            merit_value: 0.0,
            primal_infeasibility: 0.0,
            dual_infeasibility: 0.0,
            gains,
            xs,
            us,
            lams,
        }
    }
}

impl fmt::Display for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Results {{")?;
        write!(f, "\n  numiters   :  {},", self.num_iters)?;
        write!(f, "\n  converged  :  {},", self.conv)?;
        write!(f, "\n  traj. cost :  {:.3e},", self.traj_cost)?;
        write!(f, "\n  merit.value:  {:.3e},", self.merit_value)?;
        write!(f, "\n  prim_infeas:  {:.3e},", self.primal_infeasibility)?;
        write!(f, "\n  dual_infeas:  {:.3e},", self.dual_infeasibility)?;
        write!(f, "\n}}")
    }
}

//! Direction assembly, trial steps, and proximal evaluation.

use nalgebra::DVector;

use crate::cost::CostData;
use crate::problem::TrajOptProblem;
use crate::solver::results::Results;
use crate::solver::workspace::Workspace;

/// Materialize the full primal-dual trajectory increment from the gains:
/// `pd_step[k+1] = G_k[:,0] + G_k[:,1:] * dx_k` (the node-0 step was already
/// produced by the backward pass).
pub fn compute_direction(problem: &TrajOptProblem, ws: &mut Workspace, results: &Results) {
    let nsteps = ws.nsteps;

    for i in 0..nsteps {
        let (dx_off, dx_len) = if i == 0 {
            (0, ws.ndx0)
        } else {
            (ws.dims[i - 1].nu, ws.dims[i - 1].ndx2)
        };
        let gain = &results.gains[i];
        let (head, tail) = ws.pd_step.split_at_mut(i + 1);
        let dx = &head[i];
        let out = &mut tail[0];
        for r in 0..out.len() {
            let mut acc = gain[(r, 0)];
            for c in 0..dx_len {
                acc += gain[(r, 1 + c)] * dx[dx_off + c];
            }
            out[r] = acc;
        }
    }

    if problem.term_constraint.is_some() {
        let gain = &results.gains[nsteps];
        let d = &ws.dims[nsteps - 1];
        let dx = &ws.pd_step[nsteps];
        for r in 0..ws.dlam_term.len() {
            let mut acc = gain[(r, 0)];
            for c in 0..d.ndx2 {
                acc += gain[(r, 1 + c)] * dx[d.nu + c];
            }
            ws.dlam_term[r] = acc;
        }
    }
}

/// Produce the line-search candidate for step size `alpha`: manifold
/// retraction for states and controls, plain vector update for multipliers.
pub fn try_step(problem: &TrajOptProblem, ws: &mut Workspace, results: &Results, alpha: f64) {
    let nsteps = ws.nsteps;

    // multipliers live in a vector space
    for i in 0..=nsteps {
        let (off, len) = if i == 0 {
            (ws.ndx0, ws.ndual0)
        } else {
            (ws.dims[i - 1].nprim, ws.dims[i - 1].ndual)
        };
        for r in 0..len {
            ws.trial_lams[i][r] = results.lams[i][r] + alpha * ws.pd_step[i][off + r];
        }
    }
    if problem.term_constraint.is_some() {
        for r in 0..ws.dlam_term.len() {
            ws.trial_lams[nsteps + 1][r] = results.lams[nsteps + 1][r] + alpha * ws.dlam_term[r];
        }
    }

    // states and controls via retraction
    for i in 0..nsteps {
        let d = ws.dims[i];
        let (dx_off, dx_len) = if i == 0 {
            (0, ws.ndx0)
        } else {
            (ws.dims[i - 1].nu, ws.dims[i - 1].ndx2)
        };
        for c in 0..dx_len {
            ws.tan_buf[i][c] = alpha * ws.pd_step[i][dx_off + c];
        }
        problem.stages[i]
            .xspace
            .integrate(&results.xs[i], &ws.tan_buf[i], &mut ws.trial_xs[i]);

        for c in 0..d.nu {
            ws.ctrl_buf[i][c] = alpha * ws.pd_step[i + 1][c];
        }
        problem.stages[i]
            .uspace
            .integrate(&results.us[i], &ws.ctrl_buf[i], &mut ws.trial_us[i]);
    }

    // terminal state uses the last stage's next-state space
    let d = &ws.dims[nsteps - 1];
    for c in 0..d.ndx2 {
        ws.tan_buf[nsteps][c] = alpha * ws.pd_step[nsteps][d.nu + c];
    }
    problem.stages[nsteps - 1].xspace_next.integrate(
        &results.xs[nsteps],
        &ws.tan_buf[nsteps],
        &mut ws.trial_xs[nsteps],
    );
}

/// Evaluate the proximal penalty data `P_k = 1/2 ||(x,u) (-) (x_bar,u_bar)||^2`
/// (value, gradient, unit Hessian) at the given trajectory.
pub fn evaluate_prox(
    problem: &TrajOptProblem,
    prev_xs: &[DVector<f64>],
    prev_us: &[DVector<f64>],
    xs: &[DVector<f64>],
    us: &[DVector<f64>],
    prox_datas: &mut [CostData],
    tan_buf: &mut [DVector<f64>],
    ctrl_buf: &mut [DVector<f64>],
) {
    let nsteps = problem.num_steps();

    for (k, stage) in problem.stages.iter().enumerate() {
        let ndx = stage.ndx1();
        let nu = stage.nu();
        let pd = &mut prox_datas[k];

        stage.xspace.difference(&prev_xs[k], &xs[k], &mut tan_buf[k]);
        stage.uspace.difference(&prev_us[k], &us[k], &mut ctrl_buf[k]);
        let mut value = 0.0;
        for i in 0..ndx {
            let di = tan_buf[k][i];
            pd.grad[i] = di;
            value += di * di;
        }
        for i in 0..nu {
            let di = ctrl_buf[k][i];
            pd.grad[ndx + i] = di;
            value += di * di;
        }
        pd.value = 0.5 * value;

        pd.hess.fill(0.0);
        for i in 0..(ndx + nu) {
            pd.hess[(i, i)] = 1.0;
        }
    }

    // terminal node: state only
    let stage = &problem.stages[nsteps - 1];
    let ndx = stage.ndx2();
    let pd = &mut prox_datas[nsteps];
    stage
        .xspace_next
        .difference(&prev_xs[nsteps], &xs[nsteps], &mut tan_buf[nsteps]);
    let mut value = 0.0;
    for i in 0..ndx {
        let di = tan_buf[nsteps][i];
        pd.grad[i] = di;
        value += di * di;
    }
    pd.value = 0.5 * value;
    pd.hess.fill(0.0);
    for i in 0..ndx {
        pd.hess[(i, i)] = 1.0;
    }
}

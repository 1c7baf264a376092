//! Backward Riccati-like sweep.
//!
//! For the current iterate `(xs, us, lams)` the sweep initializes the
//! terminal value store, then walks stages backward solving a regularized
//! saddle-point KKT system per stage:
//!
//! ```text
//! K = [ H + xi*I   J^T   ]        H = Q-Hessian over the (u, y) block
//!     [ J          -mu*I ]        J = stacked constraint Jacobians (u, y)
//! ```
//!
//! The right-hand side carries the Q gradient and the scaled multiplier
//! residual in column 0 and the `x`-coupling blocks in the remaining `ndx1`
//! columns, so the solve `G = -K^{-1} RHS` yields the feedforward step and
//! the feedback gains in one factorization. The value store is updated with
//! the Schur-complement form `V = Q_xx + RHS^T G`.
//!
//! The initial node's state-only KKT (against the initial-state residual) is
//! solved at the end of the sweep so the stage scoreboards are coherent for
//! the current iterate.

use crate::linalg::LdlError;
use crate::math;
use crate::problem::TrajOptProblem;
use crate::solver::results::Results;
use crate::solver::workspace::Workspace;

/// Run the full backward sweep, then the initial-node KKT; aggregates the
/// inner criterion and dual infeasibility scoreboards.
pub fn backward_pass(
    problem: &TrajOptProblem,
    ws: &mut Workspace,
    results: &mut Results,
    mu: f64,
    rho: f64,
    xreg: f64,
) -> Result<(), LdlError> {
    compute_terminal_value(problem, ws, results, mu, rho);

    let nsteps = problem.num_steps();
    for i in 0..nsteps {
        compute_gains(problem, ws, results, nsteps - i - 1, mu, rho, xreg)?;
    }
    compute_initial_step(ws, results, mu, rho)?;

    ws.inner_criterion = math::infty_norm_slice(&ws.inner_criterion_by_stage);
    results.dual_infeasibility = math::infty_norm_slice(&ws.dual_infeas_by_stage);
    Ok(())
}

/// Terminal node: `V_N = L_N + rho * P_N`, folded with the terminal
/// constraint's projected multiplier estimate when present.
pub fn compute_terminal_value(
    problem: &TrajOptProblem,
    ws: &mut Workspace,
    results: &mut Results,
    mu: f64,
    rho: f64,
) {
    let nsteps = problem.num_steps();
    let mu_inv = 1.0 / mu;
    let ndx = ws.value_params[nsteps].ndx;

    let term_cost_data = &ws.problem_data.term_cost_data;
    let proxdata = &ws.prox_datas[nsteps];
    let term_value = &mut ws.value_params[nsteps];

    term_value.storage.fill(0.0);
    term_value.set_v(term_cost_data.value + rho * proxdata.value);
    for i in 0..ndx {
        *term_value.vx_mut(i) = term_cost_data.grad[i] + rho * proxdata.grad[i];
        for j in 0..ndx {
            *term_value.vxx_mut(i, j) = term_cost_data.hess[(i, j)] + rho * proxdata.hess[(i, j)];
        }
    }

    if let Some(term_cstr) = &problem.term_constraint {
        debug_assert_eq!(results.lams.len(), nsteps + 2);
        let cstr_data = ws.problem_data.term_cstr_data.as_mut().unwrap();
        let nr = cstr_data.nr;

        let lamin = &results.lams[nsteps + 1];
        let lamprev = &ws.prev_lams[nsteps + 1];
        let lamplus = &mut ws.lams_plus[nsteps + 1];
        let lampdal = &mut ws.lams_pdal[nsteps + 1];

        // z = lam_bar + c/mu; compose the Jacobian, project the estimate
        let z = &mut ws.cstr_scratch.as_mut_slice()[..nr];
        for r in 0..nr {
            z[r] = lamprev[r] + mu_inv * cstr_data.value[r];
        }
        term_cstr
            .set
            .apply_normal_cone_projection_jacobian(z, &mut cstr_data.jac_buffer);
        term_cstr
            .set
            .normal_cone_projection(z, lamplus.as_mut_slice());
        for r in 0..nr {
            lampdal[r] = 2.0 * lamplus[r] - lamin[r];
        }

        // terminal gain: feedforward = lam_plus - lam, feedback = (1/mu) J
        let gain = &mut results.gains[nsteps];
        for r in 0..nr {
            gain[(r, 0)] = lamplus[r] - lamin[r];
            for c in 0..ndx {
                gain[(r, 1 + c)] = mu_inv * cstr_data.jac_buffer[(r, c)];
            }
        }

        // fold the constraint into the value store:
        // Vx += J^T (lam + ff),  Vxx += vhp + J^T fb
        for i in 0..ndx {
            let mut acc = 0.0;
            for r in 0..nr {
                acc += cstr_data.jac_buffer[(r, i)] * (lamin[r] + gain[(r, 0)]);
            }
            *term_value.vx_mut(i) += acc;
            for j in 0..ndx {
                let mut hcc = cstr_data.vhp_buffer[(i, j)];
                for r in 0..nr {
                    hcc += cstr_data.jac_buffer[(r, i)] * gain[(r, 1 + j)];
                }
                *term_value.vxx_mut(i, j) += hcc;
            }
        }
    }

    term_value.symmetrize();
}

/// Stage `step`: assemble the Q store, compose constraint Jacobians with the
/// normal-cone projection, factorize the stage KKT, and recurse the value.
pub fn compute_gains(
    problem: &TrajOptProblem,
    ws: &mut Workspace,
    results: &mut Results,
    step: usize,
    mu: f64,
    rho: f64,
    xreg: f64,
) -> Result<(), LdlError> {
    let stage = &problem.stages[step];
    let d = ws.dims[step];
    let (ndx1, nu, ndx2) = (d.ndx1, d.nu, d.ndx2);
    let (nprim, ndual) = (d.nprim, d.ndual);
    let nq = ndx1 + nu + ndx2;
    let mu_inv = 1.0 / mu;

    debug_assert_eq!(ws.value_params[step + 1].ndx, ndx2);

    // ---- Q store: cost + proximal term, chained with V_{step+1} ----
    {
        let cdata = &ws.problem_data.stage_data[step].cost_data;
        let proxdata = &ws.prox_datas[step];
        let vnext = &ws.value_params[step + 1];
        let qparam = &mut ws.q_params[step];

        qparam.storage.fill(0.0);
        qparam.set_q(cdata.value);
        for i in 0..(ndx1 + nu) {
            *qparam.grad_mut(i) = cdata.grad[i] + rho * proxdata.grad[i];
            for j in 0..(ndx1 + nu) {
                *qparam.hess_mut(i, j) = cdata.hess[(i, j)] + rho * proxdata.hess[(i, j)];
            }
        }
        for i in 0..ndx2 {
            *qparam.grad_mut(ndx1 + nu + i) = vnext.vx(i);
            for j in 0..ndx2 {
                *qparam.hess_mut(ndx1 + nu + i, ndx1 + nu + j) = vnext.vxx(i, j);
            }
        }
    }

    // ---- constraints: project multiplier estimates, accumulate into Q ----
    {
        let sd = &mut ws.problem_data.stage_data[step];
        let qparam = &mut ws.q_params[step];
        let lam_inn = &results.lams[step + 1];
        let lamprev = &ws.prev_lams[step + 1];
        let lamplus = &mut ws.lams_plus[step + 1];
        let lampdal = &mut ws.lams_pdal[step + 1];
        let layout = stage.layout();

        for (j, cstr) in stage.constraints.iter().enumerate() {
            let cd = &mut sd.constraint_data[j];
            let nr = cd.nr;
            let off = layout.offset(j);

            let z = &mut ws.cstr_scratch.as_mut_slice()[..nr];
            for r in 0..nr {
                z[r] = lamprev[off + r] + mu_inv * cd.value[r];
            }
            cstr
                .set
                .apply_normal_cone_projection_jacobian(z, &mut cd.jac_buffer);
            cstr
                .set
                .normal_cone_projection(z, &mut lamplus.as_mut_slice()[off..off + nr]);
            for r in 0..nr {
                lampdal[off + r] = 2.0 * lamplus[off + r] - lam_inn[off + r];
            }

            // q.grad += J^T lam, q.hess += vhp
            for c in 0..nq {
                let mut acc = 0.0;
                for r in 0..nr {
                    acc += cd.jac_buffer[(r, c)] * lam_inn[off + r];
                }
                *qparam.grad_mut(c) += acc;
                for c2 in 0..nq {
                    *qparam.hess_mut(c, c2) += cd.vhp_buffer[(c, c2)];
                }
            }
        }
        qparam.symmetrize();
    }

    // ---- assemble the stage KKT system in the shared buffer ----
    let dim = nprim + ndual;
    {
        let qparam = &ws.q_params[step];
        let sd = &ws.problem_data.stage_data[step];
        let lam_inn = &results.lams[step + 1];
        let lamplus = &ws.lams_plus[step + 1];
        let layout = stage.layout();
        let kkt_mat = &mut ws.kkt_mat;
        let kkt_rhs = &mut ws.kkt_rhs;

        // the buffer is shared across stages of different sizes: clear the
        // active block before assembly
        for c in 0..dim {
            for r in 0..dim {
                kkt_mat[(r, c)] = 0.0;
            }
        }
        for c in 0..(ndx1 + 1) {
            for r in 0..dim {
                kkt_rhs[(r, c)] = 0.0;
            }
        }

        // primal block: (u, y) Hessian of Q, with primal regularization
        for i in 0..nprim {
            for j in 0..nprim {
                kkt_mat[(i, j)] = qparam.hess(ndx1 + i, ndx1 + j);
            }
            kkt_mat[(i, i)] += xreg;
        }
        // dual block: -mu on the diagonal
        for r in 0..ndual {
            kkt_mat[(nprim + r, nprim + r)] = -mu;
        }
        // constraint Jacobians: (u, y) columns below the primal block,
        // x columns into the feedback panel of the RHS
        for j in 0..sd.constraint_data.len() {
            let cd = &sd.constraint_data[j];
            let off = layout.offset(j);
            for r in 0..cd.nr {
                for c in 0..nprim {
                    kkt_mat[(nprim + off + r, c)] = cd.jac_buffer[(r, ndx1 + c)];
                }
                for c in 0..ndx1 {
                    kkt_rhs[(nprim + off + r, 1 + c)] = cd.jac_buffer[(r, c)];
                }
            }
        }

        // RHS column 0: Q gradient over (u, y), then mu * (lam_plus - lam)
        for i in 0..nprim {
            kkt_rhs[(i, 0)] = qparam.grad(ndx1 + i);
        }
        for r in 0..ndual {
            kkt_rhs[(nprim + r, 0)] = mu * (lamplus[r] - lam_inn[r]);
        }
        // feedback panel: Qxu^T and Qxy^T
        for c in 0..ndx1 {
            for i in 0..nu {
                kkt_rhs[(i, 1 + c)] = qparam.hess(c, ndx1 + i);
            }
            for i in 0..ndx2 {
                kkt_rhs[(nu + i, 1 + c)] = qparam.hess(c, ndx1 + nu + i);
            }
        }
    }

    // ---- stage scoreboards (from RHS column 0, before the solve) ----
    {
        let proxdata = &ws.prox_datas[step];
        let proxnext = &ws.prox_datas[step + 1];
        let mut res_u = 0.0f64;
        for i in 0..nu {
            res_u = res_u.max((ws.kkt_rhs[(i, 0)] - rho * proxdata.grad[ndx1 + i]).abs());
        }
        let mut res_y = 0.0f64;
        for i in 0..ndx2 {
            res_y = res_y.max((ws.kkt_rhs[(nu + i, 0)] - rho * proxnext.grad[i]).abs());
        }
        let mut crit = 0.0f64;
        for r in 0..dim {
            let v = ws.kkt_rhs[(r, 0)];
            ws.rhs0[step + 1][r] = v;
            crit = crit.max(v.abs());
        }
        ws.inner_criterion_by_stage[step + 1] = crit;
        ws.dual_infeas_by_stage[step + 1] = res_u.max(res_y);
    }

    // ---- factorize and solve for the gains ----
    ws.ldl.factor(&ws.kkt_mat, dim)?;
    {
        let gain = &mut results.gains[step];
        debug_assert_eq!(gain.nrows(), dim);
        for c in 0..(ndx1 + 1) {
            for r in 0..dim {
                gain[(r, c)] = -ws.kkt_rhs[(r, c)];
            }
        }
        ws.ldl.solve_mat_in_place(gain);
    }

    // ---- value recursion: V = Q_xx-block + RHS^T G ----
    {
        let gain = &results.gains[step];
        let qparam = &ws.q_params[step];
        let vcurr = &mut ws.value_params[step];
        for a in 0..(ndx1 + 1) {
            for b in 0..(ndx1 + 1) {
                let mut acc = qparam.storage[(a, b)];
                for r in 0..dim {
                    acc += ws.kkt_rhs[(r, a)] * gain[(r, b)];
                }
                vcurr.storage[(a, b)] = acc;
            }
        }
        vcurr.symmetrize();
    }
    Ok(())
}

/// Initial node: state-only KKT against the initial-state residual, using
/// the recursed `V_0`.
pub fn compute_initial_step(
    ws: &mut Workspace,
    results: &mut Results,
    mu: f64,
    rho: f64,
) -> Result<(), LdlError> {
    let ndx0 = ws.ndx0;
    let ndual0 = ws.ndual0;
    let dim = ndx0 + ndual0;
    let mu_inv = 1.0 / mu;

    {
        let vp = &ws.value_params[0];
        let init_data = &ws.problem_data.init_data;
        let proxdata0 = &ws.prox_datas[0];
        let lamin0 = &results.lams[0];
        let prevlam0 = &ws.prev_lams[0];
        let lamplus0 = &mut ws.lams_plus[0];
        let lampdal0 = &mut ws.lams_pdal[0];
        let kkt_mat = &mut ws.kkt_mat;
        let kkt_rhs = &mut ws.kkt_rhs;

        for c in 0..dim {
            for r in 0..dim {
                kkt_mat[(r, c)] = 0.0;
            }
            kkt_rhs[(c, 0)] = 0.0;
        }

        for i in 0..ndx0 {
            for j in 0..ndx0 {
                kkt_mat[(i, j)] = vp.vxx(i, j) + rho * proxdata0.hess[(i, j)];
            }
        }
        for r in 0..ndual0 {
            for c in 0..ndx0 {
                kkt_mat[(ndx0 + r, c)] = init_data.jac_buffer[(r, c)];
            }
            kkt_mat[(ndx0 + r, ndx0 + r)] = -mu;
        }

        // the initial-state residual is an equality: no projection
        for r in 0..ndual0 {
            lamplus0[r] = prevlam0[r] + mu_inv * init_data.value[r];
            lampdal0[r] = 2.0 * lamplus0[r] - lamin0[r];
        }

        for i in 0..ndx0 {
            let mut acc = vp.vx(i) + rho * proxdata0.grad[i];
            for r in 0..ndual0 {
                acc += init_data.jac_buffer[(r, i)] * lamin0[r];
            }
            kkt_rhs[(i, 0)] = acc;
        }
        for r in 0..ndual0 {
            kkt_rhs[(ndx0 + r, 0)] = mu * (lamplus0[r] - lamin0[r]);
        }
    }

    let mut crit = 0.0f64;
    let mut dual = 0.0f64;
    for r in 0..dim {
        let v = ws.kkt_rhs[(r, 0)];
        ws.rhs0[0][r] = v;
        crit = crit.max(v.abs());
        if r < ndx0 {
            dual = dual.max(v.abs());
        }
    }
    ws.inner_criterion_by_stage[0] = crit;
    ws.dual_infeas_by_stage[0] = dual;

    ws.ldl.factor(&ws.kkt_mat, dim)?;
    {
        let step0 = &mut ws.pd_step[0];
        for r in 0..dim {
            step0[r] = -ws.kkt_rhs[(r, 0)];
        }
        ws.ldl.solve_in_place(step0);
    }
    Ok(())
}

//! Primal-dual augmented-Lagrangian merit function.
//!
//! At a candidate `(x, u, lam)` with proximal centers `(x_bar, u_bar,
//! lam_bar)` from the previous AL iterate, the merit is
//!
//! ```text
//! Phi = J(x, u) + (rho/2)*||(x,u) - (x_bar,u_bar)||^2
//!     + sum_constraints psi_{mu,mode}(c, lam_bar, lam)
//! ```
//!
//! with the per-constraint augmented term, writing `z = lam_bar + c/mu` and
//! `lam_plus = ncp(z)`:
//!
//! - `NEWTON`:       `psi = (mu/2) ||ncp(lam + c/mu)||^2` (classical AL at
//!   the current multiplier iterate)
//! - `PRIMAL`:       `psi = (mu/2) ||lam_plus||^2`
//! - `PRIMAL_DUAL`:  `psi = (mu/2) ||lam_plus||^2 + (mu/2) ||lam_plus - lam||^2`;
//!   the dual penalty equals `(mu/2) ||lam_pd - lam_plus||^2` for the
//!   primal-dual estimate `lam_pd = 2 lam_plus - lam`
//!
//! The raw trajectory cost is retained separately for logging.

use nalgebra::DVector;

use crate::cost::CostData;
use crate::problem::{TrajOptData, TrajOptProblem};
use crate::sets::ConstraintSet;

/// Merit evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeritMode {
    Newton,
    Primal,
    PrimalDual,
}

/// Merit function state for one AL subproblem (fixed `mu`, `rho`).
#[derive(Debug, Clone)]
pub struct PdalMerit {
    pub mu: f64,
    pub rho: f64,
    pub mode: MeritMode,

    /// Last evaluated merit value.
    pub value: f64,
    /// Raw trajectory cost of the last evaluation.
    pub traj_cost: f64,
}

impl PdalMerit {
    pub fn new(mu: f64, rho: f64, mode: MeritMode) -> Self {
        assert!(mu > 0.0, "penalty parameter must be positive");
        Self {
            mu,
            rho,
            mode,
            value: 0.0,
            traj_cost: 0.0,
        }
    }

    /// Evaluate the merit at a candidate point.
    ///
    /// `prob_data` and `prox_datas` must already hold evaluations at the
    /// candidate `(xs, us)`; `lams` is the candidate multiplier stack and
    /// `prev_lams` the proximal centers. `z_scratch`/`p_scratch` are sized to
    /// the largest multiplier stack.
    pub fn evaluate(
        &mut self,
        problem: &TrajOptProblem,
        lams: &[DVector<f64>],
        prev_lams: &[DVector<f64>],
        prox_datas: &[CostData],
        prob_data: &TrajOptData,
        z_scratch: &mut DVector<f64>,
        p_scratch: &mut DVector<f64>,
    ) -> f64 {
        let nsteps = problem.num_steps();
        self.traj_cost = prob_data.trajectory_cost();

        let prox_value: f64 = prox_datas.iter().map(|p| p.value).sum();

        let mut penalty = self.penalty_term(
            &ConstraintSet::Equality,
            prob_data.init_data.value.as_slice(),
            lams[0].as_slice(),
            prev_lams[0].as_slice(),
            z_scratch.as_mut_slice(),
            p_scratch.as_mut_slice(),
        );

        for (k, stage) in problem.stages.iter().enumerate() {
            let sd = &prob_data.stage_data[k];
            let layout = stage.layout();
            for (j, c) in stage.constraints.iter().enumerate() {
                let rng = layout.range(j);
                penalty += self.penalty_term(
                    &c.set,
                    sd.constraint_data[j].value.as_slice(),
                    &lams[k + 1].as_slice()[rng.clone()],
                    &prev_lams[k + 1].as_slice()[rng],
                    z_scratch.as_mut_slice(),
                    p_scratch.as_mut_slice(),
                );
            }
        }

        if let (Some(c), Some(cd)) = (&problem.term_constraint, prob_data.term_cstr_data.as_ref()) {
            penalty += self.penalty_term(
                &c.set,
                cd.value.as_slice(),
                lams[nsteps + 1].as_slice(),
                prev_lams[nsteps + 1].as_slice(),
                z_scratch.as_mut_slice(),
                p_scratch.as_mut_slice(),
            );
        }

        self.value = self.traj_cost + self.rho * prox_value + penalty;
        self.value
    }

    fn penalty_term(
        &self,
        set: &ConstraintSet,
        c: &[f64],
        lam: &[f64],
        prev_lam: &[f64],
        z_scratch: &mut [f64],
        p_scratch: &mut [f64],
    ) -> f64 {
        let nr = c.len();
        let mu_inv = 1.0 / self.mu;
        let center = match self.mode {
            MeritMode::Newton => lam,
            MeritMode::Primal | MeritMode::PrimalDual => prev_lam,
        };

        let z = &mut z_scratch[..nr];
        for i in 0..nr {
            z[i] = center[i] + mu_inv * c[i];
        }
        let proj = &mut p_scratch[..nr];
        set.normal_cone_projection(z, proj);

        let mut pen = 0.0;
        for p in proj.iter() {
            pen += p * p;
        }
        pen *= 0.5 * self.mu;

        if self.mode == MeritMode::PrimalDual {
            let mut dual = 0.0;
            for i in 0..nr {
                let d = proj[i] - lam[i];
                dual += d * d;
            }
            pen += 0.5 * self.mu * dual;
        }
        pen
    }
}

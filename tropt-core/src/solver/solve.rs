//! Solver entry point: settings, AL outer loop, inner Newton loop.

use nalgebra::DVector;

use crate::linalg::LdlError;
use crate::math;
use crate::problem::TrajOptProblem;
use crate::solver::backward::backward_pass;
use crate::solver::forward::{compute_direction, evaluate_prox, try_step};
use crate::solver::linesearch::{
    armijo_search, cubic_interp_search, DirectionalDerivative, LinesearchParams,
    LinesearchStrategy,
};
use crate::solver::merit::{MeritMode, PdalMerit};
use crate::solver::results::Results;
use crate::solver::workspace::Workspace;
use thiserror::Error;

/// How accepted multiplier estimates seed the next AL iterate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplierUpdateMode {
    /// Keep the Newton iterate `lam`.
    Newton,
    /// Use the projected estimate `lam_plus`.
    Primal,
    /// Use the primal-dual estimate `lam_pd = 2 lam_plus - lam`.
    PrimalDual,
}

/// Misuse errors. Numerical trouble and non-convergence never surface here;
/// they are reported through the returned flag and [`Results`].
#[derive(Error, Debug)]
pub enum SolverError {
    /// `run` was called before `setup`.
    #[error("workspace and results were not allocated yet; call setup() first")]
    NotSetUp,

    /// Warm-start vectors have the wrong length.
    #[error("warm-start for {what} has length {got}, expected {expected}")]
    WarmStartSize {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Problem structure changed between `setup` and `run`.
    #[error("problem topology changed since setup (stage {stage})")]
    TopologyChanged { stage: usize },

    /// Problem failed validation.
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
}

/// Solver settings and parameters.
#[derive(Debug, Clone)]
pub struct SolverSettings {
    /// Combined primal/dual tolerance declaring convergence.
    pub target_tol: f64,

    /// Initial AL penalty parameter (the penalty weight is `1/mu`).
    pub mu_init: f64,
    /// Initial proximal weight.
    pub rho_init: f64,

    /// BCL tolerance exponents: on success `prim_tol *= mu^prim_alpha`,
    /// `inner_tol *= mu^dual_alpha`; on failure the tolerances are reset to
    /// `prim_tol0 * mu^prim_beta` and `inner_tol0 * mu^dual_beta`.
    pub prim_alpha: f64,
    pub prim_beta: f64,
    pub dual_alpha: f64,
    pub dual_beta: f64,

    /// Inner (Newton) iteration cap across all AL cycles.
    pub max_iters: usize,
    /// AL cycle cap.
    pub max_al_iters: usize,

    /// Print an AL-cycle header and a line per inner iteration.
    pub verbose: bool,

    /// Multiplicative penalty update on failed AL cycles (`< 1`).
    pub mu_factor: f64,
    /// Unconditional proximal weight update at each AL cycle end.
    pub rho_factor: f64,
    /// Penalty floor; keeps merit values finite on infeasible problems.
    pub mu_min: f64,

    pub multiplier_update_mode: MultiplierUpdateMode,
    /// Merit evaluation mode for the line search.
    pub merit_mode: MeritMode,
    pub linesearch: LinesearchParams,
    /// Directional-derivative estimator for the line search.
    pub dderiv: DirectionalDerivative,

    /// Primal regularization schedule: start at `xreg_init` (default 0); on a
    /// non-regular KKT pivot bump to `xreg_bump`, then grow by `xreg_growth`
    /// per retry up to `xreg_max`. `xreg_growth <= 1` disables retries.
    pub xreg_init: f64,
    pub xreg_bump: f64,
    pub xreg_growth: f64,
    pub xreg_max: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            target_tol: 1e-6,
            mu_init: 0.01,
            rho_init: 0.0,
            prim_alpha: 0.1,
            prim_beta: 0.9,
            dual_alpha: 1.0,
            dual_beta: 1.0,
            max_iters: 200,
            max_al_iters: 100,
            verbose: false,
            mu_factor: 0.01,
            rho_factor: 1.0,
            mu_min: 1e-12,
            multiplier_update_mode: MultiplierUpdateMode::Newton,
            merit_mode: MeritMode::PrimalDual,
            linesearch: LinesearchParams::default(),
            dderiv: DirectionalDerivative::FiniteDiff,
            xreg_init: 0.0,
            xreg_bump: 1e-10,
            xreg_growth: 10.0,
            xreg_max: 1e6,
        }
    }
}

type Callback = Box<dyn FnMut(&Workspace, &Results)>;

/// Proximal primal-dual augmented-Lagrangian DDP solver.
pub struct SolverProxDdp {
    pub settings: SolverSettings,

    // run-scoped state
    mu: f64,
    rho: f64,
    xreg: f64,
    inner_tol: f64,
    prim_tol: f64,
    inner_tol0: f64,
    prim_tol0: f64,

    workspace: Option<Workspace>,
    results: Option<Results>,
    callbacks: Vec<Callback>,
}

impl SolverProxDdp {
    pub fn new(settings: SolverSettings) -> Self {
        assert!(settings.target_tol > 0.0, "target tolerance must be positive");
        assert!(settings.mu_init > 0.0, "mu_init must be positive");
        assert!(
            settings.mu_factor > 0.0 && settings.mu_factor < 1.0,
            "mu_factor must lie in (0, 1)"
        );
        Self {
            mu: settings.mu_init,
            rho: settings.rho_init,
            xreg: settings.xreg_init,
            inner_tol: 1.0,
            prim_tol: 1.0,
            inner_tol0: 1.0,
            prim_tol0: 1.0,
            settings,
            workspace: None,
            results: None,
            callbacks: Vec::new(),
        }
    }

    /// Allocate workspace and results for `problem`. Must be called before
    /// [`SolverProxDdp::run`], and again whenever the problem topology
    /// changes.
    pub fn setup(&mut self, problem: &TrajOptProblem) {
        self.workspace = Some(Workspace::new(problem));
        self.results = Some(Results::new(problem));
    }

    /// Register an end-of-iteration callback, invoked synchronously on the
    /// solver thread. Callbacks must not mutate problem structure.
    pub fn register_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&Workspace, &Results) + 'static,
    {
        self.callbacks.push(Box::new(cb));
    }

    pub fn clear_callbacks(&mut self) {
        self.callbacks.clear();
    }

    pub fn results(&self) -> Option<&Results> {
        self.results.as_ref()
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Solve `problem` starting from the given warm start (empty slices mean
    /// cold start from the spaces' neutral elements). Returns whether the
    /// combined infeasibility reached `target_tol`.
    pub fn run(
        &mut self,
        problem: &TrajOptProblem,
        xs_init: &[DVector<f64>],
        us_init: &[DVector<f64>],
    ) -> Result<bool, SolverError> {
        if self.workspace.is_none() || self.results.is_none() {
            return Err(SolverError::NotSetUp);
        }
        let mut ws = self.workspace.take().unwrap();
        let mut results = self.results.take().unwrap();

        let out = self.run_impl(problem, &mut ws, &mut results, xs_init, us_init);

        self.workspace = Some(ws);
        self.results = Some(results);
        out
    }

    fn run_impl(
        &mut self,
        problem: &TrajOptProblem,
        ws: &mut Workspace,
        results: &mut Results,
        xs_init: &[DVector<f64>],
        us_init: &[DVector<f64>],
    ) -> Result<bool, SolverError> {
        problem.validate().map_err(SolverError::InvalidProblem)?;
        self.check_topology(problem, ws)?;
        self.seed_trajectory(problem, results, xs_init, us_init)?;

        let nsteps = ws.nsteps;
        for i in 0..=nsteps {
            ws.prev_xs[i].copy_from(&results.xs[i]);
        }
        for i in 0..nsteps {
            ws.prev_us[i].copy_from(&results.us[i]);
        }
        for i in 0..ws.num_lams() {
            ws.prev_lams[i].copy_from(&results.lams[i]);
        }

        self.mu = self.settings.mu_init.max(self.settings.mu_min);
        self.rho = self.settings.rho_init;
        self.xreg = self.settings.xreg_init;
        self.inner_tol0 = 1.0;
        self.prim_tol0 = 1.0;
        self.update_tolerances_on_failure();
        self.clamp_tolerances();

        results.conv = false;
        results.num_iters = 0;

        let mut al_iter = 0usize;
        while al_iter < self.settings.max_al_iters && results.num_iters < self.settings.max_iters {
            if self.settings.verbose {
                eprintln!(
                    "[AL iter {:>2}] ( inner_tol {:.2e} | prim_tol {:.2e} | mu {:.2e} | rho {:.2e} )",
                    al_iter + 1,
                    self.inner_tol,
                    self.prim_tol,
                    self.mu,
                    self.rho
                );
            }

            let inner_ok = self.inner_loop(problem, ws, results);
            self.compute_infeasibilities(problem, ws, results);
            if !inner_ok {
                break;
            }

            // accept primal proximal centers
            for i in 0..=nsteps {
                ws.prev_xs[i].copy_from(&results.xs[i]);
            }
            for i in 0..nsteps {
                ws.prev_us[i].copy_from(&results.us[i]);
            }

            if results.primal_infeasibility <= self.prim_tol {
                self.update_tolerances_on_success();

                match self.settings.multiplier_update_mode {
                    MultiplierUpdateMode::Newton => {
                        for i in 0..ws.num_lams() {
                            ws.prev_lams[i].copy_from(&results.lams[i]);
                        }
                    }
                    MultiplierUpdateMode::Primal => {
                        for i in 0..ws.num_lams() {
                            ws.prev_lams[i].copy_from(&ws.lams_plus[i]);
                        }
                    }
                    MultiplierUpdateMode::PrimalDual => {
                        for i in 0..ws.num_lams() {
                            ws.prev_lams[i].copy_from(&ws.lams_pdal[i]);
                        }
                    }
                }

                if results
                    .primal_infeasibility
                    .max(results.dual_infeasibility)
                    <= self.settings.target_tol
                {
                    results.conv = true;
                    break;
                }
            } else {
                self.update_al_penalty();
                self.update_tolerances_on_failure();
            }
            self.rho *= self.settings.rho_factor;
            self.clamp_tolerances();

            al_iter += 1;
        }

        if self.settings.verbose {
            if results.conv {
                eprintln!("Successfully converged.");
            } else {
                eprintln!("Convergence failure.");
            }
        }
        self.invoke_callbacks(ws, results);
        Ok(results.conv)
    }

    /// Inner semismooth Newton loop for the current AL subproblem. Returns
    /// `false` only when the regularization schedule is exhausted.
    fn inner_loop(
        &mut self,
        problem: &TrajOptProblem,
        ws: &mut Workspace,
        results: &mut Results,
    ) -> bool {
        let mut merit = PdalMerit::new(self.mu, self.rho, self.settings.merit_mode);
        let eps = 1e-10;

        while results.num_iters < self.settings.max_iters {
            problem.evaluate(&results.xs, &results.us, &mut ws.problem_data);
            problem.compute_derivatives(&results.xs, &results.us, &results.lams, &mut ws.problem_data);
            evaluate_prox(
                problem,
                &ws.prev_xs,
                &ws.prev_us,
                &results.xs,
                &results.us,
                &mut ws.prox_datas,
                &mut ws.tan_buf,
                &mut ws.ctrl_buf,
            );

            match backward_pass(problem, ws, results, self.mu, self.rho, self.xreg) {
                Ok(()) => {}
                Err(LdlError::NonRegularPivot { .. }) => {
                    // discard the sweep, raise the primal regularization,
                    // retry without consuming an iteration
                    if !self.bump_xreg() {
                        return false;
                    }
                    continue;
                }
                Err(_) => return false,
            }

            let phi0 = merit.evaluate(
                problem,
                &results.lams,
                &ws.prev_lams,
                &ws.prox_datas,
                &ws.problem_data,
                &mut ws.cstr_scratch,
                &mut ws.cstr_scratch2,
            );
            results.traj_cost = merit.traj_cost;
            results.merit_value = phi0;

            self.compute_infeasibilities(problem, ws, results);

            if ws.inner_criterion < self.inner_tol {
                break;
            }
            if ws.inner_criterion < self.settings.target_tol
                && results.primal_infeasibility < self.settings.target_tol
            {
                break;
            }

            compute_direction(problem, ws, results);

            let analytic_dphi0: f64 = ws
                .rhs0
                .iter()
                .zip(ws.pd_step.iter())
                .map(|(r, s)| math::dot(r, s))
                .sum();

            let mut merit_eval = |alpha: f64| -> f64 {
                try_step(problem, ws, results, alpha);
                problem.evaluate(&ws.trial_xs, &ws.trial_us, &mut ws.trial_prob_data);
                evaluate_prox(
                    problem,
                    &ws.prev_xs,
                    &ws.prev_us,
                    &ws.trial_xs,
                    &ws.trial_us,
                    &mut ws.prox_datas,
                    &mut ws.tan_buf,
                    &mut ws.ctrl_buf,
                );
                merit.evaluate(
                    problem,
                    &ws.trial_lams,
                    &ws.prev_lams,
                    &ws.prox_datas,
                    &ws.trial_prob_data,
                    &mut ws.cstr_scratch,
                    &mut ws.cstr_scratch2,
                )
            };

            let dphi0 = match self.settings.dderiv {
                DirectionalDerivative::FiniteDiff => (merit_eval(eps) - phi0) / eps,
                DirectionalDerivative::Analytic => analytic_dphi0,
            };

            let (alpha, phi_new) = match self.settings.linesearch.strategy {
                LinesearchStrategy::Armijo => {
                    armijo_search(&mut merit_eval, phi0, dphi0, &self.settings.linesearch)
                }
                LinesearchStrategy::CubicInterp => {
                    cubic_interp_search(&mut merit_eval, phi0, dphi0, &self.settings.linesearch)
                }
            };

            results.traj_cost = merit.traj_cost;
            results.merit_value = phi_new;

            if self.settings.verbose {
                eprintln!(
                    "[iter {:>4}] inner_crit={:.3e} prim_err={:.3e} dual_err={:.3e} alpha={:.3e} dphi0={:.3e} merit={:.3e}",
                    results.num_iters + 1,
                    ws.inner_criterion,
                    results.primal_infeasibility,
                    results.dual_infeasibility,
                    alpha,
                    dphi0,
                    phi_new
                );
            }

            // accept the step
            for i in 0..=ws.nsteps {
                results.xs[i].copy_from(&ws.trial_xs[i]);
            }
            for i in 0..ws.nsteps {
                results.us[i].copy_from(&ws.trial_us[i]);
            }
            for i in 0..ws.num_lams() {
                results.lams[i].copy_from(&ws.trial_lams[i]);
            }

            results.num_iters += 1;
            self.invoke_callbacks(ws, results);
        }
        true
    }

    /// Per-stage primal infeasibility through the normal-cone projection; the
    /// initial-state residual and the terminal constraint occupy the extra
    /// scoreboard slots.
    fn compute_infeasibilities(
        &self,
        problem: &TrajOptProblem,
        ws: &mut Workspace,
        results: &mut Results,
    ) {
        let nsteps = ws.nsteps;

        ws.primal_infeas_by_stage[0] = math::infty_norm(&ws.problem_data.init_data.value);

        for (k, stage) in problem.stages.iter().enumerate() {
            let sd = &ws.problem_data.stage_data[k];
            let mut infeas = 0.0f64;
            for (j, cstr) in stage.constraints.iter().enumerate() {
                let cd = &sd.constraint_data[j];
                let nr = cd.nr;
                let proj = &mut ws.cstr_scratch.as_mut_slice()[..nr];
                cstr.set.normal_cone_projection(cd.value.as_slice(), proj);
                infeas = infeas.max(math::infty_norm_slice(proj));
            }
            ws.primal_infeas_by_stage[k + 1] = infeas;
        }

        ws.primal_infeas_by_stage[nsteps + 1] = match (
            &problem.term_constraint,
            ws.problem_data.term_cstr_data.as_ref(),
        ) {
            (Some(c), Some(cd)) => {
                let proj = &mut ws.cstr_scratch.as_mut_slice()[..cd.nr];
                c.set.normal_cone_projection(cd.value.as_slice(), proj);
                math::infty_norm_slice(proj)
            }
            _ => 0.0,
        };

        results.primal_infeasibility = math::infty_norm_slice(&ws.primal_infeas_by_stage);
    }

    fn seed_trajectory(
        &self,
        problem: &TrajOptProblem,
        results: &mut Results,
        xs_init: &[DVector<f64>],
        us_init: &[DVector<f64>],
    ) -> Result<(), SolverError> {
        let nsteps = problem.num_steps();

        if xs_init.is_empty() {
            for (i, stage) in problem.stages.iter().enumerate() {
                results.xs[i] = stage.xspace.neutral();
            }
            results.xs[nsteps] = problem.stages[nsteps - 1].xspace_next.neutral();
        } else {
            if xs_init.len() != nsteps + 1 {
                return Err(SolverError::WarmStartSize {
                    what: "xs",
                    expected: nsteps + 1,
                    got: xs_init.len(),
                });
            }
            for (dst, src) in results.xs.iter_mut().zip(xs_init.iter()) {
                if dst.len() != src.len() {
                    return Err(SolverError::WarmStartSize {
                        what: "xs entry",
                        expected: dst.len(),
                        got: src.len(),
                    });
                }
                dst.copy_from(src);
            }
        }

        if us_init.is_empty() {
            for (i, stage) in problem.stages.iter().enumerate() {
                results.us[i] = stage.uspace.neutral();
            }
        } else {
            if us_init.len() != nsteps {
                return Err(SolverError::WarmStartSize {
                    what: "us",
                    expected: nsteps,
                    got: us_init.len(),
                });
            }
            for (dst, src) in results.us.iter_mut().zip(us_init.iter()) {
                if dst.len() != src.len() {
                    return Err(SolverError::WarmStartSize {
                        what: "us entry",
                        expected: dst.len(),
                        got: src.len(),
                    });
                }
                dst.copy_from(src);
            }
        }
        Ok(())
    }

    fn check_topology(&self, problem: &TrajOptProblem, ws: &Workspace) -> Result<(), SolverError> {
        if ws.nsteps != problem.num_steps() {
            return Err(SolverError::TopologyChanged { stage: 0 });
        }
        for (k, stage) in problem.stages.iter().enumerate() {
            let d = ws.dims[k];
            if d.ndx1 != stage.ndx1()
                || d.nu != stage.nu()
                || d.ndx2 != stage.ndx2()
                || d.ndual != stage.num_dual()
            {
                return Err(SolverError::TopologyChanged { stage: k });
            }
        }
        let term_dual = problem.term_constraint.as_ref().map_or(0, |c| c.func.nr());
        if term_dual != ws.ndual_term {
            return Err(SolverError::TopologyChanged { stage: ws.nsteps });
        }
        Ok(())
    }

    // ---- BCL schedule ----

    fn update_tolerances_on_failure(&mut self) {
        self.prim_tol = self.prim_tol0 * self.mu.powf(self.settings.prim_beta);
        self.inner_tol = self.inner_tol0 * self.mu.powf(self.settings.dual_beta);
    }

    fn update_tolerances_on_success(&mut self) {
        self.prim_tol *= self.mu.powf(self.settings.prim_alpha);
        self.inner_tol *= self.mu.powf(self.settings.dual_alpha);
    }

    fn update_al_penalty(&mut self) {
        self.mu = (self.mu * self.settings.mu_factor).max(self.settings.mu_min);
    }

    fn clamp_tolerances(&mut self) {
        self.inner_tol = self.inner_tol.max(self.settings.target_tol);
        self.prim_tol = self.prim_tol.max(self.settings.target_tol);
    }

    fn bump_xreg(&mut self) -> bool {
        if self.settings.xreg_growth <= 1.0 {
            return false;
        }
        self.xreg = if self.xreg == 0.0 {
            self.settings.xreg_bump
        } else {
            self.xreg * self.settings.xreg_growth
        };
        self.xreg <= self.settings.xreg_max
    }

    fn invoke_callbacks(&mut self, ws: &Workspace, results: &Results) {
        for cb in self.callbacks.iter_mut() {
            cb(ws, results);
        }
    }
}

//! Pre-allocated solver workspace.
//!
//! Every buffer is sized once from the problem in [`Workspace::new`] and
//! reused across iterations; the hot loop performs no allocation. The KKT
//! matrix and right-hand-side buffers are shared across stages and sized to
//! the largest one; each stage works on the top-left active block.

use nalgebra::{DMatrix, DVector, DVectorView};

use crate::cost::CostData;
use crate::linalg::DenseLdl;
use crate::math;
use crate::problem::{TrajOptData, TrajOptProblem};

/// Symmetric value-function store per node: a `(ndx+1) x (ndx+1)` matrix
/// holding `2v` at `(0,0)`, the gradient `Vx` in column 0, and the Hessian
/// `Vxx` in the bottom-right block.
#[derive(Debug, Clone)]
pub struct ValueStore {
    pub ndx: usize,
    pub storage: DMatrix<f64>,
}

impl ValueStore {
    pub fn new(ndx: usize) -> Self {
        Self {
            ndx,
            storage: DMatrix::zeros(ndx + 1, ndx + 1),
        }
    }

    #[inline]
    pub fn v(&self) -> f64 {
        0.5 * self.storage[(0, 0)]
    }

    #[inline]
    pub fn set_v(&mut self, v: f64) {
        self.storage[(0, 0)] = 2.0 * v;
    }

    #[inline]
    pub fn vx(&self, i: usize) -> f64 {
        self.storage[(1 + i, 0)]
    }

    #[inline]
    pub fn vx_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.storage[(1 + i, 0)]
    }

    #[inline]
    pub fn vxx(&self, i: usize, j: usize) -> f64 {
        self.storage[(1 + i, 1 + j)]
    }

    #[inline]
    pub fn vxx_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.storage[(1 + i, 1 + j)]
    }

    /// Copy the lower triangle onto the upper one.
    pub fn symmetrize(&mut self) {
        math::symmetrize_lower(&mut self.storage, self.ndx + 1);
    }
}

/// Symmetric Q-function store per stage over the joint `(x, u, y)` tangent
/// space (`y` = next-state slot): `2q` at `(0,0)`, gradient in column 0,
/// Hessian in the bottom-right block.
#[derive(Debug, Clone)]
pub struct QStore {
    pub ndx1: usize,
    pub nu: usize,
    pub ndx2: usize,
    pub storage: DMatrix<f64>,
}

impl QStore {
    pub fn new(ndx1: usize, nu: usize, ndx2: usize) -> Self {
        let n = ndx1 + nu + ndx2;
        Self {
            ndx1,
            nu,
            ndx2,
            storage: DMatrix::zeros(n + 1, n + 1),
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.ndx1 + self.nu + self.ndx2
    }

    #[inline]
    pub fn set_q(&mut self, q: f64) {
        self.storage[(0, 0)] = 2.0 * q;
    }

    #[inline]
    pub fn grad(&self, i: usize) -> f64 {
        self.storage[(1 + i, 0)]
    }

    #[inline]
    pub fn grad_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.storage[(1 + i, 0)]
    }

    #[inline]
    pub fn hess(&self, i: usize, j: usize) -> f64 {
        self.storage[(1 + i, 1 + j)]
    }

    #[inline]
    pub fn hess_mut(&mut self, i: usize, j: usize) -> &mut f64 {
        &mut self.storage[(1 + i, 1 + j)]
    }

    pub fn symmetrize(&mut self) {
        let n = self.dim();
        math::symmetrize_lower(&mut self.storage, n + 1);
    }
}

/// Cached dimensions of one stage.
#[derive(Debug, Clone, Copy)]
pub struct StageDims {
    pub ndx1: usize,
    pub nu: usize,
    pub ndx2: usize,
    pub nprim: usize,
    pub ndual: usize,
}

/// Solver scratch state, allocated once per problem.
pub struct Workspace {
    pub nsteps: usize,
    pub dims: Vec<StageDims>,

    /// Initial-node KKT dimensions.
    pub ndx0: usize,
    pub ndual0: usize,

    /// Terminal constraint dual dimension (0 when absent).
    pub ndual_term: usize,

    /// Value stores `V_0 .. V_N`.
    pub value_params: Vec<ValueStore>,
    /// Q stores `Q_0 .. Q_{N-1}`.
    pub q_params: Vec<QStore>,

    /// Shared KKT matrix buffer, sized to the largest stage.
    pub kkt_mat: DMatrix<f64>,
    /// Shared KKT right-hand side: column 0 plus `ndx1` feedback columns.
    pub kkt_rhs: DMatrix<f64>,
    pub ldl: DenseLdl,

    /// Proximal penalty data per node (terminal entry has `nu = 0`).
    pub prox_datas: Vec<CostData>,

    pub problem_data: TrajOptData,
    pub trial_prob_data: TrajOptData,

    /// Proximal centers from the previous AL iterate.
    pub prev_xs: Vec<DVector<f64>>,
    pub prev_us: Vec<DVector<f64>>,
    pub prev_lams: Vec<DVector<f64>>,

    /// Line-search candidates.
    pub trial_xs: Vec<DVector<f64>>,
    pub trial_us: Vec<DVector<f64>>,
    pub trial_lams: Vec<DVector<f64>>,

    /// Primal-dual step stacks: `pd_step[0] = [dx_0; dlam_0]`,
    /// `pd_step[k+1] = [du_k; dx_{k+1}; dlam_{k+1}]`.
    pub pd_step: Vec<DVector<f64>>,
    /// KKT right-hand-side column 0 per node, kept for the analytic
    /// directional derivative `sum_k rhs0_k' pd_step_k`.
    pub rhs0: Vec<DVector<f64>>,
    /// Terminal multiplier step (empty when no terminal constraint).
    pub dlam_term: DVector<f64>,

    /// Projected multiplier estimates, same layout as `lams`.
    pub lams_plus: Vec<DVector<f64>>,
    pub lams_pdal: Vec<DVector<f64>>,

    /// Scoreboards; slot 0 is the initial node, slot `k+1` stage `k`.
    pub inner_criterion_by_stage: Vec<f64>,
    pub dual_infeas_by_stage: Vec<f64>,
    /// Primal scoreboard has an extra terminal slot `N+1`.
    pub primal_infeas_by_stage: Vec<f64>,

    /// Projection scratch sized to the largest multiplier stack: shifted
    /// multiplier estimates and their projections.
    pub cstr_scratch: DVector<f64>,
    pub cstr_scratch2: DVector<f64>,

    /// Per-node state-tangent scratch (scaled steps, proximal differences).
    pub tan_buf: Vec<DVector<f64>>,
    /// Per-stage control-tangent scratch.
    pub ctrl_buf: Vec<DVector<f64>>,

    pub inner_criterion: f64,
}

impl Workspace {
    pub fn new(problem: &TrajOptProblem) -> Self {
        let nsteps = problem.num_steps();
        assert!(nsteps > 0, "problem must have at least one stage");

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
        let ndual0 = ndx0;
        let ndx_term = dims[nsteps - 1].ndx2;
        let ndual_term = problem.term_constraint.as_ref().map_or(0, |c| c.func.nr());

        // value stores: node k uses stage k's state space, node N the last
        // stage's next-state space
        let mut value_params: Vec<ValueStore> =
            dims.iter().map(|d| ValueStore::new(d.ndx1)).collect();
        value_params.push(ValueStore::new(ndx_term));

        let q_params = dims
            .iter()
            .map(|d| QStore::new(d.ndx1, d.nu, d.ndx2))
            .collect();

        let max_kkt = dims
            .iter()
            .map(|d| d.nprim + d.ndual)
            .chain(std::iter::once(ndx0 + ndual0))
            .max()
            .unwrap();
        let max_rhs_cols = dims.iter().map(|d| d.ndx1).max().unwrap() + 1;
        let max_ndual = dims
            .iter()
            .map(|d| d.ndual)
            .chain(std::iter::once(ndual_term))
            .chain(std::iter::once(ndual0))
            .max()
            .unwrap();

        let lam_dims = Self::multiplier_dims(problem, &dims, ndual0, ndual_term);
        let zero_lams: Vec<DVector<f64>> =
            lam_dims.iter().map(|&n| DVector::zeros(n)).collect();

        let mut pd_step = Vec::with_capacity(nsteps + 1);
        pd_step.push(DVector::zeros(ndx0 + ndual0));
        for d in &dims {
            pd_step.push(DVector::zeros(d.nprim + d.ndual));
        }
        let rhs0: Vec<DVector<f64>> = pd_step.iter().map(|v| DVector::zeros(v.len())).collect();

        let xs0: Vec<DVector<f64>> = Self::neutral_states(problem);
        let us0: Vec<DVector<f64>> = problem.stages.iter().map(|s| s.uspace.neutral()).collect();

        let mut prox_datas: Vec<CostData> =
            dims.iter().map(|d| CostData::new(d.ndx1, d.nu)).collect();
        prox_datas.push(CostData::new(ndx_term, 0));

        let mut tan_buf: Vec<DVector<f64>> =
            dims.iter().map(|d| DVector::zeros(d.ndx1)).collect();
        tan_buf.push(DVector::zeros(ndx_term));
        let ctrl_buf: Vec<DVector<f64>> = dims.iter().map(|d| DVector::zeros(d.nu)).collect();

        Self {
            nsteps,
            dims,
            ndx0,
            ndual0,
            ndual_term,
            value_params,
            q_params,
            kkt_mat: DMatrix::zeros(max_kkt, max_kkt),
            kkt_rhs: DMatrix::zeros(max_kkt, max_rhs_cols),
            ldl: DenseLdl::new(max_kkt, 1e-14),
            prox_datas,
            problem_data: problem.create_data(),
            trial_prob_data: problem.create_data(),
            prev_xs: xs0.clone(),
            prev_us: us0.clone(),
            prev_lams: zero_lams.clone(),
            trial_xs: xs0,
            trial_us: us0,
            trial_lams: zero_lams.clone(),
            pd_step,
            rhs0,
            dlam_term: DVector::zeros(ndual_term),
            lams_plus: zero_lams.clone(),
            lams_pdal: zero_lams,
            inner_criterion_by_stage: vec![0.0; nsteps + 1],
            dual_infeas_by_stage: vec![0.0; nsteps + 1],
            primal_infeas_by_stage: vec![0.0; nsteps + 2],
            cstr_scratch: DVector::zeros(max_ndual),
            cstr_scratch2: DVector::zeros(max_ndual),
            tan_buf,
            ctrl_buf,
            inner_criterion: 0.0,
        }
    }

    /// Multiplier stack sizes: initial node, one per stage, optional terminal.
    pub fn multiplier_dims(
        problem: &TrajOptProblem,
        dims: &[StageDims],
        ndual0: usize,
        ndual_term: usize,
    ) -> Vec<usize> {
        let mut lam_dims = Vec::with_capacity(dims.len() + 2);
        lam_dims.push(ndual0);
        lam_dims.extend(dims.iter().map(|d| d.ndual));
        if problem.term_constraint.is_some() {
            lam_dims.push(ndual_term);
        }
        lam_dims
    }

    fn neutral_states(problem: &TrajOptProblem) -> Vec<DVector<f64>> {
        let nsteps = problem.num_steps();
        let mut xs: Vec<DVector<f64>> =
            problem.stages.iter().map(|s| s.xspace.neutral()).collect();
        xs.push(problem.stages[nsteps - 1].xspace_next.neutral());
        xs
    }

    /// State step at node `k` (view into `pd_step`).
    #[inline]
    pub fn dx(&self, k: usize) -> DVectorView<'_, f64> {
        if k == 0 {
            self.pd_step[0].rows(0, self.ndx0)
        } else {
            let d = &self.dims[k - 1];
            self.pd_step[k].rows(d.nu, d.ndx2)
        }
    }

    /// Control step at stage `k`.
    #[inline]
    pub fn du(&self, k: usize) -> DVectorView<'_, f64> {
        self.pd_step[k + 1].rows(0, self.dims[k].nu)
    }

    /// Multiplier step for `lams[k]`, `k <= N`.
    #[inline]
    pub fn dlam(&self, k: usize) -> DVectorView<'_, f64> {
        if k == 0 {
            self.pd_step[0].rows(self.ndx0, self.ndual0)
        } else {
            let d = &self.dims[k - 1];
            self.pd_step[k].rows(d.nprim, d.ndual)
        }
    }

    /// Number of multiplier stacks (`N+1`, or `N+2` with a terminal
    /// constraint).
    #[inline]
    pub fn num_lams(&self) -> usize {
        self.prev_lams.len()
    }
}

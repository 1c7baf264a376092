//! Trajectory optimization problem model.
//!
//! A problem is an arena of [`StageModel`] nodes plus a terminal cost and an
//! optional terminal constraint. Evaluation writes into a parallel
//! [`TrajOptData`] arena owned by the caller; stages are referred to by index
//! everywhere, so the model holds no back-pointers and no shared handles.
//!
//! # Constraint convention
//!
//! The dynamics residual `f(x_k, u_k, x_{k+1}) = 0` is stage constraint 0,
//! paired with the [`ConstraintSet::Equality`] set; its multiplier segment is
//! the co-state. Extra path constraints are appended after it, and the
//! stage's dual dimension is the sum of all codomain dimensions.

use nalgebra::DVector;

use crate::cost::{CostData, CostFunction};
use crate::funcs::{FunctionData, StageFunction, StateErrorResidual};
use crate::manifold::Manifold;
use crate::sets::ConstraintSet;

/// A stage function paired with the set its residual must belong to.
pub struct StageConstraint {
    pub func: Box<dyn StageFunction>,
    pub set: ConstraintSet,
}

/// Row layout of a stage's stacked constraints: cumulative offsets into the
/// multiplier stack and into the row dimension of KKT-shaped matrices.
#[derive(Debug, Clone, Default)]
pub struct ConstraintContainer {
    dims: Vec<usize>,
    offsets: Vec<usize>,
    total: usize,
}

impl ConstraintContainer {
    fn push(&mut self, dim: usize) {
        self.offsets.push(self.total);
        self.dims.push(dim);
        self.total += dim;
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.dims.len()
    }

    /// Total stacked row dimension.
    #[inline]
    pub fn total_dim(&self) -> usize {
        self.total
    }

    /// Row offset of constraint `j` in the stack.
    #[inline]
    pub fn offset(&self, j: usize) -> usize {
        self.offsets[j]
    }

    #[inline]
    pub fn dim(&self, j: usize) -> usize {
        self.dims[j]
    }

    /// Row range of constraint `j`, for slicing stacked vectors and the row
    /// blocks of KKT-shaped matrices.
    #[inline]
    pub fn range(&self, j: usize) -> std::ops::Range<usize> {
        let off = self.offsets[j];
        off..off + self.dims[j]
    }
}

/// One shooting node: spaces, cost, dynamics, and path constraints.
pub struct StageModel {
    pub xspace: Box<dyn Manifold>,
    pub uspace: Box<dyn Manifold>,
    pub xspace_next: Box<dyn Manifold>,
    pub cost: Box<dyn CostFunction>,
    /// Constraint list; slot 0 is the dynamics residual.
    pub constraints: Vec<StageConstraint>,
    layout: ConstraintContainer,
}

impl StageModel {
    /// Build a stage from its spaces, running cost, and dynamics residual.
    ///
    /// `dynamics.nr()` must equal the next state space's tangent dimension.
    pub fn new(
        xspace: Box<dyn Manifold>,
        uspace: Box<dyn Manifold>,
        xspace_next: Box<dyn Manifold>,
        cost: Box<dyn CostFunction>,
        dynamics: Box<dyn StageFunction>,
    ) -> Self {
        assert_eq!(
            dynamics.nr(),
            xspace_next.ndx(),
            "dynamics residual dimension must match the next state tangent"
        );
        let mut layout = ConstraintContainer::default();
        layout.push(dynamics.nr());
        Self {
            xspace,
            uspace,
            xspace_next,
            cost,
            constraints: vec![StageConstraint {
                func: dynamics,
                set: ConstraintSet::Equality,
            }],
            layout,
        }
    }

    /// Append a path constraint after the dynamics.
    pub fn push_constraint(&mut self, func: Box<dyn StageFunction>, set: ConstraintSet) {
        self.layout.push(func.nr());
        self.constraints.push(StageConstraint { func, set });
    }

    #[inline]
    pub fn ndx1(&self) -> usize {
        self.xspace.ndx()
    }

    #[inline]
    pub fn nu(&self) -> usize {
        self.uspace.ndx()
    }

    #[inline]
    pub fn ndx2(&self) -> usize {
        self.xspace_next.ndx()
    }

    /// Primal dimension of the stage KKT system: `(u, y)` block.
    #[inline]
    pub fn num_primal(&self) -> usize {
        self.nu() + self.ndx2()
    }

    /// Dual dimension: total stacked constraint rows.
    #[inline]
    pub fn num_dual(&self) -> usize {
        self.layout.total_dim()
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    #[inline]
    pub fn layout(&self) -> &ConstraintContainer {
        &self.layout
    }

    fn create_data(&self) -> StageData {
        let (ndx1, nu, ndx2) = (self.ndx1(), self.nu(), self.ndx2());
        let constraint_data = self
            .constraints
            .iter()
            .map(|c| FunctionData::with_scratch(c.func.nr(), ndx1, nu, ndx2, c.func.scratch_dim()))
            .collect();
        StageData {
            cost_data: CostData::new(ndx1, nu),
            constraint_data,
        }
    }
}

/// Evaluation buffers for one stage.
pub struct StageData {
    pub cost_data: CostData,
    pub constraint_data: Vec<FunctionData>,
}

/// Multi-stage trajectory optimization problem.
pub struct TrajOptProblem {
    pub stages: Vec<StageModel>,
    /// Initial-condition residual `x_0 (-) x_init` (equality).
    pub init_condition: StateErrorResidual,
    pub term_cost: Box<dyn CostFunction>,
    pub term_constraint: Option<StageConstraint>,
}

impl TrajOptProblem {
    pub fn new(
        x_init: DVector<f64>,
        space0: Box<dyn Manifold>,
        term_cost: Box<dyn CostFunction>,
    ) -> Self {
        Self {
            stages: Vec::new(),
            init_condition: StateErrorResidual::new(space0, x_init),
            term_cost,
            term_constraint: None,
        }
    }

    pub fn add_stage(&mut self, stage: StageModel) {
        self.stages.push(stage);
    }

    /// Install the (single, optional) terminal constraint on `x_N`.
    pub fn set_terminal_constraint(&mut self, func: Box<dyn StageFunction>, set: ConstraintSet) {
        self.term_constraint = Some(StageConstraint { func, set });
    }

    #[inline]
    pub fn num_steps(&self) -> usize {
        self.stages.len()
    }

    /// Check stage chaining and residual dimensions.
    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("problem has no stages".to_string());
        }
        let ndx0 = self.stages[0].ndx1();
        if self.init_condition.nr() != ndx0 {
            return Err(format!(
                "initial residual has dimension {}, expected {}",
                self.init_condition.nr(),
                ndx0
            ));
        }
        for (k, pair) in self.stages.windows(2).enumerate() {
            if pair[0].ndx2() != pair[1].ndx1() {
                return Err(format!(
                    "stage {} next-state dim {} does not chain into stage {} state dim {}",
                    k,
                    pair[0].ndx2(),
                    k + 1,
                    pair[1].ndx1()
                ));
            }
        }
        Ok(())
    }

    /// Allocate the evaluation arena for this problem.
    pub fn create_data(&self) -> TrajOptData {
        let nsteps = self.num_steps();
        let stage_data = self.stages.iter().map(|s| s.create_data()).collect();
        let ndx0 = self.stages[0].ndx1();
        let ndx_term = self.stages[nsteps - 1].ndx2();
        let term_cstr_data = self.term_constraint.as_ref().map(|c| {
            FunctionData::with_scratch(c.func.nr(), ndx_term, 0, 0, c.func.scratch_dim())
        });
        TrajOptData {
            stage_data,
            init_data: FunctionData::new(self.init_condition.nr(), ndx0, 0, 0),
            term_cost_data: CostData::new(ndx_term, 0),
            term_cstr_data,
        }
    }

    /// Evaluate costs and constraint residuals along `(xs, us)`.
    pub fn evaluate(&self, xs: &[DVector<f64>], us: &[DVector<f64>], data: &mut TrajOptData) {
        let nsteps = self.num_steps();
        debug_assert_eq!(xs.len(), nsteps + 1);
        debug_assert_eq!(us.len(), nsteps);
        let empty = DVector::zeros(0);

        self.init_condition
            .evaluate(&xs[0], &empty, &empty, &mut data.init_data);

        for (k, stage) in self.stages.iter().enumerate() {
            let sd = &mut data.stage_data[k];
            stage.cost.evaluate(&xs[k], &us[k], &mut sd.cost_data);
            for (c, cd) in stage.constraints.iter().zip(sd.constraint_data.iter_mut()) {
                c.func.evaluate(&xs[k], &us[k], &xs[k + 1], cd);
            }
        }

        self.term_cost
            .evaluate(&xs[nsteps], &empty, &mut data.term_cost_data);
        if let (Some(c), Some(cd)) = (&self.term_constraint, data.term_cstr_data.as_mut()) {
            c.func.evaluate(&xs[nsteps], &empty, &empty, cd);
        }
    }

    /// Evaluate first- and second-order derivatives along `(xs, us)`.
    ///
    /// `lams` supplies the multiplier segments for the constraints'
    /// vector-Hessian products (layout per [`crate::solver::Workspace`]).
    pub fn compute_derivatives(
        &self,
        xs: &[DVector<f64>],
        us: &[DVector<f64>],
        lams: &[DVector<f64>],
        data: &mut TrajOptData,
    ) {
        let nsteps = self.num_steps();
        let empty = DVector::zeros(0);

        self.init_condition
            .jacobians(&xs[0], &empty, &empty, &mut data.init_data);

        for (k, stage) in self.stages.iter().enumerate() {
            let sd = &mut data.stage_data[k];
            stage.cost.derivatives(&xs[k], &us[k], &mut sd.cost_data);
            for (j, (c, cd)) in stage
                .constraints
                .iter()
                .zip(sd.constraint_data.iter_mut())
                .enumerate()
            {
                c.func.jacobians(&xs[k], &us[k], &xs[k + 1], cd);
                let lam_j = lams[k + 1].rows(stage.layout.offset(j), stage.layout.dim(j));
                c.func.second_order(&xs[k], &us[k], &xs[k + 1], lam_j, cd);
            }
        }

        self.term_cost
            .derivatives(&xs[nsteps], &empty, &mut data.term_cost_data);
        if let (Some(c), Some(cd)) = (&self.term_constraint, data.term_cstr_data.as_mut()) {
            c.func.jacobians(&xs[nsteps], &empty, &empty, cd);
            let lam = lams[nsteps + 1].rows(0, lams[nsteps + 1].len());
            c.func.second_order(&xs[nsteps], &empty, &empty, lam, cd);
        }
    }
}

/// Evaluation arena parallel to a [`TrajOptProblem`].
pub struct TrajOptData {
    pub stage_data: Vec<StageData>,
    pub init_data: FunctionData,
    pub term_cost_data: CostData,
    pub term_cstr_data: Option<FunctionData>,
}

impl TrajOptData {
    /// Total trajectory cost of the last evaluation (stage costs + terminal).
    pub fn trajectory_cost(&self) -> f64 {
        let stage_sum: f64 = self.stage_data.iter().map(|sd| sd.cost_data.value).sum();
        stage_sum + self.term_cost_data.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::QuadraticCost;
    use crate::dynamics::{ExplicitDynamics, LinearDynamics};
    use crate::manifold::VectorSpace;
    use nalgebra::DMatrix;

    fn make_problem(nsteps: usize) -> TrajOptProblem {
        let dt = 0.1;
        let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);
        let x0 = DVector::from_vec(vec![1.0, 0.0]);

        let term_cost = QuadraticCost::state_only(DMatrix::identity(2, 2), DVector::zeros(2));
        let mut problem =
            TrajOptProblem::new(x0, Box::new(VectorSpace::new(2)), Box::new(term_cost));
        for _ in 0..nsteps {
            let cost = QuadraticCost::new(
                DMatrix::identity(2, 2),
                DMatrix::identity(1, 1),
                DVector::zeros(2),
                DVector::zeros(1),
            );
            let dynamics = ExplicitDynamics::new(
                Box::new(LinearDynamics::new(a.clone(), b.clone())),
                Box::new(VectorSpace::new(2)),
                2,
                1,
            );
            problem.add_stage(StageModel::new(
                Box::new(VectorSpace::new(2)),
                Box::new(VectorSpace::new(1)),
                Box::new(VectorSpace::new(2)),
                Box::new(cost),
                Box::new(dynamics),
            ));
        }
        problem
    }

    #[test]
    fn test_constraint_container_layout() {
        let mut layout = ConstraintContainer::default();
        layout.push(2);
        layout.push(3);
        layout.push(1);
        assert_eq!(layout.num_constraints(), 3);
        assert_eq!(layout.total_dim(), 6);
        assert_eq!(layout.range(0), 0..2);
        assert_eq!(layout.range(1), 2..5);
        assert_eq!(layout.range(2), 5..6);
    }

    #[test]
    fn test_stage_dimensions() {
        let problem = make_problem(3);
        assert!(problem.validate().is_ok());
        let stage = &problem.stages[0];
        assert_eq!(stage.ndx1(), 2);
        assert_eq!(stage.nu(), 1);
        assert_eq!(stage.ndx2(), 2);
        assert_eq!(stage.num_primal(), 3);
        // only the dynamics constraint: ndual == ndx2
        assert_eq!(stage.num_dual(), 2);
    }

    #[test]
    fn test_evaluate_on_feasible_rollout() {
        let problem = make_problem(2);
        let mut data = problem.create_data();

        // roll the dynamics out exactly: all dynamics residuals must vanish
        let mut xs = vec![DVector::from_vec(vec![1.0, 0.0])];
        let us = vec![DVector::from_vec(vec![0.2]); 2];
        for k in 0..2 {
            let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]);
            let b = DMatrix::from_row_slice(2, 1, &[0.005, 0.1]);
            let next = &a * &xs[k] + &b * &us[k];
            xs.push(next);
        }

        problem.evaluate(&xs, &us, &mut data);
        for sd in &data.stage_data {
            assert!(crate::math::infty_norm(&sd.constraint_data[0].value) < 1e-14);
        }
        // init residual vanishes at the given start
        assert!(crate::math::infty_norm(&data.init_data.value) < 1e-14);
        assert!(data.trajectory_cost() > 0.0);
    }
}

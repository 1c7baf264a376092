//! Discrete dynamics as stage residuals.
//!
//! The solver consumes dynamics in residual form `f(x, u, y) = 0` where `y`
//! is the next state. Most models are more naturally written as an explicit
//! next-state map `y = phi(x, u)`; [`ExplicitDynamics`] lowers such a map to
//! the residual `phi(x, u) (-) y` using the next state space's `difference`.

use nalgebra::{DMatrix, DMatrixViewMut, DVector};

use crate::funcs::{FunctionData, StageFunction};
use crate::manifold::Manifold;

/// Explicit next-state map `y = phi(x, u)` with Jacobians.
pub trait ExplicitDynamicsModel {
    /// Write `phi(x, u)` into `out` (length `nx` of the next state space).
    fn next_state(&self, x: &DVector<f64>, u: &DVector<f64>, out: &mut DVector<f64>);

    /// Write `d phi / dx` (`ndx2 x ndx1`) and `d phi / du` (`ndx2 x nu`).
    fn jacobians(
        &self,
        x: &DVector<f64>,
        u: &DVector<f64>,
        jx: &mut DMatrixViewMut<'_, f64>,
        ju: &mut DMatrixViewMut<'_, f64>,
    );
}

/// Residual adaptor wrapping an [`ExplicitDynamicsModel`]:
/// `f(x, u, y) = phi(x, u) (-) y`.
pub struct ExplicitDynamics {
    model: Box<dyn ExplicitDynamicsModel>,
    space_next: Box<dyn Manifold>,
    ndx1: usize,
    nu: usize,
}

impl ExplicitDynamics {
    pub fn new(
        model: Box<dyn ExplicitDynamicsModel>,
        space_next: Box<dyn Manifold>,
        ndx1: usize,
        nu: usize,
    ) -> Self {
        Self {
            model,
            space_next,
            ndx1,
            nu,
        }
    }

    #[inline]
    fn ndx2(&self) -> usize {
        self.space_next.ndx()
    }
}

impl StageFunction for ExplicitDynamics {
    fn nr(&self) -> usize {
        self.ndx2()
    }

    fn scratch_dim(&self) -> usize {
        // the scratch holds phi(x, u), a point of the next state space
        self.space_next.nx()
    }

    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, y: &DVector<f64>, data: &mut FunctionData) {
        self.model.next_state(x, u, &mut data.tmp);
        self.space_next.difference(y, &data.tmp, &mut data.value);
    }

    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        let (ndx1, nu, ndx2) = (self.ndx1, self.nu, self.ndx2());
        data.jac_buffer.fill(0.0);

        let (mut jx, mut ju) = data
            .jac_buffer
            .columns_range_pair_mut(0..ndx1, ndx1..ndx1 + nu);
        self.model.jacobians(x, u, &mut jx, &mut ju);

        // d/dy [phi (-) y]; exact on vector spaces, first order elsewhere
        for i in 0..ndx2 {
            data.jac_buffer[(i, ndx1 + nu + i)] = -1.0;
        }
    }
}

/// Linear time-invariant dynamics `y = A x + B u`.
#[derive(Debug, Clone)]
pub struct LinearDynamics {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
}

impl LinearDynamics {
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>) -> Self {
        assert_eq!(a.nrows(), a.ncols());
        assert_eq!(a.nrows(), b.nrows());
        Self { a, b }
    }
}

impl ExplicitDynamicsModel for LinearDynamics {
    fn next_state(&self, x: &DVector<f64>, u: &DVector<f64>, out: &mut DVector<f64>) {
        out.gemv(1.0, &self.a, x, 0.0);
        out.gemv(1.0, &self.b, u, 1.0);
    }

    fn jacobians(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        jx: &mut DMatrixViewMut<'_, f64>,
        ju: &mut DMatrixViewMut<'_, f64>,
    ) {
        jx.copy_from(&self.a);
        ju.copy_from(&self.b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::VectorSpace;

    fn double_integrator(dt: f64) -> LinearDynamics {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
        let b = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);
        LinearDynamics::new(a, b)
    }

    #[test]
    fn test_linear_next_state() {
        let dyn_model = double_integrator(0.1);
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let u = DVector::from_vec(vec![1.0]);
        let mut out = DVector::zeros(2);
        dyn_model.next_state(&x, &u, &mut out);
        assert!((out[0] - 1.205).abs() < 1e-14);
        assert!((out[1] - 2.1).abs() < 1e-14);
    }

    #[test]
    fn test_residual_adaptor_zero_on_rollout() {
        let dt = 0.05;
        let func = ExplicitDynamics::new(
            Box::new(double_integrator(dt)),
            Box::new(VectorSpace::new(2)),
            2,
            1,
        );
        assert_eq!(func.nr(), 2);

        let x = DVector::from_vec(vec![1.0, 0.0]);
        let u = DVector::from_vec(vec![-0.3]);
        let mut y = DVector::zeros(2);
        double_integrator(dt).next_state(&x, &u, &mut y);

        let mut data = FunctionData::new(2, 2, 1, 2);
        func.evaluate(&x, &u, &y, &mut data);
        assert!(crate::math::infty_norm(&data.value) < 1e-15);

        func.jacobians(&x, &u, &y, &mut data);
        assert_eq!(data.jac_buffer[(0, 0)], 1.0);
        assert_eq!(data.jac_buffer[(0, 1)], dt);
        assert_eq!(data.jac_buffer[(1, 3)], dt); // dphi_1/du
        assert_eq!(data.jac_buffer[(0, 4)], -1.0);
        assert_eq!(data.jac_buffer[(1, 5)], -1.0);
    }
}

//! Stage function oracles.
//!
//! A [`StageFunction`] maps `(x_k, u_k, x_{k+1})` to a residual vector of
//! length `nr`. Dynamics, path constraints, and the initial/terminal residuals
//! are all stage functions; what distinguishes them is the constraint set they
//! are paired with ([`crate::sets::ConstraintSet`]).
//!
//! All oracles write into a caller-owned [`FunctionData`] so the solver's hot
//! loop stays allocation-free.

use nalgebra::{DMatrix, DVector, DVectorView};

use crate::manifold::Manifold;

/// Evaluation buffers for one stage function.
///
/// The Jacobian buffer has one column block per argument, in the order
/// `(x, u, y)` with widths `(ndx1, nu, ndx2)`. Functions of fewer arguments
/// (initial or terminal residuals) simply use `nu = ndx2 = 0`.
#[derive(Debug, Clone)]
pub struct FunctionData {
    pub nr: usize,
    pub ndx1: usize,
    pub nu: usize,
    pub ndx2: usize,

    /// Residual value (length `nr`).
    pub value: DVector<f64>,

    /// Jacobian `[J_x | J_u | J_y]`, `nr x (ndx1 + nu + ndx2)`.
    ///
    /// The backward pass composes this buffer in place with the normal-cone
    /// projection Jacobian; it is rewritten on every derivative evaluation.
    pub jac_buffer: DMatrix<f64>,

    /// Second-order vector-Hessian product `sum_i lam_i * Hess c_i`,
    /// `(ndx1+nu+ndx2) x (ndx1+nu+ndx2)`. Zero for affine functions.
    pub vhp_buffer: DMatrix<f64>,

    /// Scratch vector for oracle-internal intermediates (length `nr` unless
    /// the function asks for more via [`StageFunction::scratch_dim`]).
    pub tmp: DVector<f64>,
}

impl FunctionData {
    pub fn new(nr: usize, ndx1: usize, nu: usize, ndx2: usize) -> Self {
        Self::with_scratch(nr, ndx1, nu, ndx2, nr)
    }

    pub fn with_scratch(nr: usize, ndx1: usize, nu: usize, ndx2: usize, scratch: usize) -> Self {
        let ncols = ndx1 + nu + ndx2;
        Self {
            nr,
            ndx1,
            nu,
            ndx2,
            value: DVector::zeros(nr),
            jac_buffer: DMatrix::zeros(nr, ncols),
            vhp_buffer: DMatrix::zeros(ncols, ncols),
            tmp: DVector::zeros(scratch),
        }
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.ndx1 + self.nu + self.ndx2
    }
}

/// Vector-valued function of one stage's variables.
pub trait StageFunction {
    /// Codomain dimension.
    fn nr(&self) -> usize;

    /// Scratch length this function needs in [`FunctionData::tmp`].
    fn scratch_dim(&self) -> usize {
        self.nr()
    }

    /// Evaluate the residual into `data.value`.
    ///
    /// Functions that do not depend on `u` or `y` receive empty vectors there.
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, y: &DVector<f64>, data: &mut FunctionData);

    /// Evaluate the Jacobian blocks into `data.jac_buffer`.
    fn jacobians(&self, x: &DVector<f64>, u: &DVector<f64>, y: &DVector<f64>, data: &mut FunctionData);

    /// Evaluate the multiplier-weighted second-order term into
    /// `data.vhp_buffer`. Affine functions keep the default zero.
    fn second_order(
        &self,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        _y: &DVector<f64>,
        _lam: DVectorView<'_, f64>,
        data: &mut FunctionData,
    ) {
        data.vhp_buffer.fill(0.0);
    }
}

/// Residual `x (-) x_target` on a manifold, used for the initial condition
/// and for terminal state targets.
pub struct StateErrorResidual {
    space: Box<dyn Manifold>,
    pub target: DVector<f64>,
}

impl StateErrorResidual {
    pub fn new(space: Box<dyn Manifold>, target: DVector<f64>) -> Self {
        assert_eq!(target.len(), space.nx(), "target has wrong dimension");
        Self { space, target }
    }
}

impl StageFunction for StateErrorResidual {
    fn nr(&self) -> usize {
        self.space.ndx()
    }

    fn evaluate(&self, x: &DVector<f64>, _u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        self.space.difference(&self.target, x, &mut data.value);
    }

    fn jacobians(&self, _x: &DVector<f64>, _u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        // d/dx [x (-) target]; exact on vector spaces, first order elsewhere.
        data.jac_buffer.fill(0.0);
        for i in 0..data.nr {
            data.jac_buffer[(i, i)] = 1.0;
        }
    }
}

/// Two-sided control bound `u_min <= u <= u_max`, lowered to the inequality
/// residual `[u - u_max; u_min - u] <= 0` (pair with
/// [`crate::sets::ConstraintSet::NegativeOrthant`]).
pub struct ControlBoxFunction {
    pub u_min: DVector<f64>,
    pub u_max: DVector<f64>,
    ndx1: usize,
}

impl ControlBoxFunction {
    pub fn new(ndx1: usize, u_min: DVector<f64>, u_max: DVector<f64>) -> Self {
        assert_eq!(u_min.len(), u_max.len());
        Self { u_min, u_max, ndx1 }
    }

    #[inline]
    fn nu(&self) -> usize {
        self.u_min.len()
    }
}

impl StageFunction for ControlBoxFunction {
    fn nr(&self) -> usize {
        2 * self.nu()
    }

    fn evaluate(&self, _x: &DVector<f64>, u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        let nu = self.nu();
        for i in 0..nu {
            data.value[i] = u[i] - self.u_max[i];
            data.value[nu + i] = self.u_min[i] - u[i];
        }
    }

    fn jacobians(&self, _x: &DVector<f64>, _u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        let nu = self.nu();
        data.jac_buffer.fill(0.0);
        for i in 0..nu {
            data.jac_buffer[(i, self.ndx1 + i)] = 1.0;
            data.jac_buffer[(nu + i, self.ndx1 + i)] = -1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::VectorSpace;

    #[test]
    fn test_state_error_residual() {
        let func = StateErrorResidual::new(
            Box::new(VectorSpace::new(2)),
            DVector::from_vec(vec![1.0, -1.0]),
        );
        let mut data = FunctionData::new(2, 2, 0, 0);
        let x = DVector::from_vec(vec![1.5, -1.0]);
        let empty = DVector::zeros(0);

        func.evaluate(&x, &empty, &empty, &mut data);
        assert_eq!(data.value, DVector::from_vec(vec![0.5, 0.0]));

        func.jacobians(&x, &empty, &empty, &mut data);
        assert_eq!(data.jac_buffer, DMatrix::identity(2, 2));
    }

    #[test]
    fn test_control_box_residual() {
        let func = ControlBoxFunction::new(
            2,
            DVector::from_vec(vec![-0.5]),
            DVector::from_vec(vec![0.5]),
        );
        assert_eq!(func.nr(), 2);

        let mut data = FunctionData::new(2, 2, 1, 2);
        let x = DVector::zeros(2);
        let y = DVector::zeros(2);
        let u = DVector::from_vec(vec![0.7]);

        func.evaluate(&x, &u, &y, &mut data);
        // upper bound violated by 0.2, lower satisfied by margin 1.2
        assert!((data.value[0] - 0.2).abs() < 1e-15);
        assert!((data.value[1] + 1.2).abs() < 1e-15);

        func.jacobians(&x, &u, &y, &mut data);
        assert_eq!(data.jac_buffer[(0, 2)], 1.0);
        assert_eq!(data.jac_buffer[(1, 2)], -1.0);
        // no dependence on x or y
        assert_eq!(data.jac_buffer[(0, 0)], 0.0);
        assert_eq!(data.jac_buffer[(0, 3)], 0.0);
    }
}

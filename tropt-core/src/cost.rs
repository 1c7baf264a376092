//! Stage and terminal cost oracles.

use nalgebra::{DMatrix, DVector};

/// Evaluation buffers for one cost functional.
///
/// Gradient and Hessian live in the joint `(x, u)` tangent space: the first
/// `ndx` entries are the state block, the trailing `nu` entries the control
/// block. Terminal costs use `nu = 0`.
#[derive(Debug, Clone)]
pub struct CostData {
    pub ndx: usize,
    pub nu: usize,
    pub value: f64,
    pub grad: DVector<f64>,
    pub hess: DMatrix<f64>,
}

impl CostData {
    pub fn new(ndx: usize, nu: usize) -> Self {
        let n = ndx + nu;
        Self {
            ndx,
            nu,
            value: 0.0,
            grad: DVector::zeros(n),
            hess: DMatrix::zeros(n, n),
        }
    }
}

/// Cost functional `l(x, u)` with derivatives in the joint tangent space.
pub trait CostFunction {
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData);

    /// Gradient and Hessian at `(x, u)`.
    fn derivatives(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData);
}

/// Quadratic tracking cost
/// `l(x, u) = 1/2 (x - x_ref)' Q (x - x_ref) + 1/2 (u - u_ref)' R (u - u_ref)`.
///
/// With `nu = 0` (empty `R`, `u_ref`) this doubles as a terminal cost.
#[derive(Debug, Clone)]
pub struct QuadraticCost {
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub x_ref: DVector<f64>,
    pub u_ref: DVector<f64>,
}

impl QuadraticCost {
    pub fn new(q: DMatrix<f64>, r: DMatrix<f64>, x_ref: DVector<f64>, u_ref: DVector<f64>) -> Self {
        assert_eq!(q.nrows(), q.ncols());
        assert_eq!(r.nrows(), r.ncols());
        assert_eq!(q.nrows(), x_ref.len());
        assert_eq!(r.nrows(), u_ref.len());
        Self { q, r, x_ref, u_ref }
    }

    /// State-only cost, usable as a terminal cost.
    pub fn state_only(q: DMatrix<f64>, x_ref: DVector<f64>) -> Self {
        Self::new(q, DMatrix::zeros(0, 0), x_ref, DVector::zeros(0))
    }

    #[inline]
    fn ndx(&self) -> usize {
        self.q.nrows()
    }

    #[inline]
    fn nu(&self) -> usize {
        self.r.nrows()
    }
}

impl CostFunction for QuadraticCost {
    fn evaluate(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        let dx = x - &self.x_ref;
        let du = u - &self.u_ref;
        data.value = 0.5 * (&self.q * &dx).dot(&dx) + 0.5 * (&self.r * &du).dot(&du);
    }

    fn derivatives(&self, x: &DVector<f64>, u: &DVector<f64>, data: &mut CostData) {
        let ndx = self.ndx();
        let nu = self.nu();
        let dx = x - &self.x_ref;
        let du = u - &self.u_ref;

        let gx = &self.q * &dx;
        let gu = &self.r * &du;
        for i in 0..ndx {
            data.grad[i] = gx[i];
        }
        for i in 0..nu {
            data.grad[ndx + i] = gu[i];
        }

        data.hess.fill(0.0);
        for j in 0..ndx {
            for i in 0..ndx {
                data.hess[(i, j)] = self.q[(i, j)];
            }
        }
        for j in 0..nu {
            for i in 0..nu {
                data.hess[(ndx + i, ndx + j)] = self.r[(i, j)];
            }
        }
    }
}

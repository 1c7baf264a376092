//! Dense LDL^T factorization for quasi-definite matrices.
//!
//! The stage KKT systems assembled by the backward pass have the form
//!
//! ```text
//! K = [ H + xi*I   J^T   ]
//!     [ J          -mu*I ]
//! ```
//!
//! which is quasi-definite for any `mu > 0`: an unpivoted LDL^T with a
//! minimum-pivot check factorizes it stably. The factorization computes
//! `K = L D L^T` with unit lower-triangular `L` and diagonal `D` (negative
//! entries allowed, unlike Cholesky).
//!
//! Factor storage is allocated once for the largest stage and reused; the
//! factorization reads only the **lower triangle** of the active top-left
//! block, so callers may leave the upper triangle stale.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// LDL^T errors.
#[derive(Error, Debug)]
pub enum LdlError {
    /// A pivot fell below the minimum magnitude: the matrix is not regular
    /// enough at the current regularization level.
    #[error("non-regular pivot {pivot:.3e} at index {index}")]
    NonRegularPivot {
        /// Pivot index
        index: usize,
        /// Offending pivot value
        pivot: f64,
    },

    /// Requested dimension exceeds the allocated factor storage.
    #[error("dimension {actual} exceeds allocated maximum {max}")]
    DimensionMismatch {
        /// Allocated maximum dimension
        max: usize,
        /// Requested dimension
        actual: usize,
    },
}

/// Reusable dense LDL^T factorization.
pub struct DenseLdl {
    max_dim: usize,

    /// Active dimension of the last successful factorization.
    n: usize,

    /// Unit lower-triangular factor (strict lower part used).
    l: DMatrix<f64>,

    /// Diagonal D and its inverse.
    d: DVector<f64>,
    d_inv: DVector<f64>,

    /// Minimum pivot magnitude before the factorization reports
    /// [`LdlError::NonRegularPivot`].
    min_pivot: f64,
}

impl DenseLdl {
    /// Allocate factor storage for systems up to `max_dim`.
    pub fn new(max_dim: usize, min_pivot: f64) -> Self {
        assert!(min_pivot >= 0.0, "minimum pivot must be non-negative");
        Self {
            max_dim,
            n: 0,
            l: DMatrix::zeros(max_dim, max_dim),
            d: DVector::zeros(max_dim),
            d_inv: DVector::zeros(max_dim),
            min_pivot,
        }
    }

    /// Active dimension of the current factorization.
    #[inline]
    pub fn active_dim(&self) -> usize {
        self.n
    }

    /// Diagonal of D from the current factorization.
    pub fn d_values(&self) -> &[f64] {
        &self.d.as_slice()[..self.n]
    }

    /// Factorize the lower triangle of the top-left `n x n` block of `a`.
    pub fn factor(&mut self, a: &DMatrix<f64>, n: usize) -> Result<(), LdlError> {
        if n > self.max_dim {
            return Err(LdlError::DimensionMismatch {
                max: self.max_dim,
                actual: n,
            });
        }
        debug_assert!(a.nrows() >= n && a.ncols() >= n);
        self.n = n;

        for j in 0..n {
            let mut dj = a[(j, j)];
            for k in 0..j {
                let ljk = self.l[(j, k)];
                dj -= ljk * ljk * self.d[k];
            }
            if dj.abs() < self.min_pivot || !dj.is_finite() {
                return Err(LdlError::NonRegularPivot { index: j, pivot: dj });
            }
            self.d[j] = dj;
            self.d_inv[j] = 1.0 / dj;

            for i in (j + 1)..n {
                let mut lij = a[(i, j)];
                for k in 0..j {
                    lij -= self.l[(i, k)] * self.l[(j, k)] * self.d[k];
                }
                self.l[(i, j)] = lij * self.d_inv[j];
            }
        }
        Ok(())
    }

    /// Solve `K x = b` in place for a vector right-hand side.
    pub fn solve_in_place(&self, x: &mut DVector<f64>) {
        assert_eq!(x.len(), self.n, "right-hand side has wrong dimension");
        self.solve_column(x.as_mut_slice());
    }

    /// Solve `K X = B` in place for every column of a matrix right-hand side.
    pub fn solve_mat_in_place(&self, b: &mut DMatrix<f64>) {
        assert_eq!(b.nrows(), self.n, "right-hand side has wrong row count");
        let n = self.n;
        let ncols = b.ncols();
        let data = b.as_mut_slice();
        for c in 0..ncols {
            self.solve_column(&mut data[c * n..(c + 1) * n]);
        }
    }

    fn solve_column(&self, x: &mut [f64]) {
        let n = self.n;
        // forward substitution with unit L
        for j in 0..n {
            let xj = x[j];
            for i in (j + 1)..n {
                x[i] -= self.l[(i, j)] * xj;
            }
        }
        // diagonal
        for j in 0..n {
            x[j] *= self.d_inv[j];
        }
        // backward substitution with L^T
        for j in (0..n).rev() {
            let mut xj = x[j];
            for i in (j + 1)..n {
                xj -= self.l[(i, j)] * x[i];
            }
            x[j] = xj;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ldl_simple_pd() {
        // [[2, 1], [1, 2]] * x = [3, 3]  =>  x = [1, 1]
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let mut ldl = DenseLdl::new(2, 1e-14);
        ldl.factor(&a, 2).unwrap();

        let mut x = DVector::from_vec(vec![3.0, 3.0]);
        ldl.solve_in_place(&mut x);
        assert!((x[0] - 1.0).abs() < 1e-12, "x[0] = {}", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-12, "x[1] = {}", x[1]);
    }

    #[test]
    fn test_ldl_quasi_definite_kkt() {
        // [[1, 0, 1, 0],
        //  [0, 1, 0, 1],
        //  [1, 0, -1, 0],
        //  [0, 1, 0, -1]]
        let a = DMatrix::from_row_slice(
            4,
            4,
            &[
                1.0, 0.0, 1.0, 0.0, //
                0.0, 1.0, 0.0, 1.0, //
                1.0, 0.0, -1.0, 0.0, //
                0.0, 1.0, 0.0, -1.0,
            ],
        );
        let mut ldl = DenseLdl::new(4, 1e-14);
        ldl.factor(&a, 4).unwrap();

        // D must have mixed signs for a quasi-definite matrix
        let d = ldl.d_values();
        assert!(d.iter().any(|&v| v > 0.0));
        assert!(d.iter().any(|&v| v < 0.0));

        let b = DVector::from_vec(vec![1.0, 1.0, 0.0, 0.0]);
        let mut x = b.clone();
        ldl.solve_in_place(&mut x);
        let res = &a * &x - &b;
        assert!(res.amax() < 1e-12, "residual {}", res.amax());
    }

    #[test]
    fn test_ldl_reads_lower_triangle_only() {
        // upper triangle deliberately poisoned
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 99.0, 1.0, 2.0]);
        let sym = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);

        let mut ldl = DenseLdl::new(2, 1e-14);
        ldl.factor(&a, 2).unwrap();
        let mut x = DVector::from_vec(vec![1.0, 2.0]);
        ldl.solve_in_place(&mut x);
        let res = &sym * &x - DVector::from_vec(vec![1.0, 2.0]);
        assert!(res.amax() < 1e-12);
    }

    #[test]
    fn test_ldl_matrix_rhs() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, -2.0]);
        let mut ldl = DenseLdl::new(8, 0.0);
        ldl.factor(&a, 3).unwrap();

        let b = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let mut x = b.clone();
        ldl.solve_mat_in_place(&mut x);
        let res = &a * &x - &b;
        assert!(res.amax() < 1e-12);
    }

    #[test]
    fn test_ldl_reports_non_regular_pivot() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]); // singular
        let mut ldl = DenseLdl::new(2, 1e-10);
        match ldl.factor(&a, 2) {
            Err(LdlError::NonRegularPivot { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected NonRegularPivot, got {other:?}"),
        }
    }

    #[test]
    fn test_ldl_subview_factorization() {
        // factor the top-left 2x2 block of a larger buffer
        let mut buf = DMatrix::from_element(5, 5, 7.0);
        buf[(0, 0)] = 2.0;
        buf[(1, 0)] = 1.0;
        buf[(1, 1)] = 2.0;

        let mut ldl = DenseLdl::new(5, 1e-14);
        ldl.factor(&buf, 2).unwrap();
        assert_eq!(ldl.active_dim(), 2);

        let mut x = DVector::from_vec(vec![3.0, 3.0]);
        ldl.solve_in_place(&mut x);
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }
}

//! Small numerical helpers shared across the solver.

use nalgebra::{DMatrix, DVector};

/// Infinity norm of a vector. Returns 0 for an empty vector.
#[inline]
pub fn infty_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc, &x| acc.max(x.abs()))
}

/// Infinity norm of a scoreboard slice.
#[inline]
pub fn infty_norm_slice(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |acc, &x| acc.max(x.abs()))
}

#[inline]
pub fn dot(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(ai, bi)| ai * bi).sum()
}

/// Copy the strict lower triangle of the top-left `n x n` block onto the
/// upper triangle, making the block exactly symmetric.
pub fn symmetrize_lower(m: &mut DMatrix<f64>, n: usize) {
    debug_assert!(m.nrows() >= n && m.ncols() >= n);
    for j in 0..n {
        for i in (j + 1)..n {
            let v = m[(i, j)];
            m[(j, i)] = v;
        }
    }
}

/// Max asymmetry `|A - A^T|` of the top-left `n x n` block.
pub fn asymmetry(m: &DMatrix<f64>, n: usize) -> f64 {
    let mut acc = 0.0f64;
    for j in 0..n {
        for i in (j + 1)..n {
            acc = acc.max((m[(i, j)] - m[(j, i)]).abs());
        }
    }
    acc
}

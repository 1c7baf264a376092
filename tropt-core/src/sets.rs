//! Closed convex constraint sets.
//!
//! A stage constraint has the form `c(x, u, y) in C` for a closed convex set
//! `C`. The solver never manipulates `C` directly; it only needs the
//! **normal-cone projection**
//!
//! ```text
//! ncp(z) = z - proj_C(z)
//! ```
//!
//! which is the complementarity residual used to form projected multiplier
//! estimates, and the action of its generalized Jacobian on constraint
//! Jacobians. The set family is closed (equality, nonnegative slack, Lorentz
//! cone), so a tagged enum with match-dispatched fast paths is used instead of
//! a trait object.
//!
//! All vector arguments are contiguous slices of stacked multiplier vectors;
//! the set is responsible for a specific range of its constraint's rows.

use nalgebra::DMatrix;

/// Closed convex set attached to a constraint function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintSet {
    /// `C = {0}`: equality constraint. `ncp` is the identity.
    Equality,

    /// `C = {z : z <= 0}` componentwise: inequality constraint `c <= 0`.
    /// `ncp(z) = max(z, 0)`.
    NegativeOrthant,

    /// Second-order (Lorentz) cone `K = {(t, w) : ||w||_2 <= t}`.
    /// `ncp(z) = z - proj_K(z)`. Dimension must be at least 2.
    SecondOrderCone,
}

impl ConstraintSet {
    /// Residual of the projection onto the set: `out = z - proj_C(z)`.
    pub fn normal_cone_projection(&self, z: &[f64], out: &mut [f64]) {
        debug_assert_eq!(z.len(), out.len());
        match self {
            ConstraintSet::Equality => out.copy_from_slice(z),
            ConstraintSet::NegativeOrthant => {
                for i in 0..z.len() {
                    out[i] = z[i].max(0.0);
                }
            }
            ConstraintSet::SecondOrderCone => {
                let (t, s) = soc_split(z);
                if s <= t {
                    // interior of K: projection is the identity
                    out.fill(0.0);
                } else if s <= -t {
                    // polar cone: projection is zero
                    out.copy_from_slice(z);
                } else {
                    let coef = 0.5 * (t + s);
                    out[0] = z[0] - coef;
                    for i in 1..z.len() {
                        out[i] = z[i] - coef * z[i] / s;
                    }
                }
            }
        }
    }

    /// Left-multiply `jac` in place by the generalized Jacobian of
    /// `normal_cone_projection` at `z`. Rows corresponding to inactive
    /// components are zeroed.
    pub fn apply_normal_cone_projection_jacobian(&self, z: &[f64], jac: &mut DMatrix<f64>) {
        debug_assert_eq!(z.len(), jac.nrows());
        match self {
            ConstraintSet::Equality => {}
            ConstraintSet::NegativeOrthant => {
                for i in 0..z.len() {
                    if z[i] <= 0.0 {
                        jac.row_mut(i).fill(0.0);
                    }
                }
            }
            ConstraintSet::SecondOrderCone => {
                let (t, s) = soc_split(z);
                if s <= t {
                    jac.fill(0.0);
                } else if s <= -t {
                    // polar cone: d(ncp) is the identity
                } else {
                    // Boundary case: M = I - d(proj_K)(z), a dense (nr x nr)
                    // block applied through a temporary.
                    let m = soc_residual_jacobian(z, t, s);
                    let tmp = jac.clone();
                    jac.gemm(1.0, &m, &tmp, 0.0);
                }
            }
        }
    }
}

#[inline]
fn soc_split(z: &[f64]) -> (f64, f64) {
    debug_assert!(z.len() >= 2, "SOC requires dimension >= 2");
    let t = z[0];
    let s = z[1..].iter().map(|&v| v * v).sum::<f64>().sqrt();
    (t, s)
}

/// Jacobian of `z - proj_K(z)` in the boundary region (`|t| < s`), with
/// `s = ||w||`.
fn soc_residual_jacobian(z: &[f64], t: f64, s: f64) -> DMatrix<f64> {
    let nr = z.len();
    let a = 0.5 * (t + s) / s;
    let mut m = DMatrix::zeros(nr, nr);
    m[(0, 0)] = 0.5;
    for i in 1..nr {
        let wi = z[i] / s;
        m[(0, i)] = -0.5 * wi;
        m[(i, 0)] = -0.5 * wi;
        for j in 1..nr {
            let wj = z[j] / s;
            m[(i, j)] = (a - 0.5) * wi * wj;
            if i == j {
                m[(i, j)] += 1.0 - a;
            }
        }
    }
    m
}

//! Merit-function line searches.
//!
//! Both searches work on `phi(alpha) = Phi(trial(alpha))` with `phi(0)` and a
//! one-sided derivative estimate `dphi0`, never extrapolate beyond 1, and
//! accept the floor step `alpha_min` rather than fail, so the inner loop
//! always makes progress. Non-finite merit values are treated as `+inf` and
//! backtracked away from.

/// Step-size search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinesearchStrategy {
    /// Geometric backtracking under the Armijo condition.
    Armijo,
    /// Quadratic-then-cubic interpolation with safeguarded minimizers.
    CubicInterp,
}

/// How `dphi0` is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionalDerivative {
    /// `(phi(eps) - phi(0)) / eps` with `eps = 1e-10`.
    FiniteDiff,
    /// `sum_k rhs0_k' * pd_step_k` from the backward-pass quantities.
    Analytic,
}

#[derive(Debug, Clone, Copy)]
pub struct LinesearchParams {
    pub strategy: LinesearchStrategy,
    /// Backtracking factor in (0, 1).
    pub ls_beta: f64,
    /// Armijo sufficient-decrease constant.
    pub armijo_c1: f64,
    /// Smallest step size; accepted unconditionally when reached.
    pub alpha_min: f64,
}

impl Default for LinesearchParams {
    fn default() -> Self {
        Self {
            strategy: LinesearchStrategy::Armijo,
            ls_beta: 0.5,
            armijo_c1: 1e-4,
            alpha_min: 1e-7,
        }
    }
}

#[inline]
fn sanitize(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        f64::INFINITY
    }
}

#[inline]
fn armijo_ok(phi_a: f64, phi0: f64, dphi0: f64, c1: f64, alpha: f64) -> bool {
    phi_a <= phi0 + c1 * alpha * dphi0
}

/// Backtracking Armijo search. Returns `(alpha, phi(alpha))`; the last
/// evaluation of `phi` is at the returned step.
pub fn armijo_search<F>(
    phi: &mut F,
    phi0: f64,
    dphi0: f64,
    params: &LinesearchParams,
) -> (f64, f64)
where
    F: FnMut(f64) -> f64,
{
    let mut alpha = 1.0;
    loop {
        let v = sanitize(phi(alpha));
        if armijo_ok(v, phi0, dphi0, params.armijo_c1, alpha) {
            return (alpha, v);
        }
        let next = alpha * params.ls_beta;
        if next < params.alpha_min {
            let v = sanitize(phi(params.alpha_min));
            return (params.alpha_min, v);
        }
        alpha = next;
    }
}

/// Interpolating search: first backtrack with the quadratic model through
/// `(0, phi0, dphi0)` and the rejected point, then with cubics through the
/// two most recent trials. Minimizers are clamped into a trust window of the
/// current step and floored at `alpha_min`.
pub fn cubic_interp_search<F>(
    phi: &mut F,
    phi0: f64,
    dphi0: f64,
    params: &LinesearchParams,
) -> (f64, f64)
where
    F: FnMut(f64) -> f64,
{
    let c1 = params.armijo_c1;
    let mut a_cur = 1.0;
    let mut v_cur = sanitize(phi(a_cur));
    if armijo_ok(v_cur, phi0, dphi0, c1, a_cur) {
        return (a_cur, v_cur);
    }

    // quadratic model: min of  phi0 + dphi0*a + (v1 - phi0 - dphi0) a^2
    let mut a_prev = a_cur;
    let mut v_prev = v_cur;
    let denom = v_cur - phi0 - dphi0;
    let mut a_next = if denom > 0.0 && v_cur.is_finite() {
        -0.5 * dphi0 / denom
    } else {
        0.5 * a_cur
    };
    a_cur = clamp_step(a_next, a_prev, params.alpha_min);
    v_cur = sanitize(phi(a_cur));

    loop {
        if armijo_ok(v_cur, phi0, dphi0, c1, a_cur) {
            return (a_cur, v_cur);
        }
        if a_cur <= params.alpha_min {
            // floor reached: accept anyway to maintain progress
            return (a_cur, v_cur);
        }

        a_next = cubic_minimizer(phi0, dphi0, a_prev, v_prev, a_cur, v_cur)
            .unwrap_or(0.5 * a_cur);
        let a_clamped = clamp_step(a_next, a_cur, params.alpha_min);

        a_prev = a_cur;
        v_prev = v_cur;
        a_cur = a_clamped;
        v_cur = sanitize(phi(a_cur));
    }
}

/// Keep the candidate inside `[alpha_min, a_hi]` and away from the endpoints
/// of the current bracket (standard interpolation safeguard).
fn clamp_step(a: f64, a_hi: f64, alpha_min: f64) -> f64 {
    let lo = 0.1 * a_hi;
    let hi = 0.5 * a_hi;
    let a = if a.is_finite() { a } else { hi };
    a.clamp(lo, hi).max(alpha_min)
}

/// Minimizer of the cubic interpolating `(0, phi0)` with slope `dphi0` and
/// the two trial points. Returns `None` when the model is degenerate.
fn cubic_minimizer(
    phi0: f64,
    dphi0: f64,
    a0: f64,
    v0: f64,
    a1: f64,
    v1: f64,
) -> Option<f64> {
    if !v0.is_finite() || !v1.is_finite() || a0 == a1 {
        return None;
    }
    let r0 = v0 - phi0 - dphi0 * a0;
    let r1 = v1 - phi0 - dphi0 * a1;
    let denom = a0 * a0 * a1 * a1 * (a1 - a0);
    if denom == 0.0 {
        return None;
    }
    let ca = (a0 * a0 * r1 - a1 * a1 * r0) / denom;
    let cb = (-a0 * a0 * a0 * r1 + a1 * a1 * a1 * r0) / denom;
    if ca == 0.0 {
        // quadratic fallback
        if cb <= 0.0 {
            return None;
        }
        return Some(-dphi0 / (2.0 * cb));
    }
    let disc = cb * cb - 3.0 * ca * dphi0;
    if disc < 0.0 {
        return None;
    }
    let am = (-cb + disc.sqrt()) / (3.0 * ca);
    if am.is_finite() && am > 0.0 {
        Some(am)
    } else {
        None
    }
}

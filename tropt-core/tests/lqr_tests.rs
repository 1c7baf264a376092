//! End-to-end LQR scenarios for the PDAL-DDP solver.
//!
//! These tests validate the full pipeline (evaluation, backward sweep,
//! direction assembly, line search, AL loop) on double-integrator problems
//! with and without path/terminal constraints.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra::{DMatrix, DVector};
use tropt_core::{
    ConstraintSet, ControlBoxFunction, DirectionalDerivative, ExplicitDynamics, FunctionData,
    LinearDynamics, LinesearchStrategy, QuadraticCost, SolverProxDdp, SolverSettings,
    StageFunction, StageModel, StateErrorResidual, TrajOptProblem, VectorSpace,
};

fn infty_norm(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc, &x| acc.max(x.abs()))
}

struct LqrCase {
    nsteps: usize,
    dt: f64,
    x0: Vec<f64>,
    q: f64,
    r: f64,
    qf: f64,
    u_box: Option<f64>,
    term_target: Option<Vec<f64>>,
}

/// 1-D double integrator: state `[position, velocity]`, control acceleration.
fn double_integrator_problem(case: &LqrCase) -> TrajOptProblem {
    let dt = case.dt;
    let a = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
    let b = DMatrix::from_row_slice(2, 1, &[0.5 * dt * dt, dt]);

    let term_cost = QuadraticCost::state_only(
        DMatrix::identity(2, 2) * case.qf,
        DVector::zeros(2),
    );
    let mut problem = TrajOptProblem::new(
        DVector::from_vec(case.x0.clone()),
        Box::new(VectorSpace::new(2)),
        Box::new(term_cost),
    );

    for _ in 0..case.nsteps {
        let cost = QuadraticCost::new(
            DMatrix::identity(2, 2) * case.q,
            DMatrix::identity(1, 1) * case.r,
            DVector::zeros(2),
            DVector::zeros(1),
        );
        let dynamics = ExplicitDynamics::new(
            Box::new(LinearDynamics::new(a.clone(), b.clone())),
            Box::new(VectorSpace::new(2)),
            2,
            1,
        );
        let mut stage = StageModel::new(
            Box::new(VectorSpace::new(2)),
            Box::new(VectorSpace::new(1)),
            Box::new(VectorSpace::new(2)),
            Box::new(cost),
            Box::new(dynamics),
        );
        if let Some(ub) = case.u_box {
            stage.push_constraint(
                Box::new(ControlBoxFunction::new(
                    2,
                    DVector::from_vec(vec![-ub]),
                    DVector::from_vec(vec![ub]),
                )),
                ConstraintSet::NegativeOrthant,
            );
        }
        problem.add_stage(stage);
    }

    if let Some(target) = &case.term_target {
        problem.set_terminal_constraint(
            Box::new(StateErrorResidual::new(
                Box::new(VectorSpace::new(2)),
                DVector::from_vec(target.clone()),
            )),
            ConstraintSet::Equality,
        );
    }
    problem
}

#[test]
fn test_lqr_terminal_equality() {
    // E1: N=20, dt=0.05, Q=I, R=0.1, Qf=10 I, terminal equality x_N = 0
    let case = LqrCase {
        nsteps: 20,
        dt: 0.05,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: None,
        term_target: Some(vec![0.0, 0.0]),
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-8,
        max_iters: 500,
        ..Default::default()
    });
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    let results = solver.results().unwrap();

    println!("{}", results);
    assert!(conv, "solver failed to converge: {}", results);

    // invariant sizes: |xs| = N+1, |us| = N, |lams| = N+2 (terminal cstr)
    assert_eq!(results.xs.len(), 21);
    assert_eq!(results.us.len(), 20);
    assert_eq!(results.lams.len(), 22);

    // terminal equality satisfied to the target tolerance
    assert!(
        infty_norm(&results.xs[20]) <= 1e-8,
        "terminal state not driven to zero: {}",
        infty_norm(&results.xs[20])
    );
    assert!(results.primal_infeasibility <= 1e-8);
    assert!(results.dual_infeasibility <= 1e-8);
}

#[test]
fn test_lqr_one_shot_newton() {
    // Strictly convex LQR with equality-only dynamics constraints and a tiny
    // penalty: one AL cycle, one inner Newton step.
    let case = LqrCase {
        nsteps: 10,
        dt: 0.1,
        x0: vec![2.0, 1.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: None,
        term_target: None,
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-6,
        mu_init: 1e-9,
        prim_beta: 0.0,
        dual_beta: 0.0,
        ..Default::default()
    });
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    let results = solver.results().unwrap();

    assert!(conv, "one-shot LQR did not converge: {}", results);
    assert_eq!(
        results.num_iters, 1,
        "expected a single Newton step, took {}",
        results.num_iters
    );
    assert!(results.primal_infeasibility <= 1e-6);
    assert!(results.dual_infeasibility <= 1e-6);
}

#[test]
fn test_box_constrained_lqr() {
    // E2: control bounds |u| <= 0.5 with a soft terminal cost. The
    // unconstrained optimum exceeds the bound, so at least one stage must
    // saturate and carry a nonnegative multiplier on the active side.
    let ub = 0.5;
    let case = LqrCase {
        nsteps: 20,
        dt: 0.05,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: Some(ub),
        term_target: None,
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-6,
        max_iters: 500,
        ..Default::default()
    });
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    let results = solver.results().unwrap();

    println!("{}", results);
    assert!(conv, "box-constrained LQR did not converge: {}", results);

    let mut saturated = 0usize;
    for u in &results.us {
        assert!(u[0].abs() <= ub + 1e-5, "bound violated: u = {}", u[0]);
        if u[0].abs() >= ub - 1e-3 {
            saturated += 1;
        }
    }
    assert!(saturated > 0, "no stage saturates the control bound");

    // box multiplier rows (after the 2 dynamics rows) stay nonnegative
    for k in 0..20 {
        let lam = &results.lams[k + 1];
        assert!(lam.len() == 4, "expected 2 dynamics + 2 box rows");
        assert!(lam[2] >= -1e-6, "upper-bound multiplier negative: {}", lam[2]);
        assert!(lam[3] >= -1e-6, "lower-bound multiplier negative: {}", lam[3]);
    }
}

#[test]
fn test_infeasible_terminal_constraint() {
    // E4: with |u| <= 0.5 the state cannot travel 10 units in one second;
    // the terminal equality is unreachable. The solver must report
    // non-convergence with bounded infeasibility and a finite merit.
    let case = LqrCase {
        nsteps: 20,
        dt: 0.05,
        x0: vec![0.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 0.0,
        u_box: Some(0.5),
        term_target: Some(vec![10.0, 0.0]),
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-6,
        max_iters: 150,
        max_al_iters: 15,
        ..Default::default()
    });
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    let results = solver.results().unwrap();

    println!("{}", results);
    assert!(!conv, "infeasible problem reported as converged");
    assert!(results.primal_infeasibility > 1e-6);
    assert!(results.primal_infeasibility.is_finite());
    assert!(results.merit_value.is_finite(), "merit value is not finite");
    assert!(results.traj_cost.is_finite());
    for x in &results.xs {
        assert!(x.iter().all(|v| v.is_finite()), "non-finite state iterate");
    }
}

#[test]
fn test_lqr_stress_monotone_dual_infeasibility() {
    // E5: long horizon; the dual infeasibility reported at each inner
    // iteration must not increase.
    let case = LqrCase {
        nsteps: 200,
        dt: 0.01,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: None,
        term_target: Some(vec![0.0, 0.0]),
    };
    let problem = double_integrator_problem(&case);

    let history: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&history);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-8,
        max_iters: 500,
        ..Default::default()
    });
    solver.setup(&problem);
    solver.register_callback(move |_ws, results| {
        sink.borrow_mut().push(results.dual_infeasibility);
    });
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    let results = solver.results().unwrap();

    assert!(conv, "stress LQR did not converge: {}", results);

    let hist = history.borrow();
    assert!(!hist.is_empty());
    for w in hist.windows(2) {
        assert!(
            w[1] <= w[0] + 1e-9,
            "dual infeasibility increased: {} -> {}",
            w[0],
            w[1]
        );
    }
}

#[test]
fn test_warm_start_neutrality() {
    // Re-running from the converged trajectory must cost at most one more
    // inner iteration.
    let case = LqrCase {
        nsteps: 20,
        dt: 0.05,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: None,
        term_target: Some(vec![0.0, 0.0]),
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-8,
        max_iters: 500,
        ..Default::default()
    });
    solver.setup(&problem);
    assert!(solver.run(&problem, &[], &[]).expect("run failed"));

    let (xs, us) = {
        let results = solver.results().unwrap();
        (results.xs.clone(), results.us.clone())
    };

    let conv = solver.run(&problem, &xs, &us).expect("warm run failed");
    let results = solver.results().unwrap();
    assert!(conv);
    assert!(
        results.num_iters <= 1,
        "warm start took {} inner iterations",
        results.num_iters
    );
}

#[test]
fn test_warm_start_size_mismatch_is_misuse() {
    let case = LqrCase {
        nsteps: 5,
        dt: 0.1,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 1.0,
        u_box: None,
        term_target: None,
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings::default());
    solver.setup(&problem);

    let bad_xs = vec![DVector::zeros(2); 3]; // expected 6
    let err = solver.run(&problem, &bad_xs, &[]).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("warm-start"), "unexpected error: {msg}");
}

#[test]
fn test_run_before_setup_is_misuse() {
    let case = LqrCase {
        nsteps: 5,
        dt: 0.1,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 1.0,
        u_box: None,
        term_target: None,
    };
    let problem = double_integrator_problem(&case);
    let mut solver = SolverProxDdp::new(SolverSettings::default());
    assert!(solver.run(&problem, &[], &[]).is_err());
}

#[test]
fn test_cubic_linesearch_converges() {
    let case = LqrCase {
        nsteps: 20,
        dt: 0.05,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: None,
        term_target: Some(vec![0.0, 0.0]),
    };
    let problem = double_integrator_problem(&case);

    let mut settings = SolverSettings {
        target_tol: 1e-8,
        max_iters: 500,
        ..Default::default()
    };
    settings.linesearch.strategy = LinesearchStrategy::CubicInterp;

    let mut solver = SolverProxDdp::new(settings);
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    assert!(conv, "cubic-interpolation run did not converge");
    assert!(infty_norm(&solver.results().unwrap().xs[20]) <= 1e-8);
}

#[test]
fn test_analytic_directional_derivative_converges() {
    let case = LqrCase {
        nsteps: 20,
        dt: 0.05,
        x0: vec![1.0, 0.0],
        q: 1.0,
        r: 0.1,
        qf: 10.0,
        u_box: None,
        term_target: Some(vec![0.0, 0.0]),
    };
    let problem = double_integrator_problem(&case);

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-8,
        max_iters: 500,
        dderiv: DirectionalDerivative::Analytic,
        ..Default::default()
    });
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    assert!(conv, "analytic-derivative run did not converge");
}

/// `[radius; u] in SOC`, i.e. `||u||_2 <= radius`.
struct NormBallFunction {
    radius: f64,
    ndx1: usize,
    nu: usize,
}

impl StageFunction for NormBallFunction {
    fn nr(&self) -> usize {
        self.nu + 1
    }

    fn evaluate(&self, _x: &DVector<f64>, u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        data.value[0] = self.radius;
        for i in 0..self.nu {
            data.value[1 + i] = u[i];
        }
    }

    fn jacobians(&self, _x: &DVector<f64>, _u: &DVector<f64>, _y: &DVector<f64>, data: &mut FunctionData) {
        data.jac_buffer.fill(0.0);
        for i in 0..self.nu {
            data.jac_buffer[(1 + i, self.ndx1 + i)] = 1.0;
        }
    }
}

#[test]
fn test_control_norm_cone_constraint() {
    // planar double integrator with a Lorentz-cone bound on the control norm
    let dt = 0.1;
    let nsteps = 20;
    let radius = 0.6;

    let mut a = DMatrix::identity(4, 4);
    a[(0, 2)] = dt;
    a[(1, 3)] = dt;
    let mut b = DMatrix::zeros(4, 2);
    b[(0, 0)] = 0.5 * dt * dt;
    b[(1, 1)] = 0.5 * dt * dt;
    b[(2, 0)] = dt;
    b[(3, 1)] = dt;

    let mut problem = TrajOptProblem::new(
        DVector::from_vec(vec![1.0, 1.0, 0.0, 0.0]),
        Box::new(VectorSpace::new(4)),
        Box::new(QuadraticCost::state_only(
            DMatrix::identity(4, 4) * 10.0,
            DVector::zeros(4),
        )),
    );
    for _ in 0..nsteps {
        let mut stage = StageModel::new(
            Box::new(VectorSpace::new(4)),
            Box::new(VectorSpace::new(2)),
            Box::new(VectorSpace::new(4)),
            Box::new(QuadraticCost::new(
                DMatrix::identity(4, 4) * 0.1,
                DMatrix::identity(2, 2) * 0.01,
                DVector::zeros(4),
                DVector::zeros(2),
            )),
            Box::new(ExplicitDynamics::new(
                Box::new(LinearDynamics::new(a.clone(), b.clone())),
                Box::new(VectorSpace::new(4)),
                4,
                2,
            )),
        );
        stage.push_constraint(
            Box::new(NormBallFunction {
                radius,
                ndx1: 4,
                nu: 2,
            }),
            ConstraintSet::SecondOrderCone,
        );
        problem.add_stage(stage);
    }

    let mut solver = SolverProxDdp::new(SolverSettings {
        target_tol: 1e-5,
        max_iters: 1000,
        ..Default::default()
    });
    solver.setup(&problem);
    let conv = solver.run(&problem, &[], &[]).expect("run failed");
    let results = solver.results().unwrap();

    println!("{}", results);
    assert!(conv, "cone-constrained problem did not converge: {}", results);
    let mut bound_active = false;
    for u in &results.us {
        let norm = (u[0] * u[0] + u[1] * u[1]).sqrt();
        assert!(norm <= radius + 1e-3, "cone violated: ||u|| = {norm}");
        if norm >= radius - 1e-2 {
            bound_active = true;
        }
    }
    assert!(bound_active, "cone constraint never active");
}

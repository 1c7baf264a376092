//! Tropt: a proximal primal-dual augmented-Lagrangian DDP solver
//!
//! This library implements a trajectory optimization core for discrete-time
//! optimal control problems over manifold-valued states and controls:
//!
//! ```text
//! minimize    sum_k  l_k(x_k, u_k)  +  l_N(x_N)
//! subject to  f_k(x_k, u_k, x_{k+1}) = 0          (dynamics)
//!             c_{k,j}(x_k, u_k, x_{k+1}) in C_j   (stage constraints)
//!             x_0 given,  optionally  g(x_N) in C_term
//! ```
//!
//! # Algorithm
//!
//! The solver is a **proximal primal-dual augmented Lagrangian** method with a
//! DDP-style backward sweep. Key features:
//!
//! - **Riccati-like backward recursion** solving a regularized saddle-point
//!   KKT system per stage, factorized with a quasi-definite LDL^T
//! - **BCL outer loop** adapting the penalty `mu`, the proximal weight `rho`,
//!   and primal/inner tolerances, with three multiplier update modes
//! - **Inner semismooth Newton loop** globalized by an Armijo or
//!   cubic-interpolation line search on a primal-dual merit function
//! - **Normal-cone projections** expressing equality, inequality, and conic
//!   constraints through a single complementarity residual
//!
//! # Example
//!
//! ```ignore
//! use tropt_core::{SolverProxDdp, SolverSettings, TrajOptProblem};
//!
//! let problem: TrajOptProblem = /* stages, costs, dynamics, constraints */;
//!
//! let mut solver = SolverProxDdp::new(SolverSettings {
//!     target_tol: 1e-8,
//!     ..Default::default()
//! });
//! solver.setup(&problem);
//! let converged = solver.run(&problem, &[], &[])?;
//!
//! let results = solver.results().unwrap();
//! println!("{}", results);
//! ```
//!
//! # References
//!
//! - BCL: Conn, Gould, Toint, "A globally convergent augmented Lagrangian
//!   algorithm with applications to constrained optimization"
//! - DDP backward recursions with constraint stacks follow the saddle-point
//!   formulation of proximal differential dynamic programming

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // DDP recursions need many parameters

pub mod cost;
pub mod dynamics;
pub mod funcs;
pub mod linalg;
pub mod manifold;
pub mod math;
pub mod problem;
pub mod sets;
pub mod solver;

// Re-export main types
pub use cost::{CostData, CostFunction, QuadraticCost};
pub use dynamics::{ExplicitDynamics, ExplicitDynamicsModel, LinearDynamics};
pub use funcs::{ControlBoxFunction, FunctionData, StageFunction, StateErrorResidual};
pub use manifold::{Manifold, VectorSpace};
pub use problem::{StageModel, TrajOptData, TrajOptProblem};
pub use sets::ConstraintSet;
pub use solver::{
    DirectionalDerivative, LinesearchParams, LinesearchStrategy, MeritMode,
    MultiplierUpdateMode, Results, SolverError, SolverProxDdp, SolverSettings, Workspace,
};

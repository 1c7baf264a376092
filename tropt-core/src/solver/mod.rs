//! Proximal primal-dual augmented-Lagrangian DDP solver.
//!
//! Control flow: [`SolverProxDdp::run`] seeds the trajectory and multipliers,
//! then iterates AL cycles. Each cycle runs the inner semismooth Newton loop
//! (problem evaluation, backward Riccati-like sweep, direction assembly, merit
//! line search) until the inner criterion drops below the current inner
//! tolerance, then measures infeasibility and updates tolerances, penalty,
//! and multiplier estimates.

pub mod backward;
pub mod forward;
pub mod linesearch;
pub mod merit;
pub mod results;
pub mod solve;
pub mod workspace;

pub use linesearch::{DirectionalDerivative, LinesearchParams, LinesearchStrategy};
pub use merit::{MeritMode, PdalMerit};
pub use results::Results;
pub use solve::{MultiplierUpdateMode, SolverError, SolverProxDdp, SolverSettings};
pub use workspace::{QStore, StageDims, ValueStore, Workspace};

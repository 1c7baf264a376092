//! Dense linear-algebra kernels for the stage KKT systems.

pub mod ldl;

pub use ldl::{DenseLdl, LdlError};

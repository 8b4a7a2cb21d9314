#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod env;
pub mod registry;
pub mod solver;

pub use env::{Connection, Env};
pub use registry::{KnownVersions, Registry, DEFAULT_WEBSITE};
pub use solver::{solve, verify_app, verify_pkg, Solution, SolverDetails};

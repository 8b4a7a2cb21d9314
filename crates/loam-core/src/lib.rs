#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod build;
pub mod cell;
pub mod compiler;
pub mod details;
mod gather;

pub use cell::Cell;
pub use compiler::{Compiled, Compiler, ParsedModule};
pub use details::Engine;

#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod fetch;
pub mod file;
pub mod http;
pub mod lock;
pub mod paths;
pub mod writer;

pub use fetch::fetch_package;
pub use http::{Archive, ArchiveProblem, HttpTransport, Transport};
pub use lock::RegistryLock;
pub use writer::Writer;

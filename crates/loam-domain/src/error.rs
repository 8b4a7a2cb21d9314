use std::path::PathBuf;

use thiserror::Error;

use crate::details::Fingerprint;
use crate::name::PkgName;
use crate::version::{Constraint, Version};

/// Everything that can go wrong while loading or regenerating a project's
/// details. The driver returns exactly one of these per run; rendering is
/// the caller's concern.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum Problem {
    #[error("the project manifest is malformed: {0}")]
    BadOutline(String),
    #[error("this application declares compiler version {0}, which is not the running compiler")]
    BadElmInAppOutline(Version),
    #[error("this package requires a compiler in {0}, which excludes the running compiler")]
    BadElmInPkg(Constraint),
    #[error("cannot get the package registry: {0}")]
    CannotGetRegistry(String),
    #[error("no version assignment satisfies the declared constraints")]
    NoSolution,
    #[error("a solution may exist, but it needs package versions that are not cached locally")]
    NoOfflineSolution,
    #[error("dependency solving failed: {0}")]
    SolverProblem(String),
    #[error("the dependencies in the manifest appear to have been edited by hand")]
    HandEditedDependencies,
    #[error("{} dependencies failed to verify", .errors.len())]
    BadDeps {
        home: PathBuf,
        errors: Vec<BadDep>,
    },
}

/// One dependency's contribution to a failed verify. Siblings keep building
/// while these accumulate.
#[derive(Debug, PartialEq, Eq)]
pub enum BadDep {
    BadDownload {
        pkg: PkgName,
        version: Version,
        problem: FetchProblem,
    },
    BadBuild {
        pkg: PkgName,
        version: Version,
        fingerprint: Fingerprint,
    },
}

impl BadDep {
    pub fn pkg(&self) -> &PkgName {
        match self {
            BadDep::BadDownload { pkg, .. } | BadDep::BadBuild { pkg, .. } => pkg,
        }
    }
}

/// Why downloading one package failed.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum FetchProblem {
    #[error("the endpoint request failed: {0}")]
    BadEndpointRequest(String),
    #[error("the endpoint response was not understood")]
    BadEndpointContent,
    #[error("the archive request failed: {0}")]
    BadArchiveRequest(String),
    #[error("the archive could not be unpacked: {0}")]
    BadArchiveContent(String),
    #[error("the archive hash did not match (expected {expected}, got {actual})")]
    BadArchiveHash { expected: String, actual: String },
}

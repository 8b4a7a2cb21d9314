use std::fs;
use std::path::Path;

use loam_domain::{FetchProblem, PkgName, Version};
use serde::Deserialize;
use tracing::debug;

use crate::file;
use crate::http::{ArchiveProblem, Transport};
use crate::paths;

/// What the registry serves at `…/endpoint.json` for a published version.
#[derive(Debug, Deserialize)]
struct Endpoint {
    url: String,
    hash: String,
}

/// Download and unpack `pkg` at `version` into the package cache. A no-op
/// when the package's `src` directory is already present. The caller must
/// hold the registry lock.
pub fn fetch_package(
    transport: &dyn Transport,
    website: &str,
    home: &Path,
    pkg: &PkgName,
    version: Version,
) -> Result<(), FetchProblem> {
    let dir = paths::package_dir(home, pkg, version);
    if dir.join("src").exists() {
        return Ok(());
    }

    let endpoint_url = format!("{website}/packages/{pkg}/{version}/endpoint.json");
    let bytes = transport
        .get(&endpoint_url)
        .map_err(|err| FetchProblem::BadEndpointRequest(err.to_string()))?;
    let endpoint: Endpoint =
        serde_json::from_slice(&bytes).map_err(|_| FetchProblem::BadEndpointContent)?;

    let archive = transport.get_archive(&endpoint.url).map_err(|problem| match problem {
        ArchiveProblem::Request(err) => FetchProblem::BadArchiveRequest(err),
        ArchiveProblem::Content(err) => FetchProblem::BadArchiveContent(err),
    })?;

    if !archive.sha256().eq_ignore_ascii_case(&endpoint.hash) {
        return Err(FetchProblem::BadArchiveHash {
            expected: endpoint.hash,
            actual: archive.sha256().to_string(),
        });
    }

    let content_root = archive
        .content_root()
        .map_err(|err| FetchProblem::BadArchiveContent(err.to_string()))?;

    // A leftover directory without src/ is a truncated earlier attempt.
    if dir.exists() {
        fs::remove_dir_all(&dir)
            .map_err(|err| FetchProblem::BadArchiveContent(err.to_string()))?;
    }
    file::move_dir(&content_root, &dir)
        .map_err(|err| FetchProblem::BadArchiveContent(err.to_string()))?;

    debug!(pkg = %pkg, version = %version, "unpacked package into cache");
    Ok(())
}

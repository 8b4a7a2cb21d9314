//! Where everything lives: the shared package cache under `<home>` and the
//! per-project build directory under `<root>/elm-stuff`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use dirs_next::home_dir;
use loam_domain::{PkgName, Version, COMPILER_VERSION};

pub const HOME_ENV: &str = "LOAM_HOME";

/// Resolve `<home>`, the root of the shared package cache.
///
/// `LOAM_HOME` wins, then `XDG_CACHE_HOME`, then `~/.cache/loam`.
pub fn resolve_home() -> Result<PathBuf> {
    if let Some(overridden) = env::var_os(HOME_ENV) {
        let path = PathBuf::from(overridden);
        return if path.is_absolute() {
            Ok(path)
        } else {
            Ok(env::current_dir()?.join(path))
        };
    }
    if let Some(xdg) = env::var_os("XDG_CACHE_HOME") {
        return Ok(PathBuf::from(xdg).join("loam"));
    }
    let home = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    Ok(home.join(".cache").join("loam"))
}

pub fn packages_root(home: &Path) -> PathBuf {
    home.join("packages")
}

pub fn package_dir(home: &Path, pkg: &PkgName, version: Version) -> PathBuf {
    packages_root(home)
        .join(&pkg.author)
        .join(&pkg.project)
        .join(version.to_string())
}

pub fn package_src(home: &Path, pkg: &PkgName, version: Version) -> PathBuf {
    package_dir(home, pkg, version).join("src")
}

pub fn package_manifest(home: &Path, pkg: &PkgName, version: Version) -> PathBuf {
    package_dir(home, pkg, version).join("elm.json")
}

pub fn package_artifacts(home: &Path, pkg: &PkgName, version: Version) -> PathBuf {
    package_dir(home, pkg, version).join("artifacts.json")
}

pub fn package_docs(home: &Path, pkg: &PkgName, version: Version) -> PathBuf {
    package_dir(home, pkg, version).join("docs.json")
}

pub fn registry_file(home: &Path) -> PathBuf {
    home.join("registry.dat")
}

pub fn registry_lock_file(home: &Path) -> PathBuf {
    home.join("registry.lock")
}

pub fn project_manifest(root: &Path) -> PathBuf {
    root.join("elm.json")
}

pub fn stuff_dir(root: &Path) -> PathBuf {
    root.join("elm-stuff").join(COMPILER_VERSION.to_string())
}

pub fn details_file(root: &Path) -> PathBuf {
    stuff_dir(root).join("d.dat")
}

pub fn interfaces_file(root: &Path) -> PathBuf {
    stuff_dir(root).join("i.dat")
}

pub fn objects_file(root: &Path) -> PathBuf {
    stuff_dir(root).join("o.dat")
}

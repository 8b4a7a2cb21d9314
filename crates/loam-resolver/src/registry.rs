use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use loam_domain::{binary, PkgName, Problem, Version};
use loam_store::{file, paths, Transport};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_WEBSITE: &str = "https://package.elm-lang.org";

/// Every published version of one package, newest first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownVersions {
    pub newest: Version,
    pub previous: Vec<Version>,
}

impl KnownVersions {
    pub fn new(newest: Version) -> KnownVersions {
        KnownVersions {
            newest,
            previous: Vec::new(),
        }
    }

    pub fn add(&mut self, version: Version) {
        if version == self.newest || self.previous.contains(&version) {
            return;
        }
        if version > self.newest {
            self.previous.insert(0, self.newest);
            self.newest = version;
        } else {
            let at = self
                .previous
                .iter()
                .position(|v| *v < version)
                .unwrap_or(self.previous.len());
            self.previous.insert(at, version);
        }
    }

    pub fn descending(&self) -> impl Iterator<Item = Version> + '_ {
        std::iter::once(self.newest).chain(self.previous.iter().copied())
    }

    pub fn total(&self) -> usize {
        1 + self.previous.len()
    }
}

/// The cumulative set of `(package, version)` pairs the registry has ever
/// served, cached under `<home>/registry.dat`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub count: u64,
    pub packages: BTreeMap<PkgName, KnownVersions>,
}

impl Registry {
    pub fn insert(&mut self, pkg: PkgName, version: Version) {
        match self.packages.get_mut(&pkg) {
            Some(known) => {
                let before = known.total();
                known.add(version);
                if known.total() > before {
                    self.count += 1;
                }
            }
            None => {
                self.packages.insert(pkg, KnownVersions::new(version));
                self.count += 1;
            }
        }
    }

    pub fn known_versions(&self, pkg: &PkgName) -> Option<&KnownVersions> {
        self.packages.get(pkg)
    }

    pub fn latest(&self, pkg: &PkgName) -> Option<Version> {
        self.packages.get(pkg).map(|known| known.newest)
    }

    /// Decode the cached registry; anything unrecognized reads as absent.
    pub fn read(home: &Path) -> Option<Registry> {
        let bytes = std::fs::read(paths::registry_file(home)).ok()?;
        binary::decode(&bytes)
    }

    pub fn write(&self, home: &Path) -> Result<()> {
        let bytes = binary::encode(self)?;
        file::write_atomic(&paths::registry_file(home), &bytes)
    }

    /// One full download of the registry, persisted on success.
    pub fn fetch(transport: &dyn Transport, website: &str, home: &Path) -> Result<Registry, Problem> {
        let url = format!("{website}/all-packages");
        let attempt = || -> Result<Registry> {
            let bytes = transport.get(&url)?;
            let wire: BTreeMap<PkgName, Vec<Version>> =
                serde_json::from_slice(&bytes).context("unexpected registry response")?;
            let mut registry = Registry::default();
            for (pkg, versions) in wire {
                for version in versions {
                    registry.insert(pkg.clone(), version);
                }
            }
            registry.write(home)?;
            Ok(registry)
        };
        attempt().map_err(|err| Problem::CannotGetRegistry(err.to_string()))
    }

    /// Pull releases published since this registry was cached. Network
    /// trouble here is not fatal; solving continues against the cached view.
    pub fn update(mut self, transport: &dyn Transport, website: &str, home: &Path) -> Registry {
        let url = format!("{website}/all-packages/since/{}", self.count);
        let news: Vec<String> = match transport
            .get(&url)
            .and_then(|bytes| serde_json::from_slice(&bytes).context("unexpected response"))
        {
            Ok(news) => news,
            Err(err) => {
                warn!(%err, "could not refresh the registry; using the cached copy");
                return self;
            }
        };
        if news.is_empty() {
            return self;
        }
        for entry in &news {
            let Some((pkg, version)) = entry.split_once('@') else {
                warn!(%entry, "skipping malformed registry entry");
                continue;
            };
            match (pkg.parse(), version.parse()) {
                (Ok(pkg), Ok(version)) => self.insert(pkg, version),
                _ => warn!(%entry, "skipping malformed registry entry"),
            }
        }
        debug!(new = news.len(), "refreshed the registry");
        if let Err(err) = self.write(home) {
            warn!(%err, "could not persist the refreshed registry");
        }
        self
    }

    /// Rebuild a registry from whatever is already unpacked in the package
    /// cache; the offline fallback when the cached registry is missing.
    pub fn scan_cache(home: &Path) -> Result<Registry> {
        let mut registry = Registry::default();
        let root = paths::packages_root(home);
        for author in file::list_dirs(&root)? {
            for project in file::list_dirs(&root.join(&author))? {
                let pkg = PkgName::new(author.clone(), project.clone());
                for version_dir in file::list_dirs(&root.join(&author).join(&project))? {
                    let Ok(version) = version_dir.parse::<Version>() else {
                        continue;
                    };
                    if paths::package_manifest(home, &pkg, version).exists() {
                        registry.insert(pkg.clone(), version);
                    }
                }
            }
        }
        Ok(registry)
    }
}

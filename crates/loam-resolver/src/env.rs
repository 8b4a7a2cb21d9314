use std::path::PathBuf;
use std::sync::Arc;

use loam_domain::Problem;
use loam_store::Transport;
use tracing::debug;

use crate::registry::Registry;

/// Whether solving may reach the network. Offline solving only considers
/// package versions that are already unpacked in the cache.
#[derive(Clone)]
pub enum Connection {
    Online(Arc<dyn Transport>),
    Offline,
}

/// Everything dependency solving needs: the cache root, the registry
/// website, the cached registry, and the connection mode.
pub struct Env {
    pub home: PathBuf,
    pub website: String,
    pub connection: Connection,
    pub registry: Registry,
}

impl Env {
    /// Load the registry and decide the connection mode.
    ///
    /// A cached registry means online solving with a best-effort refresh. No
    /// cached registry means one full fetch; if that fails too, solving
    /// degrades to offline mode against whatever is already unpacked.
    pub fn init(
        home: PathBuf,
        website: String,
        transport: Arc<dyn Transport>,
    ) -> Result<Env, Problem> {
        match Registry::read(&home) {
            Some(registry) => {
                let registry = registry.update(transport.as_ref(), &website, &home);
                Ok(Env {
                    home,
                    website,
                    connection: Connection::Online(transport),
                    registry,
                })
            }
            None => match Registry::fetch(transport.as_ref(), &website, &home) {
                Ok(registry) => Ok(Env {
                    home,
                    website,
                    connection: Connection::Online(transport),
                    registry,
                }),
                Err(problem) => {
                    debug!("registry fetch failed; falling back to the local cache");
                    let registry = Registry::scan_cache(&home).map_err(|_| problem)?;
                    Ok(Env {
                        home,
                        website,
                        connection: Connection::Offline,
                        registry,
                    })
                }
            },
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.connection, Connection::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use loam_domain::{PkgName, Version};
    use loam_store::{paths, Archive, ArchiveProblem};

    /// A transport with no reachable network at all.
    struct DownTransport;

    impl Transport for DownTransport {
        fn get(&self, url: &str) -> Result<Vec<u8>> {
            bail!("network unreachable: {url}")
        }

        fn get_archive(&self, url: &str) -> Result<Archive, ArchiveProblem> {
            Err(ArchiveProblem::Request(format!("network unreachable: {url}")))
        }
    }

    /// Serves a fixed `/all-packages` response.
    struct RegistryTransport(&'static str);

    impl Transport for RegistryTransport {
        fn get(&self, url: &str) -> Result<Vec<u8>> {
            if url.ends_with("/all-packages") {
                Ok(self.0.as_bytes().to_vec())
            } else {
                bail!("404 for {url}")
            }
        }

        fn get_archive(&self, url: &str) -> Result<Archive, ArchiveProblem> {
            Err(ArchiveProblem::Request(format!("404 for {url}")))
        }
    }

    #[test]
    fn first_init_fetches_and_caches_the_registry() {
        let home = tempfile::tempdir().unwrap();
        let env = Env::init(
            home.path().to_path_buf(),
            "https://registry.invalid".to_string(),
            Arc::new(RegistryTransport(r#"{ "elm/core": ["1.0.0", "1.0.5"] }"#)),
        )
        .unwrap();

        assert!(!env.is_offline());
        assert_eq!(env.registry.count, 2);
        assert!(paths::registry_file(home.path()).exists());

        // A second init reads the cache; the failed refresh is non-fatal.
        let env = Env::init(
            home.path().to_path_buf(),
            "https://registry.invalid".to_string(),
            Arc::new(DownTransport),
        )
        .unwrap();
        assert!(!env.is_offline());
        assert_eq!(env.registry.count, 2);
    }

    #[test]
    fn unreachable_network_degrades_to_the_unpacked_cache() {
        let home = tempfile::tempdir().unwrap();
        let pkg = PkgName::new("elm", "core");
        let manifest = paths::package_manifest(home.path(), &pkg, Version::ONE);
        std::fs::create_dir_all(manifest.parent().unwrap()).unwrap();
        std::fs::write(&manifest, b"{}").unwrap();

        let env = Env::init(
            home.path().to_path_buf(),
            "https://registry.invalid".to_string(),
            Arc::new(DownTransport),
        )
        .unwrap();
        assert!(env.is_offline());
        assert_eq!(env.registry.latest(&pkg), Some(Version::ONE));
    }
}

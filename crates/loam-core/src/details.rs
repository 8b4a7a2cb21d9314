//! The incremental driver. `load` reuses the persisted details when the
//! manifest is untouched and regenerates them otherwise; `generate` runs the
//! whole pipeline: registry, solve, per-package builds, gather, persist.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use loam_domain::{
    binary, outline, Details, Extras, Fresh, GlobalGraph, PkgName, Problem, RawOutline, Time,
    ValidOutline,
};
use loam_resolver::{solver, Env, Solution, DEFAULT_WEBSITE};
use loam_store::{file, paths, writer, HttpTransport, RegistryLock, Transport};
use tracing::debug;

use crate::build;
use crate::compiler::Compiler;
use crate::gather;

/// The engine's handle on its environment: where the package cache lives,
/// which registry to talk to, and how to reach the network.
pub struct Engine {
    home: PathBuf,
    website: String,
    transport: Arc<dyn Transport>,
}

impl Engine {
    pub fn new() -> Result<Engine> {
        Ok(Engine {
            home: paths::resolve_home()?,
            website: DEFAULT_WEBSITE.to_string(),
            transport: Arc::new(HttpTransport::new()?),
        })
    }

    /// An engine with every collaborator pinned; how tests and embedders
    /// take control of the environment.
    pub fn with(home: PathBuf, website: String, transport: Arc<dyn Transport>) -> Engine {
        Engine {
            home,
            website,
            transport,
        }
    }

    /// Produce the project's `Details`, reusing the persisted record when
    /// `elm.json` has not been touched since it was written.
    ///
    /// Domain failures carry a [`Problem`]; recover it with
    /// `err.downcast_ref::<Problem>()`.
    pub fn load(&self, root: &Path, compiler: &dyn Compiler) -> Result<Details> {
        let manifest = paths::project_manifest(root);
        let new_time = file::mtime(&manifest)
            .map_err(|err| Problem::BadOutline(format!("cannot read elm.json: {err}")))?;

        let details_path = paths::details_file(root);
        if let Ok(bytes) = std::fs::read(&details_path) {
            if let Some(mut details) = binary::decode::<Details>(&bytes) {
                if details.old_time == new_time {
                    details.build_id += 1;
                    file::write_atomic(&details_path, &binary::encode(&details)?)?;
                    debug!(build_id = details.build_id, "reusing persisted details");
                    return Ok(details);
                }
            }
        }

        self.generate(root, compiler, new_time)
    }

    /// Check that the outline at `root` solves and that every dependency
    /// builds, without touching the project's own persisted files. The
    /// install command runs this against a candidate outline.
    pub fn verify_install(&self, root: &Path, compiler: &dyn Compiler) -> Result<()> {
        let _lock = RegistryLock::acquire(&self.home)?;
        let env = self.init_env()?;
        let raw = outline::read(&paths::project_manifest(root))?;
        let (solution, _direct, _valid) = solve_outline(&env, &raw)?;
        build::verify_dependencies(&env, compiler, &solution)?;
        Ok(())
    }

    fn generate(&self, root: &Path, compiler: &dyn Compiler, new_time: Time) -> Result<Details> {
        debug!(root = %root.display(), "generating project details");
        let _lock = RegistryLock::acquire(&self.home)?;
        let env = self.init_env()?;

        let raw = outline::read(&paths::project_manifest(root))?;
        let (solution, direct, valid) = solve_outline(&env, &raw)?;
        let artifacts = build::verify_dependencies(&env, compiler, &solution)?;

        let (interfaces, foreigns) = gather::interfaces_and_foreigns(&direct, &artifacts);
        let mut objects = GlobalGraph::default();
        for package_artifacts in artifacts.values() {
            objects.merge(&package_artifacts.objects);
        }

        let details = Details {
            old_time: new_time,
            outline: valid,
            build_id: 0,
            locals: BTreeMap::new(),
            foreigns,
            extras: Extras::Cached,
        };

        writer::scope(|writer| {
            writer.stage_binary(paths::interfaces_file(root), &interfaces)?;
            writer.stage_binary(paths::objects_file(root), &objects)?;
            writer.stage_binary(paths::details_file(root), &details)?;
            Ok(())
        })?;

        Ok(Details {
            extras: Extras::Fresh(Box::new(Fresh {
                interfaces,
                objects,
            })),
            ..details
        })
    }

    fn init_env(&self) -> Result<Env, Problem> {
        Env::init(
            self.home.clone(),
            self.website.clone(),
            Arc::clone(&self.transport),
        )
    }
}

/// Dispatch on the outline variant: validate, solve, and decide which
/// packages count as direct for interface visibility.
fn solve_outline(
    env: &Env,
    raw: &RawOutline,
) -> Result<(Solution, BTreeSet<PkgName>, ValidOutline), Problem> {
    match raw {
        RawOutline::App(app) => {
            let solution = solver::verify_app(env, app)?;
            let direct: BTreeSet<PkgName> = app
                .deps
                .direct
                .keys()
                .chain(app.test_deps.direct.keys())
                .cloned()
                .collect();
            let valid = ValidOutline::App {
                source_dirs: app.source_dirs.clone(),
            };
            Ok((solution, direct, valid))
        }
        RawOutline::Pkg(pkg) => {
            let solution = solver::verify_pkg(env, pkg)?;
            let direct: BTreeSet<PkgName> = pkg
                .deps
                .keys()
                .chain(pkg.test_deps.keys())
                .cloned()
                .collect();
            let exact_deps: BTreeMap<PkgName, loam_domain::Version> = pkg
                .deps
                .keys()
                .filter_map(|dep| solution.get(dep).map(|solved| (dep.clone(), solved.version)))
                .collect();
            let valid = ValidOutline::Pkg {
                name: pkg.name.clone(),
                exposed: pkg.exposed.modules().into_iter().cloned().collect(),
                exact_deps,
            };
            Ok((solution, direct, valid))
        }
    }
}

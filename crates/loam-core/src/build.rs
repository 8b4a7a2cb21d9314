//! Per-package parallel build orchestration: probe the artifact cache by
//! fingerprint, fetch missing packages, crawl and compile modules, and
//! persist the results. Packages build concurrently; each waits only on its
//! own direct dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use loam_domain::{
    outline, ArtifactCache, Artifacts, BadDep, CanonicalName, Chunk, DependencyInterface,
    FetchProblem, Fingerprint, ForeignInterface, Interface, LocalGraph, ModuleName, NameCache,
    PkgName, Problem, RawOutline, Version,
};
use loam_resolver::{Connection, Env, Solution, SolverDetails};
use loam_store::{fetch_package, file, paths};
use serde_json::Value;
use tracing::debug;

use crate::cell::Cell;
use crate::compiler::{parse_kernel, Compiler, ParsedModule};

type DepCell = Cell<Option<Arc<Artifacts>>>;

/// Build (or reuse) the artifacts of every package in the solution. All
/// builds run to completion even when siblings fail; failures are surfaced
/// together as `BadDeps`.
pub(crate) fn verify_dependencies(
    env: &Env,
    compiler: &dyn Compiler,
    solution: &Solution,
) -> Result<BTreeMap<PkgName, Arc<Artifacts>>, Problem> {
    check_acyclic(solution)?;

    let cells: BTreeMap<PkgName, DepCell> = solution
        .keys()
        .map(|pkg| (pkg.clone(), Cell::new()))
        .collect();
    let errors: Mutex<Vec<BadDep>> = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for (pkg, details) in solution {
            let cells = &cells;
            let errors = &errors;
            scope.spawn(move || {
                match build_or_reuse(env, compiler, solution, pkg, details, cells) {
                    Ok(artifacts) => cells[pkg].put(Some(artifacts)),
                    Err(Some(bad)) => {
                        errors
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(bad);
                        cells[pkg].put(None);
                    }
                    // The root cause was already recorded by a dependency.
                    Err(None) => cells[pkg].put(None),
                }
            });
        }
    });

    let mut errors = errors.into_inner().unwrap_or_else(PoisonError::into_inner);
    if !errors.is_empty() {
        errors.sort_by(|a, b| a.pkg().cmp(b.pkg()));
        return Err(Problem::BadDeps {
            home: env.home.clone(),
            errors,
        });
    }

    Ok(cells
        .into_iter()
        .filter_map(|(pkg, cell)| cell.try_get().flatten().map(|artifacts| (pkg, artifacts)))
        .collect())
}

/// A registry can only describe an acyclic package graph; refuse anything
/// else before handing it to tasks that would deadlock on it.
fn check_acyclic(solution: &Solution) -> Result<(), Problem> {
    fn visit<'a>(
        pkg: &'a PkgName,
        solution: &'a Solution,
        state: &mut HashMap<&'a PkgName, bool>,
    ) -> bool {
        match state.get(pkg) {
            Some(true) => return false,
            Some(false) => return true,
            None => {}
        }
        state.insert(pkg, true);
        if let Some(details) = solution.get(pkg) {
            for dep in details.direct_deps.keys() {
                if !visit(dep, solution, state) {
                    return false;
                }
            }
        }
        state.insert(pkg, false);
        true
    }

    let mut state = HashMap::new();
    for pkg in solution.keys() {
        if !visit(pkg, solution, &mut state) {
            return Err(Problem::SolverProblem(format!(
                "the dependency graph has a cycle through {pkg}"
            )));
        }
    }
    Ok(())
}

enum Probe {
    Reuse(Artifacts),
    Build(BTreeSet<Fingerprint>),
}

fn build_or_reuse(
    env: &Env,
    compiler: &dyn Compiler,
    solution: &Solution,
    pkg: &PkgName,
    details: &SolverDetails,
    cells: &BTreeMap<PkgName, DepCell>,
) -> Result<Arc<Artifacts>, Option<BadDep>> {
    let version = details.version;
    let fingerprint: Fingerprint = details
        .direct_deps
        .keys()
        .filter_map(|dep| solution.get(dep).map(|solved| (dep.clone(), solved.version)))
        .collect();

    let old_fingerprints = match probe(env, pkg, details, &fingerprint)? {
        Probe::Reuse(artifacts) => {
            debug!(pkg = %pkg, version = %version, "reusing cached artifacts");
            return Ok(Arc::new(artifacts));
        }
        Probe::Build(old) => old,
    };

    build(
        env,
        compiler,
        pkg,
        details,
        fingerprint,
        old_fingerprints,
        cells,
    )
}

fn probe(
    env: &Env,
    pkg: &PkgName,
    details: &SolverDetails,
    fingerprint: &Fingerprint,
) -> Result<Probe, Option<BadDep>> {
    let version = details.version;
    if !paths::package_src(&env.home, pkg, version).exists() {
        match &env.connection {
            Connection::Online(transport) => {
                fetch_package(transport.as_ref(), &env.website, &env.home, pkg, version).map_err(
                    |problem| {
                        Some(BadDep::BadDownload {
                            pkg: pkg.clone(),
                            version,
                            problem,
                        })
                    },
                )?;
            }
            Connection::Offline => {
                return Err(Some(BadDep::BadDownload {
                    pkg: pkg.clone(),
                    version,
                    problem: FetchProblem::BadEndpointRequest(
                        "the package is not cached and the network is unreachable".to_string(),
                    ),
                }));
            }
        }
        return Ok(Probe::Build(BTreeSet::new()));
    }

    let artifacts_path = paths::package_artifacts(&env.home, pkg, version);
    let Ok(bytes) = std::fs::read(&artifacts_path) else {
        return Ok(Probe::Build(BTreeSet::new()));
    };
    match serde_json::from_slice::<ArtifactCache>(&bytes) {
        Ok(cache) if cache.fingerprints.contains(fingerprint) => Ok(Probe::Reuse(cache.artifacts)),
        Ok(cache) => Ok(Probe::Build(cache.fingerprints)),
        Err(_) => {
            file::remove_file_quiet(&artifacts_path);
            Ok(Probe::Build(BTreeSet::new()))
        }
    }
}

fn build(
    env: &Env,
    compiler: &dyn Compiler,
    pkg: &PkgName,
    details: &SolverDetails,
    fingerprint: Fingerprint,
    old_fingerprints: BTreeSet<Fingerprint>,
    cells: &BTreeMap<PkgName, DepCell>,
) -> Result<Arc<Artifacts>, Option<BadDep>> {
    let version = details.version;
    let bad_build = || {
        Some(BadDep::BadBuild {
            pkg: pkg.clone(),
            version,
            fingerprint: fingerprint.clone(),
        })
    };

    // Wait for the direct deps; a failed dep fails this build quietly.
    let mut dep_artifacts = BTreeMap::new();
    for dep in details.direct_deps.keys() {
        let Some(cell) = cells.get(dep) else {
            continue;
        };
        match cell.wait() {
            Some(artifacts) => {
                dep_artifacts.insert(dep.clone(), artifacts);
            }
            None => return Err(None),
        }
    }

    let manifest = paths::package_manifest(&env.home, pkg, version);
    let exposed = match outline::read(&manifest) {
        Ok(RawOutline::Pkg(pkg_outline)) => pkg_outline
            .exposed
            .modules()
            .into_iter()
            .cloned()
            .collect::<Vec<ModuleName>>(),
        Ok(RawOutline::App(_)) | Err(_) => return Err(bad_build()),
    };

    let foreigns = foreign_namespace(&dep_artifacts);
    let docs_path = paths::package_docs(&env.home, pkg, version);
    let want_docs = !docs_path.exists();

    let shared = CrawlShared {
        pkg,
        is_kernel_pkg: pkg.is_kernel(),
        src_dir: paths::package_src(&env.home, pkg, version),
        foreigns: &foreigns,
        compiler,
        names: NameCache::new(),
        claimed: Mutex::new(HashSet::new()),
        statuses: Mutex::new(HashMap::new()),
    };
    let mut statuses = crawl_modules(&shared, &exposed);
    break_cycles(&mut statuses);

    let exposed_set: BTreeSet<ModuleName> = exposed.iter().cloned().collect();
    let results = compile_modules(pkg, compiler, &statuses, &exposed_set, want_docs);

    let Some((artifacts, docs)) = gather_package(pkg, &exposed_set, results) else {
        return Err(bad_build());
    };

    let mut fingerprints = old_fingerprints;
    fingerprints.insert(fingerprint);
    persist(env, pkg, version, fingerprints, &artifacts, want_docs, docs);

    debug!(pkg = %pkg, version = %version, "built package");
    Ok(Arc::new(artifacts))
}

/// Resolve the foreign namespace of a package under construction: module
/// names its direct deps export publicly, with collisions marked ambiguous.
fn foreign_namespace(
    deps: &BTreeMap<PkgName, Arc<Artifacts>>,
) -> BTreeMap<ModuleName, ForeignInterface> {
    let mut namespace: BTreeMap<ModuleName, ForeignInterface> = BTreeMap::new();
    for artifacts in deps.values() {
        for (module, iface) in &artifacts.interfaces {
            if let Some(public) = iface.public() {
                namespace
                    .entry(module.clone())
                    .and_modify(|existing| *existing = ForeignInterface::Ambiguous)
                    .or_insert_with(|| ForeignInterface::Specific(public.clone()));
            }
        }
    }
    namespace
}

/// What the crawl learned about one module. `None` in the status map means
/// the module is broken: missing, unparseable, misnamed, or ambiguous.
enum Status {
    Local(ParsedModule),
    Foreign(Interface),
    KernelLocal {
        chunks: Vec<Chunk>,
        #[allow(dead_code)]
        imports: Vec<ModuleName>,
    },
    KernelForeign,
}

struct CrawlShared<'a> {
    pkg: &'a PkgName,
    is_kernel_pkg: bool,
    src_dir: PathBuf,
    foreigns: &'a BTreeMap<ModuleName, ForeignInterface>,
    compiler: &'a dyn Compiler,
    names: NameCache,
    claimed: Mutex<HashSet<ModuleName>>,
    statuses: Mutex<HashMap<ModuleName, Option<Status>>>,
}

fn crawl_modules(
    shared: &CrawlShared<'_>,
    roots: &[ModuleName],
) -> HashMap<ModuleName, Option<Status>> {
    thread::scope(|scope| {
        for root in roots {
            enqueue(scope, shared, root.clone());
        }
    });
    std::mem::take(
        &mut *shared
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner),
    )
}

fn enqueue<'scope>(
    scope: &'scope thread::Scope<'scope, '_>,
    shared: &'scope CrawlShared<'_>,
    name: ModuleName,
) {
    {
        let mut claimed = shared
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !claimed.insert(name.clone()) {
            return;
        }
    }
    scope.spawn(move || {
        let status = visit(scope, shared, &name);
        shared
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, status);
    });
}

fn visit<'scope>(
    scope: &'scope thread::Scope<'scope, '_>,
    shared: &'scope CrawlShared<'_>,
    name: &ModuleName,
) -> Option<Status> {
    if matches!(shared.foreigns.get(name), Some(ForeignInterface::Ambiguous)) {
        debug!(module = %name, "module is exported by several direct deps");
        return None;
    }

    let path = name.source_path(&shared.src_dir, "elm");
    if path.exists() {
        let source = file::read_utf8(&path).ok()?;
        let module = match shared.compiler.parse(shared.pkg, &shared.names, &source) {
            Ok(module) => module,
            Err(err) => {
                debug!(module = %name, error = %err, "module failed to parse");
                return None;
            }
        };
        if module.name != *name {
            debug!(module = %name, declared = %module.name, "module declares the wrong name");
            return None;
        }
        for import in &module.imports {
            enqueue(scope, shared, import.clone());
        }
        return Some(Status::Local(module));
    }

    if shared.is_kernel_pkg && name.is_kernel() {
        let js = name.source_path(&shared.src_dir, "js");
        return match file::read_utf8(&js) {
            Ok(source) => {
                let (chunks, imports) = parse_kernel(&shared.names, &source);
                for import in &imports {
                    enqueue(scope, shared, import.clone());
                }
                Some(Status::KernelLocal { chunks, imports })
            }
            Err(_) => Some(Status::KernelForeign),
        };
    }

    match shared.foreigns.get(name) {
        Some(ForeignInterface::Specific(iface)) => Some(Status::Foreign(iface.clone())),
        _ => {
            debug!(module = %name, "module has no source file and no dep exports it");
            None
        }
    }
}

/// Mark every module sitting on an import cycle as broken, before the
/// compile stage turns import edges into blocking waits.
fn break_cycles(statuses: &mut HashMap<ModuleName, Option<Status>>) {
    fn local_imports(status: &Option<Status>) -> &[ModuleName] {
        match status {
            Some(Status::Local(module)) => &module.imports,
            _ => &[],
        }
    }

    fn dfs<'a>(
        name: &'a ModuleName,
        statuses: &'a HashMap<ModuleName, Option<Status>>,
        state: &mut HashMap<&'a ModuleName, bool>,
        path: &mut Vec<&'a ModuleName>,
        broken: &mut HashSet<ModuleName>,
    ) {
        match state.get(name) {
            Some(true) => {
                if let Some(at) = path.iter().position(|entry| *entry == name) {
                    for member in &path[at..] {
                        broken.insert((*member).clone());
                    }
                }
                return;
            }
            Some(false) => return,
            None => {}
        }
        let Some(status) = statuses.get(name) else {
            return;
        };
        state.insert(name, true);
        path.push(name);
        for import in local_imports(status) {
            dfs(import, statuses, state, path, broken);
        }
        path.pop();
        state.insert(name, false);
    }

    let mut state = HashMap::new();
    let mut path = Vec::new();
    let mut broken = HashSet::new();
    for name in statuses.keys() {
        dfs(name, statuses, &mut state, &mut path, &mut broken);
    }
    for name in broken {
        debug!(module = %name, "module is part of an import cycle");
        statuses.insert(name, None);
    }
}

/// The post-compile state of one module.
#[derive(Clone)]
enum DResult {
    Local {
        interface: Interface,
        objects: LocalGraph,
        docs: Option<Value>,
    },
    Foreign(Interface),
    KernelLocal(Vec<Chunk>),
    KernelForeign,
}

/// Compile every crawled module; each compile waits only on the cells of
/// its own imports, so independent subtrees overlap freely.
fn compile_modules(
    pkg: &PkgName,
    compiler: &dyn Compiler,
    statuses: &HashMap<ModuleName, Option<Status>>,
    exposed: &BTreeSet<ModuleName>,
    want_docs: bool,
) -> HashMap<ModuleName, Option<DResult>> {
    let cells: HashMap<ModuleName, Cell<Option<DResult>>> = statuses
        .keys()
        .map(|name| (name.clone(), Cell::new()))
        .collect();

    thread::scope(|scope| {
        for (name, status) in statuses {
            let cells = &cells;
            scope.spawn(move || {
                let result = compile_one(pkg, compiler, name, status, cells, exposed, want_docs);
                cells[name].put(result);
            });
        }
    });

    cells
        .into_iter()
        .map(|(name, cell)| {
            let result = cell.try_get().flatten();
            (name, result)
        })
        .collect()
}

fn compile_one(
    pkg: &PkgName,
    compiler: &dyn Compiler,
    name: &ModuleName,
    status: &Option<Status>,
    cells: &HashMap<ModuleName, Cell<Option<DResult>>>,
    exposed: &BTreeSet<ModuleName>,
    want_docs: bool,
) -> Option<DResult> {
    match status {
        None => None,
        Some(Status::Foreign(iface)) => Some(DResult::Foreign(iface.clone())),
        Some(Status::KernelForeign) => Some(DResult::KernelForeign),
        Some(Status::KernelLocal { chunks, .. }) => Some(DResult::KernelLocal(chunks.clone())),
        Some(Status::Local(module)) => {
            let mut interfaces = BTreeMap::new();
            for import in &module.imports {
                match cells.get(import)?.wait()? {
                    DResult::Local { interface, .. } | DResult::Foreign(interface) => {
                        interfaces.insert(import.clone(), interface);
                    }
                    // Kernel modules contribute no typed interface.
                    DResult::KernelLocal(_) | DResult::KernelForeign => {}
                }
            }
            let docs_wanted = want_docs && exposed.contains(name);
            match compiler.compile(pkg, &interfaces, module, docs_wanted) {
                Ok(compiled) => Some(DResult::Local {
                    interface: compiled.interface,
                    objects: compiled.objects,
                    docs: compiled.docs,
                }),
                Err(err) => {
                    debug!(module = %name, error = %err, "module failed to compile");
                    None
                }
            }
        }
    }
}

/// Fold per-module results into the package's artifacts. Any broken module
/// fails the whole package.
fn gather_package(
    pkg: &PkgName,
    exposed: &BTreeSet<ModuleName>,
    results: HashMap<ModuleName, Option<DResult>>,
) -> Option<(Artifacts, BTreeMap<ModuleName, Value>)> {
    let mut artifacts = Artifacts::default();
    let mut docs = BTreeMap::new();
    for (name, result) in results {
        match result? {
            DResult::Local {
                interface,
                objects,
                docs: module_docs,
            } => {
                let iface = if exposed.contains(&name) {
                    DependencyInterface::Public(interface)
                } else {
                    DependencyInterface::Private(interface)
                };
                artifacts.objects.add_local(objects);
                if let Some(value) = module_docs {
                    docs.insert(name.clone(), value);
                }
                artifacts.interfaces.insert(name, iface);
            }
            DResult::KernelLocal(chunks) => {
                artifacts
                    .objects
                    .add_kernel(CanonicalName::new(pkg.clone(), name), chunks);
            }
            // Owned (and reported) by some other package.
            DResult::Foreign(_) | DResult::KernelForeign => {}
        }
    }
    Some((artifacts, docs))
}

/// Persist the accumulated artifact cache and, when they were requested,
/// the docs. Persistence failures do not fail the build; the artifacts are
/// already in memory and the cache can be rebuilt next run.
fn persist(
    env: &Env,
    pkg: &PkgName,
    version: Version,
    fingerprints: BTreeSet<Fingerprint>,
    artifacts: &Artifacts,
    want_docs: bool,
    docs: BTreeMap<ModuleName, Value>,
) {
    let cache = ArtifactCache {
        fingerprints,
        artifacts: artifacts.clone(),
    };
    match serde_json::to_vec(&cache) {
        Ok(bytes) => {
            let path = paths::package_artifacts(&env.home, pkg, version);
            if let Err(err) = file::write_atomic(&path, &bytes) {
                tracing::warn!(pkg = %pkg, %err, "could not persist artifacts");
            }
        }
        Err(err) => tracing::warn!(pkg = %pkg, %err, "could not encode artifacts"),
    }

    if want_docs {
        match serde_json::to_vec(&docs) {
            Ok(bytes) => {
                let path = paths::package_docs(&env.home, pkg, version);
                if let Err(err) = file::write_atomic(&path, &bytes) {
                    tracing::warn!(pkg = %pkg, %err, "could not persist docs");
                }
            }
            Err(err) => tracing::warn!(pkg = %pkg, %err, "could not encode docs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> ModuleName {
        text.parse().unwrap()
    }

    fn parsed(text: &str, imports: &[&str]) -> Option<Status> {
        Some(Status::Local(ParsedModule {
            name: name(text),
            imports: imports.iter().map(|i| name(i)).collect(),
            has_main: false,
            text: String::new(),
        }))
    }

    #[test]
    fn cycles_break_every_member_but_spare_the_rest() {
        let mut statuses = HashMap::from([
            (name("A"), parsed("A", &["B"])),
            (name("B"), parsed("B", &["C"])),
            (name("C"), parsed("C", &["A"])),
            (name("D"), parsed("D", &["E"])),
            (name("E"), parsed("E", &[])),
        ]);
        break_cycles(&mut statuses);
        assert!(statuses[&name("A")].is_none());
        assert!(statuses[&name("B")].is_none());
        assert!(statuses[&name("C")].is_none());
        assert!(statuses[&name("D")].is_some());
        assert!(statuses[&name("E")].is_some());
    }

    #[test]
    fn self_imports_are_cycles() {
        let mut statuses = HashMap::from([(name("A"), parsed("A", &["A"]))]);
        break_cycles(&mut statuses);
        assert!(statuses[&name("A")].is_none());
    }

    #[test]
    fn foreign_namespace_marks_collisions_ambiguous() {
        let iface = Interface::default();
        let one = Arc::new(Artifacts {
            interfaces: BTreeMap::from([
                (name("Url"), DependencyInterface::Public(iface.clone())),
                (name("Only.One"), DependencyInterface::Public(iface.clone())),
                (name("Hidden"), DependencyInterface::Private(iface.clone())),
            ]),
            objects: Default::default(),
        });
        let two = Arc::new(Artifacts {
            interfaces: BTreeMap::from([(
                name("Url"),
                DependencyInterface::Public(iface.clone()),
            )]),
            objects: Default::default(),
        });
        let deps = BTreeMap::from([
            (PkgName::new("alice", "one"), one),
            (PkgName::new("bob", "two"), two),
        ]);

        let namespace = foreign_namespace(&deps);
        assert!(matches!(
            namespace.get(&name("Url")),
            Some(ForeignInterface::Ambiguous)
        ));
        assert!(matches!(
            namespace.get(&name("Only.One")),
            Some(ForeignInterface::Specific(_))
        ));
        assert!(namespace.get(&name("Hidden")).is_none());
    }

    #[test]
    fn package_cycles_are_rejected_up_front() {
        let a = PkgName::new("alice", "a");
        let b = PkgName::new("alice", "b");
        let solution: Solution = BTreeMap::from([
            (
                a.clone(),
                SolverDetails {
                    version: Version::ONE,
                    direct_deps: BTreeMap::from([(
                        b.clone(),
                        loam_domain::Constraint::exactly(Version::ONE),
                    )]),
                },
            ),
            (
                b,
                SolverDetails {
                    version: Version::ONE,
                    direct_deps: BTreeMap::from([(
                        a,
                        loam_domain::Constraint::exactly(Version::ONE),
                    )]),
                },
            ),
        ]);
        assert!(matches!(
            check_acyclic(&solution),
            Err(Problem::SolverProblem(_))
        ));
    }
}

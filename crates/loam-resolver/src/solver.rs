use std::collections::BTreeMap;

use loam_domain::{outline, AppOutline, Constraint, PkgName, PkgOutline, Problem, RawOutline, Version};
use loam_store::paths;
use tracing::debug;

use crate::env::{Connection, Env};

/// What the solver decided for one package: the exact version to use and
/// that version's own declared dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolverDetails {
    pub version: Version,
    pub direct_deps: BTreeMap<PkgName, Constraint>,
}

pub type Solution = BTreeMap<PkgName, SolverDetails>;

/// Find an exact version assignment satisfying `constraints`, trying newer
/// versions first and backtracking on conflict.
pub fn solve(
    env: &Env,
    constraints: &BTreeMap<PkgName, Constraint>,
) -> Result<Solution, Problem> {
    let search = Search { env };
    let pending: Vec<(PkgName, Constraint)> = constraints
        .iter()
        .map(|(pkg, constraint)| (pkg.clone(), *constraint))
        .collect();
    match search.explore(pending, Solution::new())? {
        Some(solution) => {
            debug!(packages = solution.len(), "solved dependency constraints");
            Ok(solution)
        }
        // Offline, the registry view is exactly what is unpacked; a failed
        // search might have succeeded with a download.
        None if env.is_offline() => Err(Problem::NoOfflineSolution),
        None => Err(Problem::NoSolution),
    }
}

struct Search<'a> {
    env: &'a Env,
}

impl Search<'_> {
    fn explore(
        &self,
        mut pending: Vec<(PkgName, Constraint)>,
        solved: Solution,
    ) -> Result<Option<Solution>, Problem> {
        let Some((pkg, constraint)) = pending.pop() else {
            return Ok(Some(solved));
        };

        if let Some(details) = solved.get(&pkg) {
            if constraint.satisfies(details.version) {
                return self.explore(pending, solved);
            }
            return Ok(None);
        }

        let Some(known) = self.env.registry.known_versions(&pkg) else {
            return Ok(None);
        };
        let candidates: Vec<Version> = known
            .descending()
            .filter(|version| constraint.satisfies(*version))
            .collect();

        for version in candidates {
            if self.env.is_offline() && !self.is_cached(&pkg, version) {
                continue;
            }
            let direct_deps = self.constraints_of(&pkg, version)?;
            let mut next_pending = pending.clone();
            next_pending.extend(
                direct_deps
                    .iter()
                    .map(|(dep, dep_constraint)| (dep.clone(), *dep_constraint)),
            );
            let mut next_solved = solved.clone();
            next_solved.insert(
                pkg.clone(),
                SolverDetails {
                    version,
                    direct_deps,
                },
            );
            if let Some(solution) = self.explore(next_pending, next_solved)? {
                return Ok(Some(solution));
            }
        }
        Ok(None)
    }

    fn is_cached(&self, pkg: &PkgName, version: Version) -> bool {
        paths::package_manifest(&self.env.home, pkg, version).exists()
    }

    /// A candidate's own constraints, read from the unpacked cache when
    /// possible and fetched from the registry only as a fallback.
    fn constraints_of(
        &self,
        pkg: &PkgName,
        version: Version,
    ) -> Result<BTreeMap<PkgName, Constraint>, Problem> {
        let manifest = paths::package_manifest(&self.env.home, pkg, version);
        let bytes = if manifest.exists() {
            std::fs::read(&manifest).map_err(|err| {
                Problem::SolverProblem(format!("cannot read {}: {err}", manifest.display()))
            })?
        } else {
            match &self.env.connection {
                Connection::Online(transport) => {
                    let url = format!("{}/packages/{pkg}/{version}/elm.json", self.env.website);
                    transport
                        .get(&url)
                        .map_err(|err| Problem::SolverProblem(err.to_string()))?
                }
                Connection::Offline => {
                    return Err(Problem::SolverProblem(format!(
                        "{pkg} {version} is not in the local cache"
                    )));
                }
            }
        };
        match outline::parse(&bytes) {
            Ok(RawOutline::Pkg(pkg_outline)) => Ok(pkg_outline.deps),
            Ok(RawOutline::App(_)) => Err(Problem::SolverProblem(format!(
                "{pkg} {version} has an application manifest"
            ))),
            Err(problem) => Err(Problem::SolverProblem(problem.to_string())),
        }
    }
}

/// Validate an application outline and solve its exact dependency set.
///
/// `direct` and `test direct` may only overlap with identical versions; the
/// stated package set (all four blocks) must exactly match the solution.
pub fn verify_app(env: &Env, app: &AppOutline) -> Result<Solution, Problem> {
    app.validate()?;

    let direct = &app.deps.direct;
    let indirect = &app.deps.indirect;
    let test_direct = &app.test_deps.direct;
    let test_indirect = &app.test_deps.indirect;

    no_shared_keys(indirect, test_direct)?;
    no_shared_keys(direct, test_indirect)?;
    let stated = union_allow_equal_dups(&[direct, indirect, test_direct, test_indirect])?;
    let roots = union_allow_equal_dups(&[direct, test_direct])?;

    let constraints = roots
        .into_iter()
        .map(|(pkg, version)| (pkg, Constraint::exactly(version)))
        .collect();
    let solution = solve(env, &constraints)?;
    if solution.len() != stated.len() {
        return Err(Problem::HandEditedDependencies);
    }
    Ok(solution)
}

/// Validate a package outline and solve its constraint ranges.
pub fn verify_pkg(env: &Env, pkg: &PkgOutline) -> Result<Solution, Problem> {
    pkg.validate()?;
    let constraints = union_no_dups(&pkg.deps, &pkg.test_deps)?;
    solve(env, &constraints)
}

fn no_shared_keys(
    left: &BTreeMap<PkgName, Version>,
    right: &BTreeMap<PkgName, Version>,
) -> Result<(), Problem> {
    if left.keys().any(|pkg| right.contains_key(pkg)) {
        return Err(Problem::HandEditedDependencies);
    }
    Ok(())
}

fn union_allow_equal_dups(
    maps: &[&BTreeMap<PkgName, Version>],
) -> Result<BTreeMap<PkgName, Version>, Problem> {
    let mut union = BTreeMap::new();
    for map in maps {
        for (pkg, version) in *map {
            if let Some(previous) = union.insert(pkg.clone(), *version) {
                if previous != *version {
                    return Err(Problem::HandEditedDependencies);
                }
            }
        }
    }
    Ok(union)
}

fn union_no_dups(
    deps: &BTreeMap<PkgName, Constraint>,
    test_deps: &BTreeMap<PkgName, Constraint>,
) -> Result<BTreeMap<PkgName, Constraint>, Problem> {
    let mut union = deps.clone();
    for (pkg, constraint) in test_deps {
        if union.insert(pkg.clone(), *constraint).is_some() {
            return Err(Problem::BadOutline(format!(
                "`{pkg}` appears in both dependencies and test-dependencies"
            )));
        }
    }
    Ok(union)
}

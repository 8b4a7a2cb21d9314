use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::interface::DependencyInterface;
use crate::name::{CanonicalName, ModuleName, PkgName};
use crate::objects::GlobalGraph;
use crate::outline::ValidOutline;
use crate::version::Version;

/// A filesystem modification timestamp. Timestamps are only ever compared
/// for equality; granularity differences across filesystems must never order
/// two builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Time(u64);

impl Time {
    pub fn from_system(time: SystemTime) -> Time {
        let nanos = time
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Time(nanos)
    }
}

/// The exact version picked for every direct dependency of a package during
/// one solve. Artifacts are reusable only under a fingerprint they were
/// built with.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub BTreeMap<PkgName, Version>);

impl FromIterator<(PkgName, Version)> for Fingerprint {
    fn from_iter<I: IntoIterator<Item = (PkgName, Version)>>(iter: I) -> Fingerprint {
        Fingerprint(iter.into_iter().collect())
    }
}

/// The full build product of one dependency package.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub interfaces: BTreeMap<ModuleName, DependencyInterface>,
    pub objects: GlobalGraph,
}

/// What `artifacts.json` holds for one unpacked package version. A package
/// may be buildable under several fingerprints; successful ones accumulate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactCache {
    pub fingerprints: BTreeSet<Fingerprint>,
    pub artifacts: Artifacts,
}

/// Persisted metadata for one in-project source module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Local {
    pub path: PathBuf,
    pub time: Time,
    pub deps: Vec<ModuleName>,
    pub has_main: bool,
    pub last_change: u64,
    pub last_compile: u64,
}

impl Local {
    /// A module is stale when its file changed, or when any transitive
    /// import changed after this module last compiled.
    pub fn needs_recompile<I>(&self, current: Time, import_changes: I) -> bool
    where
        I: IntoIterator<Item = u64>,
    {
        self.time != current
            || import_changes
                .into_iter()
                .any(|change| change > self.last_compile)
    }
}

/// The dependency packages exporting one importable module name. The name is
/// ambiguous exactly when `rest` is non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Foreign {
    pub primary: PkgName,
    pub rest: Vec<PkgName>,
}

impl Foreign {
    pub fn is_ambiguous(&self) -> bool {
        !self.rest.is_empty()
    }

    pub fn exporters(&self) -> impl Iterator<Item = &PkgName> {
        std::iter::once(&self.primary).chain(self.rest.iter())
    }
}

/// Every dependency interface visible to the project, keyed canonically.
pub type Interfaces = BTreeMap<CanonicalName, DependencyInterface>;

/// Artifacts carried in memory right after a rebuild, so the caller does not
/// immediately re-read what was just written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fresh {
    pub interfaces: Interfaces,
    pub objects: GlobalGraph,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Extras {
    /// Artifacts must be re-read from disk on demand.
    #[default]
    Cached,
    Fresh(Box<Fresh>),
}

/// The top-level persisted record for a project root. `extras` never hits
/// disk; a freshly decoded record always starts out `Cached`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Details {
    pub old_time: Time,
    pub outline: ValidOutline,
    pub build_id: u64,
    pub locals: BTreeMap<ModuleName, Local>,
    pub foreigns: BTreeMap<ModuleName, Foreign>,
    #[serde(skip)]
    pub extras: Extras,
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use loam_domain::{Artifacts, CanonicalName, Foreign, Interfaces, ModuleName, PkgName};

/// Merge per-dependency artifacts into the project-level view: direct deps
/// keep their visibility, indirect deps are privatized so project modules
/// cannot import from them, and the foreigns map records which direct deps
/// export each importable module name.
pub(crate) fn interfaces_and_foreigns(
    direct: &BTreeSet<PkgName>,
    artifacts: &BTreeMap<PkgName, Arc<Artifacts>>,
) -> (Interfaces, BTreeMap<ModuleName, Foreign>) {
    let mut interfaces = Interfaces::new();
    let mut foreigns: BTreeMap<ModuleName, Foreign> = BTreeMap::new();

    for (pkg, package_artifacts) in artifacts {
        let is_direct = direct.contains(pkg);
        for (module, iface) in &package_artifacts.interfaces {
            let canonical = CanonicalName::new(pkg.clone(), module.clone());
            let entry = if is_direct {
                iface.clone()
            } else {
                iface.clone().privatized()
            };
            interfaces.insert(canonical, entry);

            if is_direct && iface.public().is_some() {
                foreigns
                    .entry(module.clone())
                    .and_modify(|foreign| foreign.rest.push(pkg.clone()))
                    .or_insert_with(|| Foreign {
                        primary: pkg.clone(),
                        rest: Vec::new(),
                    });
            }
        }
    }

    (interfaces, foreigns)
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Problem;
use crate::name::{ModuleName, PkgName};
use crate::version::{Constraint, Version, COMPILER_VERSION};

pub const SUMMARY_MAX_LEN: usize = 80;

/// A project manifest as written by the user, before validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RawOutline {
    #[serde(rename = "application")]
    App(AppOutline),
    #[serde(rename = "package")]
    Pkg(PkgOutline),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppOutline {
    #[serde(rename = "elm-version")]
    pub elm_version: Version,
    #[serde(rename = "source-directories")]
    pub source_dirs: Vec<PathBuf>,
    #[serde(rename = "dependencies")]
    pub deps: DepBlock,
    #[serde(rename = "test-dependencies", default)]
    pub test_deps: DepBlock,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepBlock {
    #[serde(default)]
    pub direct: BTreeMap<PkgName, Version>,
    #[serde(default)]
    pub indirect: BTreeMap<PkgName, Version>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkgOutline {
    pub name: PkgName,
    pub summary: String,
    pub license: String,
    pub version: Version,
    #[serde(rename = "exposed-modules")]
    pub exposed: Exposed,
    #[serde(rename = "elm-version")]
    pub elm_version: Constraint,
    #[serde(rename = "dependencies", default)]
    pub deps: BTreeMap<PkgName, Constraint>,
    #[serde(rename = "test-dependencies", default)]
    pub test_deps: BTreeMap<PkgName, Constraint>,
}

/// Exposed modules may be a flat list or labeled groups; the groups only
/// matter to documentation rendering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Exposed {
    Plain(Vec<ModuleName>),
    Grouped(BTreeMap<String, Vec<ModuleName>>),
}

impl Exposed {
    pub fn modules(&self) -> Vec<&ModuleName> {
        match self {
            Exposed::Plain(names) => names.iter().collect(),
            Exposed::Grouped(groups) => groups.values().flatten().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules().is_empty()
    }
}

/// The validated shape of an outline, with everything later stages need.
/// This is what `Details` persists. `exact_deps` on the package variant is
/// retained for documentation tooling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidOutline {
    App {
        source_dirs: Vec<PathBuf>,
    },
    Pkg {
        name: PkgName,
        exposed: Vec<ModuleName>,
        exact_deps: BTreeMap<PkgName, Version>,
    },
}

pub fn parse(bytes: &[u8]) -> Result<RawOutline, Problem> {
    serde_json::from_slice(bytes).map_err(|err| Problem::BadOutline(err.to_string()))
}

pub fn read(path: &Path) -> Result<RawOutline, Problem> {
    let bytes = fs::read(path)
        .map_err(|err| Problem::BadOutline(format!("cannot read {}: {err}", path.display())))?;
    parse(&bytes)
}

impl AppOutline {
    pub fn validate(&self) -> Result<(), Problem> {
        if self.elm_version != COMPILER_VERSION {
            return Err(Problem::BadElmInAppOutline(self.elm_version));
        }
        if self.source_dirs.is_empty() {
            return Err(Problem::BadOutline(
                "an application needs at least one source directory".to_string(),
            ));
        }
        Ok(())
    }
}

impl PkgOutline {
    pub fn validate(&self) -> Result<(), Problem> {
        if !self.elm_version.satisfies(COMPILER_VERSION) {
            return Err(Problem::BadElmInPkg(self.elm_version));
        }
        if self.summary.len() > SUMMARY_MAX_LEN {
            return Err(Problem::BadOutline(format!(
                "the summary must be at most {SUMMARY_MAX_LEN} characters"
            )));
        }
        if self.exposed.is_empty() {
            return Err(Problem::BadOutline(
                "a package must expose at least one module".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_JSON: &str = r#"
    {
        "type": "application",
        "source-directories": ["src"],
        "elm-version": "0.19.1",
        "dependencies": {
            "direct": { "elm/core": "1.0.5" },
            "indirect": { "elm/json": "1.1.3" }
        },
        "test-dependencies": {
            "direct": {},
            "indirect": {}
        }
    }
    "#;

    const PKG_JSON: &str = r#"
    {
        "type": "package",
        "name": "alice/widgets",
        "summary": "Widgets for everyone",
        "license": "BSD-3-Clause",
        "version": "2.1.0",
        "exposed-modules": ["Widget", "Widget.Fancy"],
        "elm-version": "0.19.0 <= v < 0.20.0",
        "dependencies": {
            "elm/core": "1.0.0 <= v < 2.0.0"
        },
        "test-dependencies": {}
    }
    "#;

    #[test]
    fn app_outlines_parse() {
        let RawOutline::App(app) = parse(APP_JSON.as_bytes()).unwrap() else {
            panic!("expected an application outline");
        };
        assert_eq!(app.elm_version, COMPILER_VERSION);
        assert_eq!(app.source_dirs, vec![PathBuf::from("src")]);
        assert_eq!(app.deps.direct.len(), 1);
        assert_eq!(app.deps.indirect.len(), 1);
        app.validate().unwrap();
    }

    #[test]
    fn pkg_outlines_parse() {
        let RawOutline::Pkg(pkg) = parse(PKG_JSON.as_bytes()).unwrap() else {
            panic!("expected a package outline");
        };
        assert_eq!(pkg.name, PkgName::new("alice", "widgets"));
        assert_eq!(pkg.exposed.modules().len(), 2);
        pkg.validate().unwrap();
    }

    #[test]
    fn grouped_exposed_modules_parse() {
        let exposed: Exposed = serde_json::from_str(
            r#"{ "Primitives": ["Widget"], "Extras": ["Widget.Fancy", "Widget.Plain"] }"#,
        )
        .unwrap();
        assert_eq!(exposed.modules().len(), 3);
    }

    #[test]
    fn malformed_outlines_are_bad_outlines() {
        assert!(matches!(parse(b"{"), Err(Problem::BadOutline(_))));
        assert!(matches!(
            parse(br#"{ "type": "library" }"#),
            Err(Problem::BadOutline(_))
        ));
        let missing_dirs = APP_JSON.replace(r#"["src"]"#, "[]");
        let RawOutline::App(app) = parse(missing_dirs.as_bytes()).unwrap() else {
            panic!("expected an application outline");
        };
        assert!(matches!(app.validate(), Err(Problem::BadOutline(_))));
    }

    #[test]
    fn foreign_compiler_versions_are_rejected() {
        let other = APP_JSON.replace("0.19.1", "0.19.0");
        let RawOutline::App(app) = parse(other.as_bytes()).unwrap() else {
            panic!("expected an application outline");
        };
        assert_eq!(
            app.validate(),
            Err(Problem::BadElmInAppOutline(Version::new(0, 19, 0)))
        );

        let stale = PKG_JSON.replace("0.19.0 <= v < 0.20.0", "0.18.0 <= v < 0.19.0");
        let RawOutline::Pkg(pkg) = parse(stale.as_bytes()).unwrap() else {
            panic!("expected a package outline");
        };
        assert!(matches!(pkg.validate(), Err(Problem::BadElmInPkg(_))));
    }

    #[test]
    fn outlines_round_trip_through_json() {
        let outline = parse(PKG_JSON.as_bytes()).unwrap();
        let encoded = serde_json::to_vec(&outline).unwrap();
        assert_eq!(parse(&encoded).unwrap(), outline);
    }
}

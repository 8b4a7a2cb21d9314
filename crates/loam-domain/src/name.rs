use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Error, Result};

use crate::impl_text_serde;

/// A registry package name, `author/project`. Ordering is case-sensitive on
/// both halves.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PkgName {
    pub author: String,
    pub project: String,
}

impl PkgName {
    pub fn new(author: impl Into<String>, project: impl Into<String>) -> PkgName {
        PkgName {
            author: author.into(),
            project: project.into(),
        }
    }

    /// Kernel packages are the only ones allowed to ship host-language
    /// modules alongside their sources.
    pub fn is_kernel(&self) -> bool {
        self.author == "elm" || self.author == "elm-explorations"
    }
}

impl fmt::Display for PkgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.author, self.project)
    }
}

impl FromStr for PkgName {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let Some((author, project)) = text.split_once('/') else {
            bail!("package name `{text}` must look like `author/project`");
        };
        let half_ok = |half: &str| {
            !half.is_empty()
                && half
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };
        if !half_ok(author) || !half_ok(project) || project.contains('_') {
            bail!("package name `{text}` contains invalid characters");
        }
        Ok(PkgName::new(author, project))
    }
}

impl_text_serde!(PkgName);

/// A dotted module name as written in source, e.g. `Json.Decode`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleName(Arc<str>);

impl ModuleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_kernel(&self) -> bool {
        self.0.starts_with("Elm.Kernel.")
    }

    /// The on-disk location of this module under `src_dir`, e.g.
    /// `Json.Decode` with extension `elm` becomes `src_dir/Json/Decode.elm`.
    pub fn source_path(&self, src_dir: &Path, extension: &str) -> PathBuf {
        let mut path = src_dir.to_path_buf();
        for segment in self.0.split('.') {
            path.push(segment);
        }
        path.set_extension(extension);
        path
    }

    fn validate(text: &str) -> Result<()> {
        if text.is_empty() {
            bail!("module names cannot be empty");
        }
        for segment in text.split('.') {
            let mut chars = segment.chars();
            let leading_ok = chars.next().is_some_and(|c| c.is_ascii_uppercase());
            if !leading_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                bail!("module name `{text}` has an invalid segment `{segment}`");
            }
        }
        Ok(())
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ModuleName {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        ModuleName::validate(text)?;
        Ok(ModuleName(Arc::from(text)))
    }
}

impl_text_serde!(ModuleName);

/// A module name qualified by the package that owns it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalName {
    pub pkg: PkgName,
    pub module: ModuleName,
}

impl CanonicalName {
    pub fn new(pkg: PkgName, module: ModuleName) -> CanonicalName {
        CanonicalName { pkg, module }
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pkg, self.module)
    }
}

impl FromStr for CanonicalName {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let (pkg, module) = text
            .split_once(':')
            .ok_or_else(|| anyhow!("canonical name `{text}` must look like `author/project:Module`"))?;
        Ok(CanonicalName {
            pkg: pkg.parse()?,
            module: module.parse()?,
        })
    }
}

impl_text_serde!(CanonicalName);

/// One top-level value in a module's object graph.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalName {
    pub home: CanonicalName,
    pub name: String,
}

impl GlobalName {
    pub fn new(home: CanonicalName, name: impl Into<String>) -> GlobalName {
        GlobalName {
            home,
            name: name.into(),
        }
    }
}

impl fmt::Display for GlobalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.home, self.name)
    }
}

impl FromStr for GlobalName {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let (home, name) = text
            .rsplit_once('#')
            .ok_or_else(|| anyhow!("global name `{text}` must look like `pkg:Module#value`"))?;
        Ok(GlobalName {
            home: home.parse()?,
            name: name.to_string(),
        })
    }
}

impl_text_serde!(GlobalName);

/// Module names recur across every import list in a build; interning keeps
/// one allocation per distinct name for the lifetime of a verify run.
#[derive(Debug, Default)]
pub struct NameCache {
    seen: Mutex<HashSet<Arc<str>>>,
}

impl NameCache {
    pub fn new() -> NameCache {
        NameCache::default()
    }

    pub fn module(&self, text: &str) -> Result<ModuleName> {
        ModuleName::validate(text)?;
        let mut seen = self.seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = seen.get(text) {
            return Ok(ModuleName(Arc::clone(existing)));
        }
        let name: Arc<str> = Arc::from(text);
        seen.insert(Arc::clone(&name));
        Ok(ModuleName(name))
    }
}

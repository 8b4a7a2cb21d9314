//! Shared fixture for the engine scenario tests: an in-memory registry
//! transport and a toy module compiler.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use loam_core::{Compiled, Compiler, Engine, ParsedModule};
use loam_domain::{
    CanonicalName, GlobalName, Interface, LocalGraph, ModuleName, NameCache, Node, PkgName,
};
use loam_store::{Archive, ArchiveProblem, Transport};
use tempfile::TempDir;

pub const WEBSITE: &str = "https://registry.invalid";

/// Serves registry JSON, endpoints, and prebuilt archive trees from memory.
#[derive(Default)]
pub struct FakeTransport {
    bodies: Mutex<BTreeMap<String, Vec<u8>>>,
    archives: Mutex<BTreeMap<String, (String, Vec<(String, String)>)>>,
}

impl FakeTransport {
    pub fn new() -> FakeTransport {
        FakeTransport::default()
    }

    pub fn serve_registry(&self, json: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert(format!("{WEBSITE}/all-packages"), json.as_bytes().to_vec());
    }

    /// Publish a package: its endpoint, its archive tree, and its solver
    /// manifest endpoint.
    pub fn serve_package(&self, pkg: &str, version: &str, files: &[(&str, &str)]) {
        let hash = format!("sha-{}-{version}", pkg.replace('/', "-"));
        let archive_url = format!("https://archives.invalid/{pkg}/{version}.tar.gz");
        let endpoint = format!(r#"{{ "url": "{archive_url}", "hash": "{hash}" }}"#);
        let mut bodies = self.bodies.lock().unwrap();
        bodies.insert(
            format!("{WEBSITE}/packages/{pkg}/{version}/endpoint.json"),
            endpoint.into_bytes(),
        );
        if let Some((_, manifest)) = files.iter().find(|(path, _)| path == &"elm.json") {
            bodies.insert(
                format!("{WEBSITE}/packages/{pkg}/{version}/elm.json"),
                manifest.as_bytes().to_vec(),
            );
        }
        drop(bodies);
        self.archives.lock().unwrap().insert(
            archive_url,
            (
                hash,
                files
                    .iter()
                    .map(|(path, text)| ((*path).to_string(), (*text).to_string()))
                    .collect(),
            ),
        );
    }
}

impl Transport for FakeTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("404 for {url}"))
    }

    fn get_archive(&self, url: &str) -> Result<Archive, ArchiveProblem> {
        let archives = self.archives.lock().unwrap();
        let (hash, files) = archives
            .get(url)
            .ok_or_else(|| ArchiveProblem::Request(format!("404 for {url}")))?;
        let dir = TempDir::new().map_err(|err| ArchiveProblem::Content(err.to_string()))?;
        for (path, text) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap())
                .map_err(|err| ArchiveProblem::Content(err.to_string()))?;
            fs::write(&full, text).map_err(|err| ArchiveProblem::Content(err.to_string()))?;
        }
        Ok(Archive::new(hash.clone(), dir))
    }
}

/// A tiny compiler: `module Foo.Bar exposing (..)`, `import X.Y` lines, and
/// `name = …` definitions. Counts compiles so tests can assert reuse.
#[derive(Default)]
pub struct ToyCompiler {
    pub compiles: AtomicUsize,
}

impl ToyCompiler {
    pub fn new() -> ToyCompiler {
        ToyCompiler::default()
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl Compiler for ToyCompiler {
    fn parse(
        &self,
        _pkg: &PkgName,
        names: &NameCache,
        source: &str,
    ) -> Result<ParsedModule, String> {
        let mut name = None;
        let mut imports = Vec::new();
        let mut has_main = false;
        for line in source.lines() {
            if let Some(rest) = line.strip_prefix("module ") {
                let declared = rest.split_whitespace().next().unwrap_or("");
                name = Some(names.module(declared).map_err(|err| err.to_string())?);
            } else if let Some(rest) = line.strip_prefix("import ") {
                let target = rest.split_whitespace().next().unwrap_or("");
                imports.push(names.module(target).map_err(|err| err.to_string())?);
            } else if line.starts_with("main ") {
                has_main = true;
            }
        }
        let name = name.ok_or_else(|| "missing module declaration".to_string())?;
        Ok(ParsedModule {
            name,
            imports,
            has_main,
            text: source.to_string(),
        })
    }

    fn compile(
        &self,
        pkg: &PkgName,
        _interfaces: &BTreeMap<ModuleName, Interface>,
        module: &ParsedModule,
        want_docs: bool,
    ) -> Result<Compiled, String> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if module.text.contains("COMPILE_ERROR") {
            return Err(format!("cannot compile {}", module.name));
        }

        let home = CanonicalName::new(pkg.clone(), module.name.clone());
        let mut interface = Interface::default();
        let mut objects = LocalGraph::default();
        for line in module.text.lines() {
            let mut words = line.split_whitespace();
            let (Some(ident), Some("=")) = (words.next(), words.next()) else {
                continue;
            };
            if !ident.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
                continue;
            }
            interface
                .values
                .insert(ident.to_string(), "a".to_string());
            objects.nodes.insert(
                GlobalName::new(home.clone(), ident),
                Node {
                    code: line.to_string(),
                    deps: Default::default(),
                },
            );
        }

        let docs = want_docs.then(|| serde_json::json!({ "module": module.name.to_string() }));
        Ok(Compiled {
            interface,
            objects,
            docs,
        })
    }
}

/// One test's world: an isolated home, an isolated project root, and the
/// fakes wired into an engine.
pub struct World {
    pub home: TempDir,
    pub root: TempDir,
    pub transport: Arc<FakeTransport>,
    pub compiler: ToyCompiler,
}

impl World {
    pub fn new() -> World {
        World {
            home: TempDir::new().unwrap(),
            root: TempDir::new().unwrap(),
            transport: Arc::new(FakeTransport::new()),
            compiler: ToyCompiler::new(),
        }
    }

    pub fn engine(&self) -> Engine {
        Engine::with(
            self.home.path().to_path_buf(),
            WEBSITE.to_string(),
            self.transport.clone(),
        )
    }

    pub fn write_root_manifest(&self, json: &str) {
        fs::write(self.root.path().join("elm.json"), json).unwrap();
    }

    /// Unpack a package straight into the cache, as if a previous run had
    /// fetched it.
    pub fn unpack_into_cache(&self, pkg: &str, version: &str, files: &[(&str, &str)]) {
        let pkg: PkgName = pkg.parse().unwrap();
        let dir = loam_store::paths::package_dir(self.home.path(), &pkg, version.parse().unwrap());
        for (path, text) in files {
            let full = dir.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, text).unwrap();
        }
    }
}

pub fn app_manifest(direct: &[(&str, &str)], indirect: &[(&str, &str)]) -> String {
    let block = |entries: &[(&str, &str)]| -> String {
        let parts: Vec<String> = entries
            .iter()
            .map(|(pkg, version)| format!(r#""{pkg}": "{version}""#))
            .collect();
        parts.join(", ")
    };
    format!(
        r#"{{
            "type": "application",
            "source-directories": ["src"],
            "elm-version": "0.19.1",
            "dependencies": {{
                "direct": {{ {} }},
                "indirect": {{ {} }}
            }},
            "test-dependencies": {{ "direct": {{}}, "indirect": {{}} }}
        }}"#,
        block(direct),
        block(indirect)
    )
}

pub fn pkg_manifest(name: &str, version: &str, exposed: &[&str], deps: &[(&str, &str)]) -> String {
    let exposed: Vec<String> = exposed.iter().map(|m| format!(r#""{m}""#)).collect();
    let deps: Vec<String> = deps
        .iter()
        .map(|(pkg, range)| format!(r#""{pkg}": "{range}""#))
        .collect();
    format!(
        r#"{{
            "type": "package",
            "name": "{name}",
            "summary": "test fixture",
            "license": "BSD-3-Clause",
            "version": "{version}",
            "exposed-modules": [{}],
            "elm-version": "0.19.0 <= v < 0.20.0",
            "dependencies": {{ {} }},
            "test-dependencies": {{}}
        }}"#,
        exposed.join(", "),
        deps.join(", ")
    )
}

/// Keep the path utilities visible to every scenario file.
pub fn cache_path(world: &World, pkg: &str, version: &str, leaf: &str) -> std::path::PathBuf {
    let pkg: PkgName = pkg.parse().unwrap();
    loam_store::paths::package_dir(world.home.path(), &pkg, version.parse().unwrap()).join(leaf)
}

pub fn stuff_file(world: &World, leaf: &str) -> std::path::PathBuf {
    loam_store::paths::stuff_dir(world.root.path()).join(leaf)
}

pub fn touch(path: &Path) {
    let file = fs::OpenOptions::new().write(true).open(path).unwrap();
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(2);
    file.set_modified(later).unwrap();
}

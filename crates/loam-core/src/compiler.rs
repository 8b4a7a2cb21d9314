use std::collections::BTreeMap;

use loam_domain::{Chunk, Interface, LocalGraph, ModuleName, NameCache, PkgName};

/// A parsed source module: its declared name, its imports, and whatever the
/// compiler needs to finish the job later.
#[derive(Clone, Debug)]
pub struct ParsedModule {
    pub name: ModuleName,
    pub imports: Vec<ModuleName>,
    pub has_main: bool,
    pub text: String,
}

/// The product of compiling one local module.
#[derive(Clone, Debug)]
pub struct Compiled {
    pub interface: Interface,
    pub objects: LocalGraph,
    pub docs: Option<serde_json::Value>,
}

/// The seam to the module compiler. The engine decides *what* to parse and
/// compile and in what order; this collaborator does the language work.
pub trait Compiler: Sync {
    fn parse(
        &self,
        pkg: &PkgName,
        names: &NameCache,
        source: &str,
    ) -> Result<ParsedModule, String>;

    /// Compile `module` against the interfaces of its imports. Docs are
    /// produced only when `want_docs` is set.
    fn compile(
        &self,
        pkg: &PkgName,
        interfaces: &BTreeMap<ModuleName, Interface>,
        module: &ParsedModule,
        want_docs: bool,
    ) -> Result<Compiled, String>;
}

/// Split a kernel source file into chunks and pull its imports out of the
/// leading block comment. Kernel files declare imports as
/// `import Author.Project.Module` lines inside `/* ... */` at the top, and
/// reference other kernel values as `__Module_value`.
pub(crate) fn parse_kernel(names: &NameCache, source: &str) -> (Vec<Chunk>, Vec<ModuleName>) {
    let mut imports = Vec::new();
    let mut body = source;

    let trimmed = source.trim_start();
    if let Some(rest) = trimmed.strip_prefix("/*") {
        if let Some(end) = rest.find("*/") {
            for line in rest[..end].lines() {
                if let Some(target) = line.trim().strip_prefix("import ") {
                    let target = target.split_whitespace().next().unwrap_or("");
                    if let Ok(name) = names.module(target) {
                        imports.push(name);
                    }
                }
            }
            body = &rest[end + 2..];
        }
    }

    (chunkify(body), imports)
}

fn chunkify(body: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut rest = body;
    while let Some(at) = rest.find("__") {
        let (js, tail) = rest.split_at(at);
        if !js.is_empty() {
            chunks.push(Chunk::Js(js.to_string()));
        }
        let after = &tail[2..];
        let end = after
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(after.len());
        if end == 0 {
            chunks.push(Chunk::Js("__".to_string()));
            rest = after;
            continue;
        }
        chunks.push(Chunk::Ref(after[..end].to_string()));
        rest = &after[end..];
    }
    if !rest.is_empty() {
        chunks.push(Chunk::Js(rest.to_string()));
    }
    chunks
}

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::name::{CanonicalName, GlobalName};

/// One compiled top-level value and the globals its body references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub code: String,
    pub deps: BTreeSet<GlobalName>,
}

/// A slice of kernel source: literal host-language text interleaved with
/// references to other kernel values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Chunk {
    Js(String),
    Ref(String),
}

/// The object graph produced by compiling a single module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGraph {
    pub nodes: BTreeMap<GlobalName, Node>,
}

/// The union of every compiled module's objects across one or more packages.
/// Iteration order is canonical so persisted graphs are byte-reproducible.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalGraph {
    pub nodes: BTreeMap<GlobalName, Node>,
    pub kernels: BTreeMap<CanonicalName, Vec<Chunk>>,
}

impl GlobalGraph {
    pub fn add_local(&mut self, graph: LocalGraph) {
        self.nodes.extend(graph.nodes);
    }

    pub fn add_kernel(&mut self, home: CanonicalName, chunks: Vec<Chunk>) {
        self.kernels.insert(home, chunks);
    }

    pub fn merge(&mut self, other: &GlobalGraph) {
        self.nodes
            .extend(other.nodes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.kernels
            .extend(other.kernels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.kernels.is_empty()
    }
}

#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod binary;
pub mod details;
pub mod error;
pub mod interface;
pub mod name;
pub mod objects;
pub mod outline;
pub mod version;

pub use details::{
    ArtifactCache, Artifacts, Details, Extras, Fingerprint, Foreign, Fresh, Interfaces, Local, Time,
};
pub use error::{BadDep, FetchProblem, Problem};
pub use interface::{DependencyInterface, ForeignInterface, Interface};
pub use name::{CanonicalName, GlobalName, ModuleName, NameCache, PkgName};
pub use objects::{Chunk, GlobalGraph, LocalGraph, Node};
pub use outline::{AppOutline, DepBlock, Exposed, PkgOutline, RawOutline, ValidOutline};
pub use version::{Constraint, Version, COMPILER_VERSION};

/// Implement serde for a type through its `Display`/`FromStr` pair, so it can
/// double as a JSON map key.
macro_rules! impl_text_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = <String as serde::Deserialize>::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use impl_text_serde;

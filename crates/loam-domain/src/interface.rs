use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The exported API of one compiled module, with every type already rendered
/// in canonical form by the compiler.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub values: BTreeMap<String, String>,
    pub unions: BTreeMap<String, Union>,
    pub aliases: BTreeMap<String, Alias>,
    pub binops: BTreeMap<String, Binop>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Union {
    pub vars: Vec<String>,
    pub ctors: Vec<Ctor>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ctor {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub vars: Vec<String>,
    pub tipe: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binop {
    pub func: String,
    pub precedence: u8,
    pub associativity: Associativity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Associativity {
    Left,
    Non,
    Right,
}

/// How one package's module surfaces to the packages that depend on it.
/// Private interfaces still drive compilation inside the package that owns
/// them but are never re-exposed downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyInterface {
    Public(Interface),
    Private(Interface),
}

impl DependencyInterface {
    /// The interface when (and only when) downstream code may import it.
    pub fn public(&self) -> Option<&Interface> {
        match self {
            DependencyInterface::Public(iface) => Some(iface),
            DependencyInterface::Private(_) => None,
        }
    }

    /// Demote a public interface; used when an indirect dependency's modules
    /// must not be importable from the project itself.
    pub fn privatized(self) -> DependencyInterface {
        match self {
            DependencyInterface::Public(iface) | DependencyInterface::Private(iface) => {
                DependencyInterface::Private(iface)
            }
        }
    }
}

/// What a module name means when resolved against a package's direct deps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForeignInterface {
    /// Exactly one dependency exports the name.
    Specific(Interface),
    /// More than one dependency exports the name; importing it is an error.
    Ambiguous,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Interface {
        Interface {
            values: BTreeMap::from([("identity".to_string(), "a -> a".to_string())]),
            ..Interface::default()
        }
    }

    #[test]
    fn privatizing_hides_the_public_view() {
        let public = DependencyInterface::Public(sample());
        assert!(public.public().is_some());
        let private = public.privatized();
        assert!(private.public().is_none());
        assert_eq!(private, DependencyInterface::Private(sample()));
    }

    #[test]
    fn privatizing_is_idempotent() {
        let private = DependencyInterface::Private(sample());
        assert_eq!(private.clone().privatized(), private);
    }
}

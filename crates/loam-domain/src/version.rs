use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Error, Result};

use crate::impl_text_serde;

/// The version of the compiler this engine builds for. Outlines declaring
/// anything else are rejected up front.
pub const COMPILER_VERSION: Version = Version::new(0, 19, 1);

/// An exact `major.minor.patch` version with total order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl Version {
    pub const ONE: Version = Version::new(1, 0, 0);

    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The smallest version above every `self.major` release.
    pub fn next_major(self) -> Version {
        Version::new(self.major + 1, 0, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut parts = text.split('.');
        let mut next = |label: &str| -> Result<u16> {
            let part = parts
                .next()
                .ok_or_else(|| anyhow!("version `{text}` is missing its {label} number"))?;
            if part.is_empty() || part.chars().any(|c| !c.is_ascii_digit()) {
                bail!("version `{text}` has a malformed {label} number");
            }
            part.parse()
                .map_err(|_| anyhow!("version `{text}` has an out-of-range {label} number"))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            bail!("version `{text}` has trailing segments");
        }
        Ok(Version::new(major, minor, patch))
    }
}

impl_text_serde!(Version);

/// A version range `lower <op> v <op> upper` where each `<op>` is `<=` or `<`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Constraint {
    lower: Version,
    lower_inclusive: bool,
    upper: Version,
    upper_inclusive: bool,
}

impl Constraint {
    pub fn new(
        lower: Version,
        lower_inclusive: bool,
        upper: Version,
        upper_inclusive: bool,
    ) -> Option<Constraint> {
        let ordered = match lower.cmp(&upper) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => lower_inclusive && upper_inclusive,
            std::cmp::Ordering::Greater => false,
        };
        ordered.then_some(Constraint {
            lower,
            lower_inclusive,
            upper,
            upper_inclusive,
        })
    }

    /// The singleton range admitting only `version`.
    pub fn exactly(version: Version) -> Constraint {
        Constraint {
            lower: version,
            lower_inclusive: true,
            upper: version,
            upper_inclusive: true,
        }
    }

    /// `version <= v < nextMajor(version)`, the default range for a fresh dep.
    pub fn until_next_major(version: Version) -> Constraint {
        Constraint {
            lower: version,
            lower_inclusive: true,
            upper: version.next_major(),
            upper_inclusive: false,
        }
    }

    pub fn satisfies(&self, version: Version) -> bool {
        let above = if self.lower_inclusive {
            self.lower <= version
        } else {
            self.lower < version
        };
        let below = if self.upper_inclusive {
            version <= self.upper
        } else {
            version < self.upper
        };
        above && below
    }

    pub fn lowest(&self) -> Version {
        self.lower
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lo = if self.lower_inclusive { "<=" } else { "<" };
        let hi = if self.upper_inclusive { "<=" } else { "<" };
        write!(f, "{} {} v {} {}", self.lower, lo, hi, self.upper)
    }
}

impl FromStr for Constraint {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let [lower, lower_op, "v", upper_op, upper] = parts.as_slice() else {
            bail!("constraint `{text}` is not of the form `1.0.0 <= v < 2.0.0`");
        };
        let op = |token: &str| -> Result<bool> {
            match token {
                "<=" => Ok(true),
                "<" => Ok(false),
                _ => bail!("constraint `{text}` has an unknown operator `{token}`"),
            }
        };
        let lower = lower.parse()?;
        let upper = upper.parse()?;
        let lower_inclusive = op(lower_op)?;
        let upper_inclusive = op(upper_op)?;
        Constraint::new(lower, lower_inclusive, upper, upper_inclusive)
            .ok_or_else(|| anyhow!("constraint `{text}` describes an empty range"))
    }
}

impl_text_serde!(Constraint);

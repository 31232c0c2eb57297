//! Fully-qualified type names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A dot-separated fully-qualified name such as `com.example.Base` or
/// `com.example.Outer.Inner`.
///
/// The empty name is the root package. A name's *scope* is its parent, which
/// is what lookups of the short name are recorded against.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FqName(String);

impl FqName {
    /// Creates a name from its dotted string form.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The root package.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Returns `true` for the root package.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the dotted string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the enclosing scope; the root's parent is the root.
    pub fn parent(&self) -> FqName {
        match self.0.rfind('.') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// Returns the last segment.
    pub fn short_name(&self) -> &str {
        match self.0.rfind('.') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Returns `self.name`.
    pub fn child(&self, name: &str) -> FqName {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}.{name}", self.0))
        }
    }
}

impl fmt::Display for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FqName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FqName({})", self.0)
    }
}

impl From<&str> for FqName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

//! Identifiers for independently-compiled build targets.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// One compiled module in a multi-module build.
///
/// Production and test sources of the same module are distinct targets with
/// distinct caches.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct TargetId {
    /// Module name as known to the build orchestrator.
    pub name: String,
    /// Whether this is the module's test source set.
    pub is_test: bool,
}

impl TargetId {
    /// Creates a production target.
    pub fn production(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_test: false,
        }
    }

    /// Creates a test target.
    pub fn test(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_test: true,
        }
    }

    /// Returns a normalized key safe to use as a storage key component.
    ///
    /// Characters outside `[A-Za-z0-9_.-]` are replaced with `_`, and the
    /// source-set kind is appended so production and test never collide.
    /// A name that needed replacements also gets `~` and a hash of the
    /// original name, so `app/ui` and `app_ui` keep separate keys.
    pub fn key(&self) -> String {
        let sanitized: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let kind = if self.is_test { "test" } else { "production" };
        if sanitized == self.name {
            format!("{sanitized}-{kind}")
        } else {
            format!("{sanitized}~{:016x}-{kind}", xxh3_64(self.name.as_bytes()))
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_test {
            write!(f, "{} (tests)", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

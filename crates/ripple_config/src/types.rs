//! Configuration types deserialized from `ripple.toml`.

use serde::Deserialize;
use std::path::PathBuf;

/// Default directory, relative to the project root, holding cache blobs.
pub const DEFAULT_CACHE_DIR: &str = ".ripple-cache";

/// Default extension of compiled class artifacts.
pub const DEFAULT_CLASS_EXTENSION: &str = "class";

/// Default extension of module-mapping artifacts.
pub const DEFAULT_MODULE_MAPPING_EXTENSION: &str = "kotlin_module";

/// The top-level configuration parsed from `ripple.toml`.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RippleConfig {
    /// Where persisted caches live.
    #[serde(default)]
    pub cache: CacheSettings,
    /// How compiler outputs are classified.
    #[serde(default)]
    pub outputs: OutputSettings,
    /// Which class changes are reported as affecting subclasses.
    #[serde(default)]
    pub diff: DiffPolicy,
    /// Whether lookups are recorded at all.
    #[serde(default)]
    pub lookups: LookupSettings,
}

/// Cache storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Cache directory, relative to the project root unless absolute.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

/// Output classification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSettings {
    /// Extension (without the dot) identifying compiled class artifacts.
    #[serde(default = "default_class_extension")]
    pub class_extension: String,
    /// Extension (without the dot) identifying module-mapping artifacts.
    #[serde(default = "default_module_mapping_extension")]
    pub module_mapping_extension: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            class_extension: default_class_extension(),
            module_mapping_extension: default_module_mapping_extension(),
        }
    }
}

fn default_class_extension() -> String {
    DEFAULT_CLASS_EXTENSION.to_string()
}

fn default_module_mapping_extension() -> String {
    DEFAULT_MODULE_MAPPING_EXTENSION.to_string()
}

/// Tunable policy for classifying class changes.
///
/// A signature change of an overridable member in an open class always
/// affects subclasses. The narrower cases below are conservative-off by
/// default and may be switched on when a front end resolves overrides in ways
/// that make them observable downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DiffPolicy {
    /// Report a class seen for the first time as a signature change instead
    /// of a no-propagation save.
    #[serde(default)]
    pub propagate_new_classes: bool,
    /// Treat signature changes of final members as affecting subclasses.
    #[serde(default)]
    pub non_open_member_changes_affect_subclasses: bool,
    /// Treat signature changes of private members as affecting subclasses.
    #[serde(default)]
    pub private_member_changes_affect_subclasses: bool,
}

/// Lookup recording settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupSettings {
    /// When `false`, the build runs without a lookup index and every change
    /// must be handled by a full rebuild.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::RippleConfig;
use std::path::Path;

/// Name of the configuration file within a project directory.
pub const CONFIG_FILE: &str = "ripple.toml";

/// Loads and validates a `ripple.toml` configuration from a project directory.
///
/// Reads `<project_dir>/ripple.toml`, parses it, and validates its values.
pub fn load_config(project_dir: &Path) -> Result<RippleConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Like [`load_config`], but a missing `ripple.toml` yields the defaults.
///
/// Any other read failure, and any parse or validation failure, is still an error.
pub fn load_config_or_default(project_dir: &Path) -> Result<RippleConfig, ConfigError> {
    match load_config(project_dir) {
        Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(RippleConfig::default())
        }
        other => other,
    }
}

/// Parses and validates a `ripple.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<RippleConfig, ConfigError> {
    let config: RippleConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that configured values are usable.
fn validate_config(config: &RippleConfig) -> Result<(), ConfigError> {
    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError("cache.dir is empty".to_string()));
    }
    let outputs = &config.outputs;
    for (field, ext) in [
        ("outputs.class_extension", &outputs.class_extension),
        ("outputs.module_mapping_extension", &outputs.module_mapping_extension),
    ] {
        if ext.is_empty() {
            return Err(ConfigError::ValidationError(format!("{field} is empty")));
        }
        if ext.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "{field} must not start with '.': {ext}"
            )));
        }
    }
    if outputs.class_extension == outputs.module_mapping_extension {
        return Err(ConfigError::ValidationError(
            "class and module-mapping extensions must differ".to_string(),
        ));
    }
    Ok(())
}

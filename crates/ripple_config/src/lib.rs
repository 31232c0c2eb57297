//! Parsing and validation of `ripple.toml` configuration files.
//!
//! This crate reads the project configuration and produces a strongly-typed
//! [`RippleConfig`] covering cache location, output classification, and the
//! change-classification policy.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, load_config_or_default, CONFIG_FILE};
pub use types::*;

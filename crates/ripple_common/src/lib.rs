//! Shared foundational types used across the Ripple incremental build layer.
//!
//! This crate provides content hashing for fingerprints and blob checksums,
//! interned file paths for lookup recording, fully-qualified type names, and
//! target identifiers.

#![warn(missing_docs)]

pub mod hash;
pub mod ident;
pub mod name;
pub mod target;

pub use hash::ContentHash;
pub use ident::{Ident, Interner};
pub use name::FqName;
pub use target::TargetId;

//! Error types for cache operations.

use std::path::PathBuf;

/// Errors that can occur during cache operations.
///
/// The persistence variants (`InvalidHeader`, `ChecksumMismatch`,
/// `VersionMismatch`, `Serialization`) mean a stored blob cannot be trusted;
/// the owner discards it and rebuilds from empty. The remaining variants are
/// integration errors that must reach the build orchestrator, since silently
/// continuing would produce an empty dirty set that looks like "nothing changed".
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing a blob.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A blob has an invalid or missing header.
    #[error("invalid blob header in {key}: {reason}")]
    InvalidHeader {
        /// The store key of the blob.
        key: String,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {key}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The store key of the blob.
        key: String,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The blob format version does not match the current version.
    #[error("version mismatch in {key}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The store key of the blob.
        key: String,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the blob.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A target was referenced that is not part of the cache graph.
    #[error("unknown target '{target}'")]
    UnknownTarget {
        /// Display form of the target.
        target: String,
    },

    /// A class artifact arrived without the descriptor needed to fingerprint it.
    #[error("class output {path} has no class descriptor")]
    MissingClassDescriptor {
        /// The output path of the class artifact.
        path: PathBuf,
    },

    /// The lookup tracker cannot provide trustworthy recordings.
    #[error("lookup tracker is not recording: {reason}")]
    LookupTrackerState {
        /// Why the tracker is unusable.
        reason: String,
    },

    /// The round was canceled between file updates.
    #[error("cache update canceled")]
    Cancelled,
}

impl CacheError {
    /// Returns `true` if this error means a persisted blob must be discarded.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader { .. }
                | Self::ChecksumMismatch { .. }
                | Self::VersionMismatch { .. }
                | Self::Serialization { .. }
        )
    }
}

//! Incremental compilation cache layer.
//!
//! Each build target owns an [`IncrementalCache`] holding the fingerprints of
//! the classes it produced in its last successful compile. After a round, the
//! new outputs are attributed to targets, saved into their caches, and diffed
//! into a [`CompilationResult`]. Propagation turns those changes into the
//! [`LookupSymbol`]s that went stale, and the [`LookupStorage`] maps them to
//! the source files that must be recompiled next.

#![warn(missing_docs)]

pub mod artifact;
pub mod attribution;
pub mod cache;
pub mod change;
pub mod descriptor;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod lookup;
pub mod propagation;
pub mod session;
pub mod store;
pub mod update;

pub use attribution::{generated_files, OutputItem};
pub use cache::IncrementalCache;
pub use change::{ChangeInfo, ChangeSummary, CompilationResult};
pub use descriptor::{
    Artifact, ClassDescriptor, GeneratedFile, MemberDescriptor, MemberKind, Modality, Visibility,
};
pub use error::CacheError;
pub use graph::{make_incremental_caches, CacheGraph};
pub use lookup::{LookupRecorder, LookupStorage, LookupSymbol, LookupTracker};
pub use propagation::{dirty_files, dirty_lookups, with_subtypes, SubtypeIndex};
pub use session::CacheSession;
pub use store::{ByteStore, FsStore, MemoryStore};
pub use update::{complete_round, update_incremental_caches, RoundInput, RoundOutcome};

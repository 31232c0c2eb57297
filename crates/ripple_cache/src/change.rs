//! What changed in a compilation round.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, AddAssign};

use ripple_common::FqName;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// The observable change of one saved class (or module artifact).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeInfo {
    /// The class's linkage-visible signature changed or the class was removed.
    SignatureChanged {
        /// The changed class.
        fq_name: FqName,
        /// Whether subclasses can resolve differently because of this change.
        are_subclasses_affected: bool,
    },
    /// Members were added, removed, re-typed, or changed visibility.
    MembersChanged {
        /// The declaring class.
        fq_name: FqName,
        /// The affected member names.
        names: BTreeSet<String>,
    },
    /// Saved, but nothing any other file can observe changed.
    NoPropagation {
        /// The saved class, if the artifact was a class.
        fq_name: Option<FqName>,
    },
}

impl ChangeInfo {
    /// Returns the class this change is about, if any.
    pub fn fq_name(&self) -> Option<&FqName> {
        match self {
            Self::SignatureChanged { fq_name, .. } | Self::MembersChanged { fq_name, .. } => {
                Some(fq_name)
            }
            Self::NoPropagation { fq_name } => fq_name.as_ref(),
        }
    }

    /// Returns `true` if this change can invalidate other files' lookups.
    pub fn propagates(&self) -> bool {
        !matches!(self, Self::NoPropagation { .. })
    }
}

impl fmt::Display for ChangeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureChanged {
                fq_name,
                are_subclasses_affected,
            } => write!(
                f,
                "signature of {fq_name} changed (subclasses affected: {are_subclasses_affected})"
            ),
            Self::MembersChanged { fq_name, names } => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "members of {fq_name} changed: {}", names.join(", "))
            }
            Self::NoPropagation { fq_name: Some(fq_name) } => {
                write!(f, "{fq_name} saved without visible changes")
            }
            Self::NoPropagation { fq_name: None } => f.write_str("module data saved"),
        }
    }
}

/// Counts of each change kind, for round summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    /// Number of `SignatureChanged` entries.
    pub signature_changes: usize,
    /// Number of `MembersChanged` entries.
    pub member_changes: usize,
    /// Number of `NoPropagation` entries.
    pub unpropagated: usize,
}

/// The accumulated changes of one compilation round.
///
/// A monoid: [`CompilationResult::NO_CHANGES`] is the identity and
/// [`combine`](CompilationResult::combine) concatenates change lists,
/// preserving the order in which changes were produced. Equality treats the
/// changes as a multiset, so `a + b == b + a`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompilationResult {
    changes: Vec<ChangeInfo>,
}

impl CompilationResult {
    /// The identity: no changes at all.
    pub const NO_CHANGES: CompilationResult = CompilationResult {
        changes: Vec::new(),
    };

    /// Wraps an ordered list of changes.
    pub fn new(changes: Vec<ChangeInfo>) -> Self {
        Self { changes }
    }

    /// A result holding exactly one change.
    pub fn single(change: ChangeInfo) -> Self {
        Self {
            changes: vec![change],
        }
    }

    /// Appends `other`'s changes after this result's.
    pub fn combine(mut self, other: CompilationResult) -> Self {
        self.changes.extend(other.changes);
        self
    }

    /// The changes, in production order.
    pub fn changes(&self) -> &[ChangeInfo] {
        &self.changes
    }

    /// Returns `true` if the round produced no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Counts the change kinds.
    pub fn summary(&self) -> ChangeSummary {
        self.changes
            .iter()
            .fold(ChangeSummary::default(), |mut summary, change| {
                match change {
                    ChangeInfo::SignatureChanged { .. } => summary.signature_changes += 1,
                    ChangeInfo::MembersChanged { .. } => summary.member_changes += 1,
                    ChangeInfo::NoPropagation { .. } => summary.unpropagated += 1,
                }
                summary
            })
    }

    /// Renders the result as pretty JSON for build reports.
    pub fn to_json(&self) -> Result<String, CacheError> {
        serde_json::to_string_pretty(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }

    fn sorted(&self) -> Vec<&ChangeInfo> {
        let mut changes: Vec<&ChangeInfo> = self.changes.iter().collect();
        changes.sort();
        changes
    }
}

impl PartialEq for CompilationResult {
    fn eq(&self, other: &Self) -> bool {
        self.changes.len() == other.changes.len() && self.sorted() == other.sorted()
    }
}

impl Eq for CompilationResult {}

impl Add for CompilationResult {
    type Output = CompilationResult;

    fn add(self, rhs: CompilationResult) -> CompilationResult {
        self.combine(rhs)
    }
}

impl AddAssign for CompilationResult {
    fn add_assign(&mut self, rhs: CompilationResult) {
        self.changes.extend(rhs.changes);
    }
}

impl FromIterator<ChangeInfo> for CompilationResult {
    fn from_iter<I: IntoIterator<Item = ChangeInfo>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl std::iter::Sum for CompilationResult {
    fn sum<I: Iterator<Item = CompilationResult>>(iter: I) -> Self {
        iter.fold(Self::NO_CHANGES, Self::combine)
    }
}

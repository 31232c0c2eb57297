//! Turning a round's changes into the set of lookups that became stale.

use std::collections::{BTreeSet, VecDeque};
use std::path::PathBuf;

use rayon::prelude::*;
use ripple_common::FqName;

use crate::change::{ChangeInfo, CompilationResult};
use crate::lookup::{LookupStorage, LookupSymbol};

/// Anything that knows the direct subtypes of a class.
pub trait SubtypeIndex {
    /// Direct subtypes of `fq_name` known to this index.
    fn get_subtypes_of(&self, fq_name: &FqName) -> BTreeSet<FqName>;
}

impl<T: SubtypeIndex + ?Sized> SubtypeIndex for &T {
    fn get_subtypes_of(&self, fq_name: &FqName) -> BTreeSet<FqName> {
        (**self).get_subtypes_of(fq_name)
    }
}

/// `fq_name` and every transitive subtype of it known to any of `caches`.
///
/// Breadth-first; a type already visited is never expanded again, so cyclic
/// or diamond hierarchies terminate and the result does not depend on the
/// order of `caches`.
pub fn with_subtypes<C: SubtypeIndex>(fq_name: &FqName, caches: &[C]) -> BTreeSet<FqName> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    visited.insert(fq_name.clone());
    queue.push_back(fq_name.clone());

    while let Some(current) = queue.pop_front() {
        for cache in caches {
            for subtype in cache.get_subtypes_of(&current) {
                if visited.insert(subtype.clone()) {
                    queue.push_back(subtype);
                }
            }
        }
    }
    visited
}

/// The lookups invalidated by `result`, over the subtype hierarchy of `caches`.
pub fn dirty_lookups<C>(result: &CompilationResult, caches: &[C]) -> BTreeSet<LookupSymbol>
where
    C: SubtypeIndex + Sync,
{
    result
        .changes()
        .par_iter()
        .map(|change| lookups_for(change, caches))
        .reduce(BTreeSet::new, |mut acc, lookups| {
            acc.extend(lookups);
            acc
        })
}

/// Source files whose recorded lookups `result` invalidated.
pub fn dirty_files<C>(
    result: &CompilationResult,
    caches: &[C],
    storage: &LookupStorage,
) -> BTreeSet<PathBuf>
where
    C: SubtypeIndex + Sync,
{
    let lookups = dirty_lookups(result, caches);
    storage.files_for(&lookups)
}

fn lookups_for<C: SubtypeIndex>(change: &ChangeInfo, caches: &[C]) -> BTreeSet<LookupSymbol> {
    match change {
        ChangeInfo::SignatureChanged {
            fq_name,
            are_subclasses_affected,
        } => {
            let affected = if *are_subclasses_affected {
                with_subtypes(fq_name, caches)
            } else {
                BTreeSet::from([fq_name.clone()])
            };
            affected.iter().map(class_lookup).collect()
        }
        ChangeInfo::MembersChanged { fq_name, names } => {
            let scopes = with_subtypes(fq_name, caches);
            scopes
                .iter()
                .flat_map(|scope| {
                    names
                        .iter()
                        .map(move |name| LookupSymbol::new(name.as_str(), scope.as_str()))
                })
                .collect()
        }
        ChangeInfo::NoPropagation { .. } => BTreeSet::new(),
    }
}

// A class is looked up by its short name in its parent scope.
fn class_lookup(fq_name: &FqName) -> LookupSymbol {
    LookupSymbol::new(fq_name.short_name(), fq_name.parent().as_str())
}

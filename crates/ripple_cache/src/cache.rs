//! Per-target incremental cache.
//!
//! An [`IncrementalCache`] remembers, for one target, the fingerprint of every
//! class from its last successful compile, which source files produced which
//! classes, and module-mapping baselines. Saving a freshly compiled class
//! diffs it against the stored fingerprint and reports the [`ChangeInfo`]s.
//! The cache also indexes declared supertypes so propagation can ask for the
//! direct subtypes of a class.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use ripple_common::{ContentHash, FqName, TargetId};
use ripple_config::DiffPolicy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::{read_blob, write_blob, CACHE_BLOB};
use crate::change::{ChangeInfo, CompilationResult};
use crate::descriptor::ClassDescriptor;
use crate::error::CacheError;
use crate::fingerprint::{self, ClassFingerprint};
use crate::propagation::SubtypeIndex;
use crate::store::ByteStore;

/// Prefix of the store keys of per-target cache blobs.
const CACHE_KEY_PREFIX: &str = "caches";

/// A class as remembered between rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredClass {
    fingerprint: ClassFingerprint,
    sources: BTreeSet<PathBuf>,
}

/// A module-mapping artifact as remembered between rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMappingEntry {
    /// Source files that contributed to the mapping.
    pub sources: BTreeSet<PathBuf>,
    /// Hash of the mapping contents.
    pub hash: ContentHash,
}

/// Persisted form. Dirty state pending from a round with errors is kept so
/// the next clean round, possibly in a later session, still clears it.
#[derive(Serialize)]
struct SnapshotRef<'a> {
    target: &'a TargetId,
    classes: &'a BTreeMap<FqName, StoredClass>,
    module_mappings: &'a BTreeMap<PathBuf, ModuleMappingEntry>,
    dirty_classes: &'a BTreeSet<FqName>,
    dirty_sources: &'a BTreeSet<PathBuf>,
    saved_mappings: &'a BTreeSet<PathBuf>,
}

#[derive(Deserialize)]
struct Snapshot {
    target: TargetId,
    classes: BTreeMap<FqName, StoredClass>,
    module_mappings: BTreeMap<PathBuf, ModuleMappingEntry>,
    dirty_classes: BTreeSet<FqName>,
    dirty_sources: BTreeSet<PathBuf>,
    saved_mappings: BTreeSet<PathBuf>,
}

/// Undo log of an open round: the value each touched entry had before the
/// round first touched it, plus the dirty state at the start.
#[derive(Debug)]
struct RoundJournal {
    classes: BTreeMap<FqName, Option<StoredClass>>,
    module_mappings: BTreeMap<PathBuf, Option<ModuleMappingEntry>>,
    dirty_classes: BTreeSet<FqName>,
    dirty_sources: BTreeSet<PathBuf>,
    saved_mappings: BTreeSet<PathBuf>,
}

/// Incremental cache of one target.
///
/// Exclusively owned by the build session; mutated only while updating its
/// own target. Dependent targets are held by id, never by reference.
#[derive(Debug)]
pub struct IncrementalCache {
    target: TargetId,
    policy: DiffPolicy,
    classes: BTreeMap<FqName, StoredClass>,
    module_mappings: BTreeMap<PathBuf, ModuleMappingEntry>,
    /// supertype -> direct subtypes declared in this target.
    subtypes: HashMap<FqName, BTreeSet<FqName>>,
    source_to_classes: BTreeMap<PathBuf, BTreeSet<FqName>>,
    dirty_classes: BTreeSet<FqName>,
    dirty_sources: BTreeSet<PathBuf>,
    saved_mappings: BTreeSet<PathBuf>,
    dependents: BTreeSet<TargetId>,
    journal: Option<RoundJournal>,
}

impl IncrementalCache {
    /// Creates an empty cache for `target`.
    pub fn new(target: TargetId, policy: DiffPolicy) -> Self {
        Self {
            target,
            policy,
            classes: BTreeMap::new(),
            module_mappings: BTreeMap::new(),
            subtypes: HashMap::new(),
            source_to_classes: BTreeMap::new(),
            dirty_classes: BTreeSet::new(),
            dirty_sources: BTreeSet::new(),
            saved_mappings: BTreeSet::new(),
            dependents: BTreeSet::new(),
            journal: None,
        }
    }

    /// Store key of a target's cache blob.
    pub fn store_key(target: &TargetId) -> String {
        format!("{CACHE_KEY_PREFIX}/{}", target.key())
    }

    /// Loads `target`'s cache from `store`; an absent blob yields an empty cache.
    ///
    /// A corrupt, incompatible, or foreign blob is an error. The caller must
    /// then discard it and rebuild the target from scratch.
    pub fn load(
        store: &dyn ByteStore,
        target: TargetId,
        policy: DiffPolicy,
    ) -> Result<Self, CacheError> {
        let key = Self::store_key(&target);
        let mut cache = Self::new(target, policy);
        let Some(snapshot) = read_blob::<Snapshot>(store, CACHE_BLOB, &key)? else {
            return Ok(cache);
        };
        if snapshot.target != cache.target {
            return Err(CacheError::InvalidHeader {
                key,
                reason: format!("blob belongs to target '{}'", snapshot.target),
            });
        }
        for (fq_name, stored) in snapshot.classes {
            cache.index(&fq_name, &stored);
            cache.classes.insert(fq_name, stored);
        }
        cache.module_mappings = snapshot.module_mappings;
        cache.dirty_classes = snapshot.dirty_classes;
        cache.dirty_sources = snapshot.dirty_sources;
        cache.saved_mappings = snapshot.saved_mappings;
        if !cache.dirty_classes.is_empty() {
            debug!(
                target = %cache.target,
                dirty = cache.dirty_classes.len(),
                "restored pending dirty classes"
            );
        }
        Ok(cache)
    }

    /// Loads `target`'s cache, starting from empty if the blob cannot be trusted.
    pub fn load_or_create(store: &dyn ByteStore, target: TargetId, policy: DiffPolicy) -> Self {
        match Self::load(store, target.clone(), policy) {
            Ok(cache) => cache,
            Err(error) => {
                warn!(target = %target, %error, "discarding incremental cache");
                Self::new(target, policy)
            }
        }
    }

    /// Persists the cache to `store`.
    pub fn save(&self, store: &mut dyn ByteStore) -> Result<(), CacheError> {
        let snapshot = SnapshotRef {
            target: &self.target,
            classes: &self.classes,
            module_mappings: &self.module_mappings,
            dirty_classes: &self.dirty_classes,
            dirty_sources: &self.dirty_sources,
            saved_mappings: &self.saved_mappings,
        };
        write_blob(store, CACHE_BLOB, &Self::store_key(&self.target), &snapshot)
    }

    /// Drops all cached state for `target` from `store`.
    pub fn discard(store: &mut dyn ByteStore, target: &TargetId) -> Result<(), CacheError> {
        store.remove(&Self::store_key(target))
    }

    /// The target this cache belongs to.
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Starts journaling changes so the round can be undone.
    ///
    /// Does nothing if a round is already open.
    pub fn begin_round(&mut self) {
        if self.journal.is_none() {
            self.journal = Some(RoundJournal {
                classes: BTreeMap::new(),
                module_mappings: BTreeMap::new(),
                dirty_classes: self.dirty_classes.clone(),
                dirty_sources: self.dirty_sources.clone(),
                saved_mappings: self.saved_mappings.clone(),
            });
        }
    }

    /// Keeps everything done since [`begin_round`](Self::begin_round).
    pub fn commit_round(&mut self) {
        self.journal = None;
    }

    /// Restores the state from before [`begin_round`](Self::begin_round).
    ///
    /// Without an open round this does nothing.
    pub fn rollback_round(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        let restored = journal.classes.len() + journal.module_mappings.len();
        for (fq_name, previous) in journal.classes {
            if let Some(current) = self.classes.remove(&fq_name) {
                self.unindex(&fq_name, &current);
            }
            if let Some(previous) = previous {
                self.index(&fq_name, &previous);
                self.classes.insert(fq_name, previous);
            }
        }
        for (output, previous) in journal.module_mappings {
            match previous {
                Some(entry) => {
                    self.module_mappings.insert(output, entry);
                }
                None => {
                    self.module_mappings.remove(&output);
                }
            }
        }
        self.dirty_classes = journal.dirty_classes;
        self.dirty_sources = journal.dirty_sources;
        self.saved_mappings = journal.saved_mappings;
        debug!(target = %self.target, restored, "rolled back round");
    }

    /// Marks every class previously produced by `sources` as dirty.
    ///
    /// Called before a round for recompiled and removed sources. Classes still
    /// dirty when [`clear_cache_for_removed_classes`](Self::clear_cache_for_removed_classes)
    /// runs were not produced again and are dropped.
    pub fn mark_sources_dirty<'a, I>(&mut self, sources: I)
    where
        I: IntoIterator<Item = &'a Path>,
    {
        for source in sources {
            if let Some(classes) = self.source_to_classes.get(source) {
                self.dirty_classes.extend(classes.iter().cloned());
            }
            self.dirty_sources.insert(source.to_path_buf());
        }
    }

    /// Saves a freshly compiled class and reports how it changed.
    pub fn save_file_to_cache(
        &mut self,
        source_files: &[PathBuf],
        class: &ClassDescriptor,
    ) -> CompilationResult {
        let fq_name = &class.fq_name;
        let fingerprint = ClassFingerprint::of(class);
        let previous = self.classes.remove(fq_name);
        if let Some(journal) = &mut self.journal {
            journal
                .classes
                .entry(fq_name.clone())
                .or_insert_with(|| previous.clone());
        }
        let changes = fingerprint::diff(
            fq_name,
            previous.as_ref().map(|stored| &stored.fingerprint),
            &fingerprint,
            &self.policy,
        );
        if let Some(previous) = &previous {
            self.unindex(fq_name, previous);
        }

        let stored = StoredClass {
            fingerprint,
            sources: source_files.iter().cloned().collect(),
        };
        self.index(fq_name, &stored);
        self.classes.insert(fq_name.clone(), stored);
        self.dirty_classes.remove(fq_name);

        debug!(target = %self.target, class = %fq_name, changes = changes.len(), "saved class");
        CompilationResult::new(changes)
    }

    /// Saves module-level metadata produced from `sources`.
    ///
    /// Never propagates, but becomes the baseline for the next round.
    pub fn save_module_mapping_to_cache(
        &mut self,
        sources: &[PathBuf],
        output_file: &Path,
        hash: ContentHash,
    ) -> CompilationResult {
        let previous = self.module_mappings.insert(
            output_file.to_path_buf(),
            ModuleMappingEntry {
                sources: sources.iter().cloned().collect(),
                hash,
            },
        );
        if let Some(journal) = &mut self.journal {
            journal
                .module_mappings
                .entry(output_file.to_path_buf())
                .or_insert(previous);
        }
        self.saved_mappings.insert(output_file.to_path_buf());
        CompilationResult::single(ChangeInfo::NoPropagation { fq_name: None })
    }

    /// Drops every class that stayed dirty this round and reports each as a
    /// subclass-affecting signature change.
    ///
    /// Module mappings not saved this round whose sources were all dirty are
    /// dropped too. Only call this after a round without compile errors.
    pub fn clear_cache_for_removed_classes(&mut self) -> CompilationResult {
        let removed = std::mem::take(&mut self.dirty_classes);
        let mut changes = Vec::with_capacity(removed.len());
        for fq_name in removed {
            let Some(stored) = self.classes.remove(&fq_name) else {
                continue;
            };
            self.unindex(&fq_name, &stored);
            debug!(target = %self.target, class = %fq_name, "removed class");
            if let Some(journal) = &mut self.journal {
                journal
                    .classes
                    .entry(fq_name.clone())
                    .or_insert(Some(stored));
            }
            changes.push(ChangeInfo::SignatureChanged {
                fq_name,
                are_subclasses_affected: true,
            });
        }

        let dirty_sources = std::mem::take(&mut self.dirty_sources);
        let saved = std::mem::take(&mut self.saved_mappings);
        let stale: Vec<PathBuf> = self
            .module_mappings
            .iter()
            .filter(|(output, entry)| {
                !saved.contains(*output)
                    && !entry.sources.is_empty()
                    && entry.sources.iter().all(|s| dirty_sources.contains(s))
            })
            .map(|(output, _)| output.clone())
            .collect();
        for output in stale {
            let previous = self.module_mappings.remove(&output);
            if let Some(journal) = &mut self.journal {
                journal.module_mappings.entry(output).or_insert(previous);
            }
        }

        CompilationResult::new(changes)
    }

    /// Direct subtypes of `fq_name` declared in this target.
    pub fn get_subtypes_of(&self, fq_name: &FqName) -> BTreeSet<FqName> {
        self.subtypes.get(fq_name).cloned().unwrap_or_default()
    }

    /// Registers a target that depends on this one.
    ///
    /// Only the id is kept; propagation resolves it through the cache graph.
    pub fn add_dependent_cache(&mut self, dependent: &TargetId) {
        self.dependents.insert(dependent.clone());
    }

    /// Targets registered as dependents.
    pub fn dependents(&self) -> impl Iterator<Item = &TargetId> {
        self.dependents.iter()
    }

    /// Stored fingerprint of a class.
    pub fn fingerprint(&self, fq_name: &FqName) -> Option<&ClassFingerprint> {
        self.classes.get(fq_name).map(|stored| &stored.fingerprint)
    }

    /// Returns `true` if the class is cached.
    pub fn contains_class(&self, fq_name: &FqName) -> bool {
        self.classes.contains_key(fq_name)
    }

    /// Classes last produced by `source`.
    pub fn classes_of(&self, source: &Path) -> BTreeSet<FqName> {
        self.source_to_classes
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Stored module mapping for an output file.
    pub fn module_mapping(&self, output_file: &Path) -> Option<&ModuleMappingEntry> {
        self.module_mappings.get(output_file)
    }

    /// Number of cached classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    fn index(&mut self, fq_name: &FqName, stored: &StoredClass) {
        for supertype in &stored.fingerprint.supertypes {
            self.subtypes
                .entry(supertype.clone())
                .or_default()
                .insert(fq_name.clone());
        }
        for source in &stored.sources {
            self.source_to_classes
                .entry(source.clone())
                .or_default()
                .insert(fq_name.clone());
        }
    }

    fn unindex(&mut self, fq_name: &FqName, stored: &StoredClass) {
        for supertype in &stored.fingerprint.supertypes {
            if let Some(subs) = self.subtypes.get_mut(supertype) {
                subs.remove(fq_name);
                if subs.is_empty() {
                    self.subtypes.remove(supertype);
                }
            }
        }
        for source in &stored.sources {
            if let Some(classes) = self.source_to_classes.get_mut(source) {
                classes.remove(fq_name);
                if classes.is_empty() {
                    self.source_to_classes.remove(source);
                }
            }
        }
    }
}

impl SubtypeIndex for IncrementalCache {
    fn get_subtypes_of(&self, fq_name: &FqName) -> BTreeSet<FqName> {
        IncrementalCache::get_subtypes_of(self, fq_name)
    }
}

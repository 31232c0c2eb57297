//! High-level build session.
//!
//! [`CacheSession`] ties the configuration, the on-disk store, the per-target
//! caches, and the lookup index into one handle for the build pipeline. All
//! loads are fail-safe: a cache that cannot be trusted starts empty and its
//! target is rebuilt.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use ripple_common::TargetId;
use ripple_config::RippleConfig;
use tracing::info;

use crate::attribution::{generated_files, OutputItem};
use crate::descriptor::GeneratedFile;
use crate::error::CacheError;
use crate::graph::CacheGraph;
use crate::lookup::{LookupStorage, LookupTracker};
use crate::store::FsStore;
use crate::update::{complete_round, RoundInput, RoundOutcome};

/// Caches and lookup index of one project, backed by the cache directory.
#[derive(Debug)]
pub struct CacheSession {
    config: RippleConfig,
    store: FsStore,
    graph: CacheGraph,
    lookups: LookupStorage,
}

impl CacheSession {
    /// Opens the session for `targets` under `project_root`.
    ///
    /// The cache directory from `config` is resolved against `project_root`.
    pub fn open<D>(
        project_root: &Path,
        config: RippleConfig,
        targets: &[TargetId],
        dependencies_of: D,
    ) -> Self
    where
        D: FnMut(&TargetId) -> Vec<TargetId>,
    {
        let store = FsStore::new(&project_root.join(&config.cache.dir));
        let graph = CacheGraph::load_or_create(&store, targets, dependencies_of, config.diff);
        let lookups = LookupStorage::load_or_create(&store);
        info!(
            targets = graph.len(),
            lookups = lookups.symbol_count(),
            "opened cache session"
        );
        Self {
            config,
            store,
            graph,
            lookups,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &RippleConfig {
        &self.config
    }

    /// The per-target caches.
    pub fn graph(&self) -> &CacheGraph {
        &self.graph
    }

    /// The lookup index.
    pub fn lookups(&self) -> &LookupStorage {
        &self.lookups
    }

    /// A tracker for the next compile, honoring the lookup settings.
    pub fn tracker(&self) -> LookupTracker {
        LookupTracker::from_settings(&self.config.lookups)
    }

    /// Attributes compiler outputs to this session's targets.
    pub fn attribute<S, O>(
        &self,
        items: &[OutputItem],
        representative: &TargetId,
        sources_of: S,
        output_dir_of: O,
    ) -> Result<Vec<GeneratedFile>, CacheError>
    where
        S: FnMut(&TargetId) -> Vec<PathBuf>,
        O: FnMut(&TargetId) -> Option<PathBuf>,
    {
        let targets: Vec<TargetId> = self.graph.targets().cloned().collect();
        generated_files(
            items,
            &targets,
            representative,
            sources_of,
            output_dir_of,
            &self.config.outputs,
        )
    }

    /// Records a finished compile.
    ///
    /// With lookup tracking disabled in the configuration the tracker is
    /// ignored and only removed files are dropped from the lookup index.
    pub fn complete_round(
        &mut self,
        generated_files: &[GeneratedFile],
        compiled_files: &[PathBuf],
        removed_files: &[PathBuf],
        compiled_with_errors: bool,
        tracker: &LookupTracker,
        canceled: &AtomicBool,
    ) -> Result<RoundOutcome, CacheError> {
        let tracker = self.config.lookups.enabled.then_some(tracker);
        complete_round(
            &mut self.graph,
            &mut self.lookups,
            RoundInput {
                generated_files,
                compiled_files,
                removed_files,
                compiled_with_errors,
                tracker,
            },
            canceled,
        )
    }

    /// Writes every cache and the lookup index to disk.
    pub fn save(&mut self) -> Result<(), CacheError> {
        self.graph.save_all(&mut self.store)?;
        self.lookups.save(&mut self.store)
    }

    /// Drops `target`'s persisted cache, forcing its rebuild next session.
    pub fn discard_target(&mut self, target: &TargetId) -> Result<(), CacheError> {
        crate::cache::IncrementalCache::discard(&mut self.store, target)
    }
}

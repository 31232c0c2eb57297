//! Target dependency graph and the caches attached to it.
//!
//! A type's subtypes may live in any target that depends on the type's own
//! target, so each cache learns its dependents when the graph is built.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use ripple_common::TargetId;
use ripple_config::DiffPolicy;
use tracing::debug;

use crate::cache::IncrementalCache;
use crate::error::CacheError;
use crate::store::ByteStore;

/// Caches of all live targets, keyed by target.
#[derive(Debug, Default)]
pub struct CacheGraph {
    caches: BTreeMap<TargetId, IncrementalCache>,
    /// target -> its live dependencies.
    dependencies: BTreeMap<TargetId, BTreeSet<TargetId>>,
}

/// Builds one cache per live target and wires each cache to its dependents.
///
/// Dependencies outside `targets` are ignored: they were built earlier and
/// cannot change this round.
pub fn make_incremental_caches<D, M>(
    targets: &[TargetId],
    mut dependencies_of: D,
    mut make_cache: M,
) -> CacheGraph
where
    D: FnMut(&TargetId) -> Vec<TargetId>,
    M: FnMut(&TargetId) -> IncrementalCache,
{
    let live: BTreeSet<&TargetId> = targets.iter().collect();

    let mut dependencies: BTreeMap<TargetId, BTreeSet<TargetId>> = BTreeMap::new();
    let mut dependents: BTreeMap<&TargetId, BTreeSet<&TargetId>> = BTreeMap::new();
    for &target in &live {
        let deps = dependencies.entry(target.clone()).or_default();
        for dependency in dependencies_of(target) {
            let Some(&dependency) = live.get(&dependency) else {
                continue;
            };
            if dependency == target {
                continue;
            }
            deps.insert(dependency.clone());
            dependents.entry(dependency).or_default().insert(target);
        }
    }

    let mut caches = BTreeMap::new();
    for &target in &live {
        let mut cache = make_cache(target);
        for dependent in dependents.get(target).into_iter().flatten() {
            cache.add_dependent_cache(dependent);
        }
        caches.insert(target.clone(), cache);
    }

    debug!(targets = caches.len(), "built cache graph");
    CacheGraph {
        caches,
        dependencies,
    }
}

impl CacheGraph {
    /// Builds the graph, loading each cache from `store`.
    ///
    /// Caches that cannot be loaded start empty.
    pub fn load_or_create<D>(
        store: &dyn ByteStore,
        targets: &[TargetId],
        dependencies_of: D,
        policy: DiffPolicy,
    ) -> Self
    where
        D: FnMut(&TargetId) -> Vec<TargetId>,
    {
        make_incremental_caches(targets, dependencies_of, |target| {
            IncrementalCache::load_or_create(store, target.clone(), policy)
        })
    }

    /// Persists every cache.
    pub fn save_all(&self, store: &mut dyn ByteStore) -> Result<(), CacheError> {
        for cache in self.caches.values() {
            cache.save(store)?;
        }
        Ok(())
    }

    /// The cache of `target`.
    pub fn get(&self, target: &TargetId) -> Result<&IncrementalCache, CacheError> {
        self.caches.get(target).ok_or_else(|| unknown(target))
    }

    /// The cache of `target`, mutably.
    pub fn get_mut(&mut self, target: &TargetId) -> Result<&mut IncrementalCache, CacheError> {
        self.caches.get_mut(target).ok_or_else(|| unknown(target))
    }

    /// Finds a cache by normalized target key.
    pub fn by_key(&self, key: &str) -> Option<&IncrementalCache> {
        self.caches
            .iter()
            .find(|(target, _)| target.key() == key)
            .map(|(_, cache)| cache)
    }

    /// Returns `true` if `target` has a cache.
    pub fn contains(&self, target: &TargetId) -> bool {
        self.caches.contains_key(target)
    }

    /// All live targets, in key order.
    pub fn targets(&self) -> impl Iterator<Item = &TargetId> {
        self.caches.keys()
    }

    /// All caches, in target order.
    pub fn caches(&self) -> impl Iterator<Item = &IncrementalCache> {
        self.caches.values()
    }

    /// All caches, mutably, in target order.
    pub fn caches_mut(&mut self) -> impl Iterator<Item = &mut IncrementalCache> {
        self.caches.values_mut()
    }

    /// Number of caches.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Returns `true` if the graph has no targets.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Live dependencies of `target`.
    pub fn dependencies_of(&self, target: &TargetId) -> Result<&BTreeSet<TargetId>, CacheError> {
        self.dependencies.get(target).ok_or_else(|| unknown(target))
    }

    /// `target`'s cache followed by the caches of every transitive dependent.
    ///
    /// These are the caches that can declare subtypes of `target`'s classes.
    pub fn subtype_scope(&self, target: &TargetId) -> Result<Vec<&IncrementalCache>, CacheError> {
        let root = self.get(target)?;
        let mut seen = BTreeSet::from([target]);
        let mut queue = VecDeque::from([root]);
        let mut scope = Vec::new();
        while let Some(cache) = queue.pop_front() {
            scope.push(cache);
            for dependent in cache.dependents() {
                if seen.insert(dependent) {
                    queue.push_back(self.get(dependent)?);
                }
            }
        }
        Ok(scope)
    }

    /// Targets grouped into strongly connected chunks, dependencies first.
    ///
    /// Targets in a dependency cycle share a chunk; chunks are otherwise
    /// singletons. Order inside a chunk follows target order.
    pub fn update_order(&self) -> Vec<Vec<TargetId>> {
        let mut graph: DiGraph<&TargetId, ()> = DiGraph::new();
        let nodes: BTreeMap<&TargetId, NodeIndex> = self
            .caches
            .keys()
            .map(|target| (target, graph.add_node(target)))
            .collect();
        for (target, deps) in &self.dependencies {
            let Some(&from) = nodes.get(target) else {
                continue;
            };
            for dependency in deps {
                if let Some(&to) = nodes.get(dependency) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        // Edges point at dependencies and tarjan_scc yields sinks first.
        tarjan_scc(&graph)
            .into_iter()
            .map(|component| {
                let mut chunk: Vec<TargetId> =
                    component.into_iter().map(|n| graph[n].clone()).collect();
                chunk.sort();
                chunk
            })
            .collect()
    }
}

fn unknown(target: &TargetId) -> CacheError {
    CacheError::UnknownTarget {
        target: target.to_string(),
    }
}

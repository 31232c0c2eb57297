//! Driving the caches through one compilation round.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use ripple_common::TargetId;
use tracing::{debug, info};

use crate::cache::IncrementalCache;
use crate::change::CompilationResult;
use crate::descriptor::{Artifact, GeneratedFile};
use crate::error::CacheError;
use crate::graph::CacheGraph;
use crate::lookup::{LookupStorage, LookupSymbol, LookupTracker};
use crate::propagation::dirty_lookups;

/// Saves one round's outputs into the owning caches and returns everything
/// that changed.
///
/// Files are processed target by target, dependencies first, and in their
/// given order within a target. When the round compiled cleanly, classes that
/// were not produced again are then cleared from every live target.
///
/// `canceled` is checked between files; a save in progress always finishes.
/// On cancellation, or any other error, every cache is rolled back to its
/// state before the call, so retrying the round reports the same changes.
#[tracing::instrument(level = "debug", skip_all, fields(files = generated_files.len()))]
pub fn update_incremental_caches(
    graph: &mut CacheGraph,
    targets: &[TargetId],
    generated_files: &[GeneratedFile],
    compiled_with_errors: bool,
    canceled: &AtomicBool,
) -> Result<CompilationResult, CacheError> {
    in_round(graph, |graph| {
        save_round(graph, targets, generated_files, compiled_with_errors, canceled)
    })
}

/// Runs `body` as one undoable round over every cache of `graph`.
fn in_round<T, F>(graph: &mut CacheGraph, body: F) -> Result<T, CacheError>
where
    F: FnOnce(&mut CacheGraph) -> Result<T, CacheError>,
{
    for cache in graph.caches_mut() {
        cache.begin_round();
    }
    let outcome = body(graph);
    match &outcome {
        Ok(_) => graph.caches_mut().for_each(IncrementalCache::commit_round),
        Err(error) => {
            debug!(%error, "round failed, rolling back caches");
            graph.caches_mut().for_each(IncrementalCache::rollback_round);
        }
    }
    outcome
}

fn save_round(
    graph: &mut CacheGraph,
    targets: &[TargetId],
    generated_files: &[GeneratedFile],
    compiled_with_errors: bool,
    canceled: &AtomicBool,
) -> Result<CompilationResult, CacheError> {
    let mut by_target: BTreeMap<&TargetId, Vec<&GeneratedFile>> = BTreeMap::new();
    for file in generated_files {
        if !graph.contains(&file.target) {
            return Err(CacheError::UnknownTarget {
                target: file.target.to_string(),
            });
        }
        by_target.entry(&file.target).or_default().push(file);
    }

    let mut result = CompilationResult::NO_CHANGES;
    for chunk in graph.update_order() {
        for target in &chunk {
            let Some(files) = by_target.get(target) else {
                continue;
            };
            let cache = graph.get_mut(target)?;
            for file in files {
                if canceled.load(Ordering::Relaxed) {
                    return Err(CacheError::Cancelled);
                }
                result += save_generated_file(cache, file);
            }
        }
    }

    if !compiled_with_errors {
        for target in targets {
            if canceled.load(Ordering::Relaxed) {
                return Err(CacheError::Cancelled);
            }
            result += graph.get_mut(target)?.clear_cache_for_removed_classes();
        }
    } else {
        debug!("round had errors, keeping classes that were not regenerated");
    }

    Ok(result)
}

fn save_generated_file(cache: &mut IncrementalCache, file: &GeneratedFile) -> CompilationResult {
    match &file.artifact {
        Artifact::Class(class) => cache.save_file_to_cache(&file.source_files, class),
        Artifact::ModuleMapping(hash) => {
            cache.save_module_mapping_to_cache(&file.source_files, &file.output_file, *hash)
        }
        Artifact::Other => CompilationResult::NO_CHANGES,
    }
}

/// Everything the build reports about one finished compile.
#[derive(Debug, Clone, Copy)]
pub struct RoundInput<'a> {
    /// Outputs, already attributed to targets.
    pub generated_files: &'a [GeneratedFile],
    /// Sources compiled this round.
    pub compiled_files: &'a [PathBuf],
    /// Sources deleted since the previous round.
    pub removed_files: &'a [PathBuf],
    /// Whether the compiler reported errors.
    pub compiled_with_errors: bool,
    /// Lookups recorded during the compile; `None` when tracking is disabled.
    pub tracker: Option<&'a LookupTracker>,
}

/// What one round left to do.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Changes observed this round.
    pub result: CompilationResult,
    /// Lookups invalidated by those changes.
    pub dirty_lookups: BTreeSet<LookupSymbol>,
    /// Files to recompile next round.
    pub dirty_files: BTreeSet<PathBuf>,
}

/// Runs the cache side of a round: dirty marking, cache updates, lookup
/// index maintenance, and propagation.
///
/// The lookup index is only rewritten for rounds without errors, so a failed
/// compile never replaces good lookups with partial ones. Removed files are
/// purged from it in every round. If the round fails or is canceled, the
/// caches are left as they were before the call.
pub fn complete_round(
    graph: &mut CacheGraph,
    storage: &mut LookupStorage,
    input: RoundInput<'_>,
    canceled: &AtomicBool,
) -> Result<RoundOutcome, CacheError> {
    let targets: Vec<TargetId> = graph.targets().cloned().collect();
    let touched: Vec<&Path> = input
        .compiled_files
        .iter()
        .chain(input.removed_files)
        .map(PathBuf::as_path)
        .collect();

    let result = in_round(graph, |graph| {
        for target in &targets {
            graph.get_mut(target)?.mark_sources_dirty(touched.iter().copied());
        }
        let result = save_round(
            graph,
            &targets,
            input.generated_files,
            input.compiled_with_errors,
            canceled,
        )?;
        update_lookups(storage, &input)?;
        Ok(result)
    })?;

    let caches: Vec<&IncrementalCache> = graph.caches().collect();
    let dirty_lookups = dirty_lookups(&result, &caches);
    let removed: BTreeSet<&Path> = input.removed_files.iter().map(PathBuf::as_path).collect();
    let dirty_files: BTreeSet<PathBuf> = storage
        .files_for(&dirty_lookups)
        .into_iter()
        .filter(|file| !removed.contains(file.as_path()))
        .collect();

    let summary = result.summary();
    info!(
        signature_changes = summary.signature_changes,
        member_changes = summary.member_changes,
        dirty_lookups = dirty_lookups.len(),
        dirty_files = dirty_files.len(),
        "round complete"
    );

    Ok(RoundOutcome {
        result,
        dirty_lookups,
        dirty_files,
    })
}

fn update_lookups(storage: &mut LookupStorage, input: &RoundInput<'_>) -> Result<(), CacheError> {
    let removed = input.removed_files.iter().map(PathBuf::as_path);
    match input.tracker {
        Some(tracker) if !input.compiled_with_errors => storage.update(
            tracker,
            input.compiled_files.iter().map(PathBuf::as_path),
            removed,
        ),
        _ => {
            storage.remove_files(removed);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ClassDescriptor, MemberDescriptor};
    use crate::graph::make_incremental_caches;
    use crate::ChangeInfo;
    use ripple_common::{ContentHash, FqName};
    use ripple_config::DiffPolicy;
    use std::fmt;
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing::{span, Event, Metadata, Subscriber};

    fn t(name: &str) -> TargetId {
        TargetId::production(name)
    }

    fn graph() -> CacheGraph {
        make_incremental_caches(
            &[t("a"), t("b")],
            |target: &TargetId| {
                if target.name == "b" {
                    vec![t("a")]
                } else {
                    Vec::new()
                }
            },
            |target| IncrementalCache::new(target.clone(), DiffPolicy::default()),
        )
    }

    fn class_file(target: &str, source: &str, class: ClassDescriptor) -> GeneratedFile {
        GeneratedFile {
            target: t(target),
            source_files: vec![PathBuf::from(source)],
            output_file: PathBuf::from(format!("out/{target}/{}.class", class.fq_name)),
            artifact: Artifact::Class(class),
        }
    }

    fn not_canceled() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn dispatches_by_artifact_kind() {
        let mut graph = graph();
        let files = vec![
            class_file("a", "A.kt", ClassDescriptor::new("p.A")),
            GeneratedFile {
                target: t("a"),
                source_files: vec![PathBuf::from("A.kt")],
                output_file: PathBuf::from("out/a/META-INF/a.kotlin_module"),
                artifact: Artifact::ModuleMapping(ContentHash::from_bytes(b"m")),
            },
            GeneratedFile {
                target: t("a"),
                source_files: vec![],
                output_file: PathBuf::from("out/a/res.txt"),
                artifact: Artifact::Other,
            },
        ];
        let result =
            update_incremental_caches(&mut graph, &[t("a"), t("b")], &files, false, &not_canceled())
                .unwrap();
        assert_eq!(result.summary().unpropagated, 2);
        assert!(graph.get(&t("a")).unwrap().contains_class(&FqName::new("p.A")));
        assert!(graph
            .get(&t("a"))
            .unwrap()
            .module_mapping(Path::new("out/a/META-INF/a.kotlin_module"))
            .is_some());
    }

    #[test]
    fn unknown_owner_fails_before_saving() {
        let mut graph = graph();
        let files = vec![
            class_file("a", "A.kt", ClassDescriptor::new("p.A")),
            class_file("zzz", "Z.kt", ClassDescriptor::new("p.Z")),
        ];
        let err = update_incremental_caches(&mut graph, &[t("a")], &files, false, &not_canceled())
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownTarget { .. }));
        assert_eq!(graph.get(&t("a")).unwrap().class_count(), 0);
    }

    #[test]
    fn canceled_round_stops() {
        let mut graph = graph();
        let files = vec![class_file("a", "A.kt", ClassDescriptor::new("p.A"))];
        let canceled = AtomicBool::new(true);
        let err =
            update_incremental_caches(&mut graph, &[t("a")], &files, false, &canceled).unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
        assert_eq!(graph.get(&t("a")).unwrap().class_count(), 0);
    }

    /// Raises `flag` as soon as the cache reports saving `class`.
    struct CancelAfterSave {
        class: &'static str,
        flag: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct EventFields {
        message: String,
        class: String,
    }

    impl Visit for EventFields {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            match field.name() {
                "message" => self.message = format!("{value:?}"),
                "class" => self.class = format!("{value:?}"),
                _ => {}
            }
        }
    }

    impl Subscriber for CancelAfterSave {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &span::Attributes<'_>) -> span::Id {
            span::Id::from_u64(1)
        }

        fn record(&self, _: &span::Id, _: &span::Record<'_>) {}

        fn record_follows_from(&self, _: &span::Id, _: &span::Id) {}

        fn event(&self, event: &Event<'_>) {
            let mut fields = EventFields::default();
            event.record(&mut fields);
            if fields.message == "saved class" && fields.class == self.class {
                self.flag.store(true, Ordering::Relaxed);
            }
        }

        fn enter(&self, _: &span::Id) {}

        fn exit(&self, _: &span::Id) {}
    }

    fn base(foo_signature: &str) -> ClassDescriptor {
        ClassDescriptor::new("p.Base")
            .open()
            .with_member(MemberDescriptor::function("foo", foo_signature).open())
    }

    #[test]
    fn canceled_round_is_reported_again_on_retry() {
        let mut graph = graph();
        let mut storage = LookupStorage::new();
        let mut tracker = LookupTracker::recording();
        tracker.record(Path::new("Main.kt"), "p.Base", "foo");
        let compiled = vec![PathBuf::from("Base.kt"), PathBuf::from("Main.kt")];
        complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &[class_file("a", "Base.kt", base("(): Int"))],
                compiled_files: &compiled,
                removed_files: &[],
                compiled_with_errors: false,
                tracker: Some(&tracker),
            },
            &not_canceled(),
        )
        .unwrap();

        let files = vec![
            class_file("a", "Base.kt", base("(): Long")),
            class_file("b", "Other.kt", ClassDescriptor::new("q.Other")),
        ];
        let tracker = LookupTracker::recording();
        let input = RoundInput {
            generated_files: &files,
            compiled_files: &[PathBuf::from("Base.kt"), PathBuf::from("Other.kt")],
            removed_files: &[],
            compiled_with_errors: false,
            tracker: Some(&tracker),
        };

        let canceled = Arc::new(AtomicBool::new(false));
        let subscriber = CancelAfterSave {
            class: "p.Base",
            flag: Arc::clone(&canceled),
        };
        let err = tracing::subscriber::with_default(subscriber, || {
            complete_round(&mut graph, &mut storage, input, &canceled)
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
        assert!(canceled.load(Ordering::Relaxed));
        assert!(!graph.get(&t("b")).unwrap().contains_class(&FqName::new("q.Other")));

        let outcome = complete_round(&mut graph, &mut storage, input, &not_canceled()).unwrap();
        assert_eq!(outcome.result.summary().signature_changes, 1);
        assert!(outcome
            .result
            .changes()
            .iter()
            .any(|change| change.fq_name() == Some(&FqName::new("p.Base"))));
        assert!(outcome.dirty_files.contains(Path::new("Main.kt")));
    }

    #[test]
    fn failed_clear_rolls_back_saved_classes() {
        let mut graph = graph();
        let files = vec![class_file("a", "A.kt", ClassDescriptor::new("p.A"))];
        let err = update_incremental_caches(
            &mut graph,
            &[t("a"), t("ghost")],
            &files,
            false,
            &not_canceled(),
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::UnknownTarget { .. }));
        assert_eq!(graph.get(&t("a")).unwrap().class_count(), 0);

        let result =
            update_incremental_caches(&mut graph, &[t("a")], &files, false, &not_canceled())
                .unwrap();
        assert_eq!(result.summary().unpropagated, 1);
    }

    #[test]
    fn error_round_purges_removed_files_from_lookups() {
        let mut graph = graph();
        let mut storage = LookupStorage::new();
        let mut tracker = LookupTracker::recording();
        tracker.record(Path::new("Gone.kt"), "p", "Base");
        tracker.record(Path::new("Stay.kt"), "p", "Base");
        let compiled = vec![PathBuf::from("Gone.kt"), PathBuf::from("Stay.kt")];
        complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &[class_file("a", "Gone.kt", ClassDescriptor::new("p.Gone"))],
                compiled_files: &compiled,
                removed_files: &[],
                compiled_with_errors: false,
                tracker: Some(&tracker),
            },
            &not_canceled(),
        )
        .unwrap();

        let tracker = LookupTracker::recording();
        let outcome = complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &[],
                compiled_files: &[],
                removed_files: &[PathBuf::from("Gone.kt")],
                compiled_with_errors: true,
                tracker: Some(&tracker),
            },
            &not_canceled(),
        )
        .unwrap();

        assert!(outcome.result.is_empty());
        assert!(storage.lookups_of(Path::new("Gone.kt")).is_empty());
        assert_eq!(
            storage.get(&LookupSymbol::new("Base", "p")),
            [PathBuf::from("Stay.kt")].into_iter().collect()
        );
        assert!(graph.get(&t("a")).unwrap().contains_class(&FqName::new("p.Gone")));
    }

    #[test]
    fn error_round_keeps_unregenerated_classes() {
        let mut graph = graph();
        let files = vec![class_file("a", "A.kt", ClassDescriptor::new("p.A"))];
        update_incremental_caches(&mut graph, &[t("a")], &files, false, &not_canceled()).unwrap();

        graph
            .get_mut(&t("a"))
            .unwrap()
            .mark_sources_dirty([Path::new("A.kt")]);
        let result =
            update_incremental_caches(&mut graph, &[t("a")], &[], true, &not_canceled()).unwrap();
        assert!(result.is_empty());
        assert!(graph.get(&t("a")).unwrap().contains_class(&FqName::new("p.A")));

        let result =
            update_incremental_caches(&mut graph, &[t("a")], &[], false, &not_canceled()).unwrap();
        assert_eq!(
            result.changes(),
            &[ChangeInfo::SignatureChanged {
                fq_name: FqName::new("p.A"),
                are_subclasses_affected: true,
            }]
        );
    }

    #[test]
    fn complete_round_reports_dirty_files() {
        let mut graph = graph();
        let mut storage = LookupStorage::new();
        let base = ClassDescriptor::new("p.Base")
            .open()
            .with_member(MemberDescriptor::function("foo", "(): Int").open());
        let sub = ClassDescriptor::new("q.Sub")
            .with_supertype("p.Base")
            .with_member(MemberDescriptor::function("foo", "(): Int"));

        let mut tracker = LookupTracker::recording();
        tracker.record(Path::new("Sub.kt"), "p", "Base");
        tracker.record(Path::new("Main.kt"), "q.Sub", "foo");
        let files = vec![
            class_file("a", "Base.kt", base.clone()),
            class_file("b", "Sub.kt", sub),
        ];
        let compiled: Vec<PathBuf> = ["Base.kt", "Sub.kt", "Main.kt"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &files,
                compiled_files: &compiled,
                removed_files: &[],
                compiled_with_errors: false,
                tracker: Some(&tracker),
            },
            &not_canceled(),
        )
        .unwrap();

        let mut changed = base;
        changed.members[0].signature = "(): Long".to_string();
        let files = vec![class_file("a", "Base.kt", changed)];
        let tracker = LookupTracker::recording();
        let outcome = complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &files,
                compiled_files: &[PathBuf::from("Base.kt")],
                removed_files: &[],
                compiled_with_errors: false,
                tracker: Some(&tracker),
            },
            &not_canceled(),
        )
        .unwrap();

        assert!(outcome
            .dirty_lookups
            .contains(&LookupSymbol::new("foo", "q.Sub")));
        assert!(outcome.dirty_files.contains(Path::new("Main.kt")));
        assert!(outcome.dirty_files.contains(Path::new("Sub.kt")));
    }

    #[test]
    fn disabled_tracking_skips_lookup_index() {
        let mut graph = graph();
        let mut storage = LookupStorage::new();
        let files = vec![class_file("a", "A.kt", ClassDescriptor::new("p.A"))];
        let outcome = complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &files,
                compiled_files: &[PathBuf::from("A.kt")],
                removed_files: &[],
                compiled_with_errors: false,
                tracker: None,
            },
            &not_canceled(),
        )
        .unwrap();
        assert!(storage.is_empty());
        assert!(outcome.dirty_files.is_empty());
    }

    #[test]
    fn non_recording_tracker_is_fatal() {
        let mut graph = graph();
        let mut storage = LookupStorage::new();
        let err = complete_round(
            &mut graph,
            &mut storage,
            RoundInput {
                generated_files: &[],
                compiled_files: &[],
                removed_files: &[],
                compiled_with_errors: false,
                tracker: Some(&LookupTracker::DoNothing),
            },
            &not_canceled(),
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::LookupTrackerState { .. }));
    }
}

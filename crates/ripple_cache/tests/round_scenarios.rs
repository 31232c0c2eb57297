//! Multi-round scenarios over an on-disk cache directory.
//!
//! Each test opens a session, feeds it compiler outputs and lookups, saves,
//! and reopens it to check what the next round must recompile.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use ripple_cache::{
    CacheError, CacheSession, ChangeInfo, ClassDescriptor, GeneratedFile, LookupSymbol,
    LookupTracker, MemberDescriptor, OutputItem, RoundOutcome,
};
use ripple_common::{FqName, TargetId};
use ripple_config::{load_config_from_str, RippleConfig};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers: a two-target project, `app` depending on `core`
// ---------------------------------------------------------------------------

fn core() -> TargetId {
    TargetId::production("core")
}

fn app() -> TargetId {
    TargetId::production("app")
}

fn dependencies(target: &TargetId) -> Vec<TargetId> {
    if *target == app() {
        vec![core()]
    } else {
        Vec::new()
    }
}

fn sources(target: &TargetId) -> Vec<PathBuf> {
    match target.name.as_str() {
        "core" => vec![PathBuf::from("core/Base.kt")],
        "app" => vec![
            PathBuf::from("app/Sub.kt"),
            PathBuf::from("app/Main.kt"),
        ],
        _ => Vec::new(),
    }
}

fn output_dir(target: &TargetId) -> Option<PathBuf> {
    Some(PathBuf::from(format!("out/{}", target.name)))
}

fn open(dir: &TempDir, config: RippleConfig) -> CacheSession {
    CacheSession::open(dir.path(), config, &[core(), app()], dependencies)
}

fn base(foo_signature: &str) -> ClassDescriptor {
    ClassDescriptor::new("p.Base")
        .open()
        .with_member(MemberDescriptor::function("foo", foo_signature).open())
}

fn sub(foo_signature: &str) -> ClassDescriptor {
    ClassDescriptor::new("p.Sub")
        .with_supertype("p.Base")
        .with_member(MemberDescriptor::function("foo", foo_signature))
}

fn class_output(source: &str, output: &str, class: ClassDescriptor) -> OutputItem {
    OutputItem::new(vec![PathBuf::from(source)], output, b"bytes").with_class(class)
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

struct Round<'a> {
    outputs: Vec<OutputItem>,
    compiled: &'a [&'a str],
    removed: &'a [&'a str],
    with_errors: bool,
    tracker: LookupTracker,
}

fn run(session: &mut CacheSession, round: Round<'_>) -> Result<RoundOutcome, CacheError> {
    let generated: Vec<GeneratedFile> =
        session.attribute(&round.outputs, &core(), sources, output_dir)?;
    let outcome = session.complete_round(
        &generated,
        &paths(round.compiled),
        &paths(round.removed),
        round.with_errors,
        &round.tracker,
        &AtomicBool::new(false),
    )?;
    session.save()?;
    Ok(outcome)
}

/// Compiles everything once: `Sub.kt` resolves `Base`, `Main.kt` calls
/// `Sub().foo()`.
fn initial_build(dir: &TempDir) {
    let mut session = open(dir, RippleConfig::default());
    let mut tracker = session.tracker();
    tracker.record(Path::new("app/Sub.kt"), "p", "Base");
    tracker.record(Path::new("app/Main.kt"), "p", "Sub");
    tracker.record(Path::new("app/Main.kt"), "p.Sub", "foo");

    let outcome = run(
        &mut session,
        Round {
            outputs: vec![
                class_output("core/Base.kt", "out/core/p/Base.class", base("(): Int")),
                class_output("app/Sub.kt", "out/app/p/Sub.class", sub("(): Int")),
                OutputItem::new(
                    paths(&["core/Base.kt"]),
                    "out/core/META-INF/core.kotlin_module",
                    b"core-mapping",
                ),
            ],
            compiled: &["core/Base.kt", "app/Sub.kt", "app/Main.kt"],
            removed: &[],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();
    assert!(outcome.dirty_files.is_empty());
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn signature_change_reaches_subclass_in_dependent_target() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);

    let mut session = open(&dir, RippleConfig::default());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: vec![class_output(
                "core/Base.kt",
                "out/core/p/Base.class",
                base("(): Long"),
            )],
            compiled: &["core/Base.kt"],
            removed: &[],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();

    assert!(outcome
        .dirty_lookups
        .contains(&LookupSymbol::new("foo", "p.Base")));
    assert!(outcome
        .dirty_lookups
        .contains(&LookupSymbol::new("foo", "p.Sub")));
    assert!(outcome.dirty_files.contains(Path::new("app/Main.kt")));
    assert!(outcome.dirty_files.contains(Path::new("app/Sub.kt")));
}

#[test]
fn body_only_change_recompiles_nothing() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);

    let mut session = open(&dir, RippleConfig::default());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: vec![class_output(
                "core/Base.kt",
                "out/core/p/Base.class",
                base("(): Int").with_body(b"return 42"),
            )],
            compiled: &["core/Base.kt"],
            removed: &[],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();

    assert_eq!(outcome.result.summary().unpropagated, 1);
    assert!(outcome.dirty_lookups.is_empty());
    assert!(outcome.dirty_files.is_empty());
}

#[test]
fn removed_source_invalidates_users_of_its_class() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);

    let mut session = open(&dir, RippleConfig::default());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: Vec::new(),
            compiled: &[],
            removed: &["app/Sub.kt"],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();

    assert!(outcome.result.changes().contains(&ChangeInfo::SignatureChanged {
        fq_name: FqName::new("p.Sub"),
        are_subclasses_affected: true,
    }));
    assert!(outcome.dirty_files.contains(Path::new("app/Main.kt")));
    assert!(!outcome.dirty_files.contains(Path::new("app/Sub.kt")));
    assert!(!session
        .graph()
        .get(&app())
        .unwrap()
        .contains_class(&FqName::new("p.Sub")));
    assert!(session.lookups().lookups_of(Path::new("app/Sub.kt")).is_empty());
}

#[test]
fn error_round_keeps_classes_and_lookups() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);

    let mut session = open(&dir, RippleConfig::default());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: Vec::new(),
            compiled: &["app/Sub.kt"],
            removed: &[],
            with_errors: true,
            tracker,
        },
    )
    .unwrap();

    assert!(outcome.result.is_empty());
    let session = open(&dir, RippleConfig::default());
    assert!(session
        .graph()
        .get(&app())
        .unwrap()
        .contains_class(&FqName::new("p.Sub")));
    assert_eq!(
        session.lookups().lookups_of(Path::new("app/Sub.kt")),
        [LookupSymbol::new("Base", "p")].into_iter().collect()
    );
}

#[test]
fn removal_during_error_round_is_applied_after_reopen() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);

    let mut session = open(&dir, RippleConfig::default());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: Vec::new(),
            compiled: &["app/Main.kt"],
            removed: &["app/Sub.kt"],
            with_errors: true,
            tracker,
        },
    )
    .unwrap();
    assert!(outcome.result.is_empty());
    assert!(session.lookups().lookups_of(Path::new("app/Sub.kt")).is_empty());

    let mut session = open(&dir, RippleConfig::default());
    assert!(session.lookups().lookups_of(Path::new("app/Sub.kt")).is_empty());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: Vec::new(),
            compiled: &[],
            removed: &[],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();
    assert!(outcome.result.changes().contains(&ChangeInfo::SignatureChanged {
        fq_name: FqName::new("p.Sub"),
        are_subclasses_affected: true,
    }));
    assert!(outcome.dirty_files.contains(Path::new("app/Main.kt")));
    assert!(!outcome.dirty_files.contains(Path::new("app/Sub.kt")));
    assert!(!session
        .graph()
        .get(&app())
        .unwrap()
        .contains_class(&FqName::new("p.Sub")));

    let mut session = open(&dir, RippleConfig::default());
    let tracker = session.tracker();
    let outcome = run(
        &mut session,
        Round {
            outputs: vec![class_output(
                "core/Base.kt",
                "out/core/p/Base.class",
                base("(): Long"),
            )],
            compiled: &["core/Base.kt"],
            removed: &[],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();
    assert!(!outcome.result.is_empty());
    assert!(!outcome.dirty_files.contains(Path::new("app/Sub.kt")));
}

#[test]
fn module_mapping_survives_reopen() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);

    let session = open(&dir, RippleConfig::default());
    let mapping = session
        .graph()
        .get(&core())
        .unwrap()
        .module_mapping(Path::new("out/core/META-INF/core.kotlin_module"));
    assert!(mapping.is_some());
}

#[test]
fn corrupt_cache_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);
    let blob = dir
        .path()
        .join(".ripple-cache")
        .join("caches")
        .join("core-production.bin");
    assert!(blob.exists());
    std::fs::write(&blob, b"garbage").unwrap();

    let session = open(&dir, RippleConfig::default());
    assert_eq!(session.graph().get(&core()).unwrap().class_count(), 0);
    assert_eq!(session.graph().get(&app()).unwrap().class_count(), 1);
}

#[test]
fn disabled_lookups_leave_index_untouched() {
    let dir = TempDir::new().unwrap();
    initial_build(&dir);
    let config = load_config_from_str("[lookups]\nenabled = false\n").unwrap();

    let mut session = open(&dir, config);
    let tracker = session.tracker();
    assert!(tracker.recorder().is_none());
    run(
        &mut session,
        Round {
            outputs: Vec::new(),
            compiled: &["app/Main.kt"],
            removed: &[],
            with_errors: false,
            tracker,
        },
    )
    .unwrap();
    assert!(!session
        .lookups()
        .lookups_of(Path::new("app/Main.kt"))
        .is_empty());
}

#[test]
fn unknown_owner_is_an_integration_error() {
    let dir = TempDir::new().unwrap();
    let mut session = open(&dir, RippleConfig::default());
    let generated = vec![GeneratedFile {
        target: TargetId::production("ghost"),
        source_files: paths(&["ghost/G.kt"]),
        output_file: PathBuf::from("out/ghost/G.class"),
        artifact: ripple_cache::Artifact::Class(ClassDescriptor::new("g.G")),
    }];
    let err = session
        .complete_round(
            &generated,
            &[],
            &[],
            false,
            &LookupTracker::recording(),
            &AtomicBool::new(false),
        )
        .unwrap_err();
    assert!(matches!(err, CacheError::UnknownTarget { .. }));
}

//! Assigning compiler outputs to the targets that own them.
//!
//! When several targets are compiled together the compiler reports a flat
//! list of outputs. Attribution is a best-effort heuristic: first source file,
//! then output directory, then a representative target. It never fails on
//! ambiguity.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ripple_common::{ContentHash, TargetId};
use ripple_config::OutputSettings;
use tracing::debug;

use crate::descriptor::{Artifact, ClassDescriptor, GeneratedFile};
use crate::error::CacheError;

/// One output reported by the compiler front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputItem {
    /// Source files that produced the output, primary source first.
    pub source_files: Vec<PathBuf>,
    /// Path of the written output.
    pub output_file: PathBuf,
    /// Summary of the class, when the output is a compiled class.
    pub class: Option<ClassDescriptor>,
    /// Hash of the output contents.
    pub content_hash: ContentHash,
}

impl OutputItem {
    /// An output with no class summary.
    pub fn new(
        source_files: Vec<PathBuf>,
        output_file: impl Into<PathBuf>,
        contents: &[u8],
    ) -> Self {
        Self {
            source_files,
            output_file: output_file.into(),
            class: None,
            content_hash: ContentHash::from_bytes(contents),
        }
    }

    /// Attaches a class summary.
    pub fn with_class(mut self, class: ClassDescriptor) -> Self {
        self.class = Some(class);
        self
    }
}

/// Attributes every output item to a target and classifies its contents.
///
/// With one target everything belongs to it. Otherwise the first source file
/// decides; failing that, the single target whose output directory contains
/// the output; failing that, `representative`.
pub fn generated_files<S, O>(
    items: &[OutputItem],
    targets: &[TargetId],
    representative: &TargetId,
    mut sources_of: S,
    mut output_dir_of: O,
    settings: &OutputSettings,
) -> Result<Vec<GeneratedFile>, CacheError>
where
    S: FnMut(&TargetId) -> Vec<PathBuf>,
    O: FnMut(&TargetId) -> Option<PathBuf>,
{
    let mut source_to_target: BTreeMap<PathBuf, &TargetId> = BTreeMap::new();
    let mut output_dirs: Vec<(&TargetId, PathBuf)> = Vec::new();
    if targets.len() > 1 {
        for target in targets {
            for source in sources_of(target) {
                source_to_target.insert(source, target);
            }
            if let Some(dir) = output_dir_of(target) {
                output_dirs.push((target, dir));
            }
        }
    }

    let mut files = Vec::with_capacity(items.len());
    for item in items {
        let target = if targets.len() > 1 {
            owner(item, &source_to_target, &output_dirs).unwrap_or(representative)
        } else {
            targets.first().unwrap_or(representative)
        };
        files.push(GeneratedFile {
            target: target.clone(),
            source_files: item.source_files.clone(),
            output_file: item.output_file.clone(),
            artifact: classify(item, settings)?,
        });
    }
    Ok(files)
}

fn owner<'t>(
    item: &OutputItem,
    source_to_target: &BTreeMap<PathBuf, &'t TargetId>,
    output_dirs: &[(&'t TargetId, PathBuf)],
) -> Option<&'t TargetId> {
    if let Some(&target) = item
        .source_files
        .first()
        .and_then(|source| source_to_target.get(source))
    {
        return Some(target);
    }

    let mut containing = output_dirs
        .iter()
        .filter(|(_, dir)| item.output_file.starts_with(dir))
        .map(|(target, _)| *target);
    match (containing.next(), containing.next()) {
        (Some(target), None) => Some(target),
        _ => {
            debug!(
                output = %item.output_file.display(),
                "no unique owner, using representative target"
            );
            None
        }
    }
}

fn classify(item: &OutputItem, settings: &OutputSettings) -> Result<Artifact, CacheError> {
    let extension = item.output_file.extension().and_then(|e| e.to_str());
    if extension == Some(settings.class_extension.as_str()) {
        let class = item
            .class
            .clone()
            .ok_or_else(|| CacheError::MissingClassDescriptor {
                path: item.output_file.clone(),
            })?;
        return Ok(Artifact::Class(class));
    }
    if extension == Some(settings.module_mapping_extension.as_str()) {
        return Ok(Artifact::ModuleMapping(item.content_hash));
    }
    Ok(Artifact::Other)
}

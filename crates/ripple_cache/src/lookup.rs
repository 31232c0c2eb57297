//! Lookup recording and the persistent reverse lookup index.
//!
//! While a round compiles, the front end reports every name it resolves as a
//! `(file, scope, name)` triple to a [`LookupTracker`]. After the round,
//! [`LookupStorage::update`] replaces the stored lookups of every recompiled
//! or removed file with the fresh recordings. Translating dirty symbols back
//! to files is then a map lookup.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use ripple_common::{Ident, Interner};
use ripple_config::LookupSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::{read_blob, write_blob, LOOKUP_BLOB};
use crate::error::CacheError;
use crate::store::ByteStore;

/// Store key of the lookup index blob.
pub const LOOKUP_STORE_KEY: &str = "lookups";

/// "Some file looked up `name` inside `scope`."
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct LookupSymbol {
    /// Unqualified name of the referenced member or type.
    pub name: String,
    /// Fully-qualified enclosing scope; empty for the root package.
    pub scope: String,
}

impl LookupSymbol {
    /// Creates a symbol.
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for LookupSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.scope, self.name)
        }
    }
}

/// A file as seen by the recorder.
///
/// UTF-8 paths go through the interner; anything else is kept verbatim in a
/// side table so it can still be matched exactly when the file is removed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
enum RecordedFile {
    Interned(Ident),
    Raw(usize),
}

/// Lookups recorded during one round, with interned file paths.
#[derive(Default)]
pub struct LookupRecorder {
    paths: Interner,
    raw_paths: Vec<PathBuf>,
    lookups: HashMap<LookupSymbol, BTreeSet<RecordedFile>>,
}

impl LookupRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `file` looked up `name` in `scope`.
    pub fn record(&mut self, file: &Path, scope: &str, name: &str) {
        let file = match file.to_str() {
            Some(utf8) => RecordedFile::Interned(self.paths.get_or_intern(utf8)),
            None => RecordedFile::Raw(self.raw_index(file)),
        };
        self.lookups
            .entry(LookupSymbol::new(name, scope))
            .or_default()
            .insert(file);
    }

    /// Number of distinct recorded symbols.
    pub fn symbol_count(&self) -> usize {
        self.lookups.len()
    }

    /// Number of distinct referencing files.
    pub fn file_count(&self) -> usize {
        self.paths.len() + self.raw_paths.len()
    }

    /// Iterates over every recorded `(symbol, file)` pair.
    pub fn entries(&self) -> impl Iterator<Item = (&LookupSymbol, &Path)> + '_ {
        self.lookups.iter().flat_map(move |(symbol, files)| {
            files
                .iter()
                .filter_map(move |file| self.path_of(*file).map(|path| (symbol, path)))
        })
    }

    fn raw_index(&mut self, file: &Path) -> usize {
        if let Some(index) = self.raw_paths.iter().position(|raw| raw == file) {
            return index;
        }
        self.raw_paths.push(file.to_path_buf());
        self.raw_paths.len() - 1
    }

    fn path_of(&self, file: RecordedFile) -> Option<&Path> {
        match file {
            RecordedFile::Interned(ident) => Some(Path::new(self.paths.resolve(ident))),
            RecordedFile::Raw(index) => self.raw_paths.get(index).map(PathBuf::as_path),
        }
    }
}

impl fmt::Debug for LookupRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupRecorder")
            .field("symbols", &self.symbol_count())
            .field("files", &self.file_count())
            .finish()
    }
}

/// The tracker handed to the compiler front end for one round.
#[derive(Debug)]
pub enum LookupTracker {
    /// Discards every lookup. Builds using it cannot update a lookup index.
    DoNothing,
    /// Records every lookup.
    Recording(LookupRecorder),
}

impl LookupTracker {
    /// A fresh recording tracker.
    pub fn recording() -> Self {
        Self::Recording(LookupRecorder::new())
    }

    /// A recording tracker when lookups are enabled, otherwise `DoNothing`.
    pub fn from_settings(settings: &LookupSettings) -> Self {
        if settings.enabled {
            Self::recording()
        } else {
            Self::DoNothing
        }
    }

    /// Records a lookup; a no-op for `DoNothing`.
    pub fn record(&mut self, file: &Path, scope: &str, name: &str) {
        if let Self::Recording(recorder) = self {
            recorder.record(file, scope, name);
        }
    }

    /// Returns the recorder, if recording.
    pub fn recorder(&self) -> Option<&LookupRecorder> {
        match self {
            Self::Recording(recorder) => Some(recorder),
            Self::DoNothing => None,
        }
    }
}

/// Persistent file identity inside the lookup index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
struct FileId(u32);

/// On-disk form of [`LookupStorage`]; the reverse indexes are rebuilt on load.
///
/// Paths are stored as `OsString` so that non-UTF-8 file names persist.
#[derive(Serialize, Deserialize)]
struct LookupSnapshot {
    next_file_id: u32,
    paths: Vec<(FileId, OsString)>,
    lookups: Vec<(LookupSymbol, Vec<FileId>)>,
}

/// Persistent multimap from [`LookupSymbol`] to the files that looked it up.
///
/// File paths are interned into a table of [`FileId`]s so that a path is
/// stored once no matter how many symbols reference it. Ids of recompiled
/// files are stable across rounds; removed files leave the table.
#[derive(Debug, Default)]
pub struct LookupStorage {
    next_file_id: u32,
    paths: BTreeMap<FileId, PathBuf>,
    ids: HashMap<PathBuf, FileId>,
    lookups: BTreeMap<LookupSymbol, BTreeSet<FileId>>,
    by_file: HashMap<FileId, BTreeSet<LookupSymbol>>,
}

impl LookupStorage {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the index from `store`; an absent blob yields an empty index.
    pub fn load(store: &dyn ByteStore) -> Result<Self, CacheError> {
        let Some(snapshot) = read_blob::<LookupSnapshot>(store, LOOKUP_BLOB, LOOKUP_STORE_KEY)?
        else {
            return Ok(Self::new());
        };

        let mut storage = Self {
            next_file_id: snapshot.next_file_id,
            ..Self::default()
        };
        for (id, path) in snapshot.paths {
            let path = PathBuf::from(path);
            if id.0 >= storage.next_file_id {
                return Err(CacheError::Serialization {
                    reason: format!("{LOOKUP_STORE_KEY}: file id {} out of range", id.0),
                });
            }
            storage.ids.insert(path.clone(), id);
            storage.paths.insert(id, path);
        }
        for (symbol, files) in snapshot.lookups {
            for file in files {
                if !storage.paths.contains_key(&file) {
                    return Err(CacheError::Serialization {
                        reason: format!("{LOOKUP_STORE_KEY}: dangling file id {}", file.0),
                    });
                }
                storage.insert(symbol.clone(), file);
            }
        }
        Ok(storage)
    }

    /// Loads the index, starting from empty if the stored blob cannot be trusted.
    pub fn load_or_create(store: &dyn ByteStore) -> Self {
        Self::load(store).unwrap_or_else(|error| {
            warn!(%error, "discarding lookup index");
            Self::new()
        })
    }

    /// Persists the index to `store`.
    pub fn save(&self, store: &mut dyn ByteStore) -> Result<(), CacheError> {
        let snapshot = LookupSnapshot {
            next_file_id: self.next_file_id,
            paths: self
                .paths
                .iter()
                .map(|(id, path)| (*id, path.as_os_str().to_os_string()))
                .collect(),
            lookups: self
                .lookups
                .iter()
                .map(|(symbol, files)| (symbol.clone(), files.iter().copied().collect()))
                .collect(),
        };
        write_blob(store, LOOKUP_BLOB, LOOKUP_STORE_KEY, &snapshot)
    }

    /// Replaces the lookups of every compiled or removed file with this
    /// round's recordings.
    ///
    /// Fails with [`CacheError::LookupTrackerState`] if the tracker did not
    /// record: continuing would silently leave stale lookups behind.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn update<'a, C, R>(
        &mut self,
        tracker: &LookupTracker,
        files_to_compile: C,
        removed_files: R,
    ) -> Result<(), CacheError>
    where
        C: IntoIterator<Item = &'a Path>,
        R: IntoIterator<Item = &'a Path>,
    {
        let recorder = tracker
            .recorder()
            .ok_or_else(|| CacheError::LookupTrackerState {
                reason: "expected a recording tracker, got DoNothing".to_string(),
            })?;

        self.remove_lookups_from(files_to_compile);
        self.remove_files(removed_files);
        self.add_all(recorder);

        debug!(
            symbols = self.lookups.len(),
            files = self.paths.len(),
            "lookup index updated"
        );
        Ok(())
    }

    /// Removes every stored lookup made by the given files.
    pub fn remove_lookups_from<'a, I>(&mut self, files: I)
    where
        I: IntoIterator<Item = &'a Path>,
    {
        for file in files {
            let Some(id) = self.ids.get(file).copied() else {
                continue;
            };
            let Some(symbols) = self.by_file.remove(&id) else {
                continue;
            };
            for symbol in symbols {
                if let Some(files) = self.lookups.get_mut(&symbol) {
                    files.remove(&id);
                    if files.is_empty() {
                        self.lookups.remove(&symbol);
                    }
                }
            }
        }
    }

    /// Drops deleted files: their lookups and their place in the path table.
    ///
    /// Unlike [`update`](Self::update) this needs no recordings, so it also
    /// applies after a round with errors.
    pub fn remove_files<'a, I>(&mut self, files: I)
    where
        I: IntoIterator<Item = &'a Path>,
    {
        for file in files {
            self.remove_lookups_from([file]);
            self.forget_file(file);
        }
    }

    /// Merges every lookup recorded by `recorder`.
    pub fn add_all(&mut self, recorder: &LookupRecorder) {
        for (symbol, file) in recorder.entries() {
            let id = self.intern(file);
            self.insert(symbol.clone(), id);
        }
    }

    /// Files that looked up `symbol`.
    pub fn get(&self, symbol: &LookupSymbol) -> BTreeSet<PathBuf> {
        self.lookups
            .get(symbol)
            .into_iter()
            .flatten()
            .filter_map(|id| self.paths.get(id).cloned())
            .collect()
    }

    /// Files that looked up any of `symbols`.
    pub fn files_for<'a, I>(&self, symbols: I) -> BTreeSet<PathBuf>
    where
        I: IntoIterator<Item = &'a LookupSymbol>,
    {
        symbols
            .into_iter()
            .filter_map(|symbol| self.lookups.get(symbol))
            .flatten()
            .filter_map(|id| self.paths.get(id).cloned())
            .collect()
    }

    /// Symbols looked up by `file`.
    pub fn lookups_of(&self, file: &Path) -> BTreeSet<LookupSymbol> {
        self.ids
            .get(file)
            .and_then(|id| self.by_file.get(id))
            .cloned()
            .unwrap_or_default()
    }

    /// The whole index with resolved paths, in order.
    pub fn entries(&self) -> BTreeMap<LookupSymbol, BTreeSet<PathBuf>> {
        self.lookups
            .keys()
            .map(|symbol| (symbol.clone(), self.get(symbol)))
            .collect()
    }

    /// Number of distinct symbols.
    pub fn symbol_count(&self) -> usize {
        self.lookups.len()
    }

    /// Number of known files.
    pub fn file_count(&self) -> usize {
        self.paths.len()
    }

    /// Returns `true` if the index holds no lookups.
    pub fn is_empty(&self) -> bool {
        self.lookups.is_empty()
    }

    fn intern(&mut self, path: &Path) -> FileId {
        if let Some(id) = self.ids.get(path) {
            return *id;
        }
        let id = FileId(self.next_file_id);
        self.next_file_id += 1;
        self.ids.insert(path.to_path_buf(), id);
        self.paths.insert(id, path.to_path_buf());
        id
    }

    fn forget_file(&mut self, path: &Path) {
        if let Some(id) = self.ids.remove(path) {
            self.paths.remove(&id);
            self.by_file.remove(&id);
        }
    }

    fn insert(&mut self, symbol: LookupSymbol, file: FileId) {
        self.by_file.entry(file).or_default().insert(symbol.clone());
        self.lookups.entry(symbol).or_default().insert(file);
    }
}

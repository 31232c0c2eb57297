//! Key-value byte stores underneath the persisted caches.
//!
//! The cache layer only needs whole-blob reads and writes keyed by a string.
//! [`FsStore`] keeps one file per key under a root directory; [`MemoryStore`]
//! keeps everything in a map and is what tests and short-lived sessions use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::CacheError;

/// File extension for blobs written by [`FsStore`].
const BLOB_EXT: &str = "bin";

/// A blocking key-value store of opaque byte blobs.
pub trait ByteStore {
    /// Reads the blob stored under `key`, or `None` if there is none.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replaces the blob stored under `key`.
    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;

    /// Removes the blob stored under `key`. Removing a missing key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), CacheError>;
}

/// Filesystem-backed store: `<root>/<key>.bin`.
///
/// Keys may contain `/` to group blobs into subdirectories. Writes go to a
/// temporary sibling and are renamed into place, so a reader never observes a
/// half-written blob.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Creates a store rooted at the given directory. The directory is
    /// created lazily on first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Returns the file path for the blob with the given key.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{BLOB_EXT}"))
    }
}

impl ByteStore for FsStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.blob_path(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.blob_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let tmp = path.with_extension(format!("{BLOB_EXT}.tmp"));
        std::fs::write(&tmp, bytes).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }

    fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        let path = self.blob_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }
}

/// In-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }
}

impl ByteStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn write(&mut self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        self.blobs.remove(key);
        Ok(())
    }
}

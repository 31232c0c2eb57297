//! Versioned, checksummed blob framing.
//!
//! Every persisted cache is one blob: a 4-byte little-endian header length,
//! a bincode-encoded [`BlobHeader`], then the bincode-encoded payload. The
//! header carries magic bytes identifying the blob kind, a format version, the
//! producing Ripple version, and a checksum of the payload. Any mismatch is an
//! error; the reader never tries to reinterpret bytes it does not trust.

use ripple_common::ContentHash;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::store::ByteStore;

/// Ripple version recorded in every header.
const RIPPLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identifies one kind of persisted blob and its current format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobKind {
    /// Magic bytes at the start of the header.
    pub magic: [u8; 4],
    /// Current format version. Increment on breaking payload changes.
    pub format_version: u32,
}

/// Per-target incremental cache blobs.
pub const CACHE_BLOB: BlobKind = BlobKind {
    magic: *b"RPLC",
    format_version: 2,
};

/// The shared lookup index blob.
pub const LOOKUP_BLOB: BlobKind = BlobKind {
    magic: *b"RPLL",
    format_version: 2,
};

/// Header prepended to every persisted blob for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobHeader {
    /// Magic bytes identifying the blob kind.
    pub magic: [u8; 4],

    /// Blob format version.
    pub format_version: u32,

    /// Ripple version that produced this blob.
    pub ripple_version: String,

    /// Content hash of the payload bytes.
    pub checksum: ContentHash,
}

/// Serializes `value` into a framed blob of the given kind.
pub fn encode_blob<T: Serialize + ?Sized>(kind: BlobKind, value: &T) -> Result<Vec<u8>, CacheError> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;

    let header = BlobHeader {
        magic: kind.magic,
        format_version: kind.format_version,
        ripple_version: RIPPLE_VERSION.to_string(),
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    let header_len = u32::try_from(header_bytes.len()).map_err(|_| CacheError::Serialization {
        reason: "blob header too large".to_string(),
    })?;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

/// Validates and deserializes a framed blob of the given kind.
///
/// `key` is only used to label errors.
pub fn decode_blob<T: DeserializeOwned>(
    kind: BlobKind,
    key: &str,
    raw: &[u8],
) -> Result<T, CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    if raw.len() < 4 {
        return Err(invalid("truncated header length"));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .filter(|end| *end <= raw.len())
        .ok_or_else(|| invalid("truncated header"))?;

    let (header, _): (BlobHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..header_end], bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != kind.magic {
        return Err(invalid("unexpected magic bytes"));
    }
    if header.format_version != kind.format_version {
        return Err(CacheError::VersionMismatch {
            key: key.to_string(),
            expected: kind.format_version,
            actual: header.format_version,
        });
    }

    let payload = &raw[header_end..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            key: key.to_string(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    let (value, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: format!("{key}: {e}"),
        })?;
    Ok(value)
}

/// Encodes `value` and writes it to `store` under `key`.
pub fn write_blob<T: Serialize + ?Sized>(
    store: &mut dyn ByteStore,
    kind: BlobKind,
    key: &str,
    value: &T,
) -> Result<(), CacheError> {
    let bytes = encode_blob(kind, value)?;
    store.write(key, &bytes)
}

/// Reads and decodes the blob under `key`; `Ok(None)` if nothing is stored.
pub fn read_blob<T: DeserializeOwned>(
    store: &dyn ByteStore,
    kind: BlobKind,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match store.read(key)? {
        Some(raw) => decode_blob(kind, key, &raw).map(Some),
        None => Ok(None),
    }
}

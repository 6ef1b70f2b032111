//! Binary artifact blobs with validated headers.
//!
//! Every compiled artifact is stored as `<store_dir>/<subdir>/<key>.art`,
//! prefixed by a header containing magic bytes, the format version, the
//! store version that wrote it and a checksum of the payload.

use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Magic bytes identifying a kiln artifact.
const ARTIFACT_MAGIC: [u8; 4] = *b"KILN";

/// File extension of artifact blobs.
const ARTIFACT_EXT: &str = "art";

/// Current artifact format version. Increment on breaking changes to
/// the header or payload format.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],

    /// Artifact format version.
    pub format_version: u32,

    /// Store version that produced this artifact.
    pub store_version: String,

    /// Content hash of the payload data.
    pub checksum: ContentHash,
}

/// Reads and writes artifact blobs under a root directory.
pub struct ArtifactStore {
    root: PathBuf,
    format_version: u32,
}

impl ArtifactStore {
    /// Creates an artifact store rooted at the given directory, writing the
    /// current [`ARTIFACT_FORMAT_VERSION`].
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            format_version: ARTIFACT_FORMAT_VERSION,
        }
    }

    /// Creates an artifact store that stamps a different format version on
    /// everything it writes, as an older or newer toolchain would.
    ///
    /// Reads still validate against [`ARTIFACT_FORMAT_VERSION`].
    pub fn with_format_version(root: &Path, format_version: u32) -> Self {
        Self {
            root: root.to_path_buf(),
            format_version,
        }
    }

    /// Ensures that the given subdirectory exists.
    pub fn ensure_dirs(&self, subdir: &str) -> Result<(), StoreError> {
        let dir = self.root.join(subdir);
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir,
            source: e,
        })
    }

    /// Returns the file path for an artifact with the given key.
    pub fn artifact_path(&self, subdir: &str, key: &str) -> PathBuf {
        self.root.join(subdir).join(format!("{key}.{ARTIFACT_EXT}"))
    }

    /// Writes an artifact and returns the path it was written to.
    pub fn write_artifact(
        &self,
        subdir: &str,
        key: &str,
        data: &[u8],
        store_version: &str,
    ) -> Result<PathBuf, StoreError> {
        self.ensure_dirs(subdir)?;
        let path = self.artifact_path(subdir, key);

        let header = ArtifactHeader {
            magic: ARTIFACT_MAGIC,
            format_version: self.format_version,
            store_version: store_version.to_string(),
            checksum: ContentHash::from_bytes(data),
        };

        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| StoreError::Serialization {
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        std::fs::write(&path, &output).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;

        Ok(path)
    }

    /// Reads an artifact, validating its header and checksum.
    pub fn read_artifact(&self, subdir: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.artifact_path(subdir, key);
        let raw = std::fs::read(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e,
        })?;

        let invalid = |reason: &str| StoreError::InvalidHeader {
            path: path.clone(),
            reason: reason.to_string(),
        };

        let len_bytes: [u8; 4] = raw
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| invalid("truncated header length"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_bytes = raw
            .get(4..4 + header_len)
            .ok_or_else(|| invalid("truncated header"))?;

        let (header, _): (ArtifactHeader, usize) =
            bincode::serde::decode_from_slice(header_bytes, bincode::config::standard())
                .map_err(|e| invalid(&e.to_string()))?;

        if header.magic != ARTIFACT_MAGIC {
            return Err(invalid("missing magic bytes"));
        }

        if header.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                path,
                expected: ARTIFACT_FORMAT_VERSION,
                actual: header.format_version,
            });
        }

        let payload = &raw[4 + header_len..];
        let actual_checksum = ContentHash::from_bytes(payload);
        if actual_checksum != header.checksum {
            return Err(StoreError::ChecksumMismatch {
                path,
                expected: header.checksum.to_string(),
                actual: actual_checksum.to_string(),
            });
        }

        Ok(payload.to_vec())
    }

    /// Deletes a single artifact. Returns `false` if it did not exist.
    pub fn remove_artifact(&self, subdir: &str, key: &str) -> Result<bool, StoreError> {
        let path = self.artifact_path(subdir, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io { path, source: e }),
        }
    }

    /// Removes artifacts in `subdir` whose key is not in `live_keys`.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self, subdir: &str, live_keys: &[&str]) -> Result<usize, StoreError> {
        let dir = self.root.join(subdir);
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::Io {
            path: dir.clone(),
            source: e,
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io {
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !live_keys.contains(&stem) {
                    std::fs::remove_file(&path).map_err(|e| StoreError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

//! Store manifest recording what every stored artifact was built from.
//!
//! The manifest is stored as `manifest.json` in the store directory. For each
//! artifact it records the compiler type code, the initializer string the
//! compile was requested with, and the content hash of every source file
//! the compiler reported as a dependency.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::{AssetHash, ContentHash};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Name of the manifest file within the store directory.
const MANIFEST_FILE: &str = "manifest.json";

/// Top-level manifest of the intermediate store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreManifest {
    /// Store version that produced these artifacts. Discarded on change.
    pub store_version: String,

    /// Per-artifact records keyed by [`StoreManifest::record_key`].
    pub artifacts: BTreeMap<String, ArtifactRecord>,
}

/// What a single stored artifact was compiled from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Compiler type code of the asset kind.
    pub type_code: u64,

    /// Asset hash of the identifier that was compiled.
    pub hash: AssetHash,

    /// Descriptive initializer string, for reports.
    pub initializer: String,

    /// Source files the compile read.
    pub dependencies: Vec<DependencyRecord>,
}

/// A source file an artifact depends on, with its content hash at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    /// Path of the source file.
    pub path: PathBuf,

    /// Content hash when the artifact was compiled; `None` if the file did
    /// not exist at that time.
    pub content_hash: Option<ContentHash>,
}

impl StoreManifest {
    /// Creates a new, empty manifest for the given store version.
    pub fn new(store_version: &str) -> Self {
        Self {
            store_version: store_version.to_string(),
            artifacts: BTreeMap::new(),
        }
    }

    /// The manifest key of an artifact: `<type code>/<hash>` in hex.
    pub fn record_key(type_code: u64, hash: AssetHash) -> String {
        format!("{type_code:016x}/{:016x}", hash.as_raw())
    }

    /// Loads the manifest from the store directory, returning `None` if
    /// the file doesn't exist or can't be parsed.
    pub fn load(store_dir: &Path) -> Option<Self> {
        let path = store_dir.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                log::warn!("discarding unreadable store manifest {}: {e}", path.display());
                None
            }
        }
    }

    /// Saves the manifest to the store directory, creating it if needed.
    pub fn save(&self, store_dir: &Path) -> Result<(), StoreError> {
        std::fs::create_dir_all(store_dir).map_err(|e| StoreError::Io {
            path: store_dir.to_path_buf(),
            source: e,
        })?;
        let path = store_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| StoreError::Io { path, source: e })
    }

    /// Returns `true` if this manifest was produced by a compatible store version.
    pub fn is_compatible(&self, current_version: &str) -> bool {
        self.store_version == current_version
    }
}

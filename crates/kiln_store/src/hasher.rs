//! Source file hashing and staleness detection.
//!
//! Records the content hash of every file a compile depended on and later
//! compares those records against the files on disk to decide whether a
//! stored artifact is still current.

use std::path::{Path, PathBuf};

use kiln_common::ContentHash;

use crate::error::StoreError;
use crate::manifest::DependencyRecord;

/// Result of comparing recorded dependency hashes against the files on disk.
#[derive(Debug, Clone, Default)]
pub struct SourceStatus {
    /// Files whose content hash differs from the record (including files
    /// that have appeared since the compile).
    pub modified: Vec<PathBuf>,

    /// Files that existed at compile time but are gone now.
    pub missing: Vec<PathBuf>,

    /// Files whose content hash matches the record.
    pub unchanged: Vec<PathBuf>,
}

impl SourceStatus {
    /// Returns `true` if no dependency has been modified or removed.
    pub fn is_current(&self) -> bool {
        self.modified.is_empty() && self.missing.is_empty()
    }

    /// Iterates over every path that makes the artifact stale.
    pub fn stale_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.modified.iter().chain(self.missing.iter())
    }
}

/// Utility for hashing source files.
pub struct SourceHasher;

impl SourceHasher {
    /// Computes the content hash of a single file.
    pub fn hash_file(path: &Path) -> Result<ContentHash, StoreError> {
        let content = std::fs::read(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(ContentHash::from_bytes(&content))
    }

    /// Records the current content hash of each dependency.
    ///
    /// Unreadable files are recorded with no hash; they count as modified if
    /// they become readable later.
    pub fn record_dependencies(paths: &[PathBuf]) -> Vec<DependencyRecord> {
        let mut records: Vec<DependencyRecord> = paths
            .iter()
            .map(|path| DependencyRecord {
                path: path.clone(),
                content_hash: Self::hash_file(path).ok(),
            })
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records.dedup_by(|a, b| a.path == b.path);
        records
    }

    /// Compares dependency records against the files on disk.
    pub fn check(records: &[DependencyRecord]) -> SourceStatus {
        let mut status = SourceStatus::default();
        for record in records {
            let current = Self::hash_file(&record.path).ok();
            match (record.content_hash, current) {
                (Some(old), Some(new)) if old == new => status.unchanged.push(record.path.clone()),
                (None, None) => status.unchanged.push(record.path.clone()),
                (Some(_), None) => status.missing.push(record.path.clone()),
                _ => status.modified.push(record.path.clone()),
            }
        }
        status
    }
}

//! The intermediate store: manifest plus artifact blobs behind one interface.
//!
//! `IntermediateStore` is shared between the threads that run compiles (which
//! write artifacts) and the asset tables (which locate and read them). The
//! manifest is guarded by a mutex; blob files are written whole.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_common::AssetHash;
use parking_lot::Mutex;

use crate::artifact::ArtifactStore;
use crate::error::StoreError;
use crate::hasher::{SourceHasher, SourceStatus};
use crate::manifest::{ArtifactRecord, DependencyRecord, StoreManifest};

/// A stored artifact as located through the manifest.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    /// Compiler type code of the asset kind.
    pub type_code: u64,
    /// Asset hash of the compiled identifier.
    pub hash: AssetHash,
    /// Descriptive initializer string.
    pub initializer: String,
    /// Path of the blob file.
    pub path: PathBuf,
    /// Dependency records written at compile time.
    pub dependencies: Vec<DependencyRecord>,
    /// Dependency state at the time the artifact was located.
    pub status: SourceStatus,
}

/// Disk-backed store of compiled artifacts.
///
/// Loading is fail-safe: a missing, unreadable or version-incompatible
/// manifest yields an empty store rather than an error.
pub struct IntermediateStore {
    root: PathBuf,
    manifest: Mutex<StoreManifest>,
    artifacts: ArtifactStore,
    version: String,
}

impl IntermediateStore {
    /// Opens the store at `root`, or starts a fresh one.
    pub fn open(root: &Path, version: &str) -> Self {
        let manifest = StoreManifest::load(root)
            .filter(|m| m.is_compatible(version))
            .unwrap_or_else(|| StoreManifest::new(version));

        Self {
            root: root.to_path_buf(),
            manifest: Mutex::new(manifest),
            artifacts: ArtifactStore::new(root),
            version: version.to_string(),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store version this instance writes and accepts.
    pub fn version(&self) -> &str {
        &self.version
    }

    fn subdir(type_code: u64) -> String {
        format!("{type_code:016x}")
    }

    fn key(hash: AssetHash) -> String {
        format!("{:016x}", hash.as_raw())
    }

    /// Path the blob for `(type_code, hash)` is written to.
    pub fn artifact_path(&self, type_code: u64, hash: AssetHash) -> PathBuf {
        self.artifacts
            .artifact_path(&Self::subdir(type_code), &Self::key(hash))
    }

    /// Writes a compiled artifact and records what it was built from.
    pub fn store(
        &self,
        type_code: u64,
        hash: AssetHash,
        initializer: &str,
        data: &[u8],
        dependencies: &[PathBuf],
    ) -> Result<StoredArtifact, StoreError> {
        let path = self.artifacts.write_artifact(
            &Self::subdir(type_code),
            &Self::key(hash),
            data,
            &self.version,
        )?;
        let records = SourceHasher::record_dependencies(dependencies);
        let record = ArtifactRecord {
            type_code,
            hash,
            initializer: initializer.to_string(),
            dependencies: records.clone(),
        };
        self.manifest
            .lock()
            .artifacts
            .insert(StoreManifest::record_key(type_code, hash), record);
        log::debug!("stored artifact {initializer} at {}", path.display());

        Ok(StoredArtifact {
            type_code,
            hash,
            initializer: initializer.to_string(),
            path,
            status: SourceStatus {
                unchanged: records.iter().map(|r| r.path.clone()).collect(),
                ..SourceStatus::default()
            },
            dependencies: records,
        })
    }

    /// Looks up an artifact in the manifest and checks its dependencies
    /// against the files on disk.
    ///
    /// The blob itself is not read; a located artifact may still fail to
    /// load in [`IntermediateStore::read`].
    pub fn locate(&self, type_code: u64, hash: AssetHash) -> Option<StoredArtifact> {
        let record = self
            .manifest
            .lock()
            .artifacts
            .get(&StoreManifest::record_key(type_code, hash))
            .cloned()?;
        let status = SourceHasher::check(&record.dependencies);
        Some(StoredArtifact {
            type_code,
            hash,
            initializer: record.initializer,
            path: self.artifact_path(type_code, hash),
            dependencies: record.dependencies,
            status,
        })
    }

    /// Reads and validates the blob of an artifact.
    pub fn read(&self, type_code: u64, hash: AssetHash) -> Result<Vec<u8>, StoreError> {
        self.artifacts
            .read_artifact(&Self::subdir(type_code), &Self::key(hash))
    }

    /// Forgets an artifact and deletes its blob. Returns `true` if the
    /// manifest knew about it.
    pub fn remove(&self, type_code: u64, hash: AssetHash) -> Result<bool, StoreError> {
        let known = self
            .manifest
            .lock()
            .artifacts
            .remove(&StoreManifest::record_key(type_code, hash))
            .is_some();
        self.artifacts
            .remove_artifact(&Self::subdir(type_code), &Self::key(hash))?;
        Ok(known)
    }

    /// Number of artifacts recorded in the manifest.
    pub fn len(&self) -> usize {
        self.manifest.lock().artifacts.len()
    }

    /// Returns `true` if the manifest records no artifacts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persists the manifest to disk.
    pub fn save(&self) -> Result<(), StoreError> {
        self.manifest.lock().save(&self.root)
    }

    /// Deletes blobs that the manifest no longer references.
    ///
    /// Returns the number of files removed.
    pub fn gc(&self) -> Result<usize, StoreError> {
        let (subdirs, live): (BTreeSet<String>, Vec<(String, String)>) = {
            let manifest = self.manifest.lock();
            let live: Vec<(String, String)> = manifest
                .artifacts
                .values()
                .map(|r| (Self::subdir(r.type_code), Self::key(r.hash)))
                .collect();
            (self.existing_subdirs()?, live)
        };

        let mut removed = 0;
        for subdir in &subdirs {
            let keys: Vec<&str> = live
                .iter()
                .filter(|(s, _)| s == subdir)
                .map(|(_, k)| k.as_str())
                .collect();
            removed += self.artifacts.gc(subdir, &keys)?;
        }
        Ok(removed)
    }

    fn existing_subdirs(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut subdirs = BTreeSet::new();
        if !self.root.exists() {
            return Ok(subdirs);
        }
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::Io {
            path: self.root.clone(),
            source: e,
        })?;
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    subdirs.insert(name.to_string());
                }
            }
        }
        Ok(subdirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: u64 = 0x4d4f_4445_4c;
    const MATERIAL: u64 = 0x4d41_5400;

    fn make_store() -> (tempfile::TempDir, IntermediateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IntermediateStore::open(&dir.path().join("store"), "0.1.0");
        (dir, store)
    }

    #[test]
    fn fresh_store_is_empty() {
        let (_dir, store) = make_store();
        assert!(store.is_empty());
        assert_eq!(store.version(), "0.1.0");
        assert!(store.locate(MODEL, AssetHash::of_str("a.dae")).is_none());
    }

    #[test]
    fn store_locate_and_read() {
        let (dir, store) = make_store();
        let src = dir.path().join("a.dae");
        std::fs::write(&src, "mesh").unwrap();
        let hash = AssetHash::of_str("a.dae");

        let stored = store
            .store(MODEL, hash, "a.dae", b"compiled", &[src.clone()])
            .unwrap();
        assert!(stored.status.is_current());
        assert_eq!(stored.path, store.artifact_path(MODEL, hash));

        let located = store.locate(MODEL, hash).unwrap();
        assert_eq!(located.initializer, "a.dae");
        assert!(located.status.is_current());
        assert_eq!(store.read(MODEL, hash).unwrap(), b"compiled");
    }

    #[test]
    fn same_hash_different_type_codes_are_separate() {
        let (_dir, store) = make_store();
        let hash = AssetHash::of_str("a.dae");
        store.store(MODEL, hash, "a.dae", b"model", &[]).unwrap();
        store.store(MATERIAL, hash, "a.dae", b"material", &[]).unwrap();
        assert_eq!(store.read(MODEL, hash).unwrap(), b"model");
        assert_eq!(store.read(MATERIAL, hash).unwrap(), b"material");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn locate_reports_modified_source() {
        let (dir, store) = make_store();
        let src = dir.path().join("a.dae");
        std::fs::write(&src, "v1").unwrap();
        let hash = AssetHash::of_str("a.dae");
        store.store(MODEL, hash, "a.dae", b"compiled", &[src.clone()]).unwrap();

        std::fs::write(&src, "v2").unwrap();
        let located = store.locate(MODEL, hash).unwrap();
        assert!(!located.status.is_current());
        assert_eq!(located.status.modified, vec![src]);
    }

    #[test]
    fn reopen_with_same_version_keeps_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let hash = AssetHash::of_str("a.dae");
        {
            let store = IntermediateStore::open(&root, "0.1.0");
            store.store(MODEL, hash, "a.dae", b"compiled", &[]).unwrap();
            store.save().unwrap();
        }
        let store = IntermediateStore::open(&root, "0.1.0");
        assert!(store.locate(MODEL, hash).is_some());
    }

    #[test]
    fn reopen_with_other_version_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        {
            let store = IntermediateStore::open(&root, "0.1.0");
            store
                .store(MODEL, AssetHash::of_str("a.dae"), "a.dae", b"x", &[])
                .unwrap();
            store.save().unwrap();
        }
        let store = IntermediateStore::open(&root, "0.2.0");
        assert!(store.is_empty());
    }

    #[test]
    fn remove_forgets_and_deletes() {
        let (_dir, store) = make_store();
        let hash = AssetHash::of_str("a.dae");
        store.store(MODEL, hash, "a.dae", b"x", &[]).unwrap();
        assert!(store.remove(MODEL, hash).unwrap());
        assert!(store.locate(MODEL, hash).is_none());
        assert!(store.read(MODEL, hash).unwrap_err().is_not_found());
        assert!(!store.remove(MODEL, hash).unwrap());
    }

    #[test]
    fn gc_removes_blobs_missing_from_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");
        let keep = AssetHash::of_str("keep.dae");
        let orphan = AssetHash::of_str("orphan.dae");
        {
            let store = IntermediateStore::open(&root, "0.1.0");
            store.store(MODEL, keep, "keep.dae", b"k", &[]).unwrap();
            store.save().unwrap();
            // Written after the manifest was saved, so a reopened store
            // does not know about it.
            store.store(MODEL, orphan, "orphan.dae", b"o", &[]).unwrap();
        }

        let store = IntermediateStore::open(&root, "0.1.0");
        assert_eq!(store.gc().unwrap(), 1);
        assert!(store.read(MODEL, keep).is_ok());
        assert!(store.read(MODEL, orphan).unwrap_err().is_not_found());
    }

    #[test]
    fn gc_on_missing_root_is_noop() {
        let (_dir, store) = make_store();
        assert_eq!(store.gc().unwrap(), 0);
    }
}

//! Error types for intermediate store operations.

use std::path::PathBuf;

/// Errors that can occur while reading or writing the intermediate store.
///
/// Reads report precisely why an artifact is unusable so that callers can
/// tell a missing or outdated artifact (recompile it) from a damaged one.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred while reading or writing store files.
    #[error("store I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The store manifest could not be parsed as valid JSON.
    #[error("failed to parse store manifest: {reason}")]
    ManifestParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// An artifact file has an invalid or missing header.
    #[error("invalid artifact header in {path}: {reason}")]
    InvalidHeader {
        /// The artifact file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The stored checksum does not match the computed checksum of the payload.
    #[error("checksum mismatch in {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The artifact format version does not match the current version.
    #[error("version mismatch in {path}: expected {expected}, got {actual}")]
    VersionMismatch {
        /// The artifact file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl StoreError {
    /// Returns `true` if the artifact file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Returns `true` if the artifact was written by an older format version.
    pub fn is_outdated(&self) -> bool {
        matches!(self, StoreError::VersionMismatch { expected, actual, .. } if actual < expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_display() {
        let err = StoreError::Io {
            path: PathBuf::from("/tmp/store/manifest.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("store I/O error"));
        assert!(msg.contains("manifest.json"));
        assert!(err.is_not_found());
    }

    #[test]
    fn permission_denied_is_not_not_found() {
        let err = StoreError::Io {
            path: PathBuf::from("a.art"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn version_mismatch_display() {
        let err = StoreError::VersionMismatch {
            path: PathBuf::from("old.art"),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("version mismatch"));
        assert!(msg.contains("expected 2"));
        assert!(msg.contains("got 1"));
    }

    #[test]
    fn older_version_is_outdated_newer_is_not() {
        let older = StoreError::VersionMismatch {
            path: PathBuf::from("a.art"),
            expected: 2,
            actual: 1,
        };
        let newer = StoreError::VersionMismatch {
            path: PathBuf::from("a.art"),
            expected: 2,
            actual: 3,
        };
        assert!(older.is_outdated());
        assert!(!newer.is_outdated());
    }

    #[test]
    fn checksum_mismatch_display() {
        let err = StoreError::ChecksumMismatch {
            path: PathBuf::from("file.art"),
            expected: "aabb".to_string(),
            actual: "ccdd".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("aabb"));
        assert!(msg.contains("ccdd"));
    }

    #[test]
    fn invalid_header_display() {
        let err = StoreError::InvalidHeader {
            path: PathBuf::from("bad.art"),
            reason: "missing magic bytes".to_string(),
        };
        assert!(err.to_string().contains("missing magic bytes"));
        assert!(!err.is_outdated());
    }
}

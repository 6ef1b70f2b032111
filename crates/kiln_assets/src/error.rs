//! Error and resolution-state types for asset lookups.
//!
//! `Pending` and `Invalid` are ordinary flow-control outcomes of a resolve,
//! carried as [`AssetError`] variants so that nested constructions can
//! propagate them with `?`. Callers that prefer to branch on state can turn a
//! result into a [`Resolved`] with [`IntoResolved::into_resolved`].

use std::fmt;

use kiln_store::StoreError;

use crate::marker::AssetState;

/// Why a stored artifact could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatReason {
    /// Written by an older format version; recompiling fixes it.
    UnsupportedVersion {
        /// Version this build reads.
        expected: u32,
        /// Version found in the artifact.
        actual: u32,
    },
    /// Written by a newer format version than this build understands.
    NewerVersion {
        /// Version this build reads.
        expected: u32,
        /// Version found in the artifact.
        actual: u32,
    },
    /// Damaged or unparseable data.
    Corrupt(String),
}

impl fmt::Display for FormatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatReason::UnsupportedVersion { expected, actual } => {
                write!(f, "outdated version {actual} (expected {expected})")
            }
            FormatReason::NewerVersion { expected, actual } => {
                write!(f, "unsupported newer version {actual} (expected {expected})")
            }
            FormatReason::Corrupt(detail) => write!(f, "corrupt data: {detail}"),
        }
    }
}

/// Outcome of a failed or unfinished asset resolve.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// Construction or compilation has not finished; retry later.
    #[error("asset '{name}' is pending: {reason}")]
    Pending {
        /// Descriptive name of the asset.
        name: String,
        /// What is still outstanding.
        reason: String,
    },

    /// Construction failed for the current inputs; do not retry until they change.
    #[error("asset '{name}' is invalid: {reason}")]
    Invalid {
        /// Descriptive name of the asset.
        name: String,
        /// Why the asset is invalid.
        reason: String,
    },

    /// Stored data could not be decoded.
    #[error("format error in '{name}': {reason}")]
    Format {
        /// Descriptive name of the asset.
        name: String,
        /// What was wrong with the data.
        reason: FormatReason,
    },

    /// Stored data could not be read.
    #[error("I/O error reading '{name}': {source}")]
    Io {
        /// Descriptive name of the asset.
        name: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl AssetError {
    /// Creates a [`AssetError::Pending`].
    pub fn pending(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AssetError::Pending {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an [`AssetError::Invalid`].
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AssetError::Invalid {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an [`AssetError::Format`] for undecodable data.
    pub fn corrupt(name: impl Into<String>, detail: impl Into<String>) -> Self {
        AssetError::Format {
            name: name.into(),
            reason: FormatReason::Corrupt(detail.into()),
        }
    }

    /// Maps a store read failure onto the asset error taxonomy.
    pub fn from_store(name: impl Into<String>, err: StoreError) -> Self {
        let name = name.into();
        match err {
            StoreError::Io { source, .. } => AssetError::Io { name, source },
            StoreError::VersionMismatch {
                expected, actual, ..
            } if actual < expected => AssetError::Format {
                name,
                reason: FormatReason::UnsupportedVersion { expected, actual },
            },
            StoreError::VersionMismatch {
                expected, actual, ..
            } => AssetError::Format {
                name,
                reason: FormatReason::NewerVersion { expected, actual },
            },
            other => AssetError::corrupt(name, other.to_string()),
        }
    }

    /// Returns `true` for [`AssetError::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, AssetError::Pending { .. })
    }

    /// Returns `true` for [`AssetError::Invalid`].
    pub fn is_invalid(&self) -> bool {
        matches!(self, AssetError::Invalid { .. })
    }

    /// Returns `true` if recompiling the asset is expected to fix the failure:
    /// an outdated format version or a missing file.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AssetError::Format {
                reason: FormatReason::UnsupportedVersion { .. },
                ..
            } => true,
            AssetError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Descriptive name of the asset the error is about.
    pub fn name(&self) -> &str {
        match self {
            AssetError::Pending { name, .. }
            | AssetError::Invalid { name, .. }
            | AssetError::Format { name, .. }
            | AssetError::Io { name, .. } => name,
        }
    }
}

/// Tagged outcome of a resolve: ready, or one of the two flow-control states.
#[derive(Debug)]
pub enum Resolved<T> {
    /// The artifact is ready.
    Ready(T),
    /// Not finished yet; retry later.
    Pending {
        /// Descriptive name of the asset.
        name: String,
        /// What is still outstanding.
        reason: String,
    },
    /// Failed for the current inputs.
    Invalid {
        /// Descriptive name of the asset.
        name: String,
        /// Why the asset is invalid.
        reason: String,
    },
}

impl<T> Resolved<T> {
    /// The state this outcome corresponds to.
    pub fn state(&self) -> AssetState {
        match self {
            Resolved::Ready(_) => AssetState::Ready,
            Resolved::Pending { .. } => AssetState::Pending,
            Resolved::Invalid { .. } => AssetState::Invalid,
        }
    }

    /// Returns the artifact if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Resolved::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Maps the ready value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resolved<U> {
        match self {
            Resolved::Ready(value) => Resolved::Ready(f(value)),
            Resolved::Pending { name, reason } => Resolved::Pending { name, reason },
            Resolved::Invalid { name, reason } => Resolved::Invalid { name, reason },
        }
    }
}

/// Splits `Pending`/`Invalid` out of the error channel.
pub trait IntoResolved<T> {
    /// Converts to a [`Resolved`], leaving only hard errors in `Err`.
    fn into_resolved(self) -> Result<Resolved<T>, AssetError>;
}

impl<T> IntoResolved<T> for Result<T, AssetError> {
    fn into_resolved(self) -> Result<Resolved<T>, AssetError> {
        match self {
            Ok(value) => Ok(Resolved::Ready(value)),
            Err(AssetError::Pending { name, reason }) => Ok(Resolved::Pending { name, reason }),
            Err(AssetError::Invalid { name, reason }) => Ok(Resolved::Invalid { name, reason }),
            Err(other) => Err(other),
        }
    }
}

/// Errors raised while wiring up asset services.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The compile worker pool could not be started.
    #[error("failed to start compile pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pending_display() {
        let err = AssetError::pending("model.dae", "compile still pending");
        assert_eq!(
            err.to_string(),
            "asset 'model.dae' is pending: compile still pending"
        );
        assert!(err.is_pending());
        assert_eq!(err.name(), "model.dae");
    }

    #[test]
    fn missing_file_is_recoverable() {
        let err = AssetError::from_store(
            "a.dae",
            StoreError::Io {
                path: PathBuf::from("a.art"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            },
        );
        assert!(matches!(err, AssetError::Io { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn other_io_errors_propagate() {
        let err = AssetError::from_store(
            "a.dae",
            StoreError::Io {
                path: PathBuf::from("a.art"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            },
        );
        assert!(!err.is_recoverable());
    }

    #[test]
    fn outdated_version_is_recoverable_newer_is_not() {
        let old = AssetError::from_store(
            "a.dae",
            StoreError::VersionMismatch {
                path: PathBuf::from("a.art"),
                expected: 2,
                actual: 1,
            },
        );
        let new = AssetError::from_store(
            "a.dae",
            StoreError::VersionMismatch {
                path: PathBuf::from("a.art"),
                expected: 2,
                actual: 3,
            },
        );
        assert!(old.is_recoverable());
        assert!(!new.is_recoverable());
        assert!(new.to_string().contains("unsupported newer version 3"));
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let err = AssetError::from_store(
            "a.dae",
            StoreError::ChecksumMismatch {
                path: PathBuf::from("a.art"),
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            },
        );
        assert!(matches!(
            err,
            AssetError::Format {
                reason: FormatReason::Corrupt(_),
                ..
            }
        ));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn invalid_is_not_recoverable() {
        assert!(!AssetError::invalid("a", "broken").is_recoverable());
    }

    #[test]
    fn into_resolved_splits_flow_control() {
        let ready: Result<u32, AssetError> = Ok(3);
        assert_eq!(ready.into_resolved().unwrap().ready(), Some(3));

        let pending: Result<u32, AssetError> = Err(AssetError::pending("a", "later"));
        assert_eq!(pending.into_resolved().unwrap().state(), AssetState::Pending);

        let invalid: Result<u32, AssetError> = Err(AssetError::invalid("a", "bad"));
        assert_eq!(invalid.into_resolved().unwrap().state(), AssetState::Invalid);

        let hard: Result<u32, AssetError> = Err(AssetError::corrupt("a", "bad magic"));
        assert!(hard.into_resolved().is_err());
    }
}

//! On-disk intermediate store for compiled assets.
//!
//! Compilers write their output here keyed by asset kind and asset hash.
//! Each artifact carries a versioned, checksummed header, and the store
//! manifest records the content hash of every source file the artifact was
//! built from so that stale artifacts can be detected without recompiling.

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod store;

pub use artifact::{ArtifactHeader, ArtifactStore, ARTIFACT_FORMAT_VERSION};
pub use error::StoreError;
pub use hasher::{SourceHasher, SourceStatus};
pub use manifest::{ArtifactRecord, DependencyRecord, StoreManifest};
pub use store::{IntermediateStore, StoredArtifact};

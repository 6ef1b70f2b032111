//! Generic on-demand asset resolution for the kiln asset cache.
//!
//! An [`AssetTable`] returns ready artifacts for logical [`AssetId`]s,
//! starting compiles through the [`IntermediateCompilers`] entry point when
//! an artifact is missing or stale, and reports `Pending`/`Invalid` through
//! [`AssetError`] so callers can retry later instead of blocking.
//! [`AssetServices`] owns one table per asset kind together with the
//! [`CompilerSet`] and the [`SourceRegistry`] they share.
//!
//! [`AssetId`]: kiln_common::AssetId

#![warn(missing_docs)]

pub mod asset;
pub mod compiler;
pub mod divergent;
pub mod error;
pub mod marker;
pub mod names;
pub mod services;
pub mod table;
pub mod validation;

pub use asset::{Asset, Construction, DependencyCheck};
pub use compiler::{
    AssetCompiler, CompileExecutor, CompileFailure, CompileOutput, CompilerSet, IntermediateCompilers,
};
pub use divergent::{DivergentAsset, DivergentIdentifier};
pub use error::{AssetError, FormatReason, IntoResolved, Resolved, SetupError};
pub use marker::{AssetState, CompileMarker, Locator, PendingCompile};
pub use names::NameRegistry;
pub use services::AssetServices;
pub use table::{AssetTable, TableOptions};
pub use validation::{DependencyValidation, SourceRegistry};

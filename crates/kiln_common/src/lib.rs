//! Shared foundational types used across the kiln asset pipeline.
//!
//! This crate provides asset identifiers, 64-bit lookup hashes with hash
//! combination, 128-bit content hashes for stored artifacts, and a thread-safe
//! string interner used by the diagnostics name registry.

#![warn(missing_docs)]

pub mod hash;
pub mod id;
pub mod ident;

pub use hash::{AssetHash, ContentHash};
pub use id::AssetId;
pub use ident::{Interner, Symbol};

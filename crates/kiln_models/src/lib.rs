//! Layered derived-asset cache for models.
//!
//! [`ModelCache`] composes LRU caches of model, material and supplement
//! [`Scaffold`]s with an LRU of renderers built by a caller-supplied
//! [`RendererFactory`]. Scaffolds come from the compile orchestration entry
//! point of `kiln_assets`, and every layer rebuilds entries whose
//! dependency validation token has advanced.

#![warn(missing_docs)]

pub mod lru_cache;
pub mod model_cache;
pub mod payload;
pub mod renderer;
pub mod scaffold;

pub use lru_cache::{InsertType, LruCache};
pub use model_cache::{renderer_hash, strip_parameters, supplement_hash, Model, ModelCache, Scaffolds};
pub use payload::{
    BoundingBox, MaterialEntry, MaterialSet, MeshDescription, ModelDescription, ScaffoldPayload,
    SupplementData, SupplementGuid, MATERIAL_SCAFFOLD_TYPE, MODEL_SCAFFOLD_TYPE,
};
pub use renderer::{RendererFactory, RendererRequest};
pub use scaffold::{MaterialScaffold, ModelScaffold, Scaffold, SupplementScaffold};

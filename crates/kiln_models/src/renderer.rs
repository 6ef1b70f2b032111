//! The seam through which the cache builds renderers.

use std::sync::Arc;

use kiln_assets::AssetError;

use crate::payload::{MaterialSet, ModelDescription, SupplementData};

/// Everything a renderer is built from.
#[derive(Debug, Clone, Copy)]
pub struct RendererRequest<'a> {
    /// Model file name.
    pub model_name: &'a str,
    /// Material file name.
    pub material_name: &'a str,
    /// Decoded model scaffold.
    pub model: &'a ModelDescription,
    /// Decoded material scaffold.
    pub materials: &'a MaterialSet,
    /// Decoded supplement scaffolds, in request order.
    pub supplements: &'a [Arc<SupplementData>],
    /// Level of detail, already clamped to the model's maximum.
    pub lod: u32,
}

/// Builds renderers from ready scaffolds.
///
/// The cache never inspects renderers; GPU resources and shader state stay
/// behind this trait.
pub trait RendererFactory: Send + Sync {
    /// The renderer type.
    type Renderer: Send + Sync + 'static;

    /// Builds a renderer.
    fn build(&self, request: &RendererRequest<'_>) -> Result<Self::Renderer, AssetError>;
}

//! Decoded contents of the scaffold kinds.
//!
//! Scaffold artifacts are JSON documents written by the model, material and
//! supplement compilers.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Type code of model scaffold compiles.
pub const MODEL_SCAFFOLD_TYPE: u64 = u64::from_be_bytes(*b"KLNMODEL");

/// Type code of material scaffold compiles.
pub const MATERIAL_SCAFFOLD_TYPE: u64 = u64::from_be_bytes(*b"KLNRSMAT");

/// Identifies a supplement kind; doubles as the supplement's compile type
/// code.
pub type SupplementGuid = u64;

/// A payload type a [`Scaffold`](crate::scaffold::Scaffold) can decode.
pub trait ScaffoldPayload: DeserializeOwned + Send + Sync + 'static {
    /// Short name used in diagnostics.
    const KIND: &'static str;
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl BoundingBox {
    /// The empty box: `min` above `max` on every axis.
    pub const EMPTY: BoundingBox = BoundingBox {
        min: [f32::MAX; 3],
        max: [f32::MIN; 3],
    };

    /// Returns `true` if no point was ever added.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    /// Grows the box to contain `point`.
    pub fn add_point(&mut self, point: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(point[axis]);
            self.max[axis] = self.max[axis].max(point[axis]);
        }
    }
}

/// One mesh of a model, at one level of detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDescription {
    /// Mesh name.
    pub name: String,
    /// Level of detail the mesh belongs to.
    #[serde(default)]
    pub lod: u32,
    /// Material binding name.
    #[serde(default)]
    pub material: String,
    /// Vertex positions.
    #[serde(default)]
    pub positions: Vec<[f32; 3]>,
}

/// Contents of a model scaffold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Highest level of detail the model provides.
    pub max_lod: u32,
    /// Meshes across all levels of detail.
    #[serde(default)]
    pub meshes: Vec<MeshDescription>,
}

impl ModelDescription {
    /// Bounds of every mesh at `lod`.
    ///
    /// Walks every vertex.
    pub fn static_bounding_box(&self, lod: u32) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        for mesh in self.meshes.iter().filter(|m| m.lod == lod) {
            for &position in &mesh.positions {
                bounds.add_point(position);
            }
        }
        bounds
    }
}

impl ScaffoldPayload for ModelDescription {
    const KIND: &'static str = "model";
}

/// Parameters of one material binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialEntry {
    /// Shader the material uses.
    pub shader: String,
    /// Scalar parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, f32>,
}

/// Contents of a material scaffold: material bindings by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialSet {
    /// Materials keyed by binding name.
    #[serde(default)]
    pub materials: BTreeMap<String, MaterialEntry>,
}

impl ScaffoldPayload for MaterialSet {
    const KIND: &'static str = "material";
}

/// Contents of a supplement scaffold: extra vertex streams for a
/// model/material pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupplementData {
    /// Names of the extra streams.
    #[serde(default)]
    pub streams: Vec<String>,
}

impl ScaffoldPayload for SupplementData {
    const KIND: &'static str = "supplement";
}

//! Layered cache of model, material and supplement scaffolds and the
//! renderers built from them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use kiln_assets::{AssetError, AssetState, CompileMarker, DependencyValidation, IntermediateCompilers};
use kiln_common::AssetHash;
use kiln_config::{CacheConfig, KilnConfig};
use parking_lot::ReentrantMutex;

use crate::lru_cache::{InsertType, LruCache};
use crate::payload::{
    BoundingBox, ScaffoldPayload, SupplementGuid, MATERIAL_SCAFFOLD_TYPE, MODEL_SCAFFOLD_TYPE,
};
use crate::renderer::{RendererFactory, RendererRequest};
use crate::scaffold::{MaterialScaffold, ModelScaffold, Scaffold, SupplementScaffold};

/// Model and material scaffolds for one model/material pair.
#[derive(Debug, Clone)]
pub struct Scaffolds {
    /// Hash of the model file name.
    pub model_hash: AssetHash,
    /// Model scaffold; may still be compiling.
    pub model: Arc<ModelScaffold>,
    /// Hash of the material file name combined with `model_hash`.
    pub material_hash: AssetHash,
    /// Material scaffold, only looked up once the model scaffold is ready.
    pub material: Option<Arc<MaterialScaffold>>,
}

/// A renderable model.
#[derive(Debug)]
pub struct Model<R> {
    /// The renderer.
    pub renderer: Arc<R>,
    /// Model scaffold the renderer was built from.
    pub model: Arc<ModelScaffold>,
    /// Bounds of the model at level of detail 0.
    pub bounding_box: BoundingBox,
    /// Hash of the model file name.
    pub model_hash: AssetHash,
    /// Hash of the material file name combined with `model_hash`.
    pub material_hash: AssetHash,
    /// Level of detail after clamping.
    pub selected_lod: u32,
    /// Highest level of detail of the model.
    pub max_lod: u32,
}

struct RendererEntry<R> {
    renderer: Arc<R>,
    validation: Arc<DependencyValidation>,
}

struct CacheState<R> {
    model_scaffolds: LruCache<ModelScaffold>,
    material_scaffolds: LruCache<MaterialScaffold>,
    supplements: LruCache<SupplementScaffold>,
    renderers: LruCache<RendererEntry<R>>,
    bounding_boxes: HashMap<AssetHash, BoundingBox>,
    reload_id: u32,
}

impl<R> CacheState<R> {
    /// Bumps the reload id when an insert replaced a previously returned
    /// value or evicted an unrelated entry.
    fn note_insert(&mut self, insert: InsertType) {
        if insert != InsertType::Add {
            self.reload_id = self.reload_id.wrapping_add(1);
        }
    }
}

type CacheCell<R> = RefCell<CacheState<R>>;

/// Selects one LRU layer of the cache state.
type Layer<R, V> = fn(&mut CacheState<R>) -> &mut LruCache<V>;

/// Strips a `:parameters` suffix (a sub-node selector) from the file part
/// of a model name.
pub fn strip_parameters(model: &str) -> &str {
    let file_start = model.rfind(|c| c == '/' || c == '\\').map_or(0, |i| i + 1);
    match model[file_start..].find(':') {
        Some(colon) => &model[..file_start + colon],
        None => model,
    }
}

/// Cache key of a renderer.
pub fn renderer_hash(model: &str, material: &str, lod: u32, supplements: &[SupplementGuid]) -> AssetHash {
    let base = AssetHash::of_str(model)
        .combine_hash(AssetHash::of_str(material))
        .combine(u64::from(lod));
    supplements.iter().fold(base, |hash, guid| hash.combine(*guid))
}

/// Cache key of a supplement scaffold.
pub fn supplement_hash(model: &str, material: &str, guid: SupplementGuid) -> AssetHash {
    AssetHash::of_str(model)
        .combine_hash(AssetHash::of_str(material))
        .combine(guid)
}

/// Layered LRU cache producing renderers for (model, material, supplements,
/// level of detail) requests.
///
/// Every layer re-creates an entry whose validation token has advanced.
/// [`ModelCache::reload_id`] changes whenever a value handed out earlier
/// is replaced, or an entry is evicted, so consumers can refresh derived
/// state without tracking individual hashes.
///
/// The cache is guarded by a reentrant lock. Compilers and the renderer
/// factory run with the lock held but without any borrow of the cache
/// state, so they may call back into the same cache.
pub struct ModelCache<F: RendererFactory> {
    compilers: Arc<dyn IntermediateCompilers>,
    factory: F,
    retry_budget: Option<u32>,
    state: ReentrantMutex<CacheCell<F::Renderer>>,
}

impl<F: RendererFactory> ModelCache<F> {
    /// Creates a cache with the capacities in `config`. Scaffold compiles
    /// are polled without limit.
    pub fn new(config: &CacheConfig, compilers: Arc<dyn IntermediateCompilers>, factory: F) -> Self {
        Self {
            compilers,
            factory,
            retry_budget: None,
            state: ReentrantMutex::new(RefCell::new(CacheState {
                model_scaffolds: LruCache::new(config.model_scaffolds),
                material_scaffolds: LruCache::new(config.material_scaffolds),
                supplements: LruCache::new(config.supplements),
                renderers: LruCache::new(config.renderers),
                bounding_boxes: HashMap::new(),
                reload_id: 0,
            })),
        }
    }

    /// Creates a cache from the `[cache]` capacities and the `[assets]`
    /// retry budget.
    pub fn from_config(config: &KilnConfig, compilers: Arc<dyn IntermediateCompilers>, factory: F) -> Self {
        Self::new(&config.cache, compilers, factory).with_retry_budget(config.assets.retry_budget)
    }

    /// Fails scaffold compiles that are still pending after `budget` polls.
    pub fn with_retry_budget(mut self, budget: Option<u32>) -> Self {
        self.retry_budget = budget;
        self
    }

    /// The renderer factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Counter that changes whenever a cached value is replaced or evicted.
    pub fn reload_id(&self) -> u32 {
        self.state.lock().borrow().reload_id
    }

    /// Resolves the scaffolds for a model/material pair.
    ///
    /// The material scaffold is only looked up once the model scaffold is
    /// ready; while the model is still compiling `material` is `None`. An
    /// invalid model scaffold fails the whole call.
    pub fn get_scaffolds(&self, model: &str, material: &str) -> Result<Scaffolds, AssetError> {
        let guard = self.state.lock();
        self.scaffolds(&guard, model, material)
    }

    /// Resolves only the model scaffold.
    pub fn get_model_scaffold(&self, model: &str) -> Result<Arc<ModelScaffold>, AssetError> {
        let guard = self.state.lock();
        self.model_scaffold(&guard, model)
    }

    /// Reports whether [`ModelCache::get_model`] would find both scaffolds,
    /// without building a renderer.
    pub fn prepare_model(&self, model: &str, material: &str) -> Result<AssetState, AssetError> {
        let scaffolds = match self.get_scaffolds(model, material) {
            Ok(scaffolds) => scaffolds,
            Err(err) if err.is_invalid() => return Ok(AssetState::Invalid),
            Err(err) => return Err(err),
        };
        Ok(match scaffolds.material {
            Some(material) => material.try_resolve(),
            None => AssetState::Pending,
        })
    }

    /// Returns a renderer for the request, building it when missing or
    /// stale.
    ///
    /// `lod` is clamped to the model's maximum level of detail.
    pub fn get_model(
        &self,
        model: &str,
        material: &str,
        supplements: &[SupplementGuid],
        lod: u32,
    ) -> Result<Model<F::Renderer>, AssetError> {
        let guard = self.state.lock();
        let cell: &CacheCell<F::Renderer> = &guard;

        let scaffolds = self.scaffolds(cell, model, material)?;
        let material_scaffold = scaffolds
            .material
            .ok_or_else(|| AssetError::pending(model, "scaffolds still pending"))?;
        let description = scaffolds.model.payload()?;
        let materials = material_scaffold.payload()?;

        let max_lod = description.max_lod;
        let lod = lod.min(max_lod);
        let key = renderer_hash(model, material, lod, supplements);

        let (entry, _) = self.cached(
            cell,
            |state| &mut state.renderers,
            key,
            |entry: &RendererEntry<F::Renderer>| entry.validation.is_valid(),
            || {
                let supplement_scaffolds = self.supplements(cell, model, material, supplements)?;
                let supplement_data = supplement_scaffolds
                    .iter()
                    .map(|s| s.payload())
                    .collect::<Result<Vec<_>, _>>()?;

                let renderer = self.factory.build(&RendererRequest {
                    model_name: model,
                    material_name: material,
                    model: &description,
                    materials: &materials,
                    supplements: &supplement_data,
                    lod,
                })?;

                let validation = DependencyValidation::new();
                DependencyValidation::register_dependency(&validation, scaffolds.model.dependency_validation());
                DependencyValidation::register_dependency(&validation, material_scaffold.dependency_validation());
                for supplement in &supplement_scaffolds {
                    DependencyValidation::register_dependency(&validation, supplement.dependency_validation());
                }

                log::debug!("built renderer for {model}, {material} at lod {lod}");
                Ok(Arc::new(RendererEntry {
                    renderer: Arc::new(renderer),
                    validation,
                }))
            },
        )?;

        let bounding_box = *cell
            .borrow_mut()
            .bounding_boxes
            .entry(scaffolds.model_hash)
            .or_insert_with(|| description.static_bounding_box(0));

        Ok(Model {
            renderer: Arc::clone(&entry.renderer),
            model: scaffolds.model,
            bounding_box,
            model_hash: scaffolds.model_hash,
            material_hash: scaffolds.material_hash,
            selected_lod: lod,
            max_lod,
        })
    }

    /// Drops every cached scaffold, renderer and bounding box.
    ///
    /// Values already handed out stay valid. The reload id changes if
    /// anything was cached.
    pub fn clear(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let had_entries = !(state.model_scaffolds.is_empty()
            && state.material_scaffolds.is_empty()
            && state.supplements.is_empty()
            && state.renderers.is_empty());
        state.model_scaffolds.clear();
        state.material_scaffolds.clear();
        state.supplements.clear();
        state.renderers.clear();
        state.bounding_boxes.clear();
        if had_entries {
            state.reload_id = state.reload_id.wrapping_add(1);
        }
    }

    /// One line per layer with its entry count, plus the reload id.
    pub fn report(&self) -> Vec<String> {
        let guard = self.state.lock();
        let state = guard.borrow();
        vec![
            format!("{} model scaffolds", state.model_scaffolds.len()),
            format!("{} material scaffolds", state.material_scaffolds.len()),
            format!("{} supplement scaffolds", state.supplements.len()),
            format!("{} renderers", state.renderers.len()),
            format!("reload id {}", state.reload_id),
        ]
    }

    /// Writes [`ModelCache::report`] to the log at info level.
    pub fn log_report(&self) {
        for line in self.report() {
            log::info!("{line}");
        }
    }

    /// Returns the current entry of `layer` for `hash`, building and
    /// inserting a replacement when it is missing or not current.
    ///
    /// `build` runs without any borrow of the cache state. The slot is
    /// checked again afterwards, and an entry a reentrant call inserted in
    /// the meantime wins over the one just built. The insert type is
    /// returned when this call inserted.
    fn cached<V>(
        &self,
        cell: &CacheCell<F::Renderer>,
        layer: Layer<F::Renderer, V>,
        hash: AssetHash,
        is_current: impl Fn(&V) -> bool,
        build: impl FnOnce() -> Result<Arc<V>, AssetError>,
    ) -> Result<(Arc<V>, Option<InsertType>), AssetError> {
        let cached = layer(&mut *cell.borrow_mut()).get(hash);
        if let Some(value) = cached.filter(|value| is_current(&**value)) {
            return Ok((value, None));
        }

        let fresh = build()?;

        let mut state = cell.borrow_mut();
        if let Some(value) = layer(&mut *state).peek(hash).filter(|value| is_current(&**value)) {
            return Ok((value, None));
        }
        let insert = layer(&mut *state).insert(hash, Arc::clone(&fresh));
        state.note_insert(insert);
        Ok((fresh, Some(insert)))
    }

    fn prepare(&self, type_code: u64, initializers: &[&str]) -> Result<Arc<dyn CompileMarker>, AssetError> {
        self.compilers
            .prepare_asset(type_code, initializers)
            .ok_or_else(|| {
                AssetError::invalid(
                    initializers.join(", "),
                    format!("no compiler for type code {type_code:#x}"),
                )
            })
    }

    fn create<P: ScaffoldPayload>(
        &self,
        type_code: u64,
        initializers: &[&str],
    ) -> Result<Arc<Scaffold<P>>, AssetError> {
        let marker = self.prepare(type_code, initializers)?;
        Ok(Arc::new(Scaffold::with_retry_budget(marker.as_ref(), self.retry_budget)))
    }

    fn model_scaffold(
        &self,
        cell: &CacheCell<F::Renderer>,
        model: &str,
    ) -> Result<Arc<ModelScaffold>, AssetError> {
        let hash = AssetHash::of_str(model);
        let (scaffold, insert) = self.cached(
            cell,
            |state| &mut state.model_scaffolds,
            hash,
            |scaffold: &ModelScaffold| scaffold.is_current(),
            || self.create(MODEL_SCAFFOLD_TYPE, &[model]),
        )?;
        if insert == Some(InsertType::Update) {
            cell.borrow_mut().bounding_boxes.remove(&hash);
        }
        Ok(scaffold)
    }

    fn scaffolds(
        &self,
        cell: &CacheCell<F::Renderer>,
        model: &str,
        material: &str,
    ) -> Result<Scaffolds, AssetError> {
        let model_hash = AssetHash::of_str(model);
        let material_hash = AssetHash::of_str(material).combine_hash(model_hash);
        let model_scaffold = self.model_scaffold(cell, model)?;

        let material_scaffold = match model_scaffold.try_resolve() {
            AssetState::Ready => {
                let (scaffold, _) = self.cached(
                    cell,
                    |state| &mut state.material_scaffolds,
                    material_hash,
                    |scaffold: &MaterialScaffold| scaffold.is_current(),
                    || self.create(MATERIAL_SCAFFOLD_TYPE, &[material, strip_parameters(model)]),
                )?;
                Some(scaffold)
            }
            AssetState::Invalid => {
                let reason = model_scaffold
                    .payload()
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_default();
                return Err(AssetError::invalid(
                    model,
                    format!("model scaffold invalid: {reason}"),
                ));
            }
            AssetState::Pending => None,
        };

        Ok(Scaffolds {
            model_hash,
            model: model_scaffold,
            material_hash,
            material: material_scaffold,
        })
    }

    fn supplements(
        &self,
        cell: &CacheCell<F::Renderer>,
        model: &str,
        material: &str,
        guids: &[SupplementGuid],
    ) -> Result<Vec<Arc<SupplementScaffold>>, AssetError> {
        guids
            .iter()
            .map(|&guid| -> Result<_, AssetError> {
                let (scaffold, _) = self.cached(
                    cell,
                    |state| &mut state.supplements,
                    supplement_hash(model, material, guid),
                    |scaffold: &SupplementScaffold| scaffold.is_current(),
                    || self.create(guid, &[model, material]),
                )?;
                Ok(scaffold)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_parameters_removes_sub_node_selector() {
        assert_eq!(strip_parameters("models/tree.dae:trunk"), "models/tree.dae");
        assert_eq!(strip_parameters("models/tree.dae"), "models/tree.dae");
        assert_eq!(strip_parameters("tree.dae:a:b"), "tree.dae");
        assert_eq!(strip_parameters("C:\\art\\tree.dae"), "C:\\art\\tree.dae");
        assert_eq!(strip_parameters("C:\\art\\tree.dae:leaves"), "C:\\art\\tree.dae");
    }

    #[test]
    fn renderer_hash_depends_on_every_part() {
        let base = renderer_hash("m.dae", "m.mat", 0, &[]);
        assert_eq!(base, renderer_hash("m.dae", "m.mat", 0, &[]));
        assert_ne!(base, renderer_hash("m.dae", "m.mat", 1, &[]));
        assert_ne!(base, renderer_hash("m.dae", "other.mat", 0, &[]));
        assert_ne!(base, renderer_hash("m.dae", "m.mat", 0, &[7]));
        assert_ne!(
            renderer_hash("m.dae", "m.mat", 0, &[7, 9]),
            renderer_hash("m.dae", "m.mat", 0, &[9, 7])
        );
    }

    #[test]
    fn supplement_hash_includes_guid() {
        assert_ne!(
            supplement_hash("m.dae", "m.mat", 1),
            supplement_hash("m.dae", "m.mat", 2)
        );
    }

    #[test]
    fn reload_id_rule() {
        let mut state: CacheState<()> = CacheState {
            model_scaffolds: LruCache::new(1),
            material_scaffolds: LruCache::new(1),
            supplements: LruCache::new(1),
            renderers: LruCache::new(1),
            bounding_boxes: HashMap::new(),
            reload_id: u32::MAX,
        };
        state.note_insert(InsertType::Add);
        assert_eq!(state.reload_id, u32::MAX);
        state.note_insert(InsertType::Update);
        assert_eq!(state.reload_id, 0);
        state.note_insert(InsertType::EvictAndReplace);
        assert_eq!(state.reload_id, 1);
    }
}

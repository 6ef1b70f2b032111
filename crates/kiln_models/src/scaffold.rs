//! Scaffolds: decoded compiled artifacts that track their own compile.

use std::fmt;
use std::sync::Arc;

use kiln_assets::{
    Asset, AssetError, AssetServices, AssetState, CompileMarker, Construction, DependencyValidation,
    Locator, PendingCompile,
};
use kiln_common::AssetId;
use parking_lot::Mutex;

use crate::payload::{
    MaterialSet, ModelDescription, ScaffoldPayload, SupplementData, MATERIAL_SCAFFOLD_TYPE,
    MODEL_SCAFFOLD_TYPE,
};

enum ScaffoldState<P> {
    Compiling { handle: Arc<PendingCompile>, polls: u32 },
    Ready(Arc<P>),
    Invalid(String),
}

impl<P> ScaffoldState<P> {
    fn compiling(handle: Arc<PendingCompile>) -> Self {
        ScaffoldState::Compiling { handle, polls: 0 }
    }
}

/// A compiled artifact of kind `P`, built around the compile marker that
/// produces it.
///
/// Creating a scaffold never blocks. If a current artifact exists it is
/// loaded at once; otherwise a compile is started and
/// [`Scaffold::try_resolve`] picks up the result once it lands.
pub struct Scaffold<P> {
    name: String,
    validation: Arc<DependencyValidation>,
    retry_budget: Option<u32>,
    state: Mutex<ScaffoldState<P>>,
}

/// Scaffold of a model file.
pub type ModelScaffold = Scaffold<ModelDescription>;
/// Scaffold of a material file, specific to one model file.
pub type MaterialScaffold = Scaffold<MaterialSet>;
/// Scaffold of a supplement for a model/material pair.
pub type SupplementScaffold = Scaffold<SupplementData>;

/// Makes `validation` follow `upstream`, advancing it at once if `upstream`
/// is already stale.
fn follow(validation: &Arc<DependencyValidation>, upstream: &Arc<DependencyValidation>) {
    DependencyValidation::register_dependency(validation, upstream);
    if !upstream.is_valid() {
        validation.on_change();
    }
}

impl<P: ScaffoldPayload> Scaffold<P> {
    /// Creates the scaffold from a compile marker, polling its compile for
    /// as long as it takes.
    pub fn new(marker: &dyn CompileMarker) -> Self {
        Self::with_retry_budget(marker, None)
    }

    /// Creates the scaffold from a compile marker. A compile still pending
    /// after `retry_budget` polls is failed and the scaffold turns invalid.
    pub fn with_retry_budget(marker: &dyn CompileMarker, retry_budget: Option<u32>) -> Self {
        let name = marker.initializer();
        let validation = DependencyValidation::new();
        let state = match marker.existing_asset().filter(Locator::is_current) {
            Some(locator) => match Self::load(&name, &locator, &validation) {
                Ok(payload) => ScaffoldState::Ready(Arc::new(payload)),
                Err(err) if err.is_recoverable() => {
                    log::warn!("{} scaffold {name} unusable ({err}), recompiling", P::KIND);
                    ScaffoldState::compiling(marker.invoke_compile())
                }
                Err(err) => ScaffoldState::Invalid(err.to_string()),
            },
            None => ScaffoldState::compiling(marker.invoke_compile()),
        };
        Self {
            name,
            validation,
            retry_budget,
            state: Mutex::new(state),
        }
    }

    fn load(
        name: &str,
        locator: &Locator,
        validation: &Arc<DependencyValidation>,
    ) -> Result<P, AssetError> {
        let bytes = locator.read()?;
        let payload =
            serde_json::from_slice(&bytes).map_err(|e| AssetError::corrupt(name, e.to_string()))?;
        if let Some(upstream) = locator.dependency_validation() {
            follow(validation, upstream);
        }
        Ok(payload)
    }

    /// Advances the scaffold's compile and reports where it stands.
    pub fn try_resolve(&self) -> AssetState {
        let mut state = self.state.lock();
        let handle = match &*state {
            ScaffoldState::Ready(_) => return AssetState::Ready,
            ScaffoldState::Invalid(_) => return AssetState::Invalid,
            ScaffoldState::Compiling { handle, .. } => Arc::clone(handle),
        };
        match handle.asset_state() {
            AssetState::Pending => {
                let ScaffoldState::Compiling { polls, .. } = &mut *state else {
                    return AssetState::Pending;
                };
                *polls = polls.saturating_add(1);
                match self.retry_budget {
                    Some(budget) if *polls > budget => {
                        let reason = format!("compile still pending after {budget} polls");
                        if !handle.fail(reason.clone(), None) {
                            // Finished between the two checks; pick it up next time.
                            return AssetState::Pending;
                        }
                        log::warn!("giving up on {} scaffold {}: {reason}", P::KIND, self.name);
                        *state = ScaffoldState::Invalid(reason);
                        AssetState::Invalid
                    }
                    _ => AssetState::Pending,
                }
            }
            AssetState::Invalid => {
                if let Some(sources) = handle.failure_validation() {
                    follow(&self.validation, &sources);
                }
                *state = ScaffoldState::Invalid(handle.failure().unwrap_or_default());
                AssetState::Invalid
            }
            AssetState::Ready => {
                let loaded = handle
                    .locator()
                    .ok_or_else(|| AssetError::invalid(&self.name, "compile finished without a locator"))
                    .and_then(|locator| Self::load(&self.name, &locator, &self.validation));
                match loaded {
                    Ok(payload) => {
                        *state = ScaffoldState::Ready(Arc::new(payload));
                        AssetState::Ready
                    }
                    Err(err) => {
                        *state = ScaffoldState::Invalid(err.to_string());
                        AssetState::Invalid
                    }
                }
            }
        }
    }

    /// The decoded payload, or the `Pending`/`Invalid` error explaining why
    /// it is not available.
    pub fn payload(&self) -> Result<Arc<P>, AssetError> {
        self.try_resolve();
        match &*self.state.lock() {
            ScaffoldState::Ready(payload) => Ok(Arc::clone(payload)),
            ScaffoldState::Compiling { .. } => Err(AssetError::pending(&self.name, "compile still pending")),
            ScaffoldState::Invalid(reason) => Err(AssetError::invalid(&self.name, reason.clone())),
        }
    }
}

impl<P> Scaffold<P> {
    /// Descriptive initializer of the compile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advances when the compiled artifact's sources change.
    pub fn dependency_validation(&self) -> &Arc<DependencyValidation> {
        &self.validation
    }

    /// Returns `true` while the validation token has not advanced.
    pub fn is_current(&self) -> bool {
        self.validation.is_valid()
    }
}

impl<P> fmt::Debug for Scaffold<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            ScaffoldState::Compiling { .. } => "compiling",
            ScaffoldState::Ready(_) => "ready",
            ScaffoldState::Invalid(_) => "invalid",
        };
        f.debug_struct("Scaffold")
            .field("name", &self.name)
            .field("state", &state)
            .field("validation_index", &self.validation.validation_index())
            .finish()
    }
}

impl Asset for ModelScaffold {
    const COMPILE_PROCESS_TYPE: u64 = MODEL_SCAFFOLD_TYPE;
    const CONSTRUCTION: Construction = Construction::Direct;

    fn dependency_validation(&self) -> &Arc<DependencyValidation> {
        &self.validation
    }

    fn from_marker(marker: Arc<dyn CompileMarker>, _: &AssetId, services: &AssetServices) -> Result<Self, AssetError> {
        Ok(Self::with_retry_budget(marker.as_ref(), services.options().retry_budget))
    }

    fn ready_for_replacement(&self) -> bool {
        self.try_resolve() != AssetState::Pending
    }
}

impl Asset for MaterialScaffold {
    const COMPILE_PROCESS_TYPE: u64 = MATERIAL_SCAFFOLD_TYPE;
    const CONSTRUCTION: Construction = Construction::Direct;

    fn dependency_validation(&self) -> &Arc<DependencyValidation> {
        &self.validation
    }

    fn from_marker(marker: Arc<dyn CompileMarker>, _: &AssetId, services: &AssetServices) -> Result<Self, AssetError> {
        Ok(Self::with_retry_budget(marker.as_ref(), services.options().retry_budget))
    }

    fn ready_for_replacement(&self) -> bool {
        self.try_resolve() != AssetState::Pending
    }
}

//! Compile markers, async compile handles and artifact locators.

use std::fmt;
use std::sync::Arc;

use kiln_common::AssetHash;
use kiln_store::IntermediateStore;
use parking_lot::Mutex;

use crate::error::AssetError;
use crate::validation::DependencyValidation;

/// State of a compile or resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetState {
    /// Still in flight.
    Pending,
    /// Finished successfully.
    Ready,
    /// Failed terminally for the current inputs.
    Invalid,
}

#[derive(Clone)]
enum Payload {
    Memory(Arc<[u8]>),
    Stored {
        store: Arc<IntermediateStore>,
        type_code: u64,
        hash: AssetHash,
    },
}

/// Where a compiled artifact can be loaded from.
///
/// The payload is read lazily by [`Locator::read`], so a locator can exist
/// for an artifact whose blob has since gone missing or been overwritten by
/// an incompatible version.
#[derive(Clone)]
pub struct Locator {
    source_id: String,
    validation: Option<Arc<DependencyValidation>>,
    payload: Payload,
}

impl Locator {
    /// A locator for bytes already in memory.
    pub fn in_memory(
        source_id: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        validation: Option<Arc<DependencyValidation>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            validation,
            payload: Payload::Memory(bytes.into()),
        }
    }

    /// A locator for an artifact in the intermediate store.
    pub fn stored(
        store: Arc<IntermediateStore>,
        type_code: u64,
        hash: AssetHash,
        source_id: impl Into<String>,
        validation: Option<Arc<DependencyValidation>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            validation,
            payload: Payload::Stored {
                store,
                type_code,
                hash,
            },
        }
    }

    /// Name of the artifact, for diagnostics.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The artifact's validation token, if it has one.
    pub fn dependency_validation(&self) -> Option<&Arc<DependencyValidation>> {
        self.validation.as_ref()
    }

    /// Returns `true` if the locator has a token and that token is valid.
    ///
    /// A locator without a token cannot be proven current.
    pub fn is_current(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.is_valid())
    }

    /// Reads the artifact bytes.
    pub fn read(&self) -> Result<Vec<u8>, AssetError> {
        match &self.payload {
            Payload::Memory(bytes) => Ok(bytes.to_vec()),
            Payload::Stored {
                store,
                type_code,
                hash,
            } => store
                .read(*type_code, *hash)
                .map_err(|e| AssetError::from_store(self.source_id.clone(), e)),
        }
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("source_id", &self.source_id)
            .field(
                "validation_index",
                &self.validation.as_ref().map(|v| v.validation_index()),
            )
            .finish_non_exhaustive()
    }
}

enum CompileState {
    Pending,
    Ready(Locator),
    Invalid {
        reason: String,
        validation: Option<Arc<DependencyValidation>>,
    },
}

/// Handle to an in-flight compile, shared by whoever runs the compile and
/// whoever waits for it.
///
/// The state moves from pending to exactly one of ready or invalid; later
/// transitions are ignored.
pub struct PendingCompile {
    initializer: String,
    state: Mutex<CompileState>,
}

impl PendingCompile {
    /// Creates a pending handle.
    pub fn new(initializer: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            initializer: initializer.into(),
            state: Mutex::new(CompileState::Pending),
        })
    }

    /// Creates a handle that is already complete.
    pub fn ready(initializer: impl Into<String>, locator: Locator) -> Arc<Self> {
        let handle = Self::new(initializer);
        handle.complete(locator);
        handle
    }

    /// Descriptive initializer string of the compile.
    pub fn initializer(&self) -> &str {
        &self.initializer
    }

    /// Current state.
    pub fn asset_state(&self) -> AssetState {
        match &*self.state.lock() {
            CompileState::Pending => AssetState::Pending,
            CompileState::Ready(_) => AssetState::Ready,
            CompileState::Invalid { .. } => AssetState::Invalid,
        }
    }

    /// Locator of the compiled artifact, once ready.
    pub fn locator(&self) -> Option<Locator> {
        match &*self.state.lock() {
            CompileState::Ready(locator) => Some(locator.clone()),
            _ => None,
        }
    }

    /// Failure reason, once invalid.
    pub fn failure(&self) -> Option<String> {
        match &*self.state.lock() {
            CompileState::Invalid { reason, .. } => Some(reason.clone()),
            _ => None,
        }
    }

    /// Token of the sources a failed compile read; advances when any of
    /// them changes.
    pub fn failure_validation(&self) -> Option<Arc<DependencyValidation>> {
        match &*self.state.lock() {
            CompileState::Invalid { validation, .. } => validation.clone(),
            _ => None,
        }
    }

    /// Marks the compile as finished. Returns `false` if it already was.
    pub fn complete(&self, locator: Locator) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, CompileState::Pending) {
            return false;
        }
        *state = CompileState::Ready(locator);
        true
    }

    /// Marks the compile as failed. Returns `false` if it already finished.
    pub fn fail(
        &self,
        reason: impl Into<String>,
        validation: Option<Arc<DependencyValidation>>,
    ) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, CompileState::Pending) {
            return false;
        }
        *state = CompileState::Invalid {
            reason: reason.into(),
            validation,
        };
        true
    }
}

impl fmt::Debug for PendingCompile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCompile")
            .field("initializer", &self.initializer)
            .field("state", &self.asset_state())
            .finish()
    }
}

/// A compilation request for one logical identifier.
///
/// Produced by [`IntermediateCompilers::prepare_asset`](crate::compiler::IntermediateCompilers::prepare_asset).
/// A marker can report an already-compiled artifact or start a new compile;
/// it never blocks.
pub trait CompileMarker: Send + Sync {
    /// Locator of a previously compiled artifact, if one exists. Its token
    /// may already be stale.
    fn existing_asset(&self) -> Option<Locator>;

    /// Starts a compile and returns its handle.
    fn invoke_compile(&self) -> Arc<PendingCompile>;

    /// Descriptive initializer string.
    fn initializer(&self) -> String;

    /// `Ready` if a current compiled artifact exists, otherwise `Pending`.
    fn asset_state(&self) -> AssetState {
        match self.existing_asset() {
            Some(locator) if locator.is_current() => AssetState::Ready,
            _ => AssetState::Pending,
        }
    }
}

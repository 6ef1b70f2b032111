//! Locally edited, uncommitted overlays of committed assets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_common::{AssetHash, AssetId};
use parking_lot::RwLock;

/// Names a divergent asset for editors and save dialogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergentIdentifier {
    /// Human-readable name of the asset.
    pub descriptive_name: String,
    /// File local changes would be written back to.
    pub target_filename: String,
}

impl DivergentIdentifier {
    /// Derives the identifier from an asset id.
    pub fn from_id(id: &AssetId) -> Self {
        Self {
            descriptive_name: id.descriptive_name(),
            target_filename: id.target_filename(),
        }
    }
}

/// An editable copy of an asset that shadows the committed one while it
/// has local changes.
///
/// Edits go through [`DivergentAsset::transaction`], which works on a copy
/// and swaps it in, so callers holding the previous working copy keep a
/// consistent value.
pub struct DivergentAsset<A> {
    hash: AssetHash,
    identifier: DivergentIdentifier,
    baseline: Arc<A>,
    working: RwLock<Arc<A>>,
    has_changes: AtomicBool,
}

impl<A> DivergentAsset<A> {
    pub(crate) fn new(hash: AssetHash, identifier: DivergentIdentifier, baseline: Arc<A>) -> Self {
        Self {
            hash,
            identifier,
            working: RwLock::new(Arc::clone(&baseline)),
            baseline,
            has_changes: AtomicBool::new(false),
        }
    }

    /// Hash of the identifier this overlay shadows.
    pub fn hash(&self) -> AssetHash {
        self.hash
    }

    /// Names of the overlay.
    pub fn identifier(&self) -> &DivergentIdentifier {
        &self.identifier
    }

    /// Current working copy.
    pub fn asset(&self) -> Arc<A> {
        Arc::clone(&self.working.read())
    }

    /// Returns `true` once an edit has been made and not abandoned.
    pub fn has_changes(&self) -> bool {
        self.has_changes.load(Ordering::Acquire)
    }

    /// Discards local changes; the committed asset shows through again.
    pub fn abandon(&self) {
        *self.working.write() = Arc::clone(&self.baseline);
        self.has_changes.store(false, Ordering::Release);
    }
}

impl<A: Clone> DivergentAsset<A> {
    /// Applies an edit to a copy of the working asset and publishes it.
    pub fn transaction<R>(&self, edit: impl FnOnce(&mut A) -> R) -> R {
        let mut working = self.working.write();
        let mut copy = A::clone(&working);
        let result = edit(&mut copy);
        *working = Arc::new(copy);
        self.has_changes.store(true, Ordering::Release);
        result
    }
}

impl<A> std::fmt::Debug for DivergentAsset<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DivergentAsset")
            .field("hash", &self.hash)
            .field("identifier", &self.identifier)
            .field("has_changes", &self.has_changes())
            .finish()
    }
}

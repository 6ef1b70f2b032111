//! The capability interface every cached asset kind implements.

use std::sync::Arc;

use kiln_common::AssetId;

use crate::error::AssetError;
use crate::marker::{CompileMarker, Locator};
use crate::services::AssetServices;
use crate::validation::DependencyValidation;

/// How an asset table builds a new instance of an asset kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Construction {
    /// Built synchronously from the raw initializers
    /// ([`Asset::from_initializers`]). No compiler is involved.
    Immediate,
    /// The asset drives its own compile: the table obtains a compile marker
    /// and hands it to [`Asset::from_marker`].
    Direct,
    /// The table manages compile state and materializes the asset from a
    /// compiled artifact with [`Asset::from_locator`].
    Orchestrated,
}

/// Whether a resolve checks the cached asset's validation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyCheck {
    /// Refresh when the token has advanced.
    #[default]
    Always,
    /// Only construct when nothing is cached.
    Never,
}

impl DependencyCheck {
    /// Maps the `check_dependencies` config flag onto a policy.
    pub fn from_flag(check: bool) -> Self {
        if check {
            DependencyCheck::Always
        } else {
            DependencyCheck::Never
        }
    }

    /// Returns `true` if `asset` has to be (re)constructed.
    pub fn needs_refresh<A: Asset>(self, asset: Option<&A>) -> bool {
        match (self, asset) {
            (_, None) => true,
            (DependencyCheck::Always, Some(asset)) => !asset.dependency_validation().is_valid(),
            (DependencyCheck::Never, Some(_)) => false,
        }
    }
}

/// An asset kind that can live in an [`AssetTable`](crate::table::AssetTable).
///
/// Implementors pick a [`Construction`] strategy and override the matching
/// constructor; the others default to an `Invalid` error. Constructors get
/// the owning [`AssetServices`] so they can resolve other assets, including
/// assets of the same kind.
pub trait Asset: Send + Sync + Sized + 'static {
    /// Type code passed to the compiler layer.
    const COMPILE_PROCESS_TYPE: u64;

    /// Construction strategy.
    const CONSTRUCTION: Construction = Construction::Orchestrated;

    /// The asset's validation token.
    fn dependency_validation(&self) -> &Arc<DependencyValidation>;

    /// Materializes the asset from a compiled artifact.
    fn from_locator(
        locator: &Locator,
        id: &AssetId,
        services: &AssetServices,
    ) -> Result<Self, AssetError> {
        let _ = (locator, services);
        Err(AssetError::invalid(
            id.descriptive_name(),
            "asset kind cannot be loaded from a compiled artifact",
        ))
    }

    /// Builds the asset around a compile marker it manages itself.
    fn from_marker(
        marker: Arc<dyn CompileMarker>,
        id: &AssetId,
        services: &AssetServices,
    ) -> Result<Self, AssetError> {
        let _ = (marker, services);
        Err(AssetError::invalid(
            id.descriptive_name(),
            "asset kind does not manage its own compile",
        ))
    }

    /// Builds the asset directly from its initializers.
    fn from_initializers(id: &AssetId, services: &AssetServices) -> Result<Self, AssetError> {
        let _ = services;
        Err(AssetError::invalid(
            id.descriptive_name(),
            "asset kind cannot be built from initializers",
        ))
    }

    /// Creates a blank asset to edit when the committed one is invalid.
    fn create_new(id: &AssetId, services: &AssetServices) -> Result<Self, AssetError> {
        let _ = services;
        Err(AssetError::invalid(
            id.descriptive_name(),
            "asset kind cannot be created from scratch",
        ))
    }

    /// Whether a constructed replacement may take over from the active
    /// instance yet.
    fn ready_for_replacement(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain(Arc<DependencyValidation>);

    impl Asset for Plain {
        const COMPILE_PROCESS_TYPE: u64 = 7;
        fn dependency_validation(&self) -> &Arc<DependencyValidation> {
            &self.0
        }
    }

    #[test]
    fn missing_asset_always_needs_refresh() {
        assert!(DependencyCheck::Always.needs_refresh::<Plain>(None));
        assert!(DependencyCheck::Never.needs_refresh::<Plain>(None));
    }

    #[test]
    fn stale_token_only_matters_when_checking() {
        let asset = Plain(DependencyValidation::new());
        assert!(!DependencyCheck::Always.needs_refresh(Some(&asset)));

        asset.0.on_change();
        assert!(DependencyCheck::Always.needs_refresh(Some(&asset)));
        assert!(!DependencyCheck::Never.needs_refresh(Some(&asset)));
    }

    #[test]
    fn defaults() {
        assert_eq!(Plain::CONSTRUCTION, Construction::Orchestrated);
        assert_eq!(DependencyCheck::default(), DependencyCheck::Always);
        assert_eq!(DependencyCheck::from_flag(false), DependencyCheck::Never);
        assert!(Plain(DependencyValidation::new()).ready_for_replacement());
    }
}

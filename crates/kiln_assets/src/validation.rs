//! Dependency validation tokens.
//!
//! A [`DependencyValidation`] is shared between an artifact and everything
//! that needs to know whether the artifact is stale. Its validation index
//! starts at 0 and only ever grows; any nonzero index means "needs refresh".
//! Tokens can be chained so that a change to one token advances every
//! dependent token as well (source file → stored artifact → scaffold →
//! renderer).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Versioned staleness indicator attached to an artifact.
///
/// The dependency graph formed by [`DependencyValidation::register_dependency`]
/// must be acyclic.
#[derive(Debug, Default)]
pub struct DependencyValidation {
    index: AtomicU64,
    dependents: Mutex<Vec<Weak<DependencyValidation>>>,
    dependencies: Mutex<Vec<Arc<DependencyValidation>>>,
}

impl DependencyValidation {
    /// Creates a fresh, valid token.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current validation index. 0 means valid.
    pub fn validation_index(&self) -> u64 {
        self.index.load(Ordering::Acquire)
    }

    /// Returns `true` while the validation index is 0.
    pub fn is_valid(&self) -> bool {
        self.validation_index() == 0
    }

    /// Records that the underlying inputs changed.
    ///
    /// Advances this token and, transitively, every live dependent.
    pub fn on_change(&self) {
        self.index.fetch_add(1, Ordering::AcqRel);
        let dependents: Vec<Arc<DependencyValidation>> = {
            let mut dependents = self.dependents.lock();
            dependents.retain(|d| d.strong_count() > 0);
            dependents.iter().filter_map(Weak::upgrade).collect()
        };
        for dependent in dependents {
            dependent.on_change();
        }
    }

    /// Makes `dependent` advance whenever `dependency` does.
    ///
    /// `dependent` keeps `dependency` alive, so intermediate tokens in a
    /// chain do not need another owner. Only a weak reference to `dependent`
    /// is kept; dependents that have been dropped are pruned here.
    pub fn register_dependency(dependent: &Arc<Self>, dependency: &Arc<Self>) {
        {
            let mut dependents = dependency.dependents.lock();
            dependents.retain(|d| d.strong_count() > 0);
            dependents.push(Arc::downgrade(dependent));
        }
        dependent.dependencies.lock().push(Arc::clone(dependency));
    }

    /// Number of live dependents.
    pub fn dependent_count(&self) -> usize {
        self.dependents
            .lock()
            .iter()
            .filter(|d| d.strong_count() > 0)
            .count()
    }
}

/// One shared validation token per source file.
///
/// Artifacts built from a file register their own tokens as dependents of
/// the file's token, so reporting a file change invalidates all of them.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    tokens: Mutex<HashMap<PathBuf, Arc<DependencyValidation>>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the token for `path`, creating it on first use.
    pub fn token_for(&self, path: &Path) -> Arc<DependencyValidation> {
        self.tokens
            .lock()
            .entry(path.to_path_buf())
            .or_insert_with(DependencyValidation::new)
            .clone()
    }

    /// Reports that `path` changed. Returns `false` if nothing ever
    /// depended on it.
    pub fn mark_changed(&self, path: &Path) -> bool {
        let token = self.tokens.lock().get(path).cloned();
        match token {
            Some(token) => {
                log::debug!("source changed: {}", path.display());
                token.on_change();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_valid() {
        let token = DependencyValidation::new();
        assert_eq!(token.validation_index(), 0);
        assert!(token.is_valid());
    }

    #[test]
    fn on_change_advances_index() {
        let token = DependencyValidation::new();
        token.on_change();
        token.on_change();
        assert_eq!(token.validation_index(), 2);
        assert!(!token.is_valid());
    }

    #[test]
    fn change_propagates_transitively() {
        let source = DependencyValidation::new();
        let scaffold = DependencyValidation::new();
        let renderer = DependencyValidation::new();
        DependencyValidation::register_dependency(&scaffold, &source);
        DependencyValidation::register_dependency(&renderer, &scaffold);

        source.on_change();
        assert_eq!(scaffold.validation_index(), 1);
        assert_eq!(renderer.validation_index(), 1);
    }

    #[test]
    fn change_does_not_propagate_upstream() {
        let source = DependencyValidation::new();
        let scaffold = DependencyValidation::new();
        DependencyValidation::register_dependency(&scaffold, &source);

        scaffold.on_change();
        assert!(source.is_valid());
    }

    #[test]
    fn intermediate_tokens_are_kept_alive_by_dependents() {
        let source = DependencyValidation::new();
        let renderer = DependencyValidation::new();
        {
            let artifact = DependencyValidation::new();
            DependencyValidation::register_dependency(&artifact, &source);
            DependencyValidation::register_dependency(&renderer, &artifact);
        }
        source.on_change();
        assert!(!renderer.is_valid());
    }

    #[test]
    fn registering_prunes_dropped_dependents() {
        let source = DependencyValidation::new();
        for _ in 0..1000 {
            let transient = DependencyValidation::new();
            DependencyValidation::register_dependency(&transient, &source);
        }
        let kept = DependencyValidation::new();
        DependencyValidation::register_dependency(&kept, &source);
        assert_eq!(source.dependents.lock().len(), 1);
        assert!(source.is_valid());
    }

    #[test]
    fn dropped_dependents_are_pruned() {
        let source = DependencyValidation::new();
        {
            let transient = DependencyValidation::new();
            DependencyValidation::register_dependency(&transient, &source);
            assert_eq!(source.dependent_count(), 1);
        }
        assert_eq!(source.dependent_count(), 0);
        source.on_change();
        assert_eq!(source.validation_index(), 1);
    }

    #[test]
    fn registry_shares_tokens_per_path() {
        let registry = SourceRegistry::new();
        let a = registry.token_for(Path::new("a.dae"));
        let b = registry.token_for(Path::new("a.dae"));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn mark_changed_invalidates_dependents() {
        let registry = SourceRegistry::new();
        let artifact = DependencyValidation::new();
        DependencyValidation::register_dependency(&artifact, &registry.token_for(Path::new("a.dae")));

        assert!(registry.mark_changed(Path::new("a.dae")));
        assert!(!artifact.is_valid());
        assert!(!registry.mark_changed(Path::new("unknown.dae")));
    }
}

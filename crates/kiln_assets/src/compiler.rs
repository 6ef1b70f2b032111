//! The compile orchestration entry point and its store-backed implementation.
//!
//! Every cache obtains compile markers through one call,
//! [`IntermediateCompilers::prepare_asset`], passing the type code of the
//! asset kind and the identifier's initializers. [`CompilerSet`] implements
//! it by dispatching to a registered [`AssetCompiler`] per type code, writing
//! results into the [`IntermediateStore`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_common::{AssetHash, AssetId};
use kiln_config::{CompileConfig, CompileMode};
use kiln_store::{IntermediateStore, StoredArtifact};
use parking_lot::RwLock;

use crate::error::SetupError;
use crate::marker::{CompileMarker, Locator, PendingCompile};
use crate::validation::{DependencyValidation, SourceRegistry};

/// Entry point into the compiler layer.
pub trait IntermediateCompilers: Send + Sync {
    /// Builds a compile marker for the asset kind `type_code` named by
    /// `initializers`. Returns `None` if no compiler handles the type code.
    fn prepare_asset(&self, type_code: u64, initializers: &[&str]) -> Option<Arc<dyn CompileMarker>>;
}

/// Output of a successful compile.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Serialized artifact.
    pub data: Vec<u8>,
    /// Source files the compile read.
    pub dependencies: Vec<PathBuf>,
}

impl CompileOutput {
    /// Output with no recorded dependencies.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            dependencies: Vec::new(),
        }
    }

    /// Adds a source dependency.
    #[must_use]
    pub fn with_dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(path.into());
        self
    }
}

/// A compile that failed.
#[derive(Debug, Clone, Default)]
pub struct CompileFailure {
    /// What went wrong.
    pub reason: String,
    /// Source files read before failing; a change to any of them lifts
    /// the failure.
    pub dependencies: Vec<PathBuf>,
}

impl CompileFailure {
    /// A failure with no recorded dependencies.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            dependencies: Vec::new(),
        }
    }

    /// Adds a source dependency.
    #[must_use]
    pub fn with_dependency(mut self, path: impl Into<PathBuf>) -> Self {
        self.dependencies.push(path.into());
        self
    }
}

/// Turns an identifier into compiled bytes.
pub trait AssetCompiler: Send + Sync {
    /// Compiles the asset named by `id`.
    fn compile(&self, id: &AssetId) -> Result<CompileOutput, CompileFailure>;
}

impl<F> AssetCompiler for F
where
    F: Fn(&AssetId) -> Result<CompileOutput, CompileFailure> + Send + Sync,
{
    fn compile(&self, id: &AssetId) -> Result<CompileOutput, CompileFailure> {
        self(id)
    }
}

/// Where compile jobs run.
#[derive(Clone)]
pub enum CompileExecutor {
    /// Inline, inside `invoke_compile`.
    Immediate,
    /// On a worker pool.
    Pool(Arc<rayon::ThreadPool>),
}

impl CompileExecutor {
    /// A worker pool with `threads` threads.
    pub fn pool(threads: usize) -> Result<Self, SetupError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("kiln-compile-{i}"))
            .build()?;
        Ok(CompileExecutor::Pool(Arc::new(pool)))
    }

    /// Builds the executor described by the `[compile]` config section.
    pub fn from_config(config: &CompileConfig) -> Result<Self, SetupError> {
        match config.mode {
            CompileMode::Immediate => Ok(CompileExecutor::Immediate),
            CompileMode::Background => Self::pool(config.threads),
        }
    }

    fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        match self {
            CompileExecutor::Immediate => job(),
            CompileExecutor::Pool(pool) => pool.spawn(job),
        }
    }
}

/// Registry of compilers by type code, backed by an intermediate store.
pub struct CompilerSet {
    compilers: RwLock<HashMap<u64, Arc<dyn AssetCompiler>>>,
    store: Arc<IntermediateStore>,
    sources: Arc<SourceRegistry>,
    executor: CompileExecutor,
}

impl CompilerSet {
    /// Creates an empty compiler set.
    pub fn new(
        store: Arc<IntermediateStore>,
        sources: Arc<SourceRegistry>,
        executor: CompileExecutor,
    ) -> Self {
        Self {
            compilers: RwLock::new(HashMap::new()),
            store,
            sources,
            executor,
        }
    }

    /// Registers the compiler for `type_code`, replacing any previous one.
    pub fn register(&self, type_code: u64, compiler: impl AssetCompiler + 'static) {
        self.compilers.write().insert(type_code, Arc::new(compiler));
    }

    /// Returns `true` if a compiler handles `type_code`.
    pub fn handles(&self, type_code: u64) -> bool {
        self.compilers.read().contains_key(&type_code)
    }

    /// The store compiled artifacts are written to.
    pub fn store(&self) -> &Arc<IntermediateStore> {
        &self.store
    }

    /// The per-source validation tokens.
    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.sources
    }
}

impl IntermediateCompilers for CompilerSet {
    fn prepare_asset(&self, type_code: u64, initializers: &[&str]) -> Option<Arc<dyn CompileMarker>> {
        let compiler = self.compilers.read().get(&type_code).cloned()?;
        let id = AssetId::new(initializers.iter().copied());
        Some(Arc::new(StoreMarker {
            type_code,
            hash: id.hash(),
            id,
            compiler,
            store: Arc::clone(&self.store),
            sources: Arc::clone(&self.sources),
            executor: self.executor.clone(),
        }))
    }
}

struct StoreMarker {
    type_code: u64,
    hash: AssetHash,
    id: AssetId,
    compiler: Arc<dyn AssetCompiler>,
    store: Arc<IntermediateStore>,
    sources: Arc<SourceRegistry>,
    executor: CompileExecutor,
}

/// Builds a locator whose token follows every recorded source file and is
/// already advanced if any of them changed since the compile.
fn locator_for(
    store: &Arc<IntermediateStore>,
    sources: &SourceRegistry,
    artifact: &StoredArtifact,
) -> Locator {
    let validation = DependencyValidation::new();
    for dep in &artifact.dependencies {
        DependencyValidation::register_dependency(&validation, &sources.token_for(&dep.path));
    }
    if !artifact.status.is_current() {
        validation.on_change();
    }
    Locator::stored(
        Arc::clone(store),
        artifact.type_code,
        artifact.hash,
        artifact.initializer.clone(),
        Some(validation),
    )
}

impl CompileMarker for StoreMarker {
    fn existing_asset(&self) -> Option<Locator> {
        let artifact = self.store.locate(self.type_code, self.hash)?;
        Some(locator_for(&self.store, &self.sources, &artifact))
    }

    fn invoke_compile(&self) -> Arc<PendingCompile> {
        let initializer = self.initializer();
        let handle = PendingCompile::new(initializer.clone());
        log::debug!("invoking compile for {initializer} (type {:#x})", self.type_code);

        let job_handle = Arc::clone(&handle);
        let compiler = Arc::clone(&self.compiler);
        let store = Arc::clone(&self.store);
        let sources = Arc::clone(&self.sources);
        let id = self.id.clone();
        let (type_code, hash) = (self.type_code, self.hash);

        self.executor.spawn(move || match compiler.compile(&id) {
            Ok(output) => {
                match store.store(type_code, hash, &initializer, &output.data, &output.dependencies) {
                    Ok(artifact) => {
                        if let Err(e) = store.save() {
                            log::warn!("failed to save store manifest: {e}");
                        }
                        job_handle.complete(locator_for(&store, &sources, &artifact));
                    }
                    Err(e) => {
                        log::warn!("failed to store compiled {initializer}: {e}");
                        job_handle.fail(e.to_string(), None);
                    }
                }
            }
            Err(failure) => {
                log::warn!("compile of {initializer} failed: {}", failure.reason);
                let validation = DependencyValidation::new();
                for path in &failure.dependencies {
                    DependencyValidation::register_dependency(&validation, &sources.token_for(path));
                }
                job_handle.fail(failure.reason, Some(validation));
            }
        });

        handle
    }

    fn initializer(&self) -> String {
        self.id.descriptive_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::AssetState;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MODEL: u64 = 0x4d4f_4445_4c;

    fn make_set() -> (tempfile::TempDir, CompilerSet) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IntermediateStore::open(&dir.path().join("store"), "0.1.0"));
        let set = CompilerSet::new(store, Arc::new(SourceRegistry::new()), CompileExecutor::Immediate);
        (dir, set)
    }

    #[test]
    fn unknown_type_code_has_no_marker() {
        let (_dir, set) = make_set();
        assert!(set.prepare_asset(MODEL, &["a.dae"]).is_none());
        assert!(!set.handles(MODEL));
    }

    #[test]
    fn fresh_marker_has_no_existing_asset() {
        let (_dir, set) = make_set();
        set.register(MODEL, |_: &AssetId| Ok(CompileOutput::new(b"x".to_vec())));
        let marker = set.prepare_asset(MODEL, &["a.dae"]).unwrap();
        assert!(marker.existing_asset().is_none());
        assert_eq!(marker.asset_state(), AssetState::Pending);
        assert_eq!(marker.initializer(), "a.dae");
    }

    #[test]
    fn immediate_compile_writes_store_and_completes() {
        let (_dir, set) = make_set();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        set.register(MODEL, move |id: &AssetId| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CompileOutput::new(format!("compiled {id}").into_bytes()))
        });

        let marker = set.prepare_asset(MODEL, &["a.dae"]).unwrap();
        let handle = marker.invoke_compile();
        assert_eq!(handle.asset_state(), AssetState::Ready);
        assert_eq!(handle.locator().unwrap().read().unwrap(), b"compiled a.dae");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let again = set.prepare_asset(MODEL, &["a.dae"]).unwrap();
        assert_eq!(again.asset_state(), AssetState::Ready);
    }

    #[test]
    fn existing_asset_goes_stale_when_source_changes_on_disk() {
        let (dir, set) = make_set();
        let src = dir.path().join("a.dae");
        std::fs::write(&src, "v1").unwrap();
        let dep = src.clone();
        set.register(MODEL, move |_: &AssetId| {
            Ok(CompileOutput::new(b"x".to_vec()).with_dependency(dep.clone()))
        });
        set.prepare_asset(MODEL, &["a.dae"]).unwrap().invoke_compile();

        std::fs::write(&src, "v2").unwrap();
        let marker = set.prepare_asset(MODEL, &["a.dae"]).unwrap();
        let existing = marker.existing_asset().unwrap();
        assert!(!existing.is_current());
    }

    #[test]
    fn existing_asset_goes_stale_when_source_marked_changed() {
        let (_dir, set) = make_set();
        set.register(MODEL, |_: &AssetId| {
            Ok(CompileOutput::new(b"x".to_vec()).with_dependency("virtual/a.dae"))
        });
        let handle = set.prepare_asset(MODEL, &["a.dae"]).unwrap().invoke_compile();
        let locator = handle.locator().unwrap();
        assert!(locator.is_current());

        set.sources().mark_changed(Path::new("virtual/a.dae"));
        assert!(!locator.is_current());
    }

    #[test]
    fn failed_compile_is_invalid_with_source_token() {
        let (_dir, set) = make_set();
        set.register(MODEL, |_: &AssetId| {
            Err(CompileFailure::new("bad mesh").with_dependency("virtual/bad.dae"))
        });
        let handle = set.prepare_asset(MODEL, &["bad.dae"]).unwrap().invoke_compile();
        assert_eq!(handle.asset_state(), AssetState::Invalid);
        assert_eq!(handle.failure().as_deref(), Some("bad mesh"));

        let token = handle.failure_validation().unwrap();
        assert!(token.is_valid());
        set.sources().mark_changed(Path::new("virtual/bad.dae"));
        assert!(!token.is_valid());
    }

    #[test]
    fn pool_compile_eventually_completes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IntermediateStore::open(dir.path(), "0.1.0"));
        let set = CompilerSet::new(
            store,
            Arc::new(SourceRegistry::new()),
            CompileExecutor::pool(2).unwrap(),
        );
        set.register(MODEL, |_: &AssetId| Ok(CompileOutput::new(b"pooled".to_vec())));

        let handle = set.prepare_asset(MODEL, &["a.dae"]).unwrap().invoke_compile();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while handle.asset_state() == AssetState::Pending {
            assert!(std::time::Instant::now() < deadline, "compile never finished");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(handle.locator().unwrap().read().unwrap(), b"pooled");
    }
}

//! Wiring of compilers, the intermediate store and per-kind asset tables.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use kiln_common::AssetId;
use kiln_config::KilnConfig;
use kiln_store::IntermediateStore;
use parking_lot::RwLock;

use crate::asset::Asset;
use crate::compiler::{AssetCompiler, CompileExecutor, CompilerSet, IntermediateCompilers};
use crate::error::{AssetError, SetupError};
use crate::table::{AssetTable, ErasedTable, TableOptions};
use crate::validation::SourceRegistry;

struct TableEntry {
    any: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedTable>,
}

/// Owns one [`AssetTable`] per asset kind plus the compile layer they share.
///
/// Services are always handled through an `Arc`; tables hold a weak
/// reference back so constructors can resolve other assets.
pub struct AssetServices {
    compilers: Arc<dyn IntermediateCompilers>,
    compiler_set: Option<Arc<CompilerSet>>,
    sources: Arc<SourceRegistry>,
    options: TableOptions,
    tables: RwLock<HashMap<TypeId, TableEntry>>,
    this: Weak<AssetServices>,
}

impl AssetServices {
    /// Services backed by an arbitrary compile layer.
    pub fn new(
        compilers: Arc<dyn IntermediateCompilers>,
        sources: Arc<SourceRegistry>,
        options: TableOptions,
    ) -> Arc<Self> {
        Self::build(compilers, None, sources, options)
    }

    /// Services backed by a [`CompilerSet`].
    pub fn with_compiler_set(set: Arc<CompilerSet>, options: TableOptions) -> Arc<Self> {
        let sources = Arc::clone(set.sources());
        let compilers: Arc<dyn IntermediateCompilers> = set.clone();
        Self::build(compilers, Some(set), sources, options)
    }

    /// Opens the store under `project_dir` and starts the compile executor
    /// described by `config`.
    pub fn from_config(config: &KilnConfig, project_dir: &Path) -> Result<Arc<Self>, SetupError> {
        let store = Arc::new(IntermediateStore::open(
            &project_dir.join(&config.store.directory),
            &config.store.version,
        ));
        let executor = CompileExecutor::from_config(&config.compile)?;
        let set = Arc::new(CompilerSet::new(
            store,
            Arc::new(SourceRegistry::new()),
            executor,
        ));
        Ok(Self::with_compiler_set(set, TableOptions::from_config(&config.assets)))
    }

    fn build(
        compilers: Arc<dyn IntermediateCompilers>,
        compiler_set: Option<Arc<CompilerSet>>,
        sources: Arc<SourceRegistry>,
        options: TableOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            compilers,
            compiler_set,
            sources,
            options,
            tables: RwLock::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Options every table of these services is created with.
    pub fn options(&self) -> TableOptions {
        self.options
    }

    /// The compile orchestration entry point.
    pub fn compilers(&self) -> &Arc<dyn IntermediateCompilers> {
        &self.compilers
    }

    /// The compiler registry, when the services were built around one.
    pub fn compiler_set(&self) -> Option<&Arc<CompilerSet>> {
        self.compiler_set.as_ref()
    }

    /// The intermediate store, when the services were built around a
    /// [`CompilerSet`].
    pub fn store(&self) -> Option<&Arc<IntermediateStore>> {
        self.compiler_set.as_ref().map(|set| set.store())
    }

    /// Per-source validation tokens.
    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.sources
    }

    /// Registers a compiler for `type_code`. Returns `false` if the services
    /// have no [`CompilerSet`] to register it with.
    pub fn register_compiler(&self, type_code: u64, compiler: impl AssetCompiler + 'static) -> bool {
        match &self.compiler_set {
            Some(set) => {
                set.register(type_code, compiler);
                true
            }
            None => false,
        }
    }

    /// Reports that a source file changed, invalidating everything built
    /// from it.
    pub fn mark_source_changed(&self, path: &Path) -> bool {
        self.sources.mark_changed(path)
    }

    /// The table for asset kind `A`, created on first use.
    pub fn table<A: Asset>(&self) -> Arc<AssetTable<A>> {
        let key = TypeId::of::<A>();
        let existing = self.tables.read().get(&key).map(|entry| Arc::clone(&entry.any));
        let any = match existing {
            Some(any) => any,
            None => {
                let mut tables = self.tables.write();
                let entry = tables.entry(key).or_insert_with(|| {
                    let table = Arc::new(AssetTable::<A>::new(self.this.clone(), self.options));
                    TableEntry {
                        any: table.clone(),
                        erased: table,
                    }
                });
                Arc::clone(&entry.any)
            }
        };
        match any.downcast::<AssetTable<A>>() {
            Ok(table) => table,
            Err(_) => unreachable!("asset table registered under a foreign type id"),
        }
    }

    /// Resolves `id` from the table for `A`.
    pub fn resolve<A: Asset>(&self, id: &AssetId) -> Result<Arc<A>, AssetError> {
        self.table::<A>().resolve(id)
    }

    /// Number of asset kinds with a table.
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Clears every table.
    pub fn clear_all(&self) {
        for table in self.erased_tables() {
            table.clear();
        }
    }

    /// Logs the report of every table.
    pub fn log_report(&self) {
        for table in self.erased_tables() {
            table.log_report();
        }
    }

    fn erased_tables(&self) -> Vec<Arc<dyn ErasedTable>> {
        self.tables
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.erased))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Construction;
    use crate::compiler::CompileOutput;
    use crate::marker::Locator;
    use crate::validation::DependencyValidation;

    #[derive(Debug)]
    struct Blob {
        bytes: Vec<u8>,
        validation: Arc<DependencyValidation>,
    }

    impl Asset for Blob {
        const COMPILE_PROCESS_TYPE: u64 = 0x424c_4f42;

        fn dependency_validation(&self) -> &Arc<DependencyValidation> {
            &self.validation
        }

        fn from_locator(locator: &Locator, _: &AssetId, _: &AssetServices) -> Result<Self, AssetError> {
            Ok(Self {
                bytes: locator.read()?,
                validation: locator
                    .dependency_validation()
                    .cloned()
                    .unwrap_or_else(DependencyValidation::new),
            })
        }
    }

    #[derive(Debug)]
    struct Counter(Arc<DependencyValidation>);

    impl Asset for Counter {
        const COMPILE_PROCESS_TYPE: u64 = 0;
        const CONSTRUCTION: Construction = Construction::Immediate;

        fn dependency_validation(&self) -> &Arc<DependencyValidation> {
            &self.0
        }

        fn from_initializers(_: &AssetId, _: &AssetServices) -> Result<Self, AssetError> {
            Ok(Self(DependencyValidation::new()))
        }
    }

    fn immediate_config(dir: &Path) -> (KilnConfig, std::path::PathBuf) {
        let mut config = KilnConfig::default();
        config.compile.mode = kiln_config::CompileMode::Immediate;
        (config, dir.to_path_buf())
    }

    #[test]
    fn table_is_shared_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (config, root) = immediate_config(dir.path());
        let services = AssetServices::from_config(&config, &root).unwrap();

        let a = services.table::<Counter>();
        let b = services.table::<Counter>();
        assert!(Arc::ptr_eq(&a, &b));
        services.table::<Blob>();
        assert_eq!(services.table_count(), 2);
    }

    #[test]
    fn from_config_compiles_into_project_store() {
        let dir = tempfile::tempdir().unwrap();
        let (config, root) = immediate_config(dir.path());
        let services = AssetServices::from_config(&config, &root).unwrap();
        assert!(services.register_compiler(Blob::COMPILE_PROCESS_TYPE, |id: &AssetId| {
            Ok(CompileOutput::new(id.descriptive_name().into_bytes()))
        }));

        let id = AssetId::from("blob.bin");
        assert!(services.resolve::<Blob>(&id).unwrap_err().is_pending());
        assert_eq!(services.resolve::<Blob>(&id).unwrap().bytes, b"blob.bin");

        let store = services.store().unwrap();
        assert!(store.root().starts_with(dir.path()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn source_change_invalidates_resolved_assets() {
        let dir = tempfile::tempdir().unwrap();
        let (config, root) = immediate_config(dir.path());
        let services = AssetServices::from_config(&config, &root).unwrap();
        services.register_compiler(Blob::COMPILE_PROCESS_TYPE, |_: &AssetId| {
            Ok(CompileOutput::new(b"x".to_vec()).with_dependency("src/blob.txt"))
        });

        let id = AssetId::from("blob.bin");
        let _ = services.resolve::<Blob>(&id);
        let blob = services.resolve::<Blob>(&id).unwrap();
        assert!(blob.validation.is_valid());

        assert!(services.mark_source_changed(Path::new("src/blob.txt")));
        assert!(!blob.validation.is_valid());
        assert!(!services.mark_source_changed(Path::new("src/other.txt")));
    }

    #[test]
    fn clear_all_empties_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let (config, root) = immediate_config(dir.path());
        let services = AssetServices::from_config(&config, &root).unwrap();
        services.resolve::<Counter>(&AssetId::from("a")).unwrap();
        services.resolve::<Counter>(&AssetId::from("b")).unwrap();
        assert_eq!(services.table::<Counter>().len(), 2);

        services.clear_all();
        assert!(services.table::<Counter>().is_empty());
    }

    #[test]
    fn services_without_compiler_set_reject_registration() {
        struct NoCompilers;
        impl IntermediateCompilers for NoCompilers {
            fn prepare_asset(&self, _: u64, _: &[&str]) -> Option<Arc<dyn crate::marker::CompileMarker>> {
                None
            }
        }
        let services = AssetServices::new(
            Arc::new(NoCompilers),
            Arc::new(SourceRegistry::new()),
            TableOptions::default(),
        );
        assert!(!services.register_compiler(1, |_: &AssetId| Ok(CompileOutput::default())));
        assert!(services.store().is_none());
        let err = services.resolve::<Blob>(&AssetId::from("x")).unwrap_err();
        assert!(err.is_invalid());
    }
}

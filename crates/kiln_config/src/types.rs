//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::path::PathBuf;

/// The top-level configuration parsed from `kiln.toml`.
///
/// Every section is optional; a missing section takes its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KilnConfig {
    /// LRU capacities of the layered derived-asset cache.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Behaviour of the generic asset tables.
    #[serde(default)]
    pub assets: AssetsConfig,
    /// Location and version of the intermediate store.
    #[serde(default)]
    pub store: StoreConfig,
    /// How compiles are executed.
    #[serde(default)]
    pub compile: CompileConfig,
}

/// Capacities of the fixed-size LRU caches in the model cache.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached model scaffolds.
    #[serde(default = "default_scaffold_capacity")]
    pub model_scaffolds: usize,
    /// Maximum number of cached material scaffolds.
    #[serde(default = "default_scaffold_capacity")]
    pub material_scaffolds: usize,
    /// Maximum number of cached renderers.
    #[serde(default = "default_renderer_capacity")]
    pub renderers: usize,
    /// Maximum number of cached supplement scaffolds.
    #[serde(default = "default_supplement_capacity")]
    pub supplements: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            model_scaffolds: default_scaffold_capacity(),
            material_scaffolds: default_scaffold_capacity(),
            renderers: default_renderer_capacity(),
            supplements: default_supplement_capacity(),
        }
    }
}

fn default_scaffold_capacity() -> usize {
    2000
}

fn default_renderer_capacity() -> usize {
    200
}

fn default_supplement_capacity() -> usize {
    100
}

/// Settings shared by every generic asset table.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
    /// Whether resolves check dependency validation tokens by default.
    #[serde(default = "default_true")]
    pub check_dependencies: bool,
    /// Whether tables record a descriptive name per hash for reports.
    #[serde(default = "default_true")]
    pub track_names: bool,
    /// Number of times a pending compile may be polled before it is
    /// declared invalid. `None` means unbounded.
    #[serde(default)]
    pub retry_budget: Option<u32>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            check_dependencies: true,
            track_names: true,
            retry_budget: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Intermediate store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory compiled artifacts are written to.
    #[serde(default = "default_store_directory")]
    pub directory: PathBuf,
    /// Store version; a store written by a different version is discarded.
    #[serde(default = "default_store_version")]
    pub version: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            directory: default_store_directory(),
            version: default_store_version(),
        }
    }
}

fn default_store_directory() -> PathBuf {
    PathBuf::from(".kiln-cache")
}

fn default_store_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Compile execution settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CompileConfig {
    /// Where compiles run.
    #[serde(default)]
    pub mode: CompileMode,
    /// Worker threads for [`CompileMode::Background`].
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            mode: CompileMode::default(),
            threads: default_threads(),
        }
    }
}

fn default_threads() -> usize {
    4
}

/// Where compile jobs are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// On a dedicated worker pool; callers observe `Pending` until done.
    #[default]
    Background,
    /// Inline, at the moment the compile is invoked.
    Immediate,
}

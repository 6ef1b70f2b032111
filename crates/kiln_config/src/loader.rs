//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a project directory.
///
/// A missing file yields the default configuration; any other read error is
/// reported.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = match std::fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(KilnConfig::default()),
        Err(e) => return Err(e.into()),
    };
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks capacities and thread counts are usable.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    let capacities = [
        ("cache.model_scaffolds", config.cache.model_scaffolds),
        ("cache.material_scaffolds", config.cache.material_scaffolds),
        ("cache.renderers", config.cache.renderers),
        ("cache.supplements", config.cache.supplements),
    ];
    for (name, value) in capacities {
        if value == 0 {
            return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
        }
    }
    if config.compile.mode == crate::types::CompileMode::Background && config.compile.threads == 0
    {
        return Err(ConfigError::ValidationError(
            "compile.threads must be > 0 in background mode".to_string(),
        ));
    }
    if config.store.version.is_empty() {
        return Err(ConfigError::ValidationError(
            "store.version must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CompileMode;
    use std::path::PathBuf;

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.cache.model_scaffolds, 2000);
        assert_eq!(config.cache.material_scaffolds, 2000);
        assert_eq!(config.cache.renderers, 200);
        assert_eq!(config.cache.supplements, 100);
        assert!(config.assets.check_dependencies);
        assert!(config.assets.track_names);
        assert!(config.assets.retry_budget.is_none());
        assert_eq!(config.store.directory, PathBuf::from(".kiln-cache"));
        assert_eq!(config.compile.mode, CompileMode::Background);
        assert_eq!(config.compile.threads, 4);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[cache]
model_scaffolds = 16
material_scaffolds = 8
renderers = 4
supplements = 2

[assets]
check_dependencies = false
track_names = false
retry_budget = 32

[store]
directory = "build/intermediate"
version = "2.1.0"

[compile]
mode = "immediate"
threads = 1
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.cache.model_scaffolds, 16);
        assert_eq!(config.cache.material_scaffolds, 8);
        assert_eq!(config.cache.renderers, 4);
        assert_eq!(config.cache.supplements, 2);
        assert!(!config.assets.check_dependencies);
        assert!(!config.assets.track_names);
        assert_eq!(config.assets.retry_budget, Some(32));
        assert_eq!(config.store.directory, PathBuf::from("build/intermediate"));
        assert_eq!(config.store.version, "2.1.0");
        assert_eq!(config.compile.mode, CompileMode::Immediate);
    }

    #[test]
    fn zero_capacity_rejected() {
        let err = load_config_from_str("[cache]\nrenderers = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref m) if m.contains("cache.renderers")));
    }

    #[test]
    fn zero_threads_rejected_in_background_mode() {
        let err = load_config_from_str("[compile]\nthreads = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn zero_threads_allowed_in_immediate_mode() {
        let config = load_config_from_str("[compile]\nmode = \"immediate\"\nthreads = 0\n").unwrap();
        assert_eq!(config.compile.mode, CompileMode::Immediate);
    }

    #[test]
    fn unknown_compile_mode_is_parse_error() {
        let err = load_config_from_str("[compile]\nmode = \"distributed\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        let err = load_config_from_str("[cache\nrenderers = ").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.cache.renderers, 200);
    }

    #[test]
    fn load_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[cache]\nsupplements = 7\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.cache.supplements, 7);
    }
}

//! Registry configuration
//!
//! Loaded from an optional TOML file layered with `HOSTREG_*` environment
//! variables, e.g. `HOSTREG_STRICT_ASYNC_ACCESS=true`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use hostreg_common::LogLevel;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::Origin;
use crate::error::{RegistryError, RegistryResult};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HOSTREG";

/// Registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Reject `get_async` for services that need no asynchronous
    /// initialization. On by default; turn it off only to let the async
    /// path serve plain services too.
    pub strict_async_access: bool,
    /// Origins registered by `register_discovered`
    pub enabled_origins: Vec<Origin>,
    /// Buffered diagnostic events per subscriber
    pub diagnostics_capacity: usize,
    pub log_level: LogLevel,
    /// Emit a warning diagnostic when a registered implementation sits on a soft cycle
    pub warn_on_soft_cycles: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            strict_async_access: true,
            enabled_origins: vec![Origin::Runtime],
            diagnostics_capacity: 1024,
            log_level: LogLevel::Info,
            warn_on_soft_cycles: true,
        }
    }
}

impl RegistryConfig {
    /// `<config dir>/hostreg/registry.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hostreg")
            .join("registry.toml")
    }

    /// Load from the default path and the environment
    pub fn load() -> RegistryResult<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load from `path` (optional) and the environment
    pub fn load_from(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        debug!("Loading registry config from {}", path.display());

        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: RegistryConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save_to(&self, path: impl AsRef<Path>) -> RegistryResult<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RegistryError::Config(format!("failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RegistryError::Config(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, contents)
            .map_err(|e| RegistryError::Config(format!("failed to write {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> RegistryResult<()> {
        if self.diagnostics_capacity == 0 {
            return Err(RegistryError::Config(
                "diagnostics_capacity must be greater than 0".to_string(),
            ));
        }
        if self.enabled_origins.is_empty() {
            return Err(RegistryError::Config(
                "enabled_origins must name at least one origin".to_string(),
            ));
        }
        Ok(())
    }

    pub fn origin_enabled(&self, origin: Origin) -> bool {
        self.enabled_origins.contains(&origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RegistryConfig::load_from(dir.path().join("absent.toml")).unwrap();

        assert!(config.strict_async_access);
        assert_eq!(config.enabled_origins, vec![Origin::Runtime]);
        assert_eq!(config.diagnostics_capacity, 1024);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(
            &path,
            r#"
strict_async_access = false
enabled_origins = ["runtime", "editor_only"]
log_level = "debug"
"#,
        )
        .unwrap();

        let config = RegistryConfig::load_from(&path).unwrap();
        assert!(!config.strict_async_access);
        assert!(config.origin_enabled(Origin::EditorOnly));
        assert!(!config.origin_enabled(Origin::Test));
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.warn_on_soft_cycles);
    }

    #[test]
    fn test_invalid_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, "diagnostics_capacity = 0\n").unwrap();

        assert!(matches!(
            RegistryConfig::load_from(&path),
            Err(RegistryError::Config(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("registry.toml");
        let config = RegistryConfig {
            strict_async_access: false,
            enabled_origins: vec![Origin::Test],
            ..RegistryConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(RegistryConfig::load_from(&path).unwrap(), config);
    }
}

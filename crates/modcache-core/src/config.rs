use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable whose presence means a coverage tool is running
pub const COVERAGE_ENV_VAR: &str = "NYC_ROOT_ID";

/// Default runtime identifier injected into compiled code
pub const DEFAULT_RUNTIME_NAME: &str = "_rt";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Cache directory for the package (default: none, caching disabled)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Persist compile results at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Write the coverage marker into cache directories (default: from environment)
    #[serde(default = "coverage_from_env")]
    pub coverage: bool,

    /// Enable CommonJS interop for non-`.mjs` files (default: true)
    #[serde(default = "default_true")]
    pub cjs: bool,

    /// Runtime identifier passed to the compiler
    #[serde(default = "default_runtime_name")]
    pub runtime_name: String,
}

fn default_true() -> bool {
    true
}

fn coverage_from_env() -> bool {
    std::env::var_os(COVERAGE_ENV_VAR).is_some()
}

fn default_runtime_name() -> String {
    DEFAULT_RUNTIME_NAME.to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            enabled: true,
            coverage: coverage_from_env(),
            cjs: true,
            runtime_name: default_runtime_name(),
        }
    }
}

/// Values given on the command line, taking precedence over the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub cache_dir: Option<PathBuf>,
    pub enabled: Option<bool>,
    pub coverage: Option<bool>,
    pub cjs: Option<bool>,
    pub runtime_name: Option<String>,
}

impl CacheConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Merge CLI overrides into this configuration
    pub fn merge(&mut self, overrides: &CliOverrides) {
        if let Some(ref cache_dir) = overrides.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(enabled) = overrides.enabled {
            self.enabled = enabled;
        }
        if let Some(coverage) = overrides.coverage {
            self.coverage = coverage;
        }
        if let Some(cjs) = overrides.cjs {
            self.cjs = cjs;
        }
        if let Some(ref runtime_name) = overrides.runtime_name {
            self.runtime_name = runtime_name.clone();
        }
    }

    /// The cache directory, if caching is enabled and one is configured
    pub fn effective_cache_dir(&self) -> Option<&Path> {
        if self.enabled {
            self.cache_dir.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert!(config.cjs);
        assert!(config.cache_dir.is_none());
        assert_eq!(config.runtime_name, DEFAULT_RUNTIME_NAME);
    }

    #[test]
    fn test_deserialize_config() {
        let json = r#"{
            "cacheDir": "node_modules/.cache",
            "cjs": false,
            "coverage": true
        }"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.cache_dir, Some(PathBuf::from("node_modules/.cache")));
        assert!(!config.cjs);
        assert!(config.coverage);
        assert!(config.enabled);
    }

    #[test]
    fn test_merge_overrides() {
        let mut config = CacheConfig {
            cache_dir: Some(PathBuf::from("a")),
            ..CacheConfig::default()
        };
        config.merge(&CliOverrides {
            cache_dir: Some(PathBuf::from("b")),
            enabled: Some(false),
            ..CliOverrides::default()
        });

        assert_eq!(config.cache_dir, Some(PathBuf::from("b")));
        assert!(config.effective_cache_dir().is_none());
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("modcache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = CacheConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("modcache.json"));
    }
}

//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::bindings::BindingsConfig;
use crate::global::GlobalConfig;
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding `library.cdylib_name`
pub const ENV_CDYLIB_NAME: &str = "TETHER_CDYLIB_NAME";
/// Environment variable overriding `library.namespace`
pub const ENV_NAMESPACE: &str = "TETHER_NAMESPACE";
/// Environment variable overriding `runtime.log_filter`
pub const ENV_LOG: &str = "TETHER_LOG";
/// Environment variable overriding `runtime.worker_threads`
pub const ENV_WORKER_THREADS: &str = "TETHER_WORKER_THREADS";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.tether/config.toml) - lowest priority
/// 2. Bindings config (./tether.toml) - overrides global
/// 3. Environment variables (TETHER_*) - overrides bindings
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Bindings configuration with overrides applied and search paths
    /// resolved against the config root
    pub bindings: BindingsConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Directory containing tether.toml
    pub config_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use a specific global config file instead of ~/.tether/config.toml
    pub fn with_global_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find tether.toml. Unlike a project
    /// manifest the bindings config is required: a binding cannot load its
    /// library without one.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let config_path = Self::find_config_file(start_dir)
            .ok_or_else(|| ConfigError::NotFound(start_dir.join(CONFIG_FILE_NAME)))?;
        self.load_from_file(&config_path)
    }

    /// Load configuration from a specific tether.toml
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let bindings = BindingsConfig::load_from_file(config_path)?;
        let global = self.load_global_config()?;
        let config_root = config_path.parent().map(|p| p.to_path_buf());

        let bindings = Self::merge_global(bindings, &global, config_root.as_deref());
        let bindings = self.apply_env_overrides(bindings)?;

        Ok(Config {
            bindings,
            global,
            config_root,
        })
    }

    /// Find tether.toml by walking up the directory tree
    pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
        start_dir
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load global configuration; a missing file means defaults
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Resolve relative search paths and fill gaps from the global config
    fn merge_global(
        mut bindings: BindingsConfig,
        global: &GlobalConfig,
        config_root: Option<&Path>,
    ) -> BindingsConfig {
        if let Some(root) = config_root {
            for path in bindings.library.search_paths.iter_mut() {
                if path.is_relative() {
                    *path = root.join(&*path);
                }
            }
        }

        bindings
            .library
            .search_paths
            .extend(global.search_paths.iter().cloned());

        if bindings.runtime.log_filter.is_none() {
            bindings.runtime.log_filter = global.log_filter.clone();
        }

        bindings
    }

    /// Apply environment variable overrides to the bindings config
    fn apply_env_overrides(&self, mut config: BindingsConfig) -> ConfigResult<BindingsConfig> {
        if let Ok(name) = env::var(ENV_CDYLIB_NAME) {
            config.library.cdylib_name = name;
        }

        if let Ok(namespace) = env::var(ENV_NAMESPACE) {
            config.library.namespace = Some(namespace);
        }

        if let Ok(filter) = env::var(ENV_LOG) {
            config.runtime.log_filter = Some(filter);
        }

        if let Ok(threads) = env::var(ENV_WORKER_THREADS) {
            let threads = threads
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: ENV_WORKER_THREADS.to_string(),
                    reason: format!("'{}' is not a thread count: {}", threads, e),
                })?;
            config.runtime.worker_threads = Some(threads);
        }

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Effective symbol namespace
    pub fn namespace(&self) -> &str {
        self.bindings.namespace()
    }

    /// Directory containing tether.toml
    pub fn config_root(&self) -> Option<&Path> {
        self.config_root.as_deref()
    }

    /// Effective log filter, if any source set one
    pub fn log_filter(&self) -> Option<&str> {
        self.bindings.runtime.log_filter.as_deref()
    }
}

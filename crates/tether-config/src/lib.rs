//! Tether Bindings Configuration
//!
//! Describes how a binding finds and verifies its native library:
//! - Bindings configuration (tether.toml): library name, namespace, contract
//! - Global user configuration (~/.tether/config.toml): shared search paths
//!   and log filter
//! - Environment overrides (TETHER_*)
//!
//! # Configuration Hierarchy
//!
//! Later sources override earlier ones:
//! 1. Global config (~/.tether/config.toml)
//! 2. Bindings config (./tether.toml, found by walking up)
//! 3. Environment variables (TETHER_*)
//!
//! # Example
//!
//! ```no_run
//! use tether_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("loading {}", config.bindings.library.cdylib_name);
//! ```

pub mod bindings;
pub mod global;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// File name searched for by [`ConfigLoader::load_from_directory`]
pub const CONFIG_FILE_NAME: &str = "tether.toml";

pub use bindings::{BindingsConfig, ContractConfig, LibraryConfig, RuntimeConfig};
pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader};

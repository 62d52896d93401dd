//! Bindings Configuration (tether.toml)
//!
//! One file per generated binding: which native library to load, which
//! namespace its symbols live under, and the contract it was generated for.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Bindings configuration from tether.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BindingsConfig {
    /// Native library to load
    pub library: LibraryConfig,

    /// Expected contract version and checksums
    #[serde(default)]
    pub contract: ContractConfig,

    /// Async runtime and logging
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Native library location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LibraryConfig {
    /// Library name without platform prefix/extension (e.g. "arithmetic")
    pub cdylib_name: String,

    /// Symbol namespace (default: cdylib_name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Extra directories searched before the platform defaults
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<PathBuf>,
}

/// Contract the bindings were generated against
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ContractConfig {
    /// Expected contract version (unchecked when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    /// Checksum symbol name → expected checksum
    #[serde(default)]
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, u16>,
}

/// Runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Tokio worker threads (default: current-thread runtime)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,

    /// `tracing` filter directive (e.g. "tether=debug")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl BindingsConfig {
    /// Minimal configuration for a library
    pub fn new(cdylib_name: impl Into<String>) -> Self {
        Self {
            library: LibraryConfig {
                cdylib_name: cdylib_name.into(),
                namespace: None,
                search_paths: Vec::new(),
            },
            contract: ContractConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }

    /// Load bindings configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        Self::parse(&content, path)
    }

    fn parse(content: &str, file: &Path) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::TomlParseError {
            file: file.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the bindings configuration
    pub fn validate(&self) -> ConfigResult<()> {
        validate_identifier("library.cdylib_name", &self.library.cdylib_name)?;

        if let Some(namespace) = &self.library.namespace {
            validate_identifier("library.namespace", namespace)?;
        }

        for name in self.contract.checksums.keys() {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "contract.checksums".to_string(),
                    reason: "checksum symbol name cannot be empty".to_string(),
                });
            }
        }

        if self.runtime.worker_threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "runtime.worker_threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Effective symbol namespace
    pub fn namespace(&self) -> &str {
        self.library
            .namespace
            .as_deref()
            .unwrap_or(&self.library.cdylib_name)
    }

    /// Render back to TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string(self)?)
    }
}

impl FromStr for BindingsConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        Self::parse(s, Path::new("<string>"))
    }
}

/// Library names and namespaces end up inside C symbol names
fn validate_identifier(field: &str, value: &str) -> ConfigResult<()> {
    if value.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "cannot be empty".to_string(),
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' contains characters not allowed in a symbol", value),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_bindings_config() {
        let toml = r#"
[library]
cdylib_name = "arithmetic"
"#;

        let config: BindingsConfig = toml.parse().unwrap();
        assert_eq!(config.library.cdylib_name, "arithmetic");
        assert_eq!(config.namespace(), "arithmetic");
        assert_eq!(config.contract, ContractConfig::default());
        assert_eq!(config.runtime.worker_threads, None);
    }

    #[test]
    fn test_parse_full_bindings_config() {
        let toml = r#"
[library]
cdylib_name = "arithmetical"
namespace = "arithmetic"
search_paths = ["target/debug"]

[contract]
version = 26

[contract.checksums]
uniffi_arithmetic_checksum_func_add = 2195

[runtime]
worker_threads = 2
log_filter = "tether=debug"
"#;

        let config: BindingsConfig = toml.parse().unwrap();
        assert_eq!(config.namespace(), "arithmetic");
        assert_eq!(config.library.search_paths, vec![PathBuf::from("target/debug")]);
        assert_eq!(config.contract.version, Some(26));
        assert_eq!(
            config.contract.checksums.get("uniffi_arithmetic_checksum_func_add"),
            Some(&2195)
        );
        assert_eq!(config.runtime.worker_threads, Some(2));
        assert_eq!(config.runtime.log_filter.as_deref(), Some("tether=debug"));
    }

    #[test]
    fn test_missing_library_section() {
        let result: ConfigResult<BindingsConfig> = "[runtime]\nworker_threads = 1\n".parse();
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[library]
cdylib_name = "arithmetic"
flavor = "spicy"
"#;
        let result: ConfigResult<BindingsConfig> = toml.parse();
        assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
    }

    #[test]
    fn test_zero_worker_threads_rejected() {
        let mut config = BindingsConfig::new("arithmetic");
        config.runtime.worker_threads = Some(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "runtime.worker_threads"
        ));
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let mut config = BindingsConfig::new("arithmetic");
        config.library.namespace = Some("has space".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialize_skips_defaults() {
        let config = BindingsConfig::new("arithmetic");
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("cdylib_name = \"arithmetic\""));
        assert!(!rendered.contains("namespace"));
        let reparsed: BindingsConfig = rendered.parse().unwrap();
        assert_eq!(reparsed, config);
    }
}

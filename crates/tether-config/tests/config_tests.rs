//! Bindings configuration loading and precedence tests

use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tether_config::{BindingsConfig, ConfigError, ConfigLoader};

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("tether.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn isolated_loader(dir: &Path) -> ConfigLoader {
    ConfigLoader::with_global_config_path(dir.join("absent-global.toml"))
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_bindings_config_basic() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[library]
cdylib_name = "arithmetic"

[contract]
version = 26
"#,
    );

    let mut loader = isolated_loader(temp_dir.path());
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.bindings.library.cdylib_name, "arithmetic");
    assert_eq!(config.bindings.contract.version, Some(26));
    assert_eq!(config.log_filter(), None);
}

#[test]
#[serial]
fn test_load_from_nested_subdirectory() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[library]
cdylib_name = "geometry"
namespace = "geo"
"#,
    );

    let nested = temp_dir.path().join("a").join("b");
    fs::create_dir_all(&nested).unwrap();

    let mut loader = isolated_loader(temp_dir.path());
    let config = loader.load_from_directory(&nested).unwrap();

    assert_eq!(config.namespace(), "geo");
    assert_eq!(config.config_root(), Some(temp_dir.path()));
}

#[test]
#[serial]
fn test_checksums_round_trip_through_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = create_config_file(
        temp_dir.path(),
        r#"
[library]
cdylib_name = "arithmetic"

[contract.checksums]
uniffi_arithmetic_checksum_func_add = 2195
uniffi_arithmetic_checksum_func_sub = 1
"#,
    );

    let mut loader = isolated_loader(temp_dir.path());
    let config = loader.load_from_file(&config_path).unwrap();

    let names: Vec<&str> = config
        .bindings
        .contract
        .checksums
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(
        names,
        vec![
            "uniffi_arithmetic_checksum_func_add",
            "uniffi_arithmetic_checksum_func_sub"
        ]
    );
}

// ============================================================================
// Invalid Config Tests
// ============================================================================

#[rstest]
#[case::broken_syntax("[library\ncdylib_name = \"x")]
#[case::unknown_field("[library]\ncdylib_name = \"x\"\nunknown = 1\n")]
#[case::empty_name("[library]\ncdylib_name = \"\"\n")]
#[case::checksum_out_of_range("[library]\ncdylib_name = \"x\"\n[contract.checksums]\nf = 70000\n")]
#[case::zero_threads("[library]\ncdylib_name = \"x\"\n[runtime]\nworker_threads = 0\n")]
fn test_invalid_configs_rejected(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), content);
    assert!(BindingsConfig::load_from_file(&path).is_err());
}

#[test]
fn test_missing_file_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let result = BindingsConfig::load_from_file(&temp_dir.path().join("tether.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_env_overrides_library_name() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[library]\ncdylib_name = \"arithmetic\"\n");

    env::set_var("TETHER_CDYLIB_NAME", "arithmetic_debug");
    env::set_var("TETHER_WORKER_THREADS", "4");

    let mut loader = isolated_loader(temp_dir.path());
    let config = loader.load_from_directory(temp_dir.path());

    env::remove_var("TETHER_CDYLIB_NAME");
    env::remove_var("TETHER_WORKER_THREADS");

    let config = config.unwrap();
    assert_eq!(config.bindings.library.cdylib_name, "arithmetic_debug");
    assert_eq!(config.namespace(), "arithmetic_debug");
    assert_eq!(config.bindings.runtime.worker_threads, Some(4));
}

#[test]
#[serial]
fn test_env_zero_threads_fails_validation() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[library]\ncdylib_name = \"arithmetic\"\n");

    env::set_var("TETHER_WORKER_THREADS", "0");
    let mut loader = isolated_loader(temp_dir.path());
    let result = loader.load_from_directory(temp_dir.path());
    env::remove_var("TETHER_WORKER_THREADS");

    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}

#[test]
#[serial]
fn test_bindings_filter_beats_global_filter() {
    let temp_dir = TempDir::new().unwrap();
    let global_path = temp_dir.path().join("global.toml");
    fs::write(&global_path, "log_filter = \"info\"\n").unwrap();
    create_config_file(
        temp_dir.path(),
        "[library]\ncdylib_name = \"arithmetic\"\n[runtime]\nlog_filter = \"debug\"\n",
    );

    let mut loader = ConfigLoader::with_global_config_path(&global_path);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert_eq!(config.log_filter(), Some("debug"));
    assert_eq!(config.global.log_filter.as_deref(), Some("info"));
}

#[test]
#[serial]
fn test_invalid_global_config_surfaces() {
    let temp_dir = TempDir::new().unwrap();
    let global_path = temp_dir.path().join("global.toml");
    fs::write(&global_path, "colour = \"blue\"\n").unwrap();
    create_config_file(temp_dir.path(), "[library]\ncdylib_name = \"arithmetic\"\n");

    let mut loader = ConfigLoader::with_global_config_path(&global_path);
    let result = loader.load_from_directory(temp_dir.path());

    assert!(matches!(result, Err(ConfigError::TomlParseError { .. })));
}

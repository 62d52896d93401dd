//! Contract verification
//!
//! Bindings and native library are generated from the same interface
//! definition. A version number and one checksum per exported function catch
//! builds where the two have drifted apart. Verification runs once, on first
//! use, and its outcome is cached.

use crate::error::{BridgeError, BridgeResult};
use std::sync::OnceLock;

/// Native `contract_version() -> u32`
pub type ContractVersionFn = unsafe extern "C" fn() -> u32;

/// Native `checksum_<function>() -> u16`
pub type ChecksumFn = unsafe extern "C" fn() -> u16;

/// One function checksum to verify
#[derive(Debug, Clone)]
pub struct ChecksumEntry {
    pub name: String,
    func: ChecksumFn,
    pub expected: u16,
}

impl ChecksumEntry {
    /// # Safety
    ///
    /// `func` must be a native checksum entry point that stays loaded while
    /// this entry is used.
    pub unsafe fn new(name: impl Into<String>, func: ChecksumFn, expected: u16) -> Self {
        Self {
            name: name.into(),
            func,
            expected,
        }
    }

    fn actual(&self) -> u16 {
        // Safety: upheld by the constructor contract
        unsafe { (self.func)() }
    }
}

/// Compare the library's contract version with the expected one
///
/// # Safety
///
/// `version_fn` must be the library's contract version entry point.
pub unsafe fn check_contract_version(
    namespace: &str,
    expected: u32,
    version_fn: ContractVersionFn,
) -> BridgeResult<()> {
    let actual = version_fn();
    if actual != expected {
        return Err(BridgeError::ContractVersion {
            namespace: namespace.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Compare every function checksum, failing on the first mismatch
pub fn check_checksums(namespace: &str, entries: &[ChecksumEntry]) -> BridgeResult<()> {
    for entry in entries {
        let actual = entry.actual();
        if actual != entry.expected {
            return Err(BridgeError::ContractChecksum {
                namespace: namespace.to_string(),
                function: entry.name.clone(),
                expected: entry.expected,
                actual,
            });
        }
    }
    Ok(())
}

/// Version and checksum verification, performed at most once
#[derive(Debug)]
pub struct ContractCheck {
    namespace: String,
    version: Option<(u32, ContractVersionFn)>,
    checksums: Vec<ChecksumEntry>,
    outcome: OnceLock<BridgeResult<()>>,
}

impl ContractCheck {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            version: None,
            checksums: Vec::new(),
            outcome: OnceLock::new(),
        }
    }

    /// # Safety
    ///
    /// `version_fn` must be the library's contract version entry point and
    /// stay loaded while this check is used.
    pub unsafe fn with_version(mut self, expected: u32, version_fn: ContractVersionFn) -> Self {
        self.version = Some((expected, version_fn));
        self
    }

    pub fn with_checksum(mut self, entry: ChecksumEntry) -> Self {
        self.checksums.push(entry);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Run the checks on first call; later calls return the cached outcome
    pub fn verify_once(&self) -> BridgeResult<()> {
        self.outcome.get_or_init(|| self.verify()).clone()
    }

    fn verify(&self) -> BridgeResult<()> {
        if let Some((expected, version_fn)) = self.version {
            // Safety: upheld by `with_version`
            unsafe { check_contract_version(&self.namespace, expected, version_fn)? };
        }
        check_checksums(&self.namespace, &self.checksums)?;
        tracing::debug!(
            namespace = %self.namespace,
            checksums = self.checksums.len(),
            "contract verified"
        );
        Ok(())
    }
}

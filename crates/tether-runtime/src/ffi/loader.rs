//! Native library loading
//!
//! Finds the binding's cdylib using platform naming conventions and search
//! paths, keeps it loaded, and resolves the well-known entry points every
//! generated library exports (buffer allocator, contract version, checksums).

use crate::error::{BridgeError, BridgeResult};
use crate::ffi::buffer::{BufferAllocFn, BufferApi, BufferFreeFn};
use crate::ffi::contract::{ChecksumEntry, ChecksumFn, ContractCheck, ContractVersionFn};
use libloading::Library;
use std::path::{Path, PathBuf};
use tether_config::ContractConfig;

/// A loaded native library
///
/// Function pointers resolved from it are valid for as long as this value is
/// alive.
#[derive(Debug)]
pub struct NativeLibrary {
    name: String,
    path: PathBuf,
    library: Library,
}

impl NativeLibrary {
    /// Load a library by short name or path
    ///
    /// `search_paths` are tried before the platform defaults.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initialization code in this process. The
    /// caller must trust the library.
    pub unsafe fn open(name: &str, search_paths: &[PathBuf]) -> BridgeResult<Self> {
        let mut paths = search_paths.to_vec();
        paths.extend(default_search_paths());

        let path = resolve_library_path(name, &paths)
            .ok_or_else(|| BridgeError::LibraryNotFound(name.to_string()))?;

        let library = Library::new(&path).map_err(|e| BridgeError::LibraryLoad(e.to_string()))?;
        tracing::debug!(library = name, path = %path.display(), "native library loaded");

        Ok(Self {
            name: name.to_string(),
            path,
            library,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy a symbol out of the library
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's actual type (typically an `extern "C"` fn
    /// pointer) and must not be used after this library is dropped.
    pub unsafe fn symbol<T: Copy>(&self, symbol: &str) -> BridgeResult<T> {
        self.library
            .get::<T>(symbol.as_bytes())
            .map(|found| *found)
            .map_err(|_| BridgeError::SymbolNotFound {
                library: self.name.clone(),
                symbol: symbol.to_string(),
            })
    }

    /// Buffer allocator exported as `ffi_{namespace}_rustbuffer_alloc/free`
    pub fn buffer_api(&self, namespace: &str) -> BridgeResult<BufferApi> {
        // Safety: generated libraries export these with exactly these signatures
        unsafe {
            let alloc: BufferAllocFn = self.symbol(&format!("ffi_{}_rustbuffer_alloc", namespace))?;
            let free: BufferFreeFn = self.symbol(&format!("ffi_{}_rustbuffer_free", namespace))?;
            Ok(BufferApi::new(alloc, free))
        }
    }

    /// Contract version entry point `ffi_{namespace}_uniffi_contract_version`
    pub fn contract_version_fn(&self, namespace: &str) -> BridgeResult<ContractVersionFn> {
        // Safety: fixed signature `() -> u32`
        unsafe { self.symbol(&format!("ffi_{}_uniffi_contract_version", namespace)) }
    }

    /// Checksum entry point by full symbol name
    pub fn checksum_fn(&self, symbol: &str) -> BridgeResult<ChecksumFn> {
        // Safety: fixed signature `() -> u16`
        unsafe { self.symbol(symbol) }
    }

    /// Build the contract check described by the configuration
    ///
    /// Missing symbols fail here, before any check runs.
    pub fn contract_check(
        &self,
        namespace: &str,
        contract: &ContractConfig,
    ) -> BridgeResult<ContractCheck> {
        let mut check = ContractCheck::new(namespace);
        if let Some(expected) = contract.version {
            let version_fn = self.contract_version_fn(namespace)?;
            // Safety: resolved from this library, which outlives the check
            // when both are owned by the same context
            check = unsafe { check.with_version(expected, version_fn) };
        }
        for (symbol, expected) in &contract.checksums {
            let func = self.checksum_fn(symbol)?;
            // Safety: as above
            check = check.with_checksum(unsafe { ChecksumEntry::new(symbol.as_str(), func, *expected) });
        }
        Ok(check)
    }
}

/// Platform-specific default library search paths
///
/// The current working directory comes first, then the standard system
/// library directories.
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/lib"));

        if cfg!(target_pointer_width = "64") {
            paths.push(PathBuf::from("/usr/lib64"));
            paths.push(PathBuf::from("/lib64"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(system_root) = std::env::var("SystemRoot") {
            paths.push(PathBuf::from(format!("{}\\System32", system_root)));
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        paths.insert(0, cwd);
    }

    paths
}

/// Candidate file names for a short library name, in priority order
pub fn library_file_names(name: &str) -> Vec<String> {
    let extensions: &[&str] = if cfg!(target_os = "windows") {
        &["dll"]
    } else if cfg!(target_os = "macos") {
        &["dylib", "so"]
    } else {
        &["so"]
    };

    let prefixes: &[&str] = if cfg!(target_os = "windows") {
        &["", "lib"]
    } else {
        &["lib", ""]
    };

    prefixes
        .iter()
        .flat_map(|prefix| {
            extensions
                .iter()
                .map(move |ext| format!("{}{}.{}", prefix, name, ext))
        })
        .collect()
}

/// Resolve a library name to the first existing file in `search_paths`
pub fn resolve_library_path(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    let file_names = library_file_names(name);
    search_paths
        .iter()
        .flat_map(|dir| file_names.iter().map(move |file| dir.join(file)))
        .find(|candidate| candidate.is_file())
}

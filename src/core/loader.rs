//! Module library loading.
//!
//! Modules come from two places: shared libraries resolved against an ordered
//! list of search directories (the first file match wins), and builtin
//! modules compiled into the host and registered by name. Both paths yield
//! the same [`ModuleDecl`]: a versioned declaration carrying the module's
//! entry function.
//!
//! A shared library exports the declaration as a `#[no_mangle] pub static`:
//!
//! ```ignore
//! #[no_mangle]
//! pub static gatehouse_module_decl: ModuleDecl = ModuleDecl {
//!     abi_version: MODULE_ABI_VERSION,
//!     entry: my_module_entry,
//! };
//! ```
//!
//! Opened libraries are cached and shared between module instances loaded
//! from the same file; the OS handles are released only when the loader
//! itself is dropped, after every module thread has been joined. Nothing is
//! ever unloaded mid-run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use libloading::Library;
use tracing::debug;

use crate::core::runtime::ModuleContext;
use crate::error::{CoreError, CoreResult};

/// Host interface version checked against every loaded declaration.
pub const MODULE_ABI_VERSION: u32 = 1;

/// Symbol name every loadable module library must export.
pub const MODULE_DECL_SYMBOL: &[u8] = b"gatehouse_module_decl\0";

/// A module's entry function. Runs on the module's own thread, driven by a
/// thread-local runtime, until it observes a stop signal on its endpoint.
pub type ModuleEntryFn = fn(ModuleContext) -> BoxFuture<'static, anyhow::Result<()>>;

/// Versioned module declaration, the single contract between host and module.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ModuleDecl {
    /// Must equal [`MODULE_ABI_VERSION`] of the host.
    pub abi_version: u32,
    /// The module's entry function.
    pub entry: ModuleEntryFn,
}

/// A resolved module ready to be spawned.
pub(crate) enum LoadedModule {
    /// Compiled into the host.
    Builtin { entry: ModuleEntryFn },
    /// Loaded from a shared library; the handle keeps the code mapped.
    Dynamic {
        entry: ModuleEntryFn,
        _library: Arc<Library>,
    },
}

impl LoadedModule {
    pub(crate) fn entry(&self) -> ModuleEntryFn {
        match self {
            LoadedModule::Builtin { entry } => *entry,
            LoadedModule::Dynamic { entry, .. } => *entry,
        }
    }
}

/// Resolves and opens module libraries.
pub(crate) struct LibraryLoader {
    search_paths: Vec<PathBuf>,
    open_libraries: HashMap<PathBuf, Arc<Library>>,
    builtins: HashMap<String, ModuleDecl>,
}

impl LibraryLoader {
    pub(crate) fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            open_libraries: HashMap::new(),
            builtins: HashMap::new(),
        }
    }

    /// Appends a search directory. Re-adding a known directory is a no-op.
    pub(crate) fn add_search_path(&mut self, dir: PathBuf) {
        if !self.search_paths.contains(&dir) {
            self.search_paths.push(dir);
        }
    }

    /// Registers a builtin module under a file name.
    pub(crate) fn register_builtin(&mut self, file: &str, decl: ModuleDecl) {
        self.builtins.insert(file.to_string(), decl);
    }

    /// First search-path hit for `file`, if any.
    fn resolve(&self, file: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(file))
            .find(|candidate| candidate.is_file())
    }

    /// Loads `file` as a module, builtins taking precedence over the search
    /// path.
    pub(crate) fn load(&mut self, file: &str) -> CoreResult<LoadedModule> {
        if let Some(decl) = self.builtins.get(file) {
            check_abi(file, decl.abi_version)?;
            debug!(file, "resolved builtin module");
            return Ok(LoadedModule::Builtin { entry: decl.entry });
        }

        let path = self.resolve(file).ok_or_else(|| CoreError::LibraryNotFound {
            file: file.to_string(),
        })?;

        let library = match self.open_libraries.get(&path) {
            Some(library) => Arc::clone(library),
            None => {
                // SAFETY: loading foreign code is inherently unsafe; the
                // declaration symbol is validated right below before any
                // module code runs.
                let library =
                    unsafe { Library::new(&path) }.map_err(|err| CoreError::LibraryOpen {
                        path: path.clone(),
                        reason: err.to_string(),
                    })?;
                let library = Arc::new(library);
                self.open_libraries.insert(path.clone(), Arc::clone(&library));
                debug!(path = %path.display(), "opened module library");
                library
            }
        };

        // SAFETY: the symbol is an exported static of type ModuleDecl per the
        // module contract; the version field is checked before the entry
        // pointer is ever called.
        let decl = unsafe {
            let symbol = library
                .get::<*const ModuleDecl>(MODULE_DECL_SYMBOL)
                .map_err(|err| CoreError::MissingSymbol {
                    path: path.clone(),
                    symbol: format!(
                        "{} ({err})",
                        String::from_utf8_lossy(MODULE_DECL_SYMBOL)
                    ),
                })?;
            symbol.read()
        };
        check_abi(file, decl.abi_version)?;

        Ok(LoadedModule::Dynamic {
            entry: decl.entry,
            _library: library,
        })
    }
}

fn check_abi(module: &str, found: u32) -> CoreResult<()> {
    if found == MODULE_ABI_VERSION {
        Ok(())
    } else {
        Err(CoreError::AbiMismatch {
            module: module.to_string(),
            found,
            supported: MODULE_ABI_VERSION,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop_entry(_ctx: ModuleContext) -> BoxFuture<'static, anyhow::Result<()>> {
        async { Ok(()) }.boxed()
    }

    #[test]
    fn missing_file_fails() {
        let mut loader = LibraryLoader::new();
        loader.add_search_path(std::env::temp_dir());
        assert!(matches!(
            loader.load("libgatehouse_nope.so"),
            Err(CoreError::LibraryNotFound { .. })
        ));
    }

    #[test]
    fn first_search_path_match_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("libmod.so"), b"first").unwrap();
        std::fs::write(second.path().join("libmod.so"), b"second").unwrap();

        let mut loader = LibraryLoader::new();
        loader.add_search_path(first.path().to_path_buf());
        loader.add_search_path(second.path().to_path_buf());

        assert_eq!(
            loader.resolve("libmod.so").unwrap(),
            first.path().join("libmod.so")
        );
    }

    #[test]
    fn garbage_file_is_rejected_by_the_loader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("libmod.so"), b"not a library").unwrap();

        let mut loader = LibraryLoader::new();
        loader.add_search_path(dir.path().to_path_buf());

        assert!(matches!(
            loader.load("libmod.so"),
            Err(CoreError::LibraryOpen { .. })
        ));
    }

    #[test]
    fn builtin_with_wrong_abi_is_rejected() {
        let mut loader = LibraryLoader::new();
        loader.register_builtin(
            "old",
            ModuleDecl {
                abi_version: MODULE_ABI_VERSION + 1,
                entry: noop_entry,
            },
        );
        assert!(matches!(
            loader.load("old"),
            Err(CoreError::AbiMismatch { .. })
        ));
    }

    #[test]
    fn builtin_resolves_without_search_paths() {
        let mut loader = LibraryLoader::new();
        loader.register_builtin(
            "noop",
            ModuleDecl {
                abi_version: MODULE_ABI_VERSION,
                entry: noop_entry,
            },
        );
        assert!(loader.load("noop").is_ok());
    }
}

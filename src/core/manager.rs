//! Module lifecycle management.
//!
//! The manager owns the full set of configured modules and drives them
//! through load, init and stop. Init is all-or-nothing: modules start in
//! ascending `level` order (insertion order breaking ties), and the first
//! failure rolls back every module already started, in reverse order, before
//! the error is returned. Stop runs in the same ascending order and never
//! fails; per-module stop errors are logged and swallowed.
//!
//! Library handles stay open for the manager's whole lifetime. Module
//! threads are joined by `stop_modules` (or the manager's `Drop`), and only
//! afterwards, when the loader inside the manager is dropped, are the OS
//! handles released.

use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::config::ModuleDefinition;
use crate::core::bus::MessageBus;
use crate::core::loader::{LibraryLoader, LoadedModule, ModuleDecl};
use crate::core::runtime::{spawn_actor, ActorHandle};
use crate::error::{CoreError, CoreResult};

struct ModuleDescriptor {
    definition: ModuleDefinition,
    library: LoadedModule,
    actor: Option<ActorHandle>,
}

/// Owns and orchestrates the platform's modules.
///
/// Field order matters for drop order: descriptors (and with them the module
/// threads) go before the loader, so no library is unmapped while module code
/// could still run.
pub struct ModuleManager {
    bus: MessageBus,
    modules: Vec<ModuleDescriptor>,
    loader: LibraryLoader,
}

impl ModuleManager {
    /// Creates an empty manager on the given bus.
    pub fn new(bus: MessageBus) -> Self {
        Self {
            bus,
            modules: Vec::new(),
            loader: LibraryLoader::new(),
        }
    }

    /// Creates a manager with the stock builtin modules registered.
    pub fn with_builtin_modules(bus: MessageBus) -> Self {
        let mut manager = Self::new(bus);
        for (file, decl) in crate::modules::builtin_declarations() {
            manager.register_builtin(file, decl);
        }
        manager
    }

    /// The bus shared by all modules.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Registers a builtin module under a file name.
    pub fn register_builtin(&mut self, file: &str, decl: ModuleDecl) {
        self.loader.register_builtin(file, decl);
    }

    /// Appends a module library search directory.
    pub fn add_search_path(&mut self, dir: PathBuf) {
        self.loader.add_search_path(dir);
    }

    /// Names of all loaded modules, in registration order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules
            .iter()
            .map(|descriptor| descriptor.definition.name.as_str())
            .collect()
    }

    /// Resolves and loads one module. On failure the registry is unchanged.
    pub fn load_module(&mut self, definition: ModuleDefinition) -> CoreResult<()> {
        if definition.name.is_empty() {
            return Err(CoreError::Configuration(
                "module with empty name".to_string(),
            ));
        }
        if definition.file.is_empty() {
            return Err(CoreError::Configuration(format!(
                "module '{}' has an empty file",
                definition.name
            )));
        }
        if self
            .modules
            .iter()
            .any(|descriptor| descriptor.definition.name == definition.name)
        {
            return Err(CoreError::DuplicateModule(definition.name));
        }

        let library = self.loader.load(&definition.file)?;
        info!(module = %definition.name, file = %definition.file, "module loaded");
        self.modules.push(ModuleDescriptor {
            definition,
            library,
            actor: None,
        });
        Ok(())
    }

    /// Indices into `modules`, sorted by ascending level. The sort is stable,
    /// so modules on the same level keep their registration order.
    fn start_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.modules.len()).collect();
        order.sort_by_key(|&index| self.modules[index].definition.level);
        order
    }

    /// Starts every loaded module, lowest level first.
    ///
    /// Each module must signal readiness before the next one is spawned. If
    /// any module fails, the ones already started are stopped again in
    /// reverse start order and the failure is returned.
    pub fn init_modules(&mut self) -> CoreResult<()> {
        let order = self.start_order();
        let mut started: Vec<usize> = Vec::new();

        for index in order {
            if self.modules[index].actor.is_some() {
                continue;
            }
            let entry = self.modules[index].library.entry();
            let definition = self.modules[index].definition.clone();
            let name = definition.name.clone();

            match spawn_actor(entry, &self.bus, &name, definition) {
                Ok(actor) => {
                    self.modules[index].actor = Some(actor);
                    started.push(index);
                }
                Err(err) => {
                    error!(module = %name, %err, "module failed to start, rolling back");
                    for &done in started.iter().rev() {
                        self.stop_descriptor(done);
                    }
                    return Err(err);
                }
            }
        }

        info!(count = self.modules.len(), "all modules started");
        Ok(())
    }

    /// Stops every running module, lowest level first. Never fails.
    pub fn stop_modules(&mut self) {
        for index in self.start_order() {
            self.stop_descriptor(index);
        }
    }

    fn stop_descriptor(&mut self, index: usize) {
        let descriptor = &mut self.modules[index];
        let Some(mut actor) = descriptor.actor.take() else {
            return;
        };
        match actor.stop() {
            Ok(()) => info!(module = %descriptor.definition.name, "module stopped"),
            Err(err) => {
                warn!(module = %descriptor.definition.name, %err, "module stop reported an error")
            }
        }
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        self.stop_modules();
    }
}

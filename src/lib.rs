//! Gatehouse is a modular access-control platform core.
//!
//! Functionality lives in modules: independently loaded units that each run
//! on their own OS thread and are reachable only through messages. The
//! [`ModuleManager`] loads modules from shared libraries (or the builtin
//! registry), starts them in configured priority order and stops them again
//! on shutdown. Modules and callers communicate over the in-process
//! [`MessageBus`]: broadcast events on the data plane, synchronous
//! request/reply command frames point to point. Typed facades such as
//! [`facade::Led`] and [`facade::WiegandReader`] wrap the command vocabulary
//! for callers.

pub mod config;
pub mod core;
pub mod error;
pub mod facade;
pub mod logging;
pub mod modules;
pub mod protocol;

pub use config::{ModuleDefinition, Settings};
pub use core::bus::MessageBus;
pub use core::manager::ModuleManager;
pub use error::{CoreError, CoreResult};

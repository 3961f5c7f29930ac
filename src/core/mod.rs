//! Platform core: frames, bus, module loading and lifecycle.

pub mod bus;
pub mod frame;
pub mod loader;
pub mod manager;
pub mod runtime;

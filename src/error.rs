//! Custom error types for the platform.
//!
//! This module defines the primary error type, [`CoreError`], used across the
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to report the failure modes of the module lifecycle and the
//! message bus:
//!
//! - **Load failures** (`LibraryNotFound`, `LibraryOpen`, `MissingSymbol`,
//!   `AbiMismatch`, `DuplicateModule`): fatal to the module being loaded but
//!   never to its siblings.
//! - **`Init`**: a module failed to signal readiness. This aborts the whole
//!   startup sequence and triggers a rollback of already-started modules.
//! - **`Stop`**: a module did not exit cleanly. Logged by the manager, never
//!   escalated, so one misbehaving module cannot block the shutdown of the
//!   rest.
//! - **`ProtocolViolation`**: a command or reply frame does not match the
//!   fixed facade/backend vocabulary. Surfaced as an explicit result instead
//!   of an assertion so a malformed peer is recoverable.
//! - **`Timeout`**: a facade waited longer than the configured bound for a
//!   reply. Only produced when a command timeout is configured; with no
//!   timeout the caller blocks until the backend answers.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the platform error type.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// All error conditions surfaced by the module manager and the message bus.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Failure while reading or merging configuration sources.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Semantically invalid configuration that parsed correctly.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Wrapped `std::io::Error` from file or socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested module file was not present in any search directory.
    #[error("Module file '{file}' not found in any search directory")]
    LibraryNotFound {
        /// File name as given in the module configuration.
        file: String,
    },

    /// The module file exists but the dynamic loader rejected it.
    #[error("Failed to open module library '{path}': {reason}")]
    LibraryOpen {
        /// Full path of the offending file.
        path: PathBuf,
        /// Loader-provided reason.
        reason: String,
    },

    /// The library does not expose the well-known module declaration symbol.
    #[error("Library '{path}' does not expose symbol '{symbol}'")]
    MissingSymbol {
        /// Full path of the offending file.
        path: PathBuf,
        /// Symbol name that was looked up.
        symbol: String,
    },

    /// The module was built against an incompatible host interface.
    #[error("Module '{module}' declares ABI version {found}, host supports {supported}")]
    AbiMismatch {
        /// Module file or builtin name.
        module: String,
        /// Version the module declares.
        found: u32,
        /// Version this host was built with.
        supported: u32,
    },

    /// A module with the same name is already present in the registry.
    #[error("A module named '{0}' is already loaded")]
    DuplicateModule(String),

    /// A module failed to reach its ready state during startup.
    #[error("Module '{module}' failed to initialize: {reason}")]
    Init {
        /// Name of the offending module.
        module: String,
        /// What went wrong, as reported over the readiness channel.
        reason: String,
    },

    /// A module did not exit cleanly when asked to stop.
    #[error("Module '{module}' did not stop cleanly: {reason}")]
    Stop {
        /// Name of the offending module.
        module: String,
        /// What went wrong while stopping.
        reason: String,
    },

    /// Another endpoint is already bound to this address.
    #[error("Address '{0}' already has a bound endpoint")]
    AddressInUse(String),

    /// No endpoint is currently bound to this address.
    #[error("No endpoint is bound to address '{0}'")]
    AddressUnbound(String),

    /// The backend for this address went away mid-conversation.
    #[error("Peer on address '{0}' is gone")]
    PeerGone(String),

    /// The backend did not reply within the configured command timeout.
    #[error("Timed out waiting for a reply from '{address}' after {waited:?}")]
    Timeout {
        /// Address of the unresponsive backend.
        address: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// A frame does not match the expected command/reply vocabulary.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

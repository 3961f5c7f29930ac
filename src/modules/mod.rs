//! Builtin modules compiled into the host binary.
//!
//! Each submodule exposes a [`ModuleDecl`] through `declaration()`; the
//! manager registers them under the file names listed here, so a
//! configuration entry with `file = "led"` resolves without touching the
//! search path.

pub mod journal;
pub mod led;
pub mod rpleth;
pub mod wiegand;

use crate::core::loader::ModuleDecl;

/// The stock builtin modules and the file names they are registered under.
pub fn builtin_declarations() -> Vec<(&'static str, ModuleDecl)> {
    vec![
        ("led", led::declaration()),
        ("wiegand", wiegand::declaration()),
        ("rpleth", rpleth::declaration()),
        ("journal", journal::declaration()),
    ]
}

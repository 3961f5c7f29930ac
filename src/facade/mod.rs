//! Typed synchronous facades over module command channels.
//!
//! A facade wraps a [`CommandClient`](crate::core::bus::CommandClient) and
//! turns a device's frame vocabulary into methods. Callers block for each
//! reply; commands within one conversation strictly alternate with replies.

pub mod led;
pub mod reader;

pub use led::{Led, LedState};
pub use reader::WiegandReader;

use crate::core::frame::{Frame, KO, OK};
use crate::error::{CoreError, CoreResult};

/// Maps an `OK`/`KO` reply frame to a boolean. Anything else is a protocol
/// violation.
fn boolean_reply(reply: &Frame) -> CoreResult<bool> {
    match reply.str_part(0)? {
        OK => Ok(true),
        KO => Ok(false),
        other => Err(CoreError::ProtocolViolation(format!(
            "expected {OK} or {KO} reply, got '{other}'"
        ))),
    }
}

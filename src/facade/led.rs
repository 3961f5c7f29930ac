//! Synchronous facade for LED backends.

use std::time::Duration;

use crate::core::bus::{CommandClient, MessageBus};
use crate::core::frame::Frame;
use crate::error::{CoreError, CoreResult};

/// Observed state of an LED, as reported by its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedState {
    /// Steady off.
    Off,
    /// Steady on.
    On,
    /// Blinking with the given total duration and per-toggle speed; `value`
    /// is the output level at the time of the query.
    Blinking {
        /// Total blink duration in milliseconds.
        duration: i64,
        /// Toggle period in milliseconds.
        speed: i64,
        /// Whether the output is currently high.
        value: bool,
    },
}

/// Client handle for one LED device.
pub struct Led {
    name: String,
    client: CommandClient,
}

impl Led {
    /// Connects to the LED backend bound at `name`.
    pub fn new(bus: &MessageBus, name: &str) -> CoreResult<Self> {
        Ok(Self {
            name: name.to_string(),
            client: bus.client(name)?,
        })
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overrides the reply timeout for this handle.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    /// Turns the LED on until further notice.
    pub fn turn_on(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("ON"))?)
    }

    /// Turns the LED on for `duration`, after which the backend switches it
    /// off by itself.
    pub fn turn_on_for(&self, duration: Duration) -> CoreResult<bool> {
        let frame = Frame::of("ON").push(duration.as_millis() as i64);
        super::boolean_reply(&self.client.call(frame)?)
    }

    /// Turns the LED off.
    pub fn turn_off(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("OFF"))?)
    }

    /// Toggles the LED.
    pub fn toggle(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("TOGGLE"))?)
    }

    /// Starts blinking with the backend's configured defaults.
    pub fn blink(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("BLINK"))?)
    }

    /// Starts blinking for `duration` total, toggling every `speed`.
    pub fn blink_for(&self, duration: Duration, speed: Duration) -> CoreResult<bool> {
        let frame = Frame::of("BLINK")
            .push(duration.as_millis() as i64)
            .push(speed.as_millis() as i64);
        super::boolean_reply(&self.client.call(frame)?)
    }

    /// Queries the backend's current state.
    ///
    /// The reply is either a single `ON`/`OFF` part, or the four parts
    /// `BLINKING <duration> <speed> <ON|OFF>`.
    pub fn state(&self) -> CoreResult<LedState> {
        let reply = self.client.call(Frame::of("STATE"))?;
        match reply.str_part(0)? {
            "BLINKING" => {
                reply.expect_parts(4, "BLINKING state reply")?;
                let duration = reply.int_part(1)?;
                let speed = reply.int_part(2)?;
                let value = match reply.str_part(3)? {
                    "ON" => true,
                    "OFF" => false,
                    other => {
                        return Err(CoreError::ProtocolViolation(format!(
                            "BLINKING state value must be ON or OFF, got '{other}'"
                        )))
                    }
                };
                Ok(LedState::Blinking {
                    duration,
                    speed,
                    value,
                })
            }
            "ON" => {
                reply.expect_parts(1, "ON state reply")?;
                Ok(LedState::On)
            }
            "OFF" => {
                reply.expect_parts(1, "OFF state reply")?;
                Ok(LedState::Off)
            }
            other => Err(CoreError::ProtocolViolation(format!(
                "unknown LED state '{other}'"
            ))),
        }
    }

    /// True when the LED output is currently high, including during a blink.
    pub fn is_on(&self) -> CoreResult<bool> {
        match self.state()? {
            LedState::On => Ok(true),
            LedState::Off => Ok(false),
            LedState::Blinking { value, .. } => Ok(value),
        }
    }

    /// True while a blink is in progress.
    pub fn is_blinking(&self) -> CoreResult<bool> {
        Ok(matches!(self.state()?, LedState::Blinking { .. }))
    }
}

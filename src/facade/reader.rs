//! Synchronous facade for Wiegand reader backends.
//!
//! A reader backend accepts buzzer commands directly and forwards
//! `GREEN_LED`-prefixed commands to the LED backend it is wired to, relaying
//! that backend's reply unchanged.

use std::time::Duration;

use crate::core::bus::{CommandClient, MessageBus};
use crate::core::frame::Frame;
use crate::error::CoreResult;

/// Client handle for one Wiegand reader device.
pub struct WiegandReader {
    name: String,
    client: CommandClient,
}

impl WiegandReader {
    /// Connects to the reader backend bound at `name`.
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

    /// Sounds the buzzer for `duration`.
    pub fn beep(&self, duration: Duration) -> CoreResult<bool> {
        let frame = Frame::of("BEEP").push(duration.as_millis() as i64);
        super::boolean_reply(&self.client.call(frame)?)
    }

    /// Turns the buzzer on until further notice.
    pub fn buzzer_on(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("BEEP_ON"))?)
    }

    /// Turns the buzzer off.
    pub fn buzzer_off(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("BEEP_OFF"))?)
    }

    /// Turns the reader's green LED on.
    pub fn green_led_on(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("GREEN_LED").push("ON"))?)
    }

    /// Turns the reader's green LED off.
    pub fn green_led_off(&self) -> CoreResult<bool> {
        super::boolean_reply(&self.client.call(Frame::of("GREEN_LED").push("OFF"))?)
    }

    /// Blinks the reader's green LED.
    pub fn green_led_blink(&self, duration: Duration, speed: Duration) -> CoreResult<bool> {
        let frame = Frame::of("GREEN_LED")
            .push("BLINK")
            .push(duration.as_millis() as i64)
            .push(speed.as_millis() as i64);
        super::boolean_reply(&self.client.call(frame)?)
    }
}

//! Builtin LED backend.
//!
//! Keeps a single LED's state machine and answers the facade vocabulary:
//! `ON [duration_ms]`, `OFF`, `TOGGLE`, `BLINK [duration_ms speed_ms]` and
//! `STATE`. Timed states (a temporary `ON` or a `BLINK`) expire on the
//! module's own timer; transitions are otherwise driven only by commands.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::core::bus::{CommandRequest, Envelope};
use crate::core::frame::{Frame, KO, OK};
use crate::core::loader::{ModuleDecl, MODULE_ABI_VERSION};
use crate::core::runtime::ModuleContext;

/// Declaration for registering this module as a builtin.
pub fn declaration() -> ModuleDecl {
    ModuleDecl {
        abi_version: MODULE_ABI_VERSION,
        entry,
    }
}

fn entry(ctx: ModuleContext) -> BoxFuture<'static, anyhow::Result<()>> {
    run(ctx).boxed()
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LedConfig {
    /// Blink duration when `BLINK` carries no arguments, in milliseconds.
    default_blink_duration: i64,
    /// Blink toggle period when `BLINK` carries no arguments, in
    /// milliseconds.
    default_blink_speed: i64,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            default_blink_duration: 1000,
            default_blink_speed: 300,
        }
    }
}

enum LedState {
    Off,
    On {
        until: Option<Instant>,
    },
    Blinking {
        duration: i64,
        speed: i64,
        value: bool,
        until: Instant,
        next_toggle: Instant,
    },
}

async fn run(mut ctx: ModuleContext) -> anyhow::Result<()> {
    let config: LedConfig = match ctx.module_config() {
        Ok(config) => config,
        Err(err) => {
            ctx.ready_failed(err.to_string());
            return Err(err.into());
        }
    };
    let mut endpoint = match ctx.bind() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            ctx.ready_failed(err.to_string());
            return Err(err.into());
        }
    };
    ctx.ready();

    let mut state = LedState::Off;
    loop {
        advance(&mut state, Instant::now());

        let envelope = match next_deadline(&state) {
            Some(at) => tokio::select! {
                envelope = endpoint.next() => envelope,
                _ = sleep_until(at) => continue,
            },
            None => endpoint.next().await,
        };

        match envelope {
            Some(Envelope::Command(request)) => handle_command(&mut state, &config, request),
            Some(Envelope::Stop) | None => break,
        }
    }
    Ok(())
}

/// Applies timer expiries up to `now`.
fn advance(state: &mut LedState, now: Instant) {
    let expired = match state {
        LedState::On { until: Some(at) } if now >= *at => true,
        LedState::Blinking { until, .. } if now >= *until => true,
        LedState::Blinking {
            speed,
            value,
            next_toggle,
            ..
        } => {
            let period = Duration::from_millis((*speed).max(1) as u64);
            while now >= *next_toggle {
                *value = !*value;
                *next_toggle += period;
            }
            false
        }
        _ => false,
    };
    if expired {
        *state = LedState::Off;
    }
}

/// The next instant at which the state machine needs to run on its own.
fn next_deadline(state: &LedState) -> Option<Instant> {
    match state {
        LedState::Off | LedState::On { until: None } => None,
        LedState::On { until: Some(at) } => Some(*at),
        LedState::Blinking {
            until, next_toggle, ..
        } => Some((*until).min(*next_toggle)),
    }
}

fn handle_command(state: &mut LedState, config: &LedConfig, request: CommandRequest) {
    // Cloned so the request can be consumed for an early KO reply.
    let frame = request.frame().clone();
    let now = Instant::now();

    // A due toggle or expiry must be applied before the command is
    // interpreted, or a racing STATE query sees a blink that already ended.
    advance(state, now);

    let reply = match frame.str_part(0) {
        Ok("ON") => {
            let until = if frame.parts() > 1 {
                match frame.int_part(1) {
                    Ok(ms) => Some(now + Duration::from_millis(ms.max(0) as u64)),
                    Err(_) => {
                        request.reply(Frame::of(KO));
                        return;
                    }
                }
            } else {
                None
            };
            *state = LedState::On { until };
            Frame::of(OK)
        }
        Ok("OFF") => {
            *state = LedState::Off;
            Frame::of(OK)
        }
        Ok("TOGGLE") => {
            *state = if is_lit(state) {
                LedState::Off
            } else {
                LedState::On { until: None }
            };
            Frame::of(OK)
        }
        Ok("BLINK") => {
            let (duration, speed) = if frame.parts() > 1 {
                match (frame.int_part(1), frame.int_part(2)) {
                    (Ok(duration), Ok(speed)) => (duration, speed),
                    _ => {
                        request.reply(Frame::of(KO));
                        return;
                    }
                }
            } else {
                (config.default_blink_duration, config.default_blink_speed)
            };
            let speed = speed.max(1);
            *state = LedState::Blinking {
                duration,
                speed,
                value: true,
                until: now + Duration::from_millis(duration.max(0) as u64),
                next_toggle: now + Duration::from_millis(speed as u64),
            };
            Frame::of(OK)
        }
        Ok("STATE") => match state {
            LedState::Off => Frame::of("OFF"),
            LedState::On { .. } => Frame::of("ON"),
            LedState::Blinking {
                duration,
                speed,
                value,
                ..
            } => Frame::of("BLINKING")
                .push(*duration)
                .push(*speed)
                .push(if *value { "ON" } else { "OFF" }),
        },
        Ok(other) => {
            debug!(command = other, "unknown LED command");
            Frame::of(KO)
        }
        Err(_) => Frame::of(KO),
    };

    request.reply(reply);
}

fn is_lit(state: &LedState) -> bool {
    match state {
        LedState::Off => false,
        LedState::On { .. } => true,
        LedState::Blinking { value, .. } => *value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_expiries_turn_the_led_off() {
        let now = Instant::now();
        let mut state = LedState::Blinking {
            duration: 100,
            speed: 10,
            value: true,
            until: now - Duration::from_millis(1),
            next_toggle: now,
        };
        advance(&mut state, now);
        assert!(matches!(state, LedState::Off));

        let mut state = LedState::On {
            until: Some(now - Duration::from_millis(1)),
        };
        advance(&mut state, now);
        assert!(matches!(state, LedState::Off));
    }

    #[test]
    fn due_toggles_flip_the_blink_value() {
        let now = Instant::now();
        let mut state = LedState::Blinking {
            duration: 1000,
            speed: 10,
            value: true,
            until: now + Duration::from_millis(500),
            next_toggle: now - Duration::from_millis(5),
        };
        advance(&mut state, now);
        match state {
            LedState::Blinking { value, next_toggle, .. } => {
                assert!(!value);
                assert!(next_toggle > now);
            }
            _ => panic!("blink should still be running"),
        }
    }

    #[test]
    fn untimed_states_need_no_wakeup() {
        assert!(next_deadline(&LedState::Off).is_none());
        assert!(next_deadline(&LedState::On { until: None }).is_none());
        let at = Instant::now() + Duration::from_millis(50);
        assert_eq!(next_deadline(&LedState::On { until: Some(at) }), Some(at));
    }
}

//! Builtin Wiegand reader backend.
//!
//! Answers the reader facade vocabulary: `BEEP duration_ms`, `BEEP_ON`,
//! `BEEP_OFF` drive the buzzer line, and any `GREEN_LED`-prefixed command is
//! forwarded (minus the prefix) to the LED backend named in the module
//! configuration, relaying that backend's reply to the original caller.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::core::bus::{CommandRequest, Envelope, MessageBus};
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

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct WiegandConfig {
    /// Bus address of the LED backend wired as this reader's green LED.
    green_led: Option<String>,
}

async fn run(mut ctx: ModuleContext) -> anyhow::Result<()> {
    let config: WiegandConfig = match ctx.module_config() {
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

    let bus = ctx.bus().clone();
    let name = ctx.address().to_string();

    while let Some(envelope) = endpoint.next().await {
        match envelope {
            Envelope::Command(request) => {
                handle_command(&bus, &name, &config, request).await;
            }
            Envelope::Stop => break,
        }
    }
    Ok(())
}

async fn handle_command(
    bus: &MessageBus,
    name: &str,
    config: &WiegandConfig,
    request: CommandRequest,
) {
    let frame = request.frame().clone();

    let reply = match frame.str_part(0) {
        Ok("BEEP") => match frame.int_part(1) {
            Ok(duration) => {
                info!(reader = name, duration_ms = duration, "buzzer pulse");
                Frame::of(OK)
            }
            Err(_) => Frame::of(KO),
        },
        Ok("BEEP_ON") => {
            info!(reader = name, "buzzer on");
            Frame::of(OK)
        }
        Ok("BEEP_OFF") => {
            info!(reader = name, "buzzer off");
            Frame::of(OK)
        }
        Ok("GREEN_LED") => {
            forward_to_green_led(bus, name, config, frame.tail(1)).await
        }
        Ok(other) => {
            debug!(reader = name, command = other, "unknown reader command");
            Frame::of(KO)
        }
        Err(_) => Frame::of(KO),
    };

    request.reply(reply);
}

/// Forwards a command to the configured green LED backend, relaying its
/// reply. Missing wiring or an unreachable backend yields `KO`.
async fn forward_to_green_led(
    bus: &MessageBus,
    name: &str,
    config: &WiegandConfig,
    command: Frame,
) -> Frame {
    let Some(led_address) = config.green_led.as_deref() else {
        warn!(reader = name, "no green LED configured");
        return Frame::of(KO);
    };
    if command.is_empty() {
        return Frame::of(KO);
    }
    let client = match bus.client(led_address) {
        Ok(client) => client,
        Err(err) => {
            warn!(reader = name, led = led_address, %err, "green LED unreachable");
            return Frame::of(KO);
        }
    };
    match client.call_async(command).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(reader = name, led = led_address, %err, "green LED command failed");
            Frame::of(KO)
        }
    }
}

//! Builtin event journal.
//!
//! Subscribes to the data plane and writes a structured log line for every
//! event, which is how operators watch card reads without attaching a
//! gateway. It exposes no command vocabulary.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::core::bus::Envelope;
use crate::core::frame::{Frame, KO};
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

async fn run(mut ctx: ModuleContext) -> anyhow::Result<()> {
    let mut endpoint = match ctx.bind() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            ctx.ready_failed(err.to_string());
            return Err(err.into());
        }
    };
    ctx.ready();

    let mut events = ctx.bus().subscribe();
    loop {
        tokio::select! {
            envelope = endpoint.next() => match envelope {
                Some(Envelope::Command(request)) => request.reply(Frame::of(KO)),
                Some(Envelope::Stop) | None => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    info!(source = %event.source, payload = %event.payload, "bus event");
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "journal fell behind on bus events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

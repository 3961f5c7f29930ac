//! Module actor runtime.
//!
//! Each module instance runs on its own OS thread with a dedicated
//! current-thread tokio runtime driving the module's async entry function.
//! Spawning is a synchronous handshake: the spawning thread blocks until the
//! module signals readiness (or failure, or exits early), so module startup
//! is strictly sequential and a failed module never reports as started.
//!
//! Stopping is cooperative. [`ActorHandle::stop`] delivers the reserved
//! [`Envelope::Stop`] message on the module's control channel and joins the
//! thread; well-behaved modules exit their event loop promptly on seeing it.

use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{error, info, warn};

use crate::config::ModuleDefinition;
use crate::core::bus::{Endpoint, Envelope, MessageBus};
use crate::core::loader::ModuleEntryFn;
use crate::error::{CoreError, CoreResult};

/// Everything a module entry function receives from the host.
pub struct ModuleContext {
    bus: MessageBus,
    address: String,
    definition: ModuleDefinition,
    ready: ReadySignal,
}

impl ModuleContext {
    /// Handle to the shared bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// This module's bus address (its configured name).
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Binds this module's control endpoint. Must happen before
    /// [`ready`](Self::ready), otherwise the host cannot stop the module.
    pub fn bind(&self) -> CoreResult<Endpoint> {
        self.bus.bind(&self.address)
    }

    /// Deserializes the module's `module_config` subtree.
    pub fn module_config<T: DeserializeOwned>(&self) -> CoreResult<T> {
        self.definition
            .module_config
            .clone()
            .try_into()
            .map_err(|err| {
                CoreError::Configuration(format!(
                    "module '{}' configuration: {err}",
                    self.address
                ))
            })
    }

    /// Signals successful initialization, unblocking the spawner. Call once,
    /// after binding the endpoint and completing setup.
    pub fn ready(&mut self) {
        self.ready.send(Ok(()));
    }

    /// Signals failed initialization; the entry should return an error right
    /// after.
    pub fn ready_failed(&mut self, reason: impl Into<String>) {
        self.ready.send(Err(reason.into()));
    }
}

/// Send-once readiness channel back to the spawning thread.
struct ReadySignal {
    tx: Option<SyncSender<Result<(), String>>>,
}

impl ReadySignal {
    fn send(&mut self, outcome: Result<(), String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Host-side handle to a running module thread.
#[derive(Debug)]
pub struct ActorHandle {
    address: String,
    control: tokio_mpsc::Sender<Envelope>,
    thread: Option<JoinHandle<()>>,
}

impl ActorHandle {
    /// Address of the module this handle controls.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Delivers the stop signal and joins the module thread. Idempotent;
    /// a second call is a no-op.
    pub fn stop(&mut self) -> CoreResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The channel may already be closed if the module exited on its own.
        let _ = self.control.blocking_send(Envelope::Stop);
        thread.join().map_err(|_| CoreError::Stop {
            module: self.address.clone(),
            reason: "module thread panicked".to_string(),
        })
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            if let Err(err) = self.stop() {
                error!(module = %self.address, %err, "error while stopping module");
            }
        }
    }
}

/// Spawns a module on its own thread and blocks until it signals readiness.
///
/// Returns an [`ActorHandle`] only for modules that both signaled success and
/// bound their control endpoint; anything else is an initialization error and
/// the thread is joined before returning.
pub(crate) fn spawn_actor(
    entry: ModuleEntryFn,
    bus: &MessageBus,
    address: &str,
    definition: ModuleDefinition,
) -> CoreResult<ActorHandle> {
    let (ready_tx, ready_rx) = mpsc::sync_channel(1);
    let ctx = ModuleContext {
        bus: bus.clone(),
        address: address.to_string(),
        definition,
        ready: ReadySignal { tx: Some(ready_tx) },
    };

    let thread_address = address.to_string();
    let thread = thread::Builder::new()
        .name(format!("module-{address}"))
        .spawn(move || run_module_thread(entry, thread_address, ctx))
        .map_err(|err| CoreError::Init {
            module: address.to_string(),
            reason: format!("failed to spawn module thread: {err}"),
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => match bus.control_sender(address) {
            Ok(control) => {
                info!(module = %address, "module started");
                Ok(ActorHandle {
                    address: address.to_string(),
                    control,
                    thread: Some(thread),
                })
            }
            Err(_) => {
                let _ = thread.join();
                Err(CoreError::Init {
                    module: address.to_string(),
                    reason: "module signaled ready without binding its endpoint".to_string(),
                })
            }
        },
        Ok(Err(reason)) => {
            let _ = thread.join();
            Err(CoreError::Init {
                module: address.to_string(),
                reason,
            })
        }
        Err(_) => {
            // The module exited (or panicked) without ever touching the
            // readiness channel.
            let _ = thread.join();
            Err(CoreError::Init {
                module: address.to_string(),
                reason: "module exited before signaling readiness".to_string(),
            })
        }
    }
}

fn run_module_thread(entry: ModuleEntryFn, address: String, mut ctx: ModuleContext) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            ctx.ready
                .send(Err(format!("failed to build module runtime: {err}")));
            return;
        }
    };

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.block_on((entry)(ctx))
    }));

    match outcome {
        Ok(Ok(())) => info!(module = %address, "module exited cleanly"),
        Ok(Err(err)) => warn!(module = %address, %err, "module exited with error"),
        Err(_) => error!(module = %address, "module panicked"),
    }
}

//! Builtin Rpleth gateway.
//!
//! Bridges one Wiegand reader to TCP clients speaking the Rpleth wire
//! protocol. In stream mode, every card event published for the configured
//! reader is pushed to all connected clients as a badge packet. Incoming
//! packets addressed to the reader subsystem are translated into facade
//! commands and forwarded to the reader backend.
//!
//! Card events are expected on the data plane under the source address
//! `S_<reader>`, with the card number as colon-separated hex text in the
//! first frame part.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::core::bus::{Envelope, MessageBus};
use crate::core::frame::{Frame, KO};
use crate::core::loader::{ModuleDecl, MODULE_ABI_VERSION};
use crate::core::runtime::ModuleContext;
use crate::protocol::rpleth::{
    card_from_text, decode, encode, encode_raw, HidCommand, ReadBuffer, RplethPacket, SensorType,
};

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
struct RplethConfig {
    /// TCP port the gateway listens on.
    port: u16,
    /// Name of the reader this gateway fronts; card events are taken from
    /// the `S_<reader>` source and commands are forwarded to this address.
    reader: String,
    /// When true, card reads are pushed to every connected client as badge
    /// packets.
    stream_mode: bool,
}

impl Default for RplethConfig {
    fn default() -> Self {
        Self {
            port: 4242,
            reader: "WIEGAND1".to_string(),
            stream_mode: true,
        }
    }
}

struct ClientConnection {
    stream: TcpStream,
    buffer: ReadBuffer,
}

async fn run(mut ctx: ModuleContext) -> anyhow::Result<()> {
    let config: RplethConfig = match ctx.module_config() {
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
    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            ctx.ready_failed(format!("cannot listen on port {}: {err}", config.port));
            return Err(err.into());
        }
    };
    ctx.ready();

    let bus = ctx.bus().clone();
    let mut events = bus.subscribe();
    let card_source = format!("S_{}", config.reader);
    let mut connections: Vec<ClientConnection> = Vec::new();

    info!(port = config.port, reader = %config.reader, "rpleth gateway listening");

    loop {
        tokio::select! {
            envelope = endpoint.next() => match envelope {
                Some(Envelope::Command(request)) => request.reply(Frame::of(KO)),
                Some(Envelope::Stop) | None => break,
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "rpleth client connected");
                    connections.push(ClientConnection {
                        stream,
                        buffer: ReadBuffer::default(),
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            },
            event = events.recv() => match event {
                Ok(event) if config.stream_mode && event.source == card_source => {
                    stream_card(&mut connections, &event.payload).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "rpleth gateway fell behind on card events");
                }
                Err(RecvError::Closed) => break,
            },
            (index, read) = read_any(&mut connections) => match read {
                Ok(bytes) if bytes.is_empty() => {
                    info!("rpleth client disconnected");
                    connections.swap_remove(index);
                }
                Ok(bytes) => {
                    if !handle_bytes(&bus, &config, &mut connections[index], &bytes).await {
                        connections.swap_remove(index);
                    }
                }
                Err(err) => {
                    warn!(%err, "dropping rpleth client on read failure");
                    connections.swap_remove(index);
                }
            },
        }
    }
    Ok(())
}

/// Reads from whichever client produces bytes first, or parks forever while
/// no client is connected. An empty result means a clean disconnect.
async fn read_any(
    connections: &mut [ClientConnection],
) -> (usize, std::io::Result<Vec<u8>>) {
    if connections.is_empty() {
        return std::future::pending().await;
    }
    let reads: Vec<_> = connections
        .iter_mut()
        .enumerate()
        .map(|(index, client)| {
            async move {
                let mut chunk = [0u8; 512];
                match client.stream.read(&mut chunk).await {
                    Ok(count) => (index, Ok(chunk[..count].to_vec())),
                    Err(err) => (index, Err(err)),
                }
            }
            .boxed()
        })
        .collect();
    let (result, _, _) = futures::future::select_all(reads).await;
    result
}

/// Pushes one card event to every connected client as a badge packet,
/// pruning clients whose socket fails.
async fn stream_card(connections: &mut Vec<ClientConnection>, payload: &Frame) {
    if connections.is_empty() {
        return;
    }
    let card_text = match payload.str_part(0) {
        Ok(text) => text,
        Err(err) => {
            warn!(%err, "malformed card event payload");
            return;
        }
    };
    let card = match card_from_text(card_text) {
        Ok(card) => card,
        Err(err) => {
            warn!(%err, "unparseable card number");
            return;
        }
    };
    let wire = match encode(SensorType::Hid, HidCommand::Badge as u8, &card) {
        Ok(wire) => wire,
        Err(err) => {
            warn!(%err, "card number does not fit a packet");
            return;
        }
    };
    let mut index = 0;
    while index < connections.len() {
        match connections[index].stream.write_all(&wire).await {
            Ok(()) => index += 1,
            Err(err) => {
                warn!(%err, "dropping rpleth client on write failure");
                connections.swap_remove(index);
            }
        }
    }
}

/// Buffers received bytes and processes every packet that became decodable.
/// Returns false when the client must be dropped.
async fn handle_bytes(
    bus: &MessageBus,
    config: &RplethConfig,
    client: &mut ClientConnection,
    bytes: &[u8],
) -> bool {
    let accepted = client.buffer.extend(bytes);
    if accepted < bytes.len() {
        // A full buffer means the peer outpaced decoding; the stream is
        // desynced beyond recovery.
        warn!(
            dropped = bytes.len() - accepted,
            "dropping rpleth client on receive buffer overflow"
        );
        return false;
    }

    while let Some(packet) = decode(&mut client.buffer) {
        if !packet.is_good {
            warn!(
                sensor = packet.sensor,
                command = packet.command,
                "discarding rpleth packet with bad checksum"
            );
            continue;
        }
        handle_packet(bus, config, &packet).await;

        // Every well-formed packet is acknowledged by echoing it.
        let ack = match encode_raw(packet.sensor, packet.command, &packet.payload) {
            Ok(ack) => ack,
            Err(err) => {
                warn!(%err, "cannot acknowledge rpleth packet");
                continue;
            }
        };
        if let Err(err) = client.stream.write_all(&ack).await {
            warn!(%err, "dropping rpleth client on write failure");
            return false;
        }
    }
    true
}

/// Translates a reader-subsystem packet into a facade command.
async fn handle_packet(bus: &MessageBus, config: &RplethConfig, packet: &RplethPacket) {
    if SensorType::from_u8(packet.sensor) != Some(SensorType::Hid) {
        debug!(sensor = packet.sensor, "ignoring non-reader rpleth packet");
        return;
    }
    let command = match HidCommand::from_u8(packet.command) {
        Some(command) => command,
        None => {
            debug!(command = packet.command, "unknown rpleth reader command");
            return;
        }
    };

    let frame = match command {
        HidCommand::Beep => {
            // Payload is an optional big-endian duration in milliseconds.
            let duration = match packet.payload[..] {
                [high, low] => i64::from(u16::from_be_bytes([high, low])),
                [single] => i64::from(single),
                _ => 500,
            };
            Frame::of("BEEP").push(duration)
        }
        HidCommand::Greenled => {
            let on = packet.payload.first().copied().unwrap_or(0) != 0;
            Frame::of("GREEN_LED").push(if on { "ON" } else { "OFF" })
        }
        HidCommand::Badge | HidCommand::GetCsn | HidCommand::SendCards => {
            debug!(?command, "rpleth command not forwarded");
            return;
        }
    };

    let client = match bus.client(&config.reader) {
        Ok(client) => client,
        Err(err) => {
            warn!(reader = %config.reader, %err, "reader backend unreachable");
            return;
        }
    };
    if let Err(err) = client.call_async(frame).await {
        warn!(reader = %config.reader, %err, "reader command failed");
    }
}

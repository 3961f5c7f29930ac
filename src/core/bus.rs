//! In-process message bus.
//!
//! The bus carries two kinds of traffic:
//!
//! - a **data plane**: a broadcast channel for domain events such as card
//!   reads. Publishers never block; a subscriber that falls too far behind
//!   misses events, and subscribers joining late do not see earlier events.
//! - **point-to-point command channels**: each module binds exactly one
//!   [`Endpoint`] to its own address; any number of [`CommandClient`]s can
//!   send command frames to it and block for the single reply. Request and
//!   reply strictly alternate per conversation — there is no pipelining.
//!
//! Command delivery rides a tokio mpsc channel into the module's event loop;
//! the reply travels back over a dedicated bounded rendezvous channel so the
//! synchronous caller can wait with an optional timeout. Without a timeout
//! the caller blocks until the backend answers or goes away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::config::BusSettings;
use crate::core::frame::Frame;
use crate::error::{CoreError, CoreResult};

/// A domain event broadcast on the data plane.
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Address of the publisher (by convention, `S_<device>` for sources).
    pub source: String,
    /// Event payload.
    pub payload: Frame,
}

/// One message delivered to a module's control endpoint.
#[derive(Debug)]
pub enum Envelope {
    /// A command frame expecting exactly one reply.
    Command(CommandRequest),
    /// Reserved stop signal; the module must exit its event loop.
    Stop,
}

/// A command frame paired with its reply channel.
#[derive(Debug)]
pub struct CommandRequest {
    frame: Frame,
    reply: ReplyHandle,
}

impl CommandRequest {
    /// The command frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Sends the single reply for this command, consuming the request.
    pub fn reply(self, frame: Frame) {
        self.reply.send(frame);
    }
}

/// Sending half of the per-command reply rendezvous.
#[derive(Debug)]
struct ReplyHandle(crossbeam_channel::Sender<Frame>);

impl ReplyHandle {
    fn pair() -> (Self, crossbeam_channel::Receiver<Frame>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (Self(tx), rx)
    }

    fn send(self, frame: Frame) {
        if self.0.try_send(frame).is_err() {
            warn!("dropping reply frame, caller is gone");
        }
    }
}

struct BusInner {
    data: broadcast::Sender<BusEvent>,
    endpoints: Mutex<HashMap<String, mpsc::Sender<Envelope>>>,
    endpoint_capacity: usize,
    command_timeout: Option<Duration>,
}

/// Handle to the shared in-process bus. Cheap to clone.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Creates a bus with the given tuning settings.
    pub fn new(settings: &BusSettings) -> Self {
        let (data, _) = broadcast::channel(settings.data_plane_capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                data,
                endpoints: Mutex::new(HashMap::new()),
                endpoint_capacity: settings.endpoint_capacity.max(1),
                command_timeout: settings.command_timeout,
            }),
        }
    }

    /// Publishes an event on the data plane. Never blocks; returns the number
    /// of subscribers the event was delivered to.
    pub fn publish(&self, source: impl Into<String>, payload: Frame) -> usize {
        let event = BusEvent {
            source: source.into(),
            payload,
        };
        self.inner.data.send(event).unwrap_or(0)
    }

    /// Subscribes to the data plane. Events published before this call are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.data.subscribe()
    }

    /// Binds the single control endpoint for `address`.
    ///
    /// Exactly one live endpoint may hold an address; a second bind fails
    /// with [`CoreError::AddressInUse`] until the first endpoint is dropped.
    pub fn bind(&self, address: &str) -> CoreResult<Endpoint> {
        let mut endpoints = self.lock_endpoints();
        if let Some(existing) = endpoints.get(address) {
            if !existing.is_closed() {
                return Err(CoreError::AddressInUse(address.to_string()));
            }
        }
        let (tx, rx) = mpsc::channel(self.inner.endpoint_capacity);
        endpoints.insert(address.to_string(), tx.clone());
        Ok(Endpoint {
            address: address.to_string(),
            rx,
            tx,
            bus: self.clone(),
        })
    }

    /// Creates a client for sending commands to the endpoint at `address`,
    /// using the bus-wide command timeout.
    pub fn client(&self, address: &str) -> CoreResult<CommandClient> {
        let tx = self.control_sender(address)?;
        Ok(CommandClient {
            address: address.to_string(),
            tx,
            timeout: self.inner.command_timeout,
        })
    }

    pub(crate) fn control_sender(&self, address: &str) -> CoreResult<mpsc::Sender<Envelope>> {
        let endpoints = self.lock_endpoints();
        match endpoints.get(address) {
            Some(tx) if !tx.is_closed() => Ok(tx.clone()),
            _ => Err(CoreError::AddressUnbound(address.to_string())),
        }
    }

    fn unbind(&self, address: &str, tx: &mpsc::Sender<Envelope>) {
        let mut endpoints = self.lock_endpoints();
        if let Some(current) = endpoints.get(address) {
            if current.same_channel(tx) {
                endpoints.remove(address);
            }
        }
    }

    fn lock_endpoints(&self) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<Envelope>>> {
        // Lock poisoning would mean a panic while holding the map; recover
        // with the map as-is rather than poisoning every bus user.
        match self.inner.endpoints.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The receiving end of one module's control channel.
pub struct Endpoint {
    address: String,
    rx: mpsc::Receiver<Envelope>,
    tx: mpsc::Sender<Envelope>,
    bus: MessageBus,
}

impl Endpoint {
    /// Address this endpoint is bound to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits for the next envelope. Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Blocking flavor of [`next`](Self::next), for synchronous backends and
    /// tests. Must not be called from async context.
    pub fn blocking_next(&mut self) -> Option<Envelope> {
        self.rx.blocking_recv()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.bus.unbind(&self.address, &self.tx);
    }
}

/// Caller-side handle for the request/reply conversation with one backend.
///
/// Every call sends one command frame and waits for exactly one reply frame.
/// [`call`](Self::call) is synchronous and must not be used from async
/// context; module code forwarding commands uses
/// [`call_async`](Self::call_async) instead.
#[derive(Clone)]
pub struct CommandClient {
    address: String,
    tx: mpsc::Sender<Envelope>,
    timeout: Option<Duration>,
}

impl CommandClient {
    /// Address of the backend this client talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Overrides the reply timeout for this client.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Removes the reply timeout; calls block until the backend answers.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Sends one command and blocks for its reply.
    pub fn call(&self, frame: Frame) -> CoreResult<Frame> {
        let (reply, rx) = ReplyHandle::pair();
        self.tx
            .blocking_send(Envelope::Command(CommandRequest { frame, reply }))
            .map_err(|_| CoreError::PeerGone(self.address.clone()))?;
        self.wait_reply(rx)
    }

    /// Sends one command from async context and blocks the current thread
    /// for the reply. Intended for module-to-module forwarding, where each
    /// module owns its thread.
    pub async fn call_async(&self, frame: Frame) -> CoreResult<Frame> {
        let (reply, rx) = ReplyHandle::pair();
        self.tx
            .send(Envelope::Command(CommandRequest { frame, reply }))
            .await
            .map_err(|_| CoreError::PeerGone(self.address.clone()))?;
        self.wait_reply(rx)
    }

    fn wait_reply(&self, rx: crossbeam_channel::Receiver<Frame>) -> CoreResult<Frame> {
        match self.timeout {
            Some(wait) => rx.recv_timeout(wait).map_err(|err| match err {
                crossbeam_channel::RecvTimeoutError::Timeout => CoreError::Timeout {
                    address: self.address.clone(),
                    waited: wait,
                },
                crossbeam_channel::RecvTimeoutError::Disconnected => {
                    CoreError::PeerGone(self.address.clone())
                }
            }),
            None => rx
                .recv()
                .map_err(|_| CoreError::PeerGone(self.address.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::OK;

    fn bus() -> MessageBus {
        MessageBus::new(&BusSettings::default())
    }

    #[test]
    fn one_reader_per_address() {
        let bus = bus();
        let _endpoint = bus.bind("door_led").unwrap();
        assert!(matches!(
            bus.bind("door_led"),
            Err(CoreError::AddressInUse(_))
        ));
    }

    #[test]
    fn address_is_reusable_after_drop() {
        let bus = bus();
        drop(bus.bind("door_led").unwrap());
        assert!(bus.bind("door_led").is_ok());
    }

    #[test]
    fn client_requires_a_bound_endpoint() {
        let bus = bus();
        assert!(matches!(
            bus.client("nobody"),
            Err(CoreError::AddressUnbound(_))
        ));
    }

    #[test]
    fn publish_never_blocks_without_subscribers() {
        let bus = bus();
        assert_eq!(bus.publish("S_WIEGAND1", Frame::of("ff:ff")), 0);
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let bus = bus();
        bus.publish("S_WIEGAND1", Frame::of("early"));
        let mut rx = bus.subscribe();
        bus.publish("S_WIEGAND1", Frame::of("late"));
        let event = rx.blocking_recv().unwrap();
        assert_eq!(event.payload.str_part(0).unwrap(), "late");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn command_round_trip() {
        let bus = bus();
        let mut endpoint = bus.bind("echo").unwrap();
        let backend = std::thread::spawn(move || {
            while let Some(envelope) = endpoint.blocking_next() {
                match envelope {
                    Envelope::Command(request) => {
                        let reply = request.frame().clone().push("seen");
                        request.reply(reply);
                    }
                    Envelope::Stop => break,
                }
            }
        });

        let client = bus.client("echo").unwrap();
        let reply = client.call(Frame::of(OK)).unwrap();
        assert_eq!(reply.parts(), 2);
        assert_eq!(reply.str_part(1).unwrap(), "seen");

        let stop_tx = bus.control_sender("echo").unwrap();
        stop_tx.blocking_send(Envelope::Stop).unwrap();
        backend.join().unwrap();
    }

    #[test]
    fn timeout_on_a_mute_backend() {
        let bus = bus();
        let _endpoint = bus.bind("mute").unwrap();
        let client = bus
            .client("mute")
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        assert!(matches!(
            client.call(Frame::of("STATE")),
            Err(CoreError::Timeout { .. })
        ));
    }
}

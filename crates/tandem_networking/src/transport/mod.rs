//! # Transport Layer
//!
//! One UDP socket per agent, with bounded send and receive queues.
//!
//! ## Design
//!
//! ```text
//!  socket ──► receiver thread ──► [receive queue] ──┐
//!                                                   │ pump(): validate, dispatch
//!  send_to() ──► [send queue] ──┐                   ▼
//!                               └─ pump(): frame, hash, send
//! ```
//!
//! - Each queue sits behind its own lock; no code path holds both
//! - Queue slots are allocated once and overwritten in place
//! - A full queue drops the message with a warning; there is no backpressure
//! - Socket errors are swallowed; nothing retries or reconnects
//!
//! Server agents bind `0.0.0.0:<port>` and accept any sender. Client agents
//! talk to one remote endpoint and ignore datagrams from anywhere else.

mod metrics;
mod queue;

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tandem_shared::{MessageType, MAX_MESSAGE_SIZE};
use tracing::{debug, trace, warn};

pub use metrics::{TrafficCounters, TransportMetrics};
pub use queue::{InboundDatagram, MessagePair, MessageQueue};

use metrics::MetricsTracker;

use crate::config::TransportConfig;
use crate::dispatch::FunctionRegistry;
use crate::error::{DispatchError, NetResult, TransportError};
use crate::protocol::NetworkMessage;

/// How often the receiver thread checks for shutdown.
const RECEIVE_POLL: Duration = Duration::from_millis(100);

/// Anything that can queue a message for a peer.
pub trait MessageSink: Send + Sync {
    /// Queues `message` for `recipient`.
    ///
    /// # Errors
    ///
    /// [`TransportError::QueueFull`] or [`TransportError::MessageTooLarge`];
    /// either way the message is dropped and already logged.
    fn send_to(&self, recipient: SocketAddr, message: &NetworkMessage) -> NetResult<()>;

    /// Sends whatever is queued now instead of on the next pump.
    fn flush(&self) {}
}

/// Sink that records messages instead of sending them.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(SocketAddr, NetworkMessage)>>,
}

impl RecordingSink {
    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<(SocketAddr, NetworkMessage)> {
        self.sent.lock().clone()
    }

    /// Recipient and known type of everything sent so far.
    #[must_use]
    pub fn sent_types(&self) -> Vec<(SocketAddr, MessageType)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(to, message)| message.kind().map(|kind| (*to, kind)))
            .collect()
    }

    /// Drains everything sent so far.
    pub fn take(&self) -> Vec<(SocketAddr, NetworkMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl MessageSink for RecordingSink {
    fn send_to(&self, recipient: SocketAddr, message: &NetworkMessage) -> NetResult<()> {
        self.sent.lock().push((recipient, message.clone()));
        Ok(())
    }
}

/// Which side of the connection an agent is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentMode {
    /// Bound to a local port, accepting any sender.
    Server {
        /// Port to bind. `0` lets the OS pick.
        port: u16,
    },
    /// Talking to one remote endpoint.
    Client {
        /// Server address.
        remote: SocketAddr,
    },
}

struct SendState {
    pairs: MessageQueue<MessagePair>,
    next_index: HashMap<SocketAddr, i32>,
    frame: Box<[u8; MAX_MESSAGE_SIZE]>,
}

/// UDP endpoint that frames, queues and dispatches messages.
///
/// `S` is the state handed to registered handlers during [`Self::pump`].
pub struct NetworkAgent<S> {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    mode: AgentMode,
    send: Mutex<SendState>,
    receive: Arc<Mutex<MessageQueue<InboundDatagram>>>,
    last_index: Mutex<HashMap<SocketAddr, i32>>,
    registry: RwLock<Arc<FunctionRegistry<S>>>,
    buffer_incoming: Arc<AtomicBool>,
    discard_stale: bool,
    metrics: Arc<Mutex<MetricsTracker>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl<S> NetworkAgent<S> {
    /// Opens the socket and starts receiving.
    ///
    /// # Errors
    ///
    /// [`TransportError::Io`] if the socket cannot be bound or configured.
    pub fn start(mode: AgentMode, config: &TransportConfig) -> NetResult<Self> {
        let bind: SocketAddr = match mode {
            AgentMode::Server { port } => SocketAddr::from(([0, 0, 0, 0], port)),
            AgentMode::Client { remote } if remote.is_ipv6() => SocketAddr::from(([0u16; 8], 0)),
            AgentMode::Client { .. } => SocketAddr::from(([0, 0, 0, 0], 0)),
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(RECEIVE_POLL))?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);

        let (wake_tx, wake_rx) = bounded(1);
        let receive = Arc::new(Mutex::new(MessageQueue::inbound(config.queue_capacity)));
        let metrics = Arc::new(Mutex::new(MetricsTracker::new()));
        let running = Arc::new(AtomicBool::new(true));

        let remote = match mode {
            AgentMode::Server { .. } => None,
            AgentMode::Client { remote } => Some(remote),
        };
        let receiver = ReceiveLoop::new(
            Arc::clone(&socket),
            Arc::clone(&receive),
            Arc::clone(&metrics),
            wake_tx.clone(),
            Arc::clone(&running),
            remote,
        );
        let handle = std::thread::Builder::new()
            .name(format!("tandem-recv-{}", local_addr.port()))
            .spawn(move || receiver.run())?;

        debug!(%local_addr, ?mode, "network agent started");

        Ok(Self {
            socket,
            local_addr,
            mode,
            send: Mutex::new(SendState {
                pairs: MessageQueue::outbound(config.queue_capacity),
                next_index: HashMap::new(),
                frame: Box::new([0u8; MAX_MESSAGE_SIZE]),
            }),
            receive,
            last_index: Mutex::new(HashMap::new()),
            registry: RwLock::new(Arc::new(FunctionRegistry::new())),
            buffer_incoming: Arc::new(AtomicBool::new(false)),
            discard_stale: config.discard_stale,
            metrics,
            wake_tx,
            wake_rx,
            running,
            receiver: Mutex::new(Some(handle)),
        })
    }

    /// Address the socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Construction mode.
    #[must_use]
    pub const fn mode(&self) -> AgentMode {
        self.mode
    }

    /// Remote endpoint of a client agent.
    #[must_use]
    pub const fn remote(&self) -> Option<SocketAddr> {
        match self.mode {
            AgentMode::Server { .. } => None,
            AgentMode::Client { remote } => Some(remote),
        }
    }

    /// Binds `handler` to `message_type`. Registering a taken type is a no-op.
    ///
    /// Returns true if the handler was bound.
    pub fn register_function<F>(&self, message_type: impl Into<u32>, handler: F) -> bool
    where
        F: Fn(&mut S, &dyn MessageSink, SocketAddr, &NetworkMessage) -> Result<(), DispatchError>
            + Send
            + Sync
            + 'static,
    {
        let mut registry = self.registry.write();
        let mut next = FunctionRegistry::clone(&registry);
        let bound = next.register(message_type, handler);
        if bound {
            *registry = Arc::new(next);
        }
        bound
    }

    /// Pauses (`true`) or resumes (`false`) inbound processing.
    ///
    /// Datagrams keep queueing while paused and are handled once resumed.
    pub fn buffer_incoming(&self, buffer: bool) {
        self.incoming_switch().set(buffer);
    }

    /// Switch that pauses inbound processing from anywhere, handlers included.
    #[must_use]
    pub fn incoming_switch(&self) -> IncomingSwitch {
        IncomingSwitch {
            flag: Arc::clone(&self.buffer_incoming),
            wake_tx: self.wake_tx.clone(),
        }
    }

    /// Returns true while inbound processing is paused.
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffer_incoming.load(Ordering::Acquire)
    }

    /// Sends every queued message, then handles every received one.
    pub fn pump(&self, state: &mut S) {
        self.flush_outbound();
        self.process_inbound(state);
    }

    /// Blocks until a datagram arrives or `timeout` passes.
    ///
    /// Returns true if woken by traffic.
    pub fn wait_for_input(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }

    /// Traffic counters.
    #[must_use]
    pub fn metrics(&self) -> TransportMetrics {
        self.metrics.lock().snapshot()
    }

    /// Messages waiting in the send queue.
    #[must_use]
    pub fn pending_outbound(&self) -> usize {
        self.send.lock().pairs.len()
    }

    /// Datagrams waiting in the receive queue, handled or not.
    #[must_use]
    pub fn pending_inbound(&self) -> usize {
        self.receive.lock().len()
    }

    /// Stops the receiver thread. Queued messages are discarded.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.receiver.lock().take() {
            let _ = handle.join();
        }
        debug!(local_addr = %self.local_addr, "network agent stopped");
    }

    fn flush_outbound(&self) {
        let mut send = self.send.lock();
        let SendState { pairs, frame, .. } = &mut *send;
        for pair in pairs.iter_mut() {
            let len = match pair.message.encode_into(&mut frame[..]) {
                Ok(len) => len,
                Err(error) => {
                    warn!(recipient = %pair.recipient, %error, "failed to frame message");
                    continue;
                }
            };
            match self.socket.send_to(&frame[..len], pair.recipient) {
                Ok(sent) => self.metrics.lock().record_upload(sent),
                Err(error) => trace!(recipient = %pair.recipient, %error, "send failed"),
            }
        }
        pairs.clear();
    }

    fn process_inbound(&self, state: &mut S) {
        let registry = Arc::clone(&self.registry.read());
        let mut next = 0;
        loop {
            if self.is_buffering() {
                return;
            }

            let decoded = {
                let mut receive = self.receive.lock();
                if next >= receive.len() {
                    receive.clear();
                    return;
                }
                let Some(slot) = receive.get_mut(next) else {
                    return;
                };
                next += 1;
                if slot.processed {
                    continue;
                }
                slot.processed = true;
                (slot.from, NetworkMessage::decode(slot.data()))
            };

            let (from, message) = match decoded {
                (from, Ok(message)) => (from, message),
                (from, Err(error)) => {
                    trace!(%from, %error, "dropped invalid datagram");
                    continue;
                }
            };
            if self.is_stale(from, message.index) {
                trace!(%from, index = message.index, "dropped stale message");
                continue;
            }

            let _ = registry.dispatch(state, self, from, &message);
        }
    }

    fn is_stale(&self, from: SocketAddr, index: i32) -> bool {
        if !self.discard_stale {
            return false;
        }
        let mut last_index = self.last_index.lock();
        let last = last_index.entry(from).or_insert(0);
        // Serial comparison: an index that wrapped past i32::MAX is still newer.
        if index.wrapping_sub(*last) < 0 {
            return true;
        }
        *last = index;
        false
    }
}

impl<S> MessageSink for NetworkAgent<S> {
    fn send_to(&self, recipient: SocketAddr, message: &NetworkMessage) -> NetResult<()> {
        let size = message.framed_len();
        if size > MAX_MESSAGE_SIZE {
            warn!(%recipient, size, "message too large, dropped");
            return Err(TransportError::MessageTooLarge {
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut send = self.send.lock();
        let SendState { pairs, next_index, .. } = &mut *send;
        let index = next_index.entry(recipient).or_insert(0);
        let pushed = pairs.push_with(|slot| {
            slot.recipient = recipient;
            slot.message.clone_from(message);
            slot.message.index = index.wrapping_add(1);
        });
        match pushed {
            Ok(()) => {
                *index = index.wrapping_add(1);
                Ok(())
            }
            Err(error) => {
                warn!(%recipient, %error, "send queue full, message dropped");
                Err(error.into())
            }
        }
    }

    fn flush(&self) {
        self.flush_outbound();
    }
}

impl<S> Drop for NetworkAgent<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Detached handle to an agent's `buffer_incoming` switch.
#[derive(Clone)]
pub struct IncomingSwitch {
    flag: Arc<AtomicBool>,
    wake_tx: Sender<()>,
}

impl IncomingSwitch {
    /// Pauses (`true`) or resumes (`false`) inbound processing.
    pub fn set(&self, buffer: bool) {
        self.flag.store(buffer, Ordering::Release);
        if !buffer {
            let _ = self.wake_tx.try_send(());
        }
    }
}

/// State moved onto the receiver thread.
struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    queue: Arc<Mutex<MessageQueue<InboundDatagram>>>,
    metrics: Arc<Mutex<MetricsTracker>>,
    wake_tx: Sender<()>,
    running: Arc<AtomicBool>,
    remote: Option<SocketAddr>,
}

impl ReceiveLoop {
    fn new(
        socket: Arc<UdpSocket>,
        queue: Arc<Mutex<MessageQueue<InboundDatagram>>>,
        metrics: Arc<Mutex<MetricsTracker>>,
        wake_tx: Sender<()>,
        running: Arc<AtomicBool>,
        remote: Option<SocketAddr>,
    ) -> Self {
        Self {
            socket,
            queue,
            metrics,
            wake_tx,
            running,
            remote,
        }
    }

    fn run(self) {
        // One spare byte tells an oversize datagram apart from a full one.
        let mut buffer = vec![0u8; MAX_MESSAGE_SIZE + 1];
        while self.running.load(Ordering::Acquire) {
            let (len, from) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(error) if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue;
                }
                Err(error) => {
                    trace!(%error, "receive failed");
                    continue;
                }
            };
            self.metrics.lock().record_download(len);

            if self.remote.is_some_and(|remote| remote != from) {
                trace!(%from, "ignored datagram from unknown endpoint");
                continue;
            }
            if len > MAX_MESSAGE_SIZE {
                trace!(%from, len, "dropped oversize datagram");
                continue;
            }

            let pushed = self.queue.lock().push_with(|slot| slot.fill(from, &buffer[..len]));
            if let Err(error) = pushed {
                warn!(%from, %error, "receive queue full, datagram dropped");
                continue;
            }
            let _ = self.wake_tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn config() -> TransportConfig {
        TransportConfig {
            queue_capacity: 8,
            ..TransportConfig::default()
        }
    }

    fn server() -> NetworkAgent<Vec<MessageType>> {
        NetworkAgent::start(AgentMode::Server { port: 0 }, &config()).unwrap()
    }

    fn client_of(server: &NetworkAgent<Vec<MessageType>>) -> NetworkAgent<Vec<MessageType>> {
        let remote = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));
        NetworkAgent::start(AgentMode::Client { remote }, &config()).unwrap()
    }

    fn record_kinds(agent: &NetworkAgent<Vec<MessageType>>) {
        for kind in [MessageType::GameStart, MessageType::GameSync, MessageType::AdvanceTime] {
            agent.register_function(kind, move |seen: &mut Vec<MessageType>, _, _, _| {
                seen.push(kind);
                Ok(())
            });
        }
    }

    fn pump_until(agent: &NetworkAgent<Vec<MessageType>>, seen: &mut Vec<MessageType>, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.len() < count && Instant::now() < deadline {
            agent.wait_for_input(Duration::from_millis(20));
            agent.pump(seen);
        }
    }

    #[test]
    fn test_messages_arrive_in_order() {
        let server = server();
        let client = client_of(&server);
        record_kinds(&server);

        let to = client.remote().unwrap();
        client.send_to(to, &NetworkMessage::new(MessageType::GameStart)).unwrap();
        client.send_to(to, &NetworkMessage::new(MessageType::GameSync)).unwrap();
        client.send_to(to, &NetworkMessage::new(MessageType::AdvanceTime)).unwrap();
        assert_eq!(client.pending_outbound(), 3);
        client.pump(&mut Vec::new());
        assert_eq!(client.pending_outbound(), 0);

        let mut seen = Vec::new();
        pump_until(&server, &mut seen, 3);
        assert_eq!(seen, vec![MessageType::GameStart, MessageType::GameSync, MessageType::AdvanceTime]);
        let sent = client.metrics().total;
        assert!(sent.bytes_up > 0);
        assert_eq!((sent.messages_up, sent.messages_down), (3, 0));
        assert_eq!(server.metrics().total.messages_down, 3);
    }

    #[test]
    fn test_send_queue_overflow_drops() {
        let server = server();
        let to = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));
        for _ in 0..8 {
            server.send_to(to, &NetworkMessage::new(MessageType::GameSync)).unwrap();
        }
        let overflow = server.send_to(to, &NetworkMessage::new(MessageType::GameSync));
        assert!(matches!(overflow, Err(TransportError::QueueFull(_))));
        assert_eq!(server.pending_outbound(), 8);
    }

    #[test]
    fn test_buffering_holds_messages() {
        let server = server();
        let client = client_of(&server);
        record_kinds(&server);

        server.buffer_incoming(true);
        client
            .send_to(client.remote().unwrap(), &NetworkMessage::new(MessageType::GameStart))
            .unwrap();
        client.pump(&mut Vec::new());

        let deadline = Instant::now() + Duration::from_secs(2);
        while server.pending_inbound() == 0 && Instant::now() < deadline {
            server.wait_for_input(Duration::from_millis(20));
        }
        let mut seen = Vec::new();
        server.pump(&mut seen);
        assert!(seen.is_empty());
        assert_eq!(server.pending_inbound(), 1);

        server.buffer_incoming(false);
        server.pump(&mut seen);
        assert_eq!(seen, vec![MessageType::GameStart]);
        assert_eq!(server.pending_inbound(), 0);
    }

    #[test]
    fn test_pausing_mid_pump_does_not_replay() {
        let server = server();
        let client = client_of(&server);
        let switch = server.incoming_switch();
        server.register_function(MessageType::GameStart, move |seen: &mut Vec<MessageType>, _, _, _| {
            seen.push(MessageType::GameStart);
            switch.set(true);
            Ok(())
        });
        server.register_function(MessageType::GameSync, |seen: &mut Vec<MessageType>, _, _, _| {
            seen.push(MessageType::GameSync);
            Ok(())
        });

        let to = client.remote().unwrap();
        client.send_to(to, &NetworkMessage::new(MessageType::GameStart)).unwrap();
        client.send_to(to, &NetworkMessage::new(MessageType::GameSync)).unwrap();
        client.pump(&mut Vec::new());

        let deadline = Instant::now() + Duration::from_secs(2);
        while server.pending_inbound() < 2 && Instant::now() < deadline {
            server.wait_for_input(Duration::from_millis(20));
        }

        let mut seen = Vec::new();
        server.pump(&mut seen);
        assert_eq!(seen, vec![MessageType::GameStart]);
        assert!(server.is_buffering());

        server.buffer_incoming(false);
        server.pump(&mut seen);
        assert_eq!(seen, vec![MessageType::GameStart, MessageType::GameSync]);
    }

    #[test]
    fn test_client_ignores_other_senders() {
        let host = server();
        let client = client_of(&host);
        record_kinds(&client);

        let stranger = server();
        stranger
            .send_to(
                SocketAddr::from(([127, 0, 0, 1], client.local_addr().port())),
                &NetworkMessage::new(MessageType::GameStart),
            )
            .unwrap();
        stranger.pump(&mut Vec::new());

        let mut seen = Vec::new();
        client.wait_for_input(Duration::from_millis(200));
        client.pump(&mut seen);
        assert!(seen.is_empty());
    }

    #[test]
    fn test_stale_messages_are_discarded() {
        let server = server();
        record_kinds(&server);
        let from = SocketAddr::from(([127, 0, 0, 1], 5555));

        for (index, kind) in [(2, MessageType::GameStart), (1, MessageType::GameSync), (3, MessageType::AdvanceTime)] {
            let mut message = NetworkMessage::new(kind);
            message.index = index;
            let bytes = message.to_bytes().unwrap();
            server
                .receive
                .lock()
                .push_with(|slot| slot.fill(from, &bytes))
                .unwrap();
        }

        let mut seen = Vec::new();
        server.pump(&mut seen);
        assert_eq!(seen, vec![MessageType::GameStart, MessageType::AdvanceTime]);
    }

    #[test]
    fn test_stale_check_survives_index_wraparound() {
        let server = server();
        record_kinds(&server);
        let from = SocketAddr::from(([127, 0, 0, 1], 5557));

        for (index, kind) in [
            (i32::MAX, MessageType::GameStart),
            (i32::MIN, MessageType::GameSync),
            (i32::MAX - 1, MessageType::AdvanceTime),
        ] {
            let mut message = NetworkMessage::new(kind);
            message.index = index;
            let bytes = message.to_bytes().unwrap();
            server.receive.lock().push_with(|slot| slot.fill(from, &bytes)).unwrap();
        }

        let mut seen = Vec::new();
        server.pump(&mut seen);
        assert_eq!(seen, vec![MessageType::GameStart, MessageType::GameSync]);
    }

    #[test]
    fn test_outbound_index_wraps() {
        let server = server();
        let to = SocketAddr::from(([127, 0, 0, 1], 5558));
        server.send.lock().next_index.insert(to, i32::MAX);
        server.send_to(to, &NetworkMessage::new(MessageType::GameSync)).unwrap();
        server.send_to(to, &NetworkMessage::new(MessageType::GameSync)).unwrap();

        let mut send = server.send.lock();
        let indices: Vec<i32> = send.pairs.iter_mut().map(|pair| pair.message.index).collect();
        assert_eq!(indices, vec![i32::MIN, i32::MIN + 1]);
    }

    #[test]
    fn test_invalid_datagrams_are_dropped() {
        let server = server();
        record_kinds(&server);
        let from = SocketAddr::from(([127, 0, 0, 1], 5556));
        let mut bytes = NetworkMessage::new(MessageType::GameStart).to_bytes().unwrap();
        bytes[10] ^= 0x04;
        server.receive.lock().push_with(|slot| slot.fill(from, &bytes)).unwrap();
        server.receive.lock().push_with(|slot| slot.fill(from, b"garbage")).unwrap();

        let mut seen = Vec::new();
        server.pump(&mut seen);
        assert!(seen.is_empty());
        assert_eq!(server.pending_inbound(), 0);
    }
}

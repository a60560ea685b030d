//! # Game Client
//!
//! The client side of a session: one agent talking to one server.
//!
//! ## Architecture
//!
//! ```text
//!  server ──► agent ──► ClientSession handlers ──► scene / lockstep clock
//!                                 │                        │
//!                                 ▼                        ▼
//!                        ClientEvent channel      gameplay functions
//! ```
//!
//! Requests go out through the helpers on [`GameClient`]; answers arrive as
//! [`ClientEvent`]s. Timed gameplay calls are released by the clock as
//! local game time advances, never beyond the server's last `AdvanceTime`.

mod session;

pub use session::{ClientEvent, ClientSession, GameplayFunction};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use serde::Serialize;
use tandem_shared::{GameState, MessageType, PlayerId};
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::NetResult;
use crate::protocol::payloads::{join_game_request, time_sync_hash, time_sync_hash_debug};
use crate::protocol::{GameplayMessage, NetworkMessage};
use crate::room::SceneFactory;
use crate::transport::{AgentMode, MessageSink, NetworkAgent, TransportMetrics};

/// Client connection to one server.
pub struct GameClient {
    agent: Arc<NetworkAgent<ClientSession>>,
    session: Mutex<ClientSession>,
    events: Receiver<ClientEvent>,
    server: SocketAddr,
    last_engine_time: Mutex<Option<u64>>,
    idle_wait: Duration,
    running: AtomicBool,
}

impl GameClient {
    /// Opens a client socket towards `server`. Nothing is sent until
    /// [`Self::connect`].
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError::Io`] if the socket cannot be bound.
    pub fn start(server: SocketAddr, config: &TransportConfig, scenes: SceneFactory) -> NetResult<Self> {
        let agent = NetworkAgent::start(AgentMode::Client { remote: server }, config)?;
        ClientSession::register(&agent);
        let (tx, events) = unbounded();
        debug!(%server, local = %agent.local_addr(), "client started");
        Ok(Self {
            agent: Arc::new(agent),
            session: Mutex::new(ClientSession::new(server, scenes, tx)),
            events,
            server,
            last_engine_time: Mutex::new(None),
            idle_wait: config.idle_wait(),
            running: AtomicBool::new(true),
        })
    }

    /// The transport agent.
    #[must_use]
    pub fn agent(&self) -> &Arc<NetworkAgent<ClientSession>> {
        &self.agent
    }

    /// Connection and room events, oldest first.
    #[must_use]
    pub fn events(&self) -> &Receiver<ClientEvent> {
        &self.events
    }

    /// Locks the session for inspection.
    ///
    /// Gameplay functions run under this lock and must not call back into the client.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut ClientSession) -> R) -> R {
        f(&mut self.session.lock())
    }

    /// Id assigned by the server.
    #[must_use]
    pub fn player_id(&self) -> Option<PlayerId> {
        self.session.lock().player_id()
    }

    /// Local mirror of the room's lifecycle.
    #[must_use]
    pub fn game_state(&self) -> GameState {
        self.session.lock().game_state()
    }

    /// Local lockstep time.
    #[must_use]
    pub fn game_time(&self) -> i32 {
        self.session.lock().clock().time()
    }

    /// Traffic counters.
    #[must_use]
    pub fn metrics(&self) -> TransportMetrics {
        self.agent.metrics()
    }

    /// Binds a gameplay function; see [`ClientSession::register_gameplay`].
    pub fn register_gameplay<T, F>(&self, method: impl Into<String>, function: F) -> bool
    where
        T: serde::de::DeserializeOwned,
        F: FnMut(i32, T) + Send + 'static,
    {
        self.session.lock().register_gameplay(method, function)
    }

    /// One step at engine time `engine_time_ms`: handle received messages,
    /// advance the lockstep clock by the elapsed time, then send.
    pub fn update(&self, engine_time_ms: u64) {
        let elapsed = {
            let mut last = self.last_engine_time.lock();
            let elapsed = last.map_or(0, |last| engine_time_ms.saturating_sub(last));
            *last = Some(engine_time_ms.max(last.unwrap_or(0)));
            elapsed
        };

        let mut session = self.session.lock();
        self.agent.pump(&mut session);
        session.advance_game_time(u32::try_from(elapsed).unwrap_or(u32::MAX));
        drop(session);
        self.agent.flush();
    }

    /// Advances the lockstep clock without pumping. Returns calls delivered.
    pub fn advance_game_time(&self, delta: u32) -> usize {
        self.session.lock().advance_game_time(delta)
    }

    /// Runs [`Self::update`] on a dedicated thread until [`Self::stop`].
    ///
    /// # Errors
    ///
    /// Propagates thread spawn failures.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let client = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("tandem-client-{}", self.agent.local_addr().port()))
            .spawn(move || {
                let epoch = Instant::now();
                while client.running.load(Ordering::Acquire) {
                    client.agent.wait_for_input(client.idle_wait);
                    let now = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                    client.update(now);
                }
            })
    }

    /// Stops the pump thread and closes the socket.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.agent.flush();
        self.agent.shutdown();
    }

    fn send(&self, message: &NetworkMessage) -> NetResult<()> {
        self.agent.send_to(self.server, message)
    }

    /// Starts the handshake.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn connect(&self) -> NetResult<()> {
        self.send(&NetworkMessage::new(MessageType::RequestConnect))
    }

    /// Creates a room with this client as host.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn host_room(&self) -> NetResult<()> {
        self.send(&NetworkMessage::new(MessageType::HostRoom))
    }

    /// Asks for the room list.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn request_rooms(&self) -> NetResult<()> {
        self.send(&NetworkMessage::new(MessageType::GetRooms))
    }

    /// Asks for this client's room description.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn request_room_info(&self) -> NetResult<()> {
        self.send(&NetworkMessage::new(MessageType::GetRoomInfo))
    }

    /// Asks to join `room_id`.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn join_room(&self, room_id: u32) -> NetResult<()> {
        self.send(&join_game_request(room_id))
    }

    /// Leaves the current room.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn leave_room(&self) -> NetResult<()> {
        self.send(&NetworkMessage::new(MessageType::LeaveRoom))
    }

    /// Sends a gameplay call to the room.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError::Frame`] if the call does not fit in a message.
    pub fn send_gameplay(&self, method: &str, metadata: &impl Serialize) -> NetResult<()> {
        let message = GameplayMessage::new(method, metadata)?.to_message()?;
        self.send(&message)
    }

    /// Reports the local state hash for game time `time`.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError`] if the message was dropped.
    pub fn send_time_sync_hash(&self, time: i32, hash: i32) -> NetResult<()> {
        self.send(&time_sync_hash(time, hash))
    }

    /// Like [`Self::send_time_sync_hash`] with a state dump the server logs on mismatch.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError::Frame`] if the dump does not fit.
    pub fn send_time_sync_hash_debug(&self, time: i32, hash: i32, dump: &str) -> NetResult<()> {
        self.send(&time_sync_hash_debug(time, hash, dump)?)
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.stop();
    }
}

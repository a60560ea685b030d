//! Client-side session state and its message handlers.

use std::collections::HashMap;
use std::net::SocketAddr;

use crossbeam_channel::Sender;
use serde::de::DeserializeOwned;
use tandem_shared::{DenyReason, GameState, MessageType, PlayerId, RoomSummary};
use tracing::{debug, info, trace, warn};

use crate::error::{DispatchError, FrameResult, SceneError};
use crate::protocol::payloads::{
    read_deny_reason, read_player_id, read_room_description, read_room_list, read_text, read_time,
};
use crate::protocol::{GameplayMessage, NetworkMessage, RoomDescription};
use crate::room::{NetworkScene, SceneFactory};
use crate::timesync::ClientGameClock;
use crate::transport::{MessageSink, NetworkAgent};

/// Something gameplay code may want to react to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake done; the server assigned this id.
    Connected(PlayerId),
    /// The server already knows this address.
    AlreadyConnected,
    /// Room list answer.
    RoomList(Vec<RoomSummary>),
    /// Room info answer.
    RoomInfo(RoomDescription),
    /// The request needed a room and there was none.
    NotInRoom,
    /// The requested room does not exist.
    RoomNotFound,
    /// Admitted to a room; the scene is loaded.
    Joined(RoomDescription),
    /// Admission refused.
    JoinDenied(DenyReason),
    /// Another player joined our room.
    PlayerJoined(RoomDescription),
    /// Initial scene state applied.
    InitialSync,
    /// The game is running.
    GameStarted,
}

/// Gameplay callback bound to a method name. Receives the game time the call
/// applies at and the call itself.
pub type GameplayFunction = Box<dyn FnMut(i32, &GameplayMessage) -> FrameResult<()> + Send>;

/// Everything the client's handlers read and write.
pub struct ClientSession {
    server: Option<SocketAddr>,
    player_id: Option<PlayerId>,
    room: Option<RoomDescription>,
    game_state: GameState,
    scenes: SceneFactory,
    scene: Option<Box<dyn NetworkScene>>,
    clock: ClientGameClock,
    gameplay: HashMap<String, GameplayFunction>,
    events: Sender<ClientEvent>,
}

impl ClientSession {
    /// Session talking to `server`, loading scenes from `scenes`.
    #[must_use]
    pub fn new(server: SocketAddr, scenes: SceneFactory, events: Sender<ClientEvent>) -> Self {
        Self {
            server: Some(server),
            player_id: None,
            room: None,
            game_state: GameState::NotRan,
            scenes,
            scene: None,
            clock: ClientGameClock::new(),
            gameplay: HashMap::new(),
            events,
        }
    }

    /// Binds every client-bound message type on `agent`.
    pub fn register(agent: &NetworkAgent<Self>) {
        agent.register_function(MessageType::Connected, Self::on_connected);
        agent.register_function(MessageType::ErrorAlreadyConnected, Self::on_already_connected);
        agent.register_function(MessageType::RoomList, Self::on_room_list);
        agent.register_function(MessageType::RoomInfo, Self::on_room_info);
        agent.register_function(MessageType::ErrorNotInRoom, Self::on_not_in_room);
        agent.register_function(MessageType::ErrorRoomNotFound, Self::on_room_not_found);
        agent.register_function(MessageType::JoinGameDenied, Self::on_join_denied);
        agent.register_function(MessageType::JoinGameSuccess, Self::on_join_success);
        agent.register_function(MessageType::PlayerJoinedRoom, Self::on_player_joined);
        agent.register_function(MessageType::GameInitialSync, Self::on_initial_sync);
        agent.register_function(MessageType::GameStart, Self::on_game_start);
        agent.register_function(MessageType::GameSync, Self::on_game_sync);
        agent.register_function(MessageType::GenericGameplay, Self::on_gameplay);
        agent.register_function(MessageType::GenericGameplayWithTime, Self::on_timed_gameplay);
        agent.register_function(MessageType::AdvanceTime, Self::on_advance_time);
    }

    /// Server endpoint while in a room or lobby; cleared on `JoinGameDenied`.
    #[must_use]
    pub const fn server(&self) -> Option<SocketAddr> {
        self.server
    }

    /// Id assigned at connect.
    #[must_use]
    pub const fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    /// Room joined, as last described by the server.
    #[must_use]
    pub const fn room(&self) -> Option<&RoomDescription> {
        self.room.as_ref()
    }

    /// Local mirror of the room's lifecycle.
    #[must_use]
    pub const fn game_state(&self) -> GameState {
        self.game_state
    }

    /// Local scene, once loaded.
    #[must_use]
    pub fn scene(&self) -> Option<&dyn NetworkScene> {
        self.scene.as_deref()
    }

    /// The lockstep clock.
    #[must_use]
    pub const fn clock(&self) -> &ClientGameClock {
        &self.clock
    }

    /// Binds `function` to gameplay calls named `method`, decoding their
    /// metadata as `T`. Returns false if the method is taken.
    ///
    /// `function` gets the call's game time: the slice stamp for timed calls,
    /// the local clock for immediate ones.
    pub fn register_gameplay<T, F>(&mut self, method: impl Into<String>, mut function: F) -> bool
    where
        T: DeserializeOwned,
        F: FnMut(i32, T) + Send + 'static,
    {
        let method = method.into();
        if self.gameplay.contains_key(&method) {
            return false;
        }
        let wrapped: GameplayFunction = Box::new(move |time: i32, call: &GameplayMessage| {
            function(time, call.metadata_as::<T>()?);
            Ok(())
        });
        self.gameplay.insert(method, wrapped);
        true
    }

    /// Advances the lockstep clock and runs every call that came due.
    ///
    /// Returns the number of calls delivered.
    pub fn advance_game_time(&mut self, delta: u32) -> usize {
        let released = self.clock.advance(delta);
        let count = released.len();
        for timed in released {
            self.deliver(timed.time, &timed.call);
        }
        count
    }

    fn deliver(&mut self, time: i32, call: &GameplayMessage) {
        let Some(function) = self.gameplay.get_mut(&call.method) else {
            warn!(method = %call.method, "no gameplay function registered");
            return;
        };
        if let Err(error) = function(time, call) {
            warn!(method = %call.method, %error, "gameplay function failed");
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.try_send(event).is_err() {
            trace!("client event dropped, nobody listening");
        }
    }

    fn is_server(&self, from: SocketAddr) -> bool {
        self.server.is_some_and(|server| server == from)
    }

    fn apply_scene_state(&mut self, message: &NetworkMessage) -> Result<(), DispatchError> {
        let state = read_text(message)?;
        let scene = self.scene.as_mut().ok_or(SceneError::NotLoaded);
        scene
            .and_then(|scene| scene.apply_state(state))
            .map_err(|error| DispatchError::HandlerFailed {
                message_type: message.message_type(),
                reason: error.to_string(),
            })
    }

    fn on_connected(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let id = read_player_id(message)?;
        self.player_id = Some(id);
        info!(player = %id, "connected");
        self.emit(ClientEvent::Connected(id));
        Ok(())
    }

    fn on_already_connected(
        &mut self,
        _sink: &dyn MessageSink,
        _from: SocketAddr,
        _message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        self.emit(ClientEvent::AlreadyConnected);
        Ok(())
    }

    fn on_room_list(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        self.emit(ClientEvent::RoomList(read_room_list(message)?));
        Ok(())
    }

    fn on_room_info(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let description = read_room_description(message)?;
        if self.room.is_some() {
            self.room = Some(description.clone());
        }
        self.emit(ClientEvent::RoomInfo(description));
        Ok(())
    }

    fn on_not_in_room(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, _message: &NetworkMessage) -> Result<(), DispatchError> {
        self.emit(ClientEvent::NotInRoom);
        Ok(())
    }

    fn on_room_not_found(
        &mut self,
        _sink: &dyn MessageSink,
        _from: SocketAddr,
        _message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        self.emit(ClientEvent::RoomNotFound);
        Ok(())
    }

    fn on_join_denied(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let reason = read_deny_reason(message)?;
        debug!(?reason, "join denied");
        self.server = None;
        self.room = None;
        self.scene = None;
        self.game_state = GameState::NotRan;
        self.emit(ClientEvent::JoinDenied(reason));
        Ok(())
    }

    fn on_join_success(&mut self, sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let description = read_room_description(message)?;
        self.server = Some(from);
        self.scene = Some((self.scenes)());
        self.clock = ClientGameClock::new();
        self.game_state = GameState::Waiting;
        self.room = Some(description.clone());
        info!(room = description.summary.room_id, "joined room");
        let _ = sink.send_to(from, &NetworkMessage::new(MessageType::ClientSceneReady));
        self.emit(ClientEvent::Joined(description));
        Ok(())
    }

    fn on_player_joined(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let description = read_room_description(message)?;
        self.room = Some(description.clone());
        self.emit(ClientEvent::PlayerJoined(description));
        Ok(())
    }

    fn on_initial_sync(&mut self, sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        if !self.is_server(from) {
            return Ok(());
        }
        self.apply_scene_state(message)?;
        self.game_state = GameState::InitialSync;
        let _ = sink.send_to(from, &NetworkMessage::new(MessageType::GameInitialSyncReady));
        self.emit(ClientEvent::InitialSync);
        Ok(())
    }

    fn on_game_start(&mut self, _sink: &dyn MessageSink, from: SocketAddr, _message: &NetworkMessage) -> Result<(), DispatchError> {
        if !self.is_server(from) {
            return Ok(());
        }
        if let Some(scene) = self.scene.as_mut() {
            scene.set_running(true);
        }
        self.game_state = GameState::Running;
        info!("game started");
        self.emit(ClientEvent::GameStarted);
        Ok(())
    }

    fn on_game_sync(&mut self, _sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        if !self.is_server(from) {
            return Ok(());
        }
        self.apply_scene_state(message)
    }

    fn on_gameplay(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let call = GameplayMessage::from_message(message)?;
        self.deliver(self.clock.time(), &call);
        Ok(())
    }

    fn on_timed_gameplay(
        &mut self,
        _sink: &dyn MessageSink,
        _from: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        let (time, call) = GameplayMessage::from_timed_message(message)?;
        self.clock.enqueue(time, call);
        Ok(())
    }

    fn on_advance_time(&mut self, _sink: &dyn MessageSink, _from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        self.clock.set_advance_limit(read_time(message)?);
        Ok(())
    }
}

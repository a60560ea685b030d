//! # Lobby
//!
//! Connected users and the room directory. Every server-bound message type
//! is handled here; the host registers [`Lobby::register`] once on its agent.
//!
//! A user is keyed by socket address. `RequestConnect` is the only message
//! accepted from an address the lobby has not seen.
//!
//! A user plays in at most one room. Hosting or joining another room leaves
//! the current one first, so `JoinGameDenied` only ever reaches users that
//! are not on the roster they asked for.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tandem_shared::{GameState, MessageType, PlayerId, RoomSummary};
use tracing::{debug, info, trace, warn};

use crate::config::{NetConfig, RoomConfig};
use crate::error::DispatchError;
use crate::protocol::payloads::{connected, read_room_id, read_time_sync_hash, room_list};
use crate::protocol::{GameplayMessage, NetworkMessage};
use crate::room::{spawn_game_loop, RoomRules, ServerRoom, TickStats};
use crate::timesync::{RoutineScheduler, TimeSyncRoutine};
use crate::transport::{MessageSink, NetworkAgent};

/// Builds the rules of each new room.
pub type RulesFactory = Arc<dyn Fn(&RoomConfig) -> Box<dyn RoomRules> + Send + Sync>;

/// A connected user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LobbyUser {
    /// Assigned id.
    pub id: PlayerId,
    /// Sender address the user is known by.
    pub addr: SocketAddr,
    /// Room the user is playing in.
    pub room: Option<u32>,
}

/// Server-side session state handed to every handler.
pub struct Lobby {
    config: NetConfig,
    rules: RulesFactory,
    users: HashMap<SocketAddr, LobbyUser>,
    rooms: BTreeMap<u32, Arc<Mutex<ServerRoom>>>,
    games: HashMap<u32, JoinHandle<TickStats>>,
    scheduler: RoutineScheduler<dyn MessageSink>,
    rng: StdRng,
    next_room_id: u32,
    next_generation: u64,
}

impl Lobby {
    /// Empty lobby. `seed` drives player id generation.
    #[must_use]
    pub fn new(config: NetConfig, rules: RulesFactory, seed: u64) -> Self {
        Self {
            config,
            rules,
            users: HashMap::new(),
            rooms: BTreeMap::new(),
            games: HashMap::new(),
            scheduler: RoutineScheduler::new(),
            rng: StdRng::seed_from_u64(seed),
            next_room_id: 1,
            next_generation: 1,
        }
    }

    /// Binds every server-bound message type on `agent`.
    pub fn register(agent: &NetworkAgent<Self>) {
        agent.register_function(MessageType::RequestConnect, Self::on_request_connect);
        agent.register_function(MessageType::HostRoom, Self::on_host_room);
        agent.register_function(MessageType::GetRooms, Self::on_get_rooms);
        agent.register_function(MessageType::GetRoomInfo, Self::on_get_room_info);
        agent.register_function(MessageType::JoinGameRequest, Self::on_join_game_request);
        agent.register_function(MessageType::LeaveRoom, Self::on_leave_room);
        agent.register_function(MessageType::ClientSceneReady, Self::on_client_scene_ready);
        agent.register_function(MessageType::GameInitialSyncReady, Self::on_initial_sync_ready);
        agent.register_function(MessageType::GenericGameplay, Self::on_gameplay);
        agent.register_function(MessageType::TimeSyncHash, Self::on_time_sync_hash);
        agent.register_function(MessageType::TimeSyncHashDebug, Self::on_time_sync_hash);
    }

    /// Connected users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// User known by `addr`.
    #[must_use]
    pub fn user(&self, addr: SocketAddr) -> Option<&LobbyUser> {
        self.users.get(&addr)
    }

    /// Rooms in the directory.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room by id.
    #[must_use]
    pub fn room(&self, id: u32) -> Option<Arc<Mutex<ServerRoom>>> {
        self.rooms.get(&id).cloned()
    }

    /// Up to `max_rooms` active rooms, oldest first.
    #[must_use]
    pub fn room_summaries(&self) -> Vec<RoomSummary> {
        self.rooms
            .values()
            .filter_map(|room| {
                let room = room.lock();
                room.is_active().then(|| room.summary())
            })
            .take(self.config.room.max_rooms)
            .collect()
    }

    /// Live routines, one per time-synced room.
    #[must_use]
    pub fn routine_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Time until the next time-sync slice is due.
    #[must_use]
    pub fn next_due_in(&self) -> Option<u64> {
        self.scheduler.next_due_in()
    }

    /// Advances room lifecycles and time sync by `elapsed` milliseconds.
    ///
    /// Rooms that reach `Running` get their game loop; ended rooms leave the
    /// directory and their members return to the lobby.
    pub fn update(&mut self, elapsed: u64, sink: &Arc<dyn MessageSink>) {
        let mut ended = Vec::new();
        for (&id, room) in &self.rooms {
            let mut guard = room.lock();
            if guard.advance_lifecycle(sink.as_ref()) == Some(GameState::Running) {
                drop(guard);
                match spawn_game_loop(Arc::clone(room), Arc::clone(sink)) {
                    Ok(handle) => {
                        self.games.insert(id, handle);
                    }
                    Err(error) => {
                        warn!(room = id, %error, "failed to start game loop");
                        room.lock().stop();
                    }
                }
                continue;
            }
            if guard.state() == GameState::Ended {
                ended.push(id);
            }
        }

        for id in ended {
            self.rooms.remove(&id);
            for user in self.users.values_mut().filter(|u| u.room == Some(id)) {
                user.room = None;
            }
            info!(room = id, "room removed");
        }
        self.reap_games(false);

        self.scheduler.advance(elapsed, sink.as_ref());
    }

    /// Ends every room and waits for their game loops.
    pub fn shutdown(&mut self) {
        for room in self.rooms.values() {
            room.lock().stop();
        }
        self.reap_games(true);
        self.rooms.clear();
    }

    fn reap_games(&mut self, wait: bool) {
        let done: Vec<u32> = self
            .games
            .iter()
            .filter(|(_, handle)| wait || handle.is_finished())
            .map(|(&id, _)| id)
            .collect();
        for id in done {
            let Some(handle) = self.games.remove(&id) else {
                continue;
            };
            match handle.join() {
                Ok(stats) => debug!(room = id, ticks = stats.total_ticks, late = stats.late_ticks, "game loop joined"),
                Err(_) => warn!(room = id, "game loop panicked"),
            }
        }
    }

    fn generate_player_id(&mut self) -> PlayerId {
        loop {
            let id = PlayerId(self.rng.gen_range(1..=u32::MAX));
            if !self.users.values().any(|u| u.id == id) {
                return id;
            }
        }
    }

    /// The sender's user and room, if it is in one.
    fn member(&self, from: SocketAddr) -> Option<(PlayerId, Arc<Mutex<ServerRoom>>)> {
        let user = self.users.get(&from)?;
        let room = self.rooms.get(&user.room?)?;
        Some((user.id, Arc::clone(room)))
    }

    /// Takes the sender out of its room; the room ends once nobody is left.
    fn leave_current_room(&mut self, from: SocketAddr) {
        if let Some((id, room)) = self.member(from) {
            let mut room = room.lock();
            room.disconnect(id);
            debug!(room = room.id(), player = %id, "left room");
        }
        if let Some(user) = self.users.get_mut(&from) {
            user.room = None;
        }
    }

    fn known(&self, from: SocketAddr, message: &NetworkMessage) -> Option<LobbyUser> {
        let user = self.users.get(&from).copied();
        if user.is_none() {
            trace!(%from, kind = ?message.kind(), "message from unknown sender dropped");
        }
        user
    }

    fn on_request_connect(
        &mut self,
        sink: &dyn MessageSink,
        from: SocketAddr,
        _message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        if self.users.contains_key(&from) {
            let _ = sink.send_to(from, &NetworkMessage::new(MessageType::ErrorAlreadyConnected));
            return Ok(());
        }
        let id = self.generate_player_id();
        self.users.insert(from, LobbyUser { id, addr: from, room: None });
        info!(%from, player = %id, users = self.users.len(), "user connected");
        let _ = sink.send_to(from, &connected(id));
        Ok(())
    }

    fn on_host_room(&mut self, sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let Some(user) = self.known(from, message) else {
            return Ok(());
        };
        self.leave_current_room(from);

        let id = self.next_room_id;
        self.next_room_id += 1;
        let mut room = ServerRoom::new(id, user.id, (self.rules)(&self.config.room));
        room.open();
        let generation = self.config.room.time_synced.then(|| {
            let generation = self.next_generation;
            self.next_generation += 1;
            room.attach_time_sync(generation, self.config.time_sync.advance_per_tick);
            generation
        });
        let admitted = room.add_player(user.id, from, sink).is_ok();

        let room = Arc::new(Mutex::new(room));
        if let Some(generation) = generation {
            self.scheduler.start(Box::new(TimeSyncRoutine::new(Arc::clone(&room), generation)));
        }
        self.rooms.insert(id, room);
        if admitted {
            if let Some(user) = self.users.get_mut(&from) {
                user.room = Some(id);
            }
        }
        info!(room = id, host = %user.id, time_synced = generation.is_some(), "room created");
        Ok(())
    }

    fn on_get_rooms(&mut self, sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        if self.known(from, message).is_none() {
            return Ok(());
        }
        let _ = sink.send_to(from, &room_list(&self.room_summaries()));
        Ok(())
    }

    fn on_get_room_info(
        &mut self,
        sink: &dyn MessageSink,
        from: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        if self.known(from, message).is_none() {
            return Ok(());
        }
        let Some((_, room)) = self.member(from) else {
            let _ = sink.send_to(from, &NetworkMessage::new(MessageType::ErrorNotInRoom));
            return Ok(());
        };
        let info = room.lock().description(MessageType::RoomInfo)?;
        let _ = sink.send_to(from, &info);
        Ok(())
    }

    fn on_join_game_request(
        &mut self,
        sink: &dyn MessageSink,
        from: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        let Some(user) = self.known(from, message) else {
            return Ok(());
        };
        let room_id = read_room_id(message)?;
        let Some(room) = self.rooms.get(&room_id).cloned() else {
            let _ = sink.send_to(from, &NetworkMessage::new(MessageType::ErrorRoomNotFound));
            return Ok(());
        };
        if user.room == Some(room_id) {
            let info = room.lock().description(MessageType::RoomInfo)?;
            let _ = sink.send_to(from, &info);
            return Ok(());
        }
        self.leave_current_room(from);

        let mut room = room.lock();
        if room.add_player(user.id, from, sink).is_err() {
            return Ok(());
        }
        if let Some(user) = self.users.get_mut(&from) {
            user.room = Some(room_id);
        }
        let joined = room.description(MessageType::PlayerJoinedRoom)?;
        room.broadcast_except(sink, &joined, user.id);
        Ok(())
    }

    fn on_leave_room(&mut self, _sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        if self.known(from, message).is_none() {
            return Ok(());
        }
        self.leave_current_room(from);
        Ok(())
    }

    fn on_client_scene_ready(
        &mut self,
        _sink: &dyn MessageSink,
        from: SocketAddr,
        _message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        if let Some((id, room)) = self.member(from) {
            room.lock().mark_scene_ready(id);
        }
        Ok(())
    }

    fn on_initial_sync_ready(
        &mut self,
        _sink: &dyn MessageSink,
        from: SocketAddr,
        _message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        if let Some((id, room)) = self.member(from) {
            room.lock().mark_initial_sync_ready(id);
        }
        Ok(())
    }

    fn on_gameplay(&mut self, sink: &dyn MessageSink, from: SocketAddr, message: &NetworkMessage) -> Result<(), DispatchError> {
        let Some((id, room)) = self.member(from) else {
            trace!(%from, "gameplay outside a room dropped");
            return Ok(());
        };
        let call = GameplayMessage::from_message(message)?;
        room.lock().submit_gameplay(id, call, sink)?;
        Ok(())
    }

    fn on_time_sync_hash(
        &mut self,
        _sink: &dyn MessageSink,
        from: SocketAddr,
        message: &NetworkMessage,
    ) -> Result<(), DispatchError> {
        let Some((id, room)) = self.member(from) else {
            trace!(%from, "hash report outside a room dropped");
            return Ok(());
        };
        let (report, dump) = read_time_sync_hash(message)?;
        room.lock().submit_hash(id, report, dump);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payloads::{join_game_request, read_player_id, read_room_description, read_room_list};
    use crate::room::DefaultRules;
    use crate::transport::RecordingSink;

    fn lobby(time_synced: bool) -> Lobby {
        let mut config = NetConfig::default();
        config.room.time_synced = time_synced;
        config.room.max_rooms = 2;
        Lobby::new(config, Arc::new(|room: &RoomConfig| Box::new(DefaultRules::relay(room)) as Box<dyn RoomRules>), 7)
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn connect(lobby: &mut Lobby, sink: &RecordingSink, port: u16) -> PlayerId {
        lobby
            .on_request_connect(sink, addr(port), &NetworkMessage::new(MessageType::RequestConnect))
            .unwrap();
        let (_, reply) = sink.take().pop().unwrap();
        read_player_id(&reply).unwrap()
    }

    fn host(lobby: &mut Lobby, sink: &RecordingSink, port: u16) {
        lobby.on_host_room(sink, addr(port), &NetworkMessage::new(MessageType::HostRoom)).unwrap();
    }

    #[test]
    fn test_connect_assigns_distinct_ids() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        let a = connect(&mut lobby, &sink, 8001);
        let b = connect(&mut lobby, &sink, 8002);
        assert!(a.is_valid() && b.is_valid());
        assert_ne!(a, b);

        lobby
            .on_request_connect(&sink, addr(8001), &NetworkMessage::new(MessageType::RequestConnect))
            .unwrap();
        assert_eq!(sink.sent_types(), vec![(addr(8001), MessageType::ErrorAlreadyConnected)]);
        assert_eq!(lobby.user_count(), 2);
    }

    #[test]
    fn test_unknown_sender_is_ignored() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        host(&mut lobby, &sink, 8001);
        lobby.on_get_rooms(&sink, addr(8001), &NetworkMessage::new(MessageType::GetRooms)).unwrap();
        assert!(sink.sent().is_empty());
        assert_eq!(lobby.room_count(), 0);
    }

    #[test]
    fn test_host_join_and_directory() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        let host_id = connect(&mut lobby, &sink, 8001);
        let guest_id = connect(&mut lobby, &sink, 8002);

        host(&mut lobby, &sink, 8001);
        let (to, reply) = sink.take().pop().unwrap();
        assert_eq!(to, addr(8001));
        let description = read_room_description(&reply).unwrap();
        assert_eq!(reply.kind(), Some(MessageType::JoinGameSuccess));
        assert_eq!(description.summary.host_id, host_id.0);
        let room_id = description.summary.room_id;

        lobby.on_join_game_request(&sink, addr(8002), &join_game_request(room_id)).unwrap();
        assert_eq!(
            sink.sent_types(),
            vec![(addr(8002), MessageType::JoinGameSuccess), (addr(8001), MessageType::PlayerJoinedRoom)]
        );
        let joined = read_room_description(&sink.take()[1].1).unwrap();
        assert_eq!(joined.players, vec![host_id, guest_id]);

        lobby.on_get_rooms(&sink, addr(8002), &NetworkMessage::new(MessageType::GetRooms)).unwrap();
        let rooms = read_room_list(&sink.take()[0].1).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].player_count, 2);

        lobby.on_join_game_request(&sink, addr(8002), &join_game_request(99)).unwrap();
        assert_eq!(sink.sent_types(), vec![(addr(8002), MessageType::ErrorRoomNotFound)]);
    }

    #[test]
    fn test_hosting_again_leaves_previous_room() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        let id = connect(&mut lobby, &sink, 8001);
        host(&mut lobby, &sink, 8001);
        sink.take();

        host(&mut lobby, &sink, 8001);
        assert_eq!(sink.sent_types(), vec![(addr(8001), MessageType::JoinGameSuccess)]);
        assert_eq!(lobby.user(addr(8001)).unwrap().room, Some(2));
        assert_eq!(lobby.room(1).unwrap().lock().state(), GameState::Ended);
        assert_eq!(lobby.room(2).unwrap().lock().player_ids(), vec![id]);

        let sink: Arc<dyn MessageSink> = Arc::new(RecordingSink::default());
        lobby.update(0, &sink);
        assert_eq!(lobby.room_count(), 1);
    }

    #[test]
    fn test_join_moves_member_between_rooms() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        let mover = connect(&mut lobby, &sink, 8001);
        connect(&mut lobby, &sink, 8002);
        connect(&mut lobby, &sink, 8003);
        host(&mut lobby, &sink, 8001);
        host(&mut lobby, &sink, 8002);
        lobby.on_join_game_request(&sink, addr(8003), &join_game_request(1)).unwrap();
        sink.take();

        lobby.on_join_game_request(&sink, addr(8001), &join_game_request(2)).unwrap();
        assert_eq!(
            sink.sent_types(),
            vec![(addr(8001), MessageType::JoinGameSuccess), (addr(8002), MessageType::PlayerJoinedRoom)]
        );
        let old = lobby.room(1).unwrap();
        assert_eq!(old.lock().state(), GameState::Waiting);
        assert!(!old.lock().player(mover).unwrap().is_connected());
        assert_eq!(lobby.user(addr(8001)).unwrap().room, Some(2));

        // Asking for the room it already plays in is answered, never denied.
        sink.take();
        lobby.on_join_game_request(&sink, addr(8001), &join_game_request(2)).unwrap();
        assert_eq!(sink.sent_types(), vec![(addr(8001), MessageType::RoomInfo)]);
        assert!(lobby.room(2).unwrap().lock().player(mover).unwrap().is_connected());
    }

    #[test]
    fn test_room_info_requires_membership() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        connect(&mut lobby, &sink, 8001);
        lobby.on_get_room_info(&sink, addr(8001), &NetworkMessage::new(MessageType::GetRoomInfo)).unwrap();
        assert_eq!(sink.sent_types(), vec![(addr(8001), MessageType::ErrorNotInRoom)]);

        sink.take();
        host(&mut lobby, &sink, 8001);
        sink.take();
        lobby.on_get_room_info(&sink, addr(8001), &NetworkMessage::new(MessageType::GetRoomInfo)).unwrap();
        assert_eq!(sink.sent_types(), vec![(addr(8001), MessageType::RoomInfo)]);
    }

    #[test]
    fn test_room_list_is_capped() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(false);
        for port in 8001..8005 {
            connect(&mut lobby, &sink, port);
            host(&mut lobby, &sink, port);
        }
        assert_eq!(lobby.room_count(), 4);
        assert_eq!(lobby.room_summaries().len(), 2);
    }

    #[test]
    fn test_last_leave_removes_room() {
        let sink: Arc<dyn MessageSink> = Arc::new(RecordingSink::default());
        let mut lobby = lobby(true);
        let recorder = RecordingSink::default();
        connect(&mut lobby, &recorder, 8001);
        host(&mut lobby, &recorder, 8001);
        assert_eq!(lobby.routine_count(), 1);

        lobby.on_leave_room(&recorder, addr(8001), &NetworkMessage::new(MessageType::LeaveRoom)).unwrap();
        assert_eq!(lobby.user(addr(8001)).unwrap().room, None);
        lobby.update(20, &sink);

        assert_eq!(lobby.room_count(), 0);
        assert_eq!(lobby.routine_count(), 0);
    }

    #[test]
    fn test_time_synced_room_buffers_gameplay() {
        let sink = RecordingSink::default();
        let mut lobby = lobby(true);
        connect(&mut lobby, &sink, 8001);
        host(&mut lobby, &sink, 8001);
        sink.take();

        let call = GameplayMessage::new("move", &(1, 2)).unwrap().to_message().unwrap();
        lobby.on_gameplay(&sink, addr(8001), &call).unwrap();
        assert!(sink.sent().is_empty());

        let room = lobby.room(1).unwrap();
        assert_eq!(room.lock().time_sync().unwrap().pending_messages().len(), 1);
    }
}

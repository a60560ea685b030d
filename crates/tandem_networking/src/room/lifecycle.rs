//! # Server Room
//!
//! One game session and its roster.
//!
//! ```text
//!  NotRan ──open──► Waiting ──all Initialized && GameShouldStart──► InitialSync
//!                                                                      │
//!                      Ended ◄──stop── Running ◄──────all Ready────────┘
//! ```
//!
//! Disconnected players stay in the roster and are skipped by broadcasts.
//! The room sits behind a lock shared by the pump thread and its game loop.

use std::net::SocketAddr;
use std::time::Duration;

use tandem_shared::{DenyReason, GameState, MessageType, NetworkActorHandle, PlayerId, RoomSummary, TimeSyncHashPayload};
use tracing::{debug, info, trace, warn};

use super::player::{PlayerState, RoomPlayer};
use super::scene::{NetworkScene, RoomRules};
use crate::error::FrameResult;
use crate::protocol::payloads::{join_denied, room_description, text_message};
use crate::protocol::{GameplayMessage, NetworkMessage};
use crate::timesync::{SliceReport, TimeSyncedServerRoom};
use crate::transport::MessageSink;

/// A game room on the server.
pub struct ServerRoom {
    id: u32,
    host: PlayerId,
    state: GameState,
    players: Vec<RoomPlayer>,
    rules: Box<dyn RoomRules>,
    scene: Option<Box<dyn NetworkScene>>,
    time_sync: Option<TimeSyncedServerRoom>,
    ticks: u64,
}

impl ServerRoom {
    /// A room that has not opened yet.
    #[must_use]
    pub fn new(id: u32, host: PlayerId, rules: Box<dyn RoomRules>) -> Self {
        Self {
            id,
            host,
            state: GameState::NotRan,
            players: Vec::new(),
            rules,
            scene: None,
            time_sync: None,
            ticks: 0,
        }
    }

    /// Starts accepting players.
    pub fn open(&mut self) {
        if self.state == GameState::NotRan {
            self.state = GameState::Waiting;
            debug!(room = self.id, "room waiting for players");
        }
    }

    /// Room id.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Host player.
    #[must_use]
    pub const fn host(&self) -> PlayerId {
        self.host
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> GameState {
        self.state
    }

    /// Returns true between opening and ending.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(
            self.state,
            GameState::Waiting | GameState::InitialSync | GameState::Running
        )
    }

    /// Roster in join order, disconnected players included.
    #[must_use]
    pub fn players(&self) -> &[RoomPlayer] {
        &self.players
    }

    /// Roster entry for `id`.
    #[must_use]
    pub fn player(&self, id: PlayerId) -> Option<&RoomPlayer> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Players that have not disconnected.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_connected()).count()
    }

    /// Running ticks executed.
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Interval of the running game loop.
    #[must_use]
    pub fn time_between_ticks(&self) -> Duration {
        self.rules.time_between_ticks()
    }

    /// The server's scene, once the initial sync built it.
    #[must_use]
    pub fn scene(&self) -> Option<&dyn NetworkScene> {
        self.scene.as_deref()
    }

    /// Fixed-layout description.
    #[must_use]
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.id,
            host_id: self.host.0,
            player_count: u32::try_from(self.players.len()).unwrap_or(u32::MAX),
            max_players: u32::try_from(self.rules.max_players()).unwrap_or(u32::MAX),
            game_state: self.state as u32,
        }
    }

    /// Member ids in join order.
    #[must_use]
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.iter().map(|p| p.id).collect()
    }

    /// Room description message of the given type.
    ///
    /// # Errors
    ///
    /// [`crate::error::FrameError::ContentTooLarge`] for an absurdly large roster.
    pub fn description(&self, message_type: MessageType) -> FrameResult<NetworkMessage> {
        room_description(message_type, &self.summary(), &self.player_ids())
    }

    /// Admits a player and answers `JoinGameSuccess`, or answers
    /// `JoinGameDenied` and leaves the roster untouched.
    ///
    /// # Errors
    ///
    /// The [`DenyReason`] that was sent.
    pub fn add_player(&mut self, id: PlayerId, addr: SocketAddr, sink: &dyn MessageSink) -> Result<(), DenyReason> {
        let handle = NetworkActorHandle::player(id);
        let verdict = if self.state != GameState::Waiting {
            Err(DenyReason::NotWaiting)
        } else if self.players.iter().any(|p| p.handle == handle) {
            Err(DenyReason::AlreadyJoined)
        } else if !self.rules.can_add_player(&self.players, &handle) {
            Err(DenyReason::Refused)
        } else {
            Ok(())
        };

        if let Err(reason) = verdict {
            debug!(room = self.id, player = %id, ?reason, "join denied");
            let _ = sink.send_to(addr, &join_denied(reason));
            return Err(reason);
        }

        self.players.push(RoomPlayer::joined(id, addr));
        info!(room = self.id, player = %id, players = self.players.len(), "player joined");
        match self.description(MessageType::JoinGameSuccess) {
            Ok(message) => {
                let _ = sink.send_to(addr, &message);
            }
            Err(error) => warn!(room = self.id, %error, "failed to describe room"),
        }
        Ok(())
    }

    /// `ClientSceneReady`: `Joined` becomes `Initialized`.
    pub fn mark_scene_ready(&mut self, id: PlayerId) -> bool {
        self.promote(id, PlayerState::Joined, PlayerState::Initialized)
    }

    /// `GameInitialSyncReady`: `Initialized` becomes `Ready`.
    pub fn mark_initial_sync_ready(&mut self, id: PlayerId) -> bool {
        if self.state != GameState::InitialSync {
            return false;
        }
        self.promote(id, PlayerState::Initialized, PlayerState::Ready)
    }

    fn promote(&mut self, id: PlayerId, from: PlayerState, to: PlayerState) -> bool {
        let Some(player) = self.players.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if player.state != from {
            trace!(room = self.id, player = %id, state = ?player.state, "ignored out-of-order readiness");
            return false;
        }
        player.state = to;
        debug!(room = self.id, player = %id, state = ?to, "player advanced");
        true
    }

    /// Marks a player `Disconnected`. The room ends once nobody is left.
    pub fn disconnect(&mut self, id: PlayerId) -> bool {
        let Some(player) = self.players.iter_mut().find(|p| p.id == id && p.is_connected()) else {
            return false;
        };
        player.state = PlayerState::Disconnected;
        info!(room = self.id, player = %id, "player disconnected");
        let connected = self.connected_count();
        if let Some(sync) = self.time_sync.as_mut() {
            sync.player_left(connected);
        }
        if connected == 0 {
            self.stop();
        }
        true
    }

    /// Checks the `Waiting` and `InitialSync` exit conditions.
    ///
    /// Returns the new state if one was entered.
    pub fn advance_lifecycle(&mut self, sink: &dyn MessageSink) -> Option<GameState> {
        match self.state {
            GameState::Waiting if self.all_connected_in(PlayerState::Initialized) => {
                if !self.rules.game_should_start(&self.players) {
                    return None;
                }
                self.begin_initial_sync(sink)
            }
            GameState::InitialSync if self.all_connected_in(PlayerState::Ready) => Some(self.start_game(sink)),
            _ => None,
        }
    }

    fn all_connected_in(&self, state: PlayerState) -> bool {
        let mut connected = self.players.iter().filter(|p| p.is_connected()).peekable();
        connected.peek().is_some() && connected.all(|p| p.state == state)
    }

    fn begin_initial_sync(&mut self, sink: &dyn MessageSink) -> Option<GameState> {
        let scene = self.rules.new_scene();
        let message = match text_message(MessageType::GameInitialSync, &scene.write_state()) {
            Ok(message) => message,
            Err(error) => {
                warn!(room = self.id, %error, "initial scene state does not fit, staying in Waiting");
                return None;
            }
        };
        self.scene = Some(scene);
        self.state = GameState::InitialSync;
        info!(room = self.id, "initial sync");
        self.broadcast(sink, &message);
        Some(self.state)
    }

    fn start_game(&mut self, sink: &dyn MessageSink) -> GameState {
        for player in self.players.iter_mut().filter(|p| p.is_connected()) {
            player.state = PlayerState::Playing;
        }
        if let Some(scene) = self.scene.as_mut() {
            scene.set_running(true);
        }
        self.state = GameState::Running;
        info!(room = self.id, "game started");
        self.broadcast(sink, &NetworkMessage::new(MessageType::GameStart));
        self.state
    }

    /// One running tick: advance the scene and broadcast `GameSync`.
    ///
    /// Returns false once the room is no longer running.
    pub fn tick(&mut self, sink: &dyn MessageSink) -> bool {
        if self.state != GameState::Running {
            return false;
        }
        let dt = self.rules.time_between_ticks();
        let Some(scene) = self.scene.as_mut() else {
            return false;
        };
        scene.update(dt);
        match text_message(MessageType::GameSync, &scene.write_state()) {
            Ok(message) => {
                self.broadcast(sink, &message);
            }
            Err(error) => warn!(room = self.id, %error, "scene state does not fit, sync skipped"),
        }
        self.ticks += 1;
        true
    }

    /// Ends the room. Terminal.
    pub fn stop(&mut self) {
        if self.state == GameState::Ended {
            return;
        }
        if let Some(scene) = self.scene.as_mut() {
            scene.set_running(false);
        }
        self.state = GameState::Ended;
        info!(room = self.id, ticks = self.ticks, "room ended");
    }

    /// Sends `message` to every connected player. Returns the recipient count.
    pub fn broadcast(&self, sink: &dyn MessageSink, message: &NetworkMessage) -> usize {
        self.broadcast_except(sink, message, PlayerId::NULL)
    }

    /// Sends `message` to every connected player but `except`.
    pub fn broadcast_except(&self, sink: &dyn MessageSink, message: &NetworkMessage, except: PlayerId) -> usize {
        let mut sent = 0;
        for player in self.players.iter().filter(|p| p.is_connected() && p.id != except) {
            let _ = sink.send_to(player.addr, message);
            sent += 1;
        }
        sent
    }

    /// Attaches lockstep broadcast, replacing any previous instance.
    pub fn attach_time_sync(&mut self, generation: u64, advance_per_tick: u32) {
        self.time_sync = Some(TimeSyncedServerRoom::new(generation, advance_per_tick));
        debug!(room = self.id, generation, advance_per_tick, "time sync attached");
    }

    /// The lockstep state, if attached.
    #[must_use]
    pub const fn time_sync(&self) -> Option<&TimeSyncedServerRoom> {
        self.time_sync.as_ref()
    }

    /// Generation of the attached lockstep state.
    #[must_use]
    pub fn time_sync_generation(&self) -> Option<u64> {
        self.time_sync.as_ref().map(TimeSyncedServerRoom::generation)
    }

    /// Routes a gameplay call from a member: buffered for the next slice with
    /// time sync, otherwise forwarded to every other connected member.
    pub fn submit_gameplay(&mut self, from: PlayerId, call: GameplayMessage, sink: &dyn MessageSink) -> FrameResult<()> {
        if !self.player(from).is_some_and(RoomPlayer::is_connected) {
            trace!(room = self.id, player = %from, "gameplay from non-member dropped");
            return Ok(());
        }
        if let Some(sync) = self.time_sync.as_mut() {
            sync.buffer(call);
            return Ok(());
        }
        let message = call.to_message()?;
        self.broadcast_except(sink, &message, from);
        Ok(())
    }

    /// Files a hash report from a member.
    pub fn submit_hash(&mut self, from: PlayerId, report: TimeSyncHashPayload, dump: Option<&str>) {
        let connected = self.connected_count();
        if !self.player(from).is_some_and(RoomPlayer::is_connected) {
            trace!(room = self.id, player = %from, "hash from non-member dropped");
            return;
        }
        match self.time_sync.as_mut() {
            Some(sync) => sync.record_hash(from, report, dump, connected),
            None => trace!(room = self.id, "hash report without time sync ignored"),
        }
    }

    /// Closes the open lockstep slice.
    pub fn run_time_sync_slice(&mut self, sink: &dyn MessageSink) -> Option<SliceReport> {
        let sync = self.time_sync.as_mut()?;
        Some(sync.run_slice(&self.players, sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomConfig;
    use crate::protocol::payloads::{read_deny_reason, read_room_description, read_text};
    use crate::room::scene::{DefaultRules, RelayScene};
    use crate::transport::RecordingSink;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn room(max_players: usize, min_players: usize) -> ServerRoom {
        let config = RoomConfig {
            max_players,
            min_players,
            ..RoomConfig::default()
        };
        let mut room = ServerRoom::new(1, PlayerId(1), Box::new(DefaultRules::relay(&config)));
        room.open();
        room
    }

    #[test]
    fn test_admission_success_and_denials() {
        let sink = RecordingSink::default();
        let mut room = room(2, 2);

        assert_eq!(room.add_player(PlayerId(1), addr(7001), &sink), Ok(()));
        assert_eq!(room.add_player(PlayerId(1), addr(7001), &sink), Err(DenyReason::AlreadyJoined));
        assert_eq!(room.add_player(PlayerId(2), addr(7002), &sink), Ok(()));
        assert_eq!(room.add_player(PlayerId(3), addr(7003), &sink), Err(DenyReason::Refused));
        assert_eq!(room.players().len(), 2);

        let sent = sink.sent();
        assert_eq!(sent[0].1.kind(), Some(MessageType::JoinGameSuccess));
        let description = read_room_description(&sent[0].1).unwrap();
        assert_eq!(description.players, vec![PlayerId(1)]);
        assert_eq!(read_deny_reason(&sent[1].1).unwrap(), DenyReason::AlreadyJoined);
        assert_eq!(read_deny_reason(&sent[3].1).unwrap(), DenyReason::Refused);
        assert_eq!(sent[3].0, addr(7003));
    }

    #[test]
    fn test_join_refused_outside_waiting() {
        let sink = RecordingSink::default();
        let mut room = ServerRoom::new(4, PlayerId(1), Box::new(DefaultRules::relay(&RoomConfig::default())));
        assert_eq!(room.add_player(PlayerId(1), addr(7001), &sink), Err(DenyReason::NotWaiting));
        assert!(room.players().is_empty());
    }

    #[test]
    fn test_waiting_needs_everyone_initialized_and_start_rule() {
        let sink = RecordingSink::default();
        let mut room = room(4, 2);
        room.add_player(PlayerId(1), addr(7001), &sink).unwrap();
        room.add_player(PlayerId(2), addr(7002), &sink).unwrap();

        assert!(room.mark_scene_ready(PlayerId(1)));
        assert_eq!(room.advance_lifecycle(&sink), None);
        assert!(room.mark_scene_ready(PlayerId(2)));
        assert!(!room.mark_scene_ready(PlayerId(2)));

        sink.take();
        assert_eq!(room.advance_lifecycle(&sink), Some(GameState::InitialSync));
        let sent = sink.take();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, m)| m.kind() == Some(MessageType::GameInitialSync)));
        assert!(read_text(&sent[0].1).unwrap().contains("\"tick\":0"));
    }

    #[test]
    fn test_start_rule_holds_room_in_waiting() {
        let sink = RecordingSink::default();
        let mut room = room(4, 3);
        room.add_player(PlayerId(1), addr(7001), &sink).unwrap();
        room.mark_scene_ready(PlayerId(1));
        assert_eq!(room.advance_lifecycle(&sink), None);
        assert_eq!(room.state(), GameState::Waiting);
    }

    #[test]
    fn test_full_lifecycle_to_ended() {
        let sink = RecordingSink::default();
        let mut room = room(2, 2);
        for (id, port) in [(1, 7001), (2, 7002)] {
            room.add_player(PlayerId(id), addr(port), &sink).unwrap();
            room.mark_scene_ready(PlayerId(id));
        }
        assert!(!room.mark_initial_sync_ready(PlayerId(1)));
        room.advance_lifecycle(&sink);

        assert!(room.mark_initial_sync_ready(PlayerId(1)));
        assert_eq!(room.advance_lifecycle(&sink), None);
        assert!(room.mark_initial_sync_ready(PlayerId(2)));
        sink.take();
        assert_eq!(room.advance_lifecycle(&sink), Some(GameState::Running));
        assert_eq!(sink.sent_types(), vec![(addr(7001), MessageType::GameStart), (addr(7002), MessageType::GameStart)]);
        assert!(room.players().iter().all(|p| p.state == PlayerState::Playing));

        sink.take();
        assert!(room.tick(&sink));
        assert_eq!(room.ticks(), 1);
        let synced = sink.take();
        assert_eq!(synced.len(), 2);
        let state: RelayScene = serde_json::from_str(read_text(&synced[0].1).unwrap()).unwrap();
        assert_eq!(state.tick, 1);

        room.stop();
        assert_eq!(room.state(), GameState::Ended);
        assert!(!room.tick(&sink));
        assert!(!room.is_active());
    }

    #[test]
    fn test_disconnected_players_skipped_not_removed() {
        let sink = RecordingSink::default();
        let mut room = room(4, 1);
        room.add_player(PlayerId(1), addr(7001), &sink).unwrap();
        room.add_player(PlayerId(2), addr(7002), &sink).unwrap();
        sink.take();

        assert!(room.disconnect(PlayerId(2)));
        assert!(!room.disconnect(PlayerId(2)));
        assert_eq!(room.players().len(), 2);
        assert_eq!(room.broadcast(&sink, &NetworkMessage::new(MessageType::GameSync)), 1);
        assert_eq!(sink.sent_types(), vec![(addr(7001), MessageType::GameSync)]);

        // Only player 1 must be initialized now.
        room.mark_scene_ready(PlayerId(1));
        assert_eq!(room.advance_lifecycle(&sink), Some(GameState::InitialSync));

        room.disconnect(PlayerId(1));
        assert_eq!(room.state(), GameState::Ended);
    }

    #[test]
    fn test_gameplay_forwarded_without_time_sync() {
        let sink = RecordingSink::default();
        let mut room = room(4, 2);
        room.add_player(PlayerId(1), addr(7001), &sink).unwrap();
        room.add_player(PlayerId(2), addr(7002), &sink).unwrap();
        sink.take();

        let call = GameplayMessage::new("ping", &1).unwrap();
        room.submit_gameplay(PlayerId(1), call.clone(), &sink).unwrap();
        assert_eq!(sink.sent_types(), vec![(addr(7002), MessageType::GenericGameplay)]);

        sink.take();
        room.submit_gameplay(PlayerId(9), call, &sink).unwrap();
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_gameplay_buffered_with_time_sync() {
        let sink = RecordingSink::default();
        let mut room = room(4, 2);
        room.attach_time_sync(7, 20);
        room.add_player(PlayerId(1), addr(7001), &sink).unwrap();
        sink.take();

        room.submit_gameplay(PlayerId(1), GameplayMessage::new("ping", &1).unwrap(), &sink).unwrap();
        assert!(sink.sent().is_empty());
        assert_eq!(room.time_sync().unwrap().pending_messages().len(), 1);

        let report = room.run_time_sync_slice(&sink).unwrap();
        assert_eq!(report.broadcast, 1);
        assert_eq!(
            sink.sent_types(),
            vec![(addr(7001), MessageType::GenericGameplayWithTime), (addr(7001), MessageType::AdvanceTime)]
        );
        assert_eq!(room.time_sync_generation(), Some(7));
    }

    #[test]
    fn test_hash_reports_follow_membership() {
        let sink = RecordingSink::default();
        let mut room = room(4, 4);
        room.attach_time_sync(1, 20);
        for (id, port) in [(1, 7001), (2, 7002), (3, 7003)] {
            room.add_player(PlayerId(id), addr(port), &sink).unwrap();
        }
        for id in [1, 2] {
            room.submit_hash(PlayerId(id), TimeSyncHashPayload { time: 0, hash: 5 }, None);
        }
        assert_eq!(room.run_time_sync_slice(&sink).unwrap().verified, 0);

        room.disconnect(PlayerId(3));
        assert_eq!(room.run_time_sync_slice(&sink).unwrap().verified, 1);

        room.submit_hash(PlayerId(3), TimeSyncHashPayload { time: 20, hash: 6 }, None);
        room.submit_hash(PlayerId(9), TimeSyncHashPayload { time: 20, hash: 6 }, None);
        assert!(room.time_sync().unwrap().verifier().pending().is_empty());
        assert_eq!(room.time_sync().unwrap().errors(), 0);
    }
}

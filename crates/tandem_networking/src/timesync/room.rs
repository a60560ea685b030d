//! # Time-Synced Room
//!
//! Lockstep broadcast for one room. Gameplay calls arriving during a slice are
//! buffered; every `advance_per_tick` game-time units the slice closes:
//!
//! ```text
//!  (a) verify complete hash reports      -> Errors += mismatches
//!  (b) broadcast buffered calls, FIFO     -> stamped with time T
//!  (c) broadcast AdvanceTime(T + step)
//!  (d) T += step
//! ```
//!
//! Hash reports more than [`HASH_WINDOW_SLICES`] slices behind the open
//! slice are abandoned when it closes.
//!
//! Every client therefore applies the same calls in the same order at the
//! same game time, and never runs past a time the server has not closed.

use std::sync::Arc;

use parking_lot::Mutex;
use tandem_shared::{PlayerId, TimeSyncHashPayload};
use tracing::{trace, warn};

use super::hash::{HashEntry, HashVerifier};
use super::routine::{Routine, RoutineStep};
use crate::protocol::payloads::advance_time;
use crate::protocol::GameplayMessage;
use crate::room::{RoomPlayer, ServerRoom};
use crate::transport::MessageSink;

/// Slices an incomplete hash pair may trail the open slice.
pub const HASH_WINDOW_SLICES: i32 = 50;

/// What one slice did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SliceReport {
    /// Game time the slice's calls were stamped with.
    pub time: i32,
    /// Gameplay calls broadcast.
    pub broadcast: usize,
    /// Hash pairs verified.
    pub verified: usize,
}

/// Per-room lockstep state.
#[derive(Debug)]
pub struct TimeSyncedServerRoom {
    generation: u64,
    advance_per_tick: i32,
    game_time: i32,
    messages_for_next_tick: Vec<GameplayMessage>,
    hashes: HashVerifier,
}

impl TimeSyncedServerRoom {
    /// Fresh state at game time zero. `generation` identifies this instance
    /// to the routine that drives it.
    #[must_use]
    pub fn new(generation: u64, advance_per_tick: u32) -> Self {
        Self {
            generation,
            advance_per_tick: i32::try_from(advance_per_tick).unwrap_or(i32::MAX).max(1),
            game_time: 0,
            messages_for_next_tick: Vec::new(),
            hashes: HashVerifier::new(),
        }
    }

    /// Instance id.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Game time of the open slice.
    #[must_use]
    pub const fn game_time(&self) -> i32 {
        self.game_time
    }

    /// Game-time units per slice.
    #[must_use]
    pub fn advance_per_tick(&self) -> u32 {
        self.advance_per_tick.unsigned_abs()
    }

    /// Desyncs detected so far.
    #[must_use]
    pub const fn errors(&self) -> u32 {
        self.hashes.errors()
    }

    /// Hash collections and desync history.
    #[must_use]
    pub const fn verifier(&self) -> &HashVerifier {
        &self.hashes
    }

    /// Calls waiting for the end of the slice.
    #[must_use]
    pub fn pending_messages(&self) -> &[GameplayMessage] {
        &self.messages_for_next_tick
    }

    /// Buffers a gameplay call for the open slice.
    pub fn buffer(&mut self, call: GameplayMessage) {
        self.messages_for_next_tick.push(call);
    }

    /// Files a hash report.
    pub fn record_hash(
        &mut self,
        player: PlayerId,
        report: TimeSyncHashPayload,
        dump: Option<&str>,
        connected_players: usize,
    ) {
        trace!(%player, time = report.time, hash = report.hash, "hash report");
        self.hashes.record(
            report.time,
            HashEntry {
                player,
                hash: report.hash,
                dump: dump.map(str::to_owned),
            },
            connected_players,
        );
    }

    /// A member left; open hash pairs stop waiting for it.
    pub fn player_left(&mut self, connected_players: usize) {
        self.hashes.player_left(connected_players);
    }

    /// Closes the open slice, sending to every connected player in `players`.
    pub fn run_slice(&mut self, players: &[RoomPlayer], sink: &dyn MessageSink) -> SliceReport {
        let verified = self.hashes.verify_complete();

        let time = self.game_time;
        self.hashes
            .abandon_before(time.saturating_sub(self.advance_per_tick.saturating_mul(HASH_WINDOW_SLICES)));
        let mut broadcast = 0;
        for call in self.messages_for_next_tick.drain(..) {
            match call.to_timed_message(time) {
                Ok(message) => {
                    for player in players.iter().filter(|p| p.is_connected()) {
                        let _ = sink.send_to(player.addr, &message);
                    }
                    broadcast += 1;
                }
                Err(error) => warn!(method = %call.method, %error, "gameplay call dropped"),
            }
        }

        let next = time.saturating_add(self.advance_per_tick);
        let advance = advance_time(next);
        for player in players.iter().filter(|p| p.is_connected()) {
            let _ = sink.send_to(player.addr, &advance);
        }
        self.game_time = next;

        SliceReport {
            time,
            broadcast,
            verified,
        }
    }
}

/// Drives one room's slices from a [`super::RoutineScheduler`].
///
/// Finishes once the room ends or its time sync is replaced.
pub struct TimeSyncRoutine {
    room: Arc<Mutex<ServerRoom>>,
    generation: u64,
}

impl TimeSyncRoutine {
    /// Routine for the room's current time sync instance.
    #[must_use]
    pub fn new(room: Arc<Mutex<ServerRoom>>, generation: u64) -> Self {
        Self { room, generation }
    }
}

impl Routine<dyn MessageSink> for TimeSyncRoutine {
    fn resume(&mut self, sink: &dyn MessageSink) -> RoutineStep {
        let mut room = self.room.lock();
        if !room.is_active() || room.time_sync_generation() != Some(self.generation) {
            return RoutineStep::Done;
        }
        match room.run_time_sync_slice(sink) {
            Some(_) => RoutineStep::Wait(room.time_sync().map_or(1, TimeSyncedServerRoom::advance_per_tick)),
            None => RoutineStep::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payloads::read_time;
    use crate::transport::RecordingSink;
    use std::net::SocketAddr;
    use tandem_shared::MessageType;

    fn players(count: u16) -> Vec<RoomPlayer> {
        (1..=count)
            .map(|i| RoomPlayer::joined(PlayerId(u32::from(i)), SocketAddr::from(([127, 0, 0, 1], 6000 + i))))
            .collect()
    }

    fn call(name: &str) -> GameplayMessage {
        GameplayMessage::new(name, &()).unwrap()
    }

    #[test]
    fn test_slice_broadcasts_fifo_then_advance() {
        let roster = players(2);
        let sink = RecordingSink::default();
        let mut sync = TimeSyncedServerRoom::new(1, 20);
        sync.buffer(call("a"));
        sync.buffer(call("b"));

        let report = sync.run_slice(&roster, &sink);
        assert_eq!(report, SliceReport { time: 0, broadcast: 2, verified: 0 });
        assert_eq!(sync.game_time(), 20);
        assert!(sync.pending_messages().is_empty());

        for player in &roster {
            let received: Vec<_> = sink
                .sent()
                .into_iter()
                .filter(|(to, _)| *to == player.addr)
                .map(|(_, m)| m)
                .collect();
            assert_eq!(received.len(), 3);
            let (t0, first) = GameplayMessage::from_timed_message(&received[0]).unwrap();
            let (t1, second) = GameplayMessage::from_timed_message(&received[1]).unwrap();
            assert_eq!((t0, first.method.as_str()), (0, "a"));
            assert_eq!((t1, second.method.as_str()), (0, "b"));
            assert_eq!(received[2].kind(), Some(MessageType::AdvanceTime));
            assert_eq!(read_time(&received[2]).unwrap(), 20);
        }
    }

    #[test]
    fn test_empty_slice_still_advances() {
        let roster = players(1);
        let sink = RecordingSink::default();
        let mut sync = TimeSyncedServerRoom::new(1, 20);
        sync.run_slice(&roster, &sink);
        sync.run_slice(&roster, &sink);
        let times: Vec<i32> = sink.sent().iter().map(|(_, m)| read_time(m).unwrap()).collect();
        assert_eq!(times, vec![20, 40]);
    }

    #[test]
    fn test_disconnected_players_skipped() {
        let mut roster = players(2);
        roster[1].state = crate::room::PlayerState::Disconnected;
        let sink = RecordingSink::default();
        let mut sync = TimeSyncedServerRoom::new(1, 20);
        sync.buffer(call("a"));
        sync.run_slice(&roster, &sink);
        assert!(sink.sent().iter().all(|(to, _)| *to == roster[0].addr));
    }

    #[test]
    fn test_hashes_verified_at_slice_start() {
        let roster = players(3);
        let sink = RecordingSink::default();
        let mut sync = TimeSyncedServerRoom::new(1, 20);
        for (player, hash) in [(1, 5), (2, 5), (3, 7)] {
            sync.record_hash(PlayerId(player), TimeSyncHashPayload { time: 0, hash }, None, 3);
        }
        assert_eq!(sync.errors(), 0);

        let report = sync.run_slice(&roster, &sink);
        assert_eq!(report.verified, 1);
        assert_eq!(sync.errors(), 1);
    }

    #[test]
    fn test_silent_player_does_not_grow_pending() {
        let roster = players(3);
        let sink = RecordingSink::default();
        let mut sync = TimeSyncedServerRoom::new(1, 20);
        for _ in 0..200 {
            let time = sync.game_time();
            for player in [1, 2] {
                sync.record_hash(PlayerId(player), TimeSyncHashPayload { time, hash: 5 }, None, 3);
            }
            sync.run_slice(&roster, &sink);
            sink.take();
        }
        assert!(sync.verifier().pending().len() <= usize::try_from(HASH_WINDOW_SLICES).unwrap() + 1);
        assert_eq!(sync.errors(), 0);
    }

    #[test]
    fn test_leaving_player_releases_open_pair() {
        let roster = players(3);
        let sink = RecordingSink::default();
        let mut sync = TimeSyncedServerRoom::new(1, 20);
        for (player, hash) in [(1, 5), (2, 9)] {
            sync.record_hash(PlayerId(player), TimeSyncHashPayload { time: 0, hash }, None, 3);
        }
        assert_eq!(sync.run_slice(&roster, &sink).verified, 0);

        sync.player_left(2);
        assert_eq!(sync.run_slice(&roster, &sink).verified, 1);
        assert_eq!(sync.errors(), 1);
        assert!(sync.verifier().pending().is_empty());
    }
}

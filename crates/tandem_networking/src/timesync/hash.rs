//! # Desync Detection
//!
//! Every participant hashes its simulation state once per time slice and
//! reports it. Reports for one slice gather in a [`TimeHashPair`]; once it
//! holds one hash per connected player it is verified and discarded.
//!
//! A mismatch is reported, never repaired: there is no resync or rollback.
//! Incomplete pairs that fall too far behind the room's game time are
//! abandoned, so a player that stops reporting cannot grow the pending list.

use tandem_shared::PlayerId;
use tracing::{debug, warn};

use crate::error::DesyncError;

/// One player's report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashEntry {
    /// Reporting player.
    pub player: PlayerId,
    /// Reported hash.
    pub hash: i32,
    /// Optional state dump for diagnosis.
    pub dump: Option<String>,
}

/// Hash reports collected for one time slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeHashPair {
    time: i32,
    expected_count: usize,
    entries: Vec<HashEntry>,
}

impl TimeHashPair {
    /// Empty collection expecting `expected_count` reports for `time`.
    #[must_use]
    pub fn new(time: i32, expected_count: usize) -> Self {
        Self {
            time,
            expected_count,
            entries: Vec::with_capacity(expected_count),
        }
    }

    /// Game time of the slice.
    #[must_use]
    pub const fn time(&self) -> i32 {
        self.time
    }

    /// Reports collected so far.
    #[must_use]
    pub fn entries(&self) -> &[HashEntry] {
        &self.entries
    }

    /// Returns true once every expected player reported.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.expected_count
    }

    /// Returns true if `player` already reported.
    #[must_use]
    pub fn contains(&self, player: PlayerId) -> bool {
        self.entries.iter().any(|e| e.player == player)
    }

    /// Returns true if this pair can take a report from `player` for `time`.
    #[must_use]
    pub fn accepts(&self, time: i32, player: PlayerId) -> bool {
        self.time == time && !self.is_full() && !self.contains(player)
    }

    /// Reports needed before the pair is full.
    #[must_use]
    pub const fn expected_count(&self) -> usize {
        self.expected_count
    }

    /// Adds a report.
    pub fn push(&mut self, entry: HashEntry) {
        self.entries.push(entry);
    }

    /// Succeeds iff every hash equals the first.
    ///
    /// # Errors
    ///
    /// [`DesyncError`] listing every reported hash.
    pub fn verify(&self) -> Result<(), DesyncError> {
        let Some(first) = self.entries.first() else {
            return Ok(());
        };
        if self.entries.iter().all(|e| e.hash == first.hash) {
            return Ok(());
        }
        Err(DesyncError {
            time: self.time,
            hashes: self.entries.iter().map(|e| e.hash).collect(),
        })
    }
}

/// Pending hash collections of one room.
#[derive(Clone, Debug, Default)]
pub struct HashVerifier {
    pending: Vec<TimeHashPair>,
    errors: u32,
    last_desync: Option<DesyncError>,
}

impl HashVerifier {
    /// Empty verifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files a report into the first pair that accepts it, or a new pair
    /// expecting `connected_players` reports.
    pub fn record(&mut self, time: i32, entry: HashEntry, connected_players: usize) {
        if let Some(pair) = self.pending.iter_mut().find(|p| p.accepts(time, entry.player)) {
            pair.push(entry);
            return;
        }
        let mut pair = TimeHashPair::new(time, connected_players.max(1));
        pair.push(entry);
        self.pending.push(pair);
    }

    /// A player left: open pairs expect at most `connected_players` reports.
    pub fn player_left(&mut self, connected_players: usize) {
        let cap = connected_players.max(1);
        for pair in &mut self.pending {
            pair.expected_count = pair.expected_count.min(cap);
        }
    }

    /// Verifies and discards every full pair; incomplete pairs stay pending.
    ///
    /// Returns the number of pairs verified.
    pub fn verify_complete(&mut self) -> usize {
        let mut verified = 0;
        let mut i = 0;
        while i < self.pending.len() {
            if !self.pending[i].is_full() {
                i += 1;
                continue;
            }
            let pair = self.pending.remove(i);
            verified += 1;
            if let Err(desync) = pair.verify() {
                self.errors += 1;
                warn!(time = desync.time, hashes = ?desync.hashes, errors = self.errors, "desync detected");
                for entry in pair.entries().iter().filter(|e| e.dump.is_some()) {
                    warn!(player = %entry.player, hash = entry.hash, dump = entry.dump.as_deref().unwrap_or_default(), "desync state dump");
                }
                self.last_desync = Some(desync);
            }
        }
        verified
    }

    /// Drops incomplete pairs for slices before `oldest`. Returns how many.
    pub fn abandon_before(&mut self, oldest: i32) -> usize {
        let before = self.pending.len();
        self.pending.retain(|pair| pair.time >= oldest);
        let abandoned = before - self.pending.len();
        if abandoned > 0 {
            debug!(abandoned, oldest, "incomplete hash reports abandoned");
        }
        abandoned
    }

    /// Mismatched slices so far.
    #[must_use]
    pub const fn errors(&self) -> u32 {
        self.errors
    }

    /// Most recent mismatch.
    #[must_use]
    pub const fn last_desync(&self) -> Option<&DesyncError> {
        self.last_desync.as_ref()
    }

    /// Pairs still waiting for reports.
    #[must_use]
    pub fn pending(&self) -> &[TimeHashPair] {
        &self.pending
    }
}

//! Client-side game clock.
//!
//! Local game time never passes the last `AdvanceTime` the server announced.
//! Timed gameplay calls are held until local time reaches their stamp, then
//! released in arrival order.

use std::collections::VecDeque;

use crate::protocol::GameplayMessage;

/// A gameplay call and the game time it applies at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedCall {
    /// Game time stamp.
    pub time: i32,
    /// The call.
    pub call: GameplayMessage,
}

/// Game time gated by the server's advance limit.
#[derive(Clone, Debug, Default)]
pub struct ClientGameClock {
    time: i32,
    advance_limit: i32,
    pending: VecDeque<TimedCall>,
}

impl ClientGameClock {
    /// Clock at time zero with nothing announced.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Local game time.
    #[must_use]
    pub const fn time(&self) -> i32 {
        self.time
    }

    /// Furthest time the server allowed.
    #[must_use]
    pub const fn advance_limit(&self) -> i32 {
        self.advance_limit
    }

    /// Calls not yet released.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Holds a call until local time reaches `time`.
    pub fn enqueue(&mut self, time: i32, call: GameplayMessage) {
        self.pending.push_back(TimedCall { time, call });
    }

    /// Raises the advance limit. Lower values are ignored.
    pub fn set_advance_limit(&mut self, limit: i32) {
        self.advance_limit = self.advance_limit.max(limit);
    }

    /// Moves local time forward by up to `delta`, stopping at the advance
    /// limit, and returns every call that came due.
    pub fn advance(&mut self, delta: u32) -> Vec<TimedCall> {
        let step = i32::try_from(delta).unwrap_or(i32::MAX);
        self.time = self.time.saturating_add(step).min(self.advance_limit).max(self.time);

        let now = self.time;
        let mut released = Vec::new();
        let mut held = VecDeque::with_capacity(self.pending.len());
        for timed in self.pending.drain(..) {
            if timed.time <= now {
                released.push(timed);
            } else {
                held.push_back(timed);
            }
        }
        self.pending = held;
        released
    }
}

//! # Room Game Loop
//!
//! Fixed-timestep loop that drives a running room.
//!
//! Each room gets its own thread once it reaches `Running`. The loop waits
//! for the room's tick interval, ticks the scene under the room lock and
//! exits as soon as the room is no longer running.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::lifecycle::ServerRoom;
use crate::transport::MessageSink;

/// Fixed-timestep tick loop controller.
pub struct TickLoop {
    tick_duration: Duration,
    last_tick: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Minimum tick duration observed.
    pub min_tick_us: u64,
    /// Maximum tick duration observed.
    pub max_tick_us: u64,
    /// Rolling average tick duration.
    pub avg_tick_us: u64,
    /// Ticks that took longer than the interval.
    pub late_ticks: u64,
    /// Total ticks measured.
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(tick_duration: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: micros(tick_duration),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// A loop ticking every `tick_duration` (at least one millisecond).
    #[must_use]
    pub fn new(tick_duration: Duration) -> Self {
        let tick_duration = tick_duration.max(Duration::from_millis(1));
        Self {
            tick_duration,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Returns true if a tick is due.
    ///
    /// Call in a loop until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_tick);
        self.last_tick = now;
        self.accumulator >= self.tick_duration
    }

    /// Marks the start of a tick.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks the end of a tick and records its duration.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = micros(duration);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us.saturating_mul(15) + duration_us) / 16;

        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_tick.elapsed() + self.accumulator;
        if elapsed < self.tick_duration {
            std::thread::sleep(self.tick_duration - elapsed);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target interval.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

/// Runs `room`'s game loop on a new thread until the room stops running.
///
/// Returns the loop's final statistics when joined.
///
/// # Errors
///
/// Propagates thread spawn failures.
pub fn spawn_game_loop(room: Arc<Mutex<ServerRoom>>, sink: Arc<dyn MessageSink>) -> io::Result<JoinHandle<TickStats>> {
    let (id, interval) = {
        let room = room.lock();
        (room.id(), room.time_between_ticks())
    };
    std::thread::Builder::new()
        .name(format!("tandem-room-{id}"))
        .spawn(move || {
            let mut ticks = TickLoop::new(interval);
            debug!(room = id, ?interval, "game loop started");
            loop {
                ticks.wait_for_next_tick();
                while ticks.should_tick() {
                    let start = ticks.begin_tick();
                    let running = room.lock().tick(sink.as_ref());
                    sink.flush();
                    ticks.end_tick(start);
                    if !running {
                        let stats = *ticks.stats();
                        info!(room = id, ticks = stats.total_ticks, late = stats.late_ticks, "game loop finished");
                        return stats;
                    }
                }
            }
        })
}

//! Per-second traffic counters.
//!
//! Informational only; nothing reads these for flow control.

use std::time::{Duration, Instant};

/// Traffic in one window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    /// Bytes handed to the socket.
    pub bytes_up: u64,
    /// Bytes read from the socket.
    pub bytes_down: u64,
    /// Messages handed to the socket.
    pub messages_up: u64,
    /// Datagrams read from the socket.
    pub messages_down: u64,
}

/// Snapshot of transport traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    /// Traffic during the last completed second.
    pub last_second: TrafficCounters,
    /// Traffic since the agent started.
    pub total: TrafficCounters,
}

/// Accumulates counters and rolls them over every wall-clock second.
pub(crate) struct MetricsTracker {
    window_start: Instant,
    current: TrafficCounters,
    metrics: TransportMetrics,
}

impl MetricsTracker {
    const WINDOW: Duration = Duration::from_secs(1);

    pub(crate) fn new() -> Self {
        Self {
            window_start: Instant::now(),
            current: TrafficCounters::default(),
            metrics: TransportMetrics::default(),
        }
    }

    pub(crate) fn record_upload(&mut self, bytes: usize) {
        self.roll(Instant::now());
        self.current.bytes_up += bytes as u64;
        self.current.messages_up += 1;
        self.metrics.total.bytes_up += bytes as u64;
        self.metrics.total.messages_up += 1;
    }

    pub(crate) fn record_download(&mut self, bytes: usize) {
        self.roll(Instant::now());
        self.current.bytes_down += bytes as u64;
        self.current.messages_down += 1;
        self.metrics.total.bytes_down += bytes as u64;
        self.metrics.total.messages_down += 1;
    }

    pub(crate) fn snapshot(&mut self) -> TransportMetrics {
        self.roll(Instant::now());
        self.metrics
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.window_start);
        if elapsed < Self::WINDOW {
            return;
        }
        // A window with no traffic in between still reads as an idle second.
        self.metrics.last_second = if elapsed < Self::WINDOW * 2 {
            self.current
        } else {
            TrafficCounters::default()
        };
        self.current = TrafficCounters::default();
        self.window_start = now;
    }
}

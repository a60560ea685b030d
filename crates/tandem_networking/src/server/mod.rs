//! # Server Host
//!
//! Runs the server side of a session: one agent, one lobby.
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────────────────── pump thread ──────────────────────────┐
//!  │ wait_for_input(≤ idle wait) → pump(lobby) → lobby.update(dt)     │
//!  │                                  │              │                │
//!  │                          handlers (lobby,   lifecycle + time     │
//!  │                          rooms, hashes)     sync slices          │
//!  └──────────────────────────────────┬──────────────────────────────┘
//!                                     │ room reaches Running
//!                                     ▼
//!                       game loop thread per room (fixed tick)
//! ```
//!
//! [`ServerHost::update`] is the same step driven by the caller's clock,
//! for engines that own their frame loop and for deterministic tests.

mod lobby;

pub use lobby::{Lobby, LobbyUser, RulesFactory};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::info;

use crate::config::NetConfig;
use crate::error::NetResult;
use crate::transport::{AgentMode, MessageSink, NetworkAgent, TransportMetrics};

/// A running server: transport agent plus lobby.
pub struct ServerHost {
    agent: Arc<NetworkAgent<Lobby>>,
    lobby: Mutex<Lobby>,
    last_engine_time: Mutex<Option<u64>>,
    idle_wait: Duration,
    running: AtomicBool,
}

impl ServerHost {
    /// Binds the server socket and registers the lobby handlers.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError::Io`] if the port cannot be bound.
    pub fn start(config: NetConfig, rules: RulesFactory) -> NetResult<Self> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        Self::start_seeded(config, rules, seed)
    }

    /// Like [`Self::start`] with a fixed player id seed.
    ///
    /// # Errors
    ///
    /// [`crate::error::TransportError::Io`] if the port cannot be bound.
    pub fn start_seeded(config: NetConfig, rules: RulesFactory, seed: u64) -> NetResult<Self> {
        let agent = NetworkAgent::start(AgentMode::Server { port: config.server.port }, &config.transport)?;
        Lobby::register(&agent);
        info!(addr = %agent.local_addr(), "server listening");
        Ok(Self {
            agent: Arc::new(agent),
            idle_wait: config.transport.idle_wait(),
            lobby: Mutex::new(Lobby::new(config, rules, seed)),
            last_engine_time: Mutex::new(None),
            running: AtomicBool::new(true),
        })
    }

    /// Bound address; the port is real even when configured as 0.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.agent.local_addr()
    }

    /// The transport agent.
    #[must_use]
    pub fn agent(&self) -> &Arc<NetworkAgent<Lobby>> {
        &self.agent
    }

    /// Locks the lobby for inspection.
    pub fn with_lobby<R>(&self, f: impl FnOnce(&mut Lobby) -> R) -> R {
        f(&mut self.lobby.lock())
    }

    /// Traffic counters.
    #[must_use]
    pub fn metrics(&self) -> TransportMetrics {
        self.agent.metrics()
    }

    /// Returns false once stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One step at engine time `engine_time_ms`: pump the agent, advance
    /// lifecycles and time sync by the elapsed time, then send the replies.
    pub fn update(&self, engine_time_ms: u64) {
        let elapsed = {
            let mut last = self.last_engine_time.lock();
            let elapsed = last.map_or(0, |last| engine_time_ms.saturating_sub(last));
            *last = Some(engine_time_ms.max(last.unwrap_or(0)));
            elapsed
        };
        let sink: Arc<dyn MessageSink> = self.agent.clone();

        let mut lobby = self.lobby.lock();
        self.agent.pump(&mut lobby);
        lobby.update(elapsed, &sink);
        drop(lobby);
        self.agent.flush();
    }

    /// Runs [`Self::update`] on a dedicated thread until [`Self::stop`].
    ///
    /// The thread sleeps until traffic arrives, the next time-sync slice is
    /// due or the idle wait passes, whichever is first.
    ///
    /// # Errors
    ///
    /// Propagates thread spawn failures.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let host = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("tandem-server-{}", self.local_addr().port()))
            .spawn(move || {
                let epoch = Instant::now();
                while host.is_running() {
                    let due = host.lobby.lock().next_due_in();
                    let wait = due.map_or(host.idle_wait, |ms| host.idle_wait.min(Duration::from_millis(ms)));
                    host.agent.wait_for_input(wait);
                    let now = u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
                    host.update(now);
                }
            })
    }

    /// Ends every room, joins their game loops and closes the socket.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.lobby.lock().shutdown();
        self.agent.flush();
        self.agent.shutdown();
        info!("server stopped");
    }
}

impl Drop for ServerHost {
    fn drop(&mut self) {
        self.stop();
    }
}

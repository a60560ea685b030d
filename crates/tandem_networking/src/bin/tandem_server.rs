//! # TANDEM Relay Server
//!
//! Lobby plus time-synced rooms whose scene only counts ticks; gameplay is
//! relayed between clients in lockstep.
//!
//! ## Usage
//!
//! ```bash
//! tandem_server --port 1337 --config server.toml --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tandem_networking::config::RoomConfig;
use tandem_networking::{DefaultRules, NetConfig, RoomRules, RulesFactory, ServerHost};
use tracing_subscriber::EnvFilter;

/// Command line options.
#[derive(Parser, Debug)]
#[command(name = "tandem_server", about = "Lockstep relay server")]
struct Args {
    /// UDP port to bind; overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run for this many seconds, then exit.
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with_target(true)
        .compact()
        .init();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TANDEM LOCKSTEP SERVER                                   ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");

    let mut config = match &args.config {
        Some(path) => NetConfig::load(path)?,
        None => NetConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!(
        port = config.server.port,
        max_players = config.room.max_players,
        time_synced = config.room.time_synced,
        advance_per_tick = config.time_sync.advance_per_tick,
        "configuration loaded"
    );

    let rules: RulesFactory = Arc::new(|room: &RoomConfig| Box::new(DefaultRules::relay(room)) as Box<dyn RoomRules>);
    let server = Arc::new(ServerHost::start(config, rules)?);
    let pump = server.spawn()?;

    match args.duration {
        Some(secs) => {
            std::thread::sleep(Duration::from_secs(secs));
            server.stop();
            let _ = pump.join();
            let metrics = server.metrics();
            tracing::info!(
                bytes_up = metrics.total.bytes_up,
                bytes_down = metrics.total.bytes_down,
                messages_up = metrics.total.messages_up,
                messages_down = metrics.total.messages_down,
                "server finished"
            );
        }
        None => {
            let _ = pump.join();
        }
    }
    Ok(())
}

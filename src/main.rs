//! Empires Game Server
//!
//! Authoritative server binary. Configuration comes from the environment:
//!
//! | Variable             | Meaning                          |
//! |----------------------|----------------------------------|
//! | `EMPIRES_BIND`       | listen address (`0.0.0.0:8080`)  |
//! | `EMPIRES_TICK_RATE`  | base ticks per second            |
//! | `EMPIRES_SPEED`      | game speed multiplier            |
//! | `EMPIRES_MIN_PEERS`  | peers needed to start            |
//! | `EMPIRES_SEED`       | scenario seed                    |
//! | `EMPIRES_RECORD`     | `1` to record and verify replay  |

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use empires::{
    game::replay::verify,
    GameServer, GameView, ServerConfig, World, VERSION,
};

/// How often the observer thread samples the world.
const OBSERVE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config_from_env()?;
    info!("Empires Server v{}", VERSION);
    info!(
        "Tick Rate: {} Hz x {:.2}, map {}x{}, {} seats",
        config.tick_rate,
        config.game_speed,
        config.scenario.width,
        config.scenario.height,
        config.scenario.players.len(),
    );

    let server = Arc::new(GameServer::new(config.clone())?);

    let observing = Arc::new(AtomicBool::new(true));
    let observer = spawn_observer(server.world().clone(), observing.clone())?;

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            info!("Interrupted");
        }
    }

    server.shutdown();
    let joiner = server.clone();
    tokio::task::spawn_blocking(move || joiner.join_simulation()).await?;

    observing.store(false, Ordering::SeqCst);
    if observer.join().is_err() {
        warn!("Observer thread panicked");
    }

    if config.record_replay {
        check_replay(&server);
    }

    info!("Server stopped after {} ticks", server.world().current_tick());
    Ok(())
}

/// Build the server configuration from `EMPIRES_*` variables.
fn config_from_env() -> anyhow::Result<ServerConfig> {
    let mut config = ServerConfig::default();
    if let Some(bind) = env_var("EMPIRES_BIND")? {
        config.bind_addr = bind;
    }
    if let Some(rate) = env_var("EMPIRES_TICK_RATE")? {
        config.tick_rate = rate;
    }
    if let Some(speed) = env_var("EMPIRES_SPEED")? {
        config.game_speed = speed;
    }
    if let Some(min_peers) = env_var("EMPIRES_MIN_PEERS")? {
        config.min_peers = min_peers;
    }
    if let Some(seed) = env_var("EMPIRES_SEED")? {
        config.scenario.seed = seed;
    }
    if let Some(record) = env_var::<u8>("EMPIRES_RECORD")? {
        config.record_replay = record != 0;
    }
    Ok(config)
}

fn env_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {}={:?}", name, raw)),
        Err(_) => Ok(None),
    }
}

/// Periodically snapshot the world without ever blocking the simulation.
fn spawn_observer(world: Arc<World>, running: Arc<AtomicBool>) -> anyhow::Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("observer".into())
        .spawn(move || {
            let mut view = GameView::new();
            while running.load(Ordering::SeqCst) {
                thread::sleep(OBSERVE_PERIOD);
                if !view.try_read(&*world) {
                    debug!("World busy, keeping previous snapshot");
                    continue;
                }
                if view.entities.is_empty() {
                    continue;
                }
                let alive = view.players.iter().filter(|p| !p.is_neutral() && p.alive).count();
                info!(
                    "Tick {}: {} entities, {} players alive",
                    view.tick,
                    view.entities.len(),
                    alive,
                );
            }
        })
        .context("spawning observer thread")?;
    Ok(handle)
}

/// Re-simulate the recorded session and compare state hashes.
fn check_replay(server: &GameServer) {
    let Some(log) = server.take_replay() else {
        warn!("Replay recording was enabled but nothing was recorded");
        return;
    };
    info!(
        "Replaying {} commands over {} ticks",
        log.command_count(),
        log.ticks,
    );
    match verify(&log) {
        Ok(_) => info!("DETERMINISM VERIFIED: {}", hex::encode(log.final_hash)),
        Err(e) => warn!("DETERMINISM FAILURE: {}", e),
    }
}

//! Replays
//!
//! A session is fully determined by its scenario and the command batches
//! pumped at each tick. Recording those is enough to rebuild the world and
//! check it ends in the same state.

use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::hash::StateHash;
use crate::game::command::Command;
use crate::game::scenario::ScenarioSettings;
use crate::game::world::{World, WorldError};

/// Commands applied by one pump, and the tick count at that moment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFrame {
    /// Ticks simulated before the pump
    pub tick: u32,
    /// Batch in arrival order
    pub commands: Vec<Command>,
}

/// Everything needed to re-run a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayLog {
    /// Scenario the session started from
    pub scenario: ScenarioSettings,
    /// Pumped batches, in order
    pub frames: Vec<ReplayFrame>,
    /// Ticks simulated when the log was taken
    pub ticks: u32,
    /// State hash when the log was taken
    pub final_hash: StateHash,
}

/// Replay failures.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Log could not be encoded or decoded.
    #[error("replay codec: {0}")]
    Codec(#[from] bincode::Error),

    /// Recorded scenario could not be set up.
    #[error("replay world: {0}")]
    World(#[from] WorldError),

    /// Re-run ended in a different state.
    #[error("hash mismatch after {ticks} ticks: expected {expected}, got {actual}")]
    HashMismatch {
        /// Ticks simulated
        ticks: u32,
        /// Recorded hash, hex
        expected: String,
        /// Re-run hash, hex
        actual: String,
    },
}

impl ReplayLog {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplayError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReplayError> {
        Ok(bincode::deserialize(data)?)
    }

    /// Total commands recorded.
    pub fn command_count(&self) -> usize {
        self.frames.iter().map(|f| f.commands.len()).sum()
    }
}

/// Re-run a log from scratch. Returns the rebuilt world.
pub fn replay(log: &ReplayLog) -> Result<World, ReplayError> {
    let world = World::new(log.scenario.clone())?;
    world.startup()?;

    let mut frames = log.frames.iter().peekable();
    loop {
        let tick = world.current_tick();
        while let Some(frame) = frames.next_if(|f| f.tick == tick) {
            for cmd in &frame.commands {
                world.enqueue(cmd.clone());
            }
            let report = world.pump_events();
            debug!("Replayed {} commands at tick {}", report.applied + report.rejected, tick);
        }
        if tick >= log.ticks || world.is_over() {
            break;
        }
        world.tick();
    }
    Ok(world)
}

/// Re-run a log and check it reproduces the recorded final state.
pub fn verify(log: &ReplayLog) -> Result<World, ReplayError> {
    let world = replay(log)?;
    let actual = world.compute_hash();
    if actual != log.final_hash {
        return Err(ReplayError::HashMismatch {
            ticks: world.current_tick(),
            expected: hex::encode(log.final_hash),
            actual: hex::encode(actual),
        });
    }
    info!("Replay verified: {} ticks, {} commands", log.ticks, log.command_count());
    Ok(world)
}

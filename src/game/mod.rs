//! Game Logic Module
//!
//! All simulation code. Deterministic for a given scenario and command
//! sequence.
//!
//! ## Module Structure
//!
//! - `entity`: Entity types, stats and the per-entity state machine
//! - `player`: Seats, stockpiles, ownership and defeat
//! - `terrain`: Tile grid, generation and chunk transfer
//! - `scenario`: Scenario settings and validation
//! - `command`: Inbound commands
//! - `events`: Outbound events
//! - `world`: The authoritative world and its tick
//! - `view`: Non-blocking snapshots
//! - `replica`: Event-driven client mirror
//! - `tick`: Wall-clock to tick pacing
//! - `replay`: Command log recording and verification

pub mod entity;
pub mod player;
pub mod terrain;
pub mod scenario;
pub mod command;
pub mod events;
pub mod world;
pub mod view;
pub mod replica;
pub mod tick;
pub mod replay;

// Re-export key types
pub use entity::{Entity, EntityRef, EntityState, EntityType, Task};
pub use player::{Player, ResourceKind, Resources};
pub use terrain::{Terrain, TerrainChunk};
pub use scenario::{PlayerSetting, ScenarioSettings};
pub use command::{Command, CommandError, PeerId, TaskKind, ViewRect};
pub use events::{EntityUpdate, GameEvent, ScenarioVars};
pub use world::{PumpReport, TickResult, World, WorldError};
pub use view::{GameView, Observable};
pub use replica::Replica;
pub use tick::{StepPlan, TickClock};
pub use replay::{ReplayError, ReplayLog};

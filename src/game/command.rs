//! Inbound Commands
//!
//! Requests from peers that mutate the world. They are queued by the network
//! layer and applied in arrival order at the start of each loop iteration.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::fixed::Fixed;
use crate::game::entity::EntityRef;
use crate::game::terrain::{TerrainChunk, TerrainError};

/// Connected peer identifier, assigned by the server on connect.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Camera rectangle of a peer, in tiles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRect {
    /// Left
    pub x: i32,
    /// Top
    pub y: i32,
    /// Width
    pub w: u32,
    /// Height
    pub h: u32,
}

/// What an entity task asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Walk to a point
    Move {
        /// Destination x (Q16.16 tiles)
        x: Fixed,
        /// Destination y (Q16.16 tiles)
        y: Fixed,
    },
    /// Do whatever fits the target: attack, gather or convert
    Interact {
        /// Target entity
        target: EntityRef,
    },
}

/// A world-mutating request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Kill an entity outright.
    EntityKill {
        /// Victim
        target: EntityRef,
    },
    /// Record where a peer is looking.
    CameraMove {
        /// Peer that moved its camera
        peer: PeerId,
        /// New view
        view: ViewRect,
    },
    /// Give a unit a task.
    EntityTask {
        /// Unit receiving the task
        source: EntityRef,
        /// The task
        task: TaskKind,
    },
    /// Overwrite a terrain region. Only accepted in cheat-enabled scenarios.
    TerrainMod(TerrainChunk),
}

/// Discriminant of [`Command`], for logging and dispatch coverage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandKind {
    /// [`Command::EntityKill`]
    EntityKill,
    /// [`Command::CameraMove`]
    CameraMove,
    /// [`Command::EntityTask`]
    EntityTask,
    /// [`Command::TerrainMod`]
    TerrainMod,
}

impl CommandKind {
    /// Every command kind.
    pub const ALL: [CommandKind; 4] = [
        CommandKind::EntityKill,
        CommandKind::CameraMove,
        CommandKind::EntityTask,
        CommandKind::TerrainMod,
    ];
}

impl Command {
    /// Discriminant of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::EntityKill { .. } => CommandKind::EntityKill,
            Command::CameraMove { .. } => CommandKind::CameraMove,
            Command::EntityTask { .. } => CommandKind::EntityTask,
            Command::TerrainMod(_) => CommandKind::TerrainMod,
        }
    }
}

/// Why a single command was dropped. Never fatal to the session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    /// Reference is stale or never existed.
    #[error("entity {0} not found")]
    EntityNotFound(EntityRef),

    /// Entity exists but cannot take this command.
    #[error("entity {0} cannot take tasks")]
    NotTaskable(EntityRef),

    /// Unit is already dying or decaying.
    #[error("entity {0} is already dead")]
    AlreadyDead(EntityRef),

    /// No interaction fits the source/target pair.
    #[error("entity {unit} cannot interact with {target}")]
    InvalidTarget {
        /// Unit given the task
        unit: EntityRef,
        /// Requested target
        target: EntityRef,
    },

    /// Terrain modification without cheats enabled.
    #[error("terrain modification requires cheats")]
    CheatsDisabled,

    /// Terrain chunk could not be applied.
    #[error("terrain: {0}")]
    Terrain(#[from] TerrainError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::idpool::IdRef;

    #[test]
    fn test_kind_matches_variant() {
        let cmds = [
            Command::EntityKill { target: IdRef::new(0, 0) },
            Command::CameraMove { peer: PeerId(1), view: ViewRect::default() },
            Command::EntityTask {
                source: IdRef::new(1, 0),
                task: TaskKind::Interact { target: IdRef::new(2, 0) },
            },
            Command::TerrainMod(TerrainChunk::default()),
        ];
        let kinds: Vec<_> = cmds.iter().map(Command::kind).collect();
        assert_eq!(kinds, CommandKind::ALL.to_vec());
    }

    #[test]
    fn test_error_messages() {
        let err = CommandError::EntityNotFound(IdRef::new(4, 3));
        assert_eq!(err.to_string(), "entity #4v3 not found");
        assert_eq!(PeerId(3).to_string(), "peer3");
    }
}

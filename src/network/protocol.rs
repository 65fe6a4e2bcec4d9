//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is one JSON text message.

use serde::{Serialize, Deserialize};

use crate::game::command::{Command, PeerId, TaskKind, ViewRect};
use crate::game::entity::EntityRef;
use crate::game::events::GameEvent;
use crate::game::terrain::TerrainChunk;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Introduce the peer and optionally claim a seat.
    Hello {
        /// Display name
        username: String,
        /// Seat to play, if any
        #[serde(default)]
        seat: Option<u8>,
    },

    /// A world command.
    Command(ClientCommand),

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },

    /// Peer is leaving.
    Leave,
}

/// World commands as sent by a client. The server fills in the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Kill an entity.
    EntityKill {
        /// Victim
        target: EntityRef,
    },
    /// Report the camera rectangle.
    CameraMove {
        /// New view
        view: ViewRect,
    },
    /// Task a unit.
    EntityTask {
        /// Unit
        source: EntityRef,
        /// Task
        task: TaskKind,
    },
    /// Overwrite terrain (cheat scenarios only).
    TerrainMod(TerrainChunk),
}

impl ClientCommand {
    /// World command on behalf of `peer`.
    pub fn into_command(self, peer: PeerId) -> Command {
        match self {
            ClientCommand::EntityKill { target } => Command::EntityKill { target },
            ClientCommand::CameraMove { view } => Command::CameraMove { peer, view },
            ClientCommand::EntityTask { source, task } => Command::EntityTask { source, task },
            ClientCommand::TerrainMod(chunk) => Command::TerrainMod(chunk),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `hello`.
    Welcome {
        /// Id assigned to this connection
        peer: PeerId,
        /// Seat assigned, `None` for spectators
        seat: Option<u8>,
        /// Server instance id
        server_id: String,
        /// Server version
        server_version: String,
        /// Whether the session is already running
        session_started: bool,
    },

    /// Simulation event.
    Event(GameEvent),

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server clock, ms since the epoch
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why
        reason: String,
    },
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Error with a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or unexpected message.
    InvalidInput,
    /// Command sent before `hello`.
    NotIdentified,
    /// Command sent before the session started.
    NotStarted,
    /// Seat taken or out of range.
    SeatUnavailable,
    /// Too many connections.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<GameEvent> for ServerMessage {
    fn from(event: GameEvent) -> Self {
        ServerMessage::Event(event)
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

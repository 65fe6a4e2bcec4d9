//! Network Layer
//!
//! WebSocket server for real-time multiplayer communication.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod protocol;
pub mod session;
pub mod server;

pub use protocol::{ClientCommand, ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use session::{Broadcast, PeerIdentity, PeerRegistry, SessionError};
pub use server::{run_simulation, GameServer, GameServerError, ServerConfig};

//! # Empires Server
//!
//! Authoritative real-time strategy simulation with event-based state sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EMPIRES SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  ├── hash.rs     - State hashing for verification            │
//! │  └── idpool.rs   - Slotmap entity handles                    │
//! │                                                              │
//! │  game/           - Simulation (deterministic)                │
//! │  ├── entity.rs   - Units, buildings, resources               │
//! │  ├── player.rs   - Seats, stockpiles, defeat                 │
//! │  ├── terrain.rs  - Tile grid                                 │
//! │  ├── world.rs    - Command pump, tick, event push            │
//! │  ├── view.rs     - Non-blocking snapshots                    │
//! │  ├── replica.rs  - Client-side mirror                        │
//! │  ├── tick.rs     - Wall-clock pacing                         │
//! │  └── replay.rs   - Command log and verification              │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── server.rs   - WebSocket server, simulation thread       │
//! │  ├── protocol.rs - Message types                             │
//! │  └── session.rs  - Peer registry and broadcast               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - Wall-clock time only decides *how many* ticks run, never their outcome
//! - All randomness from seeded Xorshift128+
//!
//! Given the same scenario and the same command log, two worlds end in
//! the same state hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::FixedVec2;
pub use core::rng::DeterministicRng;
pub use core::idpool::{IdPool, IdRef};
pub use game::{Command, GameEvent, GameView, Replica, ScenarioSettings, World, WorldError};
pub use network::{GameServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Base simulation rate (Hz) at game speed 1.0.
pub const DEFAULT_TICKS_PER_SECOND: u32 = 20;

/// Seats per scenario, including the neutral seat 0.
pub const MAX_PLAYERS: usize = 9;

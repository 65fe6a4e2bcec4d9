//! Peer Sessions
//!
//! Registry of connected peers and their outbound queues. Shared between the
//! async connection tasks and the simulation thread, so it uses a plain
//! mutex and non-blocking `try_send`; nothing here ever awaits.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::core::rng::DeterministicRng;
use crate::game::command::PeerId;
use crate::game::events::GameEvent;
use crate::game::scenario::{civ_leaders, ScenarioSettings, DEFAULT_PLAYER_NAME, NEUTRAL_PLAYER_NAME};
use crate::network::protocol::ServerMessage;

/// RNG stream used for leader names (terrain uses stream 0).
const NAME_STREAM: u64 = 1;

/// Who a peer said it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Display name
    pub username: String,
    /// Seat played, `None` for spectators
    pub seat: Option<u8>,
}

/// One connected peer.
#[derive(Debug)]
struct PeerSession {
    addr: SocketAddr,
    identity: Option<PeerIdentity>,
    /// Serialized frames for the peer's writer task
    sender: mpsc::Sender<String>,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Peer is not registered.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// Peer already sent `hello`.
    #[error("peer {0} already identified")]
    AlreadyIdentified(PeerId),

    /// Seat claimed by another peer.
    #[error("seat {0} already taken")]
    SeatTaken(u8),

    /// Seat is neutral or beyond the roster.
    #[error("seat {seat} not playable with {seats} seats")]
    SeatOutOfRange {
        /// Requested seat
        seat: u8,
        /// Roster size
        seats: usize,
    },

    /// Outbound queue full or closed.
    #[error("peer {0} not accepting messages")]
    Unreachable(PeerId),

    /// Message could not be serialized.
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Fan-out of server messages to every connected peer.
pub trait Broadcast {
    /// Send to every peer. Failing peers are dropped; the rest still receive.
    fn broadcast(&self, msg: &ServerMessage);

    /// Broadcast events in order.
    fn broadcast_events(&self, events: &[GameEvent]) {
        for event in events {
            self.broadcast(&ServerMessage::Event(event.clone()));
        }
    }
}

// =============================================================================
// PEER REGISTRY
// =============================================================================

/// All connected peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Mutex<BTreeMap<PeerId, PeerSession>>,
    next_id: AtomicU32,
}

impl PeerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PeerId, PeerSession>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a freshly connected peer.
    pub fn register(&self, addr: SocketAddr, sender: mpsc::Sender<String>) -> PeerId {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(id, PeerSession { addr, identity: None, sender });
        debug!("Registered {} from {}", id, addr);
        id
    }

    /// Record a peer's `hello`.
    ///
    /// A requested seat must be playable and free. Without a request the
    /// peer gets the lowest free seat, or spectates if none is left.
    pub fn identify(
        &self,
        peer: PeerId,
        username: String,
        requested: Option<u8>,
        seats: usize,
    ) -> Result<Option<u8>, SessionError> {
        let mut peers = self.lock();
        let taken: Vec<u8> = peers.values().filter_map(|p| p.identity.as_ref()?.seat).collect();

        let session = peers.get(&peer).ok_or(SessionError::UnknownPeer(peer))?;
        if session.identity.is_some() {
            return Err(SessionError::AlreadyIdentified(peer));
        }

        let seat = match requested {
            Some(seat) if seat == 0 || seat as usize >= seats => {
                return Err(SessionError::SeatOutOfRange { seat, seats });
            }
            Some(seat) if taken.contains(&seat) => return Err(SessionError::SeatTaken(seat)),
            Some(seat) => Some(seat),
            None => (1..seats).map(|s| s as u8).find(|s| !taken.contains(s)),
        };

        if let Some(session) = peers.get_mut(&peer) {
            session.identity = Some(PeerIdentity { username, seat });
        }
        Ok(seat)
    }

    /// Drop a peer. Returns its identity if it had one.
    pub fn remove(&self, peer: PeerId) -> Option<PeerIdentity> {
        let session = self.lock().remove(&peer)?;
        debug!("Removed {} ({})", peer, session.addr);
        session.identity
    }

    /// Send one message to one peer.
    pub fn send_to(&self, peer: PeerId, msg: &ServerMessage) -> Result<(), SessionError> {
        let text = msg.to_json()?;
        let peers = self.lock();
        let session = peers.get(&peer).ok_or(SessionError::UnknownPeer(peer))?;
        session.sender.try_send(text).map_err(|_| SessionError::Unreachable(peer))
    }

    /// Send a batch built while the registry is locked.
    ///
    /// No broadcast can interleave between building and queueing, so the
    /// batch lands in the peer's stream ahead of anything newer.
    pub fn send_all_with<F>(&self, peer: PeerId, build: F) -> Result<(), SessionError>
    where
        F: FnOnce() -> Vec<ServerMessage>,
    {
        let peers = self.lock();
        let session = peers.get(&peer).ok_or(SessionError::UnknownPeer(peer))?;
        for msg in build() {
            session
                .sender
                .try_send(msg.to_json()?)
                .map_err(|_| SessionError::Unreachable(peer))?;
        }
        Ok(())
    }

    /// Whether a peer has said hello.
    pub fn is_identified(&self, peer: PeerId) -> bool {
        self.lock().get(&peer).is_some_and(|p| p.identity.is_some())
    }

    /// Connected peers, in id order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.lock().keys().copied().collect()
    }

    /// Identities of peers that said hello, in id order.
    pub fn identities(&self) -> Vec<PeerIdentity> {
        self.lock().values().filter_map(|p| p.identity.clone()).collect()
    }

    /// Peers that said hello.
    pub fn identified_count(&self) -> usize {
        self.lock().values().filter(|p| p.identity.is_some()).count()
    }

    /// Connected peers.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Broadcast for PeerRegistry {
    fn broadcast(&self, msg: &ServerMessage) {
        let text = match msg.to_json() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to serialize broadcast: {}", e);
                return;
            }
        };

        let mut peers = self.lock();
        let mut failed = Vec::new();
        for (id, session) in peers.iter() {
            // peers that have not said hello get the full state later
            if session.identity.is_none() {
                continue;
            }
            match session.sender.try_send(text.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Outbound queue full for {}, dropping peer", id);
                    failed.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("{} went away", id);
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            peers.remove(&id);
        }
    }
}

// =============================================================================
// NAMES
// =============================================================================

/// Fill in seat names at session start.
///
/// Seat 0 is always the neutral name. A seat claimed by exactly one peer
/// takes that peer's username; otherwise a preset name is kept, and an
/// empty one becomes a leader of the seat's civilization.
pub fn resolve_player_names(scn: &mut ScenarioSettings, claims: &[PeerIdentity]) {
    let mut rng = DeterministicRng::for_stream(scn.seed, NAME_STREAM);

    for (seat, setting) in scn.players.iter_mut().enumerate() {
        if seat == 0 {
            setting.name = NEUTRAL_PLAYER_NAME.to_string();
            continue;
        }
        let mut claimants = claims.iter().filter(|c| c.seat.map(usize::from) == Some(seat));
        if let (Some(only), None) = (claimants.next(), claimants.next()) {
            setting.name = only.username.clone();
            continue;
        }
        if !setting.name.is_empty() {
            continue;
        }
        setting.name = civ_leaders(setting.civ)
            .and_then(|leaders| rng.choose(leaders))
            .map(|leader| leader.to_string())
            .unwrap_or_else(|| format!("{} {}", DEFAULT_PLAYER_NAME, seat));
    }
}

//! WebSocket Game Server
//!
//! Async WebSocket front end around one authoritative world.
//!
//! ```text
//!  connection tasks (tokio)            simulation thread (std)
//!  ───────────────────────             ───────────────────────
//!  hello   → PeerRegistry              startup → broadcast
//!  command → World::enqueue  ──queue──▶ pump → tick × N → push
//!  ◀────────── mpsc<String> ◀────────── broadcast (try_send)
//! ```
//!
//! The session starts once enough peers have said hello.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::command::PeerId;
use crate::game::events::GameEvent;
use crate::game::replay::ReplayLog;
use crate::game::scenario::ScenarioSettings;
use crate::game::tick::TickClock;
use crate::game::world::{World, WorldError};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::network::session::{resolve_player_names, Broadcast, PeerRegistry, SessionError};
use crate::DEFAULT_TICKS_PER_SECOND;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Base simulation rate (Hz).
    pub tick_rate: u32,
    /// Speed multiplier applied to the tick rate.
    pub game_speed: f64,
    /// Identified peers needed before the session starts.
    pub min_peers: usize,
    /// Outbound frames buffered per peer before it is dropped.
    pub outbound_buffer: usize,
    /// Most ticks simulated in one loop iteration.
    pub max_catch_up_steps: u32,
    /// Record pumped commands for replay.
    pub record_replay: bool,
    /// Scenario played.
    pub scenario: ScenarioSettings,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 64,
            tick_rate: DEFAULT_TICKS_PER_SECOND,
            game_speed: 1.0,
            min_peers: 1,
            outbound_buffer: 4096,
            max_catch_up_steps: 50,
            record_replay: false,
            scenario: ScenarioSettings::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// World setup error.
    #[error("World error: {0}")]
    World(#[from] WorldError),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// State shared by the accept loop, connection tasks and the simulation.
struct Shared {
    config: ServerConfig,
    server_id: Uuid,
    world: Arc<World>,
    peers: Arc<PeerRegistry>,
    started: AtomicBool,
    running: Arc<AtomicBool>,
    simulation: Mutex<Option<JoinHandle<()>>>,
}

/// The game server.
pub struct GameServer {
    shared: Arc<Shared>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server. Fails if the configured scenario is invalid.
    pub fn new(config: ServerConfig) -> Result<Self, GameServerError> {
        let world = World::new(config.scenario.clone())?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                server_id: Uuid::new_v4(),
                world: Arc::new(world),
                peers: Arc::new(PeerRegistry::new()),
                started: AtomicBool::new(false),
                running: Arc::new(AtomicBool::new(true)),
                simulation: Mutex::new(None),
            }),
            shutdown_tx,
        })
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server {} listening on {}", self.shared.server_id, listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.shared.peers.len() >= self.shared.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<String>(shared.config.outbound_buffer);
            // The registry holds the only sender; dropping the peer there
            // ends the writer, which closes the socket.
            let peer = shared.peers.register(addr, msg_tx);

            // Spawn message sender task
            let mut sender_task = tokio::spawn(async move {
                while let Some(text) = msg_rx.recv().await {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            // Handle incoming messages
            let mut writer_done = false;
            loop {
                tokio::select! {
                    _ = &mut sender_task => {
                        debug!("{} dropped from the registry, closing", peer);
                        writer_done = true;
                        break;
                    }
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", peer, e);
                                        Self::reply_error(&shared, peer, ErrorCode::InvalidInput, "Invalid message format");
                                        continue;
                                    }
                                };
                                if !Self::handle_client_message(&shared, peer, client_msg) {
                                    break;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                Self::reply_error(&shared, peer, ErrorCode::InvalidInput, "Binary frames are not supported");
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("{} disconnected", peer);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", peer, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        Self::reply(&shared, peer, &ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Removing the peer drops the last sender, so the writer flushes and exits.
            shared.peers.remove(peer);
            shared.world.forget_peer(peer);
            if !writer_done {
                let _ = sender_task.await;
            }
            info!("{} ({}) cleaned up", peer, addr);
        });
    }

    /// Handle a client message. Returns `false` when the peer is leaving.
    fn handle_client_message(shared: &Arc<Shared>, peer: PeerId, msg: ClientMessage) -> bool {
        match msg {
            ClientMessage::Hello { username, seat } => {
                Self::handle_hello(shared, peer, username, seat);
            }
            ClientMessage::Command(cmd) => {
                if !shared.peers.is_identified(peer) {
                    Self::reply_error(shared, peer, ErrorCode::NotIdentified, "Say hello first");
                } else if !shared.started.load(Ordering::SeqCst) {
                    Self::reply_error(shared, peer, ErrorCode::NotStarted, "Session has not started");
                } else {
                    shared.world.enqueue(cmd.into_command(peer));
                }
            }
            ClientMessage::Ping { timestamp } => {
                Self::reply(shared, peer, &ServerMessage::Pong {
                    timestamp,
                    server_time: SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis() as u64,
                });
            }
            ClientMessage::Leave => {
                debug!("{} leaving", peer);
                return false;
            }
        }
        true
    }

    /// Handle `hello`: assign a seat, welcome, then either catch the peer
    /// up on a running session or try to start one.
    fn handle_hello(shared: &Arc<Shared>, peer: PeerId, username: String, seat: Option<u8>) {
        let seats = shared.config.scenario.players.len();
        let seat = match shared.peers.identify(peer, username.clone(), seat, seats) {
            Ok(seat) => seat,
            Err(e @ (SessionError::SeatTaken(_) | SessionError::SeatOutOfRange { .. })) => {
                Self::reply_error(shared, peer, ErrorCode::SeatUnavailable, e.to_string());
                return;
            }
            Err(e) => {
                Self::reply_error(shared, peer, ErrorCode::InvalidInput, e.to_string());
                return;
            }
        };
        info!("{} is {} (seat {:?})", peer, username, seat);

        let started = shared.started.load(Ordering::SeqCst);
        Self::reply(shared, peer, &ServerMessage::Welcome {
            peer,
            seat,
            server_id: shared.server_id.to_string(),
            server_version: shared.config.version.clone(),
            session_started: started,
        });

        if started {
            let world = shared.world.clone();
            let result = shared.peers.send_all_with(peer, || {
                world.full_state().into_iter().map(ServerMessage::Event).collect()
            });
            if let Err(e) = result {
                warn!("Failed to send state to {}: {}, dropping peer", peer, e);
                shared.peers.remove(peer);
            }
        } else if let Err(e) = Self::maybe_start(shared) {
            error!("Failed to start session: {}", e);
        }
    }

    /// Start the session once enough peers have identified.
    fn maybe_start(shared: &Arc<Shared>) -> Result<(), GameServerError> {
        if shared.peers.identified_count() < shared.config.min_peers {
            return Ok(());
        }
        if shared
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let mut scenario = shared.config.scenario.clone();
        resolve_player_names(&mut scenario, &shared.peers.identities());
        if let Err(e) = shared.world.load_scenario(scenario) {
            shared.started.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        if shared.config.record_replay {
            shared.world.start_recording();
        }

        let world = shared.world.clone();
        let peers = shared.peers.clone();
        let running = shared.running.clone();
        let clock = TickClock::new(shared.config.tick_rate, shared.config.game_speed);
        let max_catch_up = shared.config.max_catch_up_steps;

        let handle = std::thread::Builder::new()
            .name("simulation".to_string())
            .spawn(move || {
                if let Err(e) = run_simulation(&world, &*peers, &running, clock, max_catch_up) {
                    error!("Simulation failed: {}", e);
                }
            })
            .map_err(|e| GameServerError::Internal(format!("spawn simulation: {}", e)))?;

        *shared.simulation.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("Session started with {} peers", shared.peers.identified_count());
        Ok(())
    }

    fn reply(shared: &Shared, peer: PeerId, msg: &ServerMessage) {
        if let Err(e) = shared.peers.send_to(peer, msg) {
            debug!("Reply to {} failed: {}", peer, e);
        }
    }

    fn reply_error(shared: &Shared, peer: PeerId, code: ErrorCode, message: impl Into<String>) {
        Self::reply(shared, peer, &ServerMessage::Error(ServerError::new(code, message)));
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the simulation thread to finish, if it was started.
    pub fn join_simulation(&self) {
        let handle = self.shared.simulation.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Simulation thread panicked");
            }
        }
    }

    /// The world being served.
    pub fn world(&self) -> &Arc<World> {
        &self.shared.world
    }

    /// Whether the session has started.
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Recorded command log, if recording was enabled.
    pub fn take_replay(&self) -> Option<ReplayLog> {
        self.shared.world.take_replay()
    }
}

/// The simulation loop.
///
/// Broadcasts the startup events, then repeats until `running` clears or the
/// session ends: pump commands, announce and run the ticks the clock allows,
/// push entity updates, sleep.
pub fn run_simulation<B: Broadcast + ?Sized>(
    world: &World,
    sink: &B,
    running: &AtomicBool,
    mut clock: TickClock,
    max_catch_up: u32,
) -> Result<(), WorldError> {
    sink.broadcast_events(&world.startup()?);
    let mut last = Instant::now();

    while running.load(Ordering::SeqCst) {
        sink.broadcast_events(&world.pump_events().events);

        let now = Instant::now();
        let plan = clock.advance(now - last);
        last = now;

        let mut steps = plan.steps;
        if steps > max_catch_up {
            warn!("Simulation {} ticks behind, running {}", steps, max_catch_up);
            steps = max_catch_up;
            clock.reset();
        }

        if steps > 0 && !world.is_over() {
            sink.broadcast(&ServerMessage::Event(GameEvent::GameTicks { count: steps }));
            for _ in 0..steps {
                let result = world.tick();
                sink.broadcast_events(&result.events);
                if result.game_over || !running.load(Ordering::SeqCst) {
                    break;
                }
            }
        }

        sink.broadcast_events(&world.push_events());

        if world.is_over() {
            info!("Session over after {} ticks", world.current_tick());
            break;
        }
        if let Some(sleep) = plan.sleep {
            std::thread::sleep(sleep);
        }
    }
    Ok(())
}

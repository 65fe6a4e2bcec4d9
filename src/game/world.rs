//! World
//!
//! The authoritative simulation. Two independent locks guard it:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  state lock   terrain, players, entity pool, dirty set, views │
//! │  queue lock   inbound commands waiting for the next pump      │
//! │  game_over    atomic flag, readable without either lock       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Network tasks only ever take the queue lock. The simulation thread takes
//! the state lock for each operation. Observers use `try_lock` on the state
//! lock and never wait.
//!
//! Each loop iteration: `pump_events` → `tick` × N → `push_events`.
//! Every operation returns the outbound events it produced; broadcasting is
//! the caller's job.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, info, instrument, warn};

use crate::core::fixed::{fixed_clamp, from_int, to_fixed};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::idpool::IdPool;
use crate::core::vec2::FixedVec2;
use crate::game::command::{Command, CommandError, PeerId, TaskKind, ViewRect};
use crate::game::entity::{
    DecayOutcome, Entity, EntityClass, EntityRef, EntityState, EntityType, Task, GATHER_AMOUNT,
};
use crate::game::events::{EntityUpdate, GameEvent, ScenarioVars};
use crate::game::player::Player;
use crate::game::replay::{ReplayFrame, ReplayLog};
use crate::game::scenario::{ScenarioSettings, DEFAULT_PLAYER_NAME, NEUTRAL_PLAYER_NAME};
use crate::game::terrain::{Terrain, TerrainChunk};

/// Edge of the terrain chunk sent at startup.
const INITIAL_CHUNK: u32 = 16;

/// Session-fatal world errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorldError {
    /// Scenario settings cannot be simulated.
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    /// Scenario or terrain change attempted while entities exist.
    #[error("session active with {live_entities} live entities")]
    SessionActive {
        /// Entities still in the pool
        live_entities: usize,
    },

    /// `startup` called twice.
    #[error("session already started")]
    AlreadyStarted,

    /// Seat index outside the roster.
    #[error("seat {seat} outside roster of {seats}")]
    InvalidSeat {
        /// Requested seat
        seat: u8,
        /// Roster size
        seats: usize,
    },

    /// Position off the map.
    #[error("position ({x}, {y}) outside the map")]
    OutOfBounds {
        /// Tile x
        x: i32,
        /// Tile y
        y: i32,
    },
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick
    pub events: Vec<GameEvent>,
    /// Whether the session is over after this tick
    pub game_over: bool,
}

/// Result of draining the inbound queue.
#[derive(Debug, Default)]
pub struct PumpReport {
    /// Commands applied
    pub applied: usize,
    /// Commands dropped with an error
    pub rejected: usize,
    /// Events produced by the applied commands
    pub events: Vec<GameEvent>,
}

// =============================================================================
// WORLD STATE (guarded by the state lock)
// =============================================================================

/// Everything behind the state lock.
#[derive(Debug)]
pub struct WorldState {
    scn: ScenarioSettings,
    terrain: Terrain,
    players: Vec<Player>,
    entities: IdPool<Entity>,
    views: BTreeMap<PeerId, ViewRect>,
    /// Entities changed since the last push
    dirty: BTreeSet<EntityRef>,
    /// Entities created since the last push
    added: Vec<EntityRef>,
    tick: u32,
    started: bool,
    recording: Option<Vec<ReplayFrame>>,
}

impl WorldState {
    fn new(scn: ScenarioSettings) -> Self {
        let mut state = Self {
            terrain: Terrain::new(scn.width, scn.height, scn.seed, scn.wrap),
            scn,
            players: Vec::new(),
            entities: IdPool::with_key(),
            views: BTreeMap::new(),
            dirty: BTreeSet::new(),
            added: Vec::new(),
            tick: 0,
            started: false,
            recording: None,
        };
        state.install_players();
        state
    }

    /// Active scenario.
    pub fn scenario(&self) -> &ScenarioSettings {
        &self.scn
    }

    /// The map.
    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    /// Players by seat.
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Entity pool.
    pub fn entities(&self) -> &IdPool<Entity> {
        &self.entities
    }

    /// Resolve an entity reference.
    pub fn entity(&self, id: EntityRef) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Entities awaiting an update broadcast.
    pub fn dirty(&self) -> &BTreeSet<EntityRef> {
        &self.dirty
    }

    /// Last camera rectangle reported by a peer.
    pub fn view(&self, peer: PeerId) -> Option<ViewRect> {
        self.views.get(&peer).copied()
    }

    /// Ticks simulated so far.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Build players from the scenario roster.
    ///
    /// Seat 0 is forced neutral. If every contestant shares one team, each
    /// gets a team of its own so the session has a win condition.
    fn install_players(&mut self) {
        let mut settings = self.scn.players.clone();
        if let Some(neutral) = settings.first_mut() {
            neutral.ai = true;
            neutral.team = 0;
            if neutral.name.is_empty() {
                neutral.name = NEUTRAL_PLAYER_NAME.to_string();
            }
        }

        let contestants = settings.get(1..).unwrap_or_default();
        let single_team = contestants.windows(2).all(|w| w[0].team == w[1].team);
        for (seat, setting) in settings.iter_mut().enumerate().skip(1) {
            if single_team {
                setting.team = seat as u8;
            }
            if setting.name.is_empty() {
                setting.name = format!("{} {}", DEFAULT_PLAYER_NAME, seat);
            }
        }

        let res = self.scn.res;
        self.players = settings
            .iter()
            .enumerate()
            .map(|(seat, setting)| Player::new(seat as u8, setting, res))
            .collect();
    }

    fn player_events(&self, events: &mut Vec<GameEvent>) {
        for p in &self.players {
            events.push(GameEvent::PlayerName { seat: p.seat, name: p.name.clone() });
            events.push(GameEvent::PlayerCiv { seat: p.seat, civ: p.civ });
            events.push(GameEvent::PlayerTeam { seat: p.seat, team: p.team });
        }
    }

    /// Insert an entity and give it to its owner (resources stay unowned).
    fn spawn(&mut self, kind: EntityType, color: u8, pos: FixedVec2) -> Result<EntityRef, WorldError> {
        if color as usize >= self.players.len() {
            return Err(WorldError::InvalidSeat { seat: color, seats: self.players.len() });
        }
        let (x, y) = pos.tile();
        if !self.terrain.contains(x, y) {
            return Err(WorldError::OutOfBounds { x, y });
        }
        let color = if kind.is_resource() { 0 } else { color };
        let id = self.entities.insert_with_key(|id| Entity::new(id, kind, color, pos));
        if !kind.is_resource() {
            self.players[color as usize].claim(id);
        }
        self.added.push(id);
        Ok(id)
    }

    fn spawn_logged(&mut self, kind: EntityType, color: u8, x: f64, y: f64) {
        let pos = FixedVec2::new(to_fixed(x), to_fixed(y));
        if let Err(e) = self.spawn(kind, color, pos) {
            warn!("Skipping {:?} for seat {}: {}", kind, color, e);
        }
    }

    /// Starting roster: base and army per seat, wildlife and resources
    /// for the neutral seat.
    fn create_entities(&mut self) {
        for seat in 1..self.players.len() {
            let color = seat as u8;
            let row = (1 + 3 * seat) as f64;
            self.spawn_logged(EntityType::TownCenter, color, 2.0, row);
            self.spawn_logged(EntityType::Barracks, color, 8.0, row);
            for (x, y) in [(5.0, row), (5.0, row + 1.0), (6.0, row), (6.0, row + 1.0)] {
                self.spawn_logged(EntityType::Villager, color, x, y);
            }
            self.spawn_logged(EntityType::Melee1, color, 11.0, row);
            self.spawn_logged(EntityType::Melee1, color, 11.0, row + 1.0);
        }

        self.spawn_logged(EntityType::Priest, 0, 2.5, 1.0);
        self.spawn_logged(EntityType::Priest, 0, 3.5, 1.0);
        self.spawn_logged(EntityType::Bird1, 0, 11.0, 6.0);
        self.spawn_logged(EntityType::Bird1, 0, 12.0, 6.0);
        self.spawn_logged(EntityType::Gazelle, 0, 14.0, 4.0);

        for (x, y) in [(0.0, 0.0), (0.0, 1.0), (1.0, 0.0), (1.0, 1.0)] {
            self.spawn_logged(EntityType::Berries, 0, x, y);
        }
        let trees = [
            EntityType::DesertTree1,
            EntityType::DesertTree2,
            EntityType::DesertTree3,
            EntityType::DesertTree4,
        ];
        for (i, kind) in trees.into_iter().enumerate() {
            self.spawn_logged(kind, 0, 2.0 + i as f64, 0.0);
        }
    }

    /// Drop an entity from every ownership set.
    fn release(&mut self, id: EntityRef) {
        for p in &mut self.players {
            p.release(id);
        }
    }

    /// Invalidate an entity and announce its removal.
    fn remove_entity(&mut self, id: EntityRef, events: &mut Vec<GameEvent>) {
        if self.entities.remove(id).is_some() {
            self.release(id);
            self.dirty.remove(&id);
            events.push(GameEvent::EntityKill { id });
        }
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Entity phase: step every unit, then resolve finished animations.
    fn tick_entities(&mut self, events: &mut Vec<GameEvent>) {
        let ids: Vec<EntityRef> = self.entities.keys().collect();
        for id in ids {
            let Some(entity) = self.entities.get(id) else {
                // removed earlier this tick
                continue;
            };
            if entity.kind.class() != EntityClass::Unit {
                continue;
            }
            let target = entity
                .task
                .and_then(|t| t.target())
                .and_then(|t| self.entities.get(t))
                .map(Entity::target_info);

            let Some(entity) = self.entities.get_mut(id) else {
                continue;
            };
            let mut dirty = entity.tick(target);
            let more = entity.imgtick(1);
            let state = entity.state;

            if !more {
                match state {
                    EntityState::Dying | EntityState::Decaying => match entity.decay() {
                        DecayOutcome::Linger | DecayOutcome::Converted => dirty = true,
                        DecayOutcome::Remove => {
                            self.remove_entity(id, events);
                            continue;
                        }
                    },
                    EntityState::Attack => {
                        dirty |= self.resolve_interaction(id, events);
                    }
                    EntityState::Alive | EntityState::Moving => {}
                }
            }

            if dirty {
                self.dirty.insert(id);
            }
        }
    }

    /// Apply a completed attack, gather or convert cycle.
    ///
    /// Returns whether the acting unit itself changed.
    fn resolve_interaction(&mut self, id: EntityRef, events: &mut Vec<GameEvent>) -> bool {
        let Some(unit) = self.entities.get(id) else {
            return false;
        };
        let (Some(task), color, attack) = (unit.task, unit.color, unit.stats().attack) else {
            return false;
        };

        match task {
            Task::Move { .. } => false,
            Task::Attack { target } => {
                let Some(victim) = self.entities.get_mut(target) else {
                    return false;
                };
                let destroyed = victim.hit(attack);
                let building = victim.kind.is_building();
                self.dirty.insert(target);
                if destroyed {
                    debug!("{} destroyed {}", id, target);
                    if building {
                        self.remove_entity(target, events);
                    } else {
                        self.release(target);
                    }
                }
                false
            }
            Task::Gather { target } => {
                let Some(stock) = self.entities.get_mut(target) else {
                    return false;
                };
                let Some((kind, _)) = stock.stats().resource else {
                    return false;
                };
                let got = stock.take(GATHER_AMOUNT);
                let depleted = stock.amount == 0;
                self.dirty.insert(target);
                if let Some(owner) = self.players.get_mut(color as usize) {
                    owner.resources.add(kind, got);
                }
                if depleted {
                    self.remove_entity(target, events);
                }
                false
            }
            Task::Convert { target } => {
                let Some(convert) = self.entities.get_mut(target) else {
                    return false;
                };
                if !convert.is_alive() || convert.color == color {
                    return false;
                }
                convert.color = color;
                self.release(target);
                if let Some(owner) = self.players.get_mut(color as usize) {
                    owner.claim(target);
                }
                self.dirty.insert(target);
                debug!("{} converted {} to seat {}", id, target, color);
                if let Some(priest) = self.entities.get_mut(id) {
                    priest.idle();
                }
                true
            }
        }
    }

    /// Player phase: defeat detection, then the surviving-team check.
    ///
    /// Returns the game-over event when the session just ended.
    fn tick_players(&mut self, events: &mut Vec<GameEvent>) -> Option<GameEvent> {
        for p in self.players.iter_mut().skip(1) {
            if p.check_defeat() {
                info!("Player {} ({}) has been defeated", p.seat, p.name);
                events.push(GameEvent::PlayerDied { seat: p.seat });
            }
        }

        // A solo session has no opponent to outlast.
        if self.players.len() <= 2 {
            return None;
        }

        let teams: BTreeSet<u8> = self
            .players
            .iter()
            .skip(1)
            .filter(|p| p.alive)
            .map(|p| p.team)
            .collect();
        if teams.len() > 1 {
            return None;
        }
        let winning_team = teams.first().copied();
        info!("Game over, winning team: {:?}", winning_team);
        Some(GameEvent::GameOver { winning_team })
    }

    // =========================================================================
    // COMMANDS
    // =========================================================================

    fn apply(&mut self, cmd: Command, events: &mut Vec<GameEvent>) -> Result<(), CommandError> {
        match cmd {
            Command::EntityKill { target } => self.entity_kill(target, events),
            Command::CameraMove { peer, view } => {
                self.views.insert(peer, view);
                Ok(())
            }
            Command::EntityTask { source, task } => self.entity_task(source, task),
            Command::TerrainMod(chunk) => self.terrain_mod(&chunk, events),
        }
    }

    fn entity_kill(&mut self, target: EntityRef, events: &mut Vec<GameEvent>) -> Result<(), CommandError> {
        let entity = self.entities.get_mut(target).ok_or(CommandError::EntityNotFound(target))?;
        if entity.kind.is_unit() {
            if !entity.die() {
                return Err(CommandError::AlreadyDead(target));
            }
            self.release(target);
            self.dirty.insert(target);
            return Ok(());
        }
        self.remove_entity(target, events);
        Ok(())
    }

    fn entity_task(&mut self, source: EntityRef, task: TaskKind) -> Result<(), CommandError> {
        let unit = self.entities.get(source).ok_or(CommandError::EntityNotFound(source))?;
        if !unit.kind.is_unit() || !unit.is_alive() {
            return Err(CommandError::NotTaskable(source));
        }

        let accepted = match task {
            TaskKind::Move { x, y } => {
                let to = FixedVec2::new(
                    fixed_clamp(x, 0, from_int(self.terrain.width() as i32)),
                    fixed_clamp(y, 0, from_int(self.terrain.height() as i32)),
                );
                self.entities.get_mut(source).is_some_and(|e| e.task_move(to))
            }
            TaskKind::Interact { target } => {
                let victim = self.entities.get(target).ok_or(CommandError::EntityNotFound(target))?;
                let task = infer_interaction(unit, victim)
                    .ok_or(CommandError::InvalidTarget { unit: source, target })?;
                self.entities.get_mut(source).is_some_and(|e| e.task_engage(task))
            }
        };
        if !accepted {
            return Err(CommandError::NotTaskable(source));
        }
        self.dirty.insert(source);
        Ok(())
    }

    fn terrain_mod(&mut self, chunk: &TerrainChunk, events: &mut Vec<GameEvent>) -> Result<(), CommandError> {
        if !self.scn.cheating {
            return Err(CommandError::CheatsDisabled);
        }
        let written = self.terrain.set(chunk)?;
        events.push(GameEvent::TerrainMod(written));
        Ok(())
    }

    fn hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.scn.seed, |h| {
            self.terrain.hash_into(h);
            h.update_u32(self.players.len() as u32);
            for p in &self.players {
                p.hash_into(h);
            }
            h.update_u32(self.entities.len() as u32);
            for (_, e) in self.entities.iter() {
                e.hash_into(h);
            }
        })
    }
}

/// Pick the interaction a unit performs on a target.
///
/// Gatherers harvest resources, converters take over other owners' units,
/// and anything with an attack hits other owners' units and buildings.
pub fn infer_interaction(unit: &Entity, target: &Entity) -> Option<Task> {
    if target.id == unit.id || !target.target_info().valid {
        return None;
    }
    let stats = unit.stats();
    let hostile = target.color != unit.color;
    match target.kind.class() {
        EntityClass::Resource => stats.gatherer.then_some(Task::Gather { target: target.id }),
        EntityClass::Unit if stats.converter && hostile => Some(Task::Convert { target: target.id }),
        EntityClass::Unit | EntityClass::Building if stats.attack > 0 && hostile => {
            Some(Task::Attack { target: target.id })
        }
        _ => None,
    }
}

// =============================================================================
// WORLD
// =============================================================================

/// The shared simulation handle.
#[derive(Debug)]
pub struct World {
    state: Mutex<WorldState>,
    queue: Mutex<Vec<Command>>,
    game_over: AtomicBool,
}

impl World {
    /// World for a scenario, with players installed and a flat map.
    pub fn new(scn: ScenarioSettings) -> Result<Self, WorldError> {
        scn.validate()?;
        Ok(Self {
            state: Mutex::new(WorldState::new(scn)),
            queue: Mutex::new(Vec::new()),
            game_over: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, Vec<Command>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking state access for observers.
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, WorldState>> {
        match self.state.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
        }
    }

    /// Read the state under the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&WorldState) -> R) -> R {
        f(&*self.lock())
    }

    /// Replace the scenario. Rejected while entities are live.
    #[instrument(skip(self, scn))]
    pub fn load_scenario(&self, scn: ScenarioSettings) -> Result<(), WorldError> {
        scn.validate()?;
        let mut st = self.lock();
        if !st.entities.is_empty() {
            return Err(WorldError::SessionActive { live_entities: st.entities.len() });
        }
        let recording = st.recording.take();
        *st = WorldState::new(scn);
        st.recording = recording;
        self.game_over.store(false, Ordering::SeqCst);
        info!("Scenario loaded: {}x{}, {} seats", st.scn.width, st.scn.height, st.players.len());
        Ok(())
    }

    /// Set up the session: terrain, players, starting roster.
    ///
    /// Returns the setup broadcast in order: start-game, scenario vars,
    /// per-seat name/civ/team, one entity-add per entity, the initial
    /// terrain chunk, and start-game again.
    #[instrument(skip(self))]
    pub fn startup(&self) -> Result<Vec<GameEvent>, WorldError> {
        let mut st = self.lock();
        if st.started {
            return Err(WorldError::AlreadyStarted);
        }
        if !st.entities.is_empty() {
            return Err(WorldError::SessionActive { live_entities: st.entities.len() });
        }

        let mut events = vec![GameEvent::StartGame, GameEvent::ScenarioVars(ScenarioVars::from(&st.scn))];

        let (w, h, seed, wrap) = (st.scn.width, st.scn.height, st.scn.seed, st.scn.wrap);
        st.terrain.resize(w, h, seed, wrap);
        st.terrain.generate();

        st.player_events(&mut events);
        st.create_entities();
        let added = std::mem::take(&mut st.added);
        for id in added {
            if let Some(e) = st.entities.get(id) {
                events.push(GameEvent::EntityAdd(e.clone()));
            }
        }
        events.push(GameEvent::TerrainMod(st.terrain.fetch(0, 0, INITIAL_CHUNK, INITIAL_CHUNK)));
        events.push(GameEvent::StartGame);

        st.started = true;
        info!("Session started with {} entities", st.entities.len());
        Ok(events)
    }

    /// Add an entity at runtime. Announced by the next `push_events`.
    pub fn spawn(&self, kind: EntityType, color: u8, pos: FixedVec2) -> Result<EntityRef, WorldError> {
        self.lock().spawn(kind, color, pos)
    }

    /// Queue a command for the next pump.
    pub fn enqueue(&self, cmd: Command) {
        self.lock_queue().push(cmd);
    }

    /// Commands waiting for the next pump.
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Apply every queued command in arrival order.
    ///
    /// A failing command is logged and skipped; the rest still apply.
    pub fn pump_events(&self) -> PumpReport {
        let batch = std::mem::take(&mut *self.lock_queue());
        let mut report = PumpReport::default();
        if batch.is_empty() {
            return report;
        }

        let mut st = self.lock();
        let tick = st.tick;
        if let Some(frames) = st.recording.as_mut() {
            frames.push(ReplayFrame { tick, commands: batch.clone() });
        }
        for cmd in batch {
            let kind = cmd.kind();
            match st.apply(cmd, &mut report.events) {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    report.rejected += 1;
                    warn!("Dropped {:?} command: {}", kind, e);
                }
            }
        }
        report
    }

    /// Advance one tick: entity phase, then player phase.
    pub fn tick(&self) -> TickResult {
        let mut result = TickResult::default();
        if self.is_over() {
            result.game_over = true;
            return result;
        }

        let mut st = self.lock();
        st.tick += 1;
        st.tick_entities(&mut result.events);
        if let Some(over) = st.tick_players(&mut result.events) {
            result.events.push(over);
            result.game_over = true;
            self.game_over.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Drain the added/dirty sets into entity-add and entity-update events.
    ///
    /// References that no longer resolve are skipped.
    pub fn push_events(&self) -> Vec<GameEvent> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let added = std::mem::take(&mut st.added);
        let dirty = std::mem::take(&mut st.dirty);

        let mut events = Vec::with_capacity(added.len() + dirty.len());
        for id in &added {
            if let Some(e) = st.entities.get(*id) {
                events.push(GameEvent::EntityAdd(e.clone()));
            }
        }
        for id in dirty {
            if added.contains(&id) {
                continue;
            }
            if let Some(e) = st.entities.get(id) {
                events.push(GameEvent::EntityUpdate(EntityUpdate::from(e)));
            }
        }
        events
    }

    /// End the session now.
    pub fn stop(&self) -> GameEvent {
        self.game_over.store(true, Ordering::SeqCst);
        info!("Session stopped");
        GameEvent::GameOver { winning_team: None }
    }

    /// Whether the session is over.
    pub fn is_over(&self) -> bool {
        self.game_over.load(Ordering::SeqCst)
    }

    /// Whether `startup` has run.
    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Ticks simulated so far.
    pub fn current_tick(&self) -> u32 {
        self.lock().tick
    }

    /// Copy a terrain region, clamped to the map.
    pub fn fetch_terrain(&self, x: u32, y: u32, w: u32, h: u32) -> TerrainChunk {
        self.lock().terrain.fetch(x, y, w, h)
    }

    /// Forget a disconnected peer's camera.
    pub fn forget_peer(&self, peer: PeerId) {
        self.lock().views.remove(&peer);
    }

    /// Everything a peer joining mid-session needs, in startup order.
    pub fn full_state(&self) -> Vec<GameEvent> {
        let st = self.lock();
        let mut events = vec![GameEvent::StartGame, GameEvent::ScenarioVars(ScenarioVars::from(&st.scn))];
        st.player_events(&mut events);
        for p in st.players.iter().filter(|p| !p.alive) {
            events.push(GameEvent::PlayerDied { seat: p.seat });
        }
        for (_, e) in st.entities.iter() {
            events.push(GameEvent::EntityAdd(e.clone()));
        }
        events.push(GameEvent::TerrainMod(st.terrain.fetch_all()));
        events.push(GameEvent::StartGame);
        events
    }

    /// Digest of the full state.
    pub fn compute_hash(&self) -> StateHash {
        self.lock().hash()
    }

    /// Record every pumped command batch from now on.
    pub fn start_recording(&self) {
        let mut st = self.lock();
        if st.recording.is_none() {
            st.recording = Some(Vec::new());
        }
    }

    /// Take the recorded log, stopping the recording.
    pub fn take_replay(&self) -> Option<ReplayLog> {
        let mut st = self.lock();
        let frames = st.recording.take()?;
        Some(ReplayLog {
            scenario: st.scn.clone(),
            frames,
            ticks: st.tick,
            final_hash: st.hash(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;
    use crate::core::idpool::IdRef;
    use crate::game::player::ResourceKind;
    use crate::game::scenario::PlayerSetting;

    fn two_player_world() -> World {
        World::new(ScenarioSettings::default()).unwrap()
    }

    fn at(x: i32, y: i32) -> FixedVec2 {
        FixedVec2::from_ints(x, y)
    }

    fn run(world: &World, ticks: u32) -> Vec<GameEvent> {
        let mut events = Vec::new();
        for _ in 0..ticks {
            events.extend(world.tick().events);
        }
        events
    }

    fn ownership_consistent(st: &WorldState) -> bool {
        st.entities.iter().all(|(id, e)| {
            let owners: Vec<u8> = st.players.iter().filter(|p| p.owns(id)).map(|p| p.seat).collect();
            match e.kind.class() {
                EntityClass::Resource => owners.is_empty(),
                _ if !e.is_alive() => owners.is_empty(),
                _ => owners == vec![e.color],
            }
        }) && st.players.iter().all(|p| p.entities.iter().all(|id| st.entities.contains_key(*id)))
    }

    #[test]
    fn test_startup_event_order() {
        let world = two_player_world();
        let events = world.startup().unwrap();

        assert_eq!(events.first(), Some(&GameEvent::StartGame));
        assert!(matches!(events[1], GameEvent::ScenarioVars(_)));
        assert_eq!(events.last(), Some(&GameEvent::StartGame));

        let adds = events.iter().filter(|e| matches!(e, GameEvent::EntityAdd(_))).count();
        let live = world.with_state(|st| st.entities.len());
        assert_eq!(adds, live);
        // 8 per seat, 5 neutral units, 8 resources
        assert_eq!(live, 2 * 8 + 5 + 8);

        let chunk = events.iter().rev().find_map(|e| match e {
            GameEvent::TerrainMod(c) => Some(c.clone()),
            _ => None,
        });
        let chunk = chunk.unwrap();
        assert_eq!((chunk.x, chunk.y, chunk.w, chunk.h), (0, 0, 16, 16));

        assert!(world.with_state(ownership_consistent));
        assert_eq!(world.startup(), Err(WorldError::AlreadyStarted));
    }

    #[test]
    fn test_neutral_resources_are_unowned() {
        let world = two_player_world();
        world.startup().unwrap();
        world.with_state(|st| {
            let berries: Vec<_> = st
                .entities
                .iter()
                .filter(|(_, e)| e.kind == EntityType::Berries)
                .map(|(id, _)| id)
                .collect();
            assert_eq!(berries.len(), 4);
            for id in berries {
                assert!(st.players.iter().all(|p| !p.owns(id)));
            }
            // neutral seat owns priests, birds and the gazelle
            assert_eq!(st.players[0].entities.len(), 5);
        });
    }

    #[test]
    fn test_single_team_gets_split() {
        let mut scn = ScenarioSettings::default();
        scn.players = vec![PlayerSetting::neutral(), PlayerSetting::human(0, 1), PlayerSetting::human(0, 1)];
        let world = World::new(scn).unwrap();
        world.with_state(|st| {
            assert_eq!(st.players[0].team, 0);
            assert_eq!(st.players[1].team, 1);
            assert_eq!(st.players[2].team, 2);
            assert_eq!(st.players[1].name, "Player 1");
        });
    }

    #[test]
    fn test_load_scenario_rejected_while_live() {
        let world = two_player_world();
        world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let err = world.load_scenario(ScenarioSettings::default()).unwrap_err();
        assert_eq!(err, WorldError::SessionActive { live_entities: 1 });
    }

    #[test]
    fn test_spawn_validation() {
        let world = two_player_world();
        assert_eq!(
            world.spawn(EntityType::Villager, 9, at(1, 1)),
            Err(WorldError::InvalidSeat { seat: 9, seats: 3 })
        );
        assert_eq!(
            world.spawn(EntityType::Villager, 1, at(48, 2)),
            Err(WorldError::OutOfBounds { x: 48, y: 2 })
        );
    }

    #[test]
    fn test_move_task_for_missing_entity_is_dropped() {
        let world = two_player_world();
        world.enqueue(Command::EntityTask {
            source: IdRef::new(99, 0),
            task: TaskKind::Move { x: FIXED_ONE, y: FIXED_ONE },
        });
        let report = world.pump_events();
        assert_eq!((report.applied, report.rejected), (0, 1));
        assert!(world.with_state(|st| st.dirty.is_empty()));
        assert!(world.push_events().is_empty());
    }

    #[test]
    fn test_bad_command_does_not_block_the_rest() {
        let world = two_player_world();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        world.push_events();

        world.enqueue(Command::EntityKill { target: IdRef::new(50, 3) });
        world.enqueue(Command::EntityTask { source: v, task: TaskKind::Move { x: 0, y: 0 } });
        let report = world.pump_events();
        assert_eq!((report.applied, report.rejected), (1, 1));
        assert_eq!(world.with_state(|st| st.entity(v).map(|e| e.state)), Some(EntityState::Moving));
    }

    #[test]
    fn test_every_command_kind_is_dispatched() {
        let mut scn = ScenarioSettings::default();
        scn.cheating = true;
        let world = World::new(scn).unwrap();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let tree = world.spawn(EntityType::DesertTree1, 0, at(4, 3)).unwrap();

        let cmds = [
            Command::EntityTask { source: v, task: TaskKind::Interact { target: tree } },
            Command::CameraMove { peer: PeerId(7), view: ViewRect { x: 1, y: 2, w: 10, h: 8 } },
            Command::TerrainMod(TerrainChunk { x: 0, y: 0, w: 1, h: 1, tiles: vec![1], heights: vec![2] }),
            Command::EntityKill { target: v },
        ];
        let mut seen: Vec<_> = cmds.iter().map(Command::kind).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), crate::game::command::CommandKind::ALL.len());

        for cmd in cmds {
            world.enqueue(cmd);
        }
        let report = world.pump_events();
        assert_eq!((report.applied, report.rejected), (4, 0));
        assert_eq!(world.with_state(|st| st.view(PeerId(7))), Some(ViewRect { x: 1, y: 2, w: 10, h: 8 }));
        assert!(report.events.iter().any(|e| matches!(e, GameEvent::TerrainMod(_))));
    }

    #[test]
    fn test_terrain_mod_needs_cheats() {
        let world = two_player_world();
        world.enqueue(Command::TerrainMod(TerrainChunk { x: 0, y: 0, w: 1, h: 1, tiles: vec![1], heights: vec![0] }));
        let report = world.pump_events();
        assert_eq!(report.rejected, 1);
        assert!(report.events.is_empty());
    }

    #[test]
    fn test_kill_unit_starts_dying_without_kill_event() {
        let world = two_player_world();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let _keep = world.spawn(EntityType::Villager, 1, at(9, 9)).unwrap();
        world.push_events();

        world.enqueue(Command::EntityKill { target: v });
        let report = world.pump_events();
        assert!(report.events.is_empty());
        world.with_state(|st| {
            assert_eq!(st.entity(v).map(|e| e.state), Some(EntityState::Dying));
            assert!(!st.players[1].owns(v));
            assert!(st.dirty.contains(&v));
        });

        // dying (10) then corpse (200) then removal
        let events = run(&world, 10 + 200 + 5);
        assert!(events.contains(&GameEvent::EntityKill { id: v }));
        assert!(world.with_state(|st| st.entity(v).is_none()));
    }

    #[test]
    fn test_kill_dying_unit_is_rejected() {
        let world = two_player_world();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let _keep = world.spawn(EntityType::Villager, 1, at(9, 9)).unwrap();

        world.enqueue(Command::EntityKill { target: v });
        assert_eq!(world.pump_events().applied, 1);

        world.enqueue(Command::EntityKill { target: v });
        let report = world.pump_events();
        assert_eq!((report.applied, report.rejected), (0, 1));

        // still rejected once the corpse starts decaying
        let mut ticks = 0;
        while world.with_state(|st| st.entity(v).map(|e| e.state)) != Some(EntityState::Decaying) {
            world.tick();
            ticks += 1;
            assert!(ticks < 50);
        }
        let err = world.lock().entity_kill(v, &mut Vec::new());
        assert_eq!(err, Err(CommandError::AlreadyDead(v)));
        assert!(!world.with_state(|st| st.players[1].owns(v)));
    }

    #[test]
    fn test_kill_building_emits_kill_immediately() {
        let world = two_player_world();
        let tc = world.spawn(EntityType::TownCenter, 1, at(2, 4)).unwrap();
        world.enqueue(Command::EntityKill { target: tc });
        let report = world.pump_events();
        assert_eq!(report.events, vec![GameEvent::EntityKill { id: tc }]);
        world.with_state(|st| {
            assert!(st.entity(tc).is_none());
            assert!(!st.players[1].owns(tc));
        });
        // added then removed before any push: nothing to announce
        assert!(world.push_events().is_empty());
    }

    #[test]
    fn test_removed_entity_never_reported_dirty() {
        let world = two_player_world();
        let tc = world.spawn(EntityType::Barracks, 1, at(8, 4)).unwrap();
        world.push_events();
        {
            let mut st = world.lock();
            st.dirty.insert(tc);
        }
        world.enqueue(Command::EntityKill { target: tc });
        world.pump_events();
        assert!(world.push_events().is_empty());
    }

    #[test]
    fn test_last_entity_removal_defeats_in_same_tick() {
        let world = two_player_world();
        let a = world.spawn(EntityType::Melee1, 1, at(3, 3)).unwrap();
        let _b = world.spawn(EntityType::Melee1, 2, at(20, 20)).unwrap();

        world.enqueue(Command::EntityKill { target: a });
        world.pump_events();
        let result = world.tick();
        assert!(result.events.contains(&GameEvent::PlayerDied { seat: 1 }));
        assert!(result.game_over);
        assert!(result.events.contains(&GameEvent::GameOver { winning_team: Some(2) }));
        assert!(world.is_over());
        assert!(!world.with_state(|st| st.players[1].alive));

        // Further ticks are no-ops
        assert!(world.tick().events.is_empty());
    }

    #[test]
    fn test_solo_session_never_ends() {
        let mut scn = ScenarioSettings::default();
        scn.players.truncate(2);
        let world = World::new(scn).unwrap();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        world.enqueue(Command::EntityKill { target: v });
        world.pump_events();

        let result = world.tick();
        assert!(result.events.contains(&GameEvent::PlayerDied { seat: 1 }));
        assert!(!result.game_over);
        assert!(!world.is_over());
    }

    #[test]
    fn test_neutral_seat_is_never_defeated() {
        let world = two_player_world();
        world.startup().unwrap();
        let neutral: Vec<EntityRef> = world.with_state(|st| {
            st.entities.iter().filter(|(_, e)| e.color == 0).map(|(id, _)| id).collect()
        });
        assert!(!neutral.is_empty());
        for id in &neutral {
            world.enqueue(Command::EntityKill { target: *id });
        }
        assert_eq!(world.pump_events().applied, neutral.len());
        assert!(world.with_state(|st| st.players[0].entities.is_empty()));

        let events = run(&world, 250);
        assert!(!events.contains(&GameEvent::PlayerDied { seat: 0 }));
        assert!(!events.iter().any(|e| matches!(e, GameEvent::GameOver { .. })));
        assert!(!world.is_over());
        world.with_state(|st| {
            assert!(st.players[0].alive);
            assert!(st.players[0].entities.is_empty());
            assert!(ownership_consistent(st));
        });

        // the decision is between the real seats only
        let seat2: Vec<EntityRef> = world.with_state(|st| st.players[2].entities.iter().copied().collect());
        for id in seat2 {
            world.enqueue(Command::EntityKill { target: id });
        }
        world.pump_events();
        let result = world.tick();
        assert!(result.game_over);
        assert!(result.events.contains(&GameEvent::GameOver { winning_team: Some(1) }));
        assert!(!result.events.contains(&GameEvent::PlayerDied { seat: 0 }));
        assert!(world.with_state(|st| st.players[0].alive));
    }

    #[test]
    fn test_surviving_team_of_two_seats_wins() {
        let mut scn = ScenarioSettings::default();
        scn.players = vec![
            PlayerSetting::neutral(),
            PlayerSetting::human(0, 1),
            PlayerSetting::human(0, 1),
            PlayerSetting::human(0, 2),
        ];
        let world = World::new(scn).unwrap();
        world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        world.spawn(EntityType::Villager, 2, at(4, 3)).unwrap();
        let c = world.spawn(EntityType::Villager, 3, at(5, 3)).unwrap();

        world.enqueue(Command::EntityKill { target: c });
        world.pump_events();
        let result = world.tick();
        assert!(result.game_over);
        assert!(result.events.contains(&GameEvent::GameOver { winning_team: Some(1) }));
    }

    #[test]
    fn test_melee_kills_enemy_unit() {
        let world = two_player_world();
        let attacker = world.spawn(EntityType::Melee1, 1, at(3, 3)).unwrap();
        let victim = world.spawn(EntityType::Villager, 2, at(5, 3)).unwrap();
        let _keep = world.spawn(EntityType::Villager, 2, at(30, 30)).unwrap();

        world.enqueue(Command::EntityTask { source: attacker, task: TaskKind::Interact { target: victim } });
        assert_eq!(world.pump_events().applied, 1);

        let mut dead = false;
        for _ in 0..300 {
            world.tick();
            assert!(world.with_state(ownership_consistent));
            if world.with_state(|st| st.entity(victim).map(|e| e.state)) == Some(EntityState::Dying) {
                dead = true;
                break;
            }
        }
        assert!(dead);
        world.with_state(|st| {
            assert!(!st.players[2].owns(victim));
            assert!(st.players[2].alive);
        });
        // attacker drops the task once the target is no longer valid
        world.tick();
        assert_eq!(world.with_state(|st| st.entity(attacker).map(|e| e.state)), Some(EntityState::Alive));
    }

    #[test]
    fn test_gathering_fills_stockpile_and_depletes() {
        let world = two_player_world();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let tree = world.spawn(EntityType::DesertTree3, 0, at(4, 3)).unwrap();
        let wood_before = world.with_state(|st| st.players[1].resources.get(ResourceKind::Wood));

        world.enqueue(Command::EntityTask { source: v, task: TaskKind::Interact { target: tree } });
        world.pump_events();

        let mut killed = false;
        for _ in 0..400 {
            if world.tick().events.contains(&GameEvent::EntityKill { id: tree }) {
                killed = true;
                break;
            }
        }
        assert!(killed);
        let wood_after = world.with_state(|st| st.players[1].resources.get(ResourceKind::Wood));
        assert_eq!(wood_after - wood_before, 75);
    }

    #[test]
    fn test_priest_converts_unit() {
        let world = two_player_world();
        let priest = world.spawn(EntityType::Priest, 1, at(3, 3)).unwrap();
        let target = world.spawn(EntityType::Melee1, 2, at(6, 3)).unwrap();
        let _keep = world.spawn(EntityType::Villager, 2, at(30, 30)).unwrap();

        world.enqueue(Command::EntityTask { source: priest, task: TaskKind::Interact { target } });
        world.pump_events();
        run(&world, 60);

        world.with_state(|st| {
            assert_eq!(st.entity(target).map(|e| e.color), Some(1));
            assert!(st.players[1].owns(target));
            assert!(!st.players[2].owns(target));
            assert_eq!(st.entity(priest).map(|e| e.state), Some(EntityState::Alive));
            assert!(ownership_consistent(st));
        });
    }

    #[test]
    fn test_interact_rejections() {
        let world = two_player_world();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let own_tc = world.spawn(EntityType::TownCenter, 1, at(8, 8)).unwrap();
        let bird = world.spawn(EntityType::Bird1, 0, at(9, 9)).unwrap();
        let berries = world.spawn(EntityType::Berries, 0, at(1, 1)).unwrap();

        world.enqueue(Command::EntityTask { source: v, task: TaskKind::Interact { target: own_tc } });
        world.enqueue(Command::EntityTask { source: bird, task: TaskKind::Interact { target: berries } });
        world.enqueue(Command::EntityTask { source: own_tc, task: TaskKind::Move { x: 0, y: 0 } });
        let report = world.pump_events();
        assert_eq!((report.applied, report.rejected), (0, 3));
    }

    #[test]
    fn test_hunted_gazelle_becomes_carcass() {
        let world = two_player_world();
        let v = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let gazelle = world.spawn(EntityType::Gazelle, 0, at(4, 3)).unwrap();

        world.enqueue(Command::EntityTask { source: v, task: TaskKind::Interact { target: gazelle } });
        world.pump_events();
        run(&world, 200);

        world.with_state(|st| {
            let carcass = st.entity(gazelle).unwrap();
            assert_eq!(carcass.kind, EntityType::Carcass);
            assert_eq!(carcass.amount, 150);
            assert!(!st.players[0].owns(gazelle));
        });
    }

    #[test]
    fn test_dirty_set_is_exact() {
        let world = two_player_world();
        let moving = world.spawn(EntityType::Villager, 1, at(3, 3)).unwrap();
        let idle = world.spawn(EntityType::Villager, 1, at(5, 5)).unwrap();
        let adds = world.push_events();
        assert_eq!(adds.len(), 2);

        world.enqueue(Command::EntityTask { source: moving, task: TaskKind::Move { x: from_int(10), y: from_int(3) } });
        world.pump_events();
        world.tick();
        let events = world.push_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            GameEvent::EntityUpdate(u) => assert_eq!(u.id, moving),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!events.iter().any(|e| matches!(e, GameEvent::EntityUpdate(u) if u.id == idle)));
        assert!(world.push_events().is_empty());
    }

    #[test]
    fn test_full_state_lists_every_entity() {
        let world = two_player_world();
        world.startup().unwrap();
        let events = world.full_state();
        let adds = events.iter().filter(|e| matches!(e, GameEvent::EntityAdd(_))).count();
        assert_eq!(adds, world.with_state(|st| st.entities.len()));
        let terrain = events.iter().find_map(|e| match e {
            GameEvent::TerrainMod(c) => Some((c.w, c.h)),
            _ => None,
        });
        assert_eq!(terrain, Some((48, 48)));
    }

    #[test]
    fn test_fetch_terrain_clamps() {
        let world = two_player_world();
        let chunk = world.fetch_terrain(40, 40, 16, 16);
        assert_eq!((chunk.w, chunk.h), (8, 8));
    }

    #[test]
    fn test_hash_tracks_state() {
        let a = two_player_world();
        let b = two_player_world();
        a.startup().unwrap();
        b.startup().unwrap();
        assert_eq!(a.compute_hash(), b.compute_hash());
        a.tick();
        assert_ne!(a.compute_hash(), b.compute_hash());
        b.tick();
        assert_eq!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_stop_sets_flag() {
        let world = two_player_world();
        assert_eq!(world.stop(), GameEvent::GameOver { winning_team: None });
        assert!(world.is_over());
        assert!(world.tick().game_over);
    }
}

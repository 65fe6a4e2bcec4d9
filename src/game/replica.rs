//! Replica
//!
//! Client-side mirror rebuilt purely from the outbound event stream. Used by
//! observers connected over the network and by tests that check the stream
//! carries everything needed to reproduce the server's state.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::debug;

use crate::game::entity::{Entity, EntityRef};
use crate::game::events::{GameEvent, ScenarioVars};
use crate::game::player::Player;
use crate::game::terrain::Terrain;
use crate::game::view::{GameView, Observable};

#[derive(Debug, Default)]
struct ReplicaState {
    scenario: Option<ScenarioVars>,
    terrain: Terrain,
    players: Vec<Player>,
    entities: BTreeMap<EntityRef, Entity>,
    start_markers: u32,
    ticks: u64,
    game_over: Option<Option<u8>>,
}

impl ReplicaState {
    fn player(&mut self, seat: u8) -> &mut Player {
        let seat = seat as usize;
        while self.players.len() <= seat {
            let next = self.players.len() as u8;
            self.players.push(Player::placeholder(next));
        }
        &mut self.players[seat]
    }

    /// Keep ownership sets in line with entity colours.
    fn reown(&mut self, id: EntityRef) {
        for p in &mut self.players {
            p.release(id);
        }
        let owner = match self.entities.get(&id) {
            Some(e) if e.is_alive() && !e.kind.is_resource() => e.color,
            _ => return,
        };
        self.player(owner).claim(id);
    }

    fn apply(&mut self, event: &GameEvent) {
        match event {
            GameEvent::StartGame => self.start_markers += 1,
            GameEvent::ScenarioVars(vars) => {
                self.terrain = Terrain::new(vars.width, vars.height, vars.seed, vars.wrap);
                for seat in 0..vars.players {
                    self.player(seat);
                }
                self.scenario = Some(vars.clone());
            }
            GameEvent::EntityAdd(entity) => {
                self.entities.insert(entity.id, entity.clone());
                self.reown(entity.id);
            }
            GameEvent::EntityUpdate(update) => {
                let Some(entity) = self.entities.get_mut(&update.id) else {
                    debug!("Update for unknown entity {}", update.id);
                    return;
                };
                entity.apply_update(update);
                self.reown(update.id);
            }
            GameEvent::EntityKill { id } => {
                self.entities.remove(id);
                for p in &mut self.players {
                    p.release(*id);
                }
            }
            GameEvent::TerrainMod(chunk) => {
                if let Err(e) = self.terrain.set(chunk) {
                    debug!("Ignoring terrain chunk: {}", e);
                }
            }
            GameEvent::PlayerName { seat, name } => self.player(*seat).name = name.clone(),
            GameEvent::PlayerCiv { seat, civ } => self.player(*seat).civ = *civ,
            GameEvent::PlayerTeam { seat, team } => self.player(*seat).team = *team,
            GameEvent::PlayerDied { seat } => self.player(*seat).alive = false,
            GameEvent::GameOver { winning_team } => self.game_over = Some(*winning_team),
            GameEvent::GameTicks { count } => self.ticks += u64::from(*count),
        }
    }
}

/// Event-driven mirror of a remote world.
#[derive(Debug, Default)]
pub struct Replica {
    state: Mutex<ReplicaState>,
}

impl Replica {
    /// Empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ReplicaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one event. Unknown references are ignored.
    pub fn apply(&self, event: &GameEvent) {
        self.lock().apply(event);
    }

    /// Apply a batch in order.
    pub fn apply_all<'a>(&self, events: impl IntoIterator<Item = &'a GameEvent>) {
        let mut st = self.lock();
        for event in events {
            st.apply(event);
        }
    }

    /// Whether the setup broadcast has been fully received.
    pub fn is_started(&self) -> bool {
        self.lock().start_markers >= 2
    }

    /// Ticks announced by heartbeats.
    pub fn ticks(&self) -> u64 {
        self.lock().ticks
    }

    /// `Some(winning_team)` once the session ended.
    pub fn game_over(&self) -> Option<Option<u8>> {
        self.lock().game_over
    }

    /// Scenario parameters, once received.
    pub fn scenario(&self) -> Option<ScenarioVars> {
        self.lock().scenario.clone()
    }

    /// Number of mirrored entities.
    pub fn entity_count(&self) -> usize {
        self.lock().entities.len()
    }
}

impl Observable for Replica {
    fn try_observe(&self, view: &mut GameView) -> bool {
        let st = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return false,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
        };
        view.sync_terrain(&st.terrain);
        view.players = st.players.clone();
        view.entities = st.entities.clone();
        view.tick = u32::try_from(st.ticks).unwrap_or(u32::MAX);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::command::{Command, TaskKind};
    use crate::game::entity::EntityType;
    use crate::game::events::EntityUpdate;
    use crate::game::scenario::ScenarioSettings;
    use crate::game::world::World;
    use crate::core::fixed::from_int;
    use crate::core::vec2::FixedVec2;

    /// Compare everything the wire carries; animation frames stay server-side.
    fn mirrored(world: &World, replica: &Replica) -> bool {
        let mut server = GameView::new();
        let mut client = GameView::new();
        if !(server.try_read(world) && client.try_read(replica)) {
            return false;
        }
        let project = |view: &GameView| -> Vec<EntityUpdate> {
            view.entities.values().map(EntityUpdate::from).collect()
        };
        project(&server) == project(&client)
    }

    #[test]
    fn test_startup_stream_rebuilds_world() {
        let world = World::new(ScenarioSettings::default()).unwrap();
        let replica = Replica::new();
        replica.apply_all(&world.startup().unwrap());

        assert!(replica.is_started());
        assert!(mirrored(&world, &replica));

        let mut client = GameView::new();
        client.try_read(&replica);
        let names: Vec<_> = client.players.iter().map(|p| p.name.clone()).collect();
        let expected: Vec<_> = world.with_state(|st| st.players().iter().map(|p| p.name.clone()).collect());
        assert_eq!(names, expected);
        assert_eq!(client.owned_by(2).count(), 8);
    }

    #[test]
    fn test_updates_keep_mirror_in_sync() {
        let world = World::new(ScenarioSettings::default()).unwrap();
        let replica = Replica::new();
        replica.apply_all(&world.startup().unwrap());

        let villager = world.with_state(|st| {
            st.entities()
                .iter()
                .find(|(_, e)| e.kind == EntityType::Villager && e.color == 1)
                .map(|(id, _)| id)
        });
        let villager = villager.unwrap();
        world.enqueue(Command::EntityTask {
            source: villager,
            task: TaskKind::Move { x: from_int(20), y: from_int(20) },
        });

        for _ in 0..30 {
            replica.apply_all(&world.pump_events().events);
            replica.apply_all(&world.tick().events);
            replica.apply_all(&world.push_events());
        }
        assert!(mirrored(&world, &replica));
    }

    #[test]
    fn test_unknown_references_are_ignored() {
        let replica = Replica::new();
        let world = World::new(ScenarioSettings::default()).unwrap();
        let id = world.spawn(EntityType::Villager, 1, FixedVec2::from_ints(3, 3)).unwrap();
        let update = world.with_state(|st| st.entity(id).map(EntityUpdate::from));

        replica.apply(&GameEvent::EntityUpdate(update.unwrap()));
        replica.apply(&GameEvent::EntityKill { id });
        assert_eq!(replica.entity_count(), 0);
    }

    #[test]
    fn test_heartbeats_and_game_over() {
        let replica = Replica::new();
        replica.apply(&GameEvent::GameTicks { count: 3 });
        replica.apply(&GameEvent::GameTicks { count: 2 });
        assert_eq!(replica.ticks(), 5);
        assert_eq!(replica.game_over(), None);
        replica.apply(&GameEvent::GameOver { winning_team: Some(1) });
        assert_eq!(replica.game_over(), Some(Some(1)));
    }
}

//! Snapshots
//!
//! Read-only copies of world state for observers outside the simulation
//! thread. Reads never block: if the source is busy the snapshot keeps its
//! previous contents and the caller retries later.

use std::collections::BTreeMap;

use crate::game::entity::{Entity, EntityRef};
use crate::game::player::Player;
use crate::game::terrain::Terrain;
use crate::game::world::World;

/// A source a [`GameView`] can be refreshed from without blocking.
pub trait Observable {
    /// Copy the current state into `view`.
    ///
    /// Returns `false` (leaving `view` untouched) when the state is locked
    /// by someone else.
    fn try_observe(&self, view: &mut GameView) -> bool;
}

/// Point-in-time copy of terrain, players and entities.
#[derive(Clone, Debug, Default)]
pub struct GameView {
    /// Map
    pub terrain: Terrain,
    /// Players by seat
    pub players: Vec<Player>,
    /// Entities by reference
    pub entities: BTreeMap<EntityRef, Entity>,
    /// Tick the copy was taken at
    pub tick: u32,
}

impl GameView {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh from `source`. Returns whether the copy happened.
    pub fn try_read<O: Observable + ?Sized>(&mut self, source: &O) -> bool {
        source.try_observe(self)
    }

    /// Entity by reference, if present in the snapshot.
    pub fn try_get(&self, id: EntityRef) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Entities owned by a seat.
    pub fn owned_by(&self, seat: u8) -> impl Iterator<Item = &Entity> + '_ {
        self.players
            .get(seat as usize)
            .into_iter()
            .flat_map(|p| p.entities.iter())
            .filter_map(|id| self.entities.get(id))
    }

    /// Copy the terrain only when it changed since the last read.
    pub(crate) fn sync_terrain(&mut self, terrain: &Terrain) {
        if self.terrain.revision() != terrain.revision()
            || self.terrain.width() != terrain.width()
            || self.terrain.height() != terrain.height()
        {
            self.terrain = terrain.clone();
        }
    }
}

impl Observable for World {
    fn try_observe(&self, view: &mut GameView) -> bool {
        let Some(st) = self.try_lock() else {
            return false;
        };
        view.sync_terrain(st.terrain());
        view.players = st.players().to_vec();
        view.entities = st.entities().iter().map(|(id, e)| (id, e.clone())).collect();
        view.tick = st.tick();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::FixedVec2;
    use crate::game::entity::EntityType;
    use crate::game::scenario::ScenarioSettings;

    #[test]
    fn test_read_copies_state() {
        let world = World::new(ScenarioSettings::default()).unwrap();
        world.startup().unwrap();

        let mut view = GameView::new();
        assert!(view.try_read(&world));
        assert_eq!(view.entities.len(), world.with_state(|st| st.entities().len()));
        assert_eq!(view.players.len(), 3);
        assert_eq!(view.terrain, world.with_state(|st| st.terrain().clone()));

        let seat1: Vec<_> = view.owned_by(1).collect();
        assert_eq!(seat1.len(), 8);
        assert!(seat1.iter().all(|e| e.color == 1));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let world = World::new(ScenarioSettings::default()).unwrap();
        let v = world.spawn(EntityType::Villager, 1, FixedVec2::from_ints(3, 3)).unwrap();
        let mut view = GameView::new();
        view.try_read(&world);
        assert!(view.try_get(v).is_some());

        world.enqueue(crate::game::command::Command::EntityKill { target: v });
        world.pump_events();
        assert_eq!(view.try_get(v).map(|e| e.is_alive()), Some(true));

        view.try_read(&world);
        assert_eq!(view.try_get(v).map(|e| e.is_alive()), Some(false));
    }

    #[test]
    fn test_busy_world_leaves_view_untouched() {
        let world = World::new(ScenarioSettings::default()).unwrap();
        world.spawn(EntityType::Villager, 1, FixedVec2::from_ints(3, 3)).unwrap();

        let mut view = GameView::new();
        let held = world.try_lock();
        assert!(held.is_some());
        assert!(!view.try_read(&world));
        assert!(view.entities.is_empty());
        drop(held);

        assert!(view.try_read(&world));
        assert_eq!(view.entities.len(), 1);
    }
}

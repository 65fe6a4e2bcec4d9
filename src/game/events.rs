//! Outbound Events
//!
//! Every message the simulation emits towards peers. The world returns these
//! from its operations; the network layer broadcasts them in order.

use serde::{Serialize, Deserialize};

use crate::core::fixed::Fixed;
use crate::core::vec2::FixedVec2;
use crate::game::entity::{Entity, EntityRef, EntityState, EntityType, Task};
use crate::game::scenario::ScenarioSettings;
use crate::game::terrain::TerrainChunk;

/// Scenario parameters peers need to set up their local mirror.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioVars {
    /// Map width
    pub width: u32,
    /// Map height
    pub height: u32,
    /// Seat count, neutral seat included
    pub players: u8,
    /// Population cap
    pub popcap: u32,
    /// Starting age
    pub age: u8,
    /// Terrain seed
    pub seed: u64,
    /// Map starts explored
    pub explored: bool,
    /// All technologies researched
    pub all_technologies: bool,
    /// Cheats enabled
    pub cheating: bool,
    /// Edges wrap
    pub wrap: bool,
}

impl From<&ScenarioSettings> for ScenarioVars {
    fn from(scn: &ScenarioSettings) -> Self {
        Self {
            width: scn.width,
            height: scn.height,
            players: scn.players.len() as u8,
            popcap: scn.popcap,
            age: scn.age,
            seed: scn.seed,
            explored: scn.explored,
            all_technologies: scn.all_technologies,
            cheating: scn.cheating,
            wrap: scn.wrap,
        }
    }
}

/// Mutable state of an entity, sent when it changed during a tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// Entity
    pub id: EntityRef,
    /// Type (changes when wildlife becomes a carcass)
    pub kind: EntityType,
    /// Owner seat (changes on conversion)
    pub color: u8,
    /// Position
    pub pos: FixedVec2,
    /// Facing
    pub angle: Fixed,
    /// Health
    pub hp: u32,
    /// Resource stock
    pub amount: u32,
    /// Lifecycle state
    pub state: EntityState,
    /// Current task
    pub task: Option<Task>,
}

impl From<&Entity> for EntityUpdate {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id,
            kind: e.kind,
            color: e.color,
            pos: e.pos,
            angle: e.angle,
            hp: e.hp,
            amount: e.amount,
            state: e.state,
            task: e.task,
        }
    }
}

/// Outbound message kinds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    /// Session setup begins / ends
    StartGame,
    /// Scenario parameters
    ScenarioVars(ScenarioVars),
    /// A new entity exists
    EntityAdd(Entity),
    /// An entity changed
    EntityUpdate(EntityUpdate),
    /// An entity is gone
    EntityKill {
        /// Removed entity
        id: EntityRef,
    },
    /// A terrain region changed
    TerrainMod(TerrainChunk),
    /// Seat name
    PlayerName {
        /// Seat
        seat: u8,
        /// Name
        name: String,
    },
    /// Seat civilization
    PlayerCiv {
        /// Seat
        seat: u8,
        /// Civilization index
        civ: u8,
    },
    /// Seat team
    PlayerTeam {
        /// Seat
        seat: u8,
        /// Team
        team: u8,
    },
    /// A seat lost everything
    PlayerDied {
        /// Seat
        seat: u8,
    },
    /// The session is over
    GameOver {
        /// Surviving team, if any
        winning_team: Option<u8>,
    },
    /// Heartbeat: this many ticks are about to run
    GameTicks {
        /// Tick count
        count: u32,
    },
}

impl GameEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::StartGame => "start_game",
            GameEvent::ScenarioVars(_) => "scenario_vars",
            GameEvent::EntityAdd(_) => "entity_add",
            GameEvent::EntityUpdate(_) => "entity_update",
            GameEvent::EntityKill { .. } => "entity_kill",
            GameEvent::TerrainMod(_) => "terrain_mod",
            GameEvent::PlayerName { .. } => "player_name",
            GameEvent::PlayerCiv { .. } => "player_civ",
            GameEvent::PlayerTeam { .. } => "player_team",
            GameEvent::PlayerDied { .. } => "player_died",
            GameEvent::GameOver { .. } => "game_over",
            GameEvent::GameTicks { .. } => "game_ticks",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::idpool::IdRef;

    #[test]
    fn test_event_json_tag_matches_name() {
        let events = [
            GameEvent::StartGame,
            GameEvent::EntityKill { id: IdRef::new(1, 2) },
            GameEvent::PlayerDied { seat: 2 },
            GameEvent::GameTicks { count: 3 },
            GameEvent::ScenarioVars(ScenarioVars::from(&ScenarioSettings::default())),
        ];
        for event in events {
            let json: serde_json::Value = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[test]
    fn test_entity_add_carries_full_entity() {
        let e = Entity::new(IdRef::new(3, 1), EntityType::Villager, 2, FixedVec2::from_ints(5, 4));
        let json = serde_json::to_string(&GameEvent::EntityAdd(e.clone())).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, GameEvent::EntityAdd(e));
    }

    #[test]
    fn test_update_reflects_entity() {
        let mut e = Entity::new(IdRef::new(0, 0), EntityType::Melee1, 1, FixedVec2::ZERO);
        e.task_move(FixedVec2::from_ints(3, 0));
        let update = EntityUpdate::from(&e);
        assert_eq!(update.state, EntityState::Moving);

        let mut mirror = Entity::new(IdRef::new(0, 0), EntityType::Melee1, 1, FixedVec2::ZERO);
        mirror.apply_update(&update);
        assert_eq!(mirror.state, EntityState::Moving);
        assert_eq!(mirror.task, e.task);
    }
}

//! Players
//!
//! One player per scenario seat. Seat 0 is the neutral (gaia) seat: it owns
//! wildlife and wandering priests and never wins or loses.

use std::collections::BTreeSet;
use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::game::entity::EntityRef;
use crate::game::scenario::PlayerSetting;

/// Resource categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Food
    Food,
    /// Wood
    Wood,
    /// Gold
    Gold,
    /// Stone
    Stone,
}

/// A stockpile of the four resources.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Food
    pub food: u32,
    /// Wood
    pub wood: u32,
    /// Gold
    pub gold: u32,
    /// Stone
    pub stone: u32,
}

impl Resources {
    /// Build a stockpile.
    pub const fn new(food: u32, wood: u32, gold: u32, stone: u32) -> Self {
        Self { food, wood, gold, stone }
    }

    /// Amount held of one kind.
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Food => self.food,
            ResourceKind::Wood => self.wood,
            ResourceKind::Gold => self.gold,
            ResourceKind::Stone => self.stone,
        }
    }

    /// Add to one kind, saturating.
    pub fn add(&mut self, kind: ResourceKind, amount: u32) {
        let slot = match kind {
            ResourceKind::Food => &mut self.food,
            ResourceKind::Wood => &mut self.wood,
            ResourceKind::Gold => &mut self.gold,
            ResourceKind::Stone => &mut self.stone,
        };
        *slot = slot.saturating_add(amount);
    }
}

/// Live state of one seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Seat index; also the colour of owned entities
    pub seat: u8,
    /// Display name
    pub name: String,
    /// Civilization index
    pub civ: u8,
    /// Team
    pub team: u8,
    /// Whether the seat is played by the computer
    pub ai: bool,
    /// Still in the game
    pub alive: bool,
    /// Stockpile
    pub resources: Resources,
    /// Entities this player owns
    pub entities: BTreeSet<EntityRef>,
    /// Whether the ownership set was ever non-empty
    had_entities: bool,
}

impl Player {
    /// Player for a seat, from its scenario setting.
    pub fn new(seat: u8, setting: &PlayerSetting, resources: Resources) -> Self {
        Self {
            seat,
            name: setting.name.clone(),
            civ: setting.civ,
            team: setting.team,
            ai: setting.ai,
            alive: true,
            resources,
            entities: BTreeSet::new(),
            had_entities: false,
        }
    }

    /// Empty placeholder used by client mirrors before names arrive.
    pub fn placeholder(seat: u8) -> Self {
        Self::new(seat, &PlayerSetting::default(), Resources::default())
    }

    /// Neutral seat.
    #[inline]
    pub fn is_neutral(&self) -> bool {
        self.seat == 0
    }

    /// Take ownership of an entity.
    pub fn claim(&mut self, id: EntityRef) {
        self.entities.insert(id);
        self.had_entities = true;
    }

    /// Drop ownership of an entity. Returns whether it was owned.
    pub fn release(&mut self, id: EntityRef) -> bool {
        self.entities.remove(&id)
    }

    /// Whether this player owns the entity.
    pub fn owns(&self, id: EntityRef) -> bool {
        self.entities.contains(&id)
    }

    /// Flip to defeated once everything the player ever owned is gone.
    ///
    /// Returns `true` only on the tick the flip happens. A seat that never
    /// owned anything is not defeated by an empty set.
    pub fn check_defeat(&mut self) -> bool {
        if self.alive && self.had_entities && self.entities.is_empty() {
            self.alive = false;
            return true;
        }
        false
    }

    /// Hash this player's state for verification.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u8(self.seat);
        hasher.update_str(&self.name);
        hasher.update_u8(self.civ);
        hasher.update_u8(self.team);
        hasher.update_bool(self.alive);
        hasher.update_u32(self.resources.food);
        hasher.update_u32(self.resources.wood);
        hasher.update_u32(self.resources.gold);
        hasher.update_u32(self.resources.stone);
        hasher.update_u32(self.entities.len() as u32);
        for id in &self.entities {
            hasher.update_u64(id.to_bits());
        }
    }
}

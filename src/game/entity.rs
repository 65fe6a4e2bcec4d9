//! Entities
//!
//! Units, buildings and resources on the map. Each entity carries a small
//! state machine:
//!
//! ```text
//!   alive ──task_move──▶ moving ──arrived──▶ alive
//!     │                                        ▲
//!     └──task_engage──▶ attack ──target gone───┘
//!                         │
//!   (any live state) ─hit/die─▶ dying ──anim done──▶ decaying ──▶ removed
//!                                  └──wildlife──▶ carcass resource
//! ```
//!
//! Buildings and resources never move and never enter the dying states;
//! the world removes them outright.

use serde::{Serialize, Deserialize};

use crate::core::fixed::{Fixed, to_fixed};
use crate::core::hash::StateHasher;
use crate::core::idpool::IdRef;
use crate::core::vec2::FixedVec2;
use crate::game::events::EntityUpdate;
use crate::game::player::ResourceKind;

/// Reference to an entity in the world's pool.
pub type EntityRef = IdRef;

/// Frames in the idle and walk loops.
const LOOP_FRAMES: u16 = 10;

/// Overshoot into reach so rounding never leaves a chaser one step short.
const REACH_SLACK: Fixed = to_fixed(0.05);

/// Amount moved from a resource into the owner's stock per gather cycle.
pub const GATHER_AMOUNT: u32 = 10;

// =============================================================================
// TYPES
// =============================================================================

/// Broad category of an entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    /// Static, owned, destroyed outright at zero health
    Building,
    /// Mobile, owned, dies through the dying/decaying states
    Unit,
    /// Unowned stock of food/wood/gold/stone
    Resource,
}

/// Every entity type the simulation knows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Town centre
    TownCenter,
    /// Barracks
    Barracks,
    /// Villager: gathers, fights weakly
    Villager,
    /// Clubman
    Melee1,
    /// Priest: converts
    Priest,
    /// Decorative bird
    Bird1,
    /// Huntable gazelle
    Gazelle,
    /// Berry bush
    Berries,
    /// Desert tree, variant 1
    DesertTree1,
    /// Desert tree, variant 2
    DesertTree2,
    /// Desert tree, variant 3
    DesertTree3,
    /// Desert tree, variant 4
    DesertTree4,
    /// Remains of hunted wildlife
    Carcass,
}

/// Static per-type parameters.
#[derive(Debug)]
pub struct EntityStats {
    /// Category
    pub class: EntityClass,
    /// Starting and maximum health
    pub hp: u32,
    /// Damage per resolved attack; 0 means the type cannot attack
    pub attack: u32,
    /// Distance at which an interaction resolves
    pub reach: Fixed,
    /// Footprint radius added to an attacker's reach
    pub radius: Fixed,
    /// Movement per tick
    pub speed: Fixed,
    /// Ticks of the attack/gather/convert animation
    pub windup: u16,
    /// Ticks of the dying animation
    pub dying: u16,
    /// Ticks a corpse lingers; 0 removes it immediately
    pub decay: u16,
    /// Stock held by a resource (or left by wildlife)
    pub resource: Option<(ResourceKind, u32)>,
    /// Can gather resources
    pub gatherer: bool,
    /// Can convert other owners' units
    pub converter: bool,
    /// Turns into a carcass instead of a corpse
    pub huntable: bool,
}

const fn unit(hp: u32, attack: u32, reach: f64, speed: f64, windup: u16, decay: u16) -> EntityStats {
    EntityStats {
        class: EntityClass::Unit,
        hp,
        attack,
        reach: to_fixed(reach),
        radius: to_fixed(0.2),
        speed: to_fixed(speed),
        windup,
        dying: 10,
        decay,
        resource: None,
        gatherer: false,
        converter: false,
        huntable: false,
    }
}

const fn building(hp: u32, radius: f64) -> EntityStats {
    EntityStats {
        class: EntityClass::Building,
        hp,
        attack: 0,
        reach: 0,
        radius: to_fixed(radius),
        speed: 0,
        windup: 1,
        dying: 1,
        decay: 0,
        resource: None,
        gatherer: false,
        converter: false,
        huntable: false,
    }
}

const fn resource(kind: ResourceKind, amount: u32) -> EntityStats {
    EntityStats {
        class: EntityClass::Resource,
        hp: 1,
        attack: 0,
        reach: 0,
        radius: to_fixed(0.5),
        speed: 0,
        windup: 1,
        dying: 1,
        decay: 0,
        resource: Some((kind, amount)),
        gatherer: false,
        converter: false,
        huntable: false,
    }
}

static TOWN_CENTER: EntityStats = building(600, 1.5);
static BARRACKS: EntityStats = building(350, 1.5);
static VILLAGER: EntityStats = EntityStats { gatherer: true, ..unit(25, 3, 0.6, 0.05, 15, 200) };
static MELEE1: EntityStats = unit(40, 4, 0.6, 0.06, 12, 200);
static PRIEST: EntityStats = EntityStats { converter: true, ..unit(25, 0, 4.0, 0.04, 40, 200) };
static BIRD1: EntityStats = unit(5, 0, 0.0, 0.1, 1, 10);
static GAZELLE: EntityStats = EntityStats {
    huntable: true,
    resource: Some((ResourceKind::Food, 150)),
    ..unit(8, 0, 0.0, 0.08, 1, 0)
};
static BERRIES: EntityStats = resource(ResourceKind::Food, 150);
static DESERT_TREE: EntityStats = resource(ResourceKind::Wood, 75);
static CARCASS: EntityStats = resource(ResourceKind::Food, 150);

impl EntityType {
    /// Every type, in declaration order.
    pub const ALL: [EntityType; 13] = [
        Self::TownCenter, Self::Barracks, Self::Villager, Self::Melee1, Self::Priest,
        Self::Bird1, Self::Gazelle, Self::Berries, Self::DesertTree1, Self::DesertTree2,
        Self::DesertTree3, Self::DesertTree4, Self::Carcass,
    ];

    /// Static parameters of this type.
    pub fn stats(self) -> &'static EntityStats {
        match self {
            Self::TownCenter => &TOWN_CENTER,
            Self::Barracks => &BARRACKS,
            Self::Villager => &VILLAGER,
            Self::Melee1 => &MELEE1,
            Self::Priest => &PRIEST,
            Self::Bird1 => &BIRD1,
            Self::Gazelle => &GAZELLE,
            Self::Berries => &BERRIES,
            Self::DesertTree1 | Self::DesertTree2 | Self::DesertTree3 | Self::DesertTree4 => &DESERT_TREE,
            Self::Carcass => &CARCASS,
        }
    }

    /// Category of this type.
    #[inline]
    pub fn class(self) -> EntityClass {
        self.stats().class
    }

    /// Whether this is a building.
    #[inline]
    pub fn is_building(self) -> bool {
        self.class() == EntityClass::Building
    }

    /// Whether this is a mobile unit.
    #[inline]
    pub fn is_unit(self) -> bool {
        self.class() == EntityClass::Unit
    }

    /// Whether this is a resource.
    #[inline]
    pub fn is_resource(self) -> bool {
        self.class() == EntityClass::Resource
    }
}

/// Lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Idle
    Alive,
    /// Walking towards a move target
    Moving,
    /// Engaged with a target (attack, gather or convert)
    Attack,
    /// Playing the death animation
    Dying,
    /// Corpse on the ground
    Decaying,
}

/// What a unit is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Walk to a point
    Move {
        /// Destination
        to: FixedVec2,
    },
    /// Damage a target
    Attack {
        /// Victim
        target: EntityRef,
    },
    /// Harvest a resource
    Gather {
        /// Resource
        target: EntityRef,
    },
    /// Take over another owner's unit
    Convert {
        /// Unit to convert
        target: EntityRef,
    },
}

impl Task {
    /// Entity this task points at, if any.
    pub fn target(&self) -> Option<EntityRef> {
        match *self {
            Task::Move { .. } => None,
            Task::Attack { target } | Task::Gather { target } | Task::Convert { target } => Some(target),
        }
    }
}

/// What happened when a finished death animation was processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecayOutcome {
    /// Became a corpse; keep it around
    Linger,
    /// Turned into a different entity type (wildlife into carcass)
    Converted,
    /// Gone; remove from the world
    Remove,
}

/// Where a task target stands, resolved by the world before ticking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetInfo {
    /// Target position
    pub pos: FixedVec2,
    /// Target footprint radius
    pub radius: Fixed,
    /// Whether the target can still be interacted with
    pub valid: bool,
}

// =============================================================================
// ENTITY
// =============================================================================

/// A unit, building or resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Own reference
    pub id: EntityRef,
    /// Type
    pub kind: EntityType,
    /// Owner seat; 0 is the neutral seat
    pub color: u8,
    /// Position in tile units
    pub pos: FixedVec2,
    /// Facing, radians
    pub angle: Fixed,
    /// Current health
    pub hp: u32,
    /// Remaining stock (resources only)
    pub amount: u32,
    /// Lifecycle state
    pub state: EntityState,
    /// Current task
    pub task: Option<Task>,
    /// Animation frame within the current state
    pub frame: u16,
}

impl Entity {
    /// Fresh entity with full health and stock.
    pub fn new(id: EntityRef, kind: EntityType, color: u8, pos: FixedVec2) -> Self {
        let stats = kind.stats();
        let amount = match stats.class {
            EntityClass::Resource => stats.resource.map_or(0, |(_, amount)| amount),
            _ => 0,
        };
        Self {
            id,
            kind,
            color,
            pos,
            angle: 0,
            hp: stats.hp,
            amount,
            state: EntityState::Alive,
            task: None,
            frame: 0,
        }
    }

    /// Static parameters of this entity's type.
    #[inline]
    pub fn stats(&self) -> &'static EntityStats {
        self.kind.stats()
    }

    /// Whether the entity can still act or be acted upon.
    #[inline]
    pub fn is_alive(&self) -> bool {
        matches!(self.state, EntityState::Alive | EntityState::Moving | EntityState::Attack)
    }

    /// Whether this entity counts as a valid target for an engaged unit.
    pub fn target_info(&self) -> TargetInfo {
        let valid = match self.kind.class() {
            EntityClass::Resource => self.amount > 0,
            _ => self.is_alive(),
        };
        TargetInfo {
            pos: self.pos,
            radius: self.stats().radius,
            valid,
        }
    }

    /// Length of the animation for the current state.
    pub fn frames(&self) -> u16 {
        let stats = self.stats();
        let frames = match (stats.class, self.state) {
            (EntityClass::Unit, EntityState::Alive | EntityState::Moving) => LOOP_FRAMES,
            (EntityClass::Unit, EntityState::Attack) => stats.windup,
            (EntityClass::Unit, EntityState::Dying) => stats.dying,
            (EntityClass::Unit, EntityState::Decaying) => stats.decay,
            _ => 1,
        };
        frames.max(1)
    }

    /// Advance the animation by `n` frames.
    ///
    /// Returns `true` while the current animation has frames left and
    /// `false` on the tick it completes (looping back to the start).
    pub fn imgtick(&mut self, n: u16) -> bool {
        let total = self.frames();
        let next = self.frame.saturating_add(n);
        if next >= total {
            self.frame = next % total;
            false
        } else {
            self.frame = next;
            true
        }
    }

    /// One simulation step. Returns whether anything visible changed.
    ///
    /// `target` is the resolved target of the current task, `None` when the
    /// task has no target or the target no longer exists.
    pub fn tick(&mut self, target: Option<TargetInfo>) -> bool {
        match self.state {
            EntityState::Moving => {
                let Some(Task::Move { to }) = self.task else {
                    self.idle();
                    return true;
                };
                let (pos, arrived) = self.pos.move_towards(to, self.stats().speed);
                self.pos = pos;
                if arrived {
                    self.idle();
                }
                true
            }
            EntityState::Attack => {
                let target = match target {
                    Some(t) if t.valid => t,
                    _ => {
                        self.idle();
                        return true;
                    }
                };
                let stats = self.stats();
                let reach = stats.reach + target.radius;
                let dist = self.pos.distance(target.pos);
                if dist > reach {
                    let step = stats.speed.min(dist - reach + REACH_SLACK);
                    let (pos, _) = self.pos.move_towards(target.pos, step);
                    self.pos = pos;
                    self.angle = self.pos.angle_to(target.pos);
                    // wind-up only counts while in reach
                    self.frame = 0;
                    return true;
                }
                let facing = self.pos.angle_to(target.pos);
                if facing != self.angle && dist > 0 {
                    self.angle = facing;
                    return true;
                }
                false
            }
            EntityState::Alive | EntityState::Dying | EntityState::Decaying => false,
        }
    }

    /// Drop the current task and stand idle.
    pub fn idle(&mut self) {
        self.state = EntityState::Alive;
        self.task = None;
        self.frame = 0;
    }

    /// Start walking to `to`. Only live units accept tasks.
    pub fn task_move(&mut self, to: FixedVec2) -> bool {
        if !self.kind.is_unit() || !self.is_alive() {
            return false;
        }
        self.angle = self.pos.angle_to(to);
        self.task = Some(Task::Move { to });
        self.state = EntityState::Moving;
        self.frame = 0;
        true
    }

    /// Engage a target with an attack, gather or convert task.
    pub fn task_engage(&mut self, task: Task) -> bool {
        if !self.kind.is_unit() || !self.is_alive() {
            return false;
        }
        match task.target() {
            Some(target) if target != self.id => {}
            _ => return false,
        }
        self.task = Some(task);
        self.state = EntityState::Attack;
        self.frame = 0;
        true
    }

    /// Apply damage. Returns `true` when this hit brought health to zero.
    ///
    /// A unit at zero health starts dying; buildings are left for the caller
    /// to remove.
    pub fn hit(&mut self, damage: u32) -> bool {
        if !self.is_alive() || self.kind.is_resource() {
            return false;
        }
        self.hp = self.hp.saturating_sub(damage);
        if self.hp > 0 {
            return false;
        }
        if self.kind.is_unit() {
            self.die();
        }
        true
    }

    /// Start the death animation. Returns `false` if already dead or not a unit.
    pub fn die(&mut self) -> bool {
        if !self.kind.is_unit() || !self.is_alive() {
            return false;
        }
        self.hp = 0;
        self.task = None;
        self.state = EntityState::Dying;
        self.frame = 0;
        true
    }

    /// Process a completed death or corpse animation.
    pub fn decay(&mut self) -> DecayOutcome {
        let stats = self.stats();
        match self.state {
            EntityState::Dying if stats.huntable => {
                self.kind = EntityType::Carcass;
                self.color = 0;
                self.hp = CARCASS.hp;
                self.amount = stats.resource.map_or(0, |(_, amount)| amount);
                self.state = EntityState::Alive;
                self.frame = 0;
                DecayOutcome::Converted
            }
            EntityState::Dying if stats.decay > 0 => {
                self.state = EntityState::Decaying;
                self.frame = 0;
                DecayOutcome::Linger
            }
            _ => DecayOutcome::Remove,
        }
    }

    /// Take up to `want` from a resource's stock.
    pub fn take(&mut self, want: u32) -> u32 {
        let got = want.min(self.amount);
        self.amount -= got;
        got
    }

    /// Overwrite the mutable state from a wire update.
    pub fn apply_update(&mut self, update: &EntityUpdate) {
        self.kind = update.kind;
        self.color = update.color;
        self.pos = update.pos;
        self.angle = update.angle;
        self.hp = update.hp;
        self.amount = update.amount;
        self.state = update.state;
        self.task = update.task;
    }

    /// Hash this entity for state verification.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.id.to_bits());
        hasher.update_u8(self.kind as u8);
        hasher.update_u8(self.color);
        hasher.update_vec2(self.pos);
        hasher.update_fixed(self.angle);
        hasher.update_u32(self.hp);
        hasher.update_u32(self.amount);
        hasher.update_u8(self.state as u8);
        hasher.update_u32(self.frame as u32);
        match self.task {
            None => hasher.update_u8(0),
            Some(Task::Move { to }) => {
                hasher.update_u8(1);
                hasher.update_vec2(to);
            }
            Some(Task::Attack { target }) | Some(Task::Gather { target }) | Some(Task::Convert { target }) => {
                hasher.update_u8(2);
                hasher.update_u64(target.to_bits());
            }
        }
    }
}

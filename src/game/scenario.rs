//! Scenario Settings
//!
//! Everything fixed before a session starts: map size and seed, seat
//! roster, starting resources and rule toggles.

use serde::{Serialize, Deserialize};

use crate::game::player::Resources;
use crate::game::world::WorldError;
use crate::MAX_PLAYERS;

/// Smallest allowed map edge, in tiles.
pub const MIN_MAP_SIZE: u32 = 16;

/// Largest allowed map edge, in tiles.
pub const MAX_MAP_SIZE: u32 = 256;

/// Highest age a scenario may start in.
pub const MAX_AGE: u8 = 4;

/// Name used for a seat when nothing better is known.
pub const DEFAULT_PLAYER_NAME: &str = "Player";

/// Name of the neutral seat.
pub const NEUTRAL_PLAYER_NAME: &str = "Gaia";

// =============================================================================
// CIVILIZATIONS
// =============================================================================

/// A playable civilization and the leader names drawn for unnamed seats.
#[derive(Debug)]
pub struct Civilization {
    /// Display name
    pub name: &'static str,
    /// Leader names
    pub leaders: &'static [&'static str],
}

/// All civilizations, indexed by `PlayerSetting::civ`.
pub static CIVILIZATIONS: &[Civilization] = &[
    Civilization { name: "Egyptian", leaders: &["Ramses", "Khufu", "Sneferu", "Hatshepsut", "Thutmose"] },
    Civilization { name: "Greek", leaders: &["Pericles", "Leonidas", "Solon", "Themistocles", "Lycurgus"] },
    Civilization { name: "Babylonian", leaders: &["Hammurabi", "Nabopolassar", "Nebuchadnezzar", "Sumu-abum"] },
    Civilization { name: "Assyrian", leaders: &["Ashurbanipal", "Sargon", "Tiglath-Pileser", "Sennacherib"] },
    Civilization { name: "Minoan", leaders: &["Minos", "Rhadamanthus", "Sarpedon", "Ariadne"] },
    Civilization { name: "Hittite", leaders: &["Suppiluliuma", "Mursili", "Hattusili", "Muwatalli"] },
    Civilization { name: "Phoenician", leaders: &["Hiram", "Ithobaal", "Abibaal", "Elissa"] },
    Civilization { name: "Sumerian", leaders: &["Gilgamesh", "Enmerkar", "Lugalbanda", "Ur-Nammu"] },
    Civilization { name: "Persian", leaders: &["Cyrus", "Darius", "Xerxes", "Cambyses"] },
    Civilization { name: "Shang", leaders: &["Tang", "Wu Ding", "Pan Geng", "Fu Hao"] },
    Civilization { name: "Yamato", leaders: &["Jimmu", "Suinin", "Keiko", "Himiko"] },
    Civilization { name: "Choson", leaders: &["Dangun", "Gija", "Wiman", "Jun"] },
];

/// Leader names for a civilization index, if it exists.
pub fn civ_leaders(civ: u8) -> Option<&'static [&'static str]> {
    CIVILIZATIONS.get(civ as usize).map(|c| c.leaders)
}

// =============================================================================
// SETTINGS
// =============================================================================

/// Per-seat configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSetting {
    /// Display name; empty means "resolve at session start"
    pub name: String,
    /// Civilization index into [`CIVILIZATIONS`]
    pub civ: u8,
    /// Team
    pub team: u8,
    /// Computer-controlled
    pub ai: bool,
}

impl PlayerSetting {
    /// Unnamed human seat.
    pub fn human(civ: u8, team: u8) -> Self {
        Self { name: String::new(), civ, team, ai: false }
    }

    /// Neutral seat setting.
    pub fn neutral() -> Self {
        Self { name: NEUTRAL_PLAYER_NAME.to_string(), civ: 0, team: 0, ai: true }
    }
}

/// Scenario configuration. Seat 0 is always neutral.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioSettings {
    /// Seat roster, neutral seat first
    pub players: Vec<PlayerSetting>,
    /// Map width, tiles
    pub width: u32,
    /// Map height, tiles
    pub height: u32,
    /// Population cap per player
    pub popcap: u32,
    /// Starting age (1..=4)
    pub age: u8,
    /// Terrain and name seed
    pub seed: u64,
    /// Starting villagers per player
    pub villagers: u32,
    /// Starting stockpile per player
    pub res: Resources,
    /// Players start at fixed positions
    pub fixed_start: bool,
    /// Map starts explored
    pub explored: bool,
    /// All technologies researched
    pub all_technologies: bool,
    /// Cheat commands (terrain modification) accepted
    pub cheating: bool,
    /// Square map
    pub square: bool,
    /// Map edges wrap around
    pub wrap: bool,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            players: vec![
                PlayerSetting::neutral(),
                PlayerSetting::human(0, 1),
                PlayerSetting::human(1, 2),
            ],
            width: 48,
            height: 48,
            popcap: 100,
            age: 1,
            seed: 1,
            villagers: 3,
            res: Resources::new(200, 200, 0, 0),
            fixed_start: true,
            explored: false,
            all_technologies: false,
            cheating: false,
            square: true,
            wrap: false,
        }
    }
}

impl ScenarioSettings {
    /// Number of non-neutral seats.
    pub fn contestants(&self) -> usize {
        self.players.len().saturating_sub(1)
    }

    /// Reject settings the simulation cannot run.
    pub fn validate(&self) -> Result<(), WorldError> {
        let invalid = |msg: String| Err(WorldError::InvalidScenario(msg));

        if self.players.len() < 2 {
            return invalid(format!("need a neutral seat and at least one player, got {} seats", self.players.len()));
        }
        if self.players.len() > MAX_PLAYERS {
            return invalid(format!("{} seats exceed the limit of {}", self.players.len(), MAX_PLAYERS));
        }
        for (name, size) in [("width", self.width), ("height", self.height)] {
            if !(MIN_MAP_SIZE..=MAX_MAP_SIZE).contains(&size) {
                return invalid(format!("{} {} outside {}..={}", name, size, MIN_MAP_SIZE, MAX_MAP_SIZE));
            }
        }
        if self.square && self.width != self.height {
            return invalid(format!("square map with {}x{}", self.width, self.height));
        }
        // Starting positions are laid out three rows per seat.
        let rows_needed = 3 * self.players.len() as u32;
        if self.fixed_start && rows_needed > self.height {
            return invalid(format!("{} seats need {} rows, map has {}", self.players.len(), rows_needed, self.height));
        }
        if self.popcap == 0 {
            return invalid("popcap must be positive".to_string());
        }
        if self.age == 0 || self.age > MAX_AGE {
            return invalid(format!("age {} outside 1..={}", self.age, MAX_AGE));
        }
        if self.villagers > self.popcap {
            return invalid(format!("{} villagers exceed popcap {}", self.villagers, self.popcap));
        }
        Ok(())
    }
}

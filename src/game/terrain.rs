//! Terrain
//!
//! Tile grid with a type and a height per tile. Generated from the scenario
//! seed so every server and replay sees the same map.

use serde::{Serialize, Deserialize};

use crate::core::hash::StateHasher;
use crate::core::rng::DeterministicRng;

/// Spacing of the coarse height lattice the map is interpolated from.
const LATTICE: u32 = 8;

/// Height range of generated terrain.
const MIN_HEIGHT: i32 = -4;
const MAX_HEIGHT: i32 = 4;

/// Tile types, stored as their `u8` id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TileKind {
    /// Grassland
    Grass = 0,
    /// Desert sand
    Desert = 1,
    /// Shallow water
    Water = 2,
    /// Deep water
    DeepWater = 3,
}

impl TileKind {
    /// Tile type for a generated height.
    pub fn for_height(height: i8) -> Self {
        match height {
            i8::MIN..=-3 => TileKind::DeepWater,
            -2 => TileKind::Water,
            -1..=1 => TileKind::Grass,
            _ => TileKind::Desert,
        }
    }
}

/// Rectangular region of tiles, as fetched from or written to a terrain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainChunk {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub w: u32,
    /// Height
    pub h: u32,
    /// Tile ids, row-major, `w * h` entries
    pub tiles: Vec<u8>,
    /// Heights, row-major, `w * h` entries
    pub heights: Vec<i8>,
}

/// Errors writing a chunk into a terrain.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TerrainError {
    /// Chunk does not start inside the map.
    #[error("chunk origin ({x}, {y}) outside {width}x{height} map")]
    OutOfBounds {
        /// Chunk x
        x: u32,
        /// Chunk y
        y: u32,
        /// Map width
        width: u32,
        /// Map height
        height: u32,
    },
    /// Tile or height vectors do not match `w * h`.
    #[error("chunk {w}x{h} carries {tiles} tiles and {heights} heights")]
    SizeMismatch {
        /// Chunk width
        w: u32,
        /// Chunk height
        h: u32,
        /// Tile count
        tiles: usize,
        /// Height count
        heights: usize,
    },
}

/// The map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Terrain {
    width: u32,
    height: u32,
    seed: u64,
    wrap: bool,
    tiles: Vec<u8>,
    heights: Vec<i8>,
    /// Bumped on every change; lets snapshots skip unchanged grids
    revision: u64,
}

impl Terrain {
    /// Flat grass map.
    pub fn new(width: u32, height: u32, seed: u64, wrap: bool) -> Self {
        let mut terrain = Self::default();
        terrain.resize(width, height, seed, wrap);
        terrain
    }

    /// Reallocate to a flat map of the given size.
    pub fn resize(&mut self, width: u32, height: u32, seed: u64, wrap: bool) {
        let n = (width * height) as usize;
        self.width = width;
        self.height = height;
        self.seed = seed;
        self.wrap = wrap;
        self.tiles = vec![TileKind::Grass as u8; n];
        self.heights = vec![0; n];
        self.revision += 1;
    }

    /// Fill the map from the seed: value noise over a coarse lattice.
    pub fn generate(&mut self) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let gw = self.width.div_ceil(LATTICE) + 1;
        let gh = self.height.div_ceil(LATTICE) + 1;
        let mut rng = DeterministicRng::for_stream(self.seed, 0);
        let lattice: Vec<i32> = (0..gw * gh)
            .map(|_| rng.next_int_range(MIN_HEIGHT, MAX_HEIGHT))
            .collect();

        let wrap = self.wrap;
        let corner = |gx: u32, gy: u32| -> i32 {
            let (gx, gy) = if wrap {
                (gx % (gw - 1), gy % (gh - 1))
            } else {
                (gx, gy)
            };
            lattice[(gy * gw + gx) as usize]
        };

        let cell = (LATTICE * LATTICE) as i32;
        for y in 0..self.height {
            for x in 0..self.width {
                let (gx, fx) = (x / LATTICE, (x % LATTICE) as i32);
                let (gy, fy) = (y / LATTICE, (y % LATTICE) as i32);
                let l = LATTICE as i32;
                let sum = corner(gx, gy) * (l - fx) * (l - fy)
                    + corner(gx + 1, gy) * fx * (l - fy)
                    + corner(gx, gy + 1) * (l - fx) * fy
                    + corner(gx + 1, gy + 1) * fx * fy;
                let height = (sum / cell).clamp(MIN_HEIGHT, MAX_HEIGHT) as i8;
                let idx = (y * self.width + x) as usize;
                self.heights[idx] = height;
                self.tiles[idx] = TileKind::for_height(height) as u8;
            }
        }
        self.revision += 1;
    }

    /// Map width in tiles.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Map height in tiles.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether edges wrap around.
    pub fn wrap(&self) -> bool {
        self.wrap
    }

    /// Change counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether a whole-tile coordinate lies on the map.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Tile id and height at a coordinate. Wrapping maps fold coordinates
    /// back onto the grid; others return `None` off the edge.
    pub fn tile(&self, x: i32, y: i32) -> Option<(u8, i8)> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let (x, y) = if self.wrap {
            (x.rem_euclid(self.width as i32), y.rem_euclid(self.height as i32))
        } else if self.contains(x, y) {
            (x, y)
        } else {
            return None;
        };
        let idx = (y as u32 * self.width + x as u32) as usize;
        Some((self.tiles[idx], self.heights[idx]))
    }

    /// Copy out a region, clamped to the map.
    pub fn fetch(&self, x: u32, y: u32, w: u32, h: u32) -> TerrainChunk {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let w = w.min(self.width - x);
        let h = h.min(self.height - y);

        let mut tiles = Vec::with_capacity((w * h) as usize);
        let mut heights = Vec::with_capacity((w * h) as usize);
        for row in y..y + h {
            let start = (row * self.width + x) as usize;
            let end = start + w as usize;
            tiles.extend_from_slice(&self.tiles[start..end]);
            heights.extend_from_slice(&self.heights[start..end]);
        }
        TerrainChunk { x, y, w, h, tiles, heights }
    }

    /// The whole map as one chunk.
    pub fn fetch_all(&self) -> TerrainChunk {
        self.fetch(0, 0, self.width, self.height)
    }

    /// Write a region. Parts hanging off the map are dropped.
    ///
    /// Returns the region actually written.
    pub fn set(&mut self, chunk: &TerrainChunk) -> Result<TerrainChunk, TerrainError> {
        let n = chunk.w as usize * chunk.h as usize;
        if chunk.tiles.len() != n || chunk.heights.len() != n {
            return Err(TerrainError::SizeMismatch {
                w: chunk.w,
                h: chunk.h,
                tiles: chunk.tiles.len(),
                heights: chunk.heights.len(),
            });
        }
        if chunk.x >= self.width || chunk.y >= self.height {
            return Err(TerrainError::OutOfBounds {
                x: chunk.x,
                y: chunk.y,
                width: self.width,
                height: self.height,
            });
        }

        let w = chunk.w.min(self.width - chunk.x);
        let h = chunk.h.min(self.height - chunk.y);
        for row in 0..h {
            let src = (row * chunk.w) as usize;
            let dst = ((chunk.y + row) * self.width + chunk.x) as usize;
            self.tiles[dst..dst + w as usize].copy_from_slice(&chunk.tiles[src..src + w as usize]);
            self.heights[dst..dst + w as usize].copy_from_slice(&chunk.heights[src..src + w as usize]);
        }
        self.revision += 1;
        Ok(self.fetch(chunk.x, chunk.y, w, h))
    }

    /// Hash the grid for state verification.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.width);
        hasher.update_u32(self.height);
        hasher.update_bool(self.wrap);
        hasher.update_bytes(&self.tiles);
        for h in &self.heights {
            hasher.update_u8(*h as u8);
        }
    }
}

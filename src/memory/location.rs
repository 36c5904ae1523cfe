use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Opaque event identifier produced by an external tokenizer
pub type Token = u32;

/// Dimensions of a toroidal grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridSize {
    pub width: u32,
    pub height: u32,
}

impl GridSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn cells(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Both sides non-zero and addressable by a 16-bit locKey component
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("grid dimensions must be non-zero".into()));
        }
        if self.width > 0x1_0000 || self.height > 0x1_0000 {
            return Err(ConfigError::Invalid("grid dimensions must fit in 16 bits".into()));
        }
        Ok(())
    }
}

/// A cell coordinate, always kept modulo the grid size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: u32,
    pub y: u32,
}

impl Location {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Packs the location into a single 32-bit key
    pub fn key(&self) -> u32 {
        loc_key(self.x, self.y)
    }

    pub fn from_key(key: u32) -> Self {
        unpack_loc_key(key)
    }

    /// Wraps the location onto a grid of the given size
    pub fn wrapped(&self, size: GridSize) -> Self {
        Self {
            x: self.x % size.width,
            y: self.y % size.height,
        }
    }
}

/// A step vector, each component bounded by the encoder's `max_step`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Displacement {
    pub dx: i32,
    pub dy: i32,
}

impl Displacement {
    pub fn new(dx: i32, dy: i32) -> Self {
        Self { dx, dy }
    }

    pub fn is_zero(&self) -> bool {
        self.dx == 0 && self.dy == 0
    }
}

/// `(x & 0xFFFF) << 16 | (y & 0xFFFF)`
pub fn loc_key(x: u32, y: u32) -> u32 {
    ((x & 0xFFFF) << 16) | (y & 0xFFFF)
}

pub fn unpack_loc_key(key: u32) -> Location {
    Location {
        x: key >> 16,
        y: key & 0xFFFF,
    }
}

/// Adds a displacement and wraps onto the torus. The result is never negative.
pub fn apply_displacement(location: Location, displacement: Displacement, size: GridSize) -> Location {
    let wrap = |v: u32, d: i32, n: u32| -> u32 {
        (v as i64 + d as i64).rem_euclid(n as i64) as u32
    };
    Location {
        x: wrap(location.x, displacement.dx, size.width),
        y: wrap(location.y, displacement.dy, size.height),
    }
}

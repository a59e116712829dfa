//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};

/// Slot id into the cell arena. Slot 0 is permanently reserved.
pub type SlotId = u16;

/// Controller / player id. Id 0 is reserved; player-type bytes run 0-250.
pub type PlayerId = u8;

/// Number of controller records (id 0 included but never attached).
pub const MAX_PLAYERS: usize = 250;

/// Highest type byte that denotes a player-owned cell.
pub const PLAYER_TYPE_MAX: u8 = 250;

pub const DEAD_TYPE: u8 = 251;
pub const MOTHER_TYPE: u8 = 252;
pub const VIRUS_TYPE: u8 = 253;
pub const PELLET_TYPE: u8 = 254;
pub const EJECTED_TYPE: u8 = 255;

/// Tagged view of the one-byte cell type field.
///
/// The arena keeps the packed byte for compactness; this enum is the
/// design-level reading of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Player(PlayerId),
    Dead,
    Mother,
    Virus,
    Pellet,
    Ejected,
}

impl CellKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            DEAD_TYPE => CellKind::Dead,
            MOTHER_TYPE => CellKind::Mother,
            VIRUS_TYPE => CellKind::Virus,
            PELLET_TYPE => CellKind::Pellet,
            EJECTED_TYPE => CellKind::Ejected,
            id => CellKind::Player(id),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            CellKind::Player(id) => {
                debug_assert!(id <= PLAYER_TYPE_MAX);
                id
            }
            CellKind::Dead => DEAD_TYPE,
            CellKind::Mother => MOTHER_TYPE,
            CellKind::Virus => VIRUS_TYPE,
            CellKind::Pellet => PELLET_TYPE,
            CellKind::Ejected => EJECTED_TYPE,
        }
    }

    pub fn is_player(self) -> bool {
        matches!(self, CellKind::Player(_))
    }
}

/// 2D position / direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Unit vector from `self` toward `to`. Degenerate directions (under
    /// one world unit apart) fall back to rightward, never propagate.
    pub fn direction_to(&self, to: &Self) -> Self {
        let dx = to.x - self.x;
        let dy = to.y - self.y;
        let d = (dx * dx + dy * dy).sqrt();
        if d < 1.0 {
            Self { x: 1.0, y: 0.0 }
        } else {
            Self { x: dx / d, y: dy / d }
        }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self { x: self.x * rhs, y: self.y * rhs }
    }
}

/// Axis-aligned box, `l <= r`, `b <= t`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub l: f32,
    pub r: f32,
    pub b: f32,
    pub t: f32,
}

impl Aabb {
    pub fn new(l: f32, r: f32, b: f32, t: f32) -> Self {
        Self { l, r, b, t }
    }

    /// Degenerate box that grows to fit the first point included.
    pub fn inverted(hw: f32, hh: f32) -> Self {
        Self { l: hw, r: -hw, b: hh, t: -hh }
    }

    pub fn include(&mut self, x: f32, y: f32) {
        self.l = self.l.min(x);
        self.r = self.r.max(x);
        self.b = self.b.min(y);
        self.t = self.t.max(y);
    }

    pub fn expand(&self, margin: f32) -> Self {
        Self {
            l: self.l - margin,
            r: self.r + margin,
            b: self.b - margin,
            t: self.t + margin,
        }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.l && x <= self.r && y >= self.b && y <= self.t
    }
}

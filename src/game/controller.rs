//! Per-participant controller state
//!
//! A controller is a numbered seat (1..=250, 0 reserved) that may or may
//! not have a handle attached. Input intent is written here by the host
//! between ticks and consumed by the orchestrator; derived output
//! (viewport, score) is written back by the orchestrator each tick.

use crate::core::types::{Aabb, PlayerId, Vec2};
use crate::game::Handle;

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub center: Vec2,
    pub hw: f32,
    pub hh: f32,
}

impl Viewport {
    fn empty() -> Self {
        Self {
            center: Vec2::default(),
            hw: 0.0,
            hh: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct Controller {
    pub id: PlayerId,
    pub handle: Option<Handle>,
    pub alive: bool,

    // input intent, written by the host / bot policy
    pub spawn_requested: bool,
    pub mouse: Vec2,
    pub split_attempts: u32,
    pub eject_attempts: u32,
    pub eject_macro: bool,
    /// Steering constrained to a line through the split origin; the
    /// kernel projects the target onto ax + by + c = 0 while armed.
    pub lock_dir: bool,
    pub line: [f32; 3],

    // timers, in engine-clock ms
    pub last_spawn_ms: f32,
    pub last_eject_ms: f32,
    pub last_popped_ms: f32,

    // derived each tick while alive
    pub bounds: Aabb,
    pub viewport: Viewport,
    pub score: f32,
    pub max_score: f32,
}

impl Controller {
    pub fn new(id: PlayerId, hw: f32, hh: f32) -> Self {
        Self {
            id,
            handle: None,
            alive: false,
            spawn_requested: false,
            mouse: Vec2::default(),
            split_attempts: 0,
            eject_attempts: 0,
            eject_macro: false,
            lock_dir: false,
            line: [0.0; 3],
            last_spawn_ms: 0.0,
            last_eject_ms: 0.0,
            last_popped_ms: 0.0,
            bounds: Aabb::inverted(hw, hh),
            viewport: Viewport::empty(),
            score: 0.0,
            max_score: 0.0,
        }
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.handle, Some(Handle::Bot(_)))
    }

    pub fn name(&self) -> Option<&str> {
        match &self.handle {
            Some(Handle::Player { name }) => Some(name),
            Some(Handle::Bot(bot)) => Some(&bot.name),
            None => None,
        }
    }

    /// Queue a respawn; honored by the next tick's input phase subject
    /// to the spawn-delay gate.
    pub fn request_spawn(&mut self) {
        self.spawn_requested = true;
    }

    pub fn set_mouse(&mut self, x: f32, y: f32) {
        self.mouse = Vec2::new(x, y);
    }

    pub fn add_split_attempts(&mut self, n: u32) {
        self.split_attempts += n;
    }

    pub fn add_eject_attempts(&mut self, n: u32) {
        self.eject_attempts += n;
    }

    pub fn set_eject_macro(&mut self, on: bool) {
        self.eject_macro = on;
    }

    /// Arm the steering lock along `dir` through `origin`.
    pub fn lock_direction(&mut self, origin: Vec2, dir: Vec2) {
        self.line = [-dir.y, dir.x, dir.y * origin.x - dir.x * origin.y];
        self.lock_dir = true;
    }

    pub fn clear_lock(&mut self) {
        self.lock_dir = false;
    }

    /// Called right after the spawn queue materialized this seat's cell.
    pub fn after_spawn(&mut self) {
        self.alive = true;
        self.spawn_requested = false;
        self.score = 0.0;
        self.lock_dir = false;
    }

    /// Back to the detached baseline. Keeps the seat id, drops the handle.
    pub fn reset(&mut self, hw: f32, hh: f32) {
        let id = self.id;
        *self = Self::new(id, hw, hh);
    }

    /// Clear per-round state between world restarts, keeping the handle
    /// so the participant stays seated.
    pub fn reset_round(&mut self, hw: f32, hh: f32) {
        let handle = self.handle.take();
        let id = self.id;
        *self = Self::new(id, hw, hh);
        self.handle = handle;
    }
}

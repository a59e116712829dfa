//! Participant management: seats, handles, and the events the engine emits
//!
//! The engine owns one [`Game`]; hosts attach a [`Handle`] per remote
//! player (or the engine attaches bots itself) and read back the
//! [`EngineEvent`] stream produced by each tick.

pub mod bot;
pub mod controller;

pub use bot::{Bot, BotSighting};
pub use controller::Controller;

use serde::Serialize;

use crate::core::error::{EngineError, Result};
use crate::core::types::{MAX_PLAYERS, PlayerId};

/// Who is driving a seat.
#[derive(Debug)]
pub enum Handle {
    Player { name: String },
    Bot(Bot),
}

/// One leaderboard row, ready for serialization to clients.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub id: PlayerId,
    pub name: String,
    pub score: f32,
}

/// Events produced by the orchestrator, drained by the host after each
/// tick. Ordering within a tick follows the phase that raised them.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Joined { id: PlayerId },
    Left { id: PlayerId },
    Spawned { id: PlayerId },
    Oversize { id: PlayerId, score: f32 },
    Restarted,
    TickCompleted { collisions: u32 },
}

pub struct Game {
    /// Seats indexed by id; seat 0 is reserved and never attached.
    pub controllers: Vec<Controller>,
    handle_count: usize,
}

impl Game {
    pub fn new(hw: f32, hh: f32) -> Self {
        Self {
            controllers: (0..MAX_PLAYERS as u8)
                .map(|id| Controller::new(id, hw, hh))
                .collect(),
            handle_count: 0,
        }
    }

    pub fn handle_count(&self) -> usize {
        self.handle_count
    }

    pub fn bot_count(&self) -> usize {
        self.controllers.iter().filter(|c| c.is_bot()).count()
    }

    pub fn is_full(&self) -> bool {
        self.handle_count == MAX_PLAYERS - 1
    }

    /// Seat a handle on the first free controller.
    pub fn attach(&mut self, handle: Handle) -> Result<PlayerId> {
        let free = self.controllers[1..]
            .iter()
            .position(|c| c.handle.is_none())
            .map(|i| i + 1)
            .ok_or(EngineError::GameFull)?;
        self.controllers[free].handle = Some(handle);
        self.handle_count += 1;
        Ok(free as PlayerId)
    }

    /// Free a seat; the caller queues the kill of any remaining cells.
    pub fn detach(&mut self, id: PlayerId, hw: f32, hh: f32) -> bool {
        let c = &mut self.controllers[id as usize];
        if c.handle.is_none() {
            return false;
        }
        c.reset(hw, hh);
        self.handle_count -= 1;
        true
    }

    pub fn controller(&self, id: PlayerId) -> &Controller {
        &self.controllers[id as usize]
    }

    pub fn controller_mut(&mut self, id: PlayerId) -> &mut Controller {
        &mut self.controllers[id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_skips_seat_zero() {
        let mut game = Game::new(100.0, 100.0);
        let id = game
            .attach(Handle::Player { name: "ada".into() })
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(game.handle_count(), 1);
    }

    #[test]
    fn test_detach_frees_the_seat() {
        let mut game = Game::new(100.0, 100.0);
        let id = game
            .attach(Handle::Player { name: "ada".into() })
            .unwrap();
        assert!(game.detach(id, 100.0, 100.0));
        assert!(!game.detach(id, 100.0, 100.0), "second detach is a no-op");
        assert_eq!(game.handle_count(), 0);

        let again = game
            .attach(Handle::Player { name: "bob".into() })
            .unwrap();
        assert_eq!(again, id, "freed seat is reused");
    }

    #[test]
    fn test_full_game_rejects_attach() {
        let mut game = Game::new(100.0, 100.0);
        for _ in 1..MAX_PLAYERS {
            game.attach(Handle::Player { name: "x".into() }).unwrap();
        }
        assert!(game.is_full());
        assert!(matches!(
            game.attach(Handle::Player { name: "y".into() }),
            Err(EngineError::GameFull)
        ));
    }
}

//! Built-in bot policy
//!
//! Bots are ordinary seats whose input intent is filled in by the engine
//! right before the input phase, using the same stale viewport snapshot
//! a remote client would query. The policy is deliberately simple: flee
//! the nearest bigger player cell, otherwise chase the nearest edible
//! target, retargeting on a small cooldown so movement looks committed.

use rand::Rng;

use crate::core::types::Vec2;

/// What a bot sees: one candidate cell from its viewport query.
#[derive(Debug, Clone, Copy)]
pub struct BotSighting {
    pub pos: Vec2,
    pub r: f32,
    /// True for another player's cell (threat or prey), false for food.
    pub is_player: bool,
}

#[derive(Debug, Clone)]
pub struct Bot {
    pub name: String,
    wander: Vec2,
    retarget_in: u32,
}

/// Size advantage required before a bot treats a cell as prey or threat.
const SIZE_EDGE: f32 = 1.15;

impl Bot {
    pub fn new(seq: usize) -> Self {
        Self {
            name: format!("bot-{seq}"),
            wander: Vec2::new(0.0, 0.0),
            retarget_in: 0,
        }
    }

    /// Pick this tick's mouse target given own position/size and the
    /// sightings from the viewport query.
    pub fn aim(
        &mut self,
        rng: &mut impl Rng,
        own_pos: Vec2,
        own_r: f32,
        sightings: &[BotSighting],
    ) -> Vec2 {
        let mut nearest_threat: Option<(f32, Vec2)> = None;
        let mut nearest_prey: Option<(f32, Vec2)> = None;

        for s in sightings {
            let d = own_pos.distance(&s.pos);
            if s.is_player && s.r > own_r * SIZE_EDGE {
                if nearest_threat.map_or(true, |(td, _)| d < td) {
                    nearest_threat = Some((d, s.pos));
                }
            } else if !s.is_player || own_r > s.r * SIZE_EDGE {
                if nearest_prey.map_or(true, |(pd, _)| d < pd) {
                    nearest_prey = Some((d, s.pos));
                }
            }
        }

        // Threats within half a viewport dominate everything else
        if let Some((d, pos)) = nearest_threat {
            if d < own_r * 8.0 {
                let away = pos.direction_to(&own_pos);
                return own_pos + away * (own_r * 10.0);
            }
        }

        if let Some((_, pos)) = nearest_prey {
            self.retarget_in = 0;
            return pos;
        }

        // Nothing visible: wander, re-rolling the bearing on a cooldown
        if self.retarget_in == 0 {
            let angle = rng.gen::<f32>() * std::f32::consts::TAU;
            self.wander = Vec2::new(angle.sin(), angle.cos());
            self.retarget_in = 40;
        }
        self.retarget_in -= 1;
        own_pos + self.wander * (own_r * 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(7)
    }

    #[test]
    fn test_flees_bigger_player() {
        let mut bot = Bot::new(0);
        let own = Vec2::new(0.0, 0.0);
        let sightings = [BotSighting {
            pos: Vec2::new(100.0, 0.0),
            r: 200.0,
            is_player: true,
        }];
        let target = bot.aim(&mut rng(), own, 50.0, &sightings);
        assert!(target.x < 0.0, "target {target:?} should point away");
    }

    #[test]
    fn test_chases_food_over_wander() {
        let mut bot = Bot::new(1);
        let own = Vec2::new(0.0, 0.0);
        let food = Vec2::new(-30.0, 40.0);
        let sightings = [BotSighting {
            pos: food,
            r: 10.0,
            is_player: false,
        }];
        let target = bot.aim(&mut rng(), own, 50.0, &sightings);
        assert_eq!(target, food);
    }

    #[test]
    fn test_wander_is_sticky() {
        let mut bot = Bot::new(2);
        let own = Vec2::new(0.0, 0.0);
        let mut r = rng();
        let first = bot.aim(&mut r, own, 50.0, &[]);
        let second = bot.aim(&mut r, own, 50.0, &[]);
        assert_eq!(first, second, "bearing holds until the cooldown runs out");
    }
}

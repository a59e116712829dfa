//! Engine configuration: the flat tunable surface consulted live each tick
//!
//! Every knob the simulation reads is collected here. Defaults reproduce
//! the classic arena tuning; all values can be overridden from a TOML file
//! and are re-read every tick, so they may be changed between restarts.

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // === CLOCK ===
    /// Physics ticks per second driven by the host loop
    pub physics_tps: f32,
    /// Leaderboard recompute/emit frequency (independent, lower cadence)
    pub leaderboard_tps: f32,
    /// Multiplier applied to wall-clock dt before simulation
    pub time_scale: f32,

    // === ARENA ===
    /// Total cell slots, including the permanently reserved slot 0.
    /// Must fit u16 slot ids; default uses 2 MiB of record memory.
    pub cell_limit: usize,
    /// Per-type spawn throttle per tick, bounds latency spikes when a
    /// population cap is far from met
    pub max_cell_per_tick: usize,

    // === WORLD ===
    /// World half-width; the world spans [-map_hw, map_hw]
    pub map_hw: f32,
    /// World half-height
    pub map_hh: f32,

    // === SPATIAL INDEX ===
    pub quadtree_max_items: usize,
    pub quadtree_max_level: usize,

    // === SAFE SPAWN ===
    /// Attempt budget before accepting the last candidate regardless
    pub safe_spawn_tries: usize,
    /// Clearance multiplier: a spawn at size s must be free of
    /// conflicting entities within s * safe_spawn_radius
    pub safe_spawn_radius: f32,

    // === ENVIRONMENT POPULATIONS ===
    pub pellet_count: usize,
    pub pellet_size: f32,
    pub virus_count: usize,
    pub virus_size: f32,
    /// Ejected-mass feedings before a virus pops
    pub virus_feed_times: f32,
    pub virus_split_boost: f32,
    /// Pop into equal pieces instead of the biological split curve
    pub virus_monotone_pop: bool,
    pub mother_cell_count: usize,
    pub mother_cell_size: f32,

    // === PLAYERS ===
    pub player_speed: f32,
    /// Grace period between spawns (ms)
    pub player_spawn_delay: f32,
    /// Radius above which a player cell is forcibly split; 0 disables
    pub player_autosplit_size: f32,
    /// Age (ms) a cell must reach before autosplit applies
    pub player_autosplit_delay: f32,
    pub player_max_cells: usize,
    pub player_spawn_size: f32,
    pub player_split_boost: f32,
    /// Offset of a split piece from its parent center
    pub player_split_dist: f32,
    /// Split commands honored per tick
    pub player_split_cap: usize,
    pub player_min_split_size: f32,
    pub player_min_eject_size: f32,
    /// Age (ms) before same-owner cells may merge
    pub player_no_merge_delay: f32,
    /// Age (ms) before same-owner cells collide
    pub player_no_colli_delay: f32,
    /// Age (ms) before a cell may eject
    pub player_no_eject_delay: f32,
    /// Eject lockout after the owner popped (ms)
    pub player_no_eject_pop_delay: f32,
    /// Base merge time in seconds; 0 means merge gating by age alone
    pub player_merge_time: f32,
    pub player_merge_increase: f32,
    /// Use the newer size-scaled merge-time formula
    pub player_merge_new_ver: bool,
    pub player_view_scale: f32,
    /// Minimum viewport half-extent
    pub player_view_min: f32,
    /// Lifetime of a dead-replacement cell (ms)
    pub player_dead_delay: f32,

    // === DECAY ===
    pub static_decay: f32,
    pub dynamic_decay: f32,
    /// Radius below which player cells do not decay
    pub decay_min: f32,

    // === BOTS ===
    pub bots: usize,
    pub bot_spawn_size: f32,

    // === EJECTED MASS ===
    /// Random angular dispersion applied to each ejection (radians)
    pub eject_dispersion: f32,
    pub eject_size: f32,
    /// Radius loss of the source: r' = sqrt(r^2 - eject_loss^2)
    pub eject_loss: f32,
    pub eject_boost: f32,
    /// Minimum interval between ejections (ms); derives the per-tick rate
    pub eject_delay: f32,
    /// Ejected mass despawns past this age (ms)
    pub eject_max_age: f32,

    // === OVERSIZE ===
    /// Score fraction of total world mass that triggers the oversize event
    pub world_restart_mult: f32,
    /// Kill the oversize player instead of restarting the world
    pub world_kill_oversize: bool,

    // === EATING ===
    /// Overlap divisor: eat requires d < r_big - r_small / eat_overlap
    pub eat_overlap: f32,
    /// Size ratio required to eat across owners
    pub eat_mult: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            physics_tps: 20.0,
            leaderboard_tps: 2.0,
            time_scale: 1.0,

            cell_limit: 65536,
            max_cell_per_tick: 50,

            map_hw: 32767.0,
            map_hh: 32767.0,

            quadtree_max_items: 24,
            quadtree_max_level: 16,

            safe_spawn_tries: 64,
            safe_spawn_radius: 1.5,

            pellet_count: 1000,
            pellet_size: 10.0,
            virus_count: 30,
            virus_size: 100.0,
            virus_feed_times: 7.0,
            virus_split_boost: 780.0,
            virus_monotone_pop: false,
            mother_cell_count: 0,
            mother_cell_size: 149.0,

            player_speed: 1.5,
            player_spawn_delay: 3000.0,
            player_autosplit_size: 1500.0,
            player_autosplit_delay: 100.0,
            player_max_cells: 16,
            player_spawn_size: 32.0,
            player_split_boost: 800.0,
            player_split_dist: 40.0,
            player_split_cap: 4,
            player_min_split_size: 60.0,
            player_min_eject_size: 60.0,
            player_no_merge_delay: 650.0,
            player_no_colli_delay: 650.0,
            player_no_eject_delay: 200.0,
            player_no_eject_pop_delay: 500.0,
            player_merge_time: 1.0,
            player_merge_increase: 1.0,
            player_merge_new_ver: true,
            player_view_scale: 1.0,
            player_view_min: 4000.0,
            player_dead_delay: 5000.0,

            static_decay: 1.0,
            dynamic_decay: 1.0,
            decay_min: 1000.0,

            bots: 1,
            bot_spawn_size: 1000.0,

            eject_dispersion: 0.3,
            eject_size: 38.0,
            eject_loss: 43.0,
            eject_boost: 780.0,
            eject_delay: 100.0,
            eject_max_age: 10000.0,

            world_restart_mult: 0.75,
            world_kill_oversize: false,

            eat_overlap: 3.0,
            eat_mult: 1.140175425099138,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file; unspecified keys keep their defaults.
    pub fn from_toml_path(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency before the engine binds its buffers.
    pub fn validate(&self) -> Result<()> {
        if self.cell_limit < 2 || self.cell_limit > u16::MAX as usize + 1 {
            return Err(EngineError::InvalidConfig(format!(
                "cell_limit ({}) must be in 2..=65536 to fit u16 slot ids",
                self.cell_limit
            )));
        }
        if self.physics_tps <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "physics_tps ({}) must be positive",
                self.physics_tps
            )));
        }
        if self.quadtree_max_level == 0 || self.quadtree_max_items == 0 {
            return Err(EngineError::InvalidConfig(
                "quadtree_max_level and quadtree_max_items must be positive".into(),
            ));
        }
        let env_cap = self.pellet_count + self.virus_count + self.mother_cell_count;
        if env_cap >= self.cell_limit {
            return Err(EngineError::InvalidConfig(format!(
                "environment caps ({}) must stay below cell_limit ({})",
                env_cap, self.cell_limit
            )));
        }
        if self.eat_mult < 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "eat_mult ({}) below 1 lets smaller cells eat bigger ones",
                self.eat_mult
            )));
        }
        if self.eat_overlap <= 0.0 || self.safe_spawn_radius <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "eat_overlap and safe_spawn_radius must be positive".into(),
            ));
        }
        if self.map_hw <= 0.0 || self.map_hh <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "map half-extents must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Tick period in milliseconds at the configured physics rate.
    pub fn tick_delay_ms(&self) -> f32 {
        1000.0 / self.physics_tps
    }

    /// Radius at which a fed virus pops.
    pub fn virus_max_size(&self) -> f32 {
        (self.virus_size * self.virus_size
            + self.eject_size * self.eject_size * self.virus_feed_times)
            .sqrt()
    }

    /// Score threshold for the oversize event.
    pub fn oversize_score(&self) -> f32 {
        self.map_hw * self.map_hh / 100.0 * self.world_restart_mult
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_oversized_cell_limit() {
        let config = EngineConfig {
            cell_limit: 100_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_env_caps_above_cell_limit() {
        let config = EngineConfig {
            cell_limit: 512,
            pellet_count: 600,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_virus_max_size_matches_feed_budget() {
        let config = EngineConfig::default();
        let expected = (100.0f32 * 100.0 + 38.0 * 38.0 * 7.0).sqrt();
        assert!((config.virus_max_size() - expected).abs() < 1e-3);
    }

    #[test]
    fn test_toml_partial_override() {
        let config: EngineConfig = toml::from_str("pellet_count = 5\nbots = 0").unwrap();
        assert_eq!(config.pellet_count, 5);
        assert_eq!(config.bots, 0);
        // untouched keys keep defaults
        assert_eq!(config.virus_count, 30);
    }
}

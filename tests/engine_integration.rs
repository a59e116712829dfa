//! Integration tests for the full tick pipeline
//!
//! These drive a real engine through whole ticks and verify the
//! externally observable guarantees:
//! - safe spawn placement in an empty world
//! - eject mass loss and single-ejection rate
//! - oversize detection followed by a world restart
//! - autosplit piece counts and area conservation
//! - split mass conservation
//! - slot/directory consistency under churn

use cytos::core::config::EngineConfig;
use cytos::core::error::EngineError;
use cytos::core::types::{CellKind, EJECTED_TYPE, PELLET_TYPE, VIRUS_TYPE};
use cytos::engine::Engine;
use cytos::game::EngineEvent;

const TICK: f32 = 50.0;

/// Config for a quiet world: no environment spawns, no bots.
fn quiet_config() -> EngineConfig {
    EngineConfig {
        cell_limit: 4096,
        pellet_count: 0,
        virus_count: 0,
        mother_cell_count: 0,
        bots: 0,
        map_hw: 10_000.0,
        map_hh: 10_000.0,
        ..Default::default()
    }
}

#[test]
fn test_safe_spawn_in_empty_world() {
    let config = quiet_config();
    let hw = config.map_hw;
    let hh = config.map_hh;
    let mut engine = Engine::new(config, 1).unwrap();

    for _ in 0..20 {
        let p = engine.safe_spawn_point(32.0);
        assert!(
            p.x.abs() <= hw && p.y.abs() <= hh,
            "spawn point {p:?} out of world bounds"
        );
    }
}

#[test]
fn test_eject_loses_configured_mass() {
    let mut engine = Engine::new(quiet_config(), 2).unwrap();
    let id = engine.attach("ejector".into()).unwrap();
    let cell = engine
        .spawn_cell(0.0, 0.0, 100.0, CellKind::Player(id))
        .unwrap();

    // Age past the eject delay and the post-pop lockout
    for _ in 0..11 {
        engine.tick(TICK).unwrap();
    }

    engine.game_mut().controller_mut(id).set_mouse(5_000.0, 0.0);
    engine.game_mut().controller_mut(id).add_eject_attempts(1);
    engine.tick(TICK).unwrap();

    assert_eq!(
        engine.directory().count(EJECTED_TYPE),
        1,
        "exactly one ejected cell per eject under non-saturating rates"
    );
    let expected = (100.0f32 * 100.0 - 43.0 * 43.0).sqrt();
    let r = engine.arena().r(cell);
    assert!(
        (r - expected).abs() < 0.1,
        "radius after eject should be {expected:.2}, got {r:.2}"
    );
}

#[test]
fn test_split_conserves_area() {
    let mut engine = Engine::new(quiet_config(), 3).unwrap();
    let id = engine.attach("splitter".into()).unwrap();
    engine
        .spawn_cell(0.0, 0.0, 100.0, CellKind::Player(id))
        .unwrap();

    engine.game_mut().controller_mut(id).add_split_attempts(1);
    engine.tick(TICK).unwrap();

    let cells: Vec<u16> = engine.directory().set(id).iter().copied().collect();
    assert_eq!(cells.len(), 2, "one split produces two cells");
    let total: f32 = cells.iter().map(|&c| engine.arena().r(c).powi(2)).sum();
    assert!(
        (total - 100.0f32 * 100.0).abs() < 1.0,
        "split conserves area, got {total}"
    );
    for &c in &cells {
        let r = engine.arena().r(c);
        assert!(
            (r - 100.0 / std::f32::consts::SQRT_2).abs() < 0.5,
            "both halves are r/sqrt(2), got {r}"
        );
    }
}

#[test]
fn test_oversize_restarts_world() {
    let mut config = quiet_config();
    config.map_hw = 1000.0;
    config.map_hh = 1000.0;
    // threshold = 1000 * 1000 / 100 * 0.75 = 7500 score
    config.world_restart_mult = 0.75;
    config.world_kill_oversize = false;
    config.player_autosplit_size = 0.0;
    let mut engine = Engine::new(config, 4).unwrap();

    let id = engine.attach("giant".into()).unwrap();
    engine
        .spawn_cell(0.0, 0.0, 900.0, CellKind::Player(id))
        .unwrap();

    let events = engine.tick(TICK).unwrap();
    let oversize = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Oversize { .. }))
        .count();
    assert_eq!(oversize, 1, "score 8100 over threshold 7500 fires once");

    let events = engine.tick(TICK).unwrap();
    assert!(
        events.iter().any(|e| matches!(e, EngineEvent::Restarted)),
        "the tick after the oversize flag restarts the world"
    );
    assert_eq!(engine.cell_count(), 0, "restart clears all entities");
    assert!(engine.indices().is_empty());
    assert!(
        engine.game().controller(id).handle.is_some(),
        "seats survive a restart"
    );
}

#[test]
fn test_oversize_kill_removes_cells_everywhere() {
    let mut config = quiet_config();
    config.map_hw = 1000.0;
    config.map_hh = 1000.0;
    config.world_restart_mult = 0.75;
    config.world_kill_oversize = true;
    config.player_autosplit_size = 0.0;
    let mut engine = Engine::new(config, 10).unwrap();

    let id = engine.attach("giant".into()).unwrap();
    let slot = engine
        .spawn_cell(0.0, 0.0, 900.0, CellKind::Player(id))
        .unwrap();

    let events = engine.tick(TICK).unwrap();
    assert!(
        events.iter().any(|e| matches!(e, EngineEvent::Oversize { .. })),
        "score 8100 over threshold 7500"
    );
    assert_eq!(engine.cell_count(), 0, "outright kill drops the live count");
    assert_eq!(engine.directory().total(), 0);
    assert!(
        engine.query_rect(-1000.0, 1000.0, -1000.0, 1000.0).is_empty(),
        "the killed cell must not linger in the spatial snapshot"
    );

    let events = engine.tick(TICK).unwrap();
    assert!(
        !events.iter().any(|e| matches!(e, EngineEvent::Restarted)),
        "oversize-kill must not restart the world"
    );
    assert!(
        !engine.arena().exists(slot),
        "the killed slot's memory is reclaimed for reuse"
    );
}

#[test]
fn test_fatal_capacity_halts_engine() {
    let mut config = quiet_config();
    config.cell_limit = 8;
    config.pellet_count = 7;
    let mut engine = Engine::new(config, 11).unwrap();
    let id = engine.attach("crowd".into()).unwrap();
    engine
        .spawn_cell(0.0, 0.0, 50.0, CellKind::Player(id))
        .unwrap();

    // 7 live cells hit the cell_limit - 1 ceiling mid-spawn
    let err = engine.tick(TICK).unwrap_err();
    assert!(matches!(err, EngineError::CellLimitReached { .. }));
    assert!(engine.is_stopped());
    assert!(
        matches!(engine.tick(TICK), Err(EngineError::Halted)),
        "a stopped engine refuses further ticks"
    );
}

#[test]
fn test_fractional_tick_age_accumulates() {
    let mut engine = Engine::new(quiet_config(), 12).unwrap();
    let id = engine.attach("timer".into()).unwrap();
    let slot = engine
        .spawn_cell(0.0, 0.0, 100.0, CellKind::Player(id))
        .unwrap();

    // 3 x 16.7 ms: truncating each tick would lose a ms per tick
    for _ in 0..3 {
        engine.tick(16.7).unwrap();
    }
    assert_eq!(
        engine.arena().age(slot),
        50,
        "ages follow the accumulated clock, not per-tick truncation"
    );
}

#[test]
fn test_autosplit_piece_count_and_area() {
    let mut config = quiet_config();
    config.player_autosplit_size = 100.0;
    config.player_autosplit_delay = 100.0;
    let mut engine = Engine::new(config, 5).unwrap();

    let id = engine.attach("heavy".into()).unwrap();
    engine
        .spawn_cell(0.0, 0.0, 150.0, CellKind::Player(id))
        .unwrap();

    // ratio = 150^2 / 100^2 = 2.25, so ceil gives 3 pieces
    for _ in 0..4 {
        engine.tick(TICK).unwrap();
    }

    let cells: Vec<u16> = engine.directory().set(id).iter().copied().collect();
    assert_eq!(cells.len(), 3, "area ratio 2.25 autosplits into 3 pieces");
    let mut total = 0.0f32;
    for &c in &cells {
        let r = engine.arena().r(c);
        assert!(r <= 100.0 + 0.5, "piece radius {r} above the threshold");
        total += r * r;
    }
    assert!(
        (total - 150.0f32 * 150.0).abs() < 150.0 * 150.0 * 0.01,
        "autosplit conserves area, got {total}"
    );
}

#[test]
fn test_environment_fills_to_caps() {
    let mut config = quiet_config();
    config.pellet_count = 120;
    config.virus_count = 8;
    config.max_cell_per_tick = 50;
    let mut engine = Engine::new(config, 6).unwrap();

    for _ in 0..5 {
        engine.tick(TICK).unwrap();
    }

    assert_eq!(engine.directory().count(PELLET_TYPE), 120);
    assert_eq!(engine.directory().count(VIRUS_TYPE), 8);
    // throttle: at most max_cell_per_tick per type per tick
    let mut engine2 = Engine::new(
        EngineConfig {
            pellet_count: 120,
            ..quiet_config()
        },
        6,
    )
    .unwrap();
    engine2.tick(TICK).unwrap();
    assert_eq!(
        engine2.directory().count(PELLET_TYPE),
        50,
        "pellet spawns are throttled per tick"
    );
}

#[test]
fn test_slot_and_directory_consistency_under_churn() {
    let mut config = quiet_config();
    config.pellet_count = 200;
    config.virus_count = 10;
    config.map_hw = 3000.0;
    config.map_hh = 3000.0;
    let mut engine = Engine::new(config, 7).unwrap();

    let id = engine.attach("eater".into()).unwrap();
    engine
        .spawn_cell(0.0, 0.0, 300.0, CellKind::Player(id))
        .unwrap();

    for i in 0..150 {
        // sweep the map so the player churns through pellets
        let angle = i as f32 * 0.4;
        engine
            .game_mut()
            .controller_mut(id)
            .set_mouse(2500.0 * angle.sin(), 2500.0 * angle.cos());
        engine.tick(TICK).unwrap();

        let mut seen = std::collections::HashSet::new();
        for (ty, slot) in engine.directory().iter_grouped() {
            assert!(seen.insert(slot), "slot {slot} listed twice at tick {i}");
            assert!(
                engine.arena().exists(slot),
                "directory lists non-existing slot {slot} at tick {i}"
            );
            assert_eq!(
                engine.arena().type_byte(slot),
                ty,
                "type mismatch for slot {slot} at tick {i}"
            );
            assert_eq!(engine.directory().membership_count(slot), 1);
        }
        assert_eq!(
            engine.cell_count(),
            engine.directory().total(),
            "live count drifted from directory at tick {i}"
        );
    }

    assert!(
        engine.game().controller(id).score > 300.0f32 * 300.0 / 100.0,
        "sweeping player should have eaten pellets and grown"
    );
}

#[test]
fn test_respawn_request_honors_delay_gate() {
    let mut engine = Engine::new(quiet_config(), 8).unwrap();
    let id = engine.attach("phoenix".into()).unwrap();

    // Age the clock past the early-game grace window (3000 ms)
    for _ in 0..70 {
        engine.tick(TICK).unwrap();
    }

    // Request passes the gate on the next tick, cell appears the tick after
    engine.game_mut().controller_mut(id).request_spawn();
    engine.tick(TICK).unwrap();
    let events = engine.tick(TICK).unwrap();
    assert!(
        events.iter().any(|e| matches!(e, EngineEvent::Spawned { id: s } if *s == id)),
        "spawn request past the delay window is honored"
    );
    assert!(engine.game().controller(id).alive);
    assert_eq!(engine.directory().count(id), 1);

    // Re-requesting right away sits inside the per-seat delay window
    engine.game_mut().controller_mut(id).request_spawn();
    let a = engine.tick(TICK).unwrap();
    let b = engine.tick(TICK).unwrap();
    assert!(
        !a.iter()
            .chain(b.iter())
            .any(|e| matches!(e, EngineEvent::Spawned { .. })),
        "respawn inside the delay window is dropped"
    );
    assert_eq!(engine.directory().count(id), 1, "the live cell is untouched");
    assert_eq!(
        engine.directory().count(cytos::core::types::DEAD_TYPE),
        0,
        "a dropped request must not kill the live cell"
    );
}

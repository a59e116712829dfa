//! Tick throughput benchmark: a populated world with active bots

use criterion::{criterion_group, criterion_main, Criterion};

use cytos::core::config::EngineConfig;
use cytos::engine::Engine;

fn populated_engine() -> Engine {
    let config = EngineConfig {
        cell_limit: 16384,
        pellet_count: 2000,
        virus_count: 30,
        bots: 10,
        map_hw: 8000.0,
        map_hh: 8000.0,
        ..Default::default()
    };
    let mut engine = Engine::new(config, 42).expect("valid config");
    engine.attach("bench".to_string()).expect("seat available");
    // Warm up: fill environment caps and let bots join and spawn
    for _ in 0..100 {
        engine.tick(50.0).expect("tick");
    }
    engine
}

fn bench_tick(c: &mut Criterion) {
    let mut engine = populated_engine();
    c.bench_function("tick_populated_world", |b| {
        b.iter(|| engine.tick(50.0).expect("tick"))
    });

    let mut quiet = Engine::new(
        EngineConfig {
            cell_limit: 4096,
            pellet_count: 0,
            virus_count: 0,
            bots: 0,
            ..Default::default()
        },
        42,
    )
    .expect("valid config");
    c.bench_function("tick_empty_world", |b| {
        b.iter(|| quiet.tick(50.0).expect("tick"))
    });
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);

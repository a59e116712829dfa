//! Tick orchestration: the engine that owns the arena and drives the world
//!
//! One [`Engine`] exclusively owns the arena, the entity directory, and
//! the spatial index. `tick(dt)` runs the full fixed-rate phase sequence;
//! nothing else mutates simulation state. Hosts interact through seat
//! attachment, input intent on controllers, viewport queries against the
//! latest snapshot, and the event stream each tick returns.
//!
//! Exclusive ownership through `&mut self` is also the re-entrancy
//! guard: a tick cannot start while another is in flight.

pub mod mass;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info};

use crate::arena::directory::EntityDirectory;
use crate::arena::{
    Arena, FLAG_AUTOSPLIT, FLAG_POPPED, FLAG_REMOVED, FLAG_UPDATED,
};
use crate::core::config::EngineConfig;
use crate::core::error::{EngineError, Result};
use crate::core::types::{
    Aabb, CellKind, DEAD_TYPE, EJECTED_TYPE, MAX_PLAYERS, MOTHER_TYPE, PELLET_TYPE,
    PLAYER_TYPE_MAX, PlayerId, SlotId, Vec2, VIRUS_TYPE,
};
use crate::game::{Bot, BotSighting, EngineEvent, Game, Handle, LeaderboardEntry};
use crate::kernel;
use crate::spatial::QuadTree;

pub struct Engine {
    config: EngineConfig,
    arena: Arena,
    directory: EntityDirectory,
    tree: QuadTree,
    game: Game,
    rng: ChaCha8Rng,

    /// Engine clock in ms, advanced by dt each tick.
    now_ms: f32,
    cell_count: usize,
    next_cell_id: SlotId,
    /// Slots freed by the last post-resolution pass; they lead the next
    /// index buffer so the kernel reclaims their memory.
    removed_cells: Vec<SlotId>,
    /// Slots detached by the non-replace kill path this tick; they are
    /// not in the rebuilt index buffer, so post-resolution folds them
    /// into the freed prefix explicitly.
    killed_cells: Vec<SlotId>,
    kill_queue: Vec<(PlayerId, bool)>,
    spawn_queue: Vec<PlayerId>,
    alive_players: Vec<PlayerId>,

    indices_at: usize,
    /// Entries in the index buffer including the sentinel.
    indices_len: usize,
    /// Offset of the current snapshot; 0 before the first serialize.
    tree_at: usize,
    stack_at: usize,

    should_restart: bool,
    /// Latched on the first fatal tick error; the arena may be mid-phase,
    /// so no further ticks run.
    stopped: bool,
    collisions: u32,
    leaderboard: Vec<LeaderboardEntry>,
    bot_seq: usize,
    /// Join/leave notifications raised between ticks, delivered with the
    /// next tick's event batch.
    pending_events: Vec<EngineEvent>,
}

impl Engine {
    pub fn new(config: EngineConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let arena = Arena::new(&config);
        let tree = QuadTree::new(
            config.map_hw,
            config.map_hh,
            config.quadtree_max_level,
            config.quadtree_max_items,
            config.cell_limit,
        );
        let game = Game::new(config.map_hw, config.map_hh);
        let indices_at = arena.cells_end();
        info!(
            cell_limit = config.cell_limit,
            map_hw = config.map_hw,
            map_hh = config.map_hh,
            "engine initialized"
        );
        Ok(Self {
            config,
            arena,
            directory: EntityDirectory::new(),
            tree,
            game,
            rng: ChaCha8Rng::seed_from_u64(seed),
            now_ms: 0.0,
            cell_count: 0,
            next_cell_id: 1,
            removed_cells: Vec::new(),
            killed_cells: Vec::new(),
            kill_queue: Vec::new(),
            spawn_queue: Vec::new(),
            alive_players: Vec::new(),
            indices_at,
            indices_len: 0,
            tree_at: 0,
            stack_at: 0,
            should_restart: false,
            stopped: false,
            collisions: 0,
            leaderboard: Vec::new(),
            bot_seq: 0,
            pending_events: Vec::new(),
        })
    }

    // --- host surface ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn directory(&self) -> &EntityDirectory {
        &self.directory
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn collisions(&self) -> u32 {
        self.collisions
    }

    pub fn now_ms(&self) -> f32 {
        self.now_ms
    }

    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    /// Current index buffer contents, sentinel excluded.
    pub fn indices(&self) -> Vec<SlotId> {
        let mut out = Vec::new();
        let mut at = self.indices_at;
        loop {
            let id = self.arena.read_u16(at);
            if id == 0 {
                break;
            }
            out.push(id);
            at += 2;
        }
        out
    }

    /// Seat a remote participant.
    pub fn attach(&mut self, name: String) -> Result<PlayerId> {
        let id = self.game.attach(Handle::Player { name })?;
        info!(id, "participant joined");
        self.pending_events.push(EngineEvent::Joined { id });
        Ok(id)
    }

    /// Free a seat; its cells die (with dead-cell replacement) on the
    /// next tick.
    pub fn detach(&mut self, id: PlayerId) -> bool {
        self.delay_kill(id, true);
        let freed = self
            .game
            .detach(id, self.config.map_hw, self.config.map_hh);
        if freed {
            info!(id, "participant left");
            self.pending_events.push(EngineEvent::Left { id });
        }
        freed
    }

    /// Queue a respawn for the next tick's spawn phase.
    pub fn delay_spawn(&mut self, id: PlayerId) {
        self.spawn_queue.push(id);
    }

    /// Queue a kill. Silently ignored when the seat has nothing alive.
    pub fn delay_kill(&mut self, id: PlayerId, replace: bool) {
        if !self.game.controller(id).alive {
            return;
        }
        self.kill_queue.push((id, replace));
    }

    /// Slot ids intersecting a controller's viewport, read from the
    /// latest snapshot. Valid between ticks.
    pub fn query(&mut self, id: PlayerId) -> Vec<SlotId> {
        let v = self.game.controller(id).viewport;
        self.query_rect(
            v.center.x - v.hw,
            v.center.x + v.hw,
            v.center.y - v.hh,
            v.center.y + v.hh,
        )
    }

    pub fn query_rect(&mut self, l: f32, r: f32, b: f32, t: f32) -> Vec<SlotId> {
        if self.tree_at == 0 {
            return Vec::new();
        }
        let mut list_at = self.stack_at + 4 * 4 * self.config.quadtree_max_level;
        list_at += list_at % 2;
        let len = kernel::select(&mut self.arena, self.tree_at, self.stack_at, list_at, l, r, b, t);
        (0..len)
            .map(|i| self.arena.read_u16(list_at + i * 2))
            .collect()
    }

    /// Spawn one cell directly. Mostly a hook for hosts and tests; the
    /// tick's own spawn phase goes through the same slot allocator.
    pub fn spawn_cell(&mut self, x: f32, y: f32, r: f32, kind: CellKind) -> Result<SlotId> {
        self.new_cell(x, y, r, kind.to_byte(), 0.0, 0.0, 0.0, true)
    }

    // --- the tick ---

    pub fn tick(&mut self, dt: f32) -> Result<Vec<EngineEvent>> {
        if self.stopped {
            return Err(EngineError::Halted);
        }
        let result = self.run_tick(dt);
        if result.is_err() {
            self.stopped = true;
            error!("engine stopped");
        }
        result
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn run_tick(&mut self, dt: f32) -> Result<Vec<EngineEvent>> {
        let mut events = std::mem::take(&mut self.pending_events);
        // Ages advance by whole ms of the accumulated clock, so at
        // fractional tick lengths no time is lost to truncation.
        let before_ms = self.now_ms as u32;
        self.now_ms += dt;
        let age_dt = self.now_ms as u32 - before_ms;

        if self.should_restart {
            self.restart();
            events.push(EngineEvent::Restarted);
        }

        self.maybe_attach_bot();
        self.refresh_alive();
        self.alive_players = self
            .game
            .controllers
            .iter()
            .filter(|c| c.alive && !c.is_bot())
            .map(|c| c.id)
            .collect();

        // Stale snapshot over the whole auxiliary region; this is what
        // host queries and bot decisions see for the rest of the tick.
        self.tree_at = self.arena.cells_end();
        self.serialize_tree();

        self.run_bots();
        self.spawn_cells(&mut events)?;
        self.handle_inputs(dt, &mut events)?;
        self.update_indices();
        self.update_cells(dt, age_dt);
        self.update_player_cells(dt);
        self.update_tree()?;

        // Deferred kills: flags must be readable by resolve before the
        // slots are reclaimed
        let kills = std::mem::take(&mut self.kill_queue);
        for (id, replace) in kills {
            self.kill(id, replace)?;
        }
        self.refresh_alive();

        self.sort_indices();
        self.serialize_tree();

        self.collisions = kernel::resolve(
            &mut self.arena,
            self.indices_at,
            self.directory.count(PELLET_TYPE),
            self.tree_at,
            self.stack_at,
            &kernel::ResolveParams {
                no_colli_delay: self.config.player_no_colli_delay,
                eat_overlap: self.config.eat_overlap,
                eat_mult: self.config.eat_mult,
                virus_max_size: self.config.virus_max_size(),
                dead_delay: self.config.player_dead_delay,
            },
        );

        self.post_resolve()?;
        self.update_leaderboard();

        events.push(EngineEvent::TickCompleted {
            collisions: self.collisions,
        });
        Ok(events)
    }

    /// One bot per tick while at least one human is seated and the bot
    /// population is under the configured count.
    fn maybe_attach_bot(&mut self) {
        let bots = self.game.bot_count();
        let humans = self.game.handle_count() - bots;
        if humans > 0 && bots < self.config.bots {
            let bot = Bot::new(self.bot_seq);
            self.bot_seq += 1;
            if let Ok(id) = self.game.attach(Handle::Bot(bot)) {
                debug!(id, "bot attached");
            }
        }
    }

    fn refresh_alive(&mut self) {
        for id in 1..MAX_PLAYERS as u8 {
            self.game.controllers[id as usize].alive = self.directory.count(id) > 0;
        }
    }

    /// Fill in bot input intent from the stale snapshot, exactly the
    /// view a remote client would have.
    fn run_bots(&mut self) {
        for id in 1..MAX_PLAYERS as u8 {
            if !self.game.controller(id).is_bot() {
                continue;
            }
            if !self.game.controller(id).alive {
                self.game.controller_mut(id).request_spawn();
                continue;
            }

            let own_pos = self.game.controller(id).viewport.center;
            let own_r = self
                .directory
                .set(id)
                .iter()
                .map(|&c| self.arena.r(c))
                .fold(0.0f32, f32::max);

            let seen = self.query(id);
            let sightings: Vec<BotSighting> = seen
                .iter()
                .filter(|&&c| self.arena.type_byte(c) != id && self.arena.exists(c))
                .map(|&c| BotSighting {
                    pos: Vec2::new(self.arena.x(c), self.arena.y(c)),
                    r: self.arena.r(c),
                    is_player: self.arena.type_byte(c) <= PLAYER_TYPE_MAX,
                })
                .collect();

            let controller = self.game.controller_mut(id);
            if let Some(Handle::Bot(bot)) = controller.handle.as_mut() {
                let target = bot.aim(&mut self.rng, own_pos, own_r, &sightings);
                controller.mouse = target;
            }
        }
    }

    fn spawn_cells(&mut self, events: &mut Vec<EngineEvent>) -> Result<()> {
        for _ in 0..self.config.max_cell_per_tick {
            if self.directory.count(PELLET_TYPE) >= self.config.pellet_count {
                break;
            }
            let size = self.config.pellet_size;
            let p = self.safe_spawn_point(size);
            self.new_cell(p.x, p.y, size, PELLET_TYPE, 0.0, 0.0, 0.0, true)?;
        }

        for _ in 0..self.config.max_cell_per_tick {
            if self.directory.count(VIRUS_TYPE) >= self.config.virus_count {
                break;
            }
            let size = self.config.virus_size;
            let p = self.safe_spawn_point(size);
            self.new_cell(p.x, p.y, size, VIRUS_TYPE, 0.0, 0.0, 0.0, true)?;
        }

        for _ in 0..self.config.max_cell_per_tick {
            if self.directory.count(MOTHER_TYPE) >= self.config.mother_cell_count {
                break;
            }
            let size = self.config.mother_cell_size;
            let p = self.safe_spawn_point(size);
            self.new_cell(p.x, p.y, size, MOTHER_TYPE, 0.0, 0.0, 0.0, true)?;
        }

        let queued = std::mem::take(&mut self.spawn_queue);
        for id in queued {
            let (point, size) = if self.game.controller(id).is_bot() {
                let s = self.config.bot_spawn_size;
                (self.safe_spawn_point(s), s)
            } else {
                (self.player_spawn_point(), self.config.player_spawn_size)
            };
            self.new_cell(point.x, point.y, size, id, 0.0, 0.0, 0.0, true)?;
            self.game.controller_mut(id).after_spawn();
            events.push(EngineEvent::Spawned { id });
        }
        Ok(())
    }

    fn handle_inputs(&mut self, dt: f32, events: &mut Vec<EngineEvent>) -> Result<()> {
        for id in 1..MAX_PLAYERS as u8 {
            if self.game.controller(id).handle.is_none() {
                continue;
            }

            self.handle_splits(id)?;
            self.handle_ejects(id, dt)?;

            if self.game.controller(id).alive {
                self.derive_viewport(id);

                let score = self.game.controller(id).score;
                if score > self.config.oversize_score() {
                    events.push(EngineEvent::Oversize { id, score });
                    info!(id, score, "oversize");
                    if self.config.world_kill_oversize {
                        self.delay_kill(id, false);
                    } else {
                        self.should_restart = true;
                    }
                }
            }

            // Spawn requests pass the delay gate or are dropped; either
            // way the flag does not linger
            let c = self.game.controller(id);
            if c.spawn_requested
                && (self.now_ms <= self.config.player_spawn_delay
                    || self.now_ms >= c.last_spawn_ms + self.config.player_spawn_delay)
            {
                self.game.controller_mut(id).spawn_requested = false;
                self.game.controller_mut(id).last_spawn_ms = self.now_ms;
                self.delay_kill(id, true);
                self.delay_spawn(id);
            } else {
                self.game.controller_mut(id).spawn_requested = false;
            }
        }
        Ok(())
    }

    fn handle_splits(&mut self, id: PlayerId) -> Result<()> {
        let mut budget = self.config.player_split_cap;
        while self.game.controller(id).split_attempts > 0 && budget > 0 {
            budget -= 1;
            let owned: Vec<SlotId> = self.directory.set(id).iter().copied().collect();
            for cell_id in owned {
                if self.directory.count(id) >= self.config.player_max_cells {
                    break;
                }
                let r = self.arena.r(cell_id);
                if r < self.config.player_min_split_size {
                    continue;
                }
                let pos = Vec2::new(self.arena.x(cell_id), self.arena.y(cell_id));
                let dir = pos.direction_to(&self.game.controller(id).mouse);
                self.split_from_cell(
                    cell_id,
                    r / std::f32::consts::SQRT_2,
                    dir.x,
                    dir.y,
                    self.config.player_split_boost,
                )?;
            }
            self.game.controller_mut(id).split_attempts -= 1;
        }
        Ok(())
    }

    fn handle_ejects(&mut self, id: PlayerId, dt: f32) -> Result<()> {
        let gate = self.game.controller(id).last_popped_ms + self.config.player_no_eject_pop_delay;
        if self.now_ms <= gate {
            return Ok(());
        }

        let mut ejected = 0u32;
        let mut budget = (dt / self.config.eject_delay).ceil() as i32;
        loop {
            let c = self.game.controller(id);
            if c.last_eject_ms > self.now_ms + dt
                || (c.eject_attempts == 0 && !c.eject_macro)
                || budget <= 0
            {
                break;
            }
            budget -= 1;
            ejected += 1;
            {
                let c = self.game.controller_mut(id);
                c.eject_attempts = c.eject_attempts.saturating_sub(1);
            }

            let loss = self.config.eject_loss * self.config.eject_loss;
            let owned: Vec<SlotId> = self.directory.set(id).iter().copied().collect();
            for cell_id in owned {
                let r = self.arena.r(cell_id);
                if r < self.config.player_min_eject_size {
                    continue;
                }
                if (self.arena.age(cell_id) as f32) < self.config.player_no_eject_delay {
                    continue;
                }
                let pos = Vec2::new(self.arena.x(cell_id), self.arena.y(cell_id));
                let dir = pos.direction_to(&self.game.controller(id).mouse);
                let sx = pos.x + dir.x * r;
                let sy = pos.y + dir.y * r;
                let a = f32::atan2(dir.x, dir.y) - self.config.eject_dispersion
                    + self.rng.gen::<f32>() * 2.0 * self.config.eject_dispersion;
                self.new_cell(
                    sx,
                    sy,
                    self.config.eject_size,
                    EJECTED_TYPE,
                    a.sin(),
                    a.cos(),
                    self.config.eject_boost,
                    true,
                )?;
                self.arena.set_r(cell_id, (r * r - loss).sqrt());
                self.arena.raise_flags(cell_id, FLAG_UPDATED);
            }

            self.game.controller_mut(id).last_eject_ms =
                self.now_ms + ejected as f32 * self.config.eject_delay;
        }
        Ok(())
    }

    /// Size-weighted centroid, bounding box, score, and the viewport
    /// half-extents derived from them.
    fn derive_viewport(&mut self, id: PlayerId) {
        let mut bounds = Aabb::inverted(self.config.map_hw, self.config.map_hh);
        let (mut size, mut score) = (0.0f32, 0.0f32);
        let (mut x, mut y) = (0.0f32, 0.0f32);
        let count = self.directory.count(id);
        for &cell_id in self.directory.set(id) {
            let (cx, cy, r) = (
                self.arena.x(cell_id),
                self.arena.y(cell_id),
                self.arena.r(cell_id),
            );
            x += cx * r;
            y += cy * r;
            bounds.include(cx, cy);
            score += r * r / 100.0;
            size += r;
        }

        if size == 0.0 {
            size = 1.0;
        }
        let center = Vec2::new(x / size, y / size);
        let factor = (count as f32 + 50.0).powf(0.1);
        let base = ((factor + 1.0) * (score * 100.0).sqrt()).max(self.config.player_view_min);
        let hw = base
            .max((center.x - bounds.l) * 1.75)
            .max((bounds.r - center.x) * 1.75);
        let hh = base
            .max((center.y - bounds.b) * 1.75)
            .max((bounds.t - center.y) * 1.75);

        let c = self.game.controller_mut(id);
        c.bounds = bounds;
        c.viewport.center = center;
        c.viewport.hw = hw * self.config.player_view_scale;
        c.viewport.hh = hh * self.config.player_view_scale;
        c.score = score;
        c.max_score = c.max_score.max(score);
    }

    /// Rebuild the index buffer: freed slots first (the type-0 segment),
    /// then every live id grouped by ascending type.
    fn update_indices(&mut self) {
        let mut at = self.indices_at;
        for &id in &self.removed_cells {
            self.arena.write_u16(at, id);
            at += 2;
        }
        let grouped: Vec<SlotId> = self.directory.iter_grouped().map(|(_, id)| id).collect();
        for id in grouped {
            self.arena.write_u16(at, id);
            at += 2;
        }
        self.arena.write_u16(at, 0);
        at += 2;

        self.indices_len = (at - self.indices_at) / 2;
        self.tree_at = at;
    }

    fn update_cells(&mut self, dt: f32, age_dt: u32) {
        let mut scores = [0.0f32; 256];
        for c in &self.game.controllers {
            scores[c.id as usize] = c.score;
        }
        kernel::update_cells(
            &mut self.arena,
            self.indices_at,
            &scores,
            &kernel::UpdateParams {
                dt,
                age_dt,
                eject_max_age: self.config.eject_max_age,
                autosplit_size: self.config.player_autosplit_size,
                decay_min: self.config.decay_min,
                static_decay: self.config.static_decay,
                dynamic_decay: self.config.dynamic_decay,
                bounds: kernel::WorldBounds {
                    l: -self.config.map_hw,
                    r: self.config.map_hw,
                    b: -self.config.map_hh,
                    t: self.config.map_hh,
                },
            },
        );
    }

    /// Steering pass, one kernel call per seated controller. The cursor
    /// advances by the segment length even for unseated types so the
    /// buffer walk never drifts out of alignment.
    fn update_player_cells(&mut self, dt: f32) {
        let merge_initial = (1000.0 * self.config.player_merge_time).round();
        let mut at = self.indices_at + self.removed_cells.len() * 2;
        for id in 1..MAX_PLAYERS as u8 {
            let count = self.directory.count(id);
            if count > 0 && self.game.controller(id).handle.is_some() {
                let c = self.game.controller(id);
                let params = kernel::PlayerUpdateParams {
                    target: c.mouse,
                    lock_dir: c.lock_dir,
                    line: c.line,
                    dt,
                    merge_initial,
                    merge_increase: self.config.player_merge_increase,
                    speed: self.config.player_speed,
                    merge_time: self.config.player_merge_time,
                    no_merge_delay: self.config.player_no_merge_delay,
                    merge_new_version: self.config.player_merge_new_ver,
                };
                kernel::update_player_cells(&mut self.arena, at, count, &params);
            }
            at += count * 2;
        }
    }

    /// Autosplit oversized player cells, then refresh the live tree for
    /// every touched cell.
    fn update_tree(&mut self) -> Result<()> {
        let start = self.removed_cells.len();
        let ids: Vec<SlotId> = (start..self.indices_len.saturating_sub(1))
            .map(|i| self.arena.read_u16(self.indices_at + i * 2))
            .collect();

        let auto = self.config.player_autosplit_size;
        for id in ids {
            if auto > 0.0
                && self.arena.has_flags(id, FLAG_AUTOSPLIT)
                && self.arena.age(id) as f32 > self.config.player_autosplit_delay
            {
                let r = self.arena.r(id);
                let split_times = (r * r / (auto * auto)).ceil();
                let split_size = (r * r / split_times).sqrt().min(auto);
                for _ in 1..split_times as usize {
                    let angle = self.rng.gen::<f32>() * std::f32::consts::TAU;
                    self.split_from_cell(
                        id,
                        split_size,
                        angle.sin(),
                        angle.cos(),
                        self.config.player_split_boost,
                    )?;
                }
                self.arena.set_r(id, split_size);
                self.arena.raise_flags(id, FLAG_UPDATED);
            }

            if self.arena.type_byte(id) > PLAYER_TYPE_MAX && !self.arena.has_flags(id, FLAG_UPDATED)
            {
                continue;
            }
            self.tree
                .update(id, self.arena.x(id), self.arena.y(id), self.arena.r(id));
        }
        Ok(())
    }

    /// Kill a seat's cells. With `replace`, each live cell is swapped
    /// for a dead-cell twin that keeps the spatial entry alive until the
    /// dead delay expires.
    fn kill(&mut self, id: PlayerId, replace: bool) -> Result<()> {
        let owned: Vec<SlotId> = self.directory.set(id).iter().copied().collect();
        if replace {
            for cell_id in owned {
                let twin = self.new_cell(
                    self.arena.x(cell_id),
                    self.arena.y(cell_id),
                    self.arena.r(cell_id),
                    DEAD_TYPE,
                    self.arena.boost_x(cell_id),
                    self.arena.boost_y(cell_id),
                    self.arena.boost(cell_id),
                    false,
                )?;
                self.tree.swap(cell_id, twin);
                kernel::clear_cell(&mut self.arena, cell_id);
            }
        } else {
            for cell_id in owned {
                self.arena.raise_flags(cell_id, FLAG_REMOVED);
                self.tree.remove(cell_id);
                self.killed_cells.push(cell_id);
            }
        }
        self.directory.clear_type(id);
        Ok(())
    }

    /// Rebuild the index buffer without the freed prefix, then sort each
    /// player segment descending by size.
    fn sort_indices(&mut self) {
        let mut at = self.indices_at;
        let grouped: Vec<SlotId> = self.directory.iter_grouped().map(|(_, id)| id).collect();
        for id in grouped {
            self.arena.write_u16(at, id);
            at += 2;
        }
        self.arena.write_u16(at, 0);
        at += 2;
        self.indices_len = (at - self.indices_at) / 2;
        self.tree_at = at;

        let mut seg = self.indices_at;
        let lens: Vec<(u8, usize)> = self.directory.player_segment_lens().collect();
        for (_, count) in lens {
            kernel::sort_indices(&mut self.arena, seg, count);
            seg += count * 2;
        }
    }

    fn serialize_tree(&mut self) {
        let written = self.tree.serialize(&mut self.arena, self.tree_at);
        self.stack_at = self.tree_at + written;
    }

    fn post_resolve(&mut self) -> Result<()> {
        self.removed_cells.clear();
        // Outright-killed slots are already out of the tree, directory,
        // and index buffer; queue their memory for reclaim.
        let killed = std::mem::take(&mut self.killed_cells);
        for id in killed {
            self.removed_cells.push(id);
            self.cell_count -= 1;
        }
        let ids: Vec<SlotId> = (0..self.indices_len.saturating_sub(1))
            .map(|i| self.arena.read_u16(self.indices_at + i * 2))
            .collect();

        for id in ids {
            if self.arena.has_flags(id, FLAG_REMOVED) {
                let ty = self.arena.type_byte(id);
                self.tree.remove(id);
                self.directory.remove(ty, id);
                self.removed_cells.push(id);
                self.cell_count -= 1;
            } else if self.arena.has_flags(id, FLAG_POPPED) {
                let ty = self.arena.type_byte(id);
                if ty == VIRUS_TYPE {
                    self.pop_virus(id)?;
                } else if ty <= PLAYER_TYPE_MAX {
                    self.pop_player_cell(id)?;
                } else {
                    // a fed mother cell just grows; keep its index fresh
                    self.tree
                        .update(id, self.arena.x(id), self.arena.y(id), self.arena.r(id));
                }
            } else if self.arena.has_flags(id, FLAG_UPDATED) {
                self.tree
                    .update(id, self.arena.x(id), self.arena.y(id), self.arena.r(id));
            }
        }
        Ok(())
    }

    /// A fed virus shrinks back and buds a new one along the bearing of
    /// the last feeding.
    fn pop_virus(&mut self, id: SlotId) -> Result<()> {
        self.arena.set_r(id, self.config.virus_size);
        self.tree
            .update(id, self.arena.x(id), self.arena.y(id), self.arena.r(id));
        let angle = f32::atan2(self.arena.boost_x(id), self.arena.boost_y(id));
        self.new_cell(
            self.arena.x(id),
            self.arena.y(id),
            self.config.virus_size,
            VIRUS_TYPE,
            angle.sin(),
            angle.cos(),
            self.config.virus_split_boost,
            true,
        )?;
        Ok(())
    }

    fn pop_player_cell(&mut self, id: SlotId) -> Result<()> {
        let owner = self.arena.type_byte(id);
        self.game.controller_mut(owner).last_popped_ms = self.now_ms;

        let r = self.arena.r(id);
        let cells_left = self
            .config
            .player_max_cells
            .saturating_sub(self.directory.count(owner));
        let min = self.config.player_min_split_size;
        let splits = mass::distribute_cell_mass(
            r * r / 100.0,
            cells_left,
            min * min / 100.0,
            self.config.virus_monotone_pop,
        );
        if !splits.is_empty() {
            self.game.controller_mut(owner).clear_lock();
        }
        for piece in splits {
            let angle = self.rng.gen::<f32>() * std::f32::consts::TAU;
            self.split_from_cell(
                id,
                (piece * 100.0).sqrt(),
                angle.sin(),
                angle.cos(),
                self.config.player_split_boost,
            )?;
        }
        Ok(())
    }

    /// Carve `size` off a parent cell into a new cell of the same type,
    /// launched along (bx, by).
    fn split_from_cell(
        &mut self,
        parent: SlotId,
        size: f32,
        bx: f32,
        by: f32,
        boost: f32,
    ) -> Result<SlotId> {
        let r = self.arena.r(parent);
        self.arena.set_r(parent, (r * r - size * size).sqrt());
        self.arena.raise_flags(parent, FLAG_UPDATED);
        let x = self.arena.x(parent) + self.config.player_split_dist * bx;
        let y = self.arena.y(parent) + self.config.player_split_dist * by;
        let ty = self.arena.type_byte(parent);
        self.new_cell(x, y, size, ty, bx, by, boost, true)
    }

    /// Allocate a slot by round-robin scan and stamp the record.
    /// Capacity exhaustion and scan starvation are fatal.
    #[allow(clippy::too_many_arguments)]
    fn new_cell(
        &mut self,
        x: f32,
        y: f32,
        r: f32,
        type_byte: u8,
        boost_x: f32,
        boost_y: f32,
        boost: f32,
        insert: bool,
    ) -> Result<SlotId> {
        let limit = self.config.cell_limit;
        if self.cell_count >= limit - 1 {
            error!(live = self.cell_count, limit, "cell limit reached");
            return Err(EngineError::CellLimitReached {
                live: self.cell_count,
                limit,
            });
        }

        let mut probes = 0usize;
        while self.arena.exists(self.next_cell_id) {
            let next = (self.next_cell_id as usize + 1) % limit;
            self.next_cell_id = if next == 0 { 1 } else { next as SlotId };
            probes += 1;
            if probes >= limit {
                error!(probes, live = self.cell_count, "slot scan exhausted");
                return Err(EngineError::SlotScanExhausted {
                    probes,
                    live: self.cell_count,
                });
            }
        }

        let id = self.next_cell_id;
        self.arena
            .stamp(id, x, y, r, type_byte, boost_x, boost_y, boost);
        if insert {
            self.tree.insert(id, x, y, r);
            self.cell_count += 1;
        }
        self.directory.insert(type_byte, id);
        Ok(id)
    }

    // --- spawn placement ---

    fn random_point(&mut self, size: f32, rect: Option<Aabb>) -> Vec2 {
        let hw = self.config.map_hw;
        let hh = self.config.map_hh;
        let clamp = |v: f32, lo: f32, hi: f32| v.max(lo).min(hi);
        let (mut xmin, mut xmax, mut ymin, mut ymax) = match rect {
            Some(b) => (b.l, b.r, b.b, b.t),
            None => (-hw, hw, -hh, hh),
        };
        xmin = clamp(xmin, -hw + size, hw - size);
        xmax = clamp(xmax, -hw + size, hw - size);
        ymin = clamp(ymin, -hh + size, hh - size);
        ymax = clamp(ymax, -hh + size, hh - size);
        if xmin > xmax {
            std::mem::swap(&mut xmin, &mut xmax);
        }
        if ymin > ymax {
            std::mem::swap(&mut ymin, &mut ymax);
        }
        Vec2::new(
            self.rng.gen_range(xmin..=xmax),
            self.rng.gen_range(ymin..=ymax),
        )
    }

    /// Best-effort clear placement: random candidates tested against the
    /// snapshot, falling back to an arbitrary point when the attempt
    /// budget runs out.
    pub fn safe_spawn_point(&mut self, size: f32) -> Vec2 {
        if self.tree_at == 0 {
            return self.random_point(size, None);
        }
        for _ in 1..self.config.safe_spawn_tries {
            let p = self.random_point(size, None);
            let clearance = size * self.config.safe_spawn_radius;
            if kernel::is_safe(&mut self.arena, p.x, p.y, clearance, self.tree_at, self.stack_at)
                > 0
            {
                return p;
            }
        }
        self.random_point(size, None)
    }

    /// Player spawns bias toward a random living human's neighborhood.
    fn player_spawn_point(&mut self) -> Vec2 {
        if !self.alive_players.is_empty() && self.tree_at != 0 {
            let size = self.config.player_spawn_size;
            let clearance = size * self.config.safe_spawn_radius;
            let pick = self.alive_players[self.rng.gen_range(0..self.alive_players.len())];
            let rect = self
                .game
                .controller(pick)
                .bounds
                .expand(self.config.player_view_min);
            for _ in 1..self.config.safe_spawn_tries {
                let p = self.random_point(size, Some(rect));
                if kernel::is_safe(
                    &mut self.arena,
                    p.x,
                    p.y,
                    clearance,
                    self.tree_at,
                    self.stack_at,
                ) > 0
                {
                    return p;
                }
            }
        }
        self.safe_spawn_point(self.config.player_spawn_size)
    }

    // --- restart / leaderboard ---

    /// Wipe the world, keeping seats and handles.
    fn restart(&mut self) {
        info!("world restart");
        self.should_restart = false;
        self.arena.zero_all();
        self.directory.clear_all();
        self.tree = QuadTree::new(
            self.config.map_hw,
            self.config.map_hh,
            self.config.quadtree_max_level,
            self.config.quadtree_max_items,
            self.config.cell_limit,
        );
        self.cell_count = 0;
        self.next_cell_id = 1;
        self.removed_cells.clear();
        self.killed_cells.clear();
        self.kill_queue.clear();
        self.spawn_queue.clear();
        self.indices_len = 0;
        self.tree_at = 0;
        self.stack_at = 0;
        self.collisions = 0;
        self.leaderboard.clear();
        for c in &mut self.game.controllers {
            c.reset_round(self.config.map_hw, self.config.map_hh);
        }
    }

    fn update_leaderboard(&mut self) {
        use ordered_float::OrderedFloat;
        let mut rows: Vec<LeaderboardEntry> = self
            .game
            .controllers
            .iter()
            .filter(|c| c.alive)
            .map(|c| LeaderboardEntry {
                id: c.id,
                name: c.name().unwrap_or("?").to_string(),
                score: c.score,
            })
            .collect();
        rows.sort_by_key(|row| std::cmp::Reverse(OrderedFloat(row.score)));
        self.leaderboard = rows;
    }
}

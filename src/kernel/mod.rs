//! The numeric kernel: synchronous batch passes over the shared arena
//!
//! Every function here is a pure pass over explicit arena offsets - no
//! state survives between calls other than the arena itself. The engine
//! hands the kernel an index buffer (u16 slot ids, 0-sentinel terminated),
//! a serialized quadtree snapshot, and a traversal stack region, all
//! living inside the same arena (see [`crate::arena`] for the layout).

use crate::arena::{
    Arena, BYTES_PER_CELL, FLAG_AUTOSPLIT, FLAG_INSIDE, FLAG_MERGE, FLAG_POPPED, FLAG_REMOVED,
    FLAG_UPDATED, SKIP_RESOLVE_MASK, TICK_CLEAR_MASK,
};
use crate::core::types::{
    DEAD_TYPE, EJECTED_TYPE, MOTHER_TYPE, PELLET_TYPE, PLAYER_TYPE_MAX, SlotId, Vec2, VIRUS_TYPE,
};

use ordered_float::OrderedFloat;

/// Nominal tick length the tuning constants were calibrated against.
const BASE_TICK_MS: f32 = 50.0;

/// Record size the engine must use to compute the arena layout.
pub fn bytes_per_cell() -> u32 {
    BYTES_PER_CELL as u32
}

/// Zero a superseded slot's memory.
pub fn clear_cell(arena: &mut Arena, id: SlotId) {
    arena.clear_record(id);
}

#[derive(Debug, Clone, Copy)]
pub struct WorldBounds {
    pub l: f32,
    pub r: f32,
    pub b: f32,
    pub t: f32,
}

#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub dt: f32,
    /// Whole milliseconds to add to every cell's age this tick. The
    /// caller derives it from its accumulated clock so fractional `dt`
    /// carries over instead of being truncated each tick.
    pub age_dt: u32,
    pub eject_max_age: f32,
    pub autosplit_size: f32,
    pub decay_min: f32,
    pub static_decay: f32,
    pub dynamic_decay: f32,
    pub bounds: WorldBounds,
}

/// Movement/decay pass over every indexed cell.
///
/// Consumes the freed-slot prefix of the index buffer (zeroing those
/// records for reuse), then for each live cell: advances age, clears the
/// per-tick flags, applies boost travel and decay, expires old ejected
/// mass, marks oversized player cells for autosplit, and clamps to the
/// world box (bouncing the boost vector of launched cells).
///
/// `scores` is indexed by player type byte; it drives the dynamic decay
/// multiplier for big players.
pub fn update_cells(arena: &mut Arena, indices_at: usize, scores: &[f32; 256], p: &UpdateParams) {
    let mut at = indices_at;

    // Freed slots sit first in the buffer; reclaim their memory now.
    loop {
        let id = arena.read_u16(at);
        if id == 0 || !arena.has_flags(id, FLAG_REMOVED) {
            break;
        }
        arena.clear_record(id);
        at += 2;
    }

    let t = p.dt / BASE_TICK_MS;
    let mut curr_type = 0u8;
    let mut curr_multi = 1.0f32;

    loop {
        let id = arena.read_u16(at);
        if id == 0 {
            break;
        }
        at += 2;

        let age = arena.age(id).saturating_add(p.age_dt);
        arena.set_age(id, age);
        let flags = arena.flags(id) & TICK_CLEAR_MASK;
        arena.set_flags(id, flags);

        let ty = arena.type_byte(id);
        if ty == EJECTED_TYPE && age as f32 > p.eject_max_age {
            arena.raise_flags(id, FLAG_REMOVED);
        }

        let boost = arena.boost(id);
        if boost > 1.0 {
            let db = boost / 9.0 * t;
            arena.set_x(id, arena.x(id) + arena.boost_x(id) * db);
            arena.set_y(id, arena.y(id) + arena.boost_y(id) * db);
            arena.raise_flags(id, FLAG_UPDATED);
            arena.set_boost(id, boost - db);
        }

        if ty <= PLAYER_TYPE_MAX {
            if ty != curr_type {
                curr_type = ty;
                let score = scores[ty as usize];
                curr_multi = ((score - 0.01 * p.decay_min * p.decay_min)
                    * 0.00005
                    * p.dynamic_decay)
                    .max(1.0);
            }
            let r = arena.r(id);
            if r > p.decay_min {
                arena.set_r(id, r - curr_multi * r * p.static_decay * t / 50.0);
                arena.raise_flags(id, FLAG_UPDATED);
            }
            if p.autosplit_size > 0.0 && arena.r(id) > p.autosplit_size {
                arena.raise_flags(id, FLAG_AUTOSPLIT);
            }
        }

        // Clamp into the world box; launched cells bounce their boost.
        let bounce = arena.boost(id) > 1.0;
        let hr = arena.r(id) / 2.0;
        let (x, y) = (arena.x(id), arena.y(id));
        if x < p.bounds.l + hr {
            arena.set_x(id, p.bounds.l + hr);
            arena.raise_flags(id, FLAG_UPDATED);
            if bounce {
                let bx = arena.boost_x(id);
                arena.set_boost_x(id, -bx);
            }
        }
        if x > p.bounds.r - hr {
            arena.set_x(id, p.bounds.r - hr);
            arena.raise_flags(id, FLAG_UPDATED);
            if bounce {
                let bx = arena.boost_x(id);
                arena.set_boost_x(id, -bx);
            }
        }
        if y > p.bounds.t - hr {
            arena.set_y(id, p.bounds.t - hr);
            arena.raise_flags(id, FLAG_UPDATED);
            if bounce {
                let by = arena.boost_y(id);
                arena.set_boost_y(id, -by);
            }
        }
        if y < p.bounds.b + hr {
            arena.set_y(id, p.bounds.b + hr);
            arena.raise_flags(id, FLAG_UPDATED);
            if bounce {
                let by = arena.boost_y(id);
                arena.set_boost_y(id, -by);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerUpdateParams {
    pub target: Vec2,
    /// Steering is constrained to the controller's lock line when set.
    pub lock_dir: bool,
    /// Lock line as ax + by + c = 0.
    pub line: [f32; 3],
    pub dt: f32,
    /// Base merge time in ms (round(1000 * player_merge_time)).
    pub merge_initial: f32,
    pub merge_increase: f32,
    pub speed: f32,
    pub merge_time: f32,
    pub no_merge_delay: f32,
    pub merge_new_version: bool,
}

/// Steering/merge pass for one controller's contiguous index segment.
pub fn update_player_cells(arena: &mut Arena, indices_at: usize, count: usize, p: &PlayerUpdateParams) {
    if count == 0 {
        return;
    }

    // Merge eligibility by age
    for i in 0..count {
        let id = arena.read_u16(indices_at + i * 2);
        let age = arena.age(id) as f32;
        let eligible = if p.merge_time > 0.0 {
            if p.merge_new_version {
                let increase = (25.0 * arena.r(id) * p.merge_increase).round();
                let time = increase.max(p.no_merge_delay);
                age > p.merge_initial && age > time
            } else {
                let time = p.merge_initial + p.merge_increase;
                age > p.no_merge_delay && age > time
            }
        } else {
            age > p.no_merge_delay
        };
        if eligible {
            arena.raise_flags(id, FLAG_MERGE);
        }
    }

    // Aim point: the raw target, or its projection onto the lock line
    let target = if p.lock_dir {
        let [a, b, c] = p.line;
        let denom = a * a + b * b;
        if denom > f32::EPSILON {
            let d = (a * p.target.x + b * p.target.y + c) / denom;
            Vec2::new(p.target.x - a * d, p.target.y - b * d)
        } else {
            p.target
        }
    } else {
        p.target
    };

    let t = p.dt / BASE_TICK_MS;
    for i in 0..count {
        let id = arena.read_u16(indices_at + i * 2);
        let dx = target.x - arena.x(id);
        let dy = target.y - arena.y(id);
        let d = (dx * dx + dy * dy).sqrt();
        if d < 1.0 {
            continue;
        }
        let speed = 88.0 * arena.r(id).powf(-0.439_675_4) * p.speed;
        let m = speed.min(d) * t;
        arena.set_x(id, arena.x(id) + dx / d * m);
        arena.set_y(id, arena.y(id) + dy / d * m);
    }
}

/// In-place descending-size sort of one type-contiguous index segment.
/// Ties break toward the lower slot id so reruns are stable.
pub fn sort_indices(arena: &mut Arena, indices_at: usize, count: usize) {
    if count < 2 {
        return;
    }
    let mut ids: Vec<SlotId> = (0..count)
        .map(|i| arena.read_u16(indices_at + i * 2))
        .collect();
    ids.sort_unstable_by_key(|&id| (std::cmp::Reverse(OrderedFloat(arena.r(id))), id));
    for (i, id) in ids.into_iter().enumerate() {
        arena.write_u16(indices_at + i * 2, id);
    }
}

// Pairwise outcomes of the resolution pass
const ACTION_NONE: u8 = 0;
const ACTION_EAT: u8 = 1;
const ACTION_COLLIDE: u8 = 2;

#[derive(Debug, Clone)]
pub struct ResolveParams {
    pub no_colli_delay: f32,
    pub eat_overlap: f32,
    pub eat_mult: f32,
    pub virus_max_size: f32,
    pub dead_delay: f32,
}

/// Collision/eating resolution over the sorted index buffer against the
/// quadtree snapshot at `tree_at`. Flags eaten/merged/popped cells in
/// place; the count returned is diagnostic only.
pub fn resolve(
    arena: &mut Arena,
    indices_at: usize,
    pellet_count: usize,
    tree_at: usize,
    stack_at: usize,
    p: &ResolveParams,
) -> u32 {
    let mut collisions = 0u32;
    let mut at = indices_at;

    loop {
        let id = arena.read_u16(at);
        if id == 0 {
            break;
        }
        // Pellets never initiate interactions; hop over their segment.
        if arena.type_byte(id) == PELLET_TYPE {
            at += 2 * pellet_count.max(1);
            continue;
        }
        at += 2;

        let cell_flags = arena.flags(id);
        if cell_flags & SKIP_RESOLVE_MASK != 0 {
            continue;
        }

        let cell_type = arena.type_byte(id);
        if cell_type == DEAD_TYPE {
            if arena.age(id) as f32 > p.dead_delay {
                arena.raise_flags(id, FLAG_REMOVED);
                arena.set_eaten_by(id, 0);
            }
            continue;
        }

        // Traverse the snapshot for candidate partners
        let mut sp = 0usize;
        push(arena, stack_at, &mut sp, tree_at as u32);
        while let Some(cur) = pop(arena, stack_at, &mut sp) {
            let cur = cur as usize;
            let (cx, cy) = (arena.read_f32(cur), arena.read_f32(cur + 4));
            let (x, y, r) = (arena.x(id), arena.y(id), arena.r(id));
            if arena.read_u32(cur + 8) != 0 {
                if y - r < cy {
                    if x + r > cx {
                        let br = arena.read_u32(cur + 20);
                        push(arena, stack_at, &mut sp, br);
                    }
                    if x - r < cx {
                        let bl = arena.read_u32(cur + 16);
                        push(arena, stack_at, &mut sp, bl);
                    }
                }
                if y + r > cy {
                    if x + r > cx {
                        let tr = arena.read_u32(cur + 12);
                        push(arena, stack_at, &mut sp, tr);
                    }
                    if x - r < cx {
                        let tl = arena.read_u32(cur + 8);
                        push(arena, stack_at, &mut sp, tl);
                    }
                }
            }

            let count = arena.read_u16(cur + 24) as usize;
            for i in 0..count {
                let other = arena.read_u16(cur + 26 + i * 2);
                if other == id {
                    continue;
                }
                let r1 = arena.r(id);
                let r2 = arena.r(other);
                // the bigger cell resolves the pair; lower id wins ties
                if r1 < r2 || (r1 == r2 && id > other) {
                    continue;
                }
                let other_flags = arena.flags(other);
                if other_flags & SKIP_RESOLVE_MASK != 0 {
                    continue;
                }

                let other_type = arena.type_byte(other);
                let action = pair_action(
                    cell_type,
                    other_type,
                    cell_flags,
                    other_flags,
                    arena.age(id) as f32,
                    arena.age(other) as f32,
                    p.no_colli_delay,
                );
                if action == ACTION_NONE {
                    continue;
                }

                let mut dx = arena.x(other) - arena.x(id);
                let mut dy = arena.y(other) - arena.y(id);
                if dx > r1 + r2 || dy > r1 + r2 {
                    continue;
                }
                let mut d = (dx * dx + dy * dy).sqrt();
                collisions += 1;

                if action == ACTION_COLLIDE {
                    let m = r1 + r2 - d;
                    if m <= 0.0 {
                        continue;
                    }
                    if d == 0.0 {
                        d = 1.0;
                        dx = 1.0;
                        dy = 0.0;
                    } else {
                        dx /= d;
                        dy /= d;
                    }
                    if d + r2 < r1 {
                        arena.raise_flags(other, FLAG_INSIDE);
                    }
                    let a = r1 * r1;
                    let b = r2 * r2;
                    let a_m = b / (a + b);
                    let b_m = a / (a + b);
                    arena.set_x(id, arena.x(id) - dx * m.min(r1) * a_m);
                    arena.set_y(id, arena.y(id) - dy * m.min(r1) * a_m);
                    arena.set_x(other, arena.x(other) + dx * m.min(r2) * b_m);
                    arena.set_y(other, arena.y(other) + dy * m.min(r2) * b_m);
                    arena.raise_flags(id, FLAG_UPDATED);
                    arena.raise_flags(other, FLAG_UPDATED);
                } else if (cell_type == other_type || r1 > r2 * p.eat_mult)
                    && d < r1 - r2 / p.eat_overlap
                {
                    arena.set_r(id, (r1 * r1 + r2 * r2).sqrt());
                    let other_env = other_type == VIRUS_TYPE || other_type == MOTHER_TYPE;
                    arena.set_eaten_by(other, if other_env { 0 } else { id });
                    arena.raise_flags(other, FLAG_REMOVED);

                    if cell_type <= PLAYER_TYPE_MAX && other_type == EJECTED_TYPE {
                        // absorb a share of the ejected momentum
                        let ratio = r2 / (arena.r(id) + 100.0);
                        arena.set_boost(id, arena.boost(id) + ratio * 0.02 * arena.boost(other));
                        let bx = arena.boost_x(id) + ratio * 0.02 * arena.boost_x(other);
                        let by = arena.boost_y(id) + ratio * 0.02 * arena.boost_y(other);
                        let norm = (bx * bx + by * by).sqrt();
                        if norm > f32::EPSILON {
                            arena.set_boost_x(id, bx / norm);
                            arena.set_boost_y(id, by / norm);
                        }
                    }
                    if other_env {
                        arena.raise_flags(id, FLAG_POPPED);
                    }
                    if cell_type == VIRUS_TYPE
                        && other_type == EJECTED_TYPE
                        && arena.r(id) >= p.virus_max_size
                    {
                        // fed to the limit: pop along the feed bearing
                        arena.raise_flags(id, FLAG_POPPED);
                        let bx = arena.boost_x(other);
                        let by = arena.boost_y(other);
                        arena.set_boost_x(id, bx);
                        arena.set_boost_y(id, by);
                    }
                }
            }
        }
    }

    collisions
}

/// Interaction table: what the bigger cell does to the smaller one.
#[allow(clippy::too_many_arguments)]
fn pair_action(
    cell_type: u8,
    other_type: u8,
    cell_flags: u8,
    other_flags: u8,
    cell_age: f32,
    other_age: f32,
    no_colli_delay: f32,
) -> u8 {
    if cell_type <= PLAYER_TYPE_MAX {
        if cell_type == other_type {
            if cell_flags & other_flags & FLAG_MERGE != 0 {
                ACTION_EAT // same-owner merge
            } else if cell_age > no_colli_delay && other_age > no_colli_delay {
                ACTION_COLLIDE
            } else {
                ACTION_NONE
            }
        } else {
            ACTION_EAT // players eat everything else
        }
    } else if cell_type == VIRUS_TYPE && other_type == EJECTED_TYPE {
        ACTION_EAT
    } else if cell_type == EJECTED_TYPE && other_type == EJECTED_TYPE {
        ACTION_COLLIDE
    } else if cell_type == DEAD_TYPE && other_type == DEAD_TYPE {
        ACTION_COLLIDE
    } else if cell_type == MOTHER_TYPE {
        ACTION_EAT
    } else {
        ACTION_NONE
    }
}

/// Is a disk free of conflicting entities? Pellets and ejected mass do
/// not block. Returns the (positive) number of candidates checked, or
/// its negation if a conflict was found.
pub fn is_safe(arena: &mut Arena, x: f32, y: f32, r: f32, tree_at: usize, stack_at: usize) -> i32 {
    let mut counter = 0i32;
    let mut sp = 0usize;
    push(arena, stack_at, &mut sp, tree_at as u32);
    while let Some(cur) = pop(arena, stack_at, &mut sp) {
        let cur = cur as usize;
        let (cx, cy) = (arena.read_f32(cur), arena.read_f32(cur + 4));
        if arena.read_u32(cur + 8) != 0 {
            if y - r < cy {
                if x + r > cx {
                    let br = arena.read_u32(cur + 20);
                    push(arena, stack_at, &mut sp, br);
                }
                if x - r < cx {
                    let bl = arena.read_u32(cur + 16);
                    push(arena, stack_at, &mut sp, bl);
                }
            }
            if y + r > cy {
                if x + r > cx {
                    let tr = arena.read_u32(cur + 12);
                    push(arena, stack_at, &mut sp, tr);
                }
                if x - r < cx {
                    let tl = arena.read_u32(cur + 8);
                    push(arena, stack_at, &mut sp, tl);
                }
            }
        }
        let count = arena.read_u16(cur + 24) as usize;
        for i in 0..count {
            let id = arena.read_u16(cur + 26 + i * 2);
            if arena.type_byte(id) > VIRUS_TYPE {
                continue;
            }
            let dx = arena.x(id) - x;
            let dy = arena.y(id) - y;
            counter += 1;
            let rr = r + arena.r(id);
            if dx * dx + dy * dy < rr * rr {
                return -counter;
            }
        }
    }
    counter
}

/// Viewport query: writes the slot ids intersecting the rectangle into
/// the output list at `list_at`, returns how many. Pellets spawned this
/// tick are withheld to avoid spawn flicker.
#[allow(clippy::too_many_arguments)]
pub fn select(
    arena: &mut Arena,
    tree_at: usize,
    stack_at: usize,
    list_at: usize,
    l: f32,
    r: f32,
    b: f32,
    t: f32,
) -> usize {
    let mut len = 0usize;
    let mut sp = 0usize;
    push(arena, stack_at, &mut sp, tree_at as u32);
    while let Some(cur) = pop(arena, stack_at, &mut sp) {
        let cur = cur as usize;
        let (cx, cy) = (arena.read_f32(cur), arena.read_f32(cur + 4));
        if arena.read_u32(cur + 8) != 0 {
            if b < cy {
                if r > cx {
                    let br = arena.read_u32(cur + 20);
                    push(arena, stack_at, &mut sp, br);
                }
                if l < cx {
                    let bl = arena.read_u32(cur + 16);
                    push(arena, stack_at, &mut sp, bl);
                }
            }
            if t > cy {
                if r > cx {
                    let tr = arena.read_u32(cur + 12);
                    push(arena, stack_at, &mut sp, tr);
                }
                if l < cx {
                    let tl = arena.read_u32(cur + 8);
                    push(arena, stack_at, &mut sp, tl);
                }
            }
        }
        let count = arena.read_u16(cur + 24) as usize;
        for i in 0..count {
            let id = arena.read_u16(cur + 26 + i * 2);
            let cr = arena.r(id);
            if arena.x(id) - cr <= r
                && arena.x(id) + cr >= l
                && arena.y(id) - cr <= t
                && arena.y(id) + cr >= b
                && (arena.type_byte(id) != PELLET_TYPE || arena.age(id) > 0)
            {
                arena.write_u16(list_at + len * 2, id);
                len += 1;
            }
        }
    }
    len
}

#[inline]
fn push(arena: &mut Arena, stack_at: usize, sp: &mut usize, node: u32) {
    arena.write_u32(stack_at + *sp * 4, node);
    *sp += 1;
}

#[inline]
fn pop(arena: &Arena, stack_at: usize, sp: &mut usize) -> Option<u32> {
    if *sp == 0 {
        return None;
    }
    *sp -= 1;
    Some(arena.read_u32(stack_at + *sp * 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EngineConfig;
    use crate::spatial::QuadTree;

    fn setup() -> (Arena, EngineConfig) {
        let config = EngineConfig {
            cell_limit: 256,
            ..Default::default()
        };
        (Arena::new(&config), config)
    }

    fn write_indices(arena: &mut Arena, at: usize, ids: &[SlotId]) {
        let mut cursor = at;
        for &id in ids {
            arena.write_u16(cursor, id);
            cursor += 2;
        }
        arena.write_u16(cursor, 0);
    }

    fn default_update(dt: f32) -> UpdateParams {
        UpdateParams {
            dt,
            age_dt: dt as u32,
            eject_max_age: 10_000.0,
            autosplit_size: 1500.0,
            decay_min: 1000.0,
            static_decay: 1.0,
            dynamic_decay: 1.0,
            bounds: WorldBounds {
                l: -1000.0,
                r: 1000.0,
                b: -1000.0,
                t: 1000.0,
            },
        }
    }

    #[test]
    fn test_update_reclaims_freed_prefix() {
        let (mut arena, _) = setup();
        arena.stamp(5, 0.0, 0.0, 10.0, PELLET_TYPE, 0.0, 0.0, 0.0);
        arena.raise_flags(5, FLAG_REMOVED);
        arena.stamp(6, 0.0, 0.0, 10.0, PELLET_TYPE, 0.0, 0.0, 0.0);

        let at = arena.cells_end();
        write_indices(&mut arena, at, &[5, 6]);
        update_cells(&mut arena, at, &[0.0; 256], &default_update(50.0));

        assert!(!arena.exists(5), "freed slot must be zeroed");
        assert!(arena.exists(6));
        assert_eq!(arena.age(6), 50);
    }

    #[test]
    fn test_update_clamps_to_world() {
        let (mut arena, _) = setup();
        arena.stamp(3, 990.0, -990.0, 40.0, PELLET_TYPE, 0.0, 0.0, 0.0);
        let at = arena.cells_end();
        write_indices(&mut arena, at, &[3]);
        update_cells(&mut arena, at, &[0.0; 256], &default_update(50.0));

        assert_eq!(arena.x(3), 1000.0 - 20.0);
        assert_eq!(arena.y(3), -1000.0 + 20.0);
        assert!(arena.has_flags(3, FLAG_UPDATED));
    }

    #[test]
    fn test_update_flags_autosplit() {
        let (mut arena, _) = setup();
        arena.stamp(2, 0.0, 0.0, 1600.0, 1, 0.0, 0.0, 0.0);
        let at = arena.cells_end();
        write_indices(&mut arena, at, &[2]);
        update_cells(&mut arena, at, &[25_600.0; 256], &default_update(50.0));
        assert!(arena.has_flags(2, FLAG_AUTOSPLIT));
        // decay applied: radius above decay_min shrinks
        assert!(arena.r(2) < 1600.0);
    }

    #[test]
    fn test_update_expires_old_ejected() {
        let (mut arena, _) = setup();
        arena.stamp(9, 0.0, 0.0, 38.0, EJECTED_TYPE, 0.0, 0.0, 0.0);
        arena.set_age(9, 9_980);
        let at = arena.cells_end();
        write_indices(&mut arena, at, &[9]);
        update_cells(&mut arena, at, &[0.0; 256], &default_update(50.0));
        assert!(arena.has_flags(9, FLAG_REMOVED));
    }

    #[test]
    fn test_sort_indices_descending_by_size() {
        let (mut arena, _) = setup();
        for (id, r) in [(1u16, 30.0f32), (2, 90.0), (3, 60.0), (4, 90.0)] {
            arena.stamp(id, 0.0, 0.0, r, 1, 0.0, 0.0, 0.0);
        }
        let at = arena.cells_end();
        write_indices(&mut arena, at, &[1, 2, 3, 4]);
        sort_indices(&mut arena, at, 4);
        let order: Vec<u16> = (0..4).map(|i| arena.read_u16(at + i * 2)).collect();
        assert_eq!(order, vec![2, 4, 3, 1]);

        // idempotent: sorting again yields the same buffer
        sort_indices(&mut arena, at, 4);
        let again: Vec<u16> = (0..4).map(|i| arena.read_u16(at + i * 2)).collect();
        assert_eq!(order, again);
    }

    fn snapshot(arena: &mut Arena, tree: &QuadTree) -> (usize, usize) {
        let tree_at = arena.cells_end() + 512;
        let written = tree.serialize(arena, tree_at);
        (tree_at, tree_at + written)
    }

    #[test]
    fn test_is_safe_detects_conflicts() {
        let (mut arena, config) = setup();
        let mut tree = QuadTree::new(1000.0, 1000.0, 8, 24, config.cell_limit);
        arena.stamp(4, 100.0, 100.0, 50.0, VIRUS_TYPE, 0.0, 0.0, 0.0);
        tree.insert(4, 100.0, 100.0, 50.0);
        // pellets never block spawns
        arena.stamp(5, -100.0, -100.0, 10.0, PELLET_TYPE, 0.0, 0.0, 0.0);
        tree.insert(5, -100.0, -100.0, 10.0);

        let (tree_at, stack_at) = snapshot(&mut arena, &tree);
        assert!(is_safe(&mut arena, 120.0, 100.0, 40.0, tree_at, stack_at) < 0);
        assert!(is_safe(&mut arena, -100.0, -100.0, 40.0, tree_at, stack_at) >= 0);
        assert!(is_safe(&mut arena, 600.0, 600.0, 40.0, tree_at, stack_at) > 0 || tree.len() == 2);
    }

    #[test]
    fn test_select_writes_matching_ids() {
        let (mut arena, config) = setup();
        let mut tree = QuadTree::new(1000.0, 1000.0, 8, 24, config.cell_limit);
        arena.stamp(7, 50.0, 50.0, 20.0, VIRUS_TYPE, 0.0, 0.0, 0.0);
        tree.insert(7, 50.0, 50.0, 20.0);
        arena.stamp(8, 800.0, 800.0, 20.0, VIRUS_TYPE, 0.0, 0.0, 0.0);
        tree.insert(8, 800.0, 800.0, 20.0);
        // fresh pellet withheld until it has aged one tick
        arena.stamp(9, 60.0, 60.0, 10.0, PELLET_TYPE, 0.0, 0.0, 0.0);
        tree.insert(9, 60.0, 60.0, 10.0);

        let (tree_at, stack_at) = snapshot(&mut arena, &tree);
        let list_at = stack_at + 4 * 4 * 16;
        let n = select(&mut arena, tree_at, stack_at, list_at, 0.0, 200.0, 0.0, 200.0);
        let ids: Vec<u16> = (0..n).map(|i| arena.read_u16(list_at + i * 2)).collect();
        assert_eq!(ids, vec![7]);

        arena.set_age(9, 50);
        let n = select(&mut arena, tree_at, stack_at, list_at, 0.0, 200.0, 0.0, 200.0);
        assert_eq!(n, 2);
    }

    fn resolve_params() -> ResolveParams {
        let config = EngineConfig::default();
        ResolveParams {
            no_colli_delay: config.player_no_colli_delay,
            eat_overlap: config.eat_overlap,
            eat_mult: config.eat_mult,
            virus_max_size: config.virus_max_size(),
            dead_delay: config.player_dead_delay,
        }
    }

    #[test]
    fn test_resolve_player_eats_pellet() {
        let (mut arena, config) = setup();
        let mut tree = QuadTree::new(1000.0, 1000.0, 8, 24, config.cell_limit);
        arena.stamp(1, 0.0, 0.0, 50.0, 1, 0.0, 0.0, 0.0);
        arena.set_age(1, 1000);
        tree.insert(1, 0.0, 0.0, 50.0);
        arena.stamp(2, 10.0, 0.0, 10.0, PELLET_TYPE, 0.0, 0.0, 0.0);
        arena.set_age(2, 1000);
        tree.insert(2, 10.0, 0.0, 10.0);

        let at = arena.cells_end();
        write_indices(&mut arena, at, &[1, 2]);
        let tree_at = at + 6;
        let written = tree.serialize(&mut arena, tree_at);
        let stack_at = tree_at + written;

        let collisions = resolve(&mut arena, at, 1, tree_at, stack_at, &resolve_params());
        assert!(collisions >= 1);
        assert!(arena.has_flags(2, FLAG_REMOVED));
        assert_eq!(arena.eaten_by(2), 1);
        let expected = (50.0f32 * 50.0 + 10.0 * 10.0).sqrt();
        assert!((arena.r(1) - expected).abs() < 1e-3);
    }

    #[test]
    fn test_resolve_virus_pops_player() {
        let (mut arena, config) = setup();
        let mut tree = QuadTree::new(1000.0, 1000.0, 8, 24, config.cell_limit);
        arena.stamp(1, 0.0, 0.0, 200.0, 1, 0.0, 0.0, 0.0);
        arena.set_age(1, 1000);
        tree.insert(1, 0.0, 0.0, 200.0);
        arena.stamp(2, 20.0, 0.0, 100.0, VIRUS_TYPE, 0.0, 0.0, 0.0);
        arena.set_age(2, 1000);
        tree.insert(2, 20.0, 0.0, 100.0);

        let at = arena.cells_end();
        write_indices(&mut arena, at, &[1, 2]);
        let tree_at = at + 6;
        let written = tree.serialize(&mut arena, tree_at);
        let stack_at = tree_at + written;

        resolve(&mut arena, at, 0, tree_at, stack_at, &resolve_params());
        assert!(arena.has_flags(1, FLAG_POPPED), "eater pops on virus");
        assert!(arena.has_flags(2, FLAG_REMOVED));
        assert_eq!(arena.eaten_by(2), 0, "environment kills are anonymous");
    }

    #[test]
    fn test_resolve_same_owner_collision_separates() {
        let (mut arena, config) = setup();
        let mut tree = QuadTree::new(1000.0, 1000.0, 8, 24, config.cell_limit);
        // both old enough to collide, neither merge-eligible
        arena.stamp(1, 0.0, 0.0, 60.0, 1, 0.0, 0.0, 0.0);
        arena.set_age(1, 1000);
        tree.insert(1, 0.0, 0.0, 60.0);
        arena.stamp(2, 40.0, 0.0, 50.0, 1, 0.0, 0.0, 0.0);
        arena.set_age(2, 1000);
        tree.insert(2, 40.0, 0.0, 50.0);

        let at = arena.cells_end();
        write_indices(&mut arena, at, &[1, 2]);
        let tree_at = at + 6;
        let written = tree.serialize(&mut arena, tree_at);
        let stack_at = tree_at + written;

        resolve(&mut arena, at, 0, tree_at, stack_at, &resolve_params());
        assert!(!arena.has_flags(2, FLAG_REMOVED));
        let gap = arena.x(2) - arena.x(1);
        assert!(gap > 40.0, "overlapping cells pushed apart, gap = {gap}");
    }

    #[test]
    fn test_resolve_merge_when_both_eligible() {
        let (mut arena, config) = setup();
        let mut tree = QuadTree::new(1000.0, 1000.0, 8, 24, config.cell_limit);
        arena.stamp(1, 0.0, 0.0, 60.0, 1, 0.0, 0.0, 0.0);
        arena.raise_flags(1, FLAG_MERGE);
        arena.set_age(1, 60_000);
        tree.insert(1, 0.0, 0.0, 60.0);
        arena.stamp(2, 10.0, 0.0, 50.0, 1, 0.0, 0.0, 0.0);
        arena.raise_flags(2, FLAG_MERGE);
        arena.set_age(2, 60_000);
        tree.insert(2, 10.0, 0.0, 50.0);

        let at = arena.cells_end();
        write_indices(&mut arena, at, &[1, 2]);
        let tree_at = at + 6;
        let written = tree.serialize(&mut arena, tree_at);
        let stack_at = tree_at + written;

        resolve(&mut arena, at, 0, tree_at, stack_at, &resolve_params());
        assert!(arena.has_flags(2, FLAG_REMOVED), "smaller twin absorbed");
        let expected = (60.0f32 * 60.0 + 50.0 * 50.0).sqrt();
        assert!((arena.r(1) - expected).abs() < 1e-3);
    }
}

//! The shared binary arena of cell records
//!
//! One contiguous byte buffer holds every cell record plus the auxiliary
//! regions the numeric kernel works over: the index buffer, the serialized
//! quadtree snapshot, the traversal stack, and the query output list. All
//! access goes through bounds-checked little-endian accessors; records are
//! read and written in place, never copied out wholesale.
//!
//! Record layout (32 bytes per cell, byte-addressed):
//!
//! | offset | field    | type    |
//! |--------|----------|---------|
//! | 0      | x        | f32     |
//! | 4      | y        | f32     |
//! | 8      | r        | f32     |
//! | 12     | type     | u8      |
//! | 13     | flags    | u8      |
//! | 14     | eaten_by | u16     |
//! | 16     | age      | u32 ms  |
//! | 20     | boost_x  | f32     |
//! | 24     | boost_y  | f32     |
//! | 28     | boost    | f32     |

pub mod directory;

use crate::core::config::EngineConfig;
use crate::core::types::SlotId;

pub const BYTES_PER_CELL: usize = 32;

pub const FLAG_EXISTS: u8 = 0x01;
pub const FLAG_UPDATED: u8 = 0x02;
pub const FLAG_INSIDE: u8 = 0x04;
pub const FLAG_AUTOSPLIT: u8 = 0x10;
pub const FLAG_REMOVED: u8 = 0x20;
pub const FLAG_MERGE: u8 = 0x40;
pub const FLAG_POPPED: u8 = 0x80;

/// Flags that survive the per-tick clear: EXISTS, bit 3 (reserved), MERGE.
pub const TICK_CLEAR_MASK: u8 = 0x49;

/// A cell carrying any of these is skipped by the resolution pass.
pub const SKIP_RESOLVE_MASK: u8 = FLAG_INSIDE | FLAG_REMOVED | FLAG_POPPED;

const OFF_X: usize = 0;
const OFF_Y: usize = 4;
const OFF_R: usize = 8;
const OFF_TYPE: usize = 12;
const OFF_FLAGS: usize = 13;
const OFF_EATEN_BY: usize = 14;
const OFF_AGE: usize = 16;
const OFF_BOOST_X: usize = 20;
const OFF_BOOST_Y: usize = 24;
const OFF_BOOST: usize = 28;

pub struct Arena {
    buf: Vec<u8>,
    cell_limit: usize,
}

impl Arena {
    /// Allocate the arena sized for the configured cell limit plus
    /// headroom for the auxiliary regions.
    pub fn new(config: &EngineConfig) -> Self {
        let cells = config.cell_limit * BYTES_PER_CELL;
        let indices = (config.cell_limit + 1) * 2;
        let snapshot = config.cell_limit * 64 + 1024;
        let stack = 4 * 4 * config.quadtree_max_level;
        let list = config.cell_limit * 2 + 64;
        Self {
            buf: vec![0u8; cells + indices + snapshot + stack + list],
            cell_limit: config.cell_limit,
        }
    }

    pub fn cell_limit(&self) -> usize {
        self.cell_limit
    }

    /// Byte offset of the first auxiliary region (end of cell records).
    pub fn cells_end(&self) -> usize {
        self.cell_limit * BYTES_PER_CELL
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Zero the whole buffer (world restart reuses the allocation).
    pub fn zero_all(&mut self) {
        self.buf.fill(0);
    }

    // --- raw region accessors (auxiliary buffers) ---

    pub fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes(self.buf[at..at + 2].try_into().unwrap())
    }

    pub fn write_u16(&mut self, at: usize, v: u16) {
        self.buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.buf[at..at + 4].try_into().unwrap())
    }

    pub fn write_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn read_f32(&self, at: usize) -> f32 {
        f32::from_le_bytes(self.buf[at..at + 4].try_into().unwrap())
    }

    pub fn write_f32(&mut self, at: usize, v: f32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    // --- per-record accessors ---

    #[inline]
    fn base(&self, id: SlotId) -> usize {
        assert!((id as usize) < self.cell_limit, "slot id out of range");
        id as usize * BYTES_PER_CELL
    }

    pub fn x(&self, id: SlotId) -> f32 {
        self.read_f32(self.base(id) + OFF_X)
    }

    pub fn set_x(&mut self, id: SlotId, v: f32) {
        let at = self.base(id) + OFF_X;
        self.write_f32(at, v);
    }

    pub fn y(&self, id: SlotId) -> f32 {
        self.read_f32(self.base(id) + OFF_Y)
    }

    pub fn set_y(&mut self, id: SlotId, v: f32) {
        let at = self.base(id) + OFF_Y;
        self.write_f32(at, v);
    }

    pub fn r(&self, id: SlotId) -> f32 {
        self.read_f32(self.base(id) + OFF_R)
    }

    pub fn set_r(&mut self, id: SlotId, v: f32) {
        let at = self.base(id) + OFF_R;
        self.write_f32(at, v);
    }

    pub fn type_byte(&self, id: SlotId) -> u8 {
        self.buf[self.base(id) + OFF_TYPE]
    }

    pub fn set_type_byte(&mut self, id: SlotId, v: u8) {
        let at = self.base(id) + OFF_TYPE;
        self.buf[at] = v;
    }

    pub fn flags(&self, id: SlotId) -> u8 {
        self.buf[self.base(id) + OFF_FLAGS]
    }

    pub fn set_flags(&mut self, id: SlotId, v: u8) {
        let at = self.base(id) + OFF_FLAGS;
        self.buf[at] = v;
    }

    pub fn raise_flags(&mut self, id: SlotId, bits: u8) {
        let at = self.base(id) + OFF_FLAGS;
        self.buf[at] |= bits;
    }

    pub fn has_flags(&self, id: SlotId, bits: u8) -> bool {
        self.flags(id) & bits != 0
    }

    pub fn eaten_by(&self, id: SlotId) -> u16 {
        self.read_u16(self.base(id) + OFF_EATEN_BY)
    }

    pub fn set_eaten_by(&mut self, id: SlotId, v: u16) {
        let at = self.base(id) + OFF_EATEN_BY;
        self.write_u16(at, v);
    }

    pub fn age(&self, id: SlotId) -> u32 {
        self.read_u32(self.base(id) + OFF_AGE)
    }

    pub fn set_age(&mut self, id: SlotId, v: u32) {
        let at = self.base(id) + OFF_AGE;
        self.write_u32(at, v);
    }

    pub fn boost_x(&self, id: SlotId) -> f32 {
        self.read_f32(self.base(id) + OFF_BOOST_X)
    }

    pub fn set_boost_x(&mut self, id: SlotId, v: f32) {
        let at = self.base(id) + OFF_BOOST_X;
        self.write_f32(at, v);
    }

    pub fn boost_y(&self, id: SlotId) -> f32 {
        self.read_f32(self.base(id) + OFF_BOOST_Y)
    }

    pub fn set_boost_y(&mut self, id: SlotId, v: f32) {
        let at = self.base(id) + OFF_BOOST_Y;
        self.write_f32(at, v);
    }

    pub fn boost(&self, id: SlotId) -> f32 {
        self.read_f32(self.base(id) + OFF_BOOST)
    }

    pub fn set_boost(&mut self, id: SlotId, v: f32) {
        let at = self.base(id) + OFF_BOOST;
        self.write_f32(at, v);
    }

    pub fn exists(&self, id: SlotId) -> bool {
        self.has_flags(id, FLAG_EXISTS)
    }

    /// Stamp a freshly allocated record. Flags reset to EXISTS only.
    #[allow(clippy::too_many_arguments)]
    pub fn stamp(
        &mut self,
        id: SlotId,
        x: f32,
        y: f32,
        r: f32,
        type_byte: u8,
        boost_x: f32,
        boost_y: f32,
        boost: f32,
    ) {
        self.set_x(id, x);
        self.set_y(id, y);
        self.set_r(id, r);
        self.set_type_byte(id, type_byte);
        self.set_flags(id, FLAG_EXISTS);
        self.set_eaten_by(id, 0);
        self.set_age(id, 0);
        self.set_boost_x(id, boost_x);
        self.set_boost_y(id, boost_y);
        self.set_boost(id, boost);
    }

    /// Zero a superseded slot's memory so the free-slot scan can reuse it.
    pub fn clear_record(&mut self, id: SlotId) {
        let at = self.base(id);
        self.buf[at..at + BYTES_PER_CELL].fill(0);
    }
}

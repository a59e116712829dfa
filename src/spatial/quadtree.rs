//! Incrementally-maintained quadtree over cell bounding circles
//!
//! The engine keeps this index consistent across insert/remove/update/swap
//! while the numeric kernel only ever sees the flat serialized snapshot
//! written into the arena (see [`QuadTree::serialize`]). An item lives at
//! the deepest node whose quadrant fully contains its bounding box;
//! straddlers stay at internal nodes.
//!
//! Snapshot node encoding (byte-addressed, little-endian):
//! `cx f32, cy f32, tl u32, tr u32, bl u32, br u32, count u16,`
//! then `count` u16 slot ids. Child fields are absolute arena offsets,
//! 0 meaning "no children". The kernel traverses this with an explicit
//! stack of u32 offsets in the arena's stack region.

use crate::arena::Arena;
use crate::core::types::SlotId;

#[derive(Debug, Clone, Copy)]
struct Item {
    id: SlotId,
    x: f32,
    y: f32,
    r: f32,
}

struct Node {
    cx: f32,
    cy: f32,
    hw: f32,
    hh: f32,
    level: usize,
    parent: Option<usize>,
    /// [tl, tr, bl, br]; all four exist or none
    children: Option<[usize; 4]>,
    items: Vec<Item>,
    /// items here plus in all descendants
    subtree_count: usize,
}

pub struct QuadTree {
    nodes: Vec<Node>,
    free: Vec<usize>,
    /// slot id -> node index + 1, 0 = not in the tree
    item_node: Vec<u32>,
    max_items: usize,
    max_level: usize,
}

impl QuadTree {
    pub fn new(hw: f32, hh: f32, max_level: usize, max_items: usize, cell_limit: usize) -> Self {
        let root = Node {
            cx: 0.0,
            cy: 0.0,
            hw,
            hh,
            level: 0,
            parent: None,
            children: None,
            items: Vec::new(),
            subtree_count: 0,
        };
        Self {
            nodes: vec![root],
            free: Vec::new(),
            item_node: vec![0; cell_limit],
            max_items,
            max_level,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes[0].subtree_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: SlotId) -> bool {
        self.item_node[id as usize] != 0
    }

    /// Which child quadrant fully contains the box, if any.
    fn child_for(node: &Node, x: f32, y: f32, r: f32) -> Option<usize> {
        let left = x + r <= node.cx;
        let right = x - r >= node.cx;
        let bottom = y + r <= node.cy;
        let top = y - r >= node.cy;
        match (left, right, bottom, top) {
            (true, _, _, true) => Some(0),  // tl
            (_, true, _, true) => Some(1),  // tr
            (true, _, true, _) => Some(2),  // bl
            (_, true, true, _) => Some(3),  // br
            _ => None,
        }
    }

    fn alloc_node(&mut self, node: Node) -> usize {
        if let Some(idx) = self.free.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn split(&mut self, ni: usize) {
        let (cx, cy, hw, hh, level) = {
            let n = &self.nodes[ni];
            (n.cx, n.cy, n.hw, n.hh, n.level)
        };
        let qw = hw / 2.0;
        let qh = hh / 2.0;
        // tl, tr, bl, br
        let centers = [
            (cx - qw, cy + qh),
            (cx + qw, cy + qh),
            (cx - qw, cy - qh),
            (cx + qw, cy - qh),
        ];
        let mut children = [0usize; 4];
        for (k, &(ccx, ccy)) in centers.iter().enumerate() {
            children[k] = self.alloc_node(Node {
                cx: ccx,
                cy: ccy,
                hw: qw,
                hh: qh,
                level: level + 1,
                parent: Some(ni),
                children: None,
                items: Vec::new(),
                subtree_count: 0,
            });
        }
        self.nodes[ni].children = Some(children);

        // Redistribute items that fully fit inside one child
        let items = std::mem::take(&mut self.nodes[ni].items);
        for item in items {
            match Self::child_for(&self.nodes[ni], item.x, item.y, item.r) {
                Some(k) => {
                    let ci = children[k];
                    self.item_node[item.id as usize] = ci as u32 + 1;
                    self.nodes[ci].items.push(item);
                    self.nodes[ci].subtree_count += 1;
                }
                None => self.nodes[ni].items.push(item),
            }
        }
    }

    pub fn insert(&mut self, id: SlotId, x: f32, y: f32, r: f32) {
        debug_assert!(!self.contains(id), "slot already indexed");
        let item = Item { id, x, y, r };
        let mut ni = 0usize;
        loop {
            self.nodes[ni].subtree_count += 1;
            if let Some(children) = self.nodes[ni].children {
                if let Some(k) = Self::child_for(&self.nodes[ni], x, y, r) {
                    ni = children[k];
                    continue;
                }
            } else if self.nodes[ni].items.len() >= self.max_items
                && self.nodes[ni].level < self.max_level
            {
                self.split(ni);
                if let (Some(children), Some(k)) = (
                    self.nodes[ni].children,
                    Self::child_for(&self.nodes[ni], x, y, r),
                ) {
                    ni = children[k];
                    continue;
                }
            }
            self.nodes[ni].items.push(item);
            self.item_node[id as usize] = ni as u32 + 1;
            return;
        }
    }

    pub fn remove(&mut self, id: SlotId) {
        let slot = self.item_node[id as usize];
        if slot == 0 {
            return;
        }
        let ni = slot as usize - 1;
        self.item_node[id as usize] = 0;
        let items = &mut self.nodes[ni].items;
        if let Some(pos) = items.iter().position(|it| it.id == id) {
            items.swap_remove(pos);
        }
        // walk counts up to the root
        let mut cur = Some(ni);
        while let Some(i) = cur {
            self.nodes[i].subtree_count -= 1;
            cur = self.nodes[i].parent;
        }
        self.try_collapse(ni);
    }

    /// Re-absorb a sparse subtree into its node. Keeps the tree from
    /// accumulating empty structure as short-lived cells churn.
    fn try_collapse(&mut self, ni: usize) {
        let mut target = ni;
        loop {
            let collapse_at = match self.nodes[target].parent {
                Some(p)
                    if self.nodes[p].children.is_some()
                        && self.nodes[p].subtree_count <= self.max_items / 2 =>
                {
                    p
                }
                _ => break,
            };
            let mut gathered = Vec::new();
            self.gather(collapse_at, &mut gathered);
            for item in &gathered {
                self.item_node[item.id as usize] = collapse_at as u32 + 1;
            }
            self.nodes[collapse_at].items = gathered;
            self.nodes[collapse_at].children = None;
            target = collapse_at;
        }
    }

    fn gather(&mut self, ni: usize, out: &mut Vec<Item>) {
        out.append(&mut self.nodes[ni].items);
        if let Some(children) = self.nodes[ni].children.take() {
            for ci in children {
                self.gather(ci, out);
                self.free.push(ci);
            }
        }
    }

    /// Refresh one item's bounds, relocating it only when it no longer
    /// belongs at its current node.
    pub fn update(&mut self, id: SlotId, x: f32, y: f32, r: f32) {
        let slot = self.item_node[id as usize];
        if slot == 0 {
            self.insert(id, x, y, r);
            return;
        }
        let ni = slot as usize - 1;
        let fits_node = {
            let n = &self.nodes[ni];
            x - r >= n.cx - n.hw
                && x + r <= n.cx + n.hw
                && y - r >= n.cy - n.hh
                && y + r <= n.cy + n.hh
        };
        let sinks = self.nodes[ni].children.is_some()
            && Self::child_for(&self.nodes[ni], x, y, r).is_some();
        if fits_node && !sinks {
            if let Some(item) = self.nodes[ni]
                .items
                .iter_mut()
                .find(|it| it.id == id)
            {
                item.x = x;
                item.y = y;
                item.r = r;
            }
            return;
        }
        self.remove(id);
        self.insert(id, x, y, r);
    }

    /// Replace one item's identity in place, preserving its position in
    /// the tree. Used by the deferred kill+replace path so in-flight
    /// snapshot references stay valid for the rest of the tick.
    pub fn swap(&mut self, old: SlotId, new: SlotId) {
        let slot = self.item_node[old as usize];
        if slot == 0 {
            return;
        }
        let ni = slot as usize - 1;
        if let Some(item) = self.nodes[ni].items.iter_mut().find(|it| it.id == old) {
            item.id = new;
        }
        self.item_node[old as usize] = 0;
        self.item_node[new as usize] = ni as u32 + 1;
    }

    /// Write the flat traversal snapshot at `at`; returns bytes written.
    pub fn serialize(&self, arena: &mut Arena, at: usize) -> usize {
        self.write_node(0, arena, at) - at
    }

    fn write_node(&self, ni: usize, arena: &mut Arena, at: usize) -> usize {
        let node = &self.nodes[ni];
        arena.write_f32(at, node.cx);
        arena.write_f32(at + 4, node.cy);
        arena.write_u16(at + 24, node.items.len() as u16);
        let mut cursor = at + 26;
        for item in &node.items {
            arena.write_u16(cursor, item.id);
            cursor += 2;
        }
        match node.children {
            Some(children) => {
                for (k, ci) in children.into_iter().enumerate() {
                    arena.write_u32(at + 8 + 4 * k, cursor as u32);
                    cursor = self.write_node(ci, arena, cursor);
                }
            }
            None => {
                for k in 0..4 {
                    arena.write_u32(at + 8 + 4 * k, 0);
                }
            }
        }
        cursor
    }
}

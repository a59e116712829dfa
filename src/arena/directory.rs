//! Entity directory: per-type membership sets over live slot ids
//!
//! One set per type byte (player ids 0-250 plus the reserved classes).
//! A slot id is a member of exactly one set while its EXISTS flag is up;
//! the engine maintains that invariant on every insert/remove.
//!
//! Sets are `BTreeSet` so iteration is deterministic (ascending slot id).
//! The size-precedence ordering the resolution pass needs is produced by
//! the explicit sort in the tick, not by set order.

use std::collections::BTreeSet;

use crate::core::types::{PLAYER_TYPE_MAX, SlotId};

pub struct EntityDirectory {
    sets: Vec<BTreeSet<SlotId>>,
}

impl EntityDirectory {
    pub fn new() -> Self {
        Self {
            sets: (0..256).map(|_| BTreeSet::new()).collect(),
        }
    }

    pub fn insert(&mut self, type_byte: u8, id: SlotId) {
        self.sets[type_byte as usize].insert(id);
    }

    pub fn remove(&mut self, type_byte: u8, id: SlotId) -> bool {
        self.sets[type_byte as usize].remove(&id)
    }

    pub fn contains(&self, type_byte: u8, id: SlotId) -> bool {
        self.sets[type_byte as usize].contains(&id)
    }

    pub fn set(&self, type_byte: u8) -> &BTreeSet<SlotId> {
        &self.sets[type_byte as usize]
    }

    pub fn count(&self, type_byte: u8) -> usize {
        self.sets[type_byte as usize].len()
    }

    /// Drop every member of one type (kill path clears whole ownership).
    pub fn clear_type(&mut self, type_byte: u8) {
        self.sets[type_byte as usize].clear();
    }

    pub fn clear_all(&mut self) {
        for set in &mut self.sets {
            set.clear();
        }
    }

    /// Total live membership across every type.
    pub fn total(&self) -> usize {
        self.sets.iter().map(|s| s.len()).sum()
    }

    /// How many sets hold this slot id. Used by consistency checks; the
    /// engine invariant keeps this at 0 or 1.
    pub fn membership_count(&self, id: SlotId) -> usize {
        self.sets.iter().filter(|s| s.contains(&id)).count()
    }

    /// Iterate all live ids grouped by ascending type byte. Type 0 is the
    /// reserved controller id and always empty, which is what lets the
    /// index-buffer builder substitute the freed-slot list there.
    pub fn iter_grouped(&self) -> impl Iterator<Item = (u8, SlotId)> + '_ {
        self.sets
            .iter()
            .enumerate()
            .flat_map(|(t, set)| set.iter().map(move |&id| (t as u8, id)))
    }

    /// Player segment lengths in ascending type order, for walking the
    /// index buffer cursor one controller at a time.
    pub fn player_segment_lens(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        (0..=PLAYER_TYPE_MAX).map(move |t| (t, self.sets[t as usize].len()))
    }
}

impl Default for EntityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{PELLET_TYPE, VIRUS_TYPE};

    #[test]
    fn test_insert_remove_membership() {
        let mut dir = EntityDirectory::new();
        dir.insert(VIRUS_TYPE, 9);
        dir.insert(PELLET_TYPE, 4);
        assert!(dir.contains(VIRUS_TYPE, 9));
        assert_eq!(dir.membership_count(9), 1);
        assert_eq!(dir.total(), 2);

        assert!(dir.remove(VIRUS_TYPE, 9));
        assert!(!dir.remove(VIRUS_TYPE, 9));
        assert_eq!(dir.membership_count(9), 0);
    }

    #[test]
    fn test_grouped_iteration_order() {
        let mut dir = EntityDirectory::new();
        dir.insert(PELLET_TYPE, 7);
        dir.insert(2, 30);
        dir.insert(2, 12);
        dir.insert(VIRUS_TYPE, 5);

        let order: Vec<(u8, SlotId)> = dir.iter_grouped().collect();
        // ascending type, ascending slot id inside a type
        assert_eq!(
            order,
            vec![(2, 12), (2, 30), (VIRUS_TYPE, 5), (PELLET_TYPE, 7)]
        );
    }

    #[test]
    fn test_clear_type() {
        let mut dir = EntityDirectory::new();
        dir.insert(3, 1);
        dir.insert(3, 2);
        dir.clear_type(3);
        assert_eq!(dir.count(3), 0);
    }
}

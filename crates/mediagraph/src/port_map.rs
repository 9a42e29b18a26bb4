//! Sparse id-indexed slot map for the ports of one direction
//!
//! Ids are arbitrary `u32` values and only stored ids take memory. A slot is
//! reserved (an id handed out before its port exists) or occupied; every
//! other id is free. Removing an entry frees its id for reuse but never
//! lowers `size()`, which is one past the highest id ever stored.

use std::collections::BTreeMap;

#[derive(Debug)]
enum Slot<T> {
    Reserved,
    Occupied(T),
}

#[derive(Debug)]
pub struct PortMap<T> {
    slots: BTreeMap<u32, Slot<T>>,
    end: u64,
}

impl<T> Default for PortMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PortMap<T> {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            end: 0,
        }
    }

    /// One past the highest id ever stored. Wider than `u32` so an entry at
    /// `u32::MAX` still has a size.
    pub fn size(&self) -> u64 {
        self.end
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        match self.slots.get(&id) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        match self.slots.get_mut(&id) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    pub fn is_reserved(&self, id: u32) -> bool {
        matches!(self.slots.get(&id), Some(Slot::Reserved))
    }

    /// Reserve the lowest free id. `None` only when every `u32` is taken.
    pub fn reserve(&mut self) -> Option<u32> {
        let mut candidate: u32 = 0;
        for &id in self.slots.keys() {
            if id != candidate {
                break;
            }
            candidate = candidate.checked_add(1)?;
        }
        self.slots.insert(candidate, Slot::Reserved);
        self.grow_to(candidate);
        Some(candidate)
    }

    /// Store `value` at `id`, returning the previous occupant.
    pub fn insert_at(&mut self, id: u32, value: T) -> Option<T> {
        self.grow_to(id);
        match self.slots.insert(id, Slot::Occupied(value)) {
            Some(Slot::Occupied(old)) => Some(old),
            _ => None,
        }
    }

    /// Free `id`, returning its occupant if it had one.
    pub fn remove(&mut self, id: u32) -> Option<T> {
        match self.slots.remove(&id)? {
            Slot::Occupied(v) => Some(v),
            Slot::Reserved => None,
        }
    }

    /// Occupied entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots.iter().filter_map(|(id, s)| match s {
            Slot::Occupied(v) => Some((*id, v)),
            Slot::Reserved => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.slots.iter_mut().filter_map(|(id, s)| match s {
            Slot::Occupied(v) => Some((*id, v)),
            Slot::Reserved => None,
        })
    }

    pub fn ids(&self) -> Vec<u32> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Ids at or above `from` that hold a port or a reservation, ascending.
    pub fn stored_from(&self, from: u64) -> impl Iterator<Item = u32> + '_ {
        let start = u32::try_from(from).unwrap_or(u32::MAX);
        self.slots
            .range(start..)
            .map(|(id, _)| *id)
            .filter(move |id| u64::from(*id) >= from)
    }

    /// Take every occupant out and reset the map to empty.
    pub fn drain(&mut self) -> Vec<T> {
        self.end = 0;
        std::mem::take(&mut self.slots)
            .into_values()
            .filter_map(|s| match s {
                Slot::Occupied(v) => Some(v),
                Slot::Reserved => None,
            })
            .collect()
    }

    fn grow_to(&mut self, id: u32) {
        self.end = self.end.max(u64::from(id) + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut map = PortMap::new();
        assert!(map.insert_at(0, "a").is_none());
        assert!(map.insert_at(3, "d").is_none());

        assert_eq!(map.size(), 4);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(3), Some(&"d"));
        assert_eq!(map.get(1), None);
        assert_eq!(map.ids(), vec![0, 3]);
    }

    #[test]
    fn test_remove_keeps_size() {
        let mut map = PortMap::new();
        map.insert_at(0, 10);
        map.insert_at(1, 11);

        assert_eq!(map.remove(0), Some(10));
        assert_eq!(map.remove(0), None);
        assert_eq!(map.size(), 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_reserve_reuses_lowest_free() {
        let mut map: PortMap<u8> = PortMap::new();
        map.insert_at(0, 1);
        map.insert_at(2, 3);

        assert_eq!(map.reserve(), Some(1));
        assert!(map.is_reserved(1));
        assert_eq!(map.get(1), None);
        assert_eq!(map.reserve(), Some(3));

        // A reserved slot is claimed by a later insert.
        assert!(map.insert_at(1, 2).is_none());
        assert_eq!(map.get(1), Some(&2));
    }

    #[test]
    fn test_extreme_ids_stay_sparse() {
        let mut map = PortMap::new();
        map.insert_at(3_000_000_000, 'b');
        map.insert_at(u32::MAX, 'z');

        assert_eq!(map.size(), u64::from(u32::MAX) + 1);
        assert_eq!(map.len(), 2);
        assert_eq!(map.ids(), vec![3_000_000_000, u32::MAX]);
        assert_eq!(map.stored_from(3_000_000_001).collect::<Vec<_>>(), vec![u32::MAX]);
        assert_eq!(map.stored_from(u64::from(u32::MAX) + 1).count(), 0);
        assert_eq!(map.reserve(), Some(0));
    }

    #[test]
    fn test_drain_empties() {
        let mut map = PortMap::new();
        map.insert_at(1, 'x');
        map.insert_at(4, 'y');
        assert_eq!(map.drain(), vec!['x', 'y']);
        assert_eq!(map.size(), 0);
        assert!(map.is_empty());
    }
}

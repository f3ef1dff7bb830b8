//! Fixed-capacity slot table with generation-checked keys.
//!
//! Tasks and sessions both live in bounded tables, and both get referenced
//! long after they may have been freed (a late platform response, a caller
//! holding an old handle). A [`SlotKey`] remembers the generation of the
//! slot it was issued for; once the slot is freed and reused the old key
//! stops resolving instead of silently pointing at the new occupant.

use std::fmt;

/// Handle into a [`SlotArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A table of at most `capacity` values.
#[derive(Debug)]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
    /// Indices of vacant slots, lowest last so it is reused first.
    free: Vec<u32>,
    len: usize,
}

impl<T> SlotArena<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                generation: 0,
                value: None,
            })
            .collect();
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free,
            len: 0,
        }
    }

    /// Stores `value` in a vacant slot. Hands the value back if the table
    /// is full.
    pub fn insert(&mut self, value: T) -> Result<SlotKey, T> {
        let Some(index) = self.free.pop() else {
            return Err(value);
        };
        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);
        self.len += 1;
        Ok(SlotKey {
            index,
            generation: slot.generation,
        })
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.get(key).is_some()
    }

    /// Frees the slot behind `key`. Every key issued for it stops resolving.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let slot = self
            .slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Keys of every occupied slot, in slot order.
    pub fn keys(&self) -> Vec<SlotKey> {
        self.iter().map(|(key, _)| key).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    SlotKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotKey, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value.as_mut().map(|value| {
                (
                    SlotKey {
                        index: index as u32,
                        generation,
                    },
                    value,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_until_full_returns_value_back() {
        let mut arena = SlotArena::with_capacity(2);
        arena.insert("a").unwrap();
        arena.insert("b").unwrap();
        assert!(arena.is_full());
        assert_eq!(arena.insert("c"), Err("c"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_remove_invalidates_stale_key() {
        let mut arena = SlotArena::with_capacity(1);
        let old = arena.insert(1).unwrap();
        assert_eq!(arena.remove(old), Some(1));
        let new = arena.insert(2).unwrap();

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.get(new), Some(&2));
        assert_eq!(arena.remove(old), None);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let mut arena = SlotArena::with_capacity(2);
        let key = arena.insert(7).unwrap();
        assert_eq!(arena.remove(key), Some(7));
        assert_eq!(arena.remove(key), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_keys_in_slot_order() {
        let mut arena = SlotArena::with_capacity(3);
        let a = arena.insert('a').unwrap();
        let b = arena.insert('b').unwrap();
        let c = arena.insert('c').unwrap();
        arena.remove(b);
        assert_eq!(arena.keys(), vec![a, c]);
    }

    #[test]
    fn test_insert_reuses_lowest_freed_slot_first() {
        let mut arena = SlotArena::with_capacity(3);
        let a = arena.insert(0).unwrap();
        assert_eq!(a.index(), 0);
        let b = arena.insert(1).unwrap();
        assert_eq!(b.index(), 1);
        arena.remove(a);
        assert_eq!(arena.insert(2).unwrap().index(), 0);
    }

    #[test]
    fn test_iter_mut_updates_values() {
        let mut arena = SlotArena::with_capacity(2);
        let a = arena.insert(1).unwrap();
        for (_, v) in arena.iter_mut() {
            *v += 10;
        }
        assert_eq!(arena.get(a), Some(&11));
    }
}

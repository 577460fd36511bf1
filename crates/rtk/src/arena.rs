//! Generation-checked object storage.
//!
//! Kernel objects live in arenas owned by [`KernelState`](crate::state::KernelState)
//! and are referred to by small copyable keys. A key carries the generation
//! of the slot it was issued for, so a key that outlives its object is
//! rejected instead of silently aliasing whatever reuses the slot.

use core::fmt;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

/// Key type accepted by an [`Arena`].
pub(crate) trait ArenaKey: Copy + Eq + fmt::Debug {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(self) -> usize;
    fn generation(self) -> u32;
}

/// Declares a key type for an [`Arena`].
macro_rules! arena_key {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis struct $name {
            index: u32,
            generation: u32,
        }

        impl $crate::arena::ArenaKey for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> usize {
                self.index as usize
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }
    };
}

pub(crate) use arena_key;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    limit: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub(crate) fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Arena that refuses to hold more than `limit` live objects.
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit,
            _key: PhantomData,
        }
    }

    /// Stores the value built by `make`, which receives the key it will live
    /// under. Returns `None` when the arena is full.
    pub(crate) fn insert_with(&mut self, make: impl FnOnce(K) -> T) -> Option<K> {
        if self.len >= self.limit {
            return None;
        }
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let key = K::from_parts(index, slot.generation);
        slot.value = Some(make(key));
        self.len += 1;
        Some(key)
    }

    pub(crate) fn insert(&mut self, value: T) -> Option<K> {
        self.insert_with(|_| value)
    }

    pub(crate) fn remove(&mut self, key: K) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation() || slot.value.is_none() {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index() as u32);
        self.len -= 1;
        value
    }

    pub(crate) fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from_parts(index as u32, slot.generation), value))
        })
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.iter().map(|(key, _)| key).collect()
    }
}

impl<K: ArenaKey, T> Index<K> for Arena<K, T> {
    type Output = T;

    fn index(&self, key: K) -> &T {
        match self.get(key) {
            Some(value) => value,
            None => panic!("stale or foreign kernel handle {key:?}"),
        }
    }
}

impl<K: ArenaKey, T> IndexMut<K> for Arena<K, T> {
    fn index_mut(&mut self, key: K) -> &mut T {
        match self.get_mut(key) {
            Some(value) => value,
            None => panic!("stale or foreign kernel handle {key:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    arena_key! {
        struct TestKey;
    }

    #[test]
    fn stale_keys_are_rejected() {
        let mut arena: Arena<TestKey, &str> = Arena::new();
        let a = arena.insert("a").unwrap();
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b").unwrap();
        assert_eq!(a.index(), b.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena[b], "b");
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn limit_is_enforced() {
        let mut arena: Arena<TestKey, u8> = Arena::with_limit(2);
        let first = arena.insert(1).unwrap();
        arena.insert(2).unwrap();
        assert!(arena.insert(3).is_none());
        arena.remove(first);
        assert!(arena.insert(4).is_some());
    }

    #[test]
    fn insert_with_sees_its_own_key() {
        let mut arena: Arena<TestKey, Option<TestKey>> = Arena::new();
        let key = arena.insert_with(Some).unwrap();
        assert_eq!(arena[key], Some(key));
        assert_eq!(arena.keys(), vec![key]);
    }
}

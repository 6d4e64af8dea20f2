//! Fixed-capacity arena with generation-checked handles
//!
//! Every slot carries a generation counter: even while the slot sits on the
//! free list, odd while it is live. Claiming and releasing each bump it by
//! one, so a handle kept past its disposal no longer matches and is rejected
//! instead of aliasing the slot's next occupant.
//!
//! The arena itself is shared without a lock. Free-list mutation happens
//! through a [`FreeList`] the caller keeps behind its own lock; entity
//! access goes through a per-slot mutex that is uncontended in practice
//! because a live handle has exactly one owner at a time.

use crate::core::types::EntityKind;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

/// Typed reference to a live arena slot
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Placeholder that never matches a live slot
    pub const fn dangling() -> Self {
        Self::from_raw_parts(u32::MAX, 0)
    }

    pub(crate) const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: AtomicU32,
    value: Mutex<T>,
}

/// Indices of free slots, pre-sized to the arena capacity
pub(crate) struct FreeList {
    indices: Vec<u32>,
}

impl FreeList {
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }
}

/// Fixed set of entities created once at warm-up
pub(crate) struct Arena<T> {
    kind: EntityKind,
    slots: Box<[Slot<T>]>,
}

impl<T> Arena<T> {
    /// Create `capacity` entities and the free list that tracks them
    ///
    /// The free list is ordered so the first claim returns slot 0.
    pub fn new(kind: EntityKind, capacity: usize, mut make: impl FnMut() -> T) -> (Self, FreeList) {
        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot {
                generation: AtomicU32::new(0),
                value: Mutex::new(make()),
            })
            .collect();
        let indices = (0..capacity as u32).rev().collect();
        (Self { kind, slots }, FreeList { indices })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Pop a free slot and mark it live
    pub fn claim(&self, free: &mut FreeList) -> Option<Handle<T>> {
        let index = free.indices.pop()?;
        let slot = &self.slots[index as usize];
        let generation = slot.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        debug_assert!(generation % 2 == 1, "claimed slot {} was not free", index);
        Some(Handle::from_raw_parts(index, generation))
    }

    /// Run `f` with exclusive access to the entity behind `handle`
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let slot = self.slot(handle)?;
        let mut value = slot.value.lock();
        Ok(f(&mut value))
    }

    /// Mark the slot free and push it back on the free list
    ///
    /// The caller resets the entity first. Releasing the same handle twice
    /// fails with [`Error::StaleHandle`].
    pub fn release(&self, free: &mut FreeList, handle: Handle<T>) -> Result<()> {
        let slot = self.slot(handle)?;
        slot.generation.fetch_add(1, Ordering::AcqRel);
        debug_assert!(free.indices.len() < self.slots.len());
        free.indices.push(handle.index);
        Ok(())
    }

    fn slot(&self, handle: Handle<T>) -> Result<&Slot<T>> {
        self.slots
            .get(handle.index())
            .filter(|slot| {
                handle.generation % 2 == 1
                    && slot.generation.load(Ordering::Acquire) == handle.generation
            })
            .ok_or(Error::StaleHandle(self.kind))
    }
}

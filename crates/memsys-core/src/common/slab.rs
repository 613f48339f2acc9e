//! Generation-checked slab allocator.
//!
//! Every per-component table in this crate (the request pool, the message
//! pool, each cache controller's pending-request table, each interconnect's
//! per-port queues, each DRAM bank's queue) needs the same shape: a fixed or
//! growable array of slots handed out by index, freed back to a free list,
//! and — because an `Event` can outlive the slot it was scheduled against
//! (the entry may be annulled and reused before the event fires) — tagged
//! with a generation counter so a stale handle is detected rather than
//! silently aliasing a newer occupant.

/// A handle into a [`Slab`]: a slot index plus the generation it was
/// allocated at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlabIndex {
    index: u32,
    generation: u32,
}

impl SlabIndex {
    /// Raw slot index, ignoring generation. Only meaningful alongside the
    /// `Slab` that produced it.
    #[inline]
    #[must_use]
    pub fn raw(self) -> usize {
        self.index as usize
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generation-checked, index-addressed slab of `T`.
#[derive(Debug)]
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Creates an empty slab.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Creates an empty slab with room for `cap` slots without reallocating.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            slots: Vec::with_capacity(cap),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of currently occupied slots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the slab holds no occupied slots.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `value`, returning a generation-tagged handle to it.
    pub fn insert(&mut self, value: T) -> SlabIndex {
        self.len += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.value = Some(value);
            SlabIndex {
                index: idx,
                generation: slot.generation,
            }
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            SlabIndex {
                index: idx,
                generation: 0,
            }
        }
    }

    /// Removes and returns the value at `handle`, if it is still live.
    ///
    /// Bumps the slot's generation so any other outstanding handle to this
    /// slot (e.g. a scheduled [`crate::event::Event`] argument) is detected
    /// as stale on its next lookup rather than observing the next occupant.
    pub fn remove(&mut self, handle: SlabIndex) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Returns a shared reference to the value at `handle`, if still live.
    #[must_use]
    pub fn get(&self, handle: SlabIndex) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Returns a mutable reference to the value at `handle`, if still live.
    pub fn get_mut(&mut self, handle: SlabIndex) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// True if `handle` still refers to a live slot.
    #[must_use]
    pub fn contains(&self, handle: SlabIndex) -> bool {
        self.get(handle).is_some()
    }

    /// Iterates over all occupied slots together with their current handle.
    pub fn iter(&self) -> impl Iterator<Item = (SlabIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    SlabIndex {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }

    /// Iterates mutably over all occupied slots together with their current
    /// handle.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlabIndex, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(move |v| (SlabIndex { index: i as u32, generation }, v))
        })
    }

    /// Removes every slot, invalidating all outstanding handles.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}

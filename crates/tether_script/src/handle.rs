//! Context handles with generational indices
//!
//! A handle is an opaque 64-bit token naming one interpreter instance in the
//! process-wide instance table. The generation counter is bumped whenever a
//! slot is vacated, so a stale handle never resolves to a newer instance.

use std::fmt;

/// Opaque lifetime token for one interpreter instance.
///
/// Format: [32-bit generation | 32-bit index]
/// - Index: slot in the instance table
/// - Generation: starts at 1, so a live handle is never zero
///
/// Zero ([`ContextHandle::NULL`]) means destroyed or uninitialized.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextHandle {
    index: u32,
    generation: u32,
}

impl ContextHandle {
    pub const NULL: ContextHandle = ContextHandle {
        index: 0,
        generation: 0,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Serialize to a 64-bit integer
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    /// Deserialize from a 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.to_bits())
    }
}

/// Lifecycle of an interpreter instance.
///
/// Uninitialized -> Live only through a successful create; Live -> Closed only
/// through close. Closed is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Live,
    Closed,
}

/// Generational slot table keyed by [`ContextHandle`].
pub(crate) struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> ContextHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return ContextHandle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        ContextHandle::new(index, 1)
    }

    pub fn get(&self, handle: ContextHandle) -> Option<&T> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    /// Vacate the slot named by `handle`. Returns `None` for stale handles.
    pub fn remove(&mut self, handle: ContextHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        self.live -= 1;

        // A slot whose generation would wrap is retired rather than reused.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(handle.index());
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

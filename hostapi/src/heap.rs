//! Handle table: the host object heap seen from the sandbox.
//!
//! A growable slot array with an intrusive free list. Released slots store
//! the index of the next free slot, so allocation pops the list head and
//! release pushes onto it (LIFO reuse). The first 128 slots are reserved:
//! four constants followed by the borrowed-value stack.
//!
//! One table exists per bridge instance. It is created at instantiation and
//! emptied by [`HandleTable::teardown`] when the instance is discarded.

use lightbridge_primitives::Handle;

use crate::error::HostError;

/// A value that can live in a [`HandleTable`].
///
/// The table pre-populates the four reserved constants and maps values that
/// equal one of them back to the reserved handle instead of spending a slot.
pub trait HeapValue: Clone {
    /// The value stored at a reserved constant handle (0..4).
    fn constant(handle: Handle) -> Self;

    /// The reserved handle for this value, if it is one of the constants.
    fn as_constant(&self) -> Option<Handle>;
}

#[derive(Debug)]
enum Slot<V> {
    Occupied(V),
    /// Free-list link: the next free index, or `None` at the end of the list.
    Free(Option<u32>),
    /// Unused borrowed-stack slot.
    Vacant,
}

#[derive(Debug)]
pub struct HandleTable<V> {
    slots: Vec<Slot<V>>,
    next_free: Option<u32>,
    stack_pointer: u32,
    live: usize,
}

impl<V: HeapValue> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: HeapValue> HandleTable<V> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a table with room for `dynamic` handles before the first regrowth.
    pub fn with_capacity(dynamic: usize) -> Self {
        let reserved = Handle::DYNAMIC_THRESHOLD as usize;
        let mut slots = Vec::with_capacity(reserved + dynamic);
        for raw in 0..Handle::STACK_FLOOR {
            slots.push(Slot::Occupied(V::constant(Handle(raw))));
        }
        slots.resize_with(reserved, || Slot::Vacant);
        Self {
            slots,
            next_free: None,
            stack_pointer: Handle::DYNAMIC_THRESHOLD,
            live: 0,
        }
    }

    // ── Owned handles ──

    /// Store a value and return its handle.
    ///
    /// Constants resolve to their reserved handle and consume no slot.
    pub fn alloc(&mut self, value: V) -> Handle {
        if let Some(handle) = value.as_constant() {
            return handle;
        }
        self.live += 1;
        match self.next_free {
            Some(index) => {
                let previous =
                    std::mem::replace(&mut self.slots[index as usize], Slot::Occupied(value));
                debug_assert!(
                    matches!(previous, Slot::Free(_)),
                    "free list head {} is not free",
                    index
                );
                self.next_free = match previous {
                    Slot::Free(next) => next,
                    _ => None,
                };
                Handle(index)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot::Occupied(value));
                Handle(index)
            }
        }
    }

    /// Look up a live handle.
    pub fn get(&self, handle: Handle) -> Result<&V, HostError> {
        match self.slots.get(handle.0 as usize) {
            Some(Slot::Occupied(value)) => Ok(value),
            _ => Err(HostError::invalid_handle(handle.0)),
        }
    }

    /// Look up a handle and release it in one step.
    pub fn take(&mut self, handle: Handle) -> Result<V, HostError> {
        let value = self.get(handle)?.clone();
        self.drop(handle)?;
        Ok(value)
    }

    /// Release a handle. Returns `false` for reserved handles, which are never
    /// released.
    pub fn drop(&mut self, handle: Handle) -> Result<bool, HostError> {
        if !handle.is_dynamic() {
            return Ok(false);
        }
        let index = handle.0 as usize;
        match self.slots.get(index) {
            Some(Slot::Occupied(_)) => {}
            Some(Slot::Free(_)) => return Err(HostError::DoubleDrop(handle.0)),
            _ => return Err(HostError::invalid_handle(handle.0)),
        }
        let released = std::mem::replace(&mut self.slots[index], Slot::Free(self.next_free));
        self.next_free = Some(handle.0);
        self.live -= 1;
        // The value may own resources whose Drop touches other bridge state;
        // release it only after the table is consistent again.
        std::mem::drop(released);
        Ok(true)
    }

    /// A second, independently released handle to the same value.
    pub fn clone_ref(&mut self, handle: Handle) -> Result<Handle, HostError> {
        let value = self.get(handle)?.clone();
        Ok(self.alloc(value))
    }

    // ── Borrowed stack ──

    /// Push a value that lives only for the duration of one call.
    pub fn push_borrowed(&mut self, value: V) -> Result<Handle, HostError> {
        if self.stack_pointer == Handle::STACK_FLOOR {
            return Err(HostError::StackExhausted);
        }
        self.stack_pointer -= 1;
        self.slots[self.stack_pointer as usize] = Slot::Occupied(value);
        Ok(Handle(self.stack_pointer))
    }

    /// Pop the most recently borrowed value.
    pub fn pop_borrowed(&mut self) -> Result<(), HostError> {
        if self.stack_pointer == Handle::DYNAMIC_THRESHOLD {
            return Err(HostError::Internal("borrowed stack underflow".into()));
        }
        self.slots[self.stack_pointer as usize] = Slot::Vacant;
        self.stack_pointer += 1;
        Ok(())
    }

    /// Current borrowed stack pointer (128 when empty).
    pub fn stack_pointer(&self) -> u32 {
        self.stack_pointer
    }

    // ── Lifecycle ──

    /// Number of dynamic handles currently assigned.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Total slots, including reserved and free ones.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Empty the table, returning every value that was still referenced.
    ///
    /// Values are handed back rather than dropped in place so the caller can
    /// decide when their destructors run.
    pub fn teardown(&mut self) -> Vec<V> {
        let reserved = Handle::STACK_FLOOR as usize;
        let mut remaining = Vec::with_capacity(self.live);
        for slot in self.slots.drain(reserved..) {
            if let Slot::Occupied(value) = slot {
                remaining.push(value);
            }
        }
        self.slots
            .resize_with(Handle::DYNAMIC_THRESHOLD as usize, || Slot::Vacant);
        self.next_free = None;
        self.stack_pointer = Handle::DYNAMIC_THRESHOLD;
        self.live = 0;
        remaining
    }
}

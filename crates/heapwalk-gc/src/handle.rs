//! Durable handles
//!
//! A [`Handle`] occupies one slot of its heap's handle table. Every occupied
//! slot is a collection root, so the object behind a handle cannot be swept
//! until the handle is dropped.

use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::class::ClassId;
use crate::error::{HeapError, HeapResult};
use crate::heap::Shared;
use crate::object::{GcBox, GcHeader};

/// Fixed-capacity slot table. Slots store header addresses.
pub(crate) struct HandleTable {
    slots: Vec<Option<usize>>,
    free: Vec<usize>,
    in_use: usize,
    capacity: usize,
}

impl HandleTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            in_use: 0,
            capacity,
        }
    }

    fn acquire(&mut self, header: *const GcHeader) -> HeapResult<usize> {
        if self.in_use >= self.capacity {
            return Err(HeapError::HandleTableFull {
                capacity: self.capacity,
            });
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.slots[slot] = Some(header as usize);
        self.in_use += 1;
        Ok(slot)
    }

    fn release(&mut self, slot: usize) {
        if self.slots[slot].take().is_some() {
            self.in_use -= 1;
            self.free.push(slot);
        }
    }

    /// Headers of every handled object.
    pub(crate) fn roots(&self) -> Vec<*const GcHeader> {
        self.slots
            .iter()
            .flatten()
            .map(|&addr| addr as *const GcHeader)
            .collect()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A rooted reference to a heap object.
///
/// Dropping the handle releases its slot; the object becomes garbage once no
/// handle and no traced object refers to it.
pub struct Handle {
    heap: Arc<Shared>,
    slot: usize,
    header: NonNull<GcHeader>,
    class: ClassId,
    layout: TypeId,
}

// SAFETY: the handle's slot keeps the object alive, and only `Send + Sync`
// values can be allocated, so sharing or moving the handle across threads
// hands out nothing that is not already thread-safe.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    /// Root the object behind `header`.
    ///
    /// # Safety
    /// `header` must belong to an object of `heap` that cannot be swept while
    /// this call runs: the caller holds the heap state lock, or the object is
    /// already rooted.
    pub(crate) unsafe fn attach(heap: &Arc<Shared>, header: &GcHeader) -> HeapResult<Handle> {
        let class = header.class();
        let layout = heap
            .classes
            .read()
            .get(class)
            .map(|info| info.layout)
            .ok_or(HeapError::CorruptHeader { class })?;
        let slot = heap.handles.lock().acquire(header)?;
        Ok(Handle {
            heap: Arc::clone(heap),
            slot,
            header: NonNull::from(header),
            class,
            layout,
        })
    }

    /// Runtime class of the object
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// `true` if the object's value is a `T`
    pub fn is<T: 'static>(&self) -> bool {
        self.layout == TypeId::of::<T>()
    }

    /// Borrow the object's value as a `T`
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if !self.is::<T>() {
            return None;
        }
        let gc_box = self.header.as_ptr() as *const GcBox<T>;
        // SAFETY: the class layout says the cell holds a GcBox<T>, and this
        // handle's slot keeps it alive for as long as `self` is borrowed.
        Some(unsafe { &(*gc_box).value })
    }

    /// Header address, for values that trace references to this object
    pub fn as_ptr(&self) -> *const GcHeader {
        self.header.as_ptr()
    }

    /// `true` if both handles refer to the same object
    pub fn same_object(&self, other: &Handle) -> bool {
        self.header == other.header
    }

    /// Another handle to the same object, taking a new slot
    pub fn try_clone(&self) -> HeapResult<Handle> {
        // SAFETY: `self` roots the object.
        unsafe { Handle::attach(&self.heap, self.header.as_ref()) }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.heap.handles.lock().release(self.slot);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("class", &self.class)
            .field("slot", &self.slot)
            .field("object", &self.header)
            .finish()
    }
}

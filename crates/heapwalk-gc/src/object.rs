//! GC object layout

use std::sync::atomic::{AtomicU8, Ordering};

use crate::class::ClassId;

/// Header at the start of every heap cell.
#[repr(C)]
pub struct GcHeader {
    /// Mark bits for tri-color marking
    mark: AtomicU8,
    _reserved: [u8; 3],
    /// Runtime class of the object
    class: ClassId,
}

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

impl GcHeader {
    /// Create a white header for an object of `class`
    pub const fn new(class: ClassId) -> Self {
        Self {
            mark: AtomicU8::new(MarkColor::White as u8),
            _reserved: [0; 3],
            class,
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            _ => MarkColor::Black,
        }
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// Runtime class of the object
    pub fn class(&self) -> ClassId {
        self.class
    }
}

/// What actually sits in a cell.
#[repr(C)]
pub(crate) struct GcBox<T> {
    pub(crate) header: GcHeader,
    pub(crate) value: T,
}

/// Types that can live on the managed heap.
///
/// Values that hold raw pointers to other heap objects report them from
/// [`trace`](Self::trace) so the collector keeps them alive.
pub trait GcTraceable {
    /// Whether this type contains GC references that need tracing
    const NEEDS_TRACE: bool;

    /// Report every header this value points at
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader));
}

macro_rules! impl_leaf_traceable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl GcTraceable for $ty {
                const NEEDS_TRACE: bool = false;
                fn trace(&self, _tracer: &mut dyn FnMut(*const GcHeader)) {}
            }
        )*
    };
}

impl_leaf_traceable!((), bool, i32, i64, u32, u64, f64, String);

impl<T: GcTraceable> GcTraceable for Option<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        if let Some(value) = self {
            value.trace(tracer);
        }
    }
}

impl<T: GcTraceable> GcTraceable for Vec<T> {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        for value in self {
            value.trace(tracer);
        }
    }
}

impl<T: GcTraceable, const N: usize> GcTraceable for [T; N] {
    const NEEDS_TRACE: bool = T::NEEDS_TRACE;
    fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
        for value in self {
            value.trace(tracer);
        }
    }
}

/// Drop the value of a block cell in place. The block owns the memory.
pub(crate) unsafe fn drop_in_block<T>(cell: *mut u8) {
    let gc_box = cell as *mut GcBox<T>;
    // SAFETY: cell holds an initialized GcBox<T>.
    unsafe { std::ptr::drop_in_place(&raw mut (*gc_box).value) };
}

/// Drop the value of a large object and free its allocation.
pub(crate) unsafe fn drop_large<T>(cell: *mut u8) {
    let layout = std::alloc::Layout::new::<GcBox<T>>();
    let gc_box = cell as *mut GcBox<T>;
    // SAFETY: cell holds an initialized GcBox<T> allocated with `layout`.
    unsafe {
        std::ptr::drop_in_place(&raw mut (*gc_box).value);
        std::alloc::dealloc(cell, layout);
    }
}

/// Trace the value of a cell.
pub(crate) unsafe fn trace_box<T: GcTraceable>(cell: *const u8, tracer: &mut dyn FnMut(*const GcHeader)) {
    let gc_box = cell as *const GcBox<T>;
    // SAFETY: cell holds an initialized GcBox<T>.
    unsafe { (*gc_box).value.trace(tracer) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_marking() {
        let header = GcHeader::new(ClassId::from_raw(3));
        assert_eq!(header.mark(), MarkColor::White);
        assert_eq!(header.class(), ClassId::from_raw(3));

        header.set_mark(MarkColor::Gray);
        assert_eq!(header.mark(), MarkColor::Gray);

        header.set_mark(MarkColor::Black);
        assert_eq!(header.mark(), MarkColor::Black);
    }

    #[test]
    fn test_header_fits_smallest_cell() {
        assert_eq!(std::mem::size_of::<GcHeader>(), 8);
        assert_eq!(std::mem::offset_of!(GcBox<u64>, value), 8);
    }

    #[test]
    fn test_needs_trace_propagates() {
        struct Edge(*const GcHeader);
        impl GcTraceable for Edge {
            const NEEDS_TRACE: bool = true;
            fn trace(&self, tracer: &mut dyn FnMut(*const GcHeader)) {
                tracer(self.0);
            }
        }

        assert!(!<Vec<i64> as GcTraceable>::NEEDS_TRACE);
        assert!(<Option<Edge> as GcTraceable>::NEEDS_TRACE);

        let header = GcHeader::new(ClassId::from_raw(0));
        let edges = vec![Edge(&header), Edge(&header)];
        let mut seen = 0;
        edges.trace(&mut |_| seen += 1);
        assert_eq!(seen, 2);
    }
}

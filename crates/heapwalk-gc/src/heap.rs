//! The managed heap
//!
//! A [`Heap`] owns block storage, a large-object space, its class registry
//! and its handle table. Collection is stop-the-world mark/sweep rooted in
//! the handle table. Heap walks run under the same state lock as collection,
//! so a collector on another thread waits for the walk to finish.
//!
//! Lock order: state, then classes, then handles.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use heapwalk_core::IterationControl;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::block::{
    BlockDirectory, DropFn, LARGE_OBJECT_THRESHOLD, NUM_SIZE_CLASSES, TraceFn, size_class_cell_size,
    size_class_index,
};
use crate::class::{ClassId, ClassInfo, ClassRegistry, LoaderId};
use crate::error::{HeapError, HeapResult};
use crate::handle::{Handle, HandleTable};
use crate::object::{GcBox, GcHeader, GcTraceable, MarkColor, drop_in_block, drop_large, trace_box};

static NEXT_HEAP_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Heaps this thread is walking or collecting.
    static BUSY: RefCell<FxHashSet<usize>> = RefCell::new(FxHashSet::default());
}

/// Marks a heap busy on the current thread until dropped.
struct BusyGuard(usize);

impl BusyGuard {
    fn enter(heap_id: usize) -> HeapResult<Self> {
        BUSY.with(|busy| {
            if busy.borrow_mut().insert(heap_id) {
                Ok(BusyGuard(heap_id))
            } else {
                Err(HeapError::WalkInProgress)
            }
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        BUSY.with(|busy| {
            busy.borrow_mut().remove(&self.0);
        });
    }
}

/// Heap configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Allocated bytes that trigger a collection on the next allocation
    pub gc_threshold: usize,
    /// Maximum number of live handles
    pub max_handles: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            gc_threshold: 1024 * 1024, // 1MB
            max_handles: 64 * 1024,
        }
    }
}

/// Heap statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes held by live objects
    pub total_bytes: usize,
    /// Number of allocated objects (live or not yet swept)
    pub allocation_count: usize,
    /// Collections performed
    pub collections: usize,
    /// Bytes reclaimed by the last collection
    pub last_reclaimed: usize,
    /// Pause of the last collection
    pub last_pause: Duration,
    /// Pause accumulated over all collections
    pub total_pause: Duration,
    /// Handles currently held
    pub handles_in_use: usize,
    /// Handle table capacity
    pub handle_capacity: usize,
}

/// How a heap walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkOutcome {
    /// Objects handed to the visitor
    pub visited: usize,
    /// The visitor returned [`IterationControl::Stop`]
    pub stopped: bool,
}

/// An object seen during [`Heap::walk`].
///
/// Only ever handed out by reference for the duration of one visitor call,
/// and remembers which heap is walking it.
pub struct HeapObject {
    heap: usize,
    header: NonNull<GcHeader>,
}

impl HeapObject {
    /// Runtime class of the object
    pub fn class(&self) -> ClassId {
        self.header().class()
    }

    /// Id of the heap the object lives on
    pub fn heap_id(&self) -> usize {
        self.heap
    }

    pub(crate) fn header(&self) -> &GcHeader {
        // SAFETY: built by `Heap::walk` from a live header, and only lent out
        // while the walk holds the owning heap's state lock.
        unsafe { self.header.as_ref() }
    }
}

/// A large object (> 8KB), allocated on its own.
struct LargeAllocation {
    header: *mut GcHeader,
    size: usize,
    drop_fn: DropFn,
    trace_fn: Option<TraceFn>,
}

/// Storage and collector bookkeeping. Only touched under `Shared::state`.
struct HeapState {
    directories: Vec<BlockDirectory>,
    large_objects: Vec<LargeAllocation>,
    total_bytes: usize,
    collections: usize,
    last_reclaimed: usize,
    last_pause: Duration,
    total_pause: Duration,
}

// SAFETY: the raw pointers in `large_objects` are owned by this state and
// only dereferenced while the state mutex is held.
unsafe impl Send for HeapState {}

impl HeapState {
    fn new() -> Self {
        Self {
            directories: (0..NUM_SIZE_CLASSES)
                .map(|i| BlockDirectory::new(size_class_cell_size(i)))
                .collect(),
            large_objects: Vec::new(),
            total_bytes: 0,
            collections: 0,
            last_reclaimed: 0,
            last_pause: Duration::ZERO,
            total_pause: Duration::ZERO,
        }
    }

    fn allocation_count(&self) -> usize {
        let in_blocks: usize = self.directories.iter().map(BlockDirectory::live_count).sum();
        in_blocks + self.large_objects.len()
    }

    /// Every allocated header, small objects first.
    fn for_each_object(&self, f: &mut dyn FnMut(*const GcHeader, Option<TraceFn>)) {
        for dir in &self.directories {
            dir.for_each_allocated(f);
        }
        for large in &self.large_objects {
            f(large.header, large.trace_fn);
        }
    }

    fn allocate<T: GcTraceable>(&mut self, class: ClassId, value: T) -> *mut GcHeader {
        let layout = std::alloc::Layout::new::<GcBox<T>>();
        let size = layout.size();
        let trace_fn: Option<TraceFn> = if T::NEEDS_TRACE { Some(trace_box::<T>) } else { None };

        let in_block = match size_class_index(size) {
            Some(idx) if layout.align() <= 8 && size <= LARGE_OBJECT_THRESHOLD => {
                self.directories[idx].allocate(size, drop_in_block::<T>, trace_fn)
            }
            _ => None,
        };
        let cell = match in_block {
            Some(cell) => cell,
            None => {
                // SAFETY: GcBox<T> always has a non-zero size.
                let raw = unsafe { std::alloc::alloc(layout) };
                if raw.is_null() {
                    std::alloc::handle_alloc_error(layout);
                }
                self.large_objects.push(LargeAllocation {
                    header: raw as *mut GcHeader,
                    size,
                    drop_fn: drop_large::<T>,
                    trace_fn,
                });
                raw
            }
        };

        // SAFETY: cell is a fresh, suitably aligned region of at least
        // `size` bytes.
        unsafe {
            std::ptr::write(
                cell as *mut GcBox<T>,
                GcBox {
                    header: GcHeader::new(class),
                    value,
                },
            );
        }
        self.total_bytes += size;
        cell as *mut GcHeader
    }

    fn reset_marks(&self) {
        self.for_each_object(&mut |header, _| {
            // SAFETY: allocated cells hold initialized headers.
            unsafe { (*header).set_mark(MarkColor::White) };
        });
    }

    fn mark(&self, roots: &[*const GcHeader]) {
        let mut trace_lookup: FxHashMap<usize, Option<TraceFn>> = FxHashMap::default();
        self.for_each_object(&mut |header, trace_fn| {
            trace_lookup.insert(header as usize, trace_fn);
        });

        let mut worklist: VecDeque<*const GcHeader> = VecDeque::new();
        let mut visited: FxHashSet<usize> = FxHashSet::default();
        for &root in roots {
            if trace_lookup.contains_key(&(root as usize)) && visited.insert(root as usize) {
                // SAFETY: root is an allocated header of this heap.
                unsafe { (*root).set_mark(MarkColor::Gray) };
                worklist.push_back(root);
            }
        }

        while let Some(ptr) = worklist.pop_front() {
            if let Some(&Some(trace_fn)) = trace_lookup.get(&(ptr as usize)) {
                // SAFETY: ptr is an allocated cell whose value matches trace_fn.
                unsafe {
                    trace_fn(ptr as *const u8, &mut |child| {
                        let addr = child as usize;
                        if trace_lookup.contains_key(&addr) && visited.insert(addr) {
                            (*child).set_mark(MarkColor::Gray);
                            worklist.push_back(child);
                        }
                    });
                }
            }
            // SAFETY: ptr is an allocated header of this heap.
            unsafe { (*ptr).set_mark(MarkColor::Black) };
        }
    }

    fn sweep(&mut self) -> usize {
        let mut reclaimed: usize = self.directories.iter_mut().map(BlockDirectory::sweep).sum();

        let (dead, live): (Vec<_>, Vec<_>) = self
            .large_objects
            .drain(..)
            // SAFETY: large object headers stay valid until dropped below.
            .partition(|large| unsafe { (*large.header).mark() } == MarkColor::White);
        self.large_objects = live;
        for large in dead {
            reclaimed += large.size;
            // SAFETY: the object is unreachable and owned by this state.
            unsafe { (large.drop_fn)(large.header as *mut u8) };
        }

        self.total_bytes = self.total_bytes.saturating_sub(reclaimed);
        reclaimed
    }
}

impl Drop for HeapState {
    fn drop(&mut self) {
        for dir in &mut self.directories {
            dir.dealloc_all();
        }
        for large in self.large_objects.drain(..) {
            // SAFETY: no handle outlives the heap state, so nothing else can
            // reach the object.
            unsafe { (large.drop_fn)(large.header as *mut u8) };
        }
    }
}

/// State shared by a heap and all of its handles.
pub(crate) struct Shared {
    id: usize,
    config: HeapConfig,
    state: Mutex<HeapState>,
    pub(crate) classes: RwLock<ClassRegistry>,
    pub(crate) handles: Mutex<HandleTable>,
}

/// A managed heap. Cloning yields another reference to the same heap.
#[derive(Clone)]
pub struct Heap {
    shared: Arc<Shared>,
}

impl Heap {
    /// Create a heap with default configuration
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Create a heap with custom configuration
    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_HEAP_ID.fetch_add(1, Ordering::Relaxed),
                config,
                state: Mutex::new(HeapState::new()),
                classes: RwLock::new(ClassRegistry::new()),
                handles: Mutex::new(HandleTable::new(config.max_handles)),
            }),
        }
    }

    /// Process-unique id of this heap
    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Configuration the heap was created with
    pub fn config(&self) -> HeapConfig {
        self.shared.config
    }

    /// Define a new class loader
    pub fn define_loader(&self, name: &str) -> LoaderId {
        self.shared.classes.write().define_loader(name)
    }

    /// Define a class whose instances hold a `T`
    pub fn define_class<T: GcTraceable + Send + Sync + 'static>(
        &self,
        loader: LoaderId,
        name: &str,
        superclass: Option<ClassId>,
    ) -> HeapResult<ClassId> {
        self.shared.classes.write().define_class::<T>(loader, name, superclass)
    }

    /// Find a loaded class by loader and name
    pub fn lookup_class(&self, loader: LoaderId, name: &str) -> Option<ClassId> {
        self.shared.classes.read().lookup(loader, name)
    }

    /// Metadata for a class
    pub fn class_info(&self, class: ClassId) -> Option<ClassInfo> {
        self.shared.classes.read().get(class).cloned()
    }

    /// Metadata for every class ever defined, loaded or not
    pub fn classes(&self) -> Vec<ClassInfo> {
        self.shared.classes.read().iter().cloned().collect()
    }

    /// Name of a loader
    pub fn loader_name(&self, loader: LoaderId) -> Option<String> {
        self.shared.classes.read().loader_name(loader).map(str::to_string)
    }

    /// `true` if `sub` is `sup` or inherits from it
    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        self.shared.classes.read().is_subclass_of(sub, sup)
    }

    /// Unload a loader. Its classes can no longer be looked up or
    /// instantiated; existing instances stay until collected.
    pub fn unload_loader(&self, loader: LoaderId) -> HeapResult<usize> {
        self.shared.classes.write().unload_loader(loader)
    }

    /// Allocate an instance of `class` holding `value` and return a handle
    /// to it.
    ///
    /// May run a collection first when the heap is over its threshold. If
    /// the handle table is full the new object is left unrooted and the
    /// call fails with [`HeapError::HandleTableFull`].
    pub fn alloc<T: GcTraceable + Send + Sync + 'static>(&self, class: ClassId, value: T) -> HeapResult<Handle> {
        let _busy = BusyGuard::enter(self.id())?;
        self.check_layout::<T>(class)?;

        let mut state = self.shared.state.lock();
        if state.total_bytes >= self.shared.config.gc_threshold {
            self.collect_locked(&mut state);
        }
        let header = state.allocate(class, value);
        // SAFETY: the state lock is held, so the new object cannot be swept.
        unsafe { Handle::attach(&self.shared, &*header) }
    }

    fn check_layout<T: 'static>(&self, class: ClassId) -> HeapResult<()> {
        let classes = self.shared.classes.read();
        let info = classes.get(class).ok_or(HeapError::UnknownClassId(class))?;
        if !info.loaded {
            return Err(HeapError::ClassNotLoaded(class));
        }
        if info.layout != std::any::TypeId::of::<T>() {
            return Err(HeapError::LayoutMismatch {
                class,
                expected: info.layout_name,
                actual: std::any::type_name::<T>(),
            });
        }
        Ok(())
    }

    /// Run a full collection. Returns the bytes reclaimed.
    pub fn collect(&self) -> HeapResult<usize> {
        let _busy = BusyGuard::enter(self.id())?;
        let mut state = self.shared.state.lock();
        Ok(self.collect_locked(&mut state))
    }

    fn collect_locked(&self, state: &mut HeapState) -> usize {
        let start = Instant::now();
        let roots = self.shared.handles.lock().roots();

        #[cfg(feature = "gc_logging")]
        let initial_count = state.allocation_count();
        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "heapwalk::gc",
            heap = self.id(),
            roots = roots.len(),
            heap_bytes = state.total_bytes,
            objects = initial_count,
            "GC cycle starting"
        );

        state.reset_marks();
        state.mark(&roots);
        let reclaimed = state.sweep();

        let elapsed = start.elapsed();
        state.collections += 1;
        state.last_reclaimed = reclaimed;
        state.last_pause = elapsed;
        state.total_pause += elapsed;

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "heapwalk::gc",
            heap = self.id(),
            collection = state.collections,
            reclaimed_bytes = reclaimed,
            pause_us = elapsed.as_micros() as u64,
            live_bytes = state.total_bytes,
            freed_objects = initial_count.saturating_sub(state.allocation_count()),
            "GC cycle complete"
        );

        reclaimed
    }

    /// Visit every allocated object while holding the heap lock.
    ///
    /// Objects in block storage come first, grouped by size class, then
    /// large objects. This is not allocation order. Walking, allocating or
    /// collecting this heap from inside the visitor fails with
    /// [`HeapError::WalkInProgress`]; [`Heap::root`] is allowed.
    pub fn walk(&self, visitor: &mut dyn FnMut(&HeapObject) -> IterationControl) -> HeapResult<WalkOutcome> {
        let _busy = BusyGuard::enter(self.id())?;
        let state = self.shared.state.lock();
        // No class can gain instances while the state lock is held, so any
        // header naming a class past this bound is corrupt.
        let known_classes = self.shared.classes.read().iter().count();

        let mut outcome = WalkOutcome::default();
        let mut corrupt = None;
        state.for_each_object(&mut |header, _| {
            if outcome.stopped || corrupt.is_some() {
                return;
            }
            // SAFETY: allocated cells hold initialized headers, and the
            // state lock keeps them from being swept.
            let header = unsafe { &*header };
            if header.class().as_raw() as usize >= known_classes {
                corrupt = Some(header.class());
                return;
            }
            outcome.visited += 1;
            let object = HeapObject {
                heap: self.id(),
                header: NonNull::from(header),
            };
            if visitor(&object).is_stop() {
                outcome.stopped = true;
            }
        });

        match corrupt {
            Some(class) => Err(HeapError::CorruptHeader { class }),
            None => Ok(outcome),
        }
    }

    /// Root an object seen during a walk of this heap.
    ///
    /// Objects from another heap's walk are refused with
    /// [`HeapError::ForeignObject`]; this heap's collector would not see the
    /// handle.
    pub fn root(&self, object: &HeapObject) -> HeapResult<Handle> {
        if object.heap != self.id() {
            return Err(HeapError::ForeignObject {
                heap: self.id(),
                owner: object.heap,
            });
        }
        // SAFETY: the object came from a walk of this heap, which holds the
        // state lock for as long as the reference lives.
        unsafe { Handle::attach(&self.shared, object.header()) }
    }

    /// Current statistics
    pub fn stats(&self) -> HeapStats {
        let (total_bytes, allocation_count, collections, last_reclaimed, last_pause, total_pause) = {
            let state = self.shared.state.lock();
            (
                state.total_bytes,
                state.allocation_count(),
                state.collections,
                state.last_reclaimed,
                state.last_pause,
                state.total_pause,
            )
        };
        let handles = self.shared.handles.lock();
        HeapStats {
            total_bytes,
            allocation_count,
            collections,
            last_reclaimed,
            last_pause,
            total_pause,
            handles_in_use: handles.in_use(),
            handle_capacity: handles.capacity(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap").field("id", &self.shared.id).finish_non_exhaustive()
    }
}

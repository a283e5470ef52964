//! Size-segregated block storage.
//!
//! Small objects live in 16KB blocks, each dedicated to one cell size. A
//! cell holds one [`GcBox`](crate::object::GcBox): the header followed by the
//! value. Free cells are tracked in a bitmap so allocation is a
//! `trailing_zeros` scan and sweeping is a pass over the allocated bits.
//!
//! ```text
//! MarkedBlock (16KB):
//! ┌──────────────────────────────┐
//! │ cell 0: GcHeader | value     │
//! │ cell 1: GcHeader | value     │
//! │ ...                          │
//! └──────────────────────────────┘
//! free_bits: 1 = free, 0 = allocated
//! ```
//!
//! Blocks are plain owned data. All access goes through the heap's state
//! lock, so nothing in here synchronizes.

use crate::object::{GcHeader, MarkColor};

/// Block size: 16KB.
const BLOCK_SIZE: usize = 16 * 1024;

/// Cell sizes, smallest first. Allocations round up to the first fit.
const SIZE_CLASSES: &[usize] = &[
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 1024, 2048, 4096, 8192,
];

/// Number of size classes.
pub(crate) const NUM_SIZE_CLASSES: usize = SIZE_CLASSES.len();

/// Allocations above this size go to the large-object space.
pub(crate) const LARGE_OBJECT_THRESHOLD: usize = 8192;

/// Drops the value stored in a cell. Receives the cell start.
pub(crate) type DropFn = unsafe fn(*mut u8);

/// Reports the headers a cell's value points at. Receives the cell start.
pub(crate) type TraceFn = unsafe fn(*const u8, &mut dyn FnMut(*const GcHeader));

/// Index of the smallest size class that fits `size`, or `None` for a large
/// object.
#[inline]
pub(crate) fn size_class_index(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&sc| sc >= size)
}

#[inline]
pub(crate) fn size_class_cell_size(index: usize) -> usize {
    SIZE_CLASSES[index]
}

/// Per-cell bookkeeping for an allocated cell.
#[derive(Clone, Copy)]
struct CellMeta {
    drop_fn: DropFn,
    trace_fn: Option<TraceFn>,
    size: usize,
}

/// A 16KB block of equally sized cells.
pub(crate) struct MarkedBlock {
    /// Backing storage, `u64` for 8-byte alignment.
    storage: Vec<u64>,
    cell_size: usize,
    num_cells: usize,
    /// Bit N set means cell N is free.
    free_bits: Vec<u64>,
    cells: Vec<Option<CellMeta>>,
    live_count: usize,
}

impl MarkedBlock {
    pub(crate) fn new(cell_size: usize) -> Self {
        debug_assert!(cell_size >= 16 && cell_size % 8 == 0);
        let num_cells = BLOCK_SIZE / cell_size;

        let num_words = num_cells.div_ceil(64);
        let mut free_bits = vec![u64::MAX; num_words];
        let remainder = num_cells % 64;
        if remainder != 0 {
            free_bits[num_words - 1] = (1u64 << remainder) - 1;
        }

        Self {
            storage: vec![0u64; BLOCK_SIZE / 8],
            cell_size,
            num_cells,
            free_bits,
            cells: vec![None; num_cells],
            live_count: 0,
        }
    }

    #[inline]
    fn is_free(&self, cell_idx: usize) -> bool {
        self.free_bits[cell_idx / 64] & (1u64 << (cell_idx % 64)) != 0
    }

    #[inline]
    fn cell_ptr(&mut self, cell_idx: usize) -> *mut u8 {
        let base = self.storage.as_mut_ptr() as *mut u8;
        // SAFETY: cell_idx < num_cells, so the offset stays inside storage.
        unsafe { base.add(cell_idx * self.cell_size) }
    }

    #[inline]
    fn cell_header(&self, cell_idx: usize) -> *const GcHeader {
        let base = self.storage.as_ptr() as *const u8;
        // SAFETY: cell_idx < num_cells, so the offset stays inside storage.
        unsafe { base.add(cell_idx * self.cell_size) as *const GcHeader }
    }

    /// Claim a free cell. Returns its start, or `None` if the block is full.
    ///
    /// The caller must write a `GcBox` into the cell before anything reads
    /// the block again.
    pub(crate) fn allocate(
        &mut self,
        actual_size: usize,
        drop_fn: DropFn,
        trace_fn: Option<TraceFn>,
    ) -> Option<*mut u8> {
        let (word_idx, word) = self
            .free_bits
            .iter()
            .enumerate()
            .find(|(_, word)| **word != 0)?;
        let bit_idx = word.trailing_zeros() as usize;
        let cell_idx = word_idx * 64 + bit_idx;
        if cell_idx >= self.num_cells {
            return None;
        }

        self.free_bits[word_idx] &= !(1u64 << bit_idx);
        self.cells[cell_idx] = Some(CellMeta {
            drop_fn,
            trace_fn,
            size: actual_size,
        });
        self.live_count += 1;
        Some(self.cell_ptr(cell_idx))
    }

    #[inline]
    pub(crate) fn live_count(&self) -> usize {
        self.live_count
    }

    /// Visit every allocated cell in address order.
    pub(crate) fn for_each_allocated(&self, f: &mut dyn FnMut(*const GcHeader, Option<TraceFn>)) {
        for cell_idx in 0..self.num_cells {
            if self.is_free(cell_idx) {
                continue;
            }
            let trace_fn = self.cells[cell_idx].and_then(|meta| meta.trace_fn);
            f(self.cell_header(cell_idx), trace_fn);
        }
    }

    /// Free every white cell, running its drop function. Returns the bytes
    /// reclaimed.
    pub(crate) fn sweep(&mut self) -> usize {
        self.release_cells(|header| header.mark() == MarkColor::White)
    }

    /// Free every allocated cell regardless of mark.
    pub(crate) fn dealloc_all(&mut self) -> usize {
        self.release_cells(|_| true)
    }

    fn release_cells(&mut self, mut should_free: impl FnMut(&GcHeader) -> bool) -> usize {
        let mut reclaimed = 0;
        for cell_idx in 0..self.num_cells {
            if self.is_free(cell_idx) {
                continue;
            }
            // SAFETY: allocated cells always hold an initialized header.
            let header = unsafe { &*self.cell_header(cell_idx) };
            if !should_free(header) {
                continue;
            }

            let meta = self.cells[cell_idx].take();
            self.free_bits[cell_idx / 64] |= 1u64 << (cell_idx % 64);
            self.live_count -= 1;

            if let Some(meta) = meta {
                reclaimed += meta.size;
                let cell = self.cell_ptr(cell_idx);
                // SAFETY: the cell was initialized by the allocator that
                // registered this drop function and is now unreachable.
                unsafe { (meta.drop_fn)(cell) };
            }
        }
        reclaimed
    }
}

/// All blocks of one cell size.
pub(crate) struct BlockDirectory {
    cell_size: usize,
    blocks: Vec<MarkedBlock>,
    /// Block to try first on the next allocation.
    cursor: usize,
}

impl BlockDirectory {
    /// Empty blocks kept after a sweep as a buffer for the next burst.
    const MAX_EMPTY_BLOCKS: usize = 2;

    pub(crate) fn new(cell_size: usize) -> Self {
        Self {
            cell_size,
            blocks: Vec::new(),
            cursor: 0,
        }
    }

    /// Allocate a cell, adding a block when every existing one is full.
    pub(crate) fn allocate(
        &mut self,
        actual_size: usize,
        drop_fn: DropFn,
        trace_fn: Option<TraceFn>,
    ) -> Option<*mut u8> {
        let num_blocks = self.blocks.len();
        for i in 0..num_blocks {
            let idx = (self.cursor + i) % num_blocks;
            if let Some(ptr) = self.blocks[idx].allocate(actual_size, drop_fn, trace_fn) {
                self.cursor = idx;
                return Some(ptr);
            }
        }

        let mut block = MarkedBlock::new(self.cell_size);
        let ptr = block.allocate(actual_size, drop_fn, trace_fn)?;
        self.cursor = self.blocks.len();
        self.blocks.push(block);
        Some(ptr)
    }

    /// Sweep every block and drop surplus empty blocks.
    pub(crate) fn sweep(&mut self) -> usize {
        let reclaimed = self.blocks.iter_mut().map(MarkedBlock::sweep).sum();

        let mut empty_kept = 0usize;
        self.blocks.retain(|block| {
            if block.live_count() > 0 {
                return true;
            }
            empty_kept += 1;
            empty_kept <= Self::MAX_EMPTY_BLOCKS
        });
        self.cursor = 0;
        reclaimed
    }

    pub(crate) fn dealloc_all(&mut self) -> usize {
        self.blocks.iter_mut().map(MarkedBlock::dealloc_all).sum()
    }

    pub(crate) fn for_each_allocated(&self, f: &mut dyn FnMut(*const GcHeader, Option<TraceFn>)) {
        for block in &self.blocks {
            block.for_each_allocated(f);
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.blocks.iter().map(MarkedBlock::live_count).sum()
    }
}

//! # heapwalk managed heap
//!
//! An in-process managed heap that the enumeration bridge can walk.
//!
//! ## Design
//!
//! - **Classes**: defined by loaders; identity is a [`ClassId`], never a name
//! - **Small objects**: 16KB blocks segregated by size class
//! - **Large objects**: separate allocation for objects > 8KB
//! - **Collection**: stop-the-world mark/sweep rooted in the handle table
//! - **Walks**: run under the heap lock, so collection waits for them

#![warn(clippy::all)]
#![warn(missing_docs)]

mod block;
pub mod class;
pub mod error;
pub mod handle;
pub mod heap;
pub mod host;
pub mod object;

pub use class::{ClassId, ClassInfo, LoaderId};
pub use error::{HeapError, HeapResult};
pub use handle::Handle;
pub use heap::{Heap, HeapConfig, HeapObject, HeapStats, WalkOutcome};
pub use host::TypeDescriptor;
pub use object::{GcHeader, GcTraceable, MarkColor};

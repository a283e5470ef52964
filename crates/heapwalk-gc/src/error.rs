//! Heap error types

use thiserror::Error;

use crate::class::{ClassId, LoaderId};

/// Managed heap errors
#[derive(Debug, Error)]
pub enum HeapError {
    /// Loader was never defined or has been unloaded
    #[error("unknown class loader {0}")]
    UnknownLoader(LoaderId),

    /// No loaded class with this name in this loader
    #[error("no class named {name:?} in {loader}")]
    UnknownClass {
        /// Loader searched
        loader: LoaderId,
        /// Name looked up
        name: String,
    },

    /// Class id not issued by this heap
    #[error("unknown class id {0}")]
    UnknownClassId(ClassId),

    /// The class's loader has been unloaded
    #[error("class {0} is no longer loaded")]
    ClassNotLoaded(ClassId),

    /// A loader defined the same name twice
    #[error("class {name:?} is already defined in {loader}")]
    DuplicateClass {
        /// Defining loader
        loader: LoaderId,
        /// Class name
        name: String,
    },

    /// Value type does not match the class layout
    #[error("class {class} holds {expected}, not {actual}")]
    LayoutMismatch {
        /// Class allocated
        class: ClassId,
        /// Layout the class was defined with
        expected: &'static str,
        /// Type that was passed in
        actual: &'static str,
    },

    /// Every handle slot is taken
    #[error("handle table full ({capacity} handles)")]
    HandleTableFull {
        /// Configured capacity
        capacity: usize,
    },

    /// Object handed out by another heap's walk
    #[error("object belongs to heap {owner}, not heap {heap}")]
    ForeignObject {
        /// Heap asked to root the object
        heap: usize,
        /// Heap that is walking the object
        owner: usize,
    },

    /// This thread is already walking the heap
    #[error("heap walk already in progress on this thread")]
    WalkInProgress,

    /// A walked object's header names a class the heap does not know
    #[error("corrupt object header: unknown class {class}")]
    CorruptHeader {
        /// Class id read from the header
        class: ClassId,
    },
}

/// Result alias for heap operations
pub type HeapResult<T> = Result<T, HeapError>;

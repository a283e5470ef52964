//! The seam between the bridge and a managed runtime.
//!
//! Everything the bridge knows about a heap goes through [`HostRuntime`]:
//! class resolution, a single heap iteration per request, the runtime class
//! of a visited object, and promotion of a visited object to a durable
//! handle. The bridge never initializes or tears down a runtime; callers
//! pass one in by reference for every operation.

use std::fmt;

/// Returned by a heap visitor to tell the runtime whether to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationControl {
    /// Visit the next object.
    Continue,
    /// End the iteration. The runtime should not call the visitor again.
    Stop,
}

impl IterationControl {
    /// `true` for [`IterationControl::Stop`].
    #[inline]
    pub fn is_stop(self) -> bool {
        matches!(self, IterationControl::Stop)
    }
}

/// A managed runtime whose heap can be enumerated.
///
/// Implementations own GC safety during [`iterate_heap`](Self::iterate_heap):
/// a raw object passed to the visitor must stay valid for the duration of
/// that one visitor call, and [`make_durable`](Self::make_durable) called
/// from inside the visitor must produce a handle that keeps the object alive
/// after the iteration ends.
pub trait HostRuntime {
    /// Caller-supplied description of a type (a name, a class object, ...).
    type Descriptor: ?Sized + fmt::Debug;
    /// Comparable class identity. Equality must be identity, not name.
    type ClassToken: Clone + Eq + fmt::Debug;
    /// The object a visitor sees. Only valid for one visitor call.
    type RawObject: ?Sized;
    /// A reference that survives the iteration.
    type Handle;
    /// Runtime failure reported by any of the operations below.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Identifies this runtime instance within the process.
    ///
    /// Two values that share a heap must return the same id. The bridge
    /// serializes walks per id.
    fn runtime_id(&self) -> usize;

    /// Resolve a descriptor to the identity of a loaded class.
    fn resolve_class(&self, descriptor: &Self::Descriptor) -> Result<Self::ClassToken, Self::Error>;

    /// Visit live objects until the visitor returns
    /// [`IterationControl::Stop`] or the heap is exhausted.
    ///
    /// `class_hint` is the class the caller is looking for. Runtimes may use
    /// it to skip objects cheaply but must not rely on it for correctness:
    /// the bridge filters every visited object itself.
    fn iterate_heap(
        &self,
        class_hint: &Self::ClassToken,
        visitor: &mut dyn FnMut(&Self::RawObject) -> IterationControl,
    ) -> Result<(), Self::Error>;

    /// The exact runtime class of a visited object.
    fn class_of(&self, object: &Self::RawObject) -> Self::ClassToken;

    /// Promote a visited object to a durable handle.
    fn make_durable(&self, object: &Self::RawObject) -> Result<Self::Handle, Self::Error>;

    /// Run a full collection. Runtimes without an explicit trigger keep the
    /// default no-op.
    fn collect_garbage(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called once after every heap walk, whether it succeeded or not, while
    /// the walk lock for [`runtime_id`](Self::runtime_id) is still held.
    ///
    /// Runtimes whose durable handles need a second step to become usable,
    /// or that mark objects in shared state during the walk, finish that
    /// work here so no other walk of the same runtime can observe it.
    fn finish_walk(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

//! Walk-scoped object references

use std::fmt;

use crate::identity::ClassIdentity;
use crate::runtime::HostRuntime;

/// An object seen during a heap walk.
///
/// Valid for exactly one visitor call. The `'w` lifetime is chosen by the
/// walker for each call and the visitor must accept any `'w`, so an
/// `Ephemeral` cannot be stored anywhere that outlives the call. Turning it
/// into something durable is the marshaller's job.
///
/// Reading the class of a visited object is fine:
///
/// ```
/// use heapwalk_core::{ClassIdentity, HeapWalker, HostRuntime, IterationControl};
///
/// fn classes<R: HostRuntime>(runtime: &R, class: &ClassIdentity<R>) -> Vec<R::ClassToken> {
///     let mut seen = Vec::new();
///     let _ = HeapWalker::new(runtime).for_each(class, |object| {
///         seen.push(object.class());
///         IterationControl::Continue
///     });
///     seen
/// }
/// ```
///
/// Keeping the object itself is not:
///
/// ```compile_fail
/// use heapwalk_core::{ClassIdentity, Ephemeral, HeapWalker, HostRuntime, IterationControl};
///
/// fn leak<'a, R: HostRuntime>(runtime: &'a R, class: &ClassIdentity<R>) -> Vec<Ephemeral<'a, R>> {
///     let mut escaped = Vec::new();
///     let _ = HeapWalker::new(runtime).for_each(class, |object| {
///         escaped.push(object);
///         IterationControl::Continue
///     });
///     escaped
/// }
/// ```
pub struct Ephemeral<'w, R: HostRuntime> {
    runtime: &'w R,
    object: &'w R::RawObject,
}

impl<'w, R: HostRuntime> Ephemeral<'w, R> {
    pub(crate) fn new(runtime: &'w R, object: &'w R::RawObject) -> Self {
        Self { runtime, object }
    }

    /// The exact runtime class of this object
    pub fn class(&self) -> R::ClassToken {
        self.runtime.class_of(self.object)
    }

    /// `true` if this object's class is exactly `identity`
    pub fn is_instance_of(&self, identity: &ClassIdentity<R>) -> bool {
        crate::filter::matches(self, identity)
    }

    /// Consume the reference and ask the runtime for a durable handle.
    pub(crate) fn upgrade(self) -> Result<R::Handle, R::Error> {
        self.runtime.make_durable(self.object)
    }
}

impl<R: HostRuntime> fmt::Debug for Ephemeral<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ephemeral")
            .field("class", &self.class())
            .finish_non_exhaustive()
    }
}
